// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Encoded key and data buffers.
//!
//! Each table handle owns one `KeyBuf` and one `DataBuf`, laid out once from
//! the table's resolved schema and reused for every operation.  A buffer can
//! only be written through the `Encoder` returned by `reset()`, and resetting
//! clears every slot, so values from a previous operation can't leak into the
//! next one.

use crate::ActionId;
use crate::ActionInfo;
use crate::AsicError;
use crate::AsicResult;
use crate::FieldId;
use crate::FieldSink;
use crate::FieldValue;
use crate::KeyField;
use crate::TableId;

/// A single field within an encoded buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    pub id: FieldId,
    /// Width in bits
    pub width: u32,
    value: Option<FieldValue>,
}

impl FieldSlot {
    fn new(id: FieldId, width: u32) -> Self {
        FieldSlot {
            id,
            width,
            value: None,
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    fn set(&mut self, value: FieldValue) -> AsicResult<()> {
        if !value.fits(self.width) {
            return Err(AsicError::InvalidArg(format!(
                "value {value} doesn't fit in {}-bit field {}",
                self.width, self.id
            )));
        }
        self.value = Some(value);
        Ok(())
    }
}

fn fill_slot(
    slots: &mut [FieldSlot],
    id: FieldId,
    value: FieldValue,
) -> AsicResult<()> {
    slots
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or(AsicError::InvalidArg(format!("no field with id {id}")))?
        .set(value)
}

/// Writes fields into a freshly reset buffer, in slot order
#[derive(Debug)]
pub struct Encoder<'a> {
    slots: &'a mut [FieldSlot],
    next: usize,
}

impl Encoder<'_> {
    /// Verify that every slot in the buffer was written
    pub fn finish(self) -> AsicResult<()> {
        match self.next == self.slots.len() {
            true => Ok(()),
            false => Err(AsicError::InvalidArg(format!(
                "encoded {} of {} fields",
                self.next,
                self.slots.len()
            ))),
        }
    }
}

impl FieldSink for Encoder<'_> {
    fn push(&mut self, value: FieldValue) -> AsicResult<()> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(self.next).ok_or_else(|| {
            AsicError::InvalidArg(format!(
                "too many fields: buffer holds {len}"
            ))
        })?;
        slot.set(value)?;
        self.next += 1;
        Ok(())
    }
}

/// An encoded match key for one table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBuf {
    table: TableId,
    slots: Vec<FieldSlot>,
}

impl KeyBuf {
    /// Lay out a key buffer with one slot per key field, in the given order
    pub fn new(table: TableId, fields: &[KeyField]) -> Self {
        KeyBuf {
            table,
            slots: fields
                .iter()
                .map(|f| FieldSlot::new(f.id, f.width))
                .collect(),
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Clear every slot and return an encoder positioned at the first one
    pub fn reset(&mut self) -> Encoder<'_> {
        self.clear();
        Encoder {
            slots: &mut self.slots,
            next: 0,
        }
    }

    /// Clear every slot, leaving the buffer ready to be filled by a read
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| s.value = None);
    }

    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    pub fn value(&self, id: FieldId) -> Option<&FieldValue> {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.value.as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.value.is_some())
    }

    /// Store a value by field id.  Used by drivers when returning entries.
    pub fn fill(&mut self, id: FieldId, value: FieldValue) -> AsicResult<()> {
        fill_slot(&mut self.slots, id, value)
    }
}

/// An encoded action and its arguments for one table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataBuf {
    table: TableId,
    action: Option<ActionId>,
    slots: Vec<FieldSlot>,
}

impl DataBuf {
    pub fn new(table: TableId) -> Self {
        DataBuf {
            table,
            action: None,
            slots: Vec::new(),
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Lay the buffer out for `action`, clearing any previous contents, and
    /// return an encoder positioned at its first argument.
    pub fn reset(&mut self, action: &ActionInfo) -> Encoder<'_> {
        self.bind(action);
        Encoder {
            slots: &mut self.slots,
            next: 0,
        }
    }

    /// Lay the buffer out for `action` without writing any arguments.  Used
    /// by drivers when returning entries.
    pub fn bind(&mut self, action: &ActionInfo) {
        self.action = Some(action.id);
        self.slots.clear();
        self.slots.extend(
            action
                .fields
                .iter()
                .map(|f| FieldSlot::new(f.id, f.width)),
        );
    }

    /// Drop the action binding, leaving the buffer ready to be filled by a
    /// read.
    pub fn clear(&mut self) {
        self.action = None;
        self.slots.clear();
    }

    pub fn action(&self) -> Option<ActionId> {
        self.action
    }

    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    pub fn value(&self, id: FieldId) -> Option<&FieldValue> {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.value.as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.action.is_some() && self.slots.iter().all(|s| s.value.is_some())
    }

    pub fn fill(&mut self, id: FieldId, value: FieldValue) -> AsicResult<()> {
        fill_slot(&mut self.slots, id, value)
    }
}

/// The reusable key and data buffers belonging to one table handle
#[derive(Clone, Debug)]
pub struct BufferPair {
    pub key: KeyBuf,
    pub data: DataBuf,
}

impl BufferPair {
    pub fn new(table: TableId, keys: &[KeyField]) -> Self {
        BufferPair {
            key: KeyBuf::new(table, keys),
            data: DataBuf::new(table),
        }
    }
}
