// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::ops::Bound;

use aal::ActionId;
use aal::ActionInfo;
use aal::AsicError;
use aal::AsicResult;
use aal::DataBuf;
use aal::FieldValue;
use aal::KeyBuf;
use aal::ReadFrom;
use aal::TableInfo;

/// Key field values, in the table's declared key order
pub type EntryKey = Vec<FieldValue>;

/// An action and its argument values, in the action's declared order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub action: ActionId,
    pub args: Vec<FieldValue>,
}

/// A mutation that has been accepted into the software shadow but may not
/// have reached the hardware yet.
#[derive(Debug)]
pub enum Op {
    Add { key: EntryKey, entry: Entry },
    Mod { key: EntryKey, entry: Entry },
    Del { key: EntryKey },
    Clear,
}

impl Op {
    fn apply_to(&self, entries: &mut BTreeMap<EntryKey, Entry>) {
        match self {
            Op::Add { key, entry } | Op::Mod { key, entry } => {
                entries.insert(key.clone(), entry.clone());
            }
            Op::Del { key } => {
                entries.remove(key);
            }
            Op::Clear => entries.clear(),
        }
    }
}

/// The state of one table.  `shadow` reflects every accepted operation;
/// `hw` only those that have been pushed to the device.
pub struct Table {
    pub info: TableInfo,
    hw: BTreeMap<EntryKey, Entry>,
    shadow: BTreeMap<EntryKey, Entry>,
}

impl Table {
    pub fn new(info: TableInfo) -> Self {
        Table {
            info,
            hw: BTreeMap::new(),
            shadow: BTreeMap::new(),
        }
    }

    fn view(&self, from: ReadFrom) -> &BTreeMap<EntryKey, Entry> {
        match from {
            ReadFrom::Hardware => &self.hw,
            ReadFrom::Software => &self.shadow,
        }
    }

    fn action(&self, id: ActionId) -> AsicResult<&ActionInfo> {
        self.info.actions.iter().find(|a| a.id == id).ok_or_else(|| {
            AsicError::InvalidArg(format!(
                "no action {id} in table {}",
                self.info.name
            ))
        })
    }

    /// Extract the key values from an encoded key, verifying that every key
    /// field was provided and nothing else was.
    pub fn entry_key(&self, key: &KeyBuf) -> AsicResult<EntryKey> {
        if key.table() != self.info.id {
            return Err(AsicError::InvalidArg(format!(
                "key for table {} used with table {}",
                key.table(),
                self.info.id
            )));
        }
        if key.slots().len() != self.info.keys.len() {
            return Err(AsicError::InvalidArg(format!(
                "table {} has {} key fields, found {}",
                self.info.name,
                self.info.keys.len(),
                key.slots().len()
            )));
        }
        self.info
            .keys
            .iter()
            .map(|f| {
                key.value(f.id).cloned().ok_or_else(|| {
                    AsicError::InvalidArg(format!("key field {} unset", f.name))
                })
            })
            .collect()
    }

    /// Extract the action and its arguments from an encoded data buffer
    pub fn entry(&self, data: &DataBuf) -> AsicResult<Entry> {
        let action_id = data.action().ok_or_else(|| {
            AsicError::InvalidArg("no action in data buffer".into())
        })?;
        let action = self.action(action_id)?;
        if data.slots().len() != action.fields.len() {
            return Err(AsicError::InvalidArg(format!(
                "{} takes {} arguments, found {}",
                action.name,
                action.fields.len(),
                data.slots().len()
            )));
        }
        let args = action
            .fields
            .iter()
            .map(|f| {
                data.value(f.id).cloned().ok_or_else(|| {
                    AsicError::InvalidArg(format!("argument {} unset", f.name))
                })
            })
            .collect::<AsicResult<Vec<FieldValue>>>()?;
        Ok(Entry {
            action: action_id,
            args,
        })
    }

    fn fill(
        &self,
        k: &EntryKey,
        e: &Entry,
        key: Option<&mut KeyBuf>,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        if let Some(key) = key {
            key.clear();
            for (f, v) in self.info.keys.iter().zip(k) {
                key.fill(f.id, v.clone())?;
            }
        }
        let action = self.action(e.action)?;
        data.bind(action);
        for (f, v) in action.fields.iter().zip(&e.args) {
            data.fill(f.id, v.clone())?;
        }
        Ok(())
    }

    pub fn usage(&self, from: ReadFrom) -> usize {
        self.view(from).len()
    }

    /// Validate a mutation against the shadow and apply it there.  The
    /// returned `Op` still needs to be pushed to the hardware.
    pub fn add(&mut self, key: EntryKey, entry: Entry) -> AsicResult<Op> {
        if self.shadow.contains_key(&key) {
            return Err(AsicError::Exists);
        }
        if self.shadow.len() >= self.info.size {
            return Err(AsicError::TableFull(self.info.name.clone()));
        }
        self.shadow.insert(key.clone(), entry.clone());
        Ok(Op::Add { key, entry })
    }

    pub fn modify(&mut self, key: EntryKey, entry: Entry) -> AsicResult<Op> {
        match self.shadow.get_mut(&key) {
            Some(e) => *e = entry.clone(),
            None => {
                return Err(AsicError::Missing(
                    "table entry not found".to_string(),
                ))
            }
        }
        Ok(Op::Mod { key, entry })
    }

    pub fn delete(&mut self, key: EntryKey) -> AsicResult<Op> {
        match self.shadow.remove(&key) {
            Some(_) => Ok(Op::Del { key }),
            None => {
                Err(AsicError::Missing("table entry not found".to_string()))
            }
        }
    }

    pub fn clear(&mut self) -> Op {
        self.shadow.clear();
        Op::Clear
    }

    /// Push an already-validated operation to the hardware
    pub fn apply(&mut self, op: Op) {
        match op {
            Op::Add { key, entry } | Op::Mod { key, entry } => {
                self.hw.insert(key, entry);
            }
            Op::Del { key } => {
                self.hw.remove(&key);
            }
            Op::Clear => self.hw.clear(),
        }
    }

    /// Rebuild the shadow from the hardware state and the operations still
    /// waiting to be pushed, in the order they will be pushed.
    pub fn resync<'a>(&mut self, pending: impl IntoIterator<Item = &'a Op>) {
        let mut shadow = self.hw.clone();
        for op in pending {
            op.apply_to(&mut shadow);
        }
        self.shadow = shadow;
    }

    pub fn get(
        &self,
        key: &EntryKey,
        from: ReadFrom,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        match self.view(from).get(key) {
            Some(e) => self.fill(key, e, None, data),
            None => {
                Err(AsicError::Missing("table entry not found".to_string()))
            }
        }
    }

    pub fn get_first(
        &self,
        from: ReadFrom,
        key: &mut KeyBuf,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        match self.view(from).iter().next() {
            Some((k, e)) => self.fill(k, e, Some(key), data),
            None => Err(AsicError::Missing(format!(
                "table {} is empty",
                self.info.name
            ))),
        }
    }

    pub fn get_next_n(
        &self,
        start: &EntryKey,
        from: ReadFrom,
        entries: &mut [(KeyBuf, DataBuf)],
    ) -> AsicResult<usize> {
        let range = self
            .view(from)
            .range::<EntryKey, _>((Bound::Excluded(start), Bound::Unbounded));
        let mut filled = 0;
        for ((k, e), (key, data)) in range.zip(entries.iter_mut()) {
            self.fill(k, e, Some(key), data)?;
            filled += 1;
        }
        Ok(filled)
    }
}
