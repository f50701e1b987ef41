// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod match_action;
pub use match_action::*;

mod buffer;
pub use buffer::*;

/// Numeric identity of a table within a loaded pipeline program
pub type TableId = u32;
/// Numeric identity of a key or data field within a table
pub type FieldId = u32;
/// Numeric identity of an action within a table
pub type ActionId = u32;
/// Identifies one control-plane session on a device
pub type SessionId = u32;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Pipe id meaning "every pipeline on the device"
pub const ALL_PIPES: u16 = 0xffff;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// A table, field, or action named by the caller doesn't exist in the
    /// loaded pipeline program, or exists with a different shape.
    #[error("Schema mismatch: {}", .0)]
    SchemaMismatch(String),
    /// The ASIC layer detected some internal inconsistency
    #[error("Internal error: {}", .0)]
    Internal(String),
    /// The device reported state that contradicts itself, such as an entry
    /// count that disagrees with the number of entries returned.
    #[error("Inconsistent table state: {}", .0)]
    Inconsistent(String),
    /// A batch was opened while one was already open, or closed while none
    /// was open.
    #[error("Batch protocol violation: {}", .0)]
    BatchProtocol(String),
    /// A value read back from the device doesn't fit the type it is being
    /// decoded into.
    #[error("Decode failed: {}", .0)]
    Decode(String),
    /// The ASIC encountered an error when interacting with the local file
    /// system.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// Failed to find the P4 artifacts
    #[error("Failed to find P4 artifacts: {}", .0)]
    P4Missing(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
    /// The table has no room for another entry
    #[error("Table {} is full", .0)]
    TableFull(String),
}

/// The broad categories callers use to decide whether an error ends the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    SchemaMismatch,
    DuplicateKey,
    NotFound,
    ResourceExhausted,
    Consistency,
    BatchProtocol,
    Device,
}

impl AsicError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AsicError::SchemaMismatch(_) | AsicError::P4Missing(_) => {
                ErrorClass::SchemaMismatch
            }
            AsicError::Exists => ErrorClass::DuplicateKey,
            AsicError::Missing(_) => ErrorClass::NotFound,
            AsicError::TableFull(_) => ErrorClass::ResourceExhausted,
            AsicError::Inconsistent(_) => ErrorClass::Consistency,
            AsicError::BatchProtocol(_) => ErrorClass::BatchProtocol,
            AsicError::InvalidArg(_)
            | AsicError::Internal(_)
            | AsicError::Decode(_)
            | AsicError::Io { .. }
            | AsicError::Synthetic(_) => ErrorClass::Device,
        }
    }

    /// Duplicate keys, missing keys, and full tables are reported to the
    /// caller to handle.  Everything else means the control plane and the
    /// device no longer agree, and continuing would be meaningless.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.class(),
            ErrorClass::DuplicateKey
                | ErrorClass::NotFound
                | ErrorClass::ResourceExhausted
        )
    }
}

/// The device and pipeline(s) an operation applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceTarget {
    pub dev_id: u32,
    pub pipe_id: u16,
}

impl DeviceTarget {
    /// Target every pipeline on the given device
    pub fn all_pipes(dev_id: u32) -> Self {
        DeviceTarget {
            dev_id,
            pipe_id: ALL_PIPES,
        }
    }
}

impl Default for DeviceTarget {
    fn default() -> Self {
        DeviceTarget::all_pipes(0)
    }
}

/// Which copy of a table's state a read consults
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFrom {
    /// Authoritative device state.  Only reflects operations that have been
    /// pushed to the device.
    Hardware,
    /// The driver's software shadow, which includes operations that are still
    /// queued in a batch.
    Software,
}

impl From<bool> for ReadFrom {
    fn from(from_hw: bool) -> Self {
        match from_hw {
            true => ReadFrom::Hardware,
            false => ReadFrom::Software,
        }
    }
}

/// Metadata describing a single key field, as reported by the driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyField {
    pub name: String,
    pub id: FieldId,
    /// Width in bits
    pub width: u32,
    pub match_type: MatchType,
}

/// Metadata describing a single argument to an action
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataField {
    pub name: String,
    pub id: FieldId,
    /// Width in bits
    pub width: u32,
}

/// An action and its arguments, in declaration order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionInfo {
    pub name: String,
    pub id: ActionId,
    pub fields: Vec<DataField>,
}

/// Everything the driver knows about the shape of a single table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub id: TableId,
    pub size: usize,
    pub keys: Vec<KeyField>,
    pub actions: Vec<ActionInfo>,
}

/// The `Driver` trait is the seam between the table client and whatever
/// manages the device: a vendor runtime, a software model, or a wrapper that
/// injects faults.  Identifiers come from `table_info()`, and every entry
/// operation exchanges data through encoded key and data buffers.
pub trait Driver: Send + Sync {
    /// Describe the named table in the loaded pipeline program
    fn table_info(&self, name: &str) -> AsicResult<TableInfo>;

    /// Open a new session on the device
    fn session_create(&self) -> AsicResult<SessionId>;
    /// Tear down a session.  Any work still queued on it is discarded.
    fn session_destroy(&self, sess: SessionId) -> AsicResult<()>;
    /// Start queueing this session's operations as a single unit of work
    fn begin_batch(&self, sess: SessionId) -> AsicResult<()>;
    /// Close the current batch.  If `flush` is set the queued operations are
    /// pushed to the device immediately, otherwise they are pushed no later
    /// than the next `complete_operations()`.
    fn end_batch(&self, sess: SessionId, flush: bool) -> AsicResult<()>;
    /// Block until every operation submitted on this session has been
    /// acknowledged by the device.
    fn complete_operations(&self, sess: SessionId) -> AsicResult<()>;

    fn entry_add(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        data: &DataBuf,
    ) -> AsicResult<()>;
    fn entry_mod(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        data: &DataBuf,
    ) -> AsicResult<()>;
    fn entry_del(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
    ) -> AsicResult<()>;
    /// Look up a single entry, filling in `data` with its action and
    /// arguments.
    fn entry_get(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        from: ReadFrom,
        data: &mut DataBuf,
    ) -> AsicResult<()>;
    /// Fetch the first entry of the table, in the device's iteration order.
    /// Returns `AsicError::Missing` if the table is empty.
    fn entry_get_first(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        from: ReadFrom,
        key: &mut KeyBuf,
        data: &mut DataBuf,
    ) -> AsicResult<()>;
    /// Fetch up to `entries.len()` entries following `start`.  Returns the
    /// number of entries actually filled in.
    fn entry_get_next_n(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        start: &KeyBuf,
        from: ReadFrom,
        entries: &mut [(KeyBuf, DataBuf)],
    ) -> AsicResult<usize>;
    /// Report the number of entries in the table
    fn table_usage(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
        from: ReadFrom,
    ) -> AsicResult<u32>;
    /// Remove every entry from the table
    fn table_clear(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
    ) -> AsicResult<()>;
}
