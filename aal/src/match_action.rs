// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

/// Table clients describe keys and actions with annotated Rust types, such as:
///     #[derive(MatchParse, Debug)]
///     struct MatchKey {
///         robot_id: u8,
///         instance: u16,
///     }
///     #[derive(ActionParse, Debug)]
///     enum Action {
///         SetTarget { next_id: u16, duration: u32 },
///     }
/// These types are meaningful to the client, but not to the device.  Before an
/// operation is issued, each field is converted into a `FieldValue` and
/// written, in declaration order, into one of the table's encoded buffers.
/// Field order is the contract: the Nth struct field (or variant field) lands
/// in the Nth key (or data) field bound for the table, and the Nth enum
/// variant is the Nth bound action.
///
/// Numbers are widened to a u64 on the way in.  On the way back out they are
/// narrowed with a checked conversion, so a value that doesn't fit the Rust
/// type is an error rather than a silent truncation.
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::convert::TryInto;
use std::net::Ipv4Addr;

use crate::AsicResult;

/// The intermediate representation of a single key or data field
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    /// Any field of 64 bits or fewer
    U64(u64),
    /// Wider fields, big-endian
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Does this value fit in a field `width` bits wide?
    pub fn fits(&self, width: u32) -> bool {
        match self {
            FieldValue::U64(v) => {
                width >= 64 || (width > 0 && (v >> width) == 0)
            }
            FieldValue::Bytes(b) => {
                width > 64 && b.len() == width.div_ceil(8) as usize
            }
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// The different kinds of Match keys
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Lpm,
    Range,
    Mask,
}

/// Anything that accepts a sequence of encoded fields, in order.  The encoders
/// returned when a table buffer is reset implement this.
pub trait FieldSink {
    fn push(&mut self, value: FieldValue) -> AsicResult<()>;
}

/// The MatchParse trait defines the behavior needed to convert a high-level
/// Match key into our intermediate representation.
pub trait MatchParse {
    /// Number of fields in the key
    const FIELD_COUNT: usize;

    /// Return all the names and values of the key fields as strings
    fn key_values(&self) -> BTreeMap<String, String>;
    /// Write each key field into the sink, in declaration order
    fn key_encode<S: FieldSink>(&self, sink: &mut S) -> AsicResult<()>;
    /// Rebuild the key from its fields, in declaration order
    fn key_decode(fields: &[FieldValue]) -> AsicResult<Self>
    where
        Self: Sized;
}

/// The ActionParse trait defines the behavior needed to convert a high-level
/// Action enum into our intermediate representation.
pub trait ActionParse {
    /// The number of arguments taken by each action, indexed by variant
    const ARITY: &'static [usize];

    /// Position of this action among the enum's variants
    fn action_index(&self) -> usize;
    /// Return the name of the action as a string
    fn action_name(&self) -> &'static str;
    /// Return the names and values of the arguments to the action
    fn action_args(&self) -> BTreeMap<String, String>;
    /// Write each argument into the sink, in declaration order
    fn action_encode<S: FieldSink>(&self, sink: &mut S) -> AsicResult<()>;
    /// Rebuild the action at `index` from its arguments
    fn action_decode(index: usize, fields: &[FieldValue]) -> AsicResult<Self>
    where
        Self: Sized;
}

// Build the owned-value conversion on top of the by-reference one
macro_rules! owned_try_from {
    ($t:ty) => {
        impl TryFrom<FieldValue> for $t {
            type Error = &'static str;

            fn try_from(v: FieldValue) -> Result<Self, Self::Error> {
                (&v).try_into()
            }
        }
    };
}

// Build the narrowing conversion for an unsigned integer type
macro_rules! narrow_uint {
    ($t:ty, $bits:expr, $err:expr) => {
        impl From<$t> for FieldValue {
            fn from(v: $t) -> FieldValue {
                FieldValue::U64(v as u64)
            }
        }

        impl TryFrom<&FieldValue> for $t {
            type Error = &'static str;

            fn try_from(v: &FieldValue) -> Result<Self, Self::Error> {
                let mask = (1u64 << $bits) - 1;

                match v {
                    FieldValue::U64(v) if v & mask == *v => Ok(*v as $t),
                    FieldValue::U64(_) => Err($err),
                    FieldValue::Bytes(_) => Err("found bytes - not an integer"),
                }
            }
        }

        owned_try_from!($t);
    };
}

narrow_uint!(u8, 8, "value not 8 bits");
narrow_uint!(u16, 16, "value not 16 bits");
narrow_uint!(u32, 32, "value not 32 bits");

impl From<u64> for FieldValue {
    fn from(v: u64) -> FieldValue {
        FieldValue::U64(v)
    }
}

impl TryFrom<&FieldValue> for u64 {
    type Error = &'static str;

    fn try_from(v: &FieldValue) -> Result<Self, Self::Error> {
        match v {
            FieldValue::U64(v) => Ok(*v),
            FieldValue::Bytes(_) => Err("value not 64 bits"),
        }
    }
}
owned_try_from!(u64);

impl From<bool> for FieldValue {
    fn from(v: bool) -> FieldValue {
        FieldValue::U64(match v {
            false => 0,
            true => 1,
        })
    }
}

impl TryFrom<&FieldValue> for bool {
    type Error = &'static str;

    fn try_from(v: &FieldValue) -> Result<Self, Self::Error> {
        match v {
            FieldValue::U64(0) => Ok(false),
            FieldValue::U64(1) => Ok(true),
            _ => Err("value not a boolean"),
        }
    }
}
owned_try_from!(bool);

impl From<Ipv4Addr> for FieldValue {
    fn from(v: Ipv4Addr) -> FieldValue {
        FieldValue::U64(u32::from(v) as u64)
    }
}

impl TryFrom<&FieldValue> for Ipv4Addr {
    type Error = &'static str;

    fn try_from(v: &FieldValue) -> Result<Self, Self::Error> {
        u32::try_from(v).map(Ipv4Addr::from)
    }
}
owned_try_from!(Ipv4Addr);

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> FieldValue {
        FieldValue::Bytes(v)
    }
}
