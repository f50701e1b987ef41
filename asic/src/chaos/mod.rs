// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A driver wrapper that fails operations at random, for exercising the error
//! paths of the table client.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::random;
use serde::{Deserialize, Serialize};
use slog::{o, Logger};

use aal::{
    AsicError, AsicResult, DataBuf, DeviceTarget, Driver, KeyBuf, ReadFrom,
    SessionId, TableId, TableInfo,
};

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

fn check_probability(value: f64) -> AsicResult<()> {
    match (0.0..=1.0).contains(&value) {
        true => Ok(()),
        false => Err(AsicError::InvalidArg(format!(
            "probability out of range: {value}"
        ))),
    }
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> AsicResult<Self> {
        check_probability(value)?;
        Ok(Chaos { value })
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if random::<f64>() < self.value {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// A form of chaos that applies to tables.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
pub struct TableChaos {
    /// Track a set of chaos probabilities keyed by table name.
    pub values: HashMap<String, f64>,
}

/// A convenience function for creating chaos tables.
#[macro_export]
macro_rules! table_chaos {
    ( $( ($entry:expr, $prob:expr) ),* ) => {
        $crate::chaos::TableChaos {
            values: std::collections::HashMap::from([
                $( ($entry.into(), $prob) ),*
            ])
        }
    }
}

impl TableChaos {
    /// Assign the same chaos value to each of the named tables
    pub fn uniform(tables: &[&str], v: f64) -> Self {
        TableChaos {
            values: tables.iter().map(|t| (t.to_string(), v)).collect(),
        }
    }

    /// Return a chaos error according to the underlying probability value for
    /// the given table `id`.
    pub fn unfurled(
        &self,
        log: &Logger,
        id: &str,
        message: &str,
    ) -> AsicResult<()> {
        if let Some(value) = self.values.get(id) {
            if random::<f64>() < *value {
                slog::error!(log, "chaos table error: {}", message;
                    "table" => id);
                return Err(AsicError::Synthetic(message.into()));
            }
        }
        Ok(())
    }
}

/// The chaos config contains chaos values for each driver operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChaosConfig {
    pub session_create: Chaos,
    pub begin_batch: Chaos,
    pub end_batch: Chaos,
    pub complete_operations: Chaos,
    pub table_clear: TableChaos,
    pub table_usage: TableChaos,
    pub table_entry_add: TableChaos,
    pub table_entry_mod: TableChaos,
    pub table_entry_del: TableChaos,
    pub table_entry_get: TableChaos,
}

impl ChaosConfig {
    /// The uniform chaos config applies a uniform underlying probability to
    /// each session operation and to every table operation on the named
    /// tables.
    pub fn uniform(tables: &[&str], v: f64) -> AsicResult<Self> {
        let chaos = Chaos::new(v)?;
        Ok(Self {
            session_create: chaos,
            begin_batch: chaos,
            end_batch: chaos,
            complete_operations: chaos,
            table_clear: TableChaos::uniform(tables, v),
            table_usage: TableChaos::uniform(tables, v),
            table_entry_add: TableChaos::uniform(tables, v),
            table_entry_mod: TableChaos::uniform(tables, v),
            table_entry_del: TableChaos::uniform(tables, v),
            table_entry_get: TableChaos::uniform(tables, v),
        })
    }

    /// The uniform set chaos config applies a uniform underlying probability
    /// to each table mutation.  Reads and session operations never fail.
    pub fn uniform_set(tables: &[&str], v: f64) -> AsicResult<Self> {
        check_probability(v)?;
        Ok(Self {
            table_clear: TableChaos::uniform(tables, v),
            table_entry_add: TableChaos::uniform(tables, v),
            table_entry_mod: TableChaos::uniform(tables, v),
            table_entry_del: TableChaos::uniform(tables, v),
            ..Default::default()
        })
    }

    /// Verify that every probability is in range
    pub fn validate(&self) -> AsicResult<()> {
        let singles = [
            &self.session_create,
            &self.begin_batch,
            &self.end_batch,
            &self.complete_operations,
        ];
        for c in singles {
            check_probability(c.value)?;
        }
        let tables = [
            &self.table_clear,
            &self.table_usage,
            &self.table_entry_add,
            &self.table_entry_mod,
            &self.table_entry_del,
            &self.table_entry_get,
        ];
        for t in tables {
            for v in t.values.values() {
                check_probability(*v)?;
            }
        }
        Ok(())
    }
}

/// Wraps another driver, injecting synthetic failures before delegating.  A
/// failed operation never reaches the inner driver.
pub struct ChaosHandle<D: Driver> {
    inner: D,
    log: Logger,
    config: ChaosConfig,
    // Table names are learned as tables are resolved
    names: Mutex<HashMap<TableId, String>>,
}

/// A convenience macro for unfurling chaos. The $name should be a `Chaos`
/// member of [`ChaosConfig`]. The `handle` is a [`ChaosHandle`] object.
macro_rules! unfurl {
    ($handle:ident, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}

/// A convenience macro for unfurling tabular chaos. The $name should be a
/// `TableChaos` member of [`ChaosConfig`]. The `handle` is a [`ChaosHandle`]
/// object.
macro_rules! table_unfurl {
    ($handle:ident, $id: expr, $name:ident) => {
        $handle.config.$name.unfurled(
            &$handle.log,
            &$handle.table_name($id),
            stringify!($name),
        )?
    };
}

impl<D: Driver> ChaosHandle<D> {
    pub fn new(
        log: &Logger,
        inner: D,
        config: ChaosConfig,
    ) -> AsicResult<Self> {
        config.validate()?;
        Ok(ChaosHandle {
            inner,
            log: log.new(o!("unit" => "chaos")),
            config,
            names: Mutex::new(HashMap::new()),
        })
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn table_name(&self, id: TableId) -> String {
        match self.names.lock().unwrap().get(&id) {
            Some(name) => name.clone(),
            None => format!("table-{id}"),
        }
    }
}

impl<D: Driver> Driver for ChaosHandle<D> {
    fn table_info(&self, name: &str) -> AsicResult<TableInfo> {
        // Chaos is keyed by the name clients use, which may be shorter than
        // the table's full name.
        let info = self.inner.table_info(name)?;
        self.names.lock().unwrap().insert(info.id, name.to_string());
        Ok(info)
    }

    fn session_create(&self) -> AsicResult<SessionId> {
        unfurl!(self, session_create);
        self.inner.session_create()
    }

    fn session_destroy(&self, sess: SessionId) -> AsicResult<()> {
        self.inner.session_destroy(sess)
    }

    fn begin_batch(&self, sess: SessionId) -> AsicResult<()> {
        unfurl!(self, begin_batch);
        self.inner.begin_batch(sess)
    }

    fn end_batch(&self, sess: SessionId, flush: bool) -> AsicResult<()> {
        unfurl!(self, end_batch);
        self.inner.end_batch(sess, flush)
    }

    fn complete_operations(&self, sess: SessionId) -> AsicResult<()> {
        unfurl!(self, complete_operations);
        self.inner.complete_operations(sess)
    }

    fn entry_add(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        data: &DataBuf,
    ) -> AsicResult<()> {
        table_unfurl!(self, key.table(), table_entry_add);
        self.inner.entry_add(sess, tgt, key, data)
    }

    fn entry_mod(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        data: &DataBuf,
    ) -> AsicResult<()> {
        table_unfurl!(self, key.table(), table_entry_mod);
        self.inner.entry_mod(sess, tgt, key, data)
    }

    fn entry_del(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
    ) -> AsicResult<()> {
        table_unfurl!(self, key.table(), table_entry_del);
        self.inner.entry_del(sess, tgt, key)
    }

    fn entry_get(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        from: ReadFrom,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        table_unfurl!(self, key.table(), table_entry_get);
        self.inner.entry_get(sess, tgt, key, from, data)
    }

    fn entry_get_first(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        from: ReadFrom,
        key: &mut KeyBuf,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        table_unfurl!(self, key.table(), table_entry_get);
        self.inner.entry_get_first(sess, tgt, from, key, data)
    }

    fn entry_get_next_n(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        start: &KeyBuf,
        from: ReadFrom,
        entries: &mut [(KeyBuf, DataBuf)],
    ) -> AsicResult<usize> {
        table_unfurl!(self, start.table(), table_entry_get);
        self.inner.entry_get_next_n(sess, tgt, start, from, entries)
    }

    fn table_usage(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
        from: ReadFrom,
    ) -> AsicResult<u32> {
        table_unfurl!(self, table, table_usage);
        self.inner.table_usage(sess, tgt, table, from)
    }

    fn table_clear(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
    ) -> AsicResult<()> {
        table_unfurl!(self, table, table_clear);
        self.inner.table_clear(sess, tgt, table)
    }
}
