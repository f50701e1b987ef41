// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A software model of a match-action runtime.
//!
//! The model keeps two copies of every table: a software shadow that reflects
//! each operation as soon as it is accepted, and the "hardware" state that
//! only changes when operations are pushed.  Operations issued outside a
//! batch are pushed immediately.  Operations issued inside a batch are queued
//! on their session and pushed when the batch is flushed, or at the next
//! completion barrier if it was closed without a flush.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use slog::{debug, info, o};

use aal::AsicError;
use aal::AsicResult;
use aal::DataBuf;
use aal::DeviceTarget;
use aal::Driver;
use aal::KeyBuf;
use aal::ReadFrom;
use aal::SessionId;
use aal::TableId;
use aal::TableInfo;
use aal::ALL_PIPES;

use crate::bfrt::BfRt;

pub mod table;
use table::Op;
use table::Table;

/// Number of pipelines on the modeled device
pub const PIPE_COUNT: u16 = 4;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AsicConfig {
    /// Directory containing the program's bfrt.json.  If unset, we fall back
    /// to $P4_DIR, and then to a location relative to the binary.
    pub p4_dir: Option<String>,
    /// Name of the pipeline program
    pub program: String,
    pub device_id: u32,
}

impl Default for AsicConfig {
    fn default() -> Self {
        AsicConfig {
            p4_dir: None,
            program: "ur".to_string(),
            device_id: 0,
        }
    }
}

#[derive(Default)]
struct Session {
    batch_open: bool,
    // Operations issued inside the open batch
    queued: Vec<(TableId, Op)>,
    // Operations from a batch closed without a flush
    deferred: Vec<(TableId, Op)>,
}

struct ModelState {
    tables: BTreeMap<TableId, Table>,
    sessions: BTreeMap<SessionId, Session>,
    next_session: SessionId,
}

fn push_ops(tables: &mut BTreeMap<TableId, Table>, ops: Vec<(TableId, Op)>) {
    for (id, op) in ops {
        if let Some(t) = tables.get_mut(&id) {
            t.apply(op);
        }
    }
}

pub struct ModelHandle {
    log: slog::Logger,
    dev_id: u32,
    state: Mutex<ModelState>,
}

impl ModelHandle {
    /// Build a model device running the given program
    pub fn from_program(
        log: &slog::Logger,
        rt: &BfRt,
        dev_id: u32,
    ) -> AsicResult<Self> {
        let log = log.new(o!("unit" => "model", "dev" => dev_id));
        let mut tables = BTreeMap::new();
        for name in rt.table_names() {
            let info = rt.get_table(name)?;
            if tables.contains_key(&info.id) {
                return Err(AsicError::SchemaMismatch(format!(
                    "duplicate table id {} for {name}",
                    info.id
                )));
            }
            tables.insert(info.id, Table::new(info));
        }
        info!(log, "model device ready"; "tables" => tables.len());

        Ok(ModelHandle {
            log,
            dev_id,
            state: Mutex::new(ModelState {
                tables,
                sessions: BTreeMap::new(),
                next_session: 1,
            }),
        })
    }

    /// Find and load the configured program, then build a model device
    /// running it.
    pub fn new(log: &slog::Logger, config: &AsicConfig) -> AsicResult<Self> {
        let p4_dir = match &config.p4_dir {
            Some(d) => d.clone(),
            None => crate::bfrt::get_p4_dir(&config.program)?,
        };
        info!(log, "loading {} from {p4_dir}", config.program);
        let rt = BfRt::init(&p4_dir)?;
        ModelHandle::from_program(log, &rt, config.device_id)
    }

    fn check_target(&self, tgt: &DeviceTarget) -> AsicResult<()> {
        if tgt.dev_id != self.dev_id {
            return Err(AsicError::InvalidArg(format!(
                "no such device: {}",
                tgt.dev_id
            )));
        }
        if tgt.pipe_id != ALL_PIPES && tgt.pipe_id >= PIPE_COUNT {
            return Err(AsicError::InvalidArg(format!(
                "no such pipe: {}",
                tgt.pipe_id
            )));
        }
        Ok(())
    }

    // Validate a mutation against the shadow, then push it to the hardware
    // or queue it on the session's open batch.
    fn mutate<F>(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
        f: F,
    ) -> AsicResult<()>
    where
        F: FnOnce(&mut Table) -> AsicResult<Op>,
    {
        self.check_target(tgt)?;
        let mut state = self.state.lock().unwrap();
        let ModelState {
            tables, sessions, ..
        } = &mut *state;

        let session = sessions.get_mut(&sess).ok_or_else(|| no_session(sess))?;
        let t = tables.get_mut(&table).ok_or_else(|| no_table(table))?;
        let op = f(t)?;
        match session.batch_open {
            true => session.queued.push((table, op)),
            false => t.apply(op),
        }
        Ok(())
    }

    // Run a read-only operation against a table
    fn read<F, T>(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
        f: F,
    ) -> AsicResult<T>
    where
        F: FnOnce(&Table) -> AsicResult<T>,
    {
        self.check_target(tgt)?;
        let state = self.state.lock().unwrap();
        if !state.sessions.contains_key(&sess) {
            return Err(no_session(sess));
        }
        let t = state.tables.get(&table).ok_or_else(|| no_table(table))?;
        f(t)
    }
}

fn no_session(sess: SessionId) -> AsicError {
    AsicError::InvalidArg(format!("no such session: {sess}"))
}

fn no_table(table: TableId) -> AsicError {
    AsicError::InvalidArg(format!("no such table id: {table}"))
}

impl Driver for ModelHandle {
    // A table may be named in full, or by any suffix of its dotted name that
    // identifies it uniquely, e.g. "Ingress.t" for "pipe.Ingress.t".
    fn table_info(&self, name: &str) -> AsicResult<TableInfo> {
        let state = self.state.lock().unwrap();
        if let Some(t) = state.tables.values().find(|t| t.info.name == name) {
            return Ok(t.info.clone());
        }
        let suffix = format!(".{name}");
        let mut found = state
            .tables
            .values()
            .filter(|t| t.info.name.ends_with(&suffix));
        match (found.next(), found.next()) {
            (Some(t), None) => Ok(t.info.clone()),
            (Some(a), Some(b)) => Err(AsicError::SchemaMismatch(format!(
                "{name} is ambiguous: {} and {}",
                a.info.name, b.info.name
            ))),
            (None, _) => {
                Err(AsicError::SchemaMismatch(format!("no such table: {name}")))
            }
        }
    }

    fn session_create(&self) -> AsicResult<SessionId> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id, Session::default());
        debug!(self.log, "created session"; "session" => id);
        Ok(id)
    }

    fn session_destroy(&self, sess: SessionId) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        let ModelState {
            tables, sessions, ..
        } = &mut *state;
        let session = sessions.remove(&sess).ok_or_else(|| no_session(sess))?;
        let dropped = session.queued.len() + session.deferred.len();

        // The dropped operations already reached the shadow, so back them
        // out of every table they touched.
        let touched: BTreeSet<TableId> = session
            .deferred
            .iter()
            .chain(session.queued.iter())
            .map(|(id, _)| *id)
            .collect();
        for id in touched {
            let pending = sessions
                .values()
                .flat_map(|s| s.deferred.iter().chain(s.queued.iter()))
                .filter(|(t, _)| *t == id)
                .map(|(_, op)| op);
            if let Some(t) = tables.get_mut(&id) {
                t.resync(pending);
            }
        }
        debug!(self.log, "destroyed session";
            "session" => sess, "dropped_ops" => dropped);
        Ok(())
    }

    fn begin_batch(&self, sess: SessionId) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        let session =
            state.sessions.get_mut(&sess).ok_or_else(|| no_session(sess))?;
        if session.batch_open {
            return Err(AsicError::BatchProtocol(format!(
                "session {sess} already has an open batch"
            )));
        }
        session.batch_open = true;
        Ok(())
    }

    fn end_batch(&self, sess: SessionId, flush: bool) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        let ModelState {
            tables, sessions, ..
        } = &mut *state;
        let session = sessions.get_mut(&sess).ok_or_else(|| no_session(sess))?;
        if !session.batch_open {
            return Err(AsicError::BatchProtocol(format!(
                "session {sess} has no open batch"
            )));
        }
        session.batch_open = false;
        let ops = std::mem::take(&mut session.queued);
        debug!(self.log, "batch closed";
            "session" => sess, "ops" => ops.len(), "flush" => flush);
        match flush {
            true => push_ops(tables, ops),
            false => session.deferred.extend(ops),
        }
        Ok(())
    }

    fn complete_operations(&self, sess: SessionId) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        let ModelState {
            tables, sessions, ..
        } = &mut *state;
        let session = sessions.get_mut(&sess).ok_or_else(|| no_session(sess))?;
        let ops = std::mem::take(&mut session.deferred);
        push_ops(tables, ops);
        Ok(())
    }

    fn entry_add(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        data: &DataBuf,
    ) -> AsicResult<()> {
        self.mutate(sess, tgt, key.table(), |t| {
            let k = t.entry_key(key)?;
            let e = t.entry(data)?;
            t.add(k, e)
        })
    }

    fn entry_mod(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        data: &DataBuf,
    ) -> AsicResult<()> {
        self.mutate(sess, tgt, key.table(), |t| {
            let k = t.entry_key(key)?;
            let e = t.entry(data)?;
            t.modify(k, e)
        })
    }

    fn entry_del(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
    ) -> AsicResult<()> {
        self.mutate(sess, tgt, key.table(), |t| {
            let k = t.entry_key(key)?;
            t.delete(k)
        })
    }

    fn entry_get(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        key: &KeyBuf,
        from: ReadFrom,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        self.read(sess, tgt, key.table(), |t| {
            let k = t.entry_key(key)?;
            t.get(&k, from, data)
        })
    }

    fn entry_get_first(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        from: ReadFrom,
        key: &mut KeyBuf,
        data: &mut DataBuf,
    ) -> AsicResult<()> {
        let table = key.table();
        self.read(sess, tgt, table, |t| t.get_first(from, key, data))
    }

    fn entry_get_next_n(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        start: &KeyBuf,
        from: ReadFrom,
        entries: &mut [(KeyBuf, DataBuf)],
    ) -> AsicResult<usize> {
        self.read(sess, tgt, start.table(), |t| {
            let k = t.entry_key(start)?;
            t.get_next_n(&k, from, entries)
        })
    }

    fn table_usage(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
        from: ReadFrom,
    ) -> AsicResult<u32> {
        self.read(sess, tgt, table, |t| Ok(t.usage(from) as u32))
    }

    fn table_clear(
        &self,
        sess: SessionId,
        tgt: &DeviceTarget,
        table: TableId,
    ) -> AsicResult<()> {
        self.mutate(sess, tgt, table, |t| Ok(t.clear()))
    }
}
