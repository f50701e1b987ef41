// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::marker::PhantomData;
use std::sync::Arc;

use aal::ActionParse;
use aal::AsicError;
use aal::AsicResult;
use aal::BufferPair;
use aal::DataBuf;
use aal::Driver;
use aal::KeyBuf;
use aal::MatchParse;
use aal::ReadFrom;

use crate::schema::Registry;
use crate::schema::TableBinding;
use crate::schema::TableSchema;
use crate::schema::TableSpec;
use crate::session::Session;

/// Basic statistics about p4 table usage
#[derive(Clone, Debug, Default)]
pub struct TableUsage {
    /// Maximum number of entries in the table
    pub size: u32,
    /// Total number of entries inserted over time
    pub inserts: u64,
    /// Total number of entries deleted over time
    pub deletes: u64,
    /// Number of entries updated in place over time
    pub updates: u64,
    /// Number of inserts failed due to a collision
    pub collisions: u64,
    /// Number of updates failed due to a missing entry
    pub update_misses: u64,
    /// Number of deletes failed due to a missing entry
    pub delete_misses: u64,
    /// Number of inserts that failed due to space exhaustion
    pub exhaustion: u64,
    /// Number of times the table was emptied in a single operation
    pub clears: u64,
}

impl TableUsage {
    /// Initialize a TableUsage structure with the provided size
    pub fn new(size: u32) -> TableUsage {
        TableUsage {
            size,
            ..Default::default()
        }
    }
}

/// A typed client for a single table.  `K` describes the table's key and `A`
/// the set of actions an entry may carry.
///
/// Each handle owns one reusable pair of encoded buffers.  Every operation
/// resets them before writing, so nothing from a previous entry can leak into
/// the next one.  A handle must only be used by one worker at a time, which
/// the `&mut self` receivers enforce; concurrent workers each build their own
/// handle against the shared registry.
pub struct TableHandle<K, A> {
    binding: Arc<TableBinding>,
    bufs: BufferPair,
    /// Basic capacity and usage statistics
    pub stats: TableUsage,
    _types: PhantomData<fn() -> (K, A)>,
}

impl<K: MatchParse, A: ActionParse> TableHandle<K, A> {
    /// Resolve the table described by `spec` and verify that `K` and `A` have
    /// the shape the program expects.
    pub fn new<D: Driver>(
        registry: &Registry<D>,
        spec: &TableSpec,
    ) -> AsicResult<Self> {
        let schema = registry.resolve(spec.name)?;
        let binding = schema.bind(spec)?;

        if K::FIELD_COUNT != binding.keys.len() {
            return Err(AsicError::SchemaMismatch(format!(
                "{} has {} key fields, key type has {}",
                spec.name,
                binding.keys.len(),
                K::FIELD_COUNT
            )));
        }
        let arity: Vec<usize> =
            binding.actions.iter().map(|a| a.fields.len()).collect();
        if arity.as_slice() != A::ARITY {
            return Err(AsicError::SchemaMismatch(format!(
                "{} actions take {:?} arguments, action type has {:?}",
                spec.name,
                arity,
                A::ARITY
            )));
        }

        let bufs = BufferPair::new(schema.id(), &binding.keys);
        Ok(TableHandle {
            binding: Arc::new(binding),
            bufs,
            stats: TableUsage::new(schema.size() as u32),
            _types: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        self.binding.schema.name()
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.binding.schema
    }

    /// Returns the number of entries the table can hold
    pub fn size(&self) -> u32 {
        self.stats.size
    }

    fn encode_key(&mut self, key: &K) -> AsicResult<()> {
        let mut enc = self.bufs.key.reset();
        key.key_encode(&mut enc)?;
        enc.finish()
    }

    fn encode_data(&mut self, data: &A) -> AsicResult<()> {
        let action =
            self.binding.actions.get(data.action_index()).ok_or_else(|| {
                AsicError::Internal(format!(
                    "action {} has no binding in {}",
                    data.action_name(),
                    self.binding.schema.name()
                ))
            })?;
        let mut enc = self.bufs.data.reset(action);
        data.action_encode(&mut enc)?;
        enc.finish()
    }

    /// Add an entry to the table.  Attempting to add an entry that already
    /// exists will fail.
    pub fn add<D: Driver>(
        &mut self,
        sess: &Session<D>,
        key: &K,
        data: &A,
    ) -> AsicResult<()> {
        self.encode_key(key)?;
        self.encode_data(data)?;
        sess.device()
            .entry_add(
                sess.id(),
                sess.target(),
                &self.bufs.key,
                &self.bufs.data,
            )
            .map_err(|e| {
                match e {
                    AsicError::Exists => self.stats.collisions += 1,
                    AsicError::TableFull(_) => self.stats.exhaustion += 1,
                    _ => {}
                }
                e
            })
            .map(|()| self.stats.inserts += 1)
    }

    /// Update a single entry in the table.  Attempting to update an entry
    /// that doesn't exist will fail, rather than inserting a new entry.
    pub fn modify<D: Driver>(
        &mut self,
        sess: &Session<D>,
        key: &K,
        data: &A,
    ) -> AsicResult<()> {
        self.encode_key(key)?;
        self.encode_data(data)?;
        sess.device()
            .entry_mod(
                sess.id(),
                sess.target(),
                &self.bufs.key,
                &self.bufs.data,
            )
            .map_err(|e| {
                if let AsicError::Missing(_) = e {
                    self.stats.update_misses += 1;
                }
                e
            })
            .map(|()| self.stats.updates += 1)
    }

    /// Remove a single entry from the table.
    pub fn delete<D: Driver>(
        &mut self,
        sess: &Session<D>,
        key: &K,
    ) -> AsicResult<()> {
        self.encode_key(key)?;
        sess.device()
            .entry_del(sess.id(), sess.target(), &self.bufs.key)
            .map_err(|e| {
                if let AsicError::Missing(_) = e {
                    self.stats.delete_misses += 1;
                }
                e
            })
            .map(|()| self.stats.deletes += 1)
    }

    /// Look up the action installed for `key`.  Reading from hardware only
    /// sees operations that have been pushed to the device; reading from
    /// software also sees those still queued in a batch.
    pub fn get<D: Driver>(
        &mut self,
        sess: &Session<D>,
        key: &K,
        from: ReadFrom,
    ) -> AsicResult<A> {
        self.encode_key(key)?;
        self.bufs.data.clear();
        sess.device().entry_get(
            sess.id(),
            sess.target(),
            &self.bufs.key,
            from,
            &mut self.bufs.data,
        )?;
        self.binding.decode_data(&self.bufs.data)
    }

    /// Fetch the table contents in two steps: the first entry, then every
    /// entry after it in one bulk read sized by the table's reported usage.
    /// If the device hands back a different number of entries than it claims
    /// to hold, the table state can't be trusted and the iteration fails.
    pub fn iter<D: Driver>(
        &mut self,
        sess: &Session<D>,
        from: ReadFrom,
    ) -> AsicResult<TableIter<K, A>> {
        let device = sess.device();
        let table = self.binding.schema.id();

        self.bufs.key.clear();
        self.bufs.data.clear();
        let found = match device.entry_get_first(
            sess.id(),
            sess.target(),
            from,
            &mut self.bufs.key,
            &mut self.bufs.data,
        ) {
            Ok(()) => true,
            Err(AsicError::Missing(_)) => false,
            Err(e) => return Err(e),
        };
        let count =
            device.table_usage(sess.id(), sess.target(), table, from)? as usize;

        let mut entries = Vec::with_capacity(count);
        match (found, count) {
            (false, 0) => {}
            (false, n) | (true, n @ 0) => {
                return Err(AsicError::Inconsistent(format!(
                    "{} reports {n} entries, first entry {}",
                    self.name(),
                    if found { "present" } else { "missing" },
                )))
            }
            (true, n) => {
                entries.push((self.bufs.key.clone(), self.bufs.data.clone()));
                let mut rest: Vec<(KeyBuf, DataBuf)> = (1..n)
                    .map(|_| {
                        (
                            KeyBuf::new(table, &self.binding.keys),
                            DataBuf::new(table),
                        )
                    })
                    .collect();
                if !rest.is_empty() {
                    let got = device.entry_get_next_n(
                        sess.id(),
                        sess.target(),
                        &self.bufs.key,
                        from,
                        &mut rest,
                    )?;
                    if got != n - 1 {
                        return Err(AsicError::Inconsistent(format!(
                            "{} reports {n} entries, iteration found {}",
                            self.name(),
                            got + 1
                        )));
                    }
                }
                entries.extend(rest);
            }
        }

        Ok(TableIter {
            binding: self.binding.clone(),
            entries: entries.into_iter(),
            _types: PhantomData,
        })
    }

    /// Fetch and decode every entry in the table
    pub fn entries<D: Driver>(
        &mut self,
        sess: &Session<D>,
        from: ReadFrom,
    ) -> AsicResult<Vec<(K, A)>> {
        self.iter(sess, from)?.collect()
    }

    /// Number of entries the device reports for this table
    pub fn usage<D: Driver>(
        &self,
        sess: &Session<D>,
        from: ReadFrom,
    ) -> AsicResult<u32> {
        sess.device().table_usage(
            sess.id(),
            sess.target(),
            self.binding.schema.id(),
            from,
        )
    }

    /// Clear all entries from the table in a single operation
    pub fn clear<D: Driver>(&mut self, sess: &Session<D>) -> AsicResult<()> {
        sess.device()
            .table_clear(sess.id(), sess.target(), self.binding.schema.id())
            .map(|()| self.stats.clears += 1)
    }
}

/// The entries fetched by `TableHandle::iter()`, decoded lazily into typed
/// keys and actions.
pub struct TableIter<K, A> {
    binding: Arc<TableBinding>,
    entries: std::vec::IntoIter<(KeyBuf, DataBuf)>,
    _types: PhantomData<fn() -> (K, A)>,
}

impl<K: MatchParse, A: ActionParse> Iterator for TableIter<K, A> {
    type Item = AsicResult<(K, A)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, data) = self.entries.next()?;
        let decode = || -> AsicResult<(K, A)> {
            Ok((
                self.binding.decode_key(&key)?,
                self.binding.decode_data(&data)?,
            ))
        };
        Some(decode())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K: MatchParse, A: ActionParse> ExactSizeIterator for TableIter<K, A> {}
