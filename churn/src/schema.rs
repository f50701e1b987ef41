// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Resolution of table, field, and action names into the numeric identities
//! used by the driver.
//!
//! Table clients name everything by string, in a `TableSpec`.  Those names are
//! looked up in the loaded program exactly once, when a table handle is
//! built; every later operation uses the resolved ids.  Any name that fails to
//! resolve is a schema mismatch, which means the client and the program it is
//! talking to disagree, and nothing useful can happen until that is fixed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use slog::{debug, o};

use aal::ActionId;
use aal::ActionInfo;
use aal::ActionParse;
use aal::AsicError;
use aal::AsicResult;
use aal::DataBuf;
use aal::DataField;
use aal::Driver;
use aal::FieldValue;
use aal::KeyBuf;
use aal::KeyField;
use aal::MatchParse;
use aal::MatchType;
use aal::TableId;
use aal::TableInfo;

/// An action a client expects a table to offer, with the names of its
/// arguments in the order the client will supply them.
#[derive(Clone, Copy, Debug)]
pub struct ActionSpec {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

/// The by-name contract between a table client and the pipeline program:
/// the table's name, its key fields in client order, and its actions in
/// client order.
#[derive(Clone, Copy, Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub keys: &'static [&'static str],
    pub actions: &'static [ActionSpec],
}

fn mismatch(msg: String) -> AsicError {
    AsicError::SchemaMismatch(msg)
}

/// The resolved, immutable description of a single table
#[derive(Debug)]
pub struct TableSchema {
    info: TableInfo,
}

impl TableSchema {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn id(&self) -> TableId {
        self.info.id
    }

    /// Maximum number of entries in the table
    pub fn size(&self) -> usize {
        self.info.size
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn resolve_key_field(&self, name: &str) -> AsicResult<&KeyField> {
        self.info.keys.iter().find(|k| k.name == name).ok_or_else(|| {
            mismatch(format!("no key field {name} in {}", self.info.name))
        })
    }

    pub fn resolve_action(&self, name: &str) -> AsicResult<&ActionInfo> {
        self.info.actions.iter().find(|a| a.name == name).ok_or_else(|| {
            mismatch(format!("no action {name} in {}", self.info.name))
        })
    }

    pub fn resolve_data_field(
        &self,
        action: ActionId,
        name: &str,
    ) -> AsicResult<&DataField> {
        let a = self
            .info
            .actions
            .iter()
            .find(|a| a.id == action)
            .ok_or_else(|| {
                mismatch(format!("no action {action} in {}", self.info.name))
            })?;
        a.fields.iter().find(|f| f.name == name).ok_or_else(|| {
            mismatch(format!("no argument {name} to action {}", a.name))
        })
    }

    /// Resolve every name in `spec` against this schema.  The spec must name
    /// every key field of the table, each exactly once, and every argument of
    /// each action it lists.
    pub fn bind(
        self: &Arc<Self>,
        spec: &TableSpec,
    ) -> AsicResult<TableBinding> {
        if spec.keys.len() != self.info.keys.len() {
            return Err(mismatch(format!(
                "{} has {} key fields, spec names {}",
                self.info.name,
                self.info.keys.len(),
                spec.keys.len()
            )));
        }

        let mut keys: Vec<KeyField> = Vec::with_capacity(spec.keys.len());
        for name in spec.keys {
            let k = self.resolve_key_field(name)?;
            if k.match_type != MatchType::Exact {
                return Err(mismatch(format!(
                    "{}:{name} is a {:?} match; only exact keys are supported",
                    self.info.name, k.match_type
                )));
            }
            if keys.iter().any(|b| b.id == k.id) {
                return Err(mismatch(format!(
                    "key field {name} named twice for {}",
                    self.info.name
                )));
            }
            keys.push(k.clone());
        }

        let mut actions = Vec::with_capacity(spec.actions.len());
        for a in spec.actions {
            let resolved = self.resolve_action(a.name)?;
            if a.fields.len() != resolved.fields.len() {
                return Err(mismatch(format!(
                    "{} takes {} arguments, spec names {}",
                    a.name,
                    resolved.fields.len(),
                    a.fields.len()
                )));
            }
            let mut fields: Vec<DataField> = Vec::with_capacity(a.fields.len());
            for f in a.fields {
                let field = self.resolve_data_field(resolved.id, f)?;
                if fields.iter().any(|b| b.id == field.id) {
                    return Err(mismatch(format!(
                        "argument {f} named twice for {}",
                        a.name
                    )));
                }
                fields.push(field.clone());
            }
            actions.push(ActionInfo {
                name: resolved.name.clone(),
                id: resolved.id,
                fields,
            });
        }

        Ok(TableBinding {
            schema: self.clone(),
            keys,
            actions,
        })
    }
}

/// A table's key fields and actions, resolved and laid out in the order a
/// client's key struct and action enum declare them.
#[derive(Debug)]
pub struct TableBinding {
    pub schema: Arc<TableSchema>,
    pub keys: Vec<KeyField>,
    pub actions: Vec<ActionInfo>,
}

impl TableBinding {
    /// Position of the action with this id within the binding
    pub fn action_index(&self, id: ActionId) -> AsicResult<usize> {
        self.actions.iter().position(|a| a.id == id).ok_or_else(|| {
            mismatch(format!(
                "{} returned action {id}, which has no binding",
                self.schema.name()
            ))
        })
    }

    pub fn decode_key<K: MatchParse>(&self, key: &KeyBuf) -> AsicResult<K> {
        let fields = self
            .keys
            .iter()
            .map(|f| {
                key.value(f.id).cloned().ok_or_else(|| {
                    AsicError::Decode(format!("key field {} missing", f.name))
                })
            })
            .collect::<AsicResult<Vec<FieldValue>>>()?;
        K::key_decode(&fields)
    }

    pub fn decode_data<A: ActionParse>(&self, data: &DataBuf) -> AsicResult<A> {
        let id = data.action().ok_or_else(|| {
            AsicError::Decode(format!(
                "entry in {} has no action",
                self.schema.name()
            ))
        })?;
        let index = self.action_index(id)?;
        let fields = self.actions[index]
            .fields
            .iter()
            .map(|f| {
                data.value(f.id).cloned().ok_or_else(|| {
                    AsicError::Decode(format!("argument {} missing", f.name))
                })
            })
            .collect::<AsicResult<Vec<FieldValue>>>()?;
        A::action_decode(index, &fields)
    }
}

/// Resolves and caches table schemas for the lifetime of the process.  Each
/// distinct table name is looked up on the device once; later requests share
/// the cached schema.
pub struct Registry<D: Driver> {
    log: slog::Logger,
    device: Arc<D>,
    schemas: Mutex<BTreeMap<String, Arc<TableSchema>>>,
}

impl<D: Driver> Registry<D> {
    pub fn new(log: &slog::Logger, device: Arc<D>) -> Self {
        Registry {
            log: log.new(o!("unit" => "registry")),
            device,
            schemas: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn resolve(&self, name: &str) -> AsicResult<Arc<TableSchema>> {
        let mut schemas = self.schemas.lock().unwrap();
        if let Some(schema) = schemas.get(name) {
            return Ok(schema.clone());
        }

        let info = self.device.table_info(name)?;
        debug!(self.log, "resolved table {name}";
            "id" => info.id,
            "size" => info.size,
            "keys" => info.keys.len(),
            "actions" => info.actions.len());
        let schema = Arc::new(TableSchema { info });
        schemas.insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    /// Names of every table resolved so far
    pub fn resolved(&self) -> Vec<String> {
        self.schemas.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    const GOOD: TableSpec = TableSpec {
        name: "pipe.t",
        keys: &["k2", "k1"],
        actions: &[ActionSpec {
            name: "pipe.go",
            fields: &["y", "x"],
        }],
    };

    #[test]
    fn test_resolve_is_cached() -> anyhow::Result<()> {
        let device = Arc::new(test_model(SMALL_PROGRAM));
        let registry = Registry::new(&test_log(), device);
        let a = registry.resolve("pipe.t")?;
        let b = registry.resolve("pipe.t")?;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.resolved(), vec!["pipe.t".to_string()]);
        assert!(matches!(
            registry.resolve("pipe.nope"),
            Err(AsicError::SchemaMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_lookups() -> anyhow::Result<()> {
        let device = Arc::new(test_model(SMALL_PROGRAM));
        let registry = Registry::new(&test_log(), device);
        let schema = registry.resolve("pipe.t")?;
        assert_eq!(schema.resolve_key_field("k2")?.id, 2);
        let go = schema.resolve_action("pipe.go")?.id;
        assert_eq!(schema.resolve_data_field(go, "y")?.width, 16);
        assert!(schema.resolve_data_field(go, "z").is_err());
        let stop = schema.resolve_action("pipe.stop")?;
        assert_eq!(stop.id, 71);
        assert!(stop.fields.is_empty());
        assert!(matches!(
            schema.resolve_action("pipe.halt"),
            Err(AsicError::SchemaMismatch(_))
        ));
        assert!(schema.resolve_data_field(stop.id, "x").is_err());
        assert!(schema.resolve_key_field("k3").is_err());
        Ok(())
    }

    #[test]
    fn test_bind_follows_spec_order() -> anyhow::Result<()> {
        let device = Arc::new(test_model(SMALL_PROGRAM));
        let registry = Registry::new(&test_log(), device);
        let binding = registry.resolve("pipe.t")?.bind(&GOOD)?;
        let keys: Vec<&str> =
            binding.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(keys, ["k2", "k1"]);
        let args: Vec<&str> = binding.actions[0]
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(args, ["y", "x"]);
        Ok(())
    }

    #[test]
    fn test_bind_rejects_partial_specs() -> anyhow::Result<()> {
        let device = Arc::new(test_model(SMALL_PROGRAM));
        let registry = Registry::new(&test_log(), device);
        let schema = registry.resolve("pipe.t")?;

        let short_key = TableSpec {
            keys: &["k1"],
            ..GOOD
        };
        let dup_key = TableSpec {
            keys: &["k1", "k1"],
            ..GOOD
        };
        let short_action = TableSpec {
            actions: &[ActionSpec {
                name: "pipe.go",
                fields: &["x"],
            }],
            ..GOOD
        };
        let renamed = TableSpec {
            actions: &[ActionSpec {
                name: "pipe.go",
                fields: &["x", "why"],
            }],
            ..GOOD
        };
        for spec in [short_key, dup_key, short_action, renamed] {
            match schema.bind(&spec) {
                Err(AsicError::SchemaMismatch(_)) => {}
                x => panic!("expected a schema mismatch, found {x:?}"),
            }
        }
        Ok(())
    }
}
