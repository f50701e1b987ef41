// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Loading and interpreting the `bfrt.json` description of a compiled
//! pipeline program.

use std::ffi::OsStr;
use std::path::PathBuf;

use serde::Deserialize;

use aal::ActionInfo;
use aal::AsicError;
use aal::AsicResult;
use aal::DataField;
use aal::KeyField;
use aal::MatchType;
use aal::TableInfo;

#[derive(Debug, Deserialize)]
pub struct BfRt {
    tables: Vec<BfRtTable>,
}

#[derive(Debug, Deserialize)]
struct BfRtTable {
    name: String,
    id: u32,
    #[serde(rename = "table_type")]
    _table_type: String,
    size: u32,
    #[serde(rename = "key")]
    keys: Option<Vec<Key>>,
    #[serde(rename = "action_specs")]
    actions: Option<Vec<ActionSpec>>,
}

#[derive(Debug, Deserialize)]
struct KeyType {
    #[serde(rename = "type")]
    ktype: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Key {
    name: String,
    id: u32,
    match_type: String,
    #[serde(rename = "mandatory")]
    _mandatory: bool,
    #[serde(rename = "type")]
    ktype: KeyType,
}

#[derive(Debug, Deserialize)]
struct ActionSpec {
    name: String,
    id: u32,
    #[serde(rename = "action_scope")]
    _action_scope: String,
    data: Option<Vec<Data>>,
}

#[derive(Debug, Deserialize)]
struct DataType {
    #[serde(rename = "type")]
    dtype: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Data {
    name: String,
    id: u32,
    #[serde(rename = "type")]
    dtype: DataType,
}

fn mismatch(msg: String) -> AsicError {
    AsicError::SchemaMismatch(msg)
}

// Fields are either "bytes" with an explicit width, or one of the fixed-size
// integer types.
fn field_width(
    table: &str,
    field: &str,
    ftype: &str,
    width: Option<u32>,
) -> AsicResult<u32> {
    match (ftype, width) {
        (_, Some(0)) => {
            Err(mismatch(format!("0-length field in {table}:{field}")))
        }
        ("bytes", Some(w)) => Ok(w),
        ("bytes", None) => {
            Err(mismatch(format!("missing width for {table}:{field}")))
        }
        ("uint64", _) => Ok(64),
        ("uint32", _) => Ok(32),
        ("uint16", _) => Ok(16),
        ("uint8", _) => Ok(8),
        ("bool", _) => Ok(1),
        (x, _) => Err(mismatch(format!(
            "unsupported field type {x} in {table}:{field}"
        ))),
    }
}

// Given a path, we expect to find a specific name at the end.  If the path fits,
// return it with that name dropped.  Otherwise, return an error.
fn expect_name(mut inpath: PathBuf, expected: &str) -> AsicResult<PathBuf> {
    let os_expected = Some(OsStr::new(expected));
    if inpath.file_name() != os_expected {
        Err(AsicError::P4Missing(format!(
            "{} expected to end with {}",
            inpath.display(),
            expected
        )))
    } else {
        let _ = inpath.pop();
        Ok(inpath)
    }
}

// If the user hasn't set a P4_DIR environment variable, try to find it based on
// the location of the churn binary.  There are two possible choices:
//
// When running in a workspace, the binary should be at
//     $WS/target/(debug|release)/churn
// the p4 directory should be:
//     $WS/p4/<program>
//
// When running from a packaged dist, the binary should be at:
//     $ROOT/opt/churn/bin/churn
// the p4 directory should be:
//     $ROOT/opt/churn/p4/<program>
fn infer_p4_dir(program: &str) -> AsicResult<String> {
    let mut exe_path = std::env::current_exe().map_err(|e| {
        AsicError::P4Missing(format!("looking up churn path: {e:?}"))
    })?;

    // Pop off the trailing "churn":
    exe_path = expect_name(exe_path, "churn")?;

    let parent = exe_path
        .file_name()
        .ok_or(AsicError::P4Missing("churn can't be run from /".into()))?
        .to_str()
        .ok_or(AsicError::P4Missing("non-unicode path to churn".into()))?
        .to_string();
    let _ = exe_path.pop();

    match parent.as_str() {
        "debug" | "release" => {
            // Find $WS
            exe_path = expect_name(exe_path, "target")?;
        }
        "bin" => {
            // Find $ROOT/opt/churn.  The pop and push are a no-op, but we
            // want to verify the "churn" parent.
            exe_path = expect_name(exe_path, "churn")?;
            exe_path.push(OsStr::new("churn"));
        }
        _ => {
            return Err(AsicError::P4Missing(
                "churn not in a workspace or dist package".into(),
            ))
        }
    };
    exe_path.push(OsStr::new("p4"));
    exe_path.push(OsStr::new(program));
    Ok(exe_path
        .to_str()
        .ok_or(AsicError::P4Missing("non-unicode path to churn".into()))?
        .to_string())
}

pub fn get_p4_dir(program: &str) -> AsicResult<String> {
    match std::env::var("P4_DIR") {
        Ok(d) => Ok(d),
        _ => infer_p4_dir(program),
    }
}

impl BfRt {
    pub fn from_json(json: &str) -> AsicResult<Self> {
        serde_json::from_str::<BfRt>(json).map_err(|e| {
            AsicError::P4Missing(format!("failed to parse json: {e:?}"))
        })
    }

    pub fn from_file(name: String) -> AsicResult<Self> {
        match std::fs::read_to_string(&name) {
            Ok(json) => BfRt::from_json(&json),
            Err(e) => Err(AsicError::Io {
                ctx: format!("reading bf_rt file {name}"),
                err: e,
            }),
        }
    }

    pub fn init(p4_dir: &str) -> AsicResult<Self> {
        let conf = format!("{p4_dir}/bfrt.json");
        if !std::path::Path::new(&conf).is_file() {
            return Err(AsicError::P4Missing(format!("no bf-rt file: {conf}")));
        }

        BfRt::from_file(conf)
    }

    /// Names of every table in the program, in declaration order
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Convert the imported-from-json description of a table into the
    /// metadata used at run-time.  Keys, actions, and action arguments keep
    /// their declaration order.
    pub fn get_table(&self, name: &str) -> AsicResult<TableInfo> {
        let t = self
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| mismatch(format!("no such table: {name}")))?;

        let mut keys = Vec::new();
        for k in t.keys.iter().flatten() {
            let match_type = match k.match_type.as_str() {
                "Exact" => MatchType::Exact,
                "LPM" => MatchType::Lpm,
                "Ternary" => MatchType::Mask,
                "Range" => MatchType::Range,
                x => {
                    return Err(mismatch(format!(
                        "unrecognized match type {x} in {name}:{}",
                        k.name
                    )))
                }
            };
            keys.push(KeyField {
                name: k.name.clone(),
                id: k.id,
                width: field_width(
                    name,
                    &k.name,
                    &k.ktype.ktype,
                    k.ktype.width,
                )?,
                match_type,
            });
        }

        let mut actions = Vec::new();
        for a in t.actions.iter().flatten() {
            let mut fields = Vec::new();
            for d in a.data.iter().flatten() {
                fields.push(DataField {
                    name: d.name.clone(),
                    id: d.id,
                    width: field_width(
                        name,
                        &d.name,
                        &d.dtype.dtype,
                        d.dtype.width,
                    )?,
                });
            }
            actions.push(ActionInfo {
                name: a.name.clone(),
                id: a.id,
                fields,
            });
        }

        Ok(TableInfo {
            name: t.name.clone(),
            id: t.id,
            size: t.size as usize,
            keys,
            actions,
        })
    }
}
