// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::{o, Drain};

use aal::DeviceTarget;
use asic::bfrt::BfRt;
use asic::ModelHandle;

use crate::context::Context;

/// A single four-entry table whose key and argument order differ from the
/// order client types declare them in.
pub const SMALL_PROGRAM: &str = r#"{
  "tables": [
    {
      "name": "pipe.t",
      "id": 7,
      "table_type": "MatchAction_Direct",
      "size": 4,
      "key": [
        { "id": 1, "name": "k1", "mandatory": false, "match_type": "Exact",
          "type": { "type": "bytes", "width": 4 } },
        { "id": 2, "name": "k2", "mandatory": false, "match_type": "Exact",
          "type": { "type": "uint16" } }
      ],
      "action_specs": [
        { "id": 70, "name": "pipe.go", "action_scope": "TableAndDefault",
          "data": [
            { "id": 1, "name": "x", "type": { "type": "uint32" } },
            { "id": 2, "name": "y", "type": { "type": "bytes", "width": 16 } }
          ] },
        { "id": 71, "name": "pipe.stop", "action_scope": "TableAndDefault",
          "data": [] }
      ]
    }
  ]
}"#;

pub fn ur_program() -> String {
    include_str!("../../p4/ur/bfrt.json").to_string()
}

pub fn test_log() -> slog::Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, o!())
}

pub fn test_model(program: &str) -> ModelHandle {
    let rt = BfRt::from_json(program).unwrap();
    ModelHandle::from_program(&test_log(), &rt, 0).unwrap()
}

pub fn test_context(program: &str) -> Context<ModelHandle> {
    Context::new(&test_log(), test_model(program), DeviceTarget::default())
        .unwrap()
}
