// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::{o, Drain};

use aal::DeviceTarget;
use asic::bfrt::BfRt;
use asic::ModelHandle;
use churn::Context;

pub mod prelude {
    pub use super::test_context;
    pub use super::test_log;
    pub use super::test_model;
    pub use super::UR_PROGRAM;
}

/// The program the benchmark runs against
pub const UR_PROGRAM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../p4/ur/bfrt.json"));

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
