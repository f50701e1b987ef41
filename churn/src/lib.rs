// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A typed client for schema-driven match-action tables, and a benchmark that
//! measures how quickly entries can be churned through them.

pub mod bunny;
pub mod config;
pub mod context;
pub mod harness;
pub mod schema;
pub mod session;
pub mod table;
pub mod types;

pub use context::Context;
pub use harness::Harness;
pub use harness::Measurement;
pub use schema::Registry;
pub use schema::TableSpec;
pub use session::Session;
pub use table::TableHandle;
pub use types::ChurnError;
pub use types::ChurnResult;

#[cfg(test)]
mod test_util;
