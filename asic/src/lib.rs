// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Driver backends for the table client.  `model` is a software model of the
//! device runtime, built from the program's bfrt.json; `chaos` wraps any
//! other backend and injects synthetic failures.

pub mod bfrt;
pub mod chaos;
pub mod model;

pub use chaos::ChaosConfig;
pub use chaos::ChaosHandle;
pub use model::AsicConfig;
pub use model::ModelHandle;
