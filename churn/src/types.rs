// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout the benchmark.

use std::convert;

use aal::AsicError;

pub type ChurnResult<T> = Result<T, ChurnError>;

#[derive(Debug, thiserror::Error)]
pub enum ChurnError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("ASIC error: {0}")]
    Switch(AsicError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Error: {0}")]
    Other(String),
}

impl ChurnError {
    /// Table-level failures carry their own classification.  Anything else
    /// means the run itself can't continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            ChurnError::Switch(e) => e.is_fatal(),
            _ => true,
        }
    }
}

impl convert::From<std::io::Error> for ChurnError {
    fn from(err: std::io::Error) -> Self {
        ChurnError::Io(err)
    }
}

impl convert::From<AsicError> for ChurnError {
    fn from(err: AsicError) -> Self {
        ChurnError::Switch(err)
    }
}

impl convert::From<toml::de::Error> for ChurnError {
    fn from(err: toml::de::Error) -> Self {
        ChurnError::Config(err.to_string())
    }
}
