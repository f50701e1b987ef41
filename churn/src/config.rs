// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `churn`.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! command-line options.

use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use structopt::StructOpt;

use aal::ALL_PIPES;
use asic::AsicConfig;
use asic::ChaosConfig;
use common::logging::LogFormat;

use crate::harness::MAX_BULK_TRIALS;
use crate::types::ChurnError;
use crate::types::ChurnResult;

/// Which driver the benchmark runs against
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    /// The in-process software model
    #[default]
    Model,
    /// The software model, with failures injected per the chaos config
    Chaos,
}

/// One step of the bulk timing schedule: `repeat` runs of `bulk(records,
/// trials)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BulkStep {
    pub records: u32,
    pub trials: u32,
    #[serde(default = "one")]
    pub repeat: u32,
}

fn one() -> u32 {
    1
}

impl FromStr for BulkStep {
    type Err = String;

    /// Parse "records:trials" or "records:trials:repeat"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(':')
            .map(|f| f.parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|e| format!("invalid bulk step {s}: {e}"))?;
        match fields.as_slice() {
            [records, trials] => Ok(BulkStep {
                records: *records,
                trials: *trials,
                repeat: 1,
            }),
            [records, trials, repeat] => Ok(BulkStep {
                records: *records,
                trials: *trials,
                repeat: *repeat,
            }),
            _ => Err(format!(
                "invalid bulk step {s}: expected records:trials[:repeat]"
            )),
        }
    }
}

/// The phases of a benchmark run
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchPlan {
    /// Size of the working set installed before churning
    pub warm_fill: u32,
    /// Number of churn batches
    pub churn_rounds: u32,
    /// Entry pairs retired and replaced in each churn batch
    pub churn_pairs: u32,
    pub bulk: Vec<BulkStep>,
    /// Check the hardware entry counts after every phase
    pub verify_usage: bool,
}

impl Default for BenchPlan {
    fn default() -> Self {
        let step = |records, trials, repeat| BulkStep {
            records,
            trials,
            repeat,
        };
        BenchPlan {
            warm_fill: 100_000,
            churn_rounds: 20,
            churn_pairs: 10_000,
            bulk: vec![
                step(100, 20, 50),
                step(1000, 20, 50),
                step(10_000, 10, 100),
                step(100_000, 2, 500),
            ],
            verify_usage: false,
        }
    }
}

/// The Config structure captures all of the run-time settings, from a config
/// file or from command-line options.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stderr.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    pub backend: Backend,

    /// Where to find the pipeline program, and which device runs it
    pub asic_config: AsicConfig,

    /// Pipe targeted by every operation
    pub pipe_id: u16,

    /// Failure probabilities, used with the chaos backend
    pub chaos: ChaosConfig,

    pub plan: BenchPlan,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Json,
            backend: Backend::default(),
            asic_config: AsicConfig::default(),
            pipe_id: ALL_PIPES,
            chaos: ChaosConfig::default(),
            plan: BenchPlan::default(),
        }
    }
}

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "churn", about = "match-action table churn benchmark")]
pub struct Opt {
    #[structopt(long, about = "path to a TOML configuration file")]
    pub config: Option<String>,

    #[structopt(
        long,
        about = "send log data to the named file rather than stderr"
    )]
    pub log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    pub log_format: Option<LogFormat>,

    #[structopt(long, help = "driver to run against: 'model' or 'chaos'")]
    pub backend: Option<Backend>,

    #[structopt(long, about = "directory containing bfrt.json")]
    pub p4_dir: Option<String>,

    #[structopt(long, about = "name of the pipeline program")]
    pub program: Option<String>,

    #[structopt(long)]
    pub device_id: Option<u32>,

    #[structopt(long)]
    pub pipe_id: Option<u16>,

    #[structopt(long, about = "path to the chaos testing configuration")]
    pub chaos_config: Option<String>,

    #[structopt(long, help = "entries installed before churning")]
    pub warm_fill: Option<u32>,

    #[structopt(long, help = "number of churn batches")]
    pub churn_rounds: Option<u32>,

    #[structopt(long, help = "delete/add pairs in each churn batch")]
    pub churn_pairs: Option<u32>,

    #[structopt(
        long,
        help = "bulk timing step as records:trials[:repeat]; may be repeated"
    )]
    pub bulk: Vec<BulkStep>,

    #[structopt(long, help = "skip the bulk timing phases")]
    pub no_bulk: bool,

    #[structopt(long, help = "check table usage after every phase")]
    pub verify_usage: bool,
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &str) -> ChurnResult<T> {
    let txt = std::fs::read_to_string(path)?;
    toml::from_str(&txt).map_err(|e| ChurnError::Config(format!("{path}: {e}")))
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &Opt, config: &mut Config) -> ChurnResult<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(backend) = opts.backend {
        config.backend = backend;
    }

    if let Some(p4_dir) = &opts.p4_dir {
        config.asic_config.p4_dir = Some(p4_dir.to_string());
    }

    if let Some(program) = &opts.program {
        config.asic_config.program = program.to_string();
    }

    if let Some(device_id) = opts.device_id {
        config.asic_config.device_id = device_id;
    }

    if let Some(pipe_id) = opts.pipe_id {
        config.pipe_id = pipe_id;
    }

    if let Some(path) = &opts.chaos_config {
        config.chaos = read_toml(path)?;
    }

    if let Some(warm_fill) = opts.warm_fill {
        config.plan.warm_fill = warm_fill;
    }

    if let Some(rounds) = opts.churn_rounds {
        config.plan.churn_rounds = rounds;
    }

    if let Some(pairs) = opts.churn_pairs {
        config.plan.churn_pairs = pairs;
    }

    if opts.no_bulk {
        config.plan.bulk = Vec::new();
    } else if !opts.bulk.is_empty() {
        config.plan.bulk = opts.bulk.clone();
    }

    if opts.verify_usage {
        config.plan.verify_usage = true;
    }

    Ok(())
}

/// This builds a Config struct containing the tunable settings used to
/// adjust the benchmark's behavior.  Settings in the config file override the
/// defaults, and command-line options override both.
pub fn build_config(opts: &Opt) -> ChurnResult<Config> {
    let mut config = match &opts.config {
        Some(path) => read_toml(path)?,
        None => Config::default(),
    };
    update_from_cli(opts, &mut config)?;

    if config.plan.churn_rounds > 0
        && config.plan.churn_pairs > 0
        && config.plan.warm_fill == 0
    {
        return Err(ChurnError::Config(
            "steady churn needs a warm working set".into(),
        ));
    }
    if let Some(step) = config
        .plan
        .bulk
        .iter()
        .find(|s| s.trials > MAX_BULK_TRIALS)
    {
        return Err(ChurnError::Config(format!(
            "bulk step has {} trials, at most {MAX_BULK_TRIALS} robot ids are \
             available",
            step.trials
        )));
    }
    config.chaos.validate()?;

    Ok(config)
}
