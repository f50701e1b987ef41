// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::io::Write;

use slog::{crit, info};
use structopt::StructOpt;

use aal::DeviceTarget;
use aal::Driver;
use asic::ChaosHandle;
use asic::ModelHandle;
use churn::config::build_config;
use churn::config::Backend;
use churn::config::Config;
use churn::config::Opt;
use churn::ChurnResult;
use churn::Context;
use churn::Harness;

fn run<D: Driver>(
    log: &slog::Logger,
    device: D,
    config: &Config,
) -> ChurnResult<()> {
    let target = DeviceTarget {
        dev_id: config.asic_config.device_id,
        pipe_id: config.pipe_id,
    };
    let mut ctx = Context::new(log, device, target)?;

    let stdout = std::io::stdout();
    let mut harness = Harness::new(log, &ctx.registry, stdout.lock())?;
    harness.verify_usage = config.plan.verify_usage;
    let rval = harness.run_plan(&mut ctx.session, &config.plan);
    harness.summarize();
    let rows = rval?;
    harness.into_inner().flush()?;
    info!(log, "run complete"; "measurements" => rows.len());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let config = build_config(&opt)?;

    let log =
        common::logging::init("churn", &config.log_file, config.log_format)?;
    info!(log, "churn config: {config:#?}");
    info!(log, "run starting";
        "at" => chrono::Utc::now().to_rfc3339(),
        "backend" => %config.backend);

    let model = ModelHandle::new(&log, &config.asic_config)?;
    let rval = match config.backend {
        Backend::Model => run(&log, model, &config),
        Backend::Chaos => {
            let chaos = ChaosHandle::new(&log, model, config.chaos.clone())?;
            run(&log, chaos, &config)
        }
    };

    if let Err(e) = &rval {
        crit!(log, "run aborted: {e}"; "fatal" => e.is_fatal());
    }
    Ok(rval?)
}
