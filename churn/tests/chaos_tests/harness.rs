// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::AsicError;
use aal::DeviceTarget;
use aal::ReadFrom;
use asic::chaos::Chaos;
use asic::table_chaos;
use asic::ChaosConfig;
use asic::ChaosHandle;
use churn::bunny;
use churn::ChurnError;
use churn::Context;
use churn::Harness;

use crate::integration_tests::common::prelude::*;

// Chaos errors carry the name of the operation that failed
macro_rules! expect_chaos {
    ($err:expr, $kind:ident) => {
        match $err {
            ChurnError::Switch(AsicError::Synthetic(msg)) => {
                assert_eq!(msg, stringify!($kind))
            }
            e => {
                panic!("expected chaos from {}, got {e:?}", stringify!($kind))
            }
        }
    };
}

type ChaosModel = ChaosHandle<asic::ModelHandle>;

fn chaos_context(config: ChaosConfig) -> Context<ChaosModel> {
    let log = test_log();
    let model = test_model(UR_PROGRAM);
    let chaos = ChaosHandle::new(&log, model, config).unwrap();
    Context::new(&log, chaos, DeviceTarget::default()).unwrap()
}

#[test]
fn test_no_chaos() -> anyhow::Result<()> {
    let tables = [bunny::INGRESS_TABLE_NAME, bunny::EGRESS_TABLE_NAME];
    let mut ctx = chaos_context(ChaosConfig::uniform(&tables, 0.0)?);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;
    h.verify_usage = true;
    h.warm_fill(&mut ctx.session, 100)?;
    h.churn(&mut ctx.session, 2, 10)?;
    h.bulk(&mut ctx.session, 10, 2)?;
    Ok(())
}

#[test]
fn test_add_chaos() -> anyhow::Result<()> {
    let config = ChaosConfig {
        table_entry_add: table_chaos!((bunny::EGRESS_TABLE_NAME, 1.0)),
        ..Default::default()
    };
    let mut ctx = chaos_context(config);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;

    let err = h.warm_fill(&mut ctx.session, 10).unwrap_err();
    assert!(err.is_fatal());
    expect_chaos!(err, table_entry_add);

    // The ingress half of the pair went in before the egress add failed
    let (ingress, egress) =
        h.tables().usage(&ctx.session, ReadFrom::Hardware)?;
    assert_eq!((ingress, egress), (1, 0));
    assert_eq!(h.live(), 0);
    Ok(())
}

#[test]
fn test_batch_chaos() -> anyhow::Result<()> {
    let config = ChaosConfig {
        end_batch: Chaos::new(1.0)?,
        ..Default::default()
    };
    let mut ctx = chaos_context(config);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;

    h.warm_fill(&mut ctx.session, 10)?;
    let err = h.churn(&mut ctx.session, 1, 5).unwrap_err();
    expect_chaos!(err, end_batch);

    // The session doesn't believe it still has a batch open
    assert!(!ctx.session.in_batch());
    let out = String::from_utf8(h.into_inner())?;
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn test_begin_chaos() -> anyhow::Result<()> {
    let config = ChaosConfig {
        begin_batch: Chaos::new(1.0)?,
        ..Default::default()
    };
    let mut ctx = chaos_context(config);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;

    let err = h.bulk(&mut ctx.session, 10, 1).unwrap_err();
    expect_chaos!(err, begin_batch);
    assert!(!ctx.session.in_batch());
    assert_eq!(h.tables().ingress.stats.inserts, 0);
    Ok(())
}
