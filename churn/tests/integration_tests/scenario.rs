// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Full-size benchmark phases against the model device.

use pretty_assertions::assert_eq;

use aal::ReadFrom;
use churn::harness::Op;
use churn::Harness;

use crate::integration_tests::common::prelude::*;

#[test]
fn test_warm_then_churn() -> anyhow::Result<()> {
    let mut ctx = test_context(UR_PROGRAM);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;

    h.warm_fill(&mut ctx.session, 100_000)?;
    assert_eq!(
        h.tables().usage(&ctx.session, ReadFrom::Hardware)?,
        (100_000, 100_000)
    );

    for round in 0..20 {
        let rows = h.churn(&mut ctx.session, 1, 10_000)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].op, Op::RemoveAdd);
        assert_eq!(rows[0].records, 10_000);
        assert_eq!(
            h.tables().usage(&ctx.session, ReadFrom::Hardware)?,
            (100_000, 100_000),
            "after round {round}"
        );
    }
    assert_eq!(h.live(), 100_000);

    let out = String::from_utf8(h.into_inner())?;
    assert_eq!(out.lines().count(), 20);
    for line in out.lines() {
        assert!(line.starts_with("removeadd 10000 0 "), "{line}");
    }
    Ok(())
}

#[test]
fn test_bulk_add_remove() -> anyhow::Result<()> {
    let mut ctx = test_context(UR_PROGRAM);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;
    h.verify_usage = true;

    let rows = h.bulk(&mut ctx.session, 100, 1)?;
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].op, rows[0].records), (Op::Add, 100));
    assert_eq!((rows[1].op, rows[1].records), (Op::Remove, 100));
    assert_eq!(
        h.tables().usage(&ctx.session, ReadFrom::Hardware)?,
        (0, 0)
    );
    assert_eq!(h.tables().ingress.stats.inserts, 100);
    assert_eq!(h.tables().egress.stats.deletes, 100);
    Ok(())
}

#[test]
fn test_bulk_beside_working_set() -> anyhow::Result<()> {
    let mut ctx = test_context(UR_PROGRAM);
    let mut h = Harness::new(&ctx.log, &ctx.registry, Vec::new())?;
    h.verify_usage = true;

    // Bulk trials run as robots other than the working set's
    h.warm_fill(&mut ctx.session, 10)?;
    assert!(h.bulk(&mut ctx.session, 10, 4).is_ok());
    assert_eq!(
        h.tables().usage(&ctx.session, ReadFrom::Hardware)?,
        (10, 10)
    );
    Ok(())
}
