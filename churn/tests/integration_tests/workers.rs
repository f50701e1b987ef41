// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Several workers sharing one device and registry, each with its own session
//! and table handles.

use pretty_assertions::assert_eq;

use aal::ReadFrom;
use churn::bunny::BunnyKey;
use churn::bunny::BunnyTables;
use churn::ChurnResult;

use crate::integration_tests::common::prelude::*;

const WORKERS: u8 = 4;
const PER_WORKER: u32 = 2000;

#[test]
fn test_concurrent_workers() -> anyhow::Result<()> {
    let ctx = test_context(UR_PROGRAM);

    std::thread::scope(|s| -> ChurnResult<()> {
        let handles: Vec<_> = (1..=WORKERS)
            .map(|robot| {
                let ctx = &ctx;
                s.spawn(move || -> ChurnResult<()> {
                    let mut sess = ctx.new_session()?;
                    let mut tables = BunnyTables::new(&ctx.log, &ctx.registry)?;
                    for chunk in 0..PER_WORKER / 100 {
                        sess.batch(true, |b| {
                            for c in chunk * 100..(chunk + 1) * 100 {
                                let key = BunnyKey::from_counter(robot, c)?;
                                tables.add(b, &key)?;
                            }
                            Ok(())
                        })?;
                    }
                    sess.complete_operations()?;
                    Ok(())
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker panicked")?;
        }
        Ok(())
    })?;

    let expected = u32::from(WORKERS) * PER_WORKER;
    let mut tables = BunnyTables::new(&ctx.log, &ctx.registry)?;
    assert_eq!(
        tables.usage(&ctx.session, ReadFrom::Hardware)?,
        (expected, expected)
    );

    let mut per_robot = [0u32; WORKERS as usize + 1];
    for entry in tables.ingress.iter(&ctx.session, ReadFrom::Hardware)? {
        let (key, _) = entry?;
        per_robot[key.robot_id as usize] += 1;
    }
    assert_eq!(per_robot[0], 0);
    assert!(per_robot[1..].iter().all(|n| *n == PER_WORKER));

    // The registry resolved each table once, however many handles use it
    assert_eq!(ctx.registry.resolved().len(), 2);
    Ok(())
}

#[test]
fn test_sessions_batch_independently() -> anyhow::Result<()> {
    let mut ctx = test_context(UR_PROGRAM);
    let mut other = ctx.new_session()?;
    let mut tables = BunnyTables::new(&ctx.log, &ctx.registry)?;

    other.begin_batch()?;
    tables.add(&other, &BunnyKey::from_counter(2, 0)?)?;
    other.end_batch(false)?;

    // A batch on one session doesn't interfere with another session
    ctx.session.begin_batch()?;
    tables.add(&ctx.session, &BunnyKey::from_counter(3, 0)?)?;
    ctx.session.end_batch(true)?;
    assert_eq!(tables.usage(&ctx.session, ReadFrom::Hardware)?, (1, 1));

    // The other session's entries land at its completion barrier
    ctx.session.complete_operations()?;
    assert_eq!(tables.usage(&ctx.session, ReadFrom::Hardware)?, (1, 1));
    other.complete_operations()?;
    assert_eq!(tables.usage(&ctx.session, ReadFrom::Hardware)?, (2, 2));
    Ok(())
}
