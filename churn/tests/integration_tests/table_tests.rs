// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use pretty_assertions::assert_eq;

use aal::AsicError;
use aal::ReadFrom;
use churn::bunny;
use churn::bunny::BunnyKey;
use churn::bunny::IngressAction;
use churn::TableHandle;

use crate::integration_tests::common::prelude::*;

type Ingress = TableHandle<BunnyKey, IngressAction>;

fn key(counter: u32) -> BunnyKey {
    BunnyKey::from_counter(1, counter).unwrap()
}

fn action(next_id: u16) -> IngressAction {
    IngressAction::SetTarget {
        next_id,
        duration: bunny::DEFAULT_DURATION,
    }
}

#[test]
fn test_add_get_delete() -> anyhow::Result<()> {
    let ctx = test_context(UR_PROGRAM);
    let sess = &ctx.session;
    let mut t = Ingress::new(&ctx.registry, &bunny::INGRESS)?;
    assert_eq!(t.size(), 393216);

    t.add(sess, &key(7), &action(8))?;
    assert_eq!(t.get(sess, &key(7), ReadFrom::Hardware)?, action(8));
    assert_eq!(t.usage(sess, ReadFrom::Hardware)?, 1);

    t.delete(sess, &key(7))?;
    assert!(matches!(
        t.get(sess, &key(7), ReadFrom::Hardware),
        Err(AsicError::Missing(_))
    ));
    assert_eq!(t.usage(sess, ReadFrom::Hardware)?, 0);
    assert_eq!(t.stats.inserts, 1);
    assert_eq!(t.stats.deletes, 1);
    Ok(())
}

#[test]
fn test_failures_are_not_fatal() -> anyhow::Result<()> {
    let ctx = test_context(UR_PROGRAM);
    let sess = &ctx.session;
    let mut t = Ingress::new(&ctx.registry, &bunny::INGRESS)?;

    t.add(sess, &key(1), &action(2))?;
    let dup = t.add(sess, &key(1), &action(3)).unwrap_err();
    assert!(matches!(dup, AsicError::Exists));
    assert!(!dup.is_fatal());

    let missing = t.modify(sess, &key(2), &action(3)).unwrap_err();
    assert!(matches!(missing, AsicError::Missing(_)));
    assert!(!missing.is_fatal());
    // A failed modify doesn't create the entry
    for from in [ReadFrom::Hardware, ReadFrom::Software] {
        assert_eq!(t.usage(sess, from)?, 1);
        assert!(matches!(
            t.get(sess, &key(2), from),
            Err(AsicError::Missing(_))
        ));
    }

    let missing = t.delete(sess, &key(2)).unwrap_err();
    assert!(!missing.is_fatal());

    // The original entry survives the failed add
    assert_eq!(t.get(sess, &key(1), ReadFrom::Software)?, action(2));
    assert_eq!(t.stats.collisions, 1);
    assert_eq!(t.stats.update_misses, 1);
    assert_eq!(t.stats.delete_misses, 1);
    Ok(())
}

#[test]
fn test_modify() -> anyhow::Result<()> {
    let ctx = test_context(UR_PROGRAM);
    let sess = &ctx.session;
    let mut t = Ingress::new(&ctx.registry, &bunny::INGRESS)?;

    t.add(sess, &key(3), &action(4))?;
    t.modify(sess, &key(3), &action(40))?;
    assert_eq!(t.get(sess, &key(3), ReadFrom::Hardware)?, action(40));
    assert_eq!(t.stats.updates, 1);
    Ok(())
}

#[test]
fn test_iterate() -> anyhow::Result<()> {
    let ctx = test_context(UR_PROGRAM);
    let sess = &ctx.session;
    let mut t = Ingress::new(&ctx.registry, &bunny::INGRESS)?;

    assert_eq!(t.iter(sess, ReadFrom::Hardware)?.len(), 0);

    // Straddle a joint boundary so the keys differ in every field
    let counters: Vec<u32> = (bunny::FANOUT - 50..bunny::FANOUT + 50).collect();
    for c in &counters {
        let k = key(*c);
        t.add(sess, &k, &IngressAction::for_key(&k))?;
    }

    let iter = t.iter(sess, ReadFrom::Hardware)?;
    assert_eq!(iter.len(), counters.len());
    let mut found = Vec::new();
    for entry in iter {
        let (k, a) = entry?;
        assert_eq!(a, IngressAction::for_key(&k));
        found.push(
            u32::from(k.joint_id) * bunny::FANOUT + u32::from(k.instance),
        );
    }
    found.sort();
    assert_eq!(found, counters);
    Ok(())
}

#[test]
fn test_deferred_batch() -> anyhow::Result<()> {
    let mut ctx = test_context(UR_PROGRAM);
    let mut t = Ingress::new(&ctx.registry, &bunny::INGRESS)?;

    let sess = &mut ctx.session;
    sess.begin_batch()?;
    for c in 0..10 {
        t.add(sess, &key(c), &action(1))?;
    }
    sess.end_batch(false)?;

    // The device has accepted the entries, but hasn't installed them yet
    assert_eq!(t.usage(sess, ReadFrom::Software)?, 10);
    assert_eq!(t.usage(sess, ReadFrom::Hardware)?, 0);
    assert_eq!(t.get(sess, &key(4), ReadFrom::Software)?, action(1));
    assert!(t.get(sess, &key(4), ReadFrom::Hardware).is_err());

    sess.complete_operations()?;
    assert_eq!(t.usage(sess, ReadFrom::Hardware)?, 10);
    assert_eq!(t.entries(sess, ReadFrom::Hardware)?.len(), 10);
    Ok(())
}

#[test]
fn test_flushed_batch() -> anyhow::Result<()> {
    let mut ctx = test_context(UR_PROGRAM);
    let mut t = Ingress::new(&ctx.registry, &bunny::INGRESS)?;

    ctx.session.batch(true, |s| {
        for c in 0..10 {
            t.add(s, &key(c), &action(1))?;
        }
        Ok(())
    })?;
    assert_eq!(t.usage(&ctx.session, ReadFrom::Hardware)?, 10);

    t.clear(&ctx.session)?;
    assert_eq!(t.usage(&ctx.session, ReadFrom::Hardware)?, 0);
    assert_eq!(t.stats.clears, 1);
    Ok(())
}

#[test]
fn test_registry_caches() -> anyhow::Result<()> {
    let ctx = test_context(UR_PROGRAM);
    let a = ctx.registry.resolve(bunny::INGRESS_TABLE_NAME)?;
    let b = ctx.registry.resolve(bunny::INGRESS_TABLE_NAME)?;
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(a.name(), "pipe.SwitchIngress.bunny");
    assert!(matches!(
        ctx.registry.resolve("SwitchIngress.rabbit"),
        Err(AsicError::SchemaMismatch(_))
    ));
    Ok(())
}
