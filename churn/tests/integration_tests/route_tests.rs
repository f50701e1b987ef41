// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Exercise a table with more than one action, and with fields whose widths
//! don't line up with any integer type.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use pretty_assertions::assert_eq;

use aal::AsicError;
use aal::ReadFrom;
use aal_macros::*;
use churn::schema::ActionSpec;
use churn::TableHandle;
use churn::TableSpec;

use crate::integration_tests::common::prelude::*;

const ROUTE_PROGRAM: &str = r#"{
  "tables": [
    {
      "name": "pipe.Ingress.l3_router.Router4.tbl",
      "id": 501,
      "table_type": "MatchAction_Direct",
      "size": 64,
      "key": [
        { "id": 1, "name": "hdr.ipv4.dst_addr", "mandatory": false,
          "match_type": "Exact", "type": { "type": "bytes", "width": 32 } },
        { "id": 2, "name": "meta.vrf", "mandatory": false,
          "match_type": "Exact", "type": { "type": "bytes", "width": 12 } }
      ],
      "action_specs": [
        { "id": 601, "name": "Ingress.l3_router.Router4.forward",
          "action_scope": "TableAndDefault",
          "data": [
            { "id": 1, "name": "port", "type": { "type": "bytes", "width": 9 } },
            { "id": 2, "name": "src_mac", "type": { "type": "bytes", "width": 48 } },
            { "id": 3, "name": "dst_mac", "type": { "type": "bytes", "width": 48 } }
          ] },
        { "id": 602, "name": "Ingress.l3_router.Router4.nat",
          "action_scope": "TableAndDefault",
          "data": [
            { "id": 1, "name": "nat_ip", "type": { "type": "uint32" } },
            { "id": 2, "name": "nat_port", "type": { "type": "uint16" } },
            { "id": 3, "name": "port", "type": { "type": "bytes", "width": 9 } }
          ] },
        { "id": 603, "name": "Ingress.l3_router.Router4.drop",
          "action_scope": "TableAndDefault", "data": [] }
      ]
    }
  ]
}"#;

const ROUTE: TableSpec = TableSpec {
    name: "Router4.tbl",
    keys: &["meta.vrf", "hdr.ipv4.dst_addr"],
    actions: &[
        ActionSpec {
            name: "Ingress.l3_router.Router4.forward",
            fields: &["src_mac", "dst_mac", "port"],
        },
        ActionSpec {
            name: "Ingress.l3_router.Router4.nat",
            fields: &["nat_ip", "nat_port", "port"],
        },
        ActionSpec {
            name: "Ingress.l3_router.Router4.drop",
            fields: &[],
        },
    ],
};

#[derive(MatchParse, Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RouteKey {
    vrf: u16,
    #[match_xlate(name = "dst_addr")]
    dst: Ipv4Addr,
}

#[derive(ActionParse, Clone, Debug, PartialEq, Eq)]
enum RouteAction {
    #[action_xlate(name = "Ingress.l3_router.Router4.forward")]
    Forward {
        src_mac: u64,
        dst_mac: u64,
        port: u16,
    },
    #[action_xlate(name = "Ingress.l3_router.Router4.nat")]
    Nat {
        nat_ip: Ipv4Addr,
        nat_port: u16,
        port: u16,
    },
    #[action_xlate(name = "Ingress.l3_router.Router4.drop")]
    Drop,
}

type RouteTable = TableHandle<RouteKey, RouteAction>;

fn route_key(vrf: u16, last: u8) -> RouteKey {
    RouteKey {
        vrf,
        dst: Ipv4Addr::new(10, 1, 0, last),
    }
}

fn forward(port: u16) -> RouteAction {
    RouteAction::Forward {
        src_mac: 0xa8_40_25_00_00_01,
        dst_mac: 0xa8_40_25_ff_00_00 | u64::from(port),
        port,
    }
}

#[test]
fn test_actions_roundtrip() -> anyhow::Result<()> {
    let ctx = test_context(ROUTE_PROGRAM);
    let sess = &ctx.session;
    let mut t = RouteTable::new(&ctx.registry, &ROUTE)?;

    let mut expected = HashMap::new();
    for last in 1..=6u8 {
        let key = route_key(u16::from(last % 2), last);
        let action = match last % 3 {
            0 => forward(u16::from(last)),
            1 => RouteAction::Nat {
                nat_ip: Ipv4Addr::new(192, 168, 1, last),
                nat_port: 1024 + u16::from(last),
                port: 511,
            },
            _ => RouteAction::Drop,
        };
        t.add(sess, &key, &action)?;
        expected.insert(key, action);
    }

    for (key, action) in &expected {
        assert_eq!(&t.get(sess, key, ReadFrom::Hardware)?, action);
    }
    let found: HashMap<RouteKey, RouteAction> =
        t.entries(sess, ReadFrom::Hardware)?.into_iter().collect();
    assert_eq!(found, expected);
    Ok(())
}

#[test]
fn test_modify_changes_action() -> anyhow::Result<()> {
    let ctx = test_context(ROUTE_PROGRAM);
    let sess = &ctx.session;
    let mut t = RouteTable::new(&ctx.registry, &ROUTE)?;
    let key = route_key(3, 9);

    t.add(sess, &key, &forward(17))?;
    t.modify(sess, &key, &RouteAction::Drop)?;
    assert_eq!(t.get(sess, &key, ReadFrom::Hardware)?, RouteAction::Drop);

    t.modify(sess, &key, &forward(18))?;
    assert_eq!(t.get(sess, &key, ReadFrom::Hardware)?, forward(18));
    assert_eq!(t.usage(sess, ReadFrom::Hardware)?, 1);
    Ok(())
}

#[test]
fn test_field_width() -> anyhow::Result<()> {
    let ctx = test_context(ROUTE_PROGRAM);
    let sess = &ctx.session;
    let mut t = RouteTable::new(&ctx.registry, &ROUTE)?;

    // vrf is a 12-bit field and port a 9-bit field
    let wide_key = route_key(0x1000, 1);
    assert!(matches!(
        t.add(sess, &wide_key, &forward(1)),
        Err(AsicError::InvalidArg(_))
    ));
    assert!(matches!(
        t.add(sess, &route_key(1, 1), &forward(512)),
        Err(AsicError::InvalidArg(_))
    ));
    let mac = RouteAction::Forward {
        src_mac: 1 << 48,
        dst_mac: 0,
        port: 1,
    };
    assert!(matches!(
        t.add(sess, &route_key(1, 1), &mac),
        Err(AsicError::InvalidArg(_))
    ));

    // Nothing reached the device
    assert_eq!(t.usage(sess, ReadFrom::Software)?, 0);
    assert_eq!(t.stats.inserts, 0);

    t.add(sess, &route_key(0xfff, 255), &forward(511))?;
    Ok(())
}

#[test]
fn test_table_full() -> anyhow::Result<()> {
    let ctx = test_context(ROUTE_PROGRAM);
    let sess = &ctx.session;
    let mut t = RouteTable::new(&ctx.registry, &ROUTE)?;

    for last in 0..64u8 {
        t.add(sess, &route_key(1, last), &RouteAction::Drop)?;
    }
    let err = t.add(sess, &route_key(1, 64), &RouteAction::Drop).unwrap_err();
    assert!(matches!(err, AsicError::TableFull(_)));
    assert!(!err.is_fatal());
    assert_eq!(t.stats.exhaustion, 1);
    assert_eq!(t.iter(sess, ReadFrom::Hardware)?.len(), 64);
    Ok(())
}
