// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The target-tracking tables of the `ur` pipeline program.  Every tracked
//! target has one entry in the ingress table and one, with the same key, in
//! the egress table.

use slog::{error, o};

use aal::ActionParse;
use aal::AsicError;
use aal::AsicResult;
use aal::Driver;
use aal::MatchParse;
use aal::ReadFrom;
use aal_macros::*;

use crate::schema::ActionSpec;
use crate::schema::Registry;
use crate::schema::TableSpec;
use crate::session::Session;
use crate::table::TableHandle;

pub const INGRESS_TABLE_NAME: &str = "SwitchIngress.bunny";
pub const EGRESS_TABLE_NAME: &str = "SwitchEgress.bunny_e";

pub const INGRESS: TableSpec = TableSpec {
    name: INGRESS_TABLE_NAME,
    keys: &["ig_md.robot_id", "ig_md.actual_bunny", "hdr.cur.jointId"],
    actions: &[ActionSpec {
        name: "SwitchIngress.set_target",
        fields: &["next_id", "duration"],
    }],
};

pub const EGRESS: TableSpec = TableSpec {
    name: EGRESS_TABLE_NAME,
    keys: &[
        "eg_md.robot_id",
        "hdr.bridge.actual_bunny_id",
        "hdr.cur.jointId",
    ],
    actions: &[ActionSpec {
        name: "SwitchEgress.set_target_e",
        fields: &["tpos", "tspeed"],
    }],
};

/// Number of instances addressed by each joint index
pub const FANOUT: u32 = 65536;

/// Hold time installed with every ingress entry
pub const DEFAULT_DURATION: u32 = 1000;

#[derive(MatchParse, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BunnyKey {
    pub robot_id: u8,
    #[match_xlate(name = "actual_bunny")]
    pub instance: u16,
    #[match_xlate(name = "jointId")]
    pub joint_id: u8,
}

impl BunnyKey {
    /// Build the key for a position in a robot's counter sequence.  The
    /// counter is split into a coarse joint index and a fine instance index.
    pub fn from_counter(robot_id: u8, counter: u32) -> AsicResult<Self> {
        let joint_id = u8::try_from(counter / FANOUT).map_err(|_| {
            AsicError::InvalidArg(format!(
                "counter {counter} overflows the joint index"
            ))
        })?;
        Ok(BunnyKey {
            robot_id,
            instance: (counter % FANOUT) as u16,
            joint_id,
        })
    }
}

#[derive(ActionParse, Clone, Debug, PartialEq, Eq)]
pub enum IngressAction {
    #[action_xlate(name = "SwitchIngress.set_target")]
    SetTarget { next_id: u16, duration: u32 },
}

#[derive(ActionParse, Clone, Debug, PartialEq, Eq)]
pub enum EgressAction {
    #[action_xlate(name = "SwitchEgress.set_target_e")]
    SetTargetE { tpos: u64, tspeed: u64 },
}

impl IngressAction {
    pub fn for_key(key: &BunnyKey) -> Self {
        IngressAction::SetTarget {
            next_id: key.instance.wrapping_add(1),
            duration: DEFAULT_DURATION,
        }
    }
}

impl EgressAction {
    pub fn for_key(key: &BunnyKey) -> Self {
        EgressAction::SetTargetE {
            tpos: u64::from(key.joint_id) * u64::from(FANOUT)
                + u64::from(key.instance),
            tspeed: 0,
        }
    }
}

/// The ingress and egress tables, managed as a pair
pub struct BunnyTables {
    log: slog::Logger,
    pub ingress: TableHandle<BunnyKey, IngressAction>,
    pub egress: TableHandle<BunnyKey, EgressAction>,
}

impl BunnyTables {
    pub fn new<D: Driver>(
        log: &slog::Logger,
        registry: &Registry<D>,
    ) -> AsicResult<Self> {
        Ok(BunnyTables {
            log: log.new(o!("unit" => "bunny")),
            ingress: TableHandle::new(registry, &INGRESS)?,
            egress: TableHandle::new(registry, &EGRESS)?,
        })
    }

    /// Install the ingress and egress entries for a single key
    pub fn add<D: Driver>(
        &mut self,
        sess: &Session<D>,
        key: &BunnyKey,
    ) -> AsicResult<()> {
        let ingress = IngressAction::for_key(key);
        if let Err(e) = self.ingress.add(sess, key, &ingress) {
            error!(self.log, "add failed";
                "table" => INGRESS_TABLE_NAME,
                "key" => ?key.key_values(),
                "action" => ingress.action_name(),
                "args" => ?ingress.action_args(),
                "error" => %e);
            return Err(e);
        }
        let egress = EgressAction::for_key(key);
        if let Err(e) = self.egress.add(sess, key, &egress) {
            error!(self.log, "add failed";
                "table" => EGRESS_TABLE_NAME,
                "key" => ?key.key_values(),
                "action" => egress.action_name(),
                "args" => ?egress.action_args(),
                "error" => %e);
            return Err(e);
        }
        Ok(())
    }

    /// Remove the ingress and egress entries for a single key
    pub fn delete<D: Driver>(
        &mut self,
        sess: &Session<D>,
        key: &BunnyKey,
    ) -> AsicResult<()> {
        if let Err(e) = self.ingress.delete(sess, key) {
            error!(self.log, "delete failed";
                "table" => INGRESS_TABLE_NAME,
                "key" => ?key.key_values(),
                "error" => %e);
            return Err(e);
        }
        if let Err(e) = self.egress.delete(sess, key) {
            error!(self.log, "delete failed";
                "table" => EGRESS_TABLE_NAME,
                "key" => ?key.key_values(),
                "error" => %e);
            return Err(e);
        }
        Ok(())
    }

    /// Entry counts of the ingress and egress tables
    pub fn usage<D: Driver>(
        &self,
        sess: &Session<D>,
        from: ReadFrom,
    ) -> AsicResult<(u32, u32)> {
        Ok((self.ingress.usage(sess, from)?, self.egress.usage(sess, from)?))
    }

    /// Remove all target data from both tables
    pub fn clear<D: Driver>(&mut self, sess: &Session<D>) -> AsicResult<()> {
        self.ingress.clear(sess)?;
        self.egress.clear(sess)
    }
}
