// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The churn benchmark.
//!
//! A run has three kinds of phase, each of which may be repeated:
//!
//! - a warm fill, which installs a working set of entries one at a time,
//! - steady churn, which retires the oldest entries and installs new ones in
//!   batches, keeping the working set the same size,
//! - bulk timing, which installs and then removes a block of entries per
//!   trial, one batch per block.
//!
//! Each timed batch produces one `Measurement`, written as a line of text to
//! the harness's output.  The timing window opens just before the batch is
//! opened and closes once the completion barrier returns.

use std::fmt;
use std::io::Write;
use std::time::Instant;

use slog::{debug, info, o};

use aal::AsicError;
use aal::Driver;
use aal::ReadFrom;

use crate::bunny::BunnyKey;
use crate::bunny::BunnyTables;
use crate::config::BenchPlan;
use crate::schema::Registry;
use crate::session::Session;
use crate::types::ChurnError;
use crate::types::ChurnResult;

/// Robot id used by the warm fill and steady churn phases.  Bulk trials use
/// the robot ids after it, so they never touch the working set.
const CHURN_ROBOT: u8 = 0;

/// Number of robot ids available to bulk trials
pub const MAX_BULK_TRIALS: u32 = u8::MAX as u32 - CHURN_ROBOT as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Op {
    Add,
    Remove,
    RemoveAdd,
}

/// The timing of a single batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub op: Op,
    /// Number of entries (or entry pairs, for churn) in the batch
    pub records: u32,
    /// Round or trial index within the phase
    pub index: u32,
    pub elapsed_us: u128,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.op, self.records, self.index, self.elapsed_us
        )
    }
}

pub struct Harness<W: Write> {
    log: slog::Logger,
    tables: BunnyTables,
    out: W,
    /// After every phase, check that the hardware holds exactly the entries
    /// the harness believes are live.  Only meaningful when this harness is
    /// the only writer to the tables.
    pub verify_usage: bool,
    // The live working set is [oldest, next) on CHURN_ROBOT
    oldest: u32,
    next: u32,
}

impl<W: Write> Harness<W> {
    pub fn new<D: Driver>(
        log: &slog::Logger,
        registry: &Registry<D>,
        out: W,
    ) -> ChurnResult<Self> {
        let log = log.new(o!("unit" => "harness"));
        let tables = BunnyTables::new(&log, registry)?;
        Ok(Harness {
            log,
            tables,
            out,
            verify_usage: false,
            oldest: 0,
            next: 0,
        })
    }

    pub fn tables(&self) -> &BunnyTables {
        &self.tables
    }

    /// Number of entries in the warm working set
    pub fn live(&self) -> u32 {
        self.next - self.oldest
    }

    /// Consume the harness, returning its output sink
    pub fn into_inner(self) -> W {
        self.out
    }

    fn record(&mut self, m: Measurement) -> ChurnResult<()> {
        debug!(self.log, "batch complete";
            "op" => %m.op,
            "records" => m.records,
            "index" => m.index,
            "elapsed_us" => m.elapsed_us as u64);
        writeln!(self.out, "{m}")?;
        self.out.flush()?;
        Ok(())
    }

    fn check_usage<D: Driver>(
        &self,
        sess: &Session<D>,
        expected: u32,
        phase: &str,
    ) -> ChurnResult<()> {
        if !self.verify_usage {
            return Ok(());
        }
        let (ingress, egress) = self.tables.usage(sess, ReadFrom::Hardware)?;
        if ingress != expected || egress != expected {
            return Err(AsicError::Inconsistent(format!(
                "after {phase}: expected {expected} entries, \
                 ingress has {ingress}, egress has {egress}"
            ))
            .into());
        }
        Ok(())
    }

    /// Grow the working set by `count` entries, added one at a time outside
    /// of any batch.
    pub fn warm_fill<D: Driver>(
        &mut self,
        sess: &mut Session<D>,
        count: u32,
    ) -> ChurnResult<()> {
        let start = Instant::now();
        for _ in 0..count {
            let key = BunnyKey::from_counter(CHURN_ROBOT, self.next)?;
            self.tables.add(sess, &key)?;
            self.next += 1;
        }
        sess.complete_operations()?;
        info!(self.log, "warm fill complete";
            "entries" => count,
            "live" => self.live(),
            "elapsed_ms" => start.elapsed().as_millis() as u64);
        self.check_usage(sess, self.live(), "warm fill")
    }

    /// Run `rounds` batches, each of which retires the `pairs` oldest
    /// entries of the working set and adds `pairs` new ones.
    pub fn churn<D: Driver>(
        &mut self,
        sess: &mut Session<D>,
        rounds: u32,
        pairs: u32,
    ) -> ChurnResult<Vec<Measurement>> {
        if pairs > 0 && self.live() == 0 {
            return Err(ChurnError::Config(
                "steady churn needs a warm working set".into(),
            ));
        }

        let mut rval = Vec::with_capacity(rounds as usize);
        for round in 0..rounds {
            let start = Instant::now();
            sess.batch(true, |s| {
                for _ in 0..pairs {
                    let old = BunnyKey::from_counter(CHURN_ROBOT, self.oldest)?;
                    self.tables.delete(s, &old)?;
                    self.oldest += 1;

                    let new = BunnyKey::from_counter(CHURN_ROBOT, self.next)?;
                    self.tables.add(s, &new)?;
                    self.next += 1;
                }
                Ok(())
            })?;
            sess.complete_operations()?;

            let m = Measurement {
                op: Op::RemoveAdd,
                records: pairs,
                index: round,
                elapsed_us: start.elapsed().as_micros(),
            };
            self.record(m)?;
            rval.push(m);
            self.check_usage(sess, self.live(), "churn round")?;
        }
        info!(self.log, "steady churn complete";
            "rounds" => rounds,
            "pairs" => pairs,
            "live" => self.live());
        Ok(rval)
    }

    // Add or remove entries 0..records for each trial's robot, timing each
    // trial's batch separately.  Trial t runs as robot CHURN_ROBOT + 1 + t.
    fn bulk_phase<D: Driver>(
        &mut self,
        sess: &mut Session<D>,
        op: Op,
        records: u32,
        trials: u32,
    ) -> ChurnResult<Vec<Measurement>> {
        let mut rval = Vec::with_capacity(trials as usize);
        for trial in 0..trials {
            let robot = trial
                .checked_add(u32::from(CHURN_ROBOT) + 1)
                .and_then(|r| u8::try_from(r).ok())
                .ok_or_else(|| {
                    ChurnError::Config(format!("trial {trial} has no robot id"))
                })?;
            let start = Instant::now();
            sess.batch(true, |s| {
                for counter in 0..records {
                    let key = BunnyKey::from_counter(robot, counter)?;
                    match op {
                        Op::Add => self.tables.add(s, &key)?,
                        _ => self.tables.delete(s, &key)?,
                    }
                }
                Ok(())
            })?;
            sess.complete_operations()?;

            let m = Measurement {
                op,
                records,
                index: trial,
                elapsed_us: start.elapsed().as_micros(),
            };
            self.record(m)?;
            rval.push(m);
        }
        Ok(rval)
    }

    /// For each of `trials` robots, time a batch adding `records` entries.
    /// Then time the removal of each robot's entries, again one batch per
    /// robot.
    pub fn bulk<D: Driver>(
        &mut self,
        sess: &mut Session<D>,
        records: u32,
        trials: u32,
    ) -> ChurnResult<Vec<Measurement>> {
        if trials > MAX_BULK_TRIALS {
            return Err(ChurnError::Config(format!(
                "{trials} trials exceeds the number of robot ids"
            )));
        }
        let live = self.live();
        let added = records.checked_mul(trials).ok_or_else(|| {
            ChurnError::Config(format!("{trials} x {records} records"))
        })?;

        let mut rval = self.bulk_phase(sess, Op::Add, records, trials)?;
        self.check_usage(sess, live + added, "bulk add")?;
        rval.extend(self.bulk_phase(sess, Op::Remove, records, trials)?);
        self.check_usage(sess, live, "bulk remove")?;
        Ok(rval)
    }

    /// Run each phase of `plan` in order
    pub fn run_plan<D: Driver>(
        &mut self,
        sess: &mut Session<D>,
        plan: &BenchPlan,
    ) -> ChurnResult<Vec<Measurement>> {
        let mut rval = Vec::new();
        if plan.warm_fill > 0 {
            self.warm_fill(sess, plan.warm_fill)?;
        }
        if plan.churn_rounds > 0 {
            rval.extend(self.churn(
                sess,
                plan.churn_rounds,
                plan.churn_pairs,
            )?);
        }
        for step in &plan.bulk {
            info!(self.log, "bulk step";
                "records" => step.records,
                "trials" => step.trials,
                "repeat" => step.repeat);
            for _ in 0..step.repeat {
                rval.extend(self.bulk(sess, step.records, step.trials)?);
            }
        }
        Ok(rval)
    }

    /// Log the per-table operation counters
    pub fn summarize(&self) {
        for (name, stats) in [
            (self.tables.ingress.name(), &self.tables.ingress.stats),
            (self.tables.egress.name(), &self.tables.egress.stats),
        ] {
            info!(self.log, "table summary";
                "table" => name,
                "size" => stats.size,
                "inserts" => stats.inserts,
                "deletes" => stats.deletes,
                "collisions" => stats.collisions,
                "delete_misses" => stats.delete_misses,
                "exhaustion" => stats.exhaustion);
        }
    }
}
