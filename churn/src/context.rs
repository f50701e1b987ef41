// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use slog::o;

use aal::AsicResult;
use aal::DeviceTarget;
use aal::Driver;

use crate::schema::Registry;
use crate::session::Session;

/// Everything a table client needs to talk to one device: the driver, the
/// schema registry shared by all of its tables, and a default session.
///
/// The registry may be shared by any number of workers.  Each worker that
/// runs concurrently with another needs its own session, from
/// `new_session()`, and its own table handles.
pub struct Context<D: Driver> {
    pub log: slog::Logger,
    pub target: DeviceTarget,
    pub registry: Registry<D>,
    pub session: Session<D>,
    device: Arc<D>,
}

impl<D: Driver> Context<D> {
    pub fn new(
        log: &slog::Logger,
        device: D,
        target: DeviceTarget,
    ) -> AsicResult<Self> {
        let log = log.new(o!("dev" => target.dev_id));
        let device = Arc::new(device);
        let registry = Registry::new(&log, device.clone());
        let session = Session::new(&log, device.clone(), target)?;
        Ok(Context {
            log,
            target,
            registry,
            session,
            device,
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Open another session on the same device and target
    pub fn new_session(&self) -> AsicResult<Session<D>> {
        Session::new(&self.log, self.device.clone(), self.target)
    }
}
