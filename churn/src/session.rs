// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use slog::{debug, error, o};

use aal::AsicError;
use aal::AsicResult;
use aal::DeviceTarget;
use aal::Driver;
use aal::SessionId;

/// A single control-plane session on a device, and the target its operations
/// apply to.
///
/// Operations submitted through a session are normally pushed to the device
/// as they are issued.  Between `begin_batch()` and `end_batch()` they are
/// instead collected and pushed together.  A session may have at most one
/// open batch; the session tracks that locally so a protocol violation is
/// caught before it reaches the driver.
pub struct Session<D: Driver> {
    log: slog::Logger,
    device: Arc<D>,
    target: DeviceTarget,
    id: SessionId,
    batch_open: bool,
}

// If the work inside the batch failed, report that rather than any error
// from closing the batch.
fn choose_rval<T>(rval: AsicResult<T>, end: AsicResult<()>) -> AsicResult<T> {
    match (rval, end) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(v), Ok(())) => Ok(v),
    }
}

impl<D: Driver> Session<D> {
    pub fn new(
        log: &slog::Logger,
        device: Arc<D>,
        target: DeviceTarget,
    ) -> AsicResult<Self> {
        let id = device.session_create()?;
        let log = log.new(o!("session" => id));
        debug!(log, "session open"; "target" => ?target);
        Ok(Session {
            log,
            device,
            target,
            id,
            batch_open: false,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn in_batch(&self) -> bool {
        self.batch_open
    }

    pub fn begin_batch(&mut self) -> AsicResult<()> {
        if self.batch_open {
            return Err(AsicError::BatchProtocol(format!(
                "session {} already has an open batch",
                self.id
            )));
        }
        self.device.begin_batch(self.id)?;
        self.batch_open = true;
        Ok(())
    }

    /// Close the open batch.  With `flush` set, the batched operations are
    /// pushed to the device now; otherwise they are pushed no later than the
    /// next `complete_operations()`.
    pub fn end_batch(&mut self, flush: bool) -> AsicResult<()> {
        if !self.batch_open {
            return Err(AsicError::BatchProtocol(format!(
                "session {} has no open batch",
                self.id
            )));
        }
        self.batch_open = false;
        self.device.end_batch(self.id, flush)
    }

    /// Wait until every operation submitted on this session outside an open
    /// batch has been acknowledged by the device.
    pub fn complete_operations(&self) -> AsicResult<()> {
        self.device.complete_operations(self.id)
    }

    /// Run `f` inside a batch.  The batch is closed whether or not `f`
    /// succeeds.
    pub fn batch<T, F>(&mut self, flush: bool, f: F) -> AsicResult<T>
    where
        F: FnOnce(&Self) -> AsicResult<T>,
    {
        self.begin_batch()?;
        let rval = f(self);
        let end = self.end_batch(flush);
        choose_rval(rval, end)
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.session_destroy(self.id) {
            error!(self.log, "failed to destroy session: {e:?}");
        } else {
            debug!(self.log, "session closed");
        }
    }
}
