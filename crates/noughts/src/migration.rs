//! Migration handoff.
//!
//! A client volunteers for relocation by publishing an empty request after
//! a randomized delay; the serving node answers, on its own schedule, with
//! a one-shot notice carrying the url to navigate to. Navigation itself is
//! the client's job - this module only owns the request timer. Continuity
//! across the hop comes from session resumption, not from anything here:
//! the notice is effectively a full reload.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::message::topics;
use crate::transport::Transport;

/// Default delay window for a migration request, in milliseconds.
pub const DEFAULT_DELAY_MS: RangeInclusive<u64> = 2_000..=12_000;

/// Schedules migration requests. The timer is cancellable: it is aborted
/// when the game ends, when a notice arrives, and on teardown.
pub struct Migrator {
    transport: Arc<dyn Transport>,
    delay_ms: RangeInclusive<u64>,
    timer: Option<JoinHandle<()>>,
}

impl Migrator {
    pub fn new(transport: Arc<dyn Transport>, delay_ms: RangeInclusive<u64>) -> Self {
        Self {
            transport,
            delay_ms,
            timer: None,
        }
    }

    /// Arm the timer: after a uniformly random delay within the window,
    /// publish an empty migration request. Re-arming replaces any pending
    /// timer.
    pub fn schedule(&mut self) {
        self.cancel();
        let delay = Duration::from_millis(rand::rng().random_range(self.delay_ms.clone()));
        debug!(?delay, "migration request scheduled");
        let transport = Arc::clone(&self.transport);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = transport.publish(topics::MIGRATE, Value::Null).await {
                warn!(error = %e, "migration request not published");
            }
        }));
    }

    /// Abort a pending request, if any.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Migrator {
    fn drop(&mut self) {
        self.cancel();
    }
}
