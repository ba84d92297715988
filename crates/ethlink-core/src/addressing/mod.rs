//! Addressing worker
//!
//! Runs the blocking dynamic address acquisition on a dedicated blocking
//! thread so it never stalls the tracker's processing loop, and performs
//! static configuration synchronously.
//!
//! ## Tokens
//!
//! Every attempt is tagged with a monotonically increasing
//! [`AddressingToken`]. Exactly one token is live at a time; starting a new
//! attempt supersedes the previous one and [`cancel`](AddressingWorker::cancel)
//! clears it. Completions always travel back through the tracker's input
//! queue, and the tracker discards any completion whose token is not the
//! live one.
//!
//! Cancellation is advisory: an in-flight blocking acquisition runs to
//! completion, its result is simply dropped on arrival.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::{AddressLease, StaticAddressConfig};
use crate::traits::DriverControl;
use crate::tracker::TrackerInput;

/// Identifier of one addressing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AddressingToken(u64);

impl AddressingToken {
    /// Raw sequence number
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AddressingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of one addressing attempt
pub type AddressingOutcome = Result<AddressLease, String>;

/// Addressing worker owned by the tracker
pub struct AddressingWorker {
    driver: Arc<dyn DriverControl>,
    interface: String,
    inbox: mpsc::UnboundedSender<TrackerInput>,
    next_token: u64,
    live: Option<AddressingToken>,
}

impl AddressingWorker {
    /// Create a new addressing worker
    ///
    /// # Parameters
    ///
    /// - `driver`: Driver providing the addressing primitives
    /// - `interface`: Interface to configure
    /// - `inbox`: Tracker input queue completions are posted to
    pub fn new(
        driver: Arc<dyn DriverControl>,
        interface: impl Into<String>,
        inbox: mpsc::UnboundedSender<TrackerInput>,
    ) -> Self {
        Self {
            driver,
            interface: interface.into(),
            inbox,
            next_token: 0,
            live: None,
        }
    }

    fn mint(&mut self) -> AddressingToken {
        self.next_token += 1;
        let token = AddressingToken(self.next_token);
        if let Some(previous) = self.live.replace(token) {
            debug!("Addressing attempt {} superseded by {}", previous, token);
        }
        token
    }

    /// Start a dynamic acquisition attempt
    ///
    /// Posts `AddressingStarted` when the blocking call begins and exactly
    /// one `AddressingCompleted` when it returns, both tagged with the
    /// returned token. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> AddressingToken {
        let token = self.mint();
        let driver = Arc::clone(&self.driver);
        let interface = self.interface.clone();
        let inbox = self.inbox.clone();

        info!("Addressing {}: DHCP request started on {}", token, interface);

        tokio::task::spawn_blocking(move || {
            let _ = inbox.send(TrackerInput::AddressingStarted(token));

            let outcome = driver.acquire_lease(&interface).map_err(|e| e.to_string());
            match &outcome {
                Ok(lease) => debug!("Addressing {}: DHCP request succeeded: {}", token, lease),
                Err(e) => info!("Addressing {}: DHCP request failed: {}", token, e),
            }

            // The tracker may be gone by now; nothing left to notify then.
            let _ = inbox.send(TrackerInput::AddressingCompleted { token, outcome });
        });

        token
    }

    /// Apply a static configuration synchronously
    ///
    /// The outcome is still posted through the tracker's input queue, tagged
    /// with a fresh live token.
    pub fn configure_static(&mut self, config: &StaticAddressConfig) -> AddressingToken {
        let token = self.mint();

        let outcome = if self.driver.configure_static(&self.interface, config) {
            debug!("Addressing {}: static configuration succeeded", token);
            Ok(config.lease)
        } else {
            let reason = self
                .driver
                .last_error()
                .unwrap_or_else(|| "static configuration rejected by driver".to_string());
            warn!("Addressing {}: static configuration failed: {}", token, reason);
            Err(reason)
        };

        let _ = self
            .inbox
            .send(TrackerInput::AddressingCompleted { token, outcome });
        token
    }

    /// Invalidate the live attempt, if any
    pub fn cancel(&mut self) -> Option<AddressingToken> {
        let cancelled = self.live.take();
        if let Some(token) = cancelled {
            debug!("Addressing {} cancelled", token);
        }
        cancelled
    }

    /// Whether `token` identifies the live attempt
    pub fn is_live(&self, token: AddressingToken) -> bool {
        self.live == Some(token)
    }

    /// Consume the live token if `token` matches it
    ///
    /// Returns `false` for stale completions, which must be discarded.
    pub fn complete(&mut self, token: AddressingToken) -> bool {
        if self.is_live(token) {
            self.live = None;
            true
        } else {
            false
        }
    }

    /// The live token, if any
    pub fn live(&self) -> Option<AddressingToken> {
        self.live
    }
}
