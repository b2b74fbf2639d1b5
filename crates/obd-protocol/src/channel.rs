//! Command Channel
//!
//! Serializes request/response exchanges over a [`Link`]. The adapter can
//! only work on one command at a time, so callers queue on an async mutex
//! that also owns the link's event receiver.

use crate::error::ObdError;
use crate::link::{Link, LinkEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Default timeout for OBD commands
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Line terminator expected by ELM327 adapters
const TERMINATOR: &str = "\r";

/// One-command-at-a-time request/response channel
pub struct CommandChannel {
    link: Arc<dyn Link>,
    events: Mutex<broadcast::Receiver<LinkEvent>>,
    timeout: Duration,
}

impl CommandChannel {
    /// Create a channel with the default timeout
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self::with_timeout(link, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    /// Create a channel with a custom timeout
    pub fn with_timeout(link: Arc<dyn Link>, timeout: Duration) -> Self {
        let events = Mutex::new(link.subscribe());
        Self {
            link,
            events,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// Send `command` and wait for the adapter's answer
    pub async fn send(&self, command: &str) -> Result<String, ObdError> {
        let mut events = self.events.lock().await;

        // anything queued now answers an earlier, abandoned command
        loop {
            match events.try_recv() {
                Ok(LinkEvent::Data(stale)) => debug!("Discarding stale response {:?}", stale),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if !self.link.is_connected() {
            return Err(ObdError::LinkUnavailable);
        }

        debug!("Sending command {}", command);
        self.link.send(&format!("{}{}", command, TERMINATOR))?;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(LinkEvent::Data(text)) => return Ok(text),
                    Ok(LinkEvent::Disconnected) | Err(RecvError::Closed) => {
                        return Err(ObdError::LinkUnavailable)
                    }
                    Ok(LinkEvent::Connected) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Command channel lagged, {} events dropped", skipped);
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Command {} timed out after {:?}", command, self.timeout);
                Err(ObdError::CommandTimeout(self.timeout.as_millis() as u64))
            }
        }
    }
}
