//! Scripted Link for Testing
//!
//! Answers each command from a response table, optionally after a delay.
//! Commands can be silenced to provoke timeouts, and the link can be
//! dropped or restored at any point.

use crate::error::ObdError;
use crate::link::{Link, LinkEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
enum Reply {
    Text { text: String, delay: Duration },
    Silent,
}

/// Mock ELM327 link (no hardware required)
pub struct MockLink {
    connected: AtomicBool,
    events: broadcast::Sender<LinkEvent>,
    replies: Mutex<HashMap<String, Reply>>,
    sent: Mutex<Vec<String>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockLink {
    /// Create a connected link with an empty response table
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            connected: AtomicBool::new(true),
            events,
            replies: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Create a link that behaves like an ELM327 attached to a CAN vehicle
    pub fn elm327() -> Arc<Self> {
        let link = Self::new();
        link.respond("ATZ", "ELM327 v1.5");
        for command in ["ATE0", "ATL0", "ATH0", "ATS0", "ATSP0"] {
            link.respond(command, "OK");
        }
        link.respond("ATDPN", "A6");
        link.respond(
            "0902",
            "014\r0: 49 02 01 31 48 47\r1: 43 4D 38 32 36 33 33\r2: 41 30 30 34 33 35 32",
        );
        // 01-20: 04 05 06 07 0B 0C 0D 0F 10 11 1F 20
        link.respond("0100", "41 00 1E 3B 80 03");
        // 21-40: 2F 33 40
        link.respond("0120", "41 20 00 02 20 01");
        // 41-60: 42 46
        link.respond("0140", "41 40 44 00 00 00");
        link.respond("0104", "41 04 50");
        link.respond("0105", "41 05 7B");
        link.respond("010C", "41 0C 1A F8");
        link.respond("010D", "41 0D 3C");
        link.respond("010F", "41 0F 41");
        link.respond("0110", "41 10 01 F4");
        link.respond("0111", "41 11 33");
        link.respond("012F", "41 2F 80");
        link.respond("0142", "41 42 38 A4");
        link
    }

    /// Answer `command` immediately with `text`
    pub fn respond(&self, command: &str, text: &str) {
        self.respond_after(command, text, Duration::ZERO);
    }

    /// Answer `command` with `text` once `delay` has elapsed
    pub fn respond_after(&self, command: &str, text: &str, delay: Duration) {
        guard(&self.replies).insert(
            command.to_string(),
            Reply::Text {
                text: text.to_string(),
                delay,
            },
        );
    }

    /// Never answer `command`
    pub fn silence(&self, command: &str) {
        guard(&self.replies).insert(command.to_string(), Reply::Silent);
    }

    /// Drop the link and publish a disconnect event
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(LinkEvent::Disconnected);
        }
    }

    /// Restore the link and publish a connect event
    pub fn reconnect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(LinkEvent::Connected);
        }
    }

    /// Commands written so far, terminators stripped
    pub fn sent_commands(&self) -> Vec<String> {
        guard(&self.sent).clone()
    }

    /// Number of times `command` was written
    pub fn sent_count(&self, command: &str) -> usize {
        guard(&self.sent).iter().filter(|c| c.as_str() == command).count()
    }
}

impl Link for MockLink {
    fn send(&self, text: &str) -> Result<(), ObdError> {
        if !self.is_connected() {
            return Err(ObdError::LinkUnavailable);
        }

        let command = text.trim_end_matches(['\r', '\n']).to_string();
        debug!("Mock link: sent {:?}", command);
        guard(&self.sent).push(command.clone());

        let reply = guard(&self.replies).get(&command).cloned();
        let reply = reply.unwrap_or_else(|| Reply::Text {
            text: if command.starts_with("AT") { "?" } else { "NO DATA" }.to_string(),
            delay: Duration::ZERO,
        });

        match reply {
            Reply::Silent => {}
            Reply::Text { text, delay } if delay.is_zero() => {
                let _ = self.events.send(LinkEvent::Data(text));
            }
            Reply::Text { text, delay } => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(LinkEvent::Data(text));
                });
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
