//! Polling Loop

use crate::events::{ScanEvent, ScanFailure};
use crate::manager::{ConnectionState, ScanState};
use crate::session::ScanSession;
use crate::store::ScanStore;
use alerting::AlertManager;
use chrono::Utc;
use obd_protocol::{CommandChannel, LinkEvent, ObdError, ReadingDecoder};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Expired,
    Disconnected,
}

/// Periodic driver for one scan session
///
/// Owns the session while it runs and hands it back, closed, when the
/// loop ends.
pub(crate) struct Poller {
    pub channel: Arc<CommandChannel>,
    pub decoder: ReadingDecoder,
    pub store: Arc<dyn ScanStore>,
    pub alerts: Arc<Mutex<AlertManager>>,
    pub events: broadcast::Sender<ScanEvent>,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub interval: Duration,
    pub max_duration: Duration,
}

impl Poller {
    /// Poll until stopped, expired or disconnected
    pub async fn run(self, mut session: ScanSession, mut stop: watch::Receiver<bool>) -> ScanSession {
        let mut link_events = self.channel.link().subscribe();
        let deadline = Instant::now() + self.max_duration;
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Polling {} parameters every {:?} for session {}",
            session.selected_pids.len(),
            self.interval,
            session.id
        );

        if !self.channel.link().is_connected() {
            warn!("Link lost before polling started");
            return self.finish(session, Exit::Disconnected);
        }

        let exit = loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break Exit::Stopped,
                _ = time::sleep_until(deadline) => break Exit::Expired,
                event = link_events.recv() => match event {
                    Ok(LinkEvent::Disconnected) | Err(RecvError::Closed) => break Exit::Disconnected,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                },
                _ = ticker.tick() => {
                    if let Some(exit) = self.poll_tick(&mut session, &stop, deadline).await {
                        break exit;
                    }
                }
            }
        };

        self.finish(session, exit)
    }

    /// Query every selected parameter once, in order
    async fn poll_tick(
        &self,
        session: &mut ScanSession,
        stop: &watch::Receiver<bool>,
        deadline: Instant,
    ) -> Option<Exit> {
        let codes = session.selected_pids.clone();
        for code in &codes {
            if *stop.borrow() {
                return Some(Exit::Stopped);
            }
            if Instant::now() >= deadline {
                return Some(Exit::Expired);
            }
            if !self.channel.link().is_connected() {
                return Some(Exit::Disconnected);
            }
            self.poll_parameter(session, code).await;
        }
        None
    }

    async fn poll_parameter(&self, session: &mut ScanSession, code: &str) {
        let Some(definition) = self.decoder.registry().lookup(code).copied() else {
            warn!("Skipping unregistered parameter {}", code);
            return;
        };

        let started = Instant::now();
        let result = match self.channel.send(&definition.command()).await {
            Ok(text) => self.decoder.decode(code, &text, started.elapsed()),
            Err(e) => Err(e),
        };

        match result {
            Ok(reading) => {
                let reading = reading.for_session(session.id, &session.vehicle_id);
                session.record_reading(reading.response_time());
                self.store.store_reading(&reading);
                self.emit(ScanEvent::ReadingReceived(reading.clone()));

                if reading.is_out_of_range() {
                    let alert = self
                        .alerts
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .evaluate(&reading, &definition);
                    if let Some(alert) = alert {
                        self.emit(ScanEvent::ReadingAlert(alert));
                    }
                }
            }
            Err(e) => {
                if e.is_channel_error() {
                    session.record_error();
                }
                warn!("Polling {} failed: {}", code, e);
                self.report(session, code, e);
            }
        }
    }

    fn report(&self, session: &ScanSession, code: &str, error: ObdError) {
        self.emit(ScanEvent::ScanError(ScanFailure {
            session_id: session.id,
            code: code.to_string(),
            error,
        }));
    }

    /// Close and persist the session, then settle the manager state
    fn finish(&self, mut session: ScanSession, exit: Exit) -> ScanSession {
        session.close(Utc::now());
        self.store.store_scan_session(&session);

        let lost = exit == Exit::Disconnected || !self.channel.link().is_connected();
        self.state.send_modify(|current| {
            if lost {
                current.state = ScanState::Idle;
                current.vehicle = None;
            } else {
                current.state = ScanState::Stopped;
            }
        });

        info!(
            "Session {} ended ({:?}) after {} s: {} readings, {} errors, avg {:.1} ms",
            session.id,
            exit,
            session.duration().num_seconds(),
            session.total_readings,
            session.errors,
            session.average_response_time_ms
        );
        self.emit(ScanEvent::ScanStopped(session.clone()));
        session
    }

    fn emit(&self, event: ScanEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
