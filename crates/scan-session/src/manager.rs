//! Scan Session Manager Implementation

use crate::config::ScanConfig;
use crate::consent::ConsentOracle;
use crate::error::ScanError;
use crate::events::{ScanEvent, EVENT_CAPACITY};
use crate::poller::Poller;
use crate::session::ScanSession;
use crate::store::ScanStore;
use alerting::AlertManager;
use obd_protocol::{
    discover, CommandChannel, Link, LinkEvent, ObdError, ParameterRegistry, ReadingDecoder,
    VehicleInfo, UNKNOWN_VEHICLE,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Connected,
    Scanning,
    Stopped,
}

/// State shared between the manager, the polling loop and the link monitor
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub state: ScanState,
    /// Present while a vehicle is discovered
    pub vehicle: Option<VehicleInfo>,
}

struct ActiveScan {
    stop: watch::Sender<bool>,
    handle: JoinHandle<ScanSession>,
}

/// Drives discovery and scan sessions over one adapter link
pub struct ScanSessionManager {
    config: ScanConfig,
    channel: Arc<CommandChannel>,
    registry: Arc<ParameterRegistry>,
    store: Arc<dyn ScanStore>,
    consent: Arc<dyn ConsentOracle>,
    alerts: Arc<Mutex<AlertManager>>,
    events: broadcast::Sender<ScanEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Option<ActiveScan>,
    monitor: Option<JoinHandle<()>>,
}

impl ScanSessionManager {
    /// Create a manager with the standard parameter registry
    pub fn new(
        config: ScanConfig,
        link: Arc<dyn Link>,
        store: Arc<dyn ScanStore>,
        consent: Arc<dyn ConsentOracle>,
    ) -> Self {
        let channel = Arc::new(CommandChannel::with_timeout(link, config.command_timeout()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::default());
        let alerts = AlertManager::new(config.alerts.clone());

        Self {
            config,
            channel,
            registry: Arc::new(ParameterRegistry::standard()),
            store,
            consent,
            alerts: Arc::new(Mutex::new(alerts)),
            events,
            state: Arc::new(state),
            active: None,
            monitor: None,
        }
    }

    /// Replace the parameter registry
    pub fn with_registry(mut self, registry: ParameterRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ScanState {
        self.state.borrow().state
    }

    /// Vehicle found by the last successful discovery
    pub fn vehicle_info(&self) -> Option<VehicleInfo> {
        self.state.borrow().vehicle.clone()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Mark alerts for a parameter code as acknowledged
    pub fn acknowledge_alert(&self, code: &str) -> bool {
        self.lock_alerts().acknowledge(code)
    }

    /// Parameter codes with unacknowledged alerts
    pub fn pending_alerts(&self) -> Vec<String> {
        let alerts = self.lock_alerts();
        let mut codes: Vec<String> = alerts
            .get_pending()
            .into_iter()
            .map(|(code, _)| code.to_string())
            .collect();
        codes.sort();
        codes
    }

    fn lock_alerts(&self) -> std::sync::MutexGuard<'_, AlertManager> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the adapter handshake and characterize the vehicle
    pub async fn connect(&mut self) -> Result<VehicleInfo, ScanError> {
        self.reap().await;
        if self.active.is_some() {
            return Err(ScanError::SessionActive);
        }

        if !self.channel.link().is_connected() {
            self.set_idle();
            return Err(ObdError::LinkUnavailable.into());
        }

        // watch for drops during the handshake too
        self.spawn_monitor();

        let vehicle = match discover(&self.channel, &self.config.discovery()).await {
            Ok(vehicle) => vehicle,
            Err(e) => {
                error!("Discovery failed: {}", e);
                self.set_idle();
                return Err(e.into());
            }
        };
        if !self.channel.link().is_connected() {
            error!("Link lost during discovery");
            self.set_idle();
            return Err(ObdError::LinkUnavailable.into());
        }

        info!(
            "Connected to vehicle {} over {} ({} parameters supported)",
            vehicle.vin.as_deref().unwrap_or(UNKNOWN_VEHICLE),
            vehicle.protocol,
            vehicle.supported_pids.len()
        );

        self.state.send_modify(|current| {
            current.state = ScanState::Connected;
            current.vehicle = Some(vehicle.clone());
        });
        let _ = self.events.send(ScanEvent::Discovered(vehicle.clone()));

        Ok(vehicle)
    }

    /// Open a session and start the polling loop
    pub async fn start_scan(&mut self) -> Result<ScanSession, ScanError> {
        self.reap().await;
        if self.active.is_some() {
            return Err(ScanError::SessionActive);
        }

        let current = self.state.borrow().clone();
        let vehicle = match (current.state, current.vehicle) {
            (ScanState::Connected | ScanState::Stopped, Some(vehicle)) => vehicle,
            (state, _) => return Err(ScanError::NotConnected(state)),
        };
        if !self.channel.link().is_connected() {
            return Err(ObdError::LinkUnavailable.into());
        }

        let consent_verified = self.consent.has_valid_consent();
        if self.config.research_mode && !consent_verified {
            warn!("Research scan refused: no valid consent");
            return Err(ScanError::ConsentRequired);
        }

        let selected_pids = self.resolve_selection(&vehicle)?;
        let session = ScanSession::start(
            vehicle.vin.as_deref().unwrap_or(UNKNOWN_VEHICLE),
            &self.config.adapter.device,
            &self.config.adapter.name,
            &vehicle.protocol,
            selected_pids,
            consent_verified,
        );
        info!("Starting scan session {}", session.id);

        self.store.store_scan_session(&session);
        self.state.send_modify(|current| current.state = ScanState::Scanning);
        let _ = self.events.send(ScanEvent::ScanStarted(session.clone()));

        let (stop, stop_rx) = watch::channel(false);
        let poller = Poller {
            channel: self.channel.clone(),
            decoder: ReadingDecoder::new(self.registry.clone()),
            store: self.store.clone(),
            alerts: self.alerts.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            interval: self.config.poll_interval(),
            max_duration: self.config.max_session_duration(),
        };
        let handle = tokio::spawn(poller.run(session.clone(), stop_rx));
        self.active = Some(ActiveScan { stop, handle });

        Ok(session)
    }

    /// Stop the active session and return it, closed
    ///
    /// Returns `None` when nothing is running, including sessions that
    /// already ended on their own.
    pub async fn stop_scan(&mut self) -> Option<ScanSession> {
        self.reap().await;
        let active = self.active.take()?;

        if active.stop.send(true).is_err() {
            debug!("Polling task already gone");
        }
        match active.handle.await {
            Ok(session) => Some(session),
            Err(e) => {
                error!("Polling task failed: {}", e);
                None
            }
        }
    }

    /// Stop any scan and forget the vehicle
    pub async fn disconnect(&mut self) {
        self.stop_scan().await;
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.set_idle();
        info!("Disconnected");
    }

    /// Selected codes in canonical form, or every supported registry code
    fn resolve_selection(&self, vehicle: &VehicleInfo) -> Result<Vec<String>, ScanError> {
        if self.config.selected_pids.is_empty() {
            return Ok(self
                .registry
                .all()
                .filter(|definition| vehicle.supports(definition.code))
                .map(|definition| definition.code.to_string())
                .collect());
        }

        self.config
            .selected_pids
            .iter()
            .map(|code| {
                self.registry
                    .lookup(code)
                    .map(|definition| definition.code.to_string())
                    .ok_or_else(|| ScanError::from(ObdError::UnknownParameter(code.clone())))
            })
            .collect()
    }

    /// Drop a polling task that finished on its own
    async fn reap(&mut self) {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.handle.is_finished());
        if !finished {
            return;
        }
        if let Some(active) = self.active.take() {
            match active.handle.await {
                Ok(session) => debug!("Reaped finished session {}", session.id),
                Err(e) => error!("Polling task failed: {}", e),
            }
        }
    }

    fn set_idle(&self) {
        self.state.send_modify(|current| {
            current.state = ScanState::Idle;
            current.vehicle = None;
        });
    }

    /// Watch the link for drops outside the polling loop
    fn spawn_monitor(&mut self) {
        if self.monitor.as_ref().is_some_and(|monitor| !monitor.is_finished()) {
            return;
        }

        let mut link_events = self.channel.link().subscribe();
        let state = self.state.clone();
        let events = self.events.clone();

        self.monitor = Some(tokio::spawn(async move {
            loop {
                match link_events.recv().await {
                    Ok(LinkEvent::Disconnected) => {
                        warn!("Adapter disconnected");
                        // an active loop settles the state itself
                        state.send_modify(|current| {
                            if current.state != ScanState::Scanning {
                                current.state = ScanState::Idle;
                                current.vehicle = None;
                            }
                        });
                        let _ = events.send(ScanEvent::AdapterDisconnected);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }
}

impl Drop for ScanSessionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop.send(true);
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::StaticConsent;
    use crate::events::ScanFailure;
    use obd_protocol::mock::MockLink;
    use obd_protocol::Reading;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MemoryStore {
        readings: Mutex<Vec<Reading>>,
        sessions: Mutex<Vec<ScanSession>>,
    }

    impl ScanStore for MemoryStore {
        fn store_reading(&self, reading: &Reading) {
            self.readings.lock().unwrap().push(reading.clone());
        }

        fn store_scan_session(&self, session: &ScanSession) {
            self.sessions.lock().unwrap().push(session.clone());
        }
    }

    fn test_config(codes: &[&str]) -> ScanConfig {
        ScanConfig {
            reset_settle_ms: 10,
            selected_pids: codes.iter().map(|code| code.to_string()).collect(),
            ..Default::default()
        }
    }

    fn manager(
        link: &Arc<MockLink>,
        config: ScanConfig,
        consent: bool,
    ) -> (ScanSessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let manager = ScanSessionManager::new(
            config,
            link.clone(),
            store.clone(),
            Arc::new(StaticConsent(consent)),
        );
        (manager, store)
    }

    fn drain(events: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    async fn wait_for_stop(events: &mut broadcast::Receiver<ScanEvent>) -> ScanSession {
        loop {
            if let Ok(ScanEvent::ScanStopped(session)) = events.recv().await {
                return session;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_discovers_vehicle() {
        let link = MockLink::elm327();
        let (mut manager, _) = manager(&link, test_config(&["0C"]), true);
        let mut events = manager.subscribe();

        let vehicle = manager.connect().await.unwrap();
        assert_eq!(vehicle.vin.as_deref(), Some("1HGCM82633A004352"));
        assert!(vehicle.supports("0C"));
        assert_eq!(manager.state(), ScanState::Connected);
        assert_eq!(manager.vehicle_info(), Some(vehicle));
        assert!(matches!(events.recv().await.unwrap(), ScanEvent::Discovered(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_discovery_stays_idle() {
        let link = MockLink::new();
        let (mut manager, _) = manager(&link, test_config(&["0C"]), true);

        let result = manager.connect().await;
        assert!(matches!(
            result,
            Err(ScanError::Protocol(ObdError::DiscoveryFailed(_)))
        ));
        assert_eq!(manager.state(), ScanState::Idle);
        assert!(manager.vehicle_info().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_connection() {
        let link = MockLink::elm327();
        let (mut manager, store) = manager(&link, test_config(&["0C"]), true);

        let result = manager.start_scan().await;
        assert!(matches!(result, Err(ScanError::NotConnected(ScanState::Idle))));
        assert!(store.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consent_required_in_research_mode() {
        let link = MockLink::elm327();
        let config = ScanConfig {
            research_mode: true,
            ..test_config(&["0C"])
        };
        let (mut manager, store) = manager(&link, config, false);
        manager.connect().await.unwrap();

        let result = manager.start_scan().await;
        assert!(matches!(result, Err(ScanError::ConsentRequired)));
        assert!(store.sessions.lock().unwrap().is_empty());
        assert_eq!(manager.state(), ScanState::Connected);
        assert!(manager.stop_scan().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_parameter_rejected() {
        let link = MockLink::elm327();
        let (mut manager, store) = manager(&link, test_config(&["0C", "ZZ"]), true);
        manager.connect().await.unwrap();

        let result = manager.start_scan().await;
        assert!(matches!(
            result,
            Err(ScanError::Protocol(ObdError::UnknownParameter(code))) if code == "ZZ"
        ));
        assert!(store.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let link = MockLink::elm327();
        let (mut manager, _) = manager(&link, test_config(&["0C"]), true);
        manager.connect().await.unwrap();

        manager.start_scan().await.unwrap();
        assert!(matches!(
            manager.start_scan().await,
            Err(ScanError::SessionActive)
        ));
        manager.stop_scan().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_statistics() {
        let link = MockLink::elm327();
        link.respond_after("010C", "41 0C 1A F8", Duration::from_millis(50));
        link.respond_after("010D", "41 0D 3C", Duration::from_millis(50));
        let (mut manager, store) = manager(&link, test_config(&["0C", "0D"]), true);
        manager.connect().await.unwrap();

        let started = manager.start_scan().await.unwrap();
        assert_eq!(manager.state(), ScanState::Scanning);
        assert!(started.end_time.is_none());

        // ticks at 0, 1000 and 2000 ms
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let session = manager.stop_scan().await.unwrap();

        assert_eq!(session.id, started.id);
        assert_eq!(session.total_readings, 6);
        assert_eq!(session.errors, 0);
        assert_eq!(session.vehicle_id, "1HGCM82633A004352");

        let readings = store.readings.lock().unwrap().clone();
        assert_eq!(readings.len(), 6);
        let mean = readings
            .iter()
            .map(|reading| reading.metadata.response_time_ms)
            .sum::<f64>()
            / readings.len() as f64;
        assert!((session.average_response_time_ms - mean).abs() < 1e-6);
        assert!(session.average_response_time_ms >= 50.0);
        assert!(session.average_response_time_ms < 52.0);

        let rpm = readings.iter().find(|reading| reading.code == "0C").unwrap();
        assert_eq!(rpm.value, 1726.0);
        assert_eq!(rpm.session_id, Some(session.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_one_error_and_continues() {
        let link = MockLink::elm327();
        link.silence("010C");
        let config = ScanConfig {
            command_timeout_ms: 200,
            ..test_config(&["0C", "0D"])
        };
        let (mut manager, _) = manager(&link, config, true);
        manager.connect().await.unwrap();
        let mut events = manager.subscribe();

        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let session = manager.stop_scan().await.unwrap();

        assert_eq!(session.errors, 1);
        assert_eq!(session.total_readings, 1);
        assert_eq!(link.sent_count("010D"), 1);

        let failures: Vec<ScanFailure> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                ScanEvent::ScanError(failure) => Some(failure),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code, "0C");
        assert_eq!(failures[0].error, ObdError::CommandTimeout(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_an_error() {
        let link = MockLink::elm327();
        link.respond("010D", "NO DATA");
        let (mut manager, _) = manager(&link, test_config(&["0C", "0D"]), true);
        manager.connect().await.unwrap();

        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let session = manager.stop_scan().await.unwrap();

        assert_eq!(session.errors, 0);
        assert_eq!(session.total_readings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_is_noop() {
        let link = MockLink::elm327();
        let (mut manager, store) = manager(&link, test_config(&["0C"]), true);
        manager.connect().await.unwrap();
        manager.start_scan().await.unwrap();

        let session = manager.stop_scan().await.unwrap();
        let ended = session.end_time.unwrap();
        assert_eq!(manager.state(), ScanState::Stopped);
        assert!(manager.stop_scan().await.is_none());

        // stored once at start and once at stop
        let sessions = store.sessions.lock().unwrap().clone();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].end_time.is_none());
        assert_eq!(sessions[1].end_time, Some(ended));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_raises_one_alert() {
        let mut coolant = *ParameterRegistry::standard().lookup("05").unwrap();
        coolant.valid_max = 100.0;

        let link = MockLink::elm327();
        link.respond("0105", "41 05 FF");
        let (manager, _) = manager(&link, test_config(&["05"]), true);
        let mut manager = manager.with_registry(ParameterRegistry::new(vec![coolant]));
        manager.connect().await.unwrap();
        let mut events = manager.subscribe();

        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let session = manager.stop_scan().await.unwrap();

        assert_eq!(session.total_readings, 1);
        assert_eq!(session.errors, 0);

        let alerts: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                ScanEvent::ReadingAlert(alert) => Some(alert),
                _ => None,
            })
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].reading.value, 215.0);
        assert!(alerts[0].reading.is_out_of_range());

        assert_eq!(manager.pending_alerts(), vec!["05".to_string()]);
        assert!(manager.acknowledge_alert("05"));
        assert!(manager.pending_alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_auto_stops() {
        let link = MockLink::elm327();
        let config = ScanConfig {
            max_session_duration_ms: 1000,
            ..test_config(&["0C"])
        };
        let (mut manager, store) = manager(&link, config, true);
        manager.connect().await.unwrap();
        let mut events = manager.subscribe();

        let begin = Instant::now();
        manager.start_scan().await.unwrap();
        let session = wait_for_stop(&mut events).await;

        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1002));
        assert!(session.end_time.is_some());
        assert_eq!(manager.state(), ScanState::Stopped);
        assert_eq!(store.sessions.lock().unwrap().len(), 2);
        assert!(manager.stop_scan().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_scan_returns_to_idle() {
        let link = MockLink::elm327();
        let (mut manager, _) = manager(&link, test_config(&["0C", "0D"]), true);
        manager.connect().await.unwrap();
        let mut events = manager.subscribe();

        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        link.disconnect();

        let mut stopped = None;
        let mut notified = false;
        while stopped.is_none() || !notified {
            match events.recv().await.unwrap() {
                ScanEvent::ScanStopped(session) => stopped = Some(session),
                ScanEvent::AdapterDisconnected => notified = true,
                _ => {}
            }
        }

        assert!(stopped.unwrap().end_time.is_some());
        assert_eq!(manager.state(), ScanState::Idle);
        assert!(manager.vehicle_info().is_none());

        assert!(manager.stop_scan().await.is_none());
        assert!(matches!(
            manager.start_scan().await,
            Err(ScanError::NotConnected(ScanState::Idle))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connected() {
        let link = MockLink::elm327();
        let (mut manager, _) = manager(&link, test_config(&["0C"]), true);
        manager.connect().await.unwrap();
        let mut state = manager.watch_state();

        link.disconnect();
        state
            .wait_for(|current| current.state == ScanState::Idle)
            .await
            .unwrap();
        assert!(manager.vehicle_info().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_selection_uses_supported_parameters() {
        let link = MockLink::elm327();
        let (mut manager, _) = manager(&link, test_config(&[]), true);
        manager.connect().await.unwrap();

        let session = manager.start_scan().await.unwrap();
        assert!(session.selected_pids.contains(&"0C".to_string()));
        assert!(session.selected_pids.contains(&"42".to_string()));
        // registered but not supported by the mock vehicle
        assert!(!session.selected_pids.contains(&"0A".to_string()));
        manager.disconnect().await;
        assert_eq!(manager.state(), ScanState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_during_discovery() {
        let link = MockLink::elm327();
        // VIN query is sent after the 10 ms settle and answers at 110 ms
        link.respond_after("0902", "NO DATA", Duration::from_millis(100));
        let (mut manager, _) = manager(&link, test_config(&["0C"]), true);
        let mut events = manager.subscribe();

        let dropper = {
            let link = link.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                link.disconnect();
            })
        };

        let result = manager.connect().await;
        dropper.await.unwrap();
        assert!(matches!(
            result,
            Err(ScanError::Protocol(ObdError::LinkUnavailable))
        ));
        assert_eq!(manager.state(), ScanState::Idle);
        assert!(manager.vehicle_info().is_none());

        let mut discovered = false;
        let notified = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match events.recv().await {
                    Ok(ScanEvent::AdapterDisconnected) => return,
                    Ok(ScanEvent::Discovered(_)) => discovered = true,
                    _ => {}
                }
            }
        })
        .await;
        assert!(notified.is_ok());
        assert!(!discovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_tick_sends_nothing_further() {
        let link = MockLink::elm327();
        link.respond_after("010C", "41 0C 1A F8", Duration::from_millis(100));
        let (mut manager, _) = manager(&link, test_config(&["0C", "0D", "05"]), true);
        manager.connect().await.unwrap();

        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = manager.stop_scan().await.unwrap();

        // the in-flight query completes, the rest of the tick is abandoned
        assert_eq!(session.total_readings, 1);
        assert_eq!(link.sent_count("010C"), 1);
        assert_eq!(link.sent_count("010D"), 0);
        assert_eq!(link.sent_count("0105"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_vehicle_throttles_ticks() {
        let link = MockLink::elm327();
        link.respond_after("010C", "41 0C 1A F8", Duration::from_millis(250));
        let config = ScanConfig {
            poll_interval_ms: 100,
            ..test_config(&["0C"])
        };
        let (mut manager, store) = manager(&link, config, true);
        manager.connect().await.unwrap();
        let sent_before = link.sent_commands().len();

        // queries start at 0, 250, 500 and 750 ms instead of every 100 ms
        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        let session = manager.stop_scan().await.unwrap();

        assert_eq!(session.total_readings, 4);
        assert_eq!(session.errors, 0);
        assert_eq!(link.sent_count("010C"), 4);
        assert_eq!(link.sent_commands().len() - sent_before, 4);

        // every answer was matched to its own query
        let readings = store.readings.lock().unwrap().clone();
        assert_eq!(readings.len(), 4);
        for reading in readings {
            assert!(reading.metadata.response_time_ms >= 250.0);
            assert_eq!(reading.value, 1726.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_before_polling_starts() {
        // nothing in this registry is supported, so the selection is empty
        let fuel_pressure = *ParameterRegistry::standard().lookup("0A").unwrap();
        let link = MockLink::elm327();
        let (manager, _) = manager(&link, test_config(&[]), true);
        let mut manager = manager.with_registry(ParameterRegistry::new(vec![fuel_pressure]));
        manager.connect().await.unwrap();
        let mut events = manager.subscribe();

        let session = manager.start_scan().await.unwrap();
        assert!(session.selected_pids.is_empty());
        link.disconnect();

        let stopped = tokio::time::timeout(Duration::from_secs(5), wait_for_stop(&mut events))
            .await
            .unwrap();
        assert_eq!(stopped.id, session.id);
        assert_eq!(manager.state(), ScanState::Idle);
        assert!(manager.vehicle_info().is_none());
    }
}

