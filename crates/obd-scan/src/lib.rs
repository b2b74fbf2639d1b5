//! OBD-II Scanner
//!
//! Wires a serial (or mock) adapter link, the in-memory repository and a
//! consent file into the scan engine, and prints every engine event to
//! stdout as one JSON object per line. Logs go to stderr.

use clap::Parser;
use obd_protocol::mock::MockLink;
use obd_protocol::{Link, SerialLink};
use scan_session::{
    ConsentOracle, ScanConfig, ScanError, ScanEvent, ScanSession, ScanSessionManager, ScanState,
};
use std::error::Error;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::Repository;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line options
#[derive(Debug, Clone, Default, PartialEq, Parser)]
#[command(name = "obd-scan")]
#[command(author, version, about = "Stream OBD-II readings as JSON lines")]
pub struct Options {
    /// Configuration file (TOML, YAML or JSON)
    pub config: Option<PathBuf>,

    /// File whose presence grants data-collection consent
    #[arg(long, env = "OBD_SCAN_CONSENT_FILE")]
    pub consent_file: Option<PathBuf>,

    /// Use the built-in simulated adapter instead of the serial port
    #[arg(long)]
    pub mock: bool,
}

/// Consent granted while a marker file exists
#[derive(Debug, Clone)]
pub struct ConsentFile {
    path: Option<PathBuf>,
}

impl ConsentFile {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConsentOracle for ConsentFile {
    fn has_valid_consent(&self) -> bool {
        self.path.as_ref().is_some_and(|path| path.is_file())
    }
}

/// Initialize logging
pub fn init_logging() -> Result<(), SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// Write each event to `out` as a JSON line until the channel closes
pub fn spawn_printer<W>(mut events: broadcast::Receiver<ScanEvent>, mut out: W) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => {
                        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                            warn!("Event output closed");
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, {} events dropped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Connect, scan until `shutdown` resolves or the session ends, then stop
///
/// Returns the closed session when it was stopped here, `None` when it
/// ended on its own.
pub async fn scan_until<F>(
    manager: &mut ScanSessionManager,
    shutdown: F,
) -> Result<Option<ScanSession>, ScanError>
where
    F: Future<Output = ()>,
{
    manager.connect().await?;
    manager.start_scan().await?;

    let mut state = manager.watch_state();
    tokio::select! {
        _ = shutdown => info!("Shutdown requested"),
        _ = state.wait_for(|current| current.state != ScanState::Scanning) => info!("Scan ended"),
    }

    Ok(manager.stop_scan().await)
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run one scan session end to end
pub async fn run(options: Options) -> Result<(), Box<dyn Error>> {
    let config = ScanConfig::load(options.config.as_deref())?;

    let link: Arc<dyn Link> = if options.mock {
        info!("Using simulated ELM327 adapter");
        MockLink::elm327()
    } else {
        let serial = SerialLink::open(&config.adapter.device, config.adapter.baud_rate)?;
        info!("Serial link ready on {}", serial.device());
        serial
    };

    let repository = Arc::new(Repository::new());
    let consent = Arc::new(ConsentFile::new(options.consent_file));
    let mut manager = ScanSessionManager::new(config, link, repository.clone(), consent);
    let printer = spawn_printer(manager.subscribe(), std::io::stdout());

    let stopped = scan_until(&mut manager, ctrl_c()).await;
    manager.disconnect().await;
    drop(manager);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("Event printer did not drain in time");
    }

    let session = match stopped? {
        Some(session) => Some(session),
        None => repository.sessions()?.pop(),
    };
    if let Some(session) = session {
        info!(
            "Session {}: {} readings, {} errors, avg response {:.1} ms, {} stored",
            session.id,
            session.total_readings,
            session.errors,
            session.average_response_time_ms,
            repository.readings_for_session(session.id)?.len()
        );
    }

    Ok(())
}
