//! Serial Link for ELM327 Adapters
//!
//! Wraps a `tokio-serial` stream. Outgoing text is queued to a writer task;
//! a reader task collects bytes up to the `>` prompt and publishes each
//! complete answer as one [`LinkEvent::Data`].

use crate::error::ObdError;
use crate::link::{Link, LinkEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

/// ELM327 ready prompt
const PROMPT: u8 = b'>';

/// Bytes buffered while waiting for a prompt before the buffer is dropped
const MAX_PENDING: usize = 4096;

/// Capacity of the inbound event stream
const EVENT_CAPACITY: usize = 64;

/// Serial port link (USB, or an already bound RFCOMM device)
pub struct SerialLink {
    device: String,
    connected: Arc<AtomicBool>,
    outgoing: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<LinkEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SerialLink {
    /// Open a serial device and start the reader/writer tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(device: &str, baud_rate: u32) -> Result<Arc<Self>, ObdError> {
        info!("Opening serial link on {} at {} baud", device, baud_rate);
        let stream = tokio_serial::new(device, baud_rate).open_native_async()?;
        let (reader, writer) = tokio::io::split(stream);

        let connected = Arc::new(AtomicBool::new(true));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(write_loop(writer, outgoing_rx, connected.clone(), events.clone())),
            tokio::spawn(read_loop(reader, connected.clone(), events.clone())),
        ];

        let _ = events.send(LinkEvent::Connected);

        Ok(Arc::new(Self {
            device: device.to_string(),
            connected,
            outgoing,
            events,
            tasks,
        }))
    }

    /// Device path this link was opened on
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Link for SerialLink {
    fn send(&self, text: &str) -> Result<(), ObdError> {
        if !self.is_connected() {
            return Err(ObdError::LinkUnavailable);
        }
        self.outgoing
            .send(text.to_string())
            .map_err(|_| ObdError::LinkUnavailable)
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn mark_disconnected(connected: &AtomicBool, events: &broadcast::Sender<LinkEvent>) {
    if connected.swap(false, Ordering::SeqCst) {
        warn!("Serial link disconnected");
        let _ = events.send(LinkEvent::Disconnected);
    }
}

async fn write_loop(
    mut writer: WriteHalf<SerialStream>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<LinkEvent>,
) {
    while let Some(text) = outgoing.recv().await {
        debug!("Serial write: {:?}", text);
        let result = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            error!("Serial write failed: {}", e);
            mark_disconnected(&connected, &events);
            break;
        }
    }
}

/// Cuts the adapter's byte stream into prompt-terminated answers
#[derive(Debug, Default)]
struct PromptFramer {
    pending: Vec<u8>,
}

impl PromptFramer {
    /// Feed received bytes, returning every answer completed by a prompt
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut answers = Vec::new();
        for &byte in bytes {
            if byte == PROMPT {
                let text = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if !text.is_empty() {
                    answers.push(text);
                }
            } else if byte != 0 {
                if self.pending.len() >= MAX_PENDING {
                    warn!("No prompt after {} bytes, dropping buffered input", MAX_PENDING);
                    self.pending.clear();
                }
                self.pending.push(byte);
            }
        }
        answers
    }
}

async fn read_loop(
    mut reader: ReadHalf<SerialStream>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<LinkEvent>,
) {
    let mut buffer = [0u8; 256];
    let mut framer = PromptFramer::default();

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => {
                info!("Serial link closed by device");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                error!("Serial read failed: {}", e);
                break;
            }
        };

        for text in framer.push(&buffer[..n]) {
            debug!("Serial response: {:?}", text);
            let _ = events.send(LinkEvent::Data(text));
        }
    }

    mark_disconnected(&connected, &events);
}
