//! Live packet capture producer.
//!
//! A `dumpcap` child process writes a legacy pcap stream to stdout; the
//! capture thread decodes it incrementally, parses each frame and publishes
//! flow events into the ring. Capture failure is fatal to this thread only:
//! it is reported through [`CaptureHealth`] so the UI can warn instead of
//! crashing.

use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use thiserror::Error;

use crate::parse;
use crate::ring::Producer;

/// Snap length: enough for Ethernet + IPv6 + transport ports, with headroom.
/// The true packet size still arrives via the pcap record's original length.
const SNAPLEN: &str = "128";

const READER_BUFFER: usize = 65536;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn dumpcap (is it installed and runnable?): {0}")]
    Spawn(std::io::Error),
    #[error("malformed pcap stream: {0}")]
    Decode(String),
    #[error("failed to start capture thread: {0}")]
    Thread(std::io::Error),
}

/// Producer-side health, read by the UI to degrade gracefully when the
/// capture could not start (typically missing privileges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Starting,
    Running,
    Failed(String),
}

pub struct CaptureHealth(Mutex<CaptureStatus>);

impl CaptureHealth {
    pub fn new() -> Self {
        CaptureHealth(Mutex::new(CaptureStatus::Starting))
    }

    pub fn set(&self, status: CaptureStatus) {
        *self.0.lock().unwrap() = status;
    }

    pub fn status(&self) -> CaptureStatus {
        self.0.lock().unwrap().clone()
    }
}

impl Default for CaptureHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// A source of raw link-layer frames.
///
/// Implementations block inside [`run`](PacketSource::run) and hand every
/// frame to the sink together with its true on-wire length. The closure
/// returned by `interrupter` must unblock a pending read from another thread
/// so shutdown cannot hang.
pub trait PacketSource: Send {
    fn run(
        &mut self,
        stop: &AtomicBool,
        sink: &mut dyn FnMut(&[u8], u32),
    ) -> Result<(), CaptureError>;

    fn interrupter(&self) -> Box<dyn Fn() + Send + Sync>;
}

/// Captures by spawning `dumpcap` in promiscuous mode with a BPF filter,
/// decoding the pcap stream from its stdout.
pub struct DumpcapSource {
    child: Arc<Mutex<Child>>,
    stdout: Option<ChildStdout>,
}

impl DumpcapSource {
    pub fn open(interface: &str, filter: &str) -> Result<Self, CaptureError> {
        let mut child = Command::new("dumpcap")
            .args(["-i", interface, "-f", filter, "-s", SNAPLEN, "-F", "pcap", "-n", "-q", "-w", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CaptureError::Spawn)?;
        let stdout = child.stdout.take();
        tracing::info!(interface, filter, "dumpcap started");
        Ok(DumpcapSource { child: Arc::new(Mutex::new(child)), stdout })
    }
}

impl PacketSource for DumpcapSource {
    fn run(
        &mut self,
        stop: &AtomicBool,
        sink: &mut dyn FnMut(&[u8], u32),
    ) -> Result<(), CaptureError> {
        let stdout = match self.stdout.take() {
            Some(stdout) => stdout,
            None => return Err(CaptureError::Decode("capture stdout already taken".into())),
        };
        let mut reader = LegacyPcapReader::new(READER_BUFFER, stdout)
            .map_err(|e| CaptureError::Decode(format!("{e:?}")))?;

        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            match reader.next() {
                Ok((offset, block)) => {
                    if let PcapBlockOwned::Legacy(record) = block {
                        sink(record.data, record.origlen);
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => return Ok(()),
                Err(PcapError::Incomplete(_)) => {
                    if let Err(e) = reader.refill() {
                        // A killed child closes the pipe mid-record; treat it
                        // as end of stream when we were asked to stop.
                        if stop.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        return Err(CaptureError::Decode(format!("{e:?}")));
                    }
                }
                Err(e) => return Err(CaptureError::Decode(format!("{e:?}"))),
            }
        }
    }

    fn interrupter(&self) -> Box<dyn Fn() + Send + Sync> {
        let child = self.child.clone();
        Box::new(move || {
            if let Ok(mut child) = child.lock() {
                let _ = child.kill();
            }
        })
    }
}

impl Drop for DumpcapSource {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Running capture thread plus the controls to stop it.
pub struct SnifferHandle {
    stop: Arc<AtomicBool>,
    interrupt: Box<dyn Fn() + Send + Sync>,
    join: Option<JoinHandle<()>>,
}

impl SnifferHandle {
    /// Signals the producer loop, unblocks any pending read and joins the
    /// thread.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        (self.interrupt)();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Spawns the capture/producer thread.
///
/// Frames flow source -> parser -> ring. Ring-full drops are counted by the
/// ring itself; parse rejects are silent by design.
pub fn spawn_sniffer(
    mut source: impl PacketSource + 'static,
    mut tx: Producer,
    health: Arc<CaptureHealth>,
) -> Result<SnifferHandle, CaptureError> {
    let stop = Arc::new(AtomicBool::new(false));
    let interrupt = source.interrupter();
    let thread_stop = stop.clone();

    let join = std::thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            health.set(CaptureStatus::Running);
            let mut sink = |frame: &[u8], wire_len: u32| {
                if let Some(rec) = parse::parse_frame(frame, wire_len) {
                    if let Some(mut slot) = tx.claim() {
                        slot.src = rec.src;
                        slot.src_port = rec.src_port;
                        slot.dst = rec.dst;
                        slot.dst_port = rec.dst_port;
                        slot.proto = rec.proto;
                        slot.wire_len = rec.wire_len;
                        slot.ts_millis = now_millis();
                        slot.commit();
                    }
                }
            };
            match source.run(&thread_stop, &mut sink) {
                Ok(()) => tracing::info!("capture stream ended"),
                Err(e) => {
                    tracing::error!("capture failed: {e}");
                    health.set(CaptureStatus::Failed(e.to_string()));
                }
            }
        })
        .map_err(CaptureError::Thread)?;

    Ok(SnifferHandle { stop, interrupt, join: Some(join) })
}
