//! ZMQ RF Driver for IQ Sample Exchange
//!
//! Exchanges raw `cf_t` IQ samples with srsUE and other compatible software
//! radios. Each RF channel uses a REQ socket for receive (we ask the peer for
//! samples) and a REP socket for transmit (the peer asks us for samples).

use crate::radio::{RadioInterface, RfBuffer, RfCounters, RfStats, RxMetadata};
use crate::InterfaceError;
use common::{LogThrottle, RfTimestamp};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use num_complex::Complex32;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use zmq::{Context, Socket};

/// Default sample rate (6 PRB LTE cell)
pub const DEFAULT_SAMPLE_RATE: f64 = 1.92e6;

/// Default ZMQ ports
pub const DEFAULT_TX_PORT: u16 = 2000;
pub const DEFAULT_RX_PORT: u16 = 2001;

/// Poll period of the TX service thread, bounds shutdown latency
const TX_POLL_MS: i32 = 10;

static TX_QUEUE_FULL: LogThrottle = LogThrottle::new(1000);
static TX_UNDERRUN: LogThrottle = LogThrottle::new(1000);

/// ZMQ RF configuration
#[derive(Debug, Clone)]
pub struct ZmqRfConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Number of channels (RF ports x antennas)
    pub num_channels: usize,
    /// TX binding address per channel
    pub tx_addresses: Vec<String>,
    /// RX connection address per channel
    pub rx_addresses: Vec<String>,
    /// Samples sent per TX request when the queue is empty
    pub buffer_size: usize,
    /// Queued TX buffers per channel
    pub tx_queue_depth: usize,
    /// RX receive timeout in milliseconds
    pub rx_timeout_ms: i32,
    /// Transmit gain in dB, applied to outgoing samples
    pub tx_gain: f32,
    /// Receive gain in dB, applied to incoming samples
    pub rx_gain: f32,
}

impl Default for ZmqRfConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: 1,
            tx_addresses: vec![format!("tcp://*:{}", DEFAULT_TX_PORT)],
            rx_addresses: vec![format!("tcp://localhost:{}", DEFAULT_RX_PORT)],
            buffer_size: 1920, // One subframe at 1.92 MHz
            tx_queue_depth: 64,
            rx_timeout_ms: 1000,
            tx_gain: 0.0,
            rx_gain: 0.0,
        }
    }
}

impl ZmqRfConfig {
    /// Parse device arguments in srsRAN format
    /// Format: "key1=value1,key2=value2,..."
    /// Supports indexed port names: tx_port0, rx_port0, tx_port1, rx_port1, etc.
    pub fn from_device_args(args: &str, num_channels: usize) -> Result<Self, InterfaceError> {
        if num_channels == 0 {
            return Err(InterfaceError::InvalidConfig("num_channels must be at least 1".to_string()));
        }

        let mut config = Self::default();
        config.num_channels = num_channels;
        let mut tx_ports: Vec<Option<String>> = vec![None; num_channels];
        let mut rx_ports: Vec<Option<String>> = vec![None; num_channels];

        for pair in args.split(',') {
            let Some((key, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "base_srate" | "srate" => {
                    config.sample_rate = value.parse::<f64>()
                        .map_err(|_| InterfaceError::InvalidConfig(format!("Invalid {}: {}", key, value)))?;
                }
                "tx_gain" => {
                    config.tx_gain = value.parse::<f32>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid tx_gain".to_string()))?;
                }
                "rx_gain" => {
                    config.rx_gain = value.parse::<f32>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid rx_gain".to_string()))?;
                }
                "rx_timeout_ms" => {
                    config.rx_timeout_ms = value.parse::<i32>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid rx_timeout_ms".to_string()))?;
                }
                "tx_queue_depth" => {
                    config.tx_queue_depth = value.parse::<usize>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid tx_queue_depth".to_string()))?;
                }
                _ => {
                    if let Some(idx) = key.strip_prefix("tx_port") {
                        set_port(&mut tx_ports, idx, value)?;
                    } else if let Some(idx) = key.strip_prefix("rx_port") {
                        set_port(&mut rx_ports, idx, value)?;
                    } else {
                        debug!("Ignoring unknown ZMQ device argument '{}'", key);
                    }
                }
            }
        }

        if !(config.sample_rate > 0.0) {
            return Err(InterfaceError::InvalidConfig(format!("Invalid sample rate {}", config.sample_rate)));
        }

        config.tx_addresses = resolve_ports(tx_ports, &config.tx_addresses[0], "tx_port")?;
        config.rx_addresses = resolve_ports(rx_ports, &config.rx_addresses[0], "rx_port")?;
        Ok(config)
    }
}

fn set_port(ports: &mut [Option<String>], idx: &str, value: &str) -> Result<(), InterfaceError> {
    let idx = if idx.is_empty() {
        0
    } else {
        idx.parse::<usize>()
            .map_err(|_| InterfaceError::InvalidConfig(format!("Invalid port index '{}'", idx)))?
    };
    match ports.get_mut(idx) {
        Some(slot) => {
            *slot = Some(value.to_string());
            Ok(())
        }
        None => Err(InterfaceError::InvalidConfig(
            format!("Port index {} exceeds {} channels", idx, ports.len())
        )),
    }
}

fn resolve_ports(ports: Vec<Option<String>>, default: &str, name: &str) -> Result<Vec<String>, InterfaceError> {
    ports
        .into_iter()
        .enumerate()
        .map(|(idx, port)| match (idx, port) {
            (_, Some(address)) => Ok(address),
            (0, None) => Ok(default.to_string()),
            (idx, None) => Err(InterfaceError::InvalidConfig(format!("Missing {}{}", name, idx))),
        })
        .collect()
}

/// Convert samples to raw bytes (srsRAN format)
fn iq_to_bytes(samples: &[Complex32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 8);

    // Each complex sample is 8 bytes (4 bytes real + 4 bytes imag)
    for sample in samples {
        bytes.extend_from_slice(&sample.re.to_le_bytes());
        bytes.extend_from_slice(&sample.im.to_le_bytes());
    }

    bytes
}

/// Convert raw bytes to samples (srsRAN format)
fn bytes_to_iq(bytes: &[u8]) -> Result<Vec<Complex32>, InterfaceError> {
    if bytes.len() % 8 != 0 {
        return Err(InterfaceError::InvalidMessage);
    }

    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let re = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            let im = f32::from_le_bytes([c[4], c[5], c[6], c[7]]);
            Complex32::new(re, im)
        })
        .collect())
}

/// Linear amplitude factor for a gain in dB
fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Receive side of one channel
struct RxChannel {
    socket: Socket,
    pending: VecDeque<Complex32>,
}

impl RxChannel {
    /// Request samples from the peer until at least `n` are pending
    fn request(&mut self, n: usize) -> Result<(), InterfaceError> {
        while self.pending.len() < n {
            self.socket.send(&[0u8][..], 0)?;
            let bytes = match self.socket.recv_bytes(0) {
                Ok(bytes) => bytes,
                Err(zmq::Error::EAGAIN) => return Err(InterfaceError::Timeout),
                Err(e) => return Err(InterfaceError::ZmqError(e)),
            };
            self.pending.extend(bytes_to_iq(&bytes)?);
        }
        Ok(())
    }

    /// Move the oldest `out.len()` pending samples into `out`
    fn take(&mut self, out: &mut [Complex32], scale: f32) {
        let n = out.len().min(self.pending.len());
        for (dst, src) in out.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src * scale;
        }
    }
}

/// ZMQ radio
pub struct ZmqRadio {
    config: ZmqRfConfig,
    _context: Context,
    tx_endpoints: Vec<String>,
    tx_scale: f32,
    rx_scale: f32,
    rx_channels: Vec<Mutex<RxChannel>>,
    tx_queues: Vec<Sender<Vec<Complex32>>>,
    rx_sample_count: AtomicU64,
    counters: Arc<RfCounters>,
    running: Arc<AtomicBool>,
    tx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ZmqRadio {
    /// Bind TX sockets, connect RX sockets and start the TX service thread
    pub fn new(config: ZmqRfConfig) -> Result<Self, InterfaceError> {
        info!("Initializing ZMQ RF driver");
        info!("Sample rate: {} MHz", config.sample_rate / 1e6);
        info!("Channels: {}", config.num_channels);

        if config.tx_addresses.len() != config.num_channels
            || config.rx_addresses.len() != config.num_channels
        {
            return Err(InterfaceError::InvalidConfig(format!(
                "Expected {} TX and RX addresses, got {} and {}",
                config.num_channels,
                config.tx_addresses.len(),
                config.rx_addresses.len()
            )));
        }

        let context = Context::new();

        let mut tx_sockets = Vec::with_capacity(config.num_channels);
        let mut tx_endpoints = Vec::with_capacity(config.num_channels);
        let mut tx_queues = Vec::with_capacity(config.num_channels);
        let mut tx_receivers = Vec::with_capacity(config.num_channels);
        for address in &config.tx_addresses {
            // TX uses REP socket and binds (waits for requests from UE)
            let socket = context.socket(zmq::REP)?;
            socket.set_linger(0)?;
            socket.bind(address)?;
            socket.set_rcvtimeo(TX_POLL_MS)?;
            socket.set_sndtimeo(100)?;
            // Resolves wildcard ports such as tcp://127.0.0.1:*
            let endpoint = socket.get_last_endpoint()?.unwrap_or_else(|_| address.clone());
            info!("TX socket bound to {} (REP mode)", endpoint);
            tx_sockets.push(socket);
            tx_endpoints.push(endpoint);

            let (tx, rx) = bounded(config.tx_queue_depth.max(1));
            tx_queues.push(tx);
            tx_receivers.push(rx);
        }

        let mut rx_channels = Vec::with_capacity(config.num_channels);
        for address in &config.rx_addresses {
            // RX uses REQ socket and connects (sends requests to UE)
            let socket = context.socket(zmq::REQ)?;
            socket.set_linger(0)?;
            socket.connect(address)?;
            socket.set_rcvtimeo(config.rx_timeout_ms)?;
            socket.set_sndtimeo(config.rx_timeout_ms)?;
            // Allow a new request after a timed out one
            socket.set_req_relaxed(true)?;
            socket.set_req_correlate(true)?;
            info!("RX socket connected to {} (REQ mode)", address);
            rx_channels.push(Mutex::new(RxChannel {
                socket,
                pending: VecDeque::new(),
            }));
        }

        let counters = Arc::new(RfCounters::default());
        let running = Arc::new(AtomicBool::new(true));

        let tx_thread = {
            let counters = counters.clone();
            let running = running.clone();
            let buffer_size = config.buffer_size;
            std::thread::Builder::new()
                .name("zmq-tx".to_string())
                .spawn(move || tx_service(tx_sockets, tx_receivers, buffer_size, counters, running))
                .map_err(|e| InterfaceError::InitializationFailed(format!("Failed to spawn TX thread: {}", e)))?
        };

        let tx_scale = db_to_amplitude(config.tx_gain);
        let rx_scale = db_to_amplitude(config.rx_gain);
        info!("ZMQ RF driver initialized (tx gain {} dB, rx gain {} dB)", config.tx_gain, config.rx_gain);
        Ok(Self {
            config,
            _context: context,
            tx_endpoints,
            tx_scale,
            rx_scale,
            rx_channels,
            tx_queues,
            rx_sample_count: AtomicU64::new(0),
            counters,
            running,
            tx_thread: Mutex::new(Some(tx_thread)),
        })
    }

    /// Addresses the TX sockets are bound to, one per channel
    pub fn tx_endpoints(&self) -> &[String] {
        &self.tx_endpoints
    }

    /// Stop the TX service thread
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down ZMQ RF driver");
        if let Some(handle) = self.tx_thread.lock().take() {
            if handle.join().is_err() {
                error!("ZMQ TX thread panicked");
            }
        }

        let stats = self.counters.snapshot();
        info!("Final RF stats:");
        info!("  TX samples: {}", stats.tx_samples);
        info!("  RX samples: {}", stats.rx_samples);
        info!("  TX underruns: {}", stats.tx_underruns);
        info!("  TX late packets: {}", stats.tx_late_packets);
    }
}

/// Answers TX requests from the peer with queued samples, or zeros on underrun
fn tx_service(
    sockets: Vec<Socket>,
    queues: Vec<Receiver<Vec<Complex32>>>,
    buffer_size: usize,
    counters: Arc<RfCounters>,
    running: Arc<AtomicBool>,
) {
    info!("ZMQ TX service thread started");
    let zeros = iq_to_bytes(&vec![Complex32::new(0.0, 0.0); buffer_size]);

    while running.load(Ordering::Relaxed) {
        for (socket, queue) in sockets.iter().zip(&queues) {
            match socket.recv_bytes(0) {
                Ok(_request) => {
                    let sent = match queue.try_recv() {
                        Ok(samples) => {
                            counters.tx_samples.fetch_add(samples.len() as u64, Ordering::Relaxed);
                            socket.send(iq_to_bytes(&samples), 0)
                        }
                        Err(_) => {
                            counters.tx_underruns.fetch_add(1, Ordering::Relaxed);
                            if let Some(n) = TX_UNDERRUN.hit() {
                                warn!("TX: Sent {} zero samples (underrun #{})", buffer_size, n);
                            }
                            socket.send(&zeros[..], 0)
                        }
                    };
                    if let Err(e) = sent {
                        error!("Failed to send TX samples: {}", e);
                    }
                }
                Err(zmq::Error::EAGAIN) => {}
                Err(e) => {
                    error!("TX: Error receiving request: {}", e);
                }
            }
        }
    }
    info!("ZMQ TX service thread stopped");
}

impl RadioInterface for ZmqRadio {
    fn rx_now(&self, buffer: &mut RfBuffer) -> Result<RxMetadata, InterfaceError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(InterfaceError::NotInitialized);
        }
        if buffer.nof_channels() != self.config.num_channels {
            return Err(InterfaceError::ChannelMismatch {
                buffer: buffer.nof_channels(),
                radio: self.config.num_channels,
            });
        }

        let nof_samples = buffer.nof_samples();
        let mut channels: Vec<_> = self.rx_channels.iter().map(|rx| rx.lock()).collect();
        // Nothing is consumed until every channel holds a full subframe, so a
        // failure on one channel leaves all of them at the same position
        for rx in channels.iter_mut() {
            rx.request(nof_samples)?;
        }
        for (ch, rx) in channels.iter_mut().enumerate() {
            rx.take(buffer.channel_mut(ch), self.rx_scale);
        }
        drop(channels);

        let first_sample = self.rx_sample_count.fetch_add(nof_samples as u64, Ordering::Relaxed);
        self.counters.rx_samples.fetch_add(nof_samples as u64, Ordering::Relaxed);
        let timestamp = RfTimestamp::from_samples(first_sample, self.config.sample_rate)?;

        trace!("Received {} samples at {}", nof_samples, timestamp);
        Ok(RxMetadata {
            nof_samples,
            timestamp,
            overflow: false,
        })
    }

    fn tx(&self, buffer: &RfBuffer, timestamp: RfTimestamp) -> Result<(), InterfaceError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(InterfaceError::NotInitialized);
        }

        trace!("TX {} samples at {}", buffer.nof_samples(), timestamp);
        let mut result = Ok(());
        for (ch, queue) in self.tx_queues.iter().enumerate().take(buffer.nof_channels()) {
            let samples = buffer.channel(ch).iter().map(|s| *s * self.tx_scale).collect();
            match queue.try_send(samples) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.counters.tx_late_packets.fetch_add(1, Ordering::Relaxed);
                    if let Some(n) = TX_QUEUE_FULL.hit() {
                        warn!("TX queue full on channel {} - dropped {} buffers so far", ch, n);
                    }
                    result = Err(InterfaceError::BufferFull);
                }
                Err(TrySendError::Disconnected(_)) => return Err(InterfaceError::NotInitialized),
            }
        }
        result
    }

    fn tx_end(&self) {
        self.counters.tx_bursts_ended.fetch_add(1, Ordering::Relaxed);
        trace!("TX burst ended");
    }

    fn nof_channels(&self) -> usize {
        self.config.num_channels
    }

    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn stats(&self) -> RfStats {
        self.counters.snapshot()
    }
}

impl Drop for ZmqRadio {
    fn drop(&mut self) {
        self.shutdown();
    }
}
