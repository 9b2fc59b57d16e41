//! Background reader publishing the latest product code received on a serial line.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Connector, Link, decode_line};

/// Single-slot snapshot: the writer swaps in a whole new value, readers clone
/// the `Arc`, so a read never observes a half-written code.
#[derive(Debug, Default)]
pub struct LatestValue {
    value: Mutex<Option<Arc<str>>>,
    history: Mutex<VecDeque<Arc<str>>>,
    capacity: usize,
}

impl LatestValue {
    pub fn new(capacity: usize) -> Self {
        Self {
            value: Mutex::new(None),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn publish(&self, code: &str) {
        let code: Arc<str> = Arc::from(code);
        *self.value.lock() = Some(code.clone());

        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(code);
    }

    pub fn get(&self) -> Option<Arc<str>> {
        self.value.lock().clone()
    }

    pub fn history(&self) -> Vec<Arc<str>> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        *self.value.lock() = None;
        self.history.lock().clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub poll_interval: Duration,
    pub reconnect_backoff: Duration,
    pub stop_timeout: Duration,
    pub history: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            reconnect_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            history: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputStats {
    pub current: Option<String>,
    pub received: u64,
    pub errors: u64,
    pub connected: bool,
    pub running: bool,
}

#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    received: AtomicU64,
    errors: AtomicU64,
}

struct Worker {
    handle: JoinHandle<Box<dyn Connector>>,
    done: mpsc::Receiver<()>,
}

pub struct ProductCodeReader {
    settings: ReaderSettings,
    latest: Arc<LatestValue>,
    shared: Arc<Shared>,
    connector: Option<Box<dyn Connector>>,
    endpoint: String,
    worker: Option<Worker>,
}

impl ProductCodeReader {
    pub fn new(connector: Box<dyn Connector>, settings: ReaderSettings) -> Self {
        let endpoint = connector.endpoint();
        Self {
            latest: Arc::new(LatestValue::new(settings.history)),
            settings,
            shared: Arc::new(Shared::default()),
            connector: Some(connector),
            endpoint,
            worker: None,
        }
    }

    /// Spawn the read loop. Calling it while running does nothing.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            debug!("product code reader on {} already running", self.endpoint);
            return;
        }
        let Some(connector) = self.connector.take() else {
            warn!(
                "product code reader on {} cannot restart: previous worker never released the port",
                self.endpoint
            );
            return;
        };

        self.shared.running.store(true, Ordering::Release);
        let (done_tx, done_rx) = mpsc::channel();
        let latest = self.latest.clone();
        let shared = self.shared.clone();
        let settings = self.settings;

        let spawned = thread::Builder::new()
            .name("product-code-reader".to_string())
            .spawn(move || {
                let connector = read_loop(connector, &latest, &shared, settings);
                let _ = done_tx.send(());
                connector
            });

        match spawned {
            Ok(handle) => {
                info!("product code reader started on {}", self.endpoint);
                self.worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
            }
            Err(e) => {
                // The closure (and the connector) is gone with the failed spawn
                warn!("cannot spawn product code reader: {}", e);
                self.shared.running.store(false, Ordering::Release);
            }
        }
    }

    /// Stop the read loop and wait at most `stop_timeout` for it. Calling it
    /// while stopped does nothing.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::Release);

        match worker.done.recv_timeout(self.settings.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match worker.handle.join() {
                Ok(connector) => self.connector = Some(connector),
                Err(_) => warn!("product code reader panicked"),
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "product code reader did not stop within {:?}, detaching",
                    self.settings.stop_timeout
                );
            }
        }

        let stats = self.stats();
        info!(
            "product code reader stopped (received={}, errors={})",
            stats.received, stats.errors
        );
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Latest code received, if any.
    pub fn current(&self) -> Option<String> {
        self.latest.get().map(|code| code.to_string())
    }

    pub fn history(&self) -> Vec<String> {
        self.latest.history().iter().map(|c| c.to_string()).collect()
    }

    pub fn clear(&self) {
        self.latest.clear();
    }

    pub fn stats(&self) -> InputStats {
        InputStats {
            current: self.current(),
            received: self.shared.received.load(Ordering::Relaxed),
            errors: self.shared.errors.load(Ordering::Relaxed),
            connected: self.shared.connected.load(Ordering::Relaxed),
            running: self.worker.is_some(),
        }
    }
}

impl Drop for ProductCodeReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep up to `duration`, waking early once `running` drops.
fn sleep_while_running(shared: &Shared, duration: Duration) {
    let deadline = Instant::now() + duration;
    let slice = Duration::from_millis(20);
    while shared.running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(slice.min(deadline - now));
    }
}

fn read_loop(
    mut connector: Box<dyn Connector>,
    latest: &LatestValue,
    shared: &Shared,
    settings: ReaderSettings,
) -> Box<dyn Connector> {
    let mut link: Option<Box<dyn Link>> = None;

    while shared.running.load(Ordering::Acquire) {
        if link.is_none() {
            match connector.connect() {
                Ok(port) => {
                    shared.connected.store(true, Ordering::Relaxed);
                    link = Some(port);
                }
                Err(e) => {
                    warn!("product code input: {}, retrying in {:?}", e, settings.reconnect_backoff);
                    sleep_while_running(shared, settings.reconnect_backoff);
                    continue;
                }
            }
        }
        let Some(port) = link.as_mut() else {
            continue;
        };

        match port.read_line() {
            Ok(Some(bytes)) => {
                let code = decode_line(bytes);
                let code = code.trim();
                if !code.is_empty() {
                    latest.publish(code);
                    let total = shared.received.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("product code received: '{}' (total {})", code, total);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("product code read error: {}", e);
                shared.errors.fetch_add(1, Ordering::Relaxed);
                link = None;
                shared.connected.store(false, Ordering::Relaxed);
                sleep_while_running(shared, settings.reconnect_backoff);
                continue;
            }
        }

        sleep_while_running(shared, settings.poll_interval);
    }

    // Dropping the link releases the port
    drop(link);
    shared.connected.store(false, Ordering::Relaxed);
    connector
}
