//! Verdict output to the line controller, with bounded retry and lazy reconnect.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{Connector, Link};
use crate::error::{Result, StationError};
use crate::models::Verdict;

/// How often a failed write is retried and how long to wait in between.
/// Total write attempts per send are `1 + retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub sent: u64,
    pub failed: u64,
    pub connects: u64,
    pub connected: bool,
    pub enabled: bool,
}

pub struct SerialOutput {
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Link>>,
    policy: RetryPolicy,
    enabled: bool,
    disable_on_connect_failure: bool,
    ever_connected: bool,
    sent: u64,
    failed: u64,
    connects: u64,
}

impl SerialOutput {
    /// Build the channel without connecting; the first `send` (or
    /// [`SerialOutput::try_connect`]) opens the port.
    pub fn new(connector: Box<dyn Connector>, policy: RetryPolicy, enabled: bool) -> Self {
        Self {
            connector,
            link: None,
            policy,
            enabled,
            disable_on_connect_failure: true,
            ever_connected: false,
            sent: 0,
            failed: 0,
            connects: 0,
        }
    }

    /// Open the port ahead of the first verdict.
    pub fn try_connect(&mut self) -> bool {
        self.enabled && (self.link.is_some() || self.connect())
    }

    /// Keep retrying on the next `send` instead of switching off when the
    /// first connection fails.
    pub fn with_disable_on_connect_failure(mut self, disable: bool) -> Self {
        self.disable_on_connect_failure = disable;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn stats(&self) -> OutputStats {
        OutputStats {
            sent: self.sent,
            failed: self.failed,
            connects: self.connects,
            connected: self.link.is_some(),
            enabled: self.enabled,
        }
    }

    fn connect(&mut self) -> bool {
        match self.connector.connect() {
            Ok(link) => {
                self.link = Some(link);
                self.connects += 1;
                self.ever_connected = true;
                true
            }
            Err(e) => {
                warn!("cannot connect to {}: {}", self.connector.endpoint(), e);
                if !self.ever_connected && self.disable_on_connect_failure {
                    warn!(
                        "serial output to {} disabled, continuing without it",
                        self.connector.endpoint()
                    );
                    self.enabled = false;
                }
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.link = None;
    }

    fn write(&mut self, message: &[u8]) -> Result<()> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| StationError::SerialWrite("port not connected".to_string()))?;
        link.write_all(message)
            .map_err(|e| StationError::SerialWrite(e.to_string()))
    }

    /// Send a verdict line. Returns `true` when the line went out, or when the
    /// channel is disabled.
    pub fn send(&mut self, verdict: Verdict, extra_info: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }

        if self.link.is_none() && !self.connect() {
            self.failed += 1;
            return false;
        }

        let message = format_message(verdict, extra_info);
        let attempts = self.policy.retries + 1;

        for attempt in 1..=attempts {
            match self.write(message.as_bytes()) {
                Ok(()) => {
                    self.sent += 1;
                    if attempt > 1 {
                        info!("sent (retry {}): {}", attempt - 1, message.trim_end());
                    } else {
                        debug!("sent: {}", message.trim_end());
                    }
                    return true;
                }
                Err(e) => {
                    warn!("send failed (attempt {}/{}): {}", attempt, attempts, e);
                    self.disconnect();
                    if attempt < attempts {
                        std::thread::sleep(self.policy.delay);
                        self.connect();
                    }
                }
            }
        }

        error!("failed to send {} after {} attempts", verdict, attempts);
        self.failed += 1;
        false
    }

    pub fn send_ok(&mut self, extra_info: Option<&str>) -> bool {
        self.send(Verdict::Ok, extra_info)
    }

    pub fn send_ng(&mut self, extra_info: Option<&str>) -> bool {
        self.send(Verdict::Ng, extra_info)
    }

    /// Drop the connection and report totals.
    pub fn close(&mut self) {
        self.disconnect();
        info!(
            "serial output closed (sent={}, failed={})",
            self.sent, self.failed
        );
    }
}

/// `"OK\r\n"`, or `"OK,<extra>\r\n"` when extra context is given.
pub fn format_message(verdict: Verdict, extra_info: Option<&str>) -> String {
    match extra_info.filter(|s| !s.is_empty()) {
        Some(extra) => format!("{},{}\r\n", verdict, extra),
        None => format!("{}\r\n", verdict),
    }
}
