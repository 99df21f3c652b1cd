//! Device access: driver traits, connection state machine and a simulated PLC.
//!
//! The engine never talks to sockets. Records and groups only need the
//! narrow [`Device`] capability: a liveness flag plus byte-range read and
//! write. Protocol clients implement the even narrower [`Driver`] trait and
//! get connection management by composition inside a [`Link`], which owns
//! the `Disconnected → Connecting → Connected` state machine and the
//! reconnect backoff.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use pipeline_interlock::{Device, Link, LinkConfig, LinkEvent, LinkState, SimulatedPlc};
//!
//! let plc = SimulatedPlc::new(32);
//! let mut link = Link::new("plc-1", plc.clone(), LinkConfig::default());
//!
//! let t0 = Instant::now();
//! link.tick(t0);
//! assert_eq!(link.state(), LinkState::Connected);
//! assert_eq!(link.take_events(), vec![LinkEvent::Connect]);
//!
//! plc.poke(0, &[1, 2, 3]);
//! assert_eq!(link.read(0, 3).unwrap(), vec![1, 2, 3]);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::IoError;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling for the reconnect delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Byte-range access to a remote device, as seen by records.
pub trait Device {
    /// Whether the device is currently reachable.
    fn is_connected(&self) -> bool;

    /// Reads `len` bytes starting at device byte address `start`.
    fn read(&mut self, start: usize, len: usize) -> Result<Vec<u8>, IoError>;

    /// Writes `data` starting at device byte address `start`.
    fn write(&mut self, start: usize, data: &[u8]) -> Result<(), IoError>;
}

/// Shared handle to a device. Several records may use one device.
pub type SharedDevice = Rc<RefCell<dyn Device>>;

/// A protocol client (Modbus-TCP, S7, ...) without connection management.
pub trait Driver {
    /// Opens the session.
    fn connect(&mut self) -> Result<(), IoError>;

    /// Closes the session.
    fn disconnect(&mut self);

    /// Reads `len` bytes at `start`.
    fn read(&mut self, start: usize, len: usize) -> Result<Vec<u8>, IoError>;

    /// Writes `data` at `start`.
    fn write(&mut self, start: usize, data: &[u8]) -> Result<(), IoError>;
}

/// Reconnect policy for a [`Link`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
            multiplier: 2.0,
        }
    }
}

impl LinkConfig {
    /// Sets the initial reconnect delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Sets the reconnect delay ceiling.
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    fn initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    fn next(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.multiplier.max(1.0))
                .min(Duration::from_millis(self.max_backoff_ms).as_secs_f64()),
        )
    }
}

/// Connection state of a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No session; waiting for the next attempt.
    Disconnected,
    /// Attempt in progress.
    Connecting,
    /// Session open.
    Connected,
}

/// Lifecycle notification queued by a [`Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Session opened.
    Connect,
    /// Session dropped.
    Disconnect,
    /// A read or write failed on an open session.
    DataError(IoError),
    /// A connect attempt failed.
    ConnFailed(IoError),
}

/// A driver plus its connection state machine.
pub struct Link<D> {
    name: String,
    driver: D,
    config: LinkConfig,
    state: LinkState,
    backoff: Duration,
    retry_at: Option<Instant>,
    last_tick: Option<Instant>,
    events: VecDeque<LinkEvent>,
}

impl<D: Driver> Link<D> {
    /// Wraps `driver`. The first [`tick`](Self::tick) attempts to connect.
    pub fn new(name: impl Into<String>, driver: D, config: LinkConfig) -> Self {
        let backoff = config.initial();
        Self {
            name: name.into(),
            driver,
            config,
            state: LinkState::Disconnected,
            backoff,
            retry_at: None,
            last_tick: None,
            events: VecDeque::new(),
        }
    }

    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Delay that will follow the next failure.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the underlying driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Drains queued lifecycle events.
    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        self.events.drain(..).collect()
    }

    /// Liveness tick: attempts a connection when one is due.
    pub fn tick(&mut self, now: Instant) {
        self.last_tick = Some(now);
        if self.state != LinkState::Disconnected {
            return;
        }
        if self.retry_at.is_some_and(|at| now < at) {
            return;
        }

        self.state = LinkState::Connecting;
        tracing::debug!(link = %self.name, "connecting");
        match self.driver.connect() {
            Ok(()) => {
                self.state = LinkState::Connected;
                self.backoff = self.config.initial();
                self.retry_at = None;
                tracing::info!(link = %self.name, "connected");
                self.events.push_back(LinkEvent::Connect);
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                self.retry_at = Some(now + self.backoff);
                tracing::warn!(
                    link = %self.name,
                    error = %e,
                    retry_in_ms = self.backoff.as_millis() as u64,
                    "connect failed"
                );
                self.backoff = self.config.next(self.backoff);
                self.events.push_back(LinkEvent::ConnFailed(e));
            }
        }
    }

    /// Closes the session. The next due tick reconnects.
    pub fn disconnect(&mut self) {
        if self.state == LinkState::Connected {
            self.driver.disconnect();
            self.state = LinkState::Disconnected;
            self.retry_at = self.last_tick.map(|t| t + self.backoff);
            tracing::info!(link = %self.name, "disconnected");
            self.events.push_back(LinkEvent::Disconnect);
        }
    }

    fn on_error(&mut self, e: &IoError) {
        tracing::warn!(link = %self.name, error = %e, "data error");
        self.events.push_back(LinkEvent::DataError(e.clone()));
        if matches!(e, IoError::NotConnected | IoError::Timeout) {
            self.disconnect();
        }
    }
}

impl<D: Driver> Device for Link<D> {
    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    fn read(&mut self, start: usize, len: usize) -> Result<Vec<u8>, IoError> {
        if self.state != LinkState::Connected {
            return Err(IoError::NotConnected);
        }
        self.driver.read(start, len).inspect_err(|e| self.on_error(e))
    }

    fn write(&mut self, start: usize, data: &[u8]) -> Result<(), IoError> {
        if self.state != LinkState::Connected {
            return Err(IoError::NotConnected);
        }
        self.driver.write(start, data).inspect_err(|e| self.on_error(e))
    }
}

impl<D> std::fmt::Debug for Link<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .field("pending_events", &self.events.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct PlcImage {
    memory: Vec<u8>,
    online: bool,
    session: bool,
    fail_reads: bool,
    fail_writes: bool,
    reads: usize,
    writes: Vec<(usize, Vec<u8>)>,
}

impl PlcImage {
    fn range(&self, start: usize, len: usize) -> Result<std::ops::Range<usize>, IoError> {
        let end = start + len;
        if end > self.memory.len() {
            return Err(IoError::OutOfRange { start, end });
        }
        Ok(start..end)
    }
}

/// In-memory PLC image used as a test double and for simulation runs.
///
/// Cloning yields another handle to the same image, so a test can keep one
/// handle to poke values while a record or link owns another.
#[derive(Debug, Clone)]
pub struct SimulatedPlc {
    image: Rc<RefCell<PlcImage>>,
}

impl SimulatedPlc {
    /// Creates an online PLC with `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        Self {
            image: Rc::new(RefCell::new(PlcImage {
                memory: vec![0; size],
                online: true,
                ..Default::default()
            })),
        }
    }

    /// Handle usable with [`Record::set_io`](crate::Record::set_io).
    pub fn shared(&self) -> SharedDevice {
        Rc::new(RefCell::new(self.clone()))
    }

    /// Makes the PLC reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        let mut image = self.image.borrow_mut();
        image.online = online;
        if !online {
            image.session = false;
        }
    }

    /// Makes reads fail with a device error.
    pub fn fail_reads(&self, fail: bool) {
        self.image.borrow_mut().fail_reads = fail;
    }

    /// Makes writes fail with a device error.
    pub fn fail_writes(&self, fail: bool) {
        self.image.borrow_mut().fail_writes = fail;
    }

    /// Writes bytes into the image without going through the device API.
    pub fn poke(&self, start: usize, bytes: &[u8]) {
        let mut image = self.image.borrow_mut();
        let end = (start + bytes.len()).min(image.memory.len());
        if start < end {
            image.memory[start..end].copy_from_slice(&bytes[..end - start]);
        }
    }

    /// Copies bytes out of the image.
    pub fn peek(&self, start: usize, len: usize) -> Vec<u8> {
        let image = self.image.borrow();
        let end = (start + len).min(image.memory.len());
        image.memory.get(start..end).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Number of successful reads served.
    pub fn read_count(&self) -> usize {
        self.image.borrow().reads
    }

    /// Successful writes, oldest first.
    pub fn writes(&self) -> Vec<(usize, Vec<u8>)> {
        self.image.borrow().writes.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.image.borrow_mut().writes.clear();
    }

    fn do_read(&self, start: usize, len: usize) -> Result<Vec<u8>, IoError> {
        let mut image = self.image.borrow_mut();
        if !image.online {
            return Err(IoError::Timeout);
        }
        if image.fail_reads {
            return Err(IoError::device("read rejected"));
        }
        let range = image.range(start, len)?;
        image.reads += 1;
        Ok(image.memory[range].to_vec())
    }

    fn do_write(&self, start: usize, data: &[u8]) -> Result<(), IoError> {
        let mut image = self.image.borrow_mut();
        if !image.online {
            return Err(IoError::Timeout);
        }
        if image.fail_writes {
            return Err(IoError::device("write rejected"));
        }
        let range = image.range(start, data.len())?;
        image.memory[range].copy_from_slice(data);
        image.writes.push((start, data.to_vec()));
        Ok(())
    }
}

impl Device for SimulatedPlc {
    fn is_connected(&self) -> bool {
        self.image.borrow().online
    }

    fn read(&mut self, start: usize, len: usize) -> Result<Vec<u8>, IoError> {
        self.do_read(start, len)
    }

    fn write(&mut self, start: usize, data: &[u8]) -> Result<(), IoError> {
        self.do_write(start, data)
    }
}

impl Driver for SimulatedPlc {
    fn connect(&mut self) -> Result<(), IoError> {
        let mut image = self.image.borrow_mut();
        if !image.online {
            return Err(IoError::Timeout);
        }
        image.session = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.image.borrow_mut().session = false;
    }

    fn read(&mut self, start: usize, len: usize) -> Result<Vec<u8>, IoError> {
        if !self.image.borrow().session {
            return Err(IoError::NotConnected);
        }
        self.do_read(start, len)
    }

    fn write(&mut self, start: usize, data: &[u8]) -> Result<(), IoError> {
        if !self.image.borrow().session {
            return Err(IoError::NotConnected);
        }
        self.do_write(start, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_RECONNECT_BACKOFF, Duration::from_secs(1));
        assert_eq!(DEFAULT_MAX_BACKOFF, Duration::from_secs(30));
        let config = LinkConfig::default();
        assert_eq!(config.reconnect_backoff_ms, 1000);
        assert_eq!(config.multiplier, 2.0);
    }

    #[test]
    fn test_link_connects_on_first_tick() {
        let plc = SimulatedPlc::new(8);
        let mut link = Link::new("a", plc, LinkConfig::default());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.is_connected());
        assert_eq!(link.read(0, 1), Err(IoError::NotConnected));

        link.tick(Instant::now());
        assert!(link.is_connected());
        assert_eq!(link.take_events(), vec![LinkEvent::Connect]);
    }

    #[test]
    fn test_link_backoff_grows_and_caps() {
        let plc = SimulatedPlc::new(8);
        plc.set_online(false);
        let config = LinkConfig::default()
            .with_backoff(ms(100))
            .with_max_backoff(ms(300));
        let mut link = Link::new("a", plc.clone(), config);

        let t0 = Instant::now();
        link.tick(t0);
        assert!(matches!(link.take_events()[..], [LinkEvent::ConnFailed(_)]));
        assert_eq!(link.backoff(), ms(200));

        // not due yet
        link.tick(t0 + ms(50));
        assert!(link.take_events().is_empty());

        link.tick(t0 + ms(100));
        assert_eq!(link.take_events().len(), 1);
        assert_eq!(link.backoff(), ms(300));

        link.tick(t0 + ms(300));
        assert_eq!(link.backoff(), ms(300));

        plc.set_online(true);
        link.tick(t0 + ms(600));
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.backoff(), ms(100));
    }

    #[test]
    fn test_timeout_drops_link() {
        let plc = SimulatedPlc::new(8);
        let mut link = Link::new("a", plc.clone(), LinkConfig::default().with_backoff(ms(100)));
        let t0 = Instant::now();
        link.tick(t0);
        link.take_events();

        plc.set_online(false);
        assert_eq!(link.read(0, 2), Err(IoError::NotConnected));
        let events = link.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], LinkEvent::Disconnect);
        assert_eq!(link.state(), LinkState::Disconnected);

        plc.set_online(true);
        link.tick(t0 + ms(50));
        assert_eq!(link.state(), LinkState::Disconnected);
        link.tick(t0 + ms(100));
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn test_device_error_keeps_session() {
        let plc = SimulatedPlc::new(8);
        let mut link = Link::new("a", plc.clone(), LinkConfig::default());
        link.tick(Instant::now());
        link.take_events();

        plc.fail_writes(true);
        assert!(matches!(link.write(0, &[1]), Err(IoError::Device { .. })));
        assert!(link.is_connected());
        assert!(matches!(link.take_events()[..], [LinkEvent::DataError(_)]));
    }

    #[test]
    fn test_simulated_plc_range_checks() {
        let mut plc = SimulatedPlc::new(4);
        assert_eq!(
            Device::read(&mut plc, 2, 4),
            Err(IoError::OutOfRange { start: 2, end: 6 })
        );
        Device::write(&mut plc, 1, &[0xAB, 0xCD]).unwrap();
        assert_eq!(hex::encode(plc.peek(0, 4)), "00abcd00");
        assert_eq!(plc.writes(), vec![(1, vec![0xAB, 0xCD])]);
    }

    #[test]
    fn test_shared_handle_sees_pokes() {
        let plc = SimulatedPlc::new(4);
        let shared = plc.shared();
        plc.poke(0, &[9, 8]);
        assert_eq!(shared.borrow_mut().read(0, 2).unwrap(), vec![9, 8]);
        assert_eq!(plc.read_count(), 1);
    }

    #[test]
    fn test_link_debug() {
        let link = Link::new("plc-7", SimulatedPlc::new(1), LinkConfig::default());
        let debug_str = format!("{:?}", link);
        assert!(debug_str.contains("plc-7"));
        assert!(debug_str.contains("Disconnected"));
    }
}
