//! Test doubles shared by the service tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::application::ports::{
    ClientId, ClientSink, ReconnectTimer, TimerTicket, TransportError, UpstreamPort,
};
use crate::domain::frame::Frame;
use crate::domain::link::Generation;

/// In-memory client that records what it was sent.
pub struct FakeClient {
    id: ClientId,
    open: AtomicBool,
    fail: bool,
    capacity: usize,
    closed: AtomicBool,
    frames: Mutex<Vec<Frame>>,
}

impl FakeClient {
    fn build(id: ClientId, open: bool, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            open: AtomicBool::new(open),
            fail,
            capacity: usize::MAX,
            closed: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn open(id: ClientId) -> Arc<Self> {
        Self::build(id, true, false)
    }

    pub fn closed(id: ClientId) -> Arc<Self> {
        Self::build(id, false, false)
    }

    /// Open, but every send fails.
    pub fn failing(id: ClientId) -> Arc<Self> {
        Self::build(id, true, true)
    }

    /// Open, but stops accepting frames once `capacity` are held.
    pub fn bounded(id: ClientId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            open: AtomicBool::new(true),
            fail: false,
            capacity,
            closed: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Received frames decoded as JSON.
    pub fn messages(&self) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .map(|frame| serde_json::from_slice(frame.as_bytes()).unwrap())
            .collect()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ClientSink for FakeClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Closed);
        }
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            return Err(TransportError::Full);
        }
        frames.push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// What a [`RecordingUpstream`] saw.
#[derive(Debug, Default)]
pub struct UpstreamLog {
    pub connects: Vec<Generation>,
    pub sent: Vec<Frame>,
    pub closes: usize,
    /// Sends succeed until this many frames were accepted.
    pub fail_after: Option<usize>,
}

/// Upstream whose log stays readable after the controller takes ownership.
#[derive(Clone, Default)]
pub struct RecordingUpstream {
    log: Arc<Mutex<UpstreamLog>>,
}

impl RecordingUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after(&self, accepted: usize) {
        self.log.lock().fail_after = Some(accepted);
    }

    pub fn connects(&self) -> Vec<Generation> {
        self.log.lock().connects.clone()
    }

    pub fn last_generation(&self) -> Generation {
        *self.log.lock().connects.last().unwrap()
    }

    /// Sent frames decoded as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.log
            .lock()
            .sent
            .iter()
            .map(|frame| serde_json::from_slice(frame.as_bytes()).unwrap())
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.log.lock().closes
    }
}

impl UpstreamPort for RecordingUpstream {
    fn connect(&mut self, generation: Generation) {
        self.log.lock().connects.push(generation);
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        if log.fail_after.is_some_and(|limit| log.sent.len() >= limit) {
            return Err(TransportError::Closed);
        }
        log.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closes += 1;
    }
}

/// Timer that only records armings; tests fire tickets by hand.
#[derive(Clone, Default)]
pub struct RecordingTimer {
    armed: Arc<Mutex<Vec<(TimerTicket, Duration)>>>,
    cancels: Arc<Mutex<usize>>,
}

impl RecordingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Vec<(TimerTicket, Duration)> {
        self.armed.lock().clone()
    }

    pub fn last_ticket(&self) -> TimerTicket {
        self.armed.lock().last().unwrap().0
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock()
    }
}

impl ReconnectTimer for RecordingTimer {
    fn arm(&mut self, ticket: TimerTicket, delay: Duration) {
        self.armed.lock().push((ticket, delay));
    }

    fn cancel(&mut self) {
        *self.cancels.lock() += 1;
    }
}
