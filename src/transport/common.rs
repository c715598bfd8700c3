use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use codec::{Address, DEFAULT_BUFFER_SIZE};
use parking_lot::{Mutex, RwLock};
use socket2::SockRef;

use super::{
    LoopControl, NoopSink, TransportEnd, TransportEndSender, TransportRecv, TransportWrite,
};

use crate::Error;

/// Where RTCP goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CtrlMode {
    /// RTCP has its own socket on the control port.
    #[default]
    Separate,
    /// RTCP shares the data socket and is sent to the peer's data port.
    ///
    /// Used when only the RTP port has been opened by the firewall in front
    /// of the peer.
    Muxed,
}

/// Construction options of a backend.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Local bind address, both ports set.
    pub local: Address,
    /// Capacity of the packets handed to the upper layer. Longer datagrams
    /// are truncated.
    pub buffer_size: usize,
    /// IP TOS byte for outgoing packets.
    pub tos: u32,
    /// Read deadline of the data loop, bounds how long a close request waits.
    pub data_deadline: Duration,
    /// Read deadline of the control loop, RTCP is sparse so this is longer.
    pub ctrl_deadline: Duration,
    /// How long a stream write may stall before the connection is dropped.
    pub write_deadline: Duration,
    pub ctrl_mode: CtrlMode,
}

impl TransportOptions {
    /// DSCP AF41 (assured forwarding, class 4, low drop) as a TOS byte.
    pub const DIFFSERV_AF41: u32 = 0x88;

    pub fn new(local: Address) -> Self {
        Self {
            local,
            buffer_size: DEFAULT_BUFFER_SIZE,
            tos: Self::DIFFSERV_AF41,
            data_deadline: Duration::from_millis(20),
            ctrl_deadline: Duration::from_millis(100),
            write_deadline: Duration::from_secs(1),
            ctrl_mode: CtrlMode::Separate,
        }
    }

    pub fn with_write_deadline(mut self, write_deadline: Duration) -> Self {
        self.write_deadline = write_deadline;
        self
    }

    pub fn with_ctrl_mode(mut self, ctrl_mode: CtrlMode) -> Self {
        self.ctrl_mode = ctrl_mode;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidOptions("buffer size must not be zero"));
        }

        // std sockets reject a zero read timeout.
        if self.data_deadline.is_zero() || self.ctrl_deadline.is_zero() {
            return Err(Error::InvalidOptions("read deadlines must not be zero"));
        }

        if self.write_deadline.is_zero() {
            return Err(Error::InvalidOptions("write deadline must not be zero"));
        }

        if self.tos > u8::MAX as u32 {
            return Err(Error::InvalidOptions("tos must fit in one byte"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Listening,
    Closed,
}

/// State every backend shares with its receive loops.
pub struct TransportCommon {
    name: &'static str,
    data: Arc<LoopControl>,
    ctrl: Arc<LoopControl>,
    transport_end: Mutex<Option<TransportEndSender>>,
    call_upper: RwLock<Arc<dyn TransportRecv>>,
    to_lower: RwLock<Option<Arc<dyn TransportWrite>>>,
    lifecycle: Mutex<Lifecycle>,
    active_loops: AtomicUsize,
}

impl TransportCommon {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            data: Arc::new(LoopControl::default()),
            ctrl: Arc::new(LoopControl::default()),
            transport_end: Mutex::new(None),
            call_upper: RwLock::new(Arc::new(NoopSink::new(name))),
            to_lower: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::Idle),
            active_loops: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn data_control(&self) -> &Arc<LoopControl> {
        &self.data
    }

    pub fn ctrl_control(&self) -> &Arc<LoopControl> {
        &self.ctrl
    }

    pub fn set_call_upper(&self, upper: Arc<dyn TransportRecv>) {
        *self.call_upper.write() = upper;
    }

    /// The layer packets are currently delivered to.
    pub fn upper(&self) -> Arc<dyn TransportRecv> {
        self.call_upper.read().clone()
    }

    pub fn set_to_lower(&self, lower: Arc<dyn TransportWrite>) {
        *self.to_lower.write() = Some(lower);
    }

    pub fn lower(&self) -> Option<Arc<dyn TransportWrite>> {
        self.to_lower.read().clone()
    }

    pub fn set_end_channel(&self, sender: TransportEndSender) {
        self.transport_end.lock().replace(sender);
    }

    /// Sends the termination value of one loop.
    pub(crate) fn signal_end(&self, end: TransportEnd) {
        match self.transport_end.lock().as_ref() {
            Some(sender) => {
                if sender.send(end).is_err() {
                    log::debug!("{}: end channel receiver dropped: end={end:?}", self.name);
                }
            }
            None => log::debug!("{}: no end channel installed: end={end:?}", self.name),
        }
    }

    /// Runs `setup` once, moving the transport from idle to listening.
    ///
    /// A failed setup leaves the transport closed, it has to be constructed
    /// again. Loops started before the failure still count in
    /// `active_loops` and still send their end value.
    pub(crate) fn listen<F>(&self, setup: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error>,
    {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Listening => {
                log::debug!("{}: already listening", self.name);
                Ok(())
            }
            Lifecycle::Closed => Err(Error::Closed),
            Lifecycle::Idle => match setup() {
                Ok(()) => {
                    *lifecycle = Lifecycle::Listening;
                    Ok(())
                }
                Err(e) => {
                    *lifecycle = Lifecycle::Closed;

                    log::error!("{}: setup failed: err={e}", self.name);
                    Err(e)
                }
            },
        }
    }

    pub fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::SeqCst)
    }

    /// Counts a receive loop that now owes an end value.
    pub(crate) fn loop_started(&self) {
        self.active_loops.fetch_add(1, Ordering::SeqCst);
    }

    /// Raises both stop flags and marks the transport closed.
    pub fn close_recv(&self) {
        *self.lifecycle.lock() = Lifecycle::Closed;

        self.data.request_stop();
        self.ctrl.request_stop();

        log::info!("{}: receive close requested", self.name);
    }
}

/// A socket shared between its receive loop and writers.
///
/// The receive loop empties the slot when it terminates, after which writers
/// get nothing and report the transport as not listening.
pub(crate) struct SocketSlot<T>(RwLock<Option<Arc<T>>>);

impl<T> Default for SocketSlot<T> {
    fn default() -> Self {
        Self(RwLock::new(None))
    }
}

impl<T> SocketSlot<T> {
    pub fn set(&self, socket: Arc<T>) {
        *self.0.write() = Some(socket);
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.0.read().clone()
    }

    pub fn take(&self) -> Option<Arc<T>> {
        self.0.write().take()
    }
}

/// Local address of a bound socket, kept after the socket is released.
#[derive(Default)]
pub(crate) struct LocalAddrs {
    pub data: RwLock<Option<SocketAddr>>,
    pub ctrl: RwLock<Option<SocketAddr>>,
}

/// Applies TOS marking, logging instead of failing.
pub(crate) fn set_tos(socket: SockRef<'_>, tos: u32, ipv4: bool, layer: &str) {
    if !ipv4 {
        log::debug!("{layer}: tos marking is only applied to ipv4 sockets");
        return;
    }

    if let Err(e) = socket.set_tos(tos) {
        log::warn!("{layer}: failed to set tos marking: tos={tos:#x}, err={e}");
    }
}
