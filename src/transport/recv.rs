//! Receive loop and its cancellation protocol.
//!
//! A blocking socket read offers no way to be interrupted from another
//! thread. Each datagram loop therefore reads with a short deadline and
//! checks an atomic stop flag between reads, so a close request is observed
//! within one deadline interval. Async loops wait on [`LoopControl::stopped`]
//! next to their reads instead. When a loop leaves, it releases its socket
//! and sends exactly one [`TransportEnd`] value, and it is the only sender of
//! that value.

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
};

use codec::{Ctrl, Data, Packet, PacketKind};
use tokio::sync::Notify;

use super::{TransportCommon, TransportEnd, TransportRecv};

use crate::{Error, error::SetupOp};

/// Largest datagram a socket read can return.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 65535;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    NotStarted = 0,
    Running = 1,
    /// Left because the owner asked it to.
    StopRequested = 2,
    /// Left because of a socket error.
    Closing = 3,
    Terminated = 4,
}

impl From<u8> for LoopState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::StopRequested,
            3 => Self::Closing,
            4 => Self::Terminated,
            _ => Self::NotStarted,
        }
    }
}

/// Stop flag and observable state of one receive loop.
#[derive(Debug)]
pub struct LoopControl {
    stop: AtomicBool,
    state: AtomicU8,
    notify: Notify,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(LoopState::NotStarted as u8),
            notify: Notify::new(),
        }
    }
}

impl LoopControl {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.notify.notified().await;
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LoopState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// A socket the receive loop reads packets from.
pub(crate) trait PacketSource: Send + 'static {
    /// Waits at most one deadline for input and passes every complete packet
    /// to `on_packet` together with the peer it came from.
    ///
    /// A deadline expiry is reported as a `WouldBlock` or `TimedOut` error.
    fn recv(&mut self, on_packet: &mut dyn FnMut(&[u8], SocketAddr)) -> io::Result<()>;

    /// Closes the socket. Called once, when the loop leaves.
    fn release(&mut self);
}

/// Delivery of a packet kind to the matching upper layer callback.
pub(crate) trait Deliver: PacketKind + Sized {
    const END: TransportEnd;
    const CHANNEL: &'static str;

    fn deliver(upper: &dyn TransportRecv, packet: Packet<Self>) -> bool;
}

impl Deliver for Data {
    const END: TransportEnd = TransportEnd::DataTransportRecvStopped;
    const CHANNEL: &'static str = "data";

    fn deliver(upper: &dyn TransportRecv, packet: Packet<Self>) -> bool {
        upper.on_recv_data(packet)
    }
}

impl Deliver for Ctrl {
    const END: TransportEnd = TransportEnd::CtrlTransportRecvStopped;
    const CHANNEL: &'static str = "ctrl";

    fn deliver(upper: &dyn TransportRecv, packet: Packet<Self>) -> bool {
        upper.on_recv_ctrl(packet)
    }
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// Builds a packet of kind `K` from `bytes` and hands it to the current
/// upper layer. Bytes read after a close request are dropped.
pub(crate) fn deliver_bytes<K: Deliver>(
    common: &TransportCommon,
    control: &LoopControl,
    buffer_size: usize,
    bytes: &[u8],
    addr: SocketAddr,
) {
    if control.is_stop_requested() {
        return;
    }

    let layer = common.name();
    let mut packet = Packet::<K>::with_capacity(buffer_size);
    if packet.fill(bytes) < bytes.len() {
        log::warn!(
            "{layer}: {} packet truncated: size={}, capacity={buffer_size}, addr={addr}",
            K::CHANNEL,
            bytes.len(),
        );
    }

    packet.set_source(addr);

    log::trace!(
        "{layer}: {} packet received: size={}, addr={addr}",
        K::CHANNEL,
        packet.in_use()
    );

    let upper = common.upper();
    K::deliver(&*upper, packet);
}

/// Last step of every loop, after its socket has been released.
pub(crate) fn terminate<K: Deliver>(common: &TransportCommon, control: &LoopControl) {
    control.set_state(LoopState::Terminated);

    log::debug!("{}: {} receive loop terminated", common.name(), K::CHANNEL);

    common.signal_end(K::END);
}

pub(crate) struct RecvLoop<S> {
    pub source: S,
    pub common: Arc<TransportCommon>,
    pub control: Arc<LoopControl>,
    pub buffer_size: usize,
}

impl<S: PacketSource> RecvLoop<S> {
    /// Starts the loop on its own thread.
    pub fn spawn<K: Deliver>(self) -> Result<(), Error> {
        let common = self.common.clone();

        thread::Builder::new()
            .name(format!("rtp-{}-recv", K::CHANNEL))
            .spawn(move || self.run::<K>())
            .map_err(|e| Error::setup(SetupOp::Spawn, e))?;

        common.loop_started();
        Ok(())
    }

    fn run<K: Deliver>(mut self) {
        let layer = self.common.name();
        self.control.set_state(LoopState::Running);

        log::debug!("{layer}: {} receive loop running", K::CHANNEL);

        loop {
            if self.control.is_stop_requested() {
                self.control.set_state(LoopState::StopRequested);
                break;
            }

            let control = &self.control;
            let common = &self.common;
            let buffer_size = self.buffer_size;
            let result = self.source.recv(&mut |bytes, addr| {
                deliver_bytes::<K>(common, control, buffer_size, bytes, addr)
            });

            match result {
                Ok(()) => (),
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    log::warn!("{layer}: {} receive loop read failed: err={e}", K::CHANNEL);

                    self.control.set_state(LoopState::Closing);
                    break;
                }
            }
        }

        self.source.release();
        terminate::<K>(&self.common, &self.control);
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::transport::end_channel;

    /// A socket that never receives anything.
    struct Idle;

    impl PacketSource for Idle {
        fn recv(&mut self, _: &mut dyn FnMut(&[u8], SocketAddr)) -> io::Result<()> {
            thread::sleep(Duration::from_millis(5));
            Err(ErrorKind::WouldBlock.into())
        }

        fn release(&mut self) {}
    }

    #[test]
    fn test_failed_listen_still_counts_started_loops() {
        let common = TransportCommon::new("test");
        let (sender, mut receiver) = end_channel();
        common.set_end_channel(sender);

        // The control loop fails after the data loop is already running.
        let result = common.listen(|| {
            RecvLoop {
                source: Idle,
                common: common.clone(),
                control: common.data_control().clone(),
                buffer_size: 16,
            }
            .spawn::<Data>()?;

            common.data_control().request_stop();
            Err(Error::setup(SetupOp::Spawn, ErrorKind::Other.into()))
        });

        assert!(matches!(result, Err(Error::Setup { op: SetupOp::Spawn, .. })));
        assert_eq!(common.active_loops(), 1);
        assert_eq!(
            receiver.blocking_recv(),
            Some(TransportEnd::DataTransportRecvStopped)
        );
    }

    #[tokio::test]
    async fn test_stopped_observes_earlier_request() {
        let control = LoopControl::default();
        control.request_stop();

        tokio::time::timeout(Duration::from_secs(1), control.stopped())
            .await
            .unwrap();
    }
}
