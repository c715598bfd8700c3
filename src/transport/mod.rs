//! Transport capability contracts.
//!
//! Every layer of an RTP stack, from a socket backend up to the session,
//! implements [`TransportRecv`] for inbound packets and [`TransportWrite`]
//! for outbound packets. Inbound packets travel up through `call_upper`
//! links, outbound packets travel down through `to_lower` links, so a layer
//! such as an encryption stage can sit between the session and the socket and
//! transform packets in either direction.

pub mod common;
pub mod recv;

mod dgram;

#[cfg(feature = "multicast")]
pub mod multicast;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "udp")]
pub mod udp;

pub use self::{
    common::{CtrlMode, TransportCommon, TransportOptions},
    recv::{LoopControl, LoopState},
};

use std::{net::SocketAddr, sync::Arc};

use codec::{Address, CtrlPacket, DataPacket};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::Error;

/// Value a receive loop sends when it has closed its socket and exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEnd {
    DataTransportRecvStopped,
    CtrlTransportRecvStopped,
}

pub type TransportEndSender = UnboundedSender<TransportEnd>;
pub type TransportEndReceiver = UnboundedReceiver<TransportEnd>;

/// Creates the channel a transport signals loop termination on.
pub fn end_channel() -> (TransportEndSender, TransportEndReceiver) {
    unbounded_channel()
}

/// Inbound half of a layer.
pub trait TransportRecv: Send + Sync {
    /// Installs the layer that receives the packets this layer delivers.
    fn set_call_upper(&self, upper: Arc<dyn TransportRecv>);

    /// Hands a received RTP packet to this layer, returns whether the layer
    /// consumed it.
    fn on_recv_data(&self, packet: DataPacket) -> bool;

    /// Hands a received RTCP packet to this layer, returns whether the layer
    /// consumed it.
    fn on_recv_ctrl(&self, packet: CtrlPacket) -> bool;

    /// Requests shutdown of every receive loop owned by this layer.
    ///
    /// Returns immediately, the loops acknowledge on the end channel.
    fn close_recv(&self);

    /// Installs the channel this layer signals loop termination on.
    fn set_end_channel(&self, sender: TransportEndSender);
}

/// Outbound half of a layer.
pub trait TransportWrite: Send + Sync {
    /// Installs the layer this layer delegates writes to.
    fn set_to_lower(&self, lower: Arc<dyn TransportWrite>);

    fn write_data_to(&self, packet: &DataPacket, addr: &Address) -> Result<usize, Error>;

    fn write_ctrl_to(&self, packet: &CtrlPacket, addr: &Address) -> Result<usize, Error>;

    /// Releases writer-only resources.
    ///
    /// Data and control may share a socket, so backends leave closing the
    /// sockets to `close_recv`.
    fn close_write(&self);
}

/// A socket backend, the bottom of both chains.
pub trait Transport: TransportRecv + TransportWrite {
    /// Opens the sockets and starts the receive loops.
    ///
    /// Calling it again on a listening transport does nothing. A closed
    /// transport cannot listen again, construct a new one instead.
    fn listen_on_transports(&self) -> Result<(), Error>;

    /// Number of receive loops started by `listen_on_transports`, which is
    /// the number of end values the owner has to drain after `close_recv`.
    fn active_loops(&self) -> usize;

    /// Local address of the data socket once listening.
    fn local_data_addr(&self) -> Option<SocketAddr>;

    /// Local address of the control socket, if the backend has one.
    fn local_ctrl_addr(&self) -> Option<SocketAddr>;
}

/// Upper layer of a backend nobody has attached to yet.
///
/// Drops every packet with a diagnostic.
pub struct NoopSink {
    layer: &'static str,
}

impl NoopSink {
    pub fn new(layer: &'static str) -> Self {
        Self { layer }
    }
}

impl TransportRecv for NoopSink {
    fn set_call_upper(&self, _: Arc<dyn TransportRecv>) {}

    fn on_recv_data(&self, packet: DataPacket) -> bool {
        log::warn!(
            "{}: no registered upper layer RTP packet handler: size={}",
            self.layer,
            packet.in_use()
        );

        false
    }

    fn on_recv_ctrl(&self, packet: CtrlPacket) -> bool {
        log::warn!(
            "{}: no registered upper layer RTCP packet handler: size={}",
            self.layer,
            packet.in_use()
        );

        false
    }

    fn close_recv(&self) {}

    fn set_end_channel(&self, _: TransportEndSender) {}
}

/// Links `upper` on top of `lower` in both directions.
pub fn stack<L, U>(lower: &Arc<L>, upper: &Arc<U>)
where
    L: TransportRecv + TransportWrite + 'static,
    U: TransportRecv + TransportWrite + 'static,
{
    lower.set_call_upper(upper.clone());
    upper.set_to_lower(lower.clone());
}
