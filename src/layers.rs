//! Upper layers used by the binary.
//!
//! Real deployments put a session or SRTP layer on top of a backend, these
//! two stand in for one when the transport is run on its own.

use std::sync::Arc;

use codec::{Address, CtrlPacket, DataPacket};
use parking_lot::RwLock;

use crate::{
    Error,
    transport::{TransportEndSender, TransportRecv, TransportWrite},
};

#[derive(Default)]
struct Lower(RwLock<Option<Arc<dyn TransportWrite>>>);

impl Lower {
    fn set(&self, lower: Arc<dyn TransportWrite>) {
        *self.0.write() = Some(lower);
    }

    fn get(&self) -> Result<Arc<dyn TransportWrite>, Error> {
        self.0.read().clone().ok_or(Error::NotListening)
    }
}

/// Logs every packet and consumes it.
#[derive(Default)]
pub struct PacketLogger {
    lower: Lower,
}

impl TransportRecv for PacketLogger {
    fn set_call_upper(&self, _: Arc<dyn TransportRecv>) {}

    fn on_recv_data(&self, packet: DataPacket) -> bool {
        log::info!(
            "rtp packet: size={}, from={:?}",
            packet.in_use(),
            packet.from_addr()
        );

        true
    }

    fn on_recv_ctrl(&self, packet: CtrlPacket) -> bool {
        log::info!(
            "rtcp packet: size={}, from={:?}",
            packet.in_use(),
            packet.from_addr()
        );

        true
    }

    fn close_recv(&self) {}

    fn set_end_channel(&self, _: TransportEndSender) {}
}

impl TransportWrite for PacketLogger {
    fn set_to_lower(&self, lower: Arc<dyn TransportWrite>) {
        self.lower.set(lower);
    }

    fn write_data_to(&self, packet: &DataPacket, addr: &Address) -> Result<usize, Error> {
        self.lower.get()?.write_data_to(packet, addr)
    }

    fn write_ctrl_to(&self, packet: &CtrlPacket, addr: &Address) -> Result<usize, Error> {
        self.lower.get()?.write_ctrl_to(packet, addr)
    }

    fn close_write(&self) {}
}

/// Sends every received packet back to where it came from, through the
/// layer below.
#[derive(Default)]
pub struct Reflector {
    lower: Lower,
}

impl Reflector {
    fn reflect<F>(&self, from: Option<&Address>, size: usize, write: F) -> bool
    where
        F: FnOnce(&dyn TransportWrite, &Address) -> Result<usize, Error>,
    {
        let Some(addr) = from else {
            return false;
        };

        let lower = match self.lower.get() {
            Ok(it) => it,
            Err(e) => {
                log::warn!("reflector has no lower layer: err={e}");
                return false;
            }
        };

        match write(&*lower, addr) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("reflect packet failed: size={size}, addr={addr}, err={e}");
                false
            }
        }
    }
}

impl TransportRecv for Reflector {
    fn set_call_upper(&self, _: Arc<dyn TransportRecv>) {}

    fn on_recv_data(&self, packet: DataPacket) -> bool {
        self.reflect(packet.from_addr(), packet.in_use(), |lower, addr| {
            lower.write_data_to(&packet, addr)
        })
    }

    fn on_recv_ctrl(&self, packet: CtrlPacket) -> bool {
        self.reflect(packet.from_addr(), packet.in_use(), |lower, addr| {
            lower.write_ctrl_to(&packet, addr)
        })
    }

    fn close_recv(&self) {}

    fn set_end_channel(&self, _: TransportEndSender) {}
}

impl TransportWrite for Reflector {
    fn set_to_lower(&self, lower: Arc<dyn TransportWrite>) {
        self.lower.set(lower);
    }

    fn write_data_to(&self, packet: &DataPacket, addr: &Address) -> Result<usize, Error> {
        self.lower.get()?.write_data_to(packet, addr)
    }

    fn write_ctrl_to(&self, packet: &CtrlPacket, addr: &Address) -> Result<usize, Error> {
        self.lower.get()?.write_ctrl_to(packet, addr)
    }

    fn close_write(&self) {}
}
