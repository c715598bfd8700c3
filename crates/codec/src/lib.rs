//! ## RTP/RTCP transport data model
//!
//! The types shared by every transport backend: the fixed capacity packet
//! buffers handed between layers, the RTP/RTCP address triple, and the
//! 2-byte length prefix framing used to carry RTP and RTCP packets over a
//! connection-oriented transport ([RFC4571]).
//!
//! Nothing in this crate performs I/O.
//!
//! [RFC4571]: https://tools.ietf.org/html/rfc4571

pub mod address;
pub mod framing;
pub mod packet;

pub use self::{
    address::Address,
    framing::{FrameDecoder, Framing},
    packet::{Ctrl, CtrlPacket, Data, DataPacket, Kind, Packet, PacketKind, new_ctrl_packet, new_data_packet},
};

use std::array::TryFromSliceError;

/// Capacity of a packet buffer when no explicit size is configured.
///
/// Large enough for any datagram that fits in an ethernet MTU.
pub const DEFAULT_BUFFER_SIZE: usize = 1500;

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    /// The port cannot serve as an RTP base port.
    InvalidPort(u16),
    /// The payload does not fit in a 16 bit length prefix.
    FrameTooLarge(usize),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::InvalidPort(port) => {
                write!(f, "invalid rtp port {port}, expected an even port below 65535")
            }
            Self::FrameTooLarge(size) => {
                write!(f, "frame payload of {size} bytes exceeds {}", u16::MAX)
            }
            Self::TryFromSliceError(e) => write!(f, "{e}"),
        }
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
