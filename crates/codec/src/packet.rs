use std::{fmt, marker::PhantomData, net::SocketAddr};

use bytes::BytesMut;

use super::{Address, DEFAULT_BUFFER_SIZE};

/// Which channel a packet travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// RTP
    Data,
    /// RTCP
    Ctrl,
}

/// Type level marker for the packet kind.
pub trait PacketKind: Send + Sync + 'static {
    const KIND: Kind;
}

#[derive(Debug, Clone, Copy)]
pub struct Data;

#[derive(Debug, Clone, Copy)]
pub struct Ctrl;

impl PacketKind for Data {
    const KIND: Kind = Kind::Data;
}

impl PacketKind for Ctrl {
    const KIND: Kind = Kind::Ctrl;
}

/// One RTP or RTCP datagram.
///
/// The buffer has a fixed capacity decided when the packet is created, only
/// the first `in_use` bytes are valid. A packet is owned by exactly one code
/// path at a time, handing it to an upper layer moves it.
pub struct Packet<K> {
    buffer: BytesMut,
    in_use: usize,
    from_addr: Option<Address>,
    kind: PhantomData<K>,
}

pub type DataPacket = Packet<Data>;
pub type CtrlPacket = Packet<Ctrl>;

/// Allocates a zeroed data packet with the default capacity.
pub fn new_data_packet() -> DataPacket {
    Packet::new()
}

/// Allocates a zeroed control packet with the default capacity.
pub fn new_ctrl_packet() -> CtrlPacket {
    Packet::new()
}

impl<K: PacketKind> Packet<K> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::zeroed(capacity),
            in_use: 0,
            from_addr: None,
            kind: PhantomData,
        }
    }

    /// Creates a packet holding a copy of `bytes`, sized to fit.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut packet = Self::with_capacity(bytes.len().max(DEFAULT_BUFFER_SIZE));
        packet.fill(bytes);
        packet
    }

    pub fn kind(&self) -> Kind {
        K::KIND
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    /// Sets the number of valid bytes, clamped to the capacity.
    pub fn set_in_use(&mut self, size: usize) {
        self.in_use = size.min(self.capacity());
    }

    /// Copies `bytes` into the packet and returns how many were taken.
    ///
    /// Bytes beyond the capacity are dropped, a return value smaller than
    /// `bytes.len()` means the datagram was truncated.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_transport_codec::DataPacket;
    ///
    /// let mut packet = DataPacket::with_capacity(4);
    ///
    /// assert_eq!(packet.fill(&[1, 2, 3, 4, 5, 6]), 4);
    /// assert_eq!(packet.as_bytes(), &[1, 2, 3, 4]);
    /// ```
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let size = bytes.len().min(self.capacity());
        self.buffer[..size].copy_from_slice(&bytes[..size]);
        self.in_use = size;
        size
    }

    /// The valid bytes of the packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.in_use]
    }

    /// The whole buffer, for writers filling it in place before `set_in_use`.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    /// Address of the sender, only set on received packets.
    pub fn from_addr(&self) -> Option<&Address> {
        self.from_addr.as_ref()
    }

    /// Records the socket address the packet was read from.
    ///
    /// Only the port matching the packet kind is kept.
    pub fn set_source(&mut self, addr: SocketAddr) {
        self.from_addr = Some(match K::KIND {
            Kind::Data => Address::from_data(addr),
            Kind::Ctrl => Address::from_ctrl(addr),
        });
    }
}

impl<K: PacketKind> Default for Packet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PacketKind> fmt::Debug for Packet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &K::KIND)
            .field("in_use", &self.in_use)
            .field("capacity", &self.capacity())
            .field("from_addr", &self.from_addr)
            .finish()
    }
}
