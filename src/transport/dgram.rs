use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    time::Duration,
};

use super::{
    common::SocketSlot,
    recv::{MAX_DATAGRAM_SIZE, PacketSource},
};

use crate::Error;

/// Datagram socket read by a receive loop and shared with writers.
pub(crate) struct UdpSource {
    socket: Option<Arc<UdpSocket>>,
    slot: Arc<SocketSlot<UdpSocket>>,
    buffer: Vec<u8>,
}

impl UdpSource {
    /// Arms the read deadline and publishes the socket for writers.
    pub fn new(
        socket: UdpSocket,
        slot: Arc<SocketSlot<UdpSocket>>,
        deadline: Duration,
    ) -> io::Result<Self> {
        socket.set_read_timeout(Some(deadline))?;

        let socket = Arc::new(socket);
        slot.set(socket.clone());

        Ok(Self {
            socket: Some(socket),
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            slot,
        })
    }
}

impl PacketSource for UdpSource {
    fn recv(&mut self, on_packet: &mut dyn FnMut(&[u8], SocketAddr)) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;

        let (size, addr) = socket.recv_from(&mut self.buffer)?;
        on_packet(&self.buffer[..size], addr);
        Ok(())
    }

    fn release(&mut self) {
        self.slot.take();
        self.socket.take();
    }
}

/// Sends one datagram on the socket held by `slot`.
pub(crate) fn send_to(
    slot: &SocketSlot<UdpSocket>,
    bytes: &[u8],
    to: SocketAddr,
) -> Result<usize, Error> {
    let socket = slot.get().ok_or(Error::NotListening)?;
    Ok(socket.send_to(bytes, to)?)
}
