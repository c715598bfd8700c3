use std::{
    io::{self, ErrorKind},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    sync::Arc,
};

use codec::{Address, CtrlPacket, Data, DataPacket};
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};

use super::{
    NoopSink, Transport, TransportCommon, TransportEndSender, TransportOptions, TransportRecv,
    TransportWrite,
    common::{LocalAddrs, SocketSlot, set_tos},
    dgram::{self, UdpSource},
    recv::RecvLoop,
};

use crate::{Error, error::SetupOp};

/// UDP multicast transport.
///
/// The local address is the multicast group. A single socket bound to the
/// wildcard address on the data port joins the group, RTCP shares that
/// socket, so there is only a data receive loop.
pub struct TransportMulticast {
    common: Arc<TransportCommon>,
    options: TransportOptions,
    data: Arc<SocketSlot<UdpSocket>>,
    local: LocalAddrs,
    sink: NoopSink,
}

impl TransportMulticast {
    const NAME: &'static str = "TransportMulticast";

    /// Creates a transport for the multicast `group` on `port`.
    pub fn new(group: IpAddr, port: u16) -> Result<Self, Error> {
        Self::with_options(TransportOptions::new(Address::local(group, port)?))
    }

    pub fn with_options(options: TransportOptions) -> Result<Self, Error> {
        options.validate()?;

        Ok(Self {
            common: TransportCommon::new(Self::NAME),
            data: Default::default(),
            local: LocalAddrs::default(),
            sink: NoopSink::new(Self::NAME),
            options,
        })
    }

    pub fn common(&self) -> &Arc<TransportCommon> {
        &self.common
    }

    fn open_socket(&self) -> Result<UdpSocket, Error> {
        let group = self.options.local.ip;
        if !group.is_multicast() {
            return Err(Error::setup(
                SetupOp::JoinGroup,
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{group} is not a multicast address"),
                ),
            ));
        }

        let (domain, wildcard) = match group {
            IpAddr::V4(_) => (Domain::IPV4, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            IpAddr::V6(_) => (Domain::IPV6, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::setup(SetupOp::Bind, e))?;

        // Lets several processes on this host receive the same group.
        if let Err(e) = socket.set_reuse_address(true) {
            log::warn!("{}: failed to enable address reuse: err={e}", Self::NAME);
        }

        let bind = SocketAddr::new(wildcard, self.options.local.data_port);
        socket
            .bind(&SockAddr::from(bind))
            .map_err(|e| Error::setup(SetupOp::Bind, e))?;

        // Default interface.
        match group {
            IpAddr::V4(group) => {
                socket
                    .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                    .map_err(|e| Error::setup(SetupOp::JoinGroup, e))?;

                if let Err(e) = socket.set_multicast_loop_v4(false) {
                    log::warn!("{}: failed to disable multicast loopback: err={e}", Self::NAME);
                }
            }
            IpAddr::V6(group) => {
                socket
                    .join_multicast_v6(&group, 0)
                    .map_err(|e| Error::setup(SetupOp::JoinGroup, e))?;

                if let Err(e) = socket.set_multicast_loop_v6(false) {
                    log::warn!("{}: failed to disable multicast loopback: err={e}", Self::NAME);
                }
            }
        }

        let socket: UdpSocket = socket.into();

        // Only matters for what this socket sends.
        set_tos(
            SockRef::from(&socket),
            self.options.tos,
            group.is_ipv4(),
            Self::NAME,
        );

        Ok(socket)
    }

    fn setup(&self) -> Result<(), Error> {
        let socket = self.open_socket()?;
        let local_addr = socket.local_addr()?;

        RecvLoop {
            source: UdpSource::new(socket, self.data.clone(), self.options.data_deadline)?,
            common: self.common.clone(),
            control: self.common.data_control().clone(),
            buffer_size: self.options.buffer_size,
        }
        .spawn::<Data>()?;

        *self.local.data.write() = Some(local_addr);

        log::info!(
            "multicast transport listening: group={}, local={local_addr}",
            self.options.local.ip
        );

        Ok(())
    }
}

impl Transport for TransportMulticast {
    fn listen_on_transports(&self) -> Result<(), Error> {
        self.common.listen(|| {
            self.setup().inspect_err(|_| {
                self.data.take();
            })
        })
    }

    fn active_loops(&self) -> usize {
        self.common.active_loops()
    }

    fn local_data_addr(&self) -> Option<SocketAddr> {
        *self.local.data.read()
    }

    /// Multicast has no control socket.
    fn local_ctrl_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl TransportRecv for TransportMulticast {
    fn set_call_upper(&self, upper: Arc<dyn TransportRecv>) {
        self.common.set_call_upper(upper);
    }

    fn on_recv_data(&self, packet: DataPacket) -> bool {
        self.sink.on_recv_data(packet)
    }

    fn on_recv_ctrl(&self, packet: CtrlPacket) -> bool {
        self.sink.on_recv_ctrl(packet)
    }

    fn close_recv(&self) {
        self.common.close_recv();
    }

    fn set_end_channel(&self, sender: TransportEndSender) {
        self.common.set_end_channel(sender);
    }
}

impl TransportWrite for TransportMulticast {
    fn set_to_lower(&self, lower: Arc<dyn TransportWrite>) {
        self.common.set_to_lower(lower);
    }

    fn write_data_to(&self, packet: &DataPacket, addr: &Address) -> Result<usize, Error> {
        dgram::send_to(&self.data, packet.as_bytes(), addr.data_addr())
    }

    /// RTCP goes out on the data socket to the peer's data port, the only
    /// port the peer's firewall has seen traffic on.
    fn write_ctrl_to(&self, packet: &CtrlPacket, addr: &Address) -> Result<usize, Error> {
        dgram::send_to(&self.data, packet.as_bytes(), addr.data_addr())
    }

    fn close_write(&self) {}
}
