use std::{
    net::{IpAddr, SocketAddr, UdpSocket},
    sync::Arc,
};

use codec::{Address, Ctrl, CtrlPacket, Data, DataPacket};
use socket2::SockRef;

use super::{
    CtrlMode, NoopSink, Transport, TransportCommon, TransportEndSender, TransportOptions,
    TransportRecv, TransportWrite,
    common::{LocalAddrs, SocketSlot, set_tos},
    dgram::{self, UdpSource},
    recv::RecvLoop,
};

use crate::{Error, error::SetupOp};

/// UDP unicast transport.
///
/// Binds the data socket on the base port and, unless control is muxed, a
/// control socket on the following port. Each socket has its own receive
/// loop.
pub struct TransportUdp {
    common: Arc<TransportCommon>,
    options: TransportOptions,
    data: Arc<SocketSlot<UdpSocket>>,
    ctrl: Arc<SocketSlot<UdpSocket>>,
    local: LocalAddrs,
    sink: NoopSink,
}

impl TransportUdp {
    const NAME: &'static str = "TransportUdp";

    /// Creates a transport bound to `ip`, data on `port` and control on
    /// `port + 1`. No socket is opened until `listen_on_transports`.
    pub fn new(ip: IpAddr, port: u16) -> Result<Self, Error> {
        Self::with_options(TransportOptions::new(Address::local(ip, port)?))
    }

    pub fn with_options(options: TransportOptions) -> Result<Self, Error> {
        options.validate()?;

        Ok(Self {
            common: TransportCommon::new(Self::NAME),
            data: Default::default(),
            ctrl: Default::default(),
            local: LocalAddrs::default(),
            sink: NoopSink::new(Self::NAME),
            options,
        })
    }

    pub fn common(&self) -> &Arc<TransportCommon> {
        &self.common
    }

    fn bind(&self, addr: SocketAddr) -> Result<UdpSocket, Error> {
        let socket = UdpSocket::bind(addr).map_err(|e| Error::setup(SetupOp::Bind, e))?;
        set_tos(
            SockRef::from(&socket),
            self.options.tos,
            addr.is_ipv4(),
            Self::NAME,
        );

        Ok(socket)
    }

    fn setup(&self) -> Result<(), Error> {
        let data_socket = self.bind(self.options.local.data_addr())?;
        let ctrl_socket = match self.options.ctrl_mode {
            CtrlMode::Separate => Some(self.bind(self.options.local.ctrl_addr())?),
            CtrlMode::Muxed => None,
        };

        let data_addr = data_socket.local_addr()?;
        let ctrl_addr = match &ctrl_socket {
            Some(socket) => Some(socket.local_addr()?),
            None => None,
        };

        RecvLoop {
            source: UdpSource::new(data_socket, self.data.clone(), self.options.data_deadline)?,
            common: self.common.clone(),
            control: self.common.data_control().clone(),
            buffer_size: self.options.buffer_size,
        }
        .spawn::<Data>()?;

        *self.local.data.write() = Some(data_addr);

        if let Some(socket) = ctrl_socket {
            let spawned = UdpSource::new(socket, self.ctrl.clone(), self.options.ctrl_deadline)
                .map_err(Error::from)
                .and_then(|source| {
                    RecvLoop {
                        source,
                        common: self.common.clone(),
                        control: self.common.ctrl_control().clone(),
                        buffer_size: self.options.buffer_size,
                    }
                    .spawn::<Ctrl>()
                });

            if let Err(e) = spawned {
                // The data loop is already running, it still owes its end
                // value and stays counted in `active_loops`.
                self.common.data_control().request_stop();
                self.ctrl.take();
                return Err(e);
            }

            *self.local.ctrl.write() = ctrl_addr;
        }

        log::info!(
            "udp transport listening: data={data_addr}, ctrl={ctrl_addr:?}, mode={:?}",
            self.options.ctrl_mode
        );

        Ok(())
    }
}

impl Transport for TransportUdp {
    fn listen_on_transports(&self) -> Result<(), Error> {
        self.common.listen(|| {
            self.setup().inspect_err(|_| {
                self.data.take();
                self.ctrl.take();
            })
        })
    }

    fn active_loops(&self) -> usize {
        self.common.active_loops()
    }

    fn local_data_addr(&self) -> Option<SocketAddr> {
        *self.local.data.read()
    }

    fn local_ctrl_addr(&self) -> Option<SocketAddr> {
        *self.local.ctrl.read()
    }
}

impl TransportRecv for TransportUdp {
    fn set_call_upper(&self, upper: Arc<dyn TransportRecv>) {
        self.common.set_call_upper(upper);
    }

    /// The backend is the lowest layer and has nothing to do with a packet,
    /// an upper layer is expected to be installed.
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

impl TransportWrite for TransportUdp {
    fn set_to_lower(&self, lower: Arc<dyn TransportWrite>) {
        self.common.set_to_lower(lower);
    }

    fn write_data_to(&self, packet: &DataPacket, addr: &Address) -> Result<usize, Error> {
        dgram::send_to(&self.data, packet.as_bytes(), addr.data_addr())
    }

    fn write_ctrl_to(&self, packet: &CtrlPacket, addr: &Address) -> Result<usize, Error> {
        match self.options.ctrl_mode {
            CtrlMode::Separate => dgram::send_to(&self.ctrl, packet.as_bytes(), addr.ctrl_addr()),
            CtrlMode::Muxed => dgram::send_to(&self.data, packet.as_bytes(), addr.data_addr()),
        }
    }

    /// Nothing to do, `close_recv` releases the sockets.
    fn close_write(&self) {}
}
