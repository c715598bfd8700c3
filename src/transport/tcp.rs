use std::{
    io::{self, ErrorKind},
    net::{IpAddr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use codec::{Address, Ctrl, CtrlPacket, Data, DataPacket, FrameDecoder, Framing};
use socket2::SockRef;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
    time::timeout,
};

use super::{
    CtrlMode, LoopControl, LoopState, NoopSink, Transport, TransportCommon, TransportEndSender,
    TransportOptions, TransportRecv, TransportWrite,
    common::{LocalAddrs, SocketSlot, set_tos},
    recv::{Deliver, MAX_DATAGRAM_SIZE, deliver_bytes, terminate},
};

use crate::{Error, error::SetupOp};

/// Frames waiting for a connection before writers are refused.
const SEND_QUEUE_SIZE: usize = 64;

/// Write side of an accepted connection.
///
/// Frames are queued to the connection task, which writes them in order, so
/// frames from concurrent writers never interleave on the stream.
pub(crate) struct TcpWriter {
    sender: mpsc::Sender<Bytes>,
    peer: SocketAddr,
}

impl TcpWriter {
    /// Queues one frame. A full queue means the peer stopped reading and is
    /// reported as `WouldBlock` instead of waiting.
    fn write_frame(&self, payload: &[u8]) -> Result<usize, Error> {
        let mut frame = BytesMut::with_capacity(payload.len() + Framing::HEADER_SIZE);
        Framing::encode(payload, &mut frame)?;

        match self.sender.try_send(frame.freeze()) {
            Ok(()) => Ok(payload.len()),
            Err(TrySendError::Full(_)) => {
                log::warn!(
                    "tcp send queue full: size={}, addr={}",
                    payload.len(),
                    self.peer
                );

                Err(Error::Io(io::Error::new(
                    ErrorKind::WouldBlock,
                    "tcp send queue is full",
                )))
            }
            Err(TrySendError::Closed(_)) => Err(Error::NotConnected),
        }
    }
}

/// One TCP channel: waits for a single peer, then reads frames from it and
/// writes queued frames to it.
struct TcpChannel {
    common: Arc<TransportCommon>,
    control: Arc<LoopControl>,
    slot: Arc<SocketSlot<TcpWriter>>,
    buffer_size: usize,
    tos: u32,
    write_deadline: Duration,
}

impl TcpChannel {
    async fn run<K: Deliver>(self, listener: TcpListener) {
        self.control.set_state(LoopState::Running);

        log::debug!(
            "{}: {} receive loop running",
            self.common.name(),
            K::CHANNEL
        );

        let accepted = tokio::select! {
            _ = self.control.stopped() => None,
            accepted = listener.accept() => Some(accepted),
        };

        // Exactly one peer per channel.
        drop(listener);

        let state = match accepted {
            None => LoopState::StopRequested,
            Some(Ok((stream, peer))) => self.serve::<K>(stream, peer).await,
            Some(Err(e)) => {
                log::warn!(
                    "{}: {} accept failed: err={e}",
                    self.common.name(),
                    K::CHANNEL
                );

                LoopState::Closing
            }
        };

        self.control.set_state(state);
        self.slot.take();

        terminate::<K>(&self.common, &self.control);
    }

    async fn serve<K: Deliver>(&self, mut stream: TcpStream, peer: SocketAddr) -> LoopState {
        // Packets are real time media, send each frame as soon as it is
        // written.
        if let Err(e) = stream.set_nodelay(true) {
            log::error!("tcp socket set nodelay failed!: addr={peer}, err={e}");
        }

        set_tos(
            SockRef::from(&stream),
            self.tos,
            peer.is_ipv4(),
            TransportTcp::NAME,
        );

        let (sender, mut receiver) = mpsc::channel::<Bytes>(SEND_QUEUE_SIZE);
        self.slot.set(Arc::new(TcpWriter { sender, peer }));

        log::info!("tcp transport accept: channel={}, addr={peer}", K::CHANNEL);

        let mut decoder = FrameDecoder::with_capacity(MAX_DATAGRAM_SIZE);
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        let state = loop {
            tokio::select! {
                _ = self.control.stopped() => break LoopState::StopRequested,
                read = stream.read(&mut buffer) => {
                    let size = match read {
                        // The peer closed the connection.
                        Ok(0) => break LoopState::Closing,
                        Ok(size) => size,
                        Err(e) => {
                            log::warn!("tcp socket read failed: addr={peer}, err={e}");
                            break LoopState::Closing;
                        }
                    };

                    decoder.extend(&buffer[..size]);
                    while let Some(frame) = decoder.next_frame() {
                        deliver_bytes::<K>(
                            &self.common,
                            &self.control,
                            self.buffer_size,
                            &frame[..],
                            peer,
                        );
                    }
                }
                Some(frame) = receiver.recv() => {
                    match timeout(self.write_deadline, stream.write_all(&frame)).await {
                        Ok(Ok(())) => {
                            log::trace!("tcp frame written: size={}, addr={peer}", frame.len());
                        }
                        Ok(Err(e)) => {
                            log::warn!("tcp socket write failed: addr={peer}, err={e}");
                            break LoopState::Closing;
                        }
                        Err(_) => {
                            log::warn!(
                                "tcp socket write stalled: addr={peer}, deadline={:?}",
                                self.write_deadline
                            );

                            break LoopState::Closing;
                        }
                    }
                }
            }
        };

        self.slot.take();

        log::info!(
            "tcp transport disconnect: channel={}, addr={peer}",
            K::CHANNEL
        );

        state
    }
}

/// RTP over TCP.
///
/// Listens on the data port and accepts exactly one connection, which then
/// carries RTP packets framed with a 2 byte length prefix. Unless control is
/// muxed, the control port gets its own listener, connection and task in the
/// same way.
///
/// The connection tasks run on the tokio runtime `listen_on_transports` is
/// called from.
pub struct TransportTcp {
    common: Arc<TransportCommon>,
    options: TransportOptions,
    data: Arc<SocketSlot<TcpWriter>>,
    ctrl: Arc<SocketSlot<TcpWriter>>,
    local: LocalAddrs,
    sink: NoopSink,
}

impl TransportTcp {
    const NAME: &'static str = "TransportTcp";

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

    /// Whether a peer is connected on the data channel.
    pub fn is_connected(&self) -> bool {
        self.data.get().is_some()
    }

    fn listen(addr: SocketAddr) -> Result<StdTcpListener, Error> {
        let listener =
            StdTcpListener::bind(addr).map_err(|e| Error::setup(SetupOp::Listen, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::setup(SetupOp::Listen, e))?;

        Ok(listener)
    }

    fn channel(&self, control: &Arc<LoopControl>, slot: &Arc<SocketSlot<TcpWriter>>) -> TcpChannel {
        TcpChannel {
            common: self.common.clone(),
            control: control.clone(),
            slot: slot.clone(),
            buffer_size: self.options.buffer_size,
            tos: self.options.tos,
            write_deadline: self.options.write_deadline,
        }
    }

    fn setup(&self) -> Result<(), Error> {
        let data_listener = Self::listen(self.options.local.data_addr())?;
        let ctrl_listener = match self.options.ctrl_mode {
            CtrlMode::Separate => Some(Self::listen(self.options.local.ctrl_addr())?),
            CtrlMode::Muxed => None,
        };

        let handle =
            Handle::try_current().map_err(|e| Error::setup(SetupOp::Spawn, io::Error::other(e)))?;

        // Registering with the reactor needs the runtime context.
        let _guard = handle.enter();
        let data_listener =
            TcpListener::from_std(data_listener).map_err(|e| Error::setup(SetupOp::Listen, e))?;
        let ctrl_listener = match ctrl_listener {
            Some(listener) => Some(
                TcpListener::from_std(listener).map_err(|e| Error::setup(SetupOp::Listen, e))?,
            ),
            None => None,
        };

        let data_addr = data_listener.local_addr()?;
        let ctrl_addr = match &ctrl_listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };

        *self.local.data.write() = Some(data_addr);
        *self.local.ctrl.write() = ctrl_addr;

        handle.spawn(
            self.channel(self.common.data_control(), &self.data)
                .run::<Data>(data_listener),
        );

        self.common.loop_started();

        if let Some(listener) = ctrl_listener {
            handle.spawn(
                self.channel(self.common.ctrl_control(), &self.ctrl)
                    .run::<Ctrl>(listener),
            );

            self.common.loop_started();
        }

        log::info!(
            "tcp transport listening: data={data_addr}, ctrl={ctrl_addr:?}, mode={:?}",
            self.options.ctrl_mode
        );

        Ok(())
    }
}

impl Transport for TransportTcp {
    /// Binds the listeners before returning, so a port already in use is a
    /// setup error. Accepting the peer happens on the connection task.
    fn listen_on_transports(&self) -> Result<(), Error> {
        self.common.listen(|| self.setup())
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

impl TransportRecv for TransportTcp {
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

/// The connection decides the peer, the address argument of the writes is
/// not used. A successful write means the frame was queued on the
/// connection.
impl TransportWrite for TransportTcp {
    fn set_to_lower(&self, lower: Arc<dyn TransportWrite>) {
        self.common.set_to_lower(lower);
    }

    fn write_data_to(&self, packet: &DataPacket, _: &Address) -> Result<usize, Error> {
        self.data
            .get()
            .ok_or(Error::NotConnected)?
            .write_frame(packet.as_bytes())
    }

    fn write_ctrl_to(&self, packet: &CtrlPacket, _: &Address) -> Result<usize, Error> {
        let slot = match self.options.ctrl_mode {
            CtrlMode::Separate => &self.ctrl,
            CtrlMode::Muxed => &self.data,
        };

        slot.get()
            .ok_or(Error::NotConnected)?
            .write_frame(packet.as_bytes())
    }

    fn close_write(&self) {}
}
