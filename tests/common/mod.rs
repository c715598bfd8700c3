#![allow(dead_code)]

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Result, anyhow};
use rtp_transport::transport::{
    Transport, TransportEnd, TransportEndReceiver, TransportEndSender, TransportRecv,
};
use codec::{Address, CtrlPacket, DataPacket};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::{sleep, timeout},
};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Upper layer forwarding every delivered packet to a channel.
pub struct Collector {
    data: UnboundedSender<DataPacket>,
    ctrl: UnboundedSender<CtrlPacket>,
}

pub struct Collected {
    pub data: UnboundedReceiver<DataPacket>,
    pub ctrl: UnboundedReceiver<CtrlPacket>,
}

impl Collector {
    pub fn new() -> (Arc<Self>, Collected) {
        let (data, data_receiver) = unbounded_channel();
        let (ctrl, ctrl_receiver) = unbounded_channel();

        (
            Arc::new(Self { data, ctrl }),
            Collected {
                data: data_receiver,
                ctrl: ctrl_receiver,
            },
        )
    }
}

impl TransportRecv for Collector {
    fn set_call_upper(&self, _: Arc<dyn TransportRecv>) {}

    fn on_recv_data(&self, packet: DataPacket) -> bool {
        self.data.send(packet).is_ok()
    }

    fn on_recv_ctrl(&self, packet: CtrlPacket) -> bool {
        self.ctrl.send(packet).is_ok()
    }

    fn close_recv(&self) {}

    fn set_end_channel(&self, _: TransportEndSender) {}
}

pub async fn next<T>(receiver: &mut UnboundedReceiver<T>) -> Result<T> {
    timeout(WAIT, receiver.recv())
        .await?
        .ok_or_else(|| anyhow!("channel closed"))
}

/// Whether nothing arrives on `receiver` for a while.
pub async fn nothing<T>(receiver: &mut UnboundedReceiver<T>) -> bool {
    timeout(Duration::from_millis(300), receiver.recv())
        .await
        .is_err()
}

/// Receives `count` end values.
pub async fn drain_end(
    receiver: &mut TransportEndReceiver,
    count: usize,
) -> Result<Vec<TransportEnd>> {
    let mut ends = Vec::with_capacity(count);
    for _ in 0..count {
        ends.push(next(receiver).await?);
    }

    Ok(ends)
}

/// The address writes to `transport` have to target.
pub fn peer_of<T: Transport>(transport: &T) -> Result<Address> {
    let data = transport
        .local_data_addr()
        .ok_or_else(|| anyhow!("not listening"))?;

    Ok(Address::new(
        localhost(),
        data.port(),
        transport.local_ctrl_addr().map(|it| it.port()).unwrap_or(0),
    ))
}

/// Waits until `check` holds.
pub async fn until<F: Fn() -> bool>(check: F) -> Result<()> {
    timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    Ok(())
}

/// A 12 byte RTP fixed header with the given sequence number.
pub fn rtp_header(sequence: u16) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0] = 0x80;
    header[1] = 0x60;
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&(sequence as u32 * 160).to_be_bytes());
    header[8..12].copy_from_slice(&0x1234_5678u32.to_be_bytes());
    header
}
