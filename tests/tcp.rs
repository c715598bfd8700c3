mod common;

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use codec::{Address, CtrlPacket, DataPacket};
use rtp_transport::{
    Error,
    error::SetupOp,
    transport::{
        CtrlMode, LoopState, Transport, TransportEnd, TransportOptions, TransportRecv,
        TransportWrite, end_channel, tcp::TransportTcp,
    },
};

use self::common::*;

fn listening(options: TransportOptions) -> Result<(Arc<TransportTcp>, Collected)> {
    let transport = Arc::new(TransportTcp::with_options(options)?);
    let (collector, collected) = Collector::new();
    transport.set_call_upper(collector);
    transport.listen_on_transports()?;

    Ok((transport, collected))
}

fn loopback() -> Result<TransportOptions> {
    Ok(TransportOptions::new(Address::local(localhost(), 0)?))
}

fn connect(transport: &TransportTcp) -> Result<TcpStream> {
    let stream = TcpStream::connect(peer_of(transport)?.data_addr())?;
    stream.set_read_timeout(Some(WAIT))?;
    Ok(stream)
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = (payload.len() as u16).to_be_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_strips_frame_header() -> Result<()> {
    let (transport, mut collected) = listening(loopback()?)?;
    let mut stream = connect(&transport)?;

    stream.write_all(&frame(&rtp_header(1)))?;

    let packet = next(&mut collected.data).await?;
    assert_eq!(packet.in_use(), 12);
    assert_eq!(packet.as_bytes(), &rtp_header(1));

    let from = packet.from_addr().copied().unwrap();
    assert_eq!(from.data_port, stream.local_addr()?.port());
    assert_eq!(from.ctrl_port, 0);

    transport.close_recv();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_split_and_coalesced_frames() -> Result<()> {
    let (transport, mut collected) = listening(loopback()?)?;
    let mut stream = connect(&transport)?;
    stream.set_nodelay(true)?;

    // One frame cut inside the header, then inside the payload.
    let split = frame(&rtp_header(1));
    stream.write_all(&split[..1])?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(&split[1..6])?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(&split[6..])?;

    // Three frames in one write.
    let mut coalesced = Vec::new();
    for sequence in 2..5u16 {
        coalesced.extend(frame(&rtp_header(sequence)));
    }

    stream.write_all(&coalesced)?;

    for sequence in 1..5u16 {
        let packet = next(&mut collected.data).await?;
        assert_eq!(packet.as_bytes(), &rtp_header(sequence));
    }

    assert!(nothing(&mut collected.data).await);

    transport.close_recv();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_write_is_framed() -> Result<()> {
    let (transport, _collected) = listening(loopback()?)?;
    let mut stream = connect(&transport)?;

    until(|| transport.is_connected()).await?;

    // The connection decides the peer.
    let written = transport.write_data_to(
        &DataPacket::from_slice(&rtp_header(9)),
        &Address::new(localhost(), 1, 0),
    )?;

    assert_eq!(written, 12);

    let mut bytes = [0u8; 14];
    stream.read_exact(&mut bytes)?;
    assert_eq!(&bytes[..2], &[0x00, 0x0c]);
    assert_eq!(&bytes[2..], &rtp_header(9));

    transport.close_recv();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_ctrl_connection() -> Result<()> {
    let (transport, mut collected) = listening(loopback()?)?;
    assert_eq!(transport.active_loops(), 2);

    let ctrl = transport.local_ctrl_addr().unwrap();
    let mut stream = TcpStream::connect(ctrl)?;
    stream.set_read_timeout(Some(WAIT))?;

    let report = [0x81u8, 0xc9, 0x00, 0x01, 0xde, 0xad, 0xbe, 0xef];
    stream.write_all(&frame(&report))?;

    let packet = next(&mut collected.ctrl).await?;
    assert_eq!(packet.as_bytes(), &report);
    assert_eq!(packet.from_addr().map(|it| it.data_port), Some(0));
    assert!(nothing(&mut collected.data).await);

    // Not connected on data, but the control connection is up.
    assert!(!transport.is_connected());
    transport.write_ctrl_to(
        &CtrlPacket::from_slice(&report),
        &Address::new(localhost(), 0, 1),
    )?;

    let mut bytes = [0u8; 10];
    stream.read_exact(&mut bytes)?;
    assert_eq!(&bytes[2..], &report);

    transport.close_recv();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_muxed_ctrl_uses_data_connection() -> Result<()> {
    let (transport, _collected) = listening(loopback()?.with_ctrl_mode(CtrlMode::Muxed))?;
    assert_eq!(transport.active_loops(), 1);
    assert_eq!(transport.local_ctrl_addr(), None);

    let mut stream = connect(&transport)?;
    until(|| transport.is_connected()).await?;

    transport.write_ctrl_to(
        &CtrlPacket::from_slice(&[0x81, 0xc8, 0x00, 0x00]),
        &Address::new(localhost(), 0, 1),
    )?;

    let mut bytes = [0u8; 6];
    stream.read_exact(&mut bytes)?;
    assert_eq!(bytes, [0x00, 0x04, 0x81, 0xc8, 0x00, 0x00]);

    transport.close_recv();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_close_before_accept() -> Result<()> {
    let transport = TransportTcp::new(localhost(), 0)?;
    let (sender, mut receiver) = end_channel();
    transport.set_end_channel(sender);
    transport.listen_on_transports()?;

    let data = transport.local_data_addr().unwrap();
    transport.close_recv();

    let mut ends = drain_end(&mut receiver, 2).await?;
    ends.sort_by_key(|it| *it as u8);
    assert_eq!(
        ends,
        vec![
            TransportEnd::DataTransportRecvStopped,
            TransportEnd::CtrlTransportRecvStopped
        ]
    );

    assert_eq!(
        transport.common().data_control().state(),
        LoopState::Terminated
    );

    // The listener went away with the loop.
    assert!(TcpStream::connect(data).is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_peer_disconnect() -> Result<()> {
    let (transport, mut collected) = listening(loopback()?)?;
    let (sender, mut receiver) = end_channel();
    transport.set_end_channel(sender);

    let stream = connect(&transport)?;
    until(|| transport.is_connected()).await?;
    drop(stream);

    assert_eq!(
        next(&mut receiver).await?,
        TransportEnd::DataTransportRecvStopped
    );

    let common = transport.common();
    assert_eq!(common.data_control().state(), LoopState::Terminated);
    assert_eq!(common.ctrl_control().state(), LoopState::Running);
    assert!(!transport.is_connected());
    assert!(nothing(&mut collected.data).await);

    transport.close_recv();
    assert_eq!(
        next(&mut receiver).await?,
        TransportEnd::CtrlTransportRecvStopped
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_write_before_connect() -> Result<()> {
    let transport = TransportTcp::new(localhost(), 0)?;
    let to = Address::new(localhost(), 40000, 40001);
    let packet = DataPacket::from_slice(&rtp_header(0));

    // Not listening yet, there is no connection either way.
    assert!(matches!(
        transport.write_data_to(&packet, &to),
        Err(Error::NotConnected)
    ));

    transport.listen_on_transports()?;
    assert!(matches!(
        transport.write_data_to(&packet, &to),
        Err(Error::NotConnected)
    ));

    assert!(matches!(
        transport.write_ctrl_to(&CtrlPacket::from_slice(&[0x81, 0xc8]), &to),
        Err(Error::NotConnected)
    ));

    transport.close_recv();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_stalled_peer_is_dropped() -> Result<()> {
    let (transport, _collected) =
        listening(loopback()?.with_write_deadline(Duration::from_millis(200)))?;
    let (sender, mut receiver) = end_channel();
    transport.set_end_channel(sender);

    // Connected, but never reads.
    let _stream = connect(&transport)?;
    until(|| transport.is_connected()).await?;

    let packet = DataPacket::from_slice(&vec![0u8; 60000]);
    let to = Address::new(localhost(), 0, 0);
    let started = Instant::now();

    // Writes fail fast once the socket and the send queue are full.
    let error = loop {
        match transport.write_data_to(&packet, &to) {
            Ok(_) => assert!(started.elapsed() < WAIT, "writes never refused"),
            Err(e) => break e,
        }
    };

    assert!(matches!(error, Error::Io(_)));

    // The stalled write hits its deadline and the connection is dropped.
    assert_eq!(
        next(&mut receiver).await?,
        TransportEnd::DataTransportRecvStopped
    );

    assert_eq!(
        transport.common().data_control().state(),
        LoopState::Terminated
    );

    assert!(!transport.is_connected());
    assert!(matches!(
        transport.write_data_to(&packet, &to),
        Err(Error::NotConnected)
    ));

    transport.close_recv();
    Ok(())
}

#[test]
fn test_tcp_listen_needs_runtime() -> Result<()> {
    let transport = TransportTcp::new(localhost(), 0)?;

    assert!(matches!(
        transport.listen_on_transports(),
        Err(Error::Setup {
            op: SetupOp::Spawn,
            ..
        })
    ));

    assert_eq!(transport.active_loops(), 0);
    Ok(())
}

#[test]
fn test_tcp_port_in_use() -> Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0")?;
    let port = occupied.local_addr()?.port();

    let base = if port % 2 == 0 { port } else { port - 1 };
    let transport = TransportTcp::new(localhost(), base)?;

    assert!(matches!(
        transport.listen_on_transports(),
        Err(Error::Setup {
            op: SetupOp::Listen,
            ..
        })
    ));

    assert_eq!(transport.active_loops(), 0);
    Ok(())
}
