mod common;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    sync::Arc,
};

use anyhow::Result;
use codec::{Address, CtrlPacket, DataPacket};
use rtp_transport::{
    Error,
    error::SetupOp,
    transport::{
        LoopState, Transport, TransportRecv, TransportWrite, multicast::TransportMulticast,
    },
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use self::common::*;

const GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

#[test]
fn test_multicast_rejects_unicast_group() -> Result<()> {
    let transport = TransportMulticast::new(localhost(), 0)?;

    assert!(matches!(
        transport.listen_on_transports(),
        Err(Error::Setup {
            op: SetupOp::JoinGroup,
            ..
        })
    ));

    assert_eq!(transport.active_loops(), 0);
    assert_eq!(transport.local_data_addr(), None);
    assert_eq!(
        transport.common().data_control().state(),
        LoopState::NotStarted
    );

    assert!(matches!(
        transport.listen_on_transports(),
        Err(Error::Closed)
    ));

    Ok(())
}

#[test]
fn test_multicast_write_before_listen() -> Result<()> {
    let transport = TransportMulticast::new(IpAddr::V4(GROUP), 5004)?;
    let to = Address::new(IpAddr::V4(GROUP), 5004, 5005);

    assert!(matches!(
        transport.write_data_to(&DataPacket::from_slice(&rtp_header(0)), &to),
        Err(Error::NotListening)
    ));

    assert!(matches!(
        transport.write_ctrl_to(&CtrlPacket::from_slice(&[0x81, 0xc8]), &to),
        Err(Error::NotListening)
    ));

    assert_eq!(transport.local_ctrl_addr(), None);
    Ok(())
}

/// A second member of the group on the same port, sending with loopback
/// enabled so the transport on this host sees the datagram.
fn group_peer() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        5004,
    )))?;

    socket.join_multicast_v4(&GROUP, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(socket.into())
}

#[tokio::test]
async fn test_multicast_group_delivery() -> Result<()> {
    let transport = Arc::new(TransportMulticast::new(IpAddr::V4(GROUP), 5004)?);
    let (collector, mut collected) = Collector::new();
    transport.set_call_upper(collector);

    // Hosts without a multicast route, or with port 5004 taken, cannot run
    // this.
    if let Err(e) = transport.listen_on_transports() {
        eprintln!("skipping multicast delivery: listen failed: {e}");
        return Ok(());
    }

    assert_eq!(transport.active_loops(), 1);

    let sent = group_peer().and_then(|peer| {
        peer.send_to(&rtp_header(1), SocketAddr::new(IpAddr::V4(GROUP), 5004))?;
        Ok(peer)
    });

    let _peer = match sent {
        Ok(peer) => peer,
        Err(e) => {
            eprintln!("skipping multicast delivery: group peer failed: {e}");
            transport.close_recv();
            return Ok(());
        }
    };

    let packet = next(&mut collected.data).await?;
    assert_eq!(packet.in_use(), 12);
    assert_eq!(packet.as_bytes(), &rtp_header(1));
    assert_eq!(packet.from_addr().map(|it| it.ctrl_port), Some(0));

    assert!(nothing(&mut collected.data).await);
    assert!(nothing(&mut collected.ctrl).await);

    transport.close_recv();
    Ok(())
}
