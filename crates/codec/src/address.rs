use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use super::Error;

/// RTP/RTCP address triple.
///
/// The same type describes a local bind target and a remote peer. A bind
/// address carries both ports, by convention the control (RTCP) port is the
/// data (RTP) port plus one. A delivery address, the `from_addr` of a received
/// packet, carries exactly one non-zero port matching the packet kind.
///
/// Remote peers are allowed to break the adjacent-port convention, for example
/// when RTCP is returned on the RTP port to get through a firewall that has
/// only seen RTP traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub ip: IpAddr,
    pub data_port: u16,
    pub ctrl_port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, data_port: u16, ctrl_port: u16) -> Self {
        Self {
            ip,
            data_port,
            ctrl_port,
        }
    }

    /// Creates a local bind address from a base port.
    ///
    /// The base port must be even, the following odd port is the control
    /// port. Port 0 asks the operating system for ephemeral ports on both
    /// channels.
    ///
    /// # Test
    ///
    /// ```
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use rtp_transport_codec::Address;
    ///
    /// let addr = Address::local(IpAddr::V4(Ipv4Addr::LOCALHOST), 5004).unwrap();
    ///
    /// assert_eq!(addr.data_port, 5004);
    /// assert_eq!(addr.ctrl_port, 5005);
    /// assert!(Address::local(IpAddr::V4(Ipv4Addr::LOCALHOST), 5005).is_err());
    /// ```
    pub fn local(ip: IpAddr, port: u16) -> Result<Self, Error> {
        if port == 0 {
            return Ok(Self::new(ip, 0, 0));
        }

        if port % 2 != 0 || port == u16::MAX {
            return Err(Error::InvalidPort(port));
        }

        Ok(Self::new(ip, port, port + 1))
    }

    /// Delivery address of a data packet received from `addr`.
    pub fn from_data(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port(), 0)
    }

    /// Delivery address of a control packet received from `addr`.
    pub fn from_ctrl(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), 0, addr.port())
    }

    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.data_port)
    }

    pub fn ctrl_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.ctrl_port)
    }

    pub fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}/{}", self.data_port, self.ctrl_port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}/{}", self.data_port, self.ctrl_port),
        }
    }
}
