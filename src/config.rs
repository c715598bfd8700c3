use std::{
    fs::read_to_string,
    net::{IpAddr, Ipv4Addr},
    str::FromStr,
    time::Duration,
};

use anyhow::Result;
use clap::Parser;
use codec::{Address, DEFAULT_BUFFER_SIZE};
use serde::Deserialize;

use crate::transport::{CtrlMode, TransportOptions};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Multicast,
    Tcp,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TransportConfig {
    #[serde(default = "TransportConfig::kind")]
    pub kind: TransportKind,
    ///
    /// local ip address
    ///
    /// The address the sockets are bound to. For a multicast transport this
    /// is the multicast group to join.
    ///
    #[serde(default = "TransportConfig::ip")]
    pub ip: IpAddr,
    ///
    /// rtp port
    ///
    /// Must be even, the rtcp port is the following odd port. Port 0 picks
    /// ephemeral ports.
    ///
    #[serde(default = "TransportConfig::port")]
    pub port: u16,
    ///
    /// Send and receive rtcp on the rtp port instead of a separate socket.
    /// Multicast transports always do this.
    ///
    #[serde(default)]
    pub rtcp_mux: bool,
    ///
    /// IP TOS byte of outgoing packets, DSCP AF41 by default.
    ///
    #[serde(default = "TransportConfig::tos")]
    pub tos: u32,
    ///
    /// Capacity of a packet buffer, larger datagrams are truncated.
    ///
    #[serde(default = "TransportConfig::buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "TransportConfig::data_deadline_ms")]
    pub data_deadline_ms: u64,
    #[serde(default = "TransportConfig::ctrl_deadline_ms")]
    pub ctrl_deadline_ms: u64,
    ///
    /// tcp only, a connection whose peer stops reading for this long is
    /// dropped.
    ///
    #[serde(default = "TransportConfig::write_deadline_ms")]
    pub write_deadline_ms: u64,
}

impl TransportConfig {
    fn kind() -> TransportKind {
        TransportKind::Udp
    }

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }

    fn port() -> u16 {
        5004
    }

    fn tos() -> u32 {
        TransportOptions::DIFFSERV_AF41
    }

    fn buffer_size() -> usize {
        DEFAULT_BUFFER_SIZE
    }

    fn data_deadline_ms() -> u64 {
        20
    }

    fn ctrl_deadline_ms() -> u64 {
        100
    }

    fn write_deadline_ms() -> u64 {
        1000
    }

    /// Builds the backend construction options.
    pub fn options(&self) -> Result<TransportOptions> {
        Ok(TransportOptions {
            local: Address::local(self.ip, self.port)?,
            buffer_size: self.buffer_size,
            tos: self.tos,
            data_deadline: Duration::from_millis(self.data_deadline_ms),
            ctrl_deadline: Duration::from_millis(self.ctrl_deadline_ms),
            write_deadline: Duration::from_millis(self.write_deadline_ms),
            ctrl_mode: if self.rtcp_mux {
                CtrlMode::Muxed
            } else {
                CtrlMode::Separate
            },
        })
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: Self::kind(),
            ip: Self::ip(),
            port: Self::port(),
            rtcp_mux: false,
            tos: Self::tos(),
            buffer_size: Self::buffer_size(),
            data_deadline_ms: Self::data_deadline_ms(),
            ctrl_deadline_ms: Self::ctrl_deadline_ms(),
            write_deadline_ms: Self::write_deadline_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub log: Log,
    ///
    /// Send every received packet back to its sender instead of only
    /// logging it.
    ///
    #[serde(default)]
    pub reflect: bool,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: rtp-transport --config /etc/rtp-transport/config.json5
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is specified,
    /// the configuration is read from the configuration file, otherwise the
    /// default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => Self::from_json5(&read_to_string(path)?)?,
            None => Self::default(),
        })
    }

    pub fn from_json5(text: &str) -> Result<Self> {
        Ok(serde_json5::from_str::<Self>(text)?)
    }
}
