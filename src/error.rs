use std::{fmt, io};

/// The setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOp {
    Bind,
    Listen,
    JoinGroup,
    Spawn,
}

impl fmt::Display for SetupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bind => "bind",
            Self::Listen => "listen",
            Self::JoinGroup => "join group",
            Self::Spawn => "spawn receiver",
        })
    }
}

#[derive(Debug)]
pub enum Error {
    /// Opening the sockets failed, the transport is unusable.
    Setup { op: SetupOp, source: io::Error },
    InvalidOptions(&'static str),
    /// Write before `listen_on_transports`, or after the receive loop
    /// released the socket.
    NotListening,
    /// The stream transport has not accepted a peer yet.
    NotConnected,
    /// The transport was closed and cannot listen again.
    Closed,
    Io(io::Error),
    Codec(codec::Error),
}

impl Error {
    pub(crate) fn setup(op: SetupOp, source: io::Error) -> Self {
        Self::Setup { op, source }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Setup { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup { op, source } => write!(f, "transport setup failed: {op}: {source}"),
            Self::InvalidOptions(reason) => write!(f, "invalid transport options: {reason}"),
            Self::NotListening => write!(f, "transport is not listening"),
            Self::NotConnected => write!(f, "transport has no connected peer"),
            Self::Closed => write!(f, "transport is closed"),
            Self::Io(e) => write!(f, "{e}"),
            Self::Codec(e) => write!(f, "{e}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}
