use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

/// The four transport families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
    Ipc,
    Inproc,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Ipc => write!(f, "ipc"),
            TransportKind::Inproc => write!(f, "inproc"),
        }
    }
}

/// A parsed endpoint URI.
///
/// - `tcp://host:port` and `udp://host:port` with an IPv4 dotted-quad or a
///   bracketed IPv6 host,
/// - `ipc:///path/to/sock` for Unix-domain endpoints,
/// - `inproc://name` for the process-local registry.
///
/// The scheme is mandatory; anything else is `InvalidAddress`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Addr {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    Ipc(PathBuf),
    Inproc(String),
}

impl Addr {
    /// The transport family this address belongs to.
    pub fn kind(&self) -> TransportKind {
        match self {
            Addr::Tcp(_) => TransportKind::Tcp,
            Addr::Udp(_) => TransportKind::Udp,
            Addr::Ipc(_) => TransportKind::Ipc,
            Addr::Inproc(_) => TransportKind::Inproc,
        }
    }

    /// Socket address for the IP-based families.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Addr::Tcp(sa) | Addr::Udp(sa) => Some(*sa),
            _ => None,
        }
    }
}

impl FromStr for Addr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Err(Error::InvalidAddress(format!("missing scheme in {:?}", s)));
        };
        match scheme {
            "tcp" | "udp" => {
                let sa: SocketAddr = rest.parse().map_err(|_| {
                    Error::InvalidAddress(format!("bad host:port in {:?}", s))
                })?;
                Ok(if scheme == "tcp" {
                    Addr::Tcp(sa)
                } else {
                    Addr::Udp(sa)
                })
            }
            "ipc" => {
                if rest.is_empty() {
                    return Err(Error::InvalidAddress(format!("empty ipc path in {:?}", s)));
                }
                Ok(Addr::Ipc(PathBuf::from(rest)))
            }
            "inproc" => {
                if rest.is_empty() {
                    return Err(Error::InvalidAddress(format!("empty inproc name in {:?}", s)));
                }
                Ok(Addr::Inproc(rest.to_owned()))
            }
            other => Err(Error::InvalidAddress(format!(
                "unknown scheme {:?} in {:?}",
                other, s
            ))),
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Tcp(sa) => write!(f, "tcp://{}", sa),
            Addr::Udp(sa) => write!(f, "udp://{}", sa),
            Addr::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Addr::Inproc(name) => write!(f, "inproc://{}", name),
        }
    }
}
