use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::LlpError;

/// Local IPv4 address an adapter binds to.
///
/// Accepts the textual dotted-quad form as well as binary forms:
///
/// ```
/// use std::net::Ipv4Addr;
/// use llp::LocalAddr;
///
/// let text: LocalAddr = "10.0.0.1".parse()?;
/// assert_eq!(text, LocalAddr::from([10, 0, 0, 1]));
/// assert_eq!(text, LocalAddr::from(0x0A00_0001u32));
/// assert_eq!(text.ip(), Ipv4Addr::new(10, 0, 0, 1));
/// # Ok::<(), llp::LlpError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalAddr(Ipv4Addr);

impl LocalAddr {
    pub fn ip(self) -> Ipv4Addr {
        self.0
    }
}

impl From<Ipv4Addr> for LocalAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip)
    }
}

impl From<[u8; 4]> for LocalAddr {
    fn from(octets: [u8; 4]) -> Self {
        Self(Ipv4Addr::from(octets))
    }
}

/// First octet most significant, the same convention data requests use.
impl From<u32> for LocalAddr {
    fn from(value: u32) -> Self {
        Self(Ipv4Addr::from(value))
    }
}

impl FromStr for LocalAddr {
    type Err = LlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| LlpError::InvalidAddress(s.to_string()))
    }
}

impl TryFrom<&str> for LocalAddr {
    type Error = LlpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
