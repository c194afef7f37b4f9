use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use crate::Socks5Error;

const MAX_DOMAIN_LEN: usize = u8::MAX as usize;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4 = 0x01,
    DomainName = 0x03,
    Ipv6 = 0x04,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AddressType::Ipv4),
            0x03 => Some(AddressType::DomainName),
            0x04 => Some(AddressType::Ipv6),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    /// Size of the address field, `None` for domain names whose length is on the wire.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            AddressType::Ipv4 => Some(4),
            AddressType::Ipv6 => Some(16),
            AddressType::DomainName => None,
        }
    }
}

/// An address together with its port, as carried by requests and replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocksSocketAddr {
    pub port: u16,
    pub addr: Addr,
}

impl SocksSocketAddr {
    pub fn new(addr: Addr, port: u16) -> Self {
        Self { port, addr }
    }

    /// Turns `Self` into: ATYP+ADDR+PORT
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.addr.encoded_len() + 3);

        bytes.push(self.addr.addr_type().to_u8());

        match &self.addr {
            Addr::Ipv4(addr) => bytes.extend_from_slice(&addr.octets()[..]),
            Addr::Ipv6(addr) => bytes.extend_from_slice(&addr.octets()[..]),
            Addr::Domain(domain) => {
                if domain.is_empty() {
                    return Err(Socks5Error::EmptyDomain);
                }
                if domain.len() > MAX_DOMAIN_LEN {
                    return Err(Socks5Error::AddressTooLong(domain.len()));
                }
                bytes.push(domain.len() as u8);
                bytes.extend_from_slice(domain.as_bytes())
            }
        }
        bytes.extend_from_slice(&self.port.to_be_bytes());

        Ok(bytes)
    }

    /// The unspecified IPv4 address with port zero, used when no address was bound.
    pub fn unspecified() -> Self {
        Self {
            port: 0,
            addr: Addr::Ipv4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl Default for SocksSocketAddr {
    fn default() -> Self {
        Self::unspecified()
    }
}

impl From<SocketAddr> for SocksSocketAddr {
    fn from(value: SocketAddr) -> Self {
        SocksSocketAddr {
            port: value.port(),
            addr: value.ip().into(),
        }
    }
}

impl fmt::Display for SocksSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addr {
            Addr::Ipv6(_) => write!(f, "[{}]:{}", self.addr, self.port),
            _ => write!(f, "{}:{}", self.addr, self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl Addr {
    pub fn addr_type(&self) -> AddressType {
        match self {
            Addr::Ipv4(_) => AddressType::Ipv4,
            Addr::Ipv6(_) => AddressType::Ipv6,
            Addr::Domain(_) => AddressType::DomainName,
        }
    }

    /// Classifies `host`: IP literals (abbreviated IPv6 forms included) become address
    /// variants, anything else is sent as a domain name.
    pub fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => ip.into(),
            Err(_) => Addr::Domain(host.to_owned()),
        }
    }

    /// Decodes the raw address field of a frame whose ATYP was `atyp`.
    pub fn decode(atyp: AddressType, bytes: &[u8]) -> crate::Result<Self> {
        let invalid_len = || Socks5Error::InvalidAddressLength {
            atyp: atyp.to_u8(),
            len: bytes.len(),
        };
        match atyp {
            AddressType::Ipv4 => {
                let octets: [u8; 4] = bytes.try_into().map_err(|_| invalid_len())?;
                Ok(Addr::Ipv4(octets.into()))
            }
            AddressType::Ipv6 => {
                let octets: [u8; 16] = bytes.try_into().map_err(|_| invalid_len())?;
                Ok(Addr::Ipv6(octets.into()))
            }
            AddressType::DomainName => {
                if bytes.is_empty() || bytes.len() > MAX_DOMAIN_LEN {
                    return Err(invalid_len());
                }
                Ok(Addr::Domain(String::from_utf8_lossy(bytes).into_owned()))
            }
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Addr::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Addr::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Addr::Domain(_) => None,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Addr::Ipv4(_) => 4,
            Addr::Ipv6(_) => 16,
            Addr::Domain(domain) => domain.len() + 1,
        }
    }
}

impl From<IpAddr> for Addr {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(ip) => Addr::Ipv4(ip),
            IpAddr::V6(ip) => Addr::Ipv6(ip),
        }
    }
}

/// IPv6 addresses render as eight groups of four zero-padded hex digits, never compressed.
impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Ipv4(ip) => write!(f, "{}", ip),
            Addr::Ipv6(ip) => {
                for (i, group) in ip.segments().iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{:04x}", group)?;
                }
                Ok(())
            }
            Addr::Domain(domain) => f.write_str(domain),
        }
    }
}
