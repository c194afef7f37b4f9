use std::{fmt, io};

use super::VERSION;

/// The REP field of a server reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowedByRuleset = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TTLExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Reply::Success => "succeeded",
            Reply::GeneralFailure => "general SOCKS server failure",
            Reply::ConnectionNotAllowedByRuleset => "connection not allowed by ruleset",
            Reply::NetworkUnreachable => "network is unreachable",
            Reply::HostUnreachable => "host is unreachable",
            Reply::ConnectionRefused => "connection refused",
            Reply::TTLExpired => "ttl expired",
            Reply::CommandNotSupported => "command not supported",
            Reply::AddressTypeNotSupported => "address type not supported",
        };
        write!(f, "{}", description)
    }
}

impl std::error::Error for Reply {}

impl Reply {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Reply::Success),
            0x01 => Some(Reply::GeneralFailure),
            0x02 => Some(Reply::ConnectionNotAllowedByRuleset),
            0x03 => Some(Reply::NetworkUnreachable),
            0x04 => Some(Reply::HostUnreachable),
            0x05 => Some(Reply::ConnectionRefused),
            0x06 => Some(Reply::TTLExpired),
            0x07 => Some(Reply::CommandNotSupported),
            0x08 => Some(Reply::AddressTypeNotSupported),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    /// The two-byte `VER | REP` frame sent when a request fails before any address is bound.
    pub fn short_frame(&self) -> [u8; 2] {
        [VERSION, self.to_u8()]
    }
}

impl From<io::ErrorKind> for Reply {
    fn from(error_kind: io::ErrorKind) -> Self {
        match error_kind {
            io::ErrorKind::NotFound
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable => Reply::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => Reply::NetworkUnreachable,
            io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            _ => Reply::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_connect_failures() {
        assert_eq!(Reply::from(io::ErrorKind::NotFound), Reply::HostUnreachable);
        assert_eq!(Reply::from(io::ErrorKind::TimedOut), Reply::HostUnreachable);
        assert_eq!(
            Reply::from(io::ErrorKind::HostUnreachable),
            Reply::HostUnreachable
        );
        assert_eq!(
            Reply::from(io::ErrorKind::NetworkUnreachable),
            Reply::NetworkUnreachable
        );
        assert_eq!(
            Reply::from(io::ErrorKind::ConnectionRefused),
            Reply::ConnectionRefused
        );
        assert_eq!(
            Reply::from(io::ErrorKind::PermissionDenied),
            Reply::GeneralFailure
        );
    }

    #[test]
    fn unknown_codes_are_not_mapped() {
        for code in 0x09..=u8::MAX {
            assert_eq!(Reply::from_u8(code), None);
        }
        assert_eq!(Reply::from_u8(0x02), Some(Reply::ConnectionNotAllowedByRuleset));
    }

    #[test]
    fn short_frame() {
        assert_eq!(Reply::CommandNotSupported.short_frame(), [0x05, 0x07]);
    }
}
