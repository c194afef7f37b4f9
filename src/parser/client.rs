use crate::{
    protocol::{Addr, AddressType, Reply, SocksSocketAddr, VERSION},
    Socks5Error,
};

use super::{Field, FrameParser, Parsed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Version,
    Method,
    RepStatus,
    RepRsv,
    RepAtyp,
    RepBndAddrVarLen,
    RepBndAddr,
    RepBndPort,
}

/// The address the server bound for the outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyInfo {
    pub bound: SocksSocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The METHOD the server selected, `0xFF` if none was acceptable.
    Method(u8),
    Reply(ReplyInfo),
}

/// Decodes what a SOCKS5 server sends to its client: the method selection, then (once
/// `authed`) the reply to the CONNECT request.
///
/// ```text
/// +----+--------+        +----+-----+-------+------+----------+----------+
/// |VER | METHOD |        |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+--------+        +----+-----+-------+------+----------+----------+
/// | 1  |   1    |        | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+--------+        +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug)]
pub struct ClientParser {
    state: State,
    atyp: AddressType,
    bnd_addr: Field,
    bnd_port: Field,
    authed: bool,
    listening: bool,
}

impl Default for ClientParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientParser {
    pub fn new() -> Self {
        Self {
            state: State::Version,
            atyp: AddressType::Ipv4,
            bnd_addr: Field::default(),
            bnd_port: Field::default(),
            authed: false,
            listening: true,
        }
    }

    pub fn set_authed(&mut self, authed: bool) {
        self.authed = authed;
    }

    pub fn is_authed(&self) -> bool {
        self.authed
    }

    /// Starts listening for the next phase. Does nothing if already listening.
    pub fn start(&mut self) {
        if self.listening {
            return;
        }
        self.listening = true;
        self.state = State::Version;
    }

    fn step(&mut self, chunk: &[u8]) -> crate::Result<Parsed<ClientEvent>> {
        let mut i = 0;
        while i < chunk.len() {
            match self.state {
                State::Version => {
                    if chunk[i] != VERSION {
                        return Err(Socks5Error::IncompatibleVersion(chunk[i]));
                    }
                    i += 1;
                    self.state = if self.authed {
                        State::RepStatus
                    } else {
                        State::Method
                    };
                }
                State::Method => {
                    let method = chunk[i];
                    i += 1;
                    return Ok(Parsed::Done {
                        event: ClientEvent::Method(method),
                        consumed: i,
                    });
                }
                State::RepStatus => {
                    let status = chunk[i];
                    if status != Reply::Success.to_u8() {
                        return Err(match Reply::from_u8(status) {
                            Some(reply) => Socks5Error::Reply(reply),
                            None => Socks5Error::UnknownReply(status),
                        });
                    }
                    i += 1;
                    self.state = State::RepRsv;
                }
                State::RepRsv => {
                    i += 1;
                    self.state = State::RepAtyp;
                }
                State::RepAtyp => {
                    let atyp = AddressType::from_u8(chunk[i])
                        .ok_or(Socks5Error::InvalidAddressType(chunk[i]))?;
                    i += 1;
                    self.atyp = atyp;
                    self.state = match atyp.fixed_len() {
                        Some(len) => {
                            self.bnd_addr = Field::with_len(len);
                            State::RepBndAddr
                        }
                        None => State::RepBndAddrVarLen,
                    };
                }
                State::RepBndAddrVarLen => {
                    self.bnd_addr = Field::with_len(chunk[i] as usize);
                    i += 1;
                    self.state = State::RepBndAddr;
                }
                State::RepBndAddr => {
                    i += self.bnd_addr.fill(&chunk[i..]);
                    if self.bnd_addr.is_full() {
                        self.bnd_port = Field::with_len(2);
                        self.state = State::RepBndPort;
                    }
                }
                State::RepBndPort => {
                    i += self.bnd_port.fill(&chunk[i..]);
                    if self.bnd_port.is_full() {
                        let addr = Addr::decode(self.atyp, &self.bnd_addr.take())?;
                        let bound = SocksSocketAddr::new(addr, self.bnd_port.port());
                        return Ok(Parsed::Done {
                            event: ClientEvent::Reply(ReplyInfo { bound }),
                            consumed: i,
                        });
                    }
                }
            }
        }
        Ok(Parsed::NeedMore)
    }
}

impl FrameParser for ClientParser {
    type Event = ClientEvent;

    fn feed(&mut self, chunk: &[u8]) -> crate::Result<Parsed<ClientEvent>> {
        if !self.listening {
            return Err(Socks5Error::ParserStopped);
        }
        let result = self.step(chunk);
        if !matches!(result, Ok(Parsed::NeedMore)) {
            self.stop();
        }
        result
    }

    fn stop(&mut self) {
        if !self.listening {
            return;
        }
        self.listening = false;
        self.state = State::Version;
        self.bnd_addr = Field::default();
        self.bnd_port = Field::default();
    }

    fn is_listening(&self) -> bool {
        self.listening
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::parser::test_util::{feed_split, partitions};

    fn authed() -> ClientParser {
        let mut parser = ClientParser::new();
        parser.set_authed(true);
        parser
    }

    #[test]
    fn method_selection() {
        let mut parser = ClientParser::new();
        assert_eq!(
            parser.feed(&[0x05, 0xFF]).unwrap(),
            Parsed::Done {
                event: ClientEvent::Method(0xFF),
                consumed: 2
            }
        );
        assert!(!parser.is_listening());
    }

    #[test]
    fn ipv4_reply() {
        let mut parser = authed();
        let event = parser
            .feed(&[0x05, 0x00, 0x00, 0x01, 192, 168, 100, 1, 0, 80])
            .unwrap();
        let Parsed::Done {
            event: ClientEvent::Reply(reply),
            consumed: 10,
        } = event
        else {
            panic!("expected a complete reply");
        };
        assert_eq!(reply.bound.addr.to_string(), "192.168.100.1");
        assert_eq!(reply.bound.port, 80);
    }

    #[test]
    fn ipv6_and_domain_replies() {
        let mut frame = vec![0x05, 0x00, 0x00, 0x04];
        frame.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
        frame.extend_from_slice(&[0; 11]);
        frame.push(1);
        frame.extend_from_slice(&[0x01, 0xBB]);
        let (event, rest) = feed_split(&mut authed(), &frame, &[]).unwrap().unwrap();
        assert!(rest.is_empty());
        let ClientEvent::Reply(reply) = event else {
            panic!("expected reply");
        };
        assert_eq!(
            reply.bound.addr.to_string(),
            "2001:0db8:0000:0000:0000:0000:0000:0001"
        );
        assert_eq!(reply.bound.port, 443);

        let mut frame = vec![0x05, 0x00, 0x00, 0x03, 9];
        frame.extend_from_slice(b"localhost");
        frame.extend_from_slice(&[0x04, 0x38]);
        let (event, _) = feed_split(&mut authed(), &frame, &[5]).unwrap().unwrap();
        assert_eq!(
            event,
            ClientEvent::Reply(ReplyInfo {
                bound: SocksSocketAddr::new(Addr::Domain("localhost".into()), 1080)
            })
        );
    }

    #[test]
    fn failure_status_maps_to_reply_kind() {
        let mut parser = authed();
        assert!(matches!(
            parser.feed(&[0x05, 0x02]),
            Err(Socks5Error::Reply(Reply::ConnectionNotAllowedByRuleset))
        ));
        assert!(!parser.is_listening());

        assert!(matches!(
            authed().feed(&[0x05, 0x2A]),
            Err(Socks5Error::UnknownReply(0x2A))
        ));
    }

    #[test]
    fn rejects_bad_version_and_address_type() {
        assert!(matches!(
            ClientParser::new().feed(&[0x04, 0x00]),
            Err(Socks5Error::IncompatibleVersion(0x04))
        ));
        assert!(matches!(
            authed().feed(&[0x05, 0x00, 0x00, 0x02]),
            Err(Socks5Error::InvalidAddressType(0x02))
        ));
    }

    #[test]
    fn any_partition_yields_the_same_reply() {
        let frame = [0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90, 0xAA, 0xBB];
        let expected = ClientEvent::Reply(ReplyInfo {
            bound: SocksSocketAddr::new(Addr::Ipv4(Ipv4Addr::LOCALHOST), 8080),
        });
        for cuts in partitions(frame.len()) {
            let (event, rest) = feed_split(&mut authed(), &frame, &cuts).unwrap().unwrap();
            assert_eq!(event, expected, "cuts {:?}", cuts);
            assert_eq!(rest, [0xAA, 0xBB], "cuts {:?}", cuts);
        }
    }

    #[test]
    fn restarts_for_the_reply_phase() {
        let mut parser = ClientParser::new();
        let (event, rest) = feed_split(&mut parser, &[0x05, 0x00, 0x05], &[]).unwrap().unwrap();
        assert_eq!(event, ClientEvent::Method(0x00));
        assert_eq!(rest, [0x05]);
        assert!(matches!(parser.feed(&rest), Err(Socks5Error::ParserStopped)));

        parser.set_authed(true);
        parser.start();
        parser.stop();
        parser.stop();
        parser.start();
        assert_eq!(parser.feed(&rest).unwrap(), Parsed::NeedMore);
        let event = parser.feed(&[0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(matches!(
            event,
            Parsed::Done {
                event: ClientEvent::Reply(_),
                consumed: 9
            }
        ));
    }
}
