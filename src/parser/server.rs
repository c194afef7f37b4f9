use std::net::SocketAddr;

use crate::{
    protocol::{Addr, AddressType, Command, SocksSocketAddr, VERSION},
    Socks5Error,
};

use super::{Field, FrameParser, Parsed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Version,
    NMethods,
    Methods,
    ReqCmd,
    ReqRsv,
    ReqAtyp,
    ReqDstAddrVarLen,
    ReqDstAddr,
    ReqDstPort,
}

/// A client's request, as read off the wire.
///
/// `source` is never set by the parser, the session fills it from the peer address of the
/// transport before handing the request on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub command: Command,
    pub source: Option<SocketAddr>,
    pub destination: SocksSocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The METHOD bytes offered by the client, in the order they were sent.
    Methods(Vec<u8>),
    Request(ProxyRequest),
}

/// Decodes what a SOCKS5 client sends to its server: the greeting, then (once `authed`) the
/// request.
///
/// ```text
/// +----+----------+----------+   +----+-----+-------+------+----------+----------+
/// |VER | NMETHODS | METHODS  |   |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+----------+----------+   +----+-----+-------+------+----------+----------+
/// | 1  |    1     | 1 to 255 |   | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+----------+----------+   +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug)]
pub struct ServerParser {
    state: State,
    methods: Field,
    command: Command,
    atyp: AddressType,
    dst_addr: Field,
    dst_port: Field,
    authed: bool,
    listening: bool,
}

impl Default for ServerParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerParser {
    pub fn new() -> Self {
        Self {
            state: State::Version,
            methods: Field::default(),
            command: Command::Connect,
            atyp: AddressType::Ipv4,
            dst_addr: Field::default(),
            dst_port: Field::default(),
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

    fn step(&mut self, chunk: &[u8]) -> crate::Result<Parsed<ServerEvent>> {
        let mut i = 0;
        while i < chunk.len() {
            match self.state {
                State::Version => {
                    if chunk[i] != VERSION {
                        return Err(Socks5Error::IncompatibleVersion(chunk[i]));
                    }
                    i += 1;
                    self.state = if self.authed {
                        State::ReqCmd
                    } else {
                        State::NMethods
                    };
                }
                State::NMethods => {
                    let nmethods = chunk[i];
                    if nmethods == 0 {
                        return Err(Socks5Error::EmptyMethodsList);
                    }
                    i += 1;
                    self.methods = Field::with_len(nmethods as usize);
                    self.state = State::Methods;
                }
                State::Methods => {
                    i += self.methods.fill(&chunk[i..]);
                    if self.methods.is_full() {
                        return Ok(Parsed::Done {
                            event: ServerEvent::Methods(self.methods.take()),
                            consumed: i,
                        });
                    }
                }
                State::ReqCmd => {
                    self.command = Command::from_u8(chunk[i])
                        .ok_or(Socks5Error::InvalidCommand(chunk[i]))?;
                    i += 1;
                    self.state = State::ReqRsv;
                }
                State::ReqRsv => {
                    i += 1;
                    self.state = State::ReqAtyp;
                }
                State::ReqAtyp => {
                    let atyp = AddressType::from_u8(chunk[i])
                        .ok_or(Socks5Error::InvalidAddressType(chunk[i]))?;
                    i += 1;
                    self.atyp = atyp;
                    self.state = match atyp.fixed_len() {
                        Some(len) => {
                            self.dst_addr = Field::with_len(len);
                            State::ReqDstAddr
                        }
                        None => State::ReqDstAddrVarLen,
                    };
                }
                State::ReqDstAddrVarLen => {
                    self.dst_addr = Field::with_len(chunk[i] as usize);
                    i += 1;
                    self.state = State::ReqDstAddr;
                }
                State::ReqDstAddr => {
                    i += self.dst_addr.fill(&chunk[i..]);
                    if self.dst_addr.is_full() {
                        self.dst_port = Field::with_len(2);
                        self.state = State::ReqDstPort;
                    }
                }
                State::ReqDstPort => {
                    i += self.dst_port.fill(&chunk[i..]);
                    if self.dst_port.is_full() {
                        let addr = Addr::decode(self.atyp, &self.dst_addr.take())?;
                        let request = ProxyRequest {
                            command: self.command,
                            source: None,
                            destination: SocksSocketAddr::new(addr, self.dst_port.port()),
                        };
                        return Ok(Parsed::Done {
                            event: ServerEvent::Request(request),
                            consumed: i,
                        });
                    }
                }
            }
        }
        Ok(Parsed::NeedMore)
    }
}

impl FrameParser for ServerParser {
    type Event = ServerEvent;

    fn feed(&mut self, chunk: &[u8]) -> crate::Result<Parsed<ServerEvent>> {
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
        self.methods = Field::default();
        self.dst_addr = Field::default();
        self.dst_port = Field::default();
    }

    fn is_listening(&self) -> bool {
        self.listening
    }
}
