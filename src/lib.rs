//! # rsocks5
//!
//! This crate implements both ends of the SOCKS5 protocol (RFC 1928) on top of tokio:
//! method negotiation, pluggable authentication, the CONNECT command and the relay of
//! application bytes once a tunnel is established.
//!
//! ## Overview of the SOCKS5 Protocol
//!
//! 1. **Handshake**: The client sends the authentication methods it supports. The server
//!    answers with the method it picked, or `0xFF` when none is acceptable.
//! 2. **Authentication**: The selected method runs its own sub-negotiation (nothing for
//!    "no authentication", a username/password exchange for method `0x02`).
//! 3. **Request**: The client asks the server to CONNECT to a destination address and port.
//! 4. **Reply**: The server answers with a status code and the address it bound for the
//!    outbound connection.
//! 5. **Data Transfer**: Bytes are relayed untouched in both directions until either side
//!    closes.
//!
//! BIND and UDP ASSOCIATE requests are parsed but answered with `CommandNotSupported`.
//!
//! ## Incremental parsing
//!
//! Every frame is decoded by a pure state machine ([`parser::ClientParser`],
//! [`parser::ServerParser`]) that can be fed arbitrarily fragmented chunks. When a phase
//! completes, whatever bytes followed the frame in the last chunk are pushed back into the
//! [`Transport`] so the next phase, or the application, sees them exactly once.
//!
//! ## Examples
//!
//! A server that accepts every CONNECT request and relays it:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rsocks5::{auth::NoAuthAuthenticator, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> rsocks5::Result<()> {
//!     let mut server = Server::bind("0.0.0.0:1080", ServerConfig::default()).await?;
//!     server.use_auth(Arc::new(NoAuthAuthenticator))?;
//!     server.run().await
//! }
//! ```
//!
//! A client tunnelling through that server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rsocks5::{auth::NoAuthAuthenticator, ClientConfig, Socks5Client};
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> rsocks5::Result<()> {
//!     let mut client = Socks5Client::new(ClientConfig::default().proxy("127.0.0.1", 1080));
//!     client.use_auth(Arc::new(NoAuthAuthenticator))?;
//!
//!     let mut stream = client.connect("example.com", 80).await?;
//!     stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```

use std::io;

pub use protocol::Reply;

pub mod auth;
pub mod client;
pub mod method_handlers;
pub mod parser;
pub mod protocol;
pub mod server;
mod socks5_socket;
pub mod transport;

pub use client::{ClientConfig, Socks5Client, Socks5Stream};
pub use server::{Server, ServerConfig};
pub use socks5_socket::{Decision, Intercepted, RequestHandler, Responder, Socks5Socket};
pub use transport::Transport;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Socks5Error>;

#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error("Incompatible SOCKS protocol version: {0}")]
    IncompatibleVersion(u8),
    #[error("Unexpected empty methods list")]
    EmptyMethodsList,
    #[error("Invalid request command: {0}")]
    InvalidCommand(u8),
    #[error("Invalid address type: {0}")]
    InvalidAddressType(u8),
    #[error("Invalid address length {len} for address type {atyp:#04x}")]
    InvalidAddressLength { atyp: u8, len: usize },
    #[error("Unsupported auth request version: {0}")]
    BadAuthVersion(u8),
    #[error("Bad username length (0)")]
    EmptyUsername,
    #[error("Bad password length (0)")]
    EmptyPassword,
    #[error("Parser was fed after being stopped")]
    ParserStopped,
    #[error("Received a {0} frame out of order")]
    UnexpectedFrame(&'static str),

    #[error("Domain name is {0} bytes long, at most 255 are allowed")]
    AddressTooLong(usize),
    #[error("Domain name cannot be empty")]
    EmptyDomain,

    #[error("Missing client authentication method(s)")]
    NoAuthMethodsConfigured,
    #[error("Too many authentication handlers (limited to 255)")]
    TooManyAuthMethods,
    #[error("Authentication method mismatch")]
    AuthMethodMismatch,
    #[error("No acceptable authentication method offered by the client")]
    NoAcceptableMethods,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Credential is {0} bytes long, at most 255 are allowed")]
    CredentialTooLong(usize),
    #[error("No credentials configured for username/password authentication")]
    MissingCredentials,

    #[error("SOCKS server replied: {0}")]
    Reply(#[from] Reply),
    #[error("SOCKS server replied with unknown status {0:#04x}")]
    UnknownReply(u8),

    #[error("The connection request was already decided")]
    DecisionAlreadyMade,
    #[error("The intercepted connection was never handed over")]
    InterceptAborted,

    #[error("Error in network operation")]
    Io(#[from] io::Error),
}

impl Socks5Error {
    /// True for malformed frames, as opposed to authentication, reply or transport failures.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Socks5Error::IncompatibleVersion(_)
                | Socks5Error::EmptyMethodsList
                | Socks5Error::InvalidCommand(_)
                | Socks5Error::InvalidAddressType(_)
                | Socks5Error::InvalidAddressLength { .. }
                | Socks5Error::BadAuthVersion(_)
                | Socks5Error::EmptyUsername
                | Socks5Error::EmptyPassword
                | Socks5Error::ParserStopped
                | Socks5Error::UnexpectedFrame(_)
        )
    }
}

impl From<Socks5Error> for Reply {
    fn from(value: Socks5Error) -> Self {
        match value {
            Socks5Error::Reply(r) => r,
            Socks5Error::Io(io) => io.kind().into(),
            Socks5Error::InvalidAddressType(_) => Reply::AddressTypeNotSupported,
            Socks5Error::InvalidCommand(_) => Reply::CommandNotSupported,
            _ => Reply::GeneralFailure,
        }
    }
}
