use std::{future::Future, net::SocketAddr};

use tokio::io::{AsyncRead, AsyncWrite};
pub mod tunnel_connect;
use crate::protocol::SocksSocketAddr;

/// The `Connect` trait defines how a CONNECT request reaches its destination.
///
/// Implementations are shared by every connection a server handles, so they are called
/// through `&self` and must not keep per-connection state.
pub trait Connect: Send + Sync {
    /// The outbound connection relayed to the client.
    type ServerConnection: AsyncRead + AsyncWrite + Send + Unpin;

    /// Resolves `destination` and opens a connection to it.
    ///
    /// - Returns the connection and its local address, which is reported to the client as
    ///   BND.ADDR/BND.PORT.
    /// - Errors are turned into a reply code with `Reply::from`, so a resolution failure
    ///   should be reported as `Socks5Error::Reply(Reply::HostUnreachable)` and socket errors
    ///   passed through as `Socks5Error::Io`.
    fn establish_connection(
        &self,
        destination: &SocksSocketAddr,
    ) -> impl Future<Output = crate::Result<(Self::ServerConnection, SocketAddr)>> + Send;

    /// Forwards data between the client and the server connection until either side closes.
    fn start_listening<T>(
        &self,
        client: &mut T,
        connection: Self::ServerConnection,
    ) -> impl Future<Output = crate::Result<()>> + Send
    where
        T: AsyncWrite + AsyncRead + Send + Unpin;
}
