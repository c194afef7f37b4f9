use std::{io, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{lookup_host, TcpStream},
};
use tracing::debug;

use crate::{
    protocol::{Addr, Reply, SocksSocketAddr},
    Socks5Error,
};

use super::Connect;

/// Connects to the destination over TCP and splices the two streams.
///
/// Domain names are resolved with the platform resolver; the first address returned is
/// dialed. TCP keep-alive is left disabled on the outbound socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelConnect;

impl TunnelConnect {
    async fn resolve(destination: &SocksSocketAddr) -> crate::Result<SocketAddr> {
        match &destination.addr {
            Addr::Domain(domain) => {
                let mut addrs = lookup_host((domain.as_str(), destination.port))
                    .await
                    .map_err(|err| {
                        debug!("Failed resolving {}: {}", domain, err);
                        Socks5Error::Reply(Reply::HostUnreachable)
                    })?;
                addrs
                    .next()
                    .ok_or(Socks5Error::Reply(Reply::HostUnreachable))
            }
            addr => match addr.ip() {
                Some(ip) => Ok(SocketAddr::new(ip, destination.port)),
                None => Err(Socks5Error::Reply(Reply::AddressTypeNotSupported)),
            },
        }
    }
}

impl Connect for TunnelConnect {
    type ServerConnection = TcpStream;

    async fn establish_connection(
        &self,
        destination: &SocksSocketAddr,
    ) -> crate::Result<(TcpStream, SocketAddr)> {
        let target = Self::resolve(destination).await?;
        let stream = TcpStream::connect(target).await?;
        let local_addr = stream.local_addr()?;
        Ok((stream, local_addr))
    }

    async fn start_listening<T>(&self, client: &mut T, mut server: TcpStream) -> crate::Result<()>
    where
        T: AsyncWrite + AsyncRead + Send + Unpin,
    {
        let res = tokio::io::copy_bidirectional(client, &mut server)
            .await
            .map(|(to_server, to_client)| {
                debug!(to_server, to_client, "Relay finished");
            });
        if let Err(err) = &res {
            if matches!(err.kind(), io::ErrorKind::NotConnected) {
                return Ok(());
            }
        }
        Ok(res?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[tokio::test]
    async fn refused_connection_maps_to_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TunnelConnect
            .establish_connection(&addr.into())
            .await
            .unwrap_err();
        assert_eq!(Reply::from(err), Reply::ConnectionRefused);
    }

    #[tokio::test]
    async fn unresolvable_domain_is_host_unreachable() {
        let destination =
            SocksSocketAddr::new(Addr::Domain("does-not-exist.invalid".into()), 80);
        let err = TunnelConnect
            .establish_connection(&destination)
            .await
            .unwrap_err();
        assert_eq!(Reply::from(err), Reply::HostUnreachable);
    }

    #[tokio::test]
    async fn relays_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let (conn, local) = TunnelConnect
            .establish_connection(&addr.into())
            .await
            .unwrap();
        assert_eq!(local.ip(), addr.ip());

        let (mut app, mut client) = tokio::io::duplex(64);
        let relay =
            tokio::spawn(async move { TunnelConnect.start_listening(&mut client, conn).await });

        app.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(app);
        relay.await.unwrap().ok();
    }
}
