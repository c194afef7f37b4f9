//! The client side: negotiates with a SOCKS5 proxy and hands back a tunnel to the
//! destination.

use std::{
    io,
    net::IpAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{lookup_host, TcpStream},
};
use tracing::{debug, instrument, trace};

use crate::{
    auth::AuthStrategy,
    parser::{ClientEvent, ClientParser, ReplyInfo},
    protocol::{Addr, Command, SocksSocketAddr, RESERVED, VERSION},
    Socks5Error, Transport,
};

const MAX_AUTH_METHODS: usize = u8::MAX as usize;

/// Where the proxy lives and how destination names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub proxy_host: String,
    pub proxy_port: u16,
    /// Resolve destination names before sending the request, so the proxy only sees
    /// addresses.
    pub local_dns: bool,
    /// With `local_dns`, fail when the name does not resolve instead of letting the proxy
    /// try.
    pub strict_local_dns: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_host: "localhost".to_owned(),
            proxy_port: 1080,
            local_dns: true,
            strict_local_dns: true,
        }
    }
}

impl ClientConfig {
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = host.into();
        self.proxy_port = port;
        self
    }

    pub fn local_dns(mut self, local_dns: bool) -> Self {
        self.local_dns = local_dns;
        self
    }

    pub fn strict_local_dns(mut self, strict_local_dns: bool) -> Self {
        self.strict_local_dns = strict_local_dns;
        self
    }
}

/// A SOCKS5 client.
///
/// Strategies are offered to the proxy in registration order; at least one is required.
pub struct Socks5Client<T = TcpStream> {
    config: ClientConfig,
    auths: Vec<Arc<dyn AuthStrategy<T>>>,
}

impl Socks5Client<TcpStream> {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_config(config)
    }

    /// Opens a tunnel to `host:port` through the configured proxy.
    pub async fn connect(&self, host: &str, port: u16) -> crate::Result<Socks5Stream<TcpStream>> {
        if self.auths.is_empty() {
            return Err(Socks5Error::NoAuthMethodsConfigured);
        }
        let host = self.resolve_locally(host, port).await?;

        let stream =
            TcpStream::connect((self.config.proxy_host.as_str(), self.config.proxy_port)).await?;
        debug!(
            "Connected to proxy {}:{}",
            self.config.proxy_host, self.config.proxy_port
        );
        self.handshake(Transport::from(stream), &host, port).await
    }

    async fn resolve_locally(&self, host: &str, port: u16) -> crate::Result<String> {
        if !self.config.local_dns || host.parse::<IpAddr>().is_ok() {
            return Ok(host.to_owned());
        }
        let resolved = lookup_host((host, port)).await.and_then(|mut addrs| {
            addrs.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "name resolved to no address")
            })
        });
        match resolved {
            Ok(addr) => {
                debug!("Resolved {} to {}", host, addr.ip());
                Ok(addr.ip().to_string())
            }
            Err(err) if self.config.strict_local_dns => Err(err.into()),
            Err(err) => {
                debug!("Resolving {} failed ({}), leaving it to the proxy", host, err);
                Ok(host.to_owned())
            }
        }
    }
}

impl<T> Socks5Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// A client for transports other than TCP, driven through [`handshake`](Self::handshake).
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            auths: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn use_auth(&mut self, strategy: Arc<dyn AuthStrategy<T>>) -> crate::Result<()> {
        if self.auths.len() >= MAX_AUTH_METHODS {
            return Err(Socks5Error::TooManyAuthMethods);
        }
        self.auths.push(strategy);
        Ok(())
    }

    /// Negotiates a CONNECT to `host:port` over an already connected `transport`.
    ///
    /// Literal IPv4/IPv6 addresses are sent as such, anything else as a domain name. On error
    /// the transport is shut down.
    #[instrument(skip_all, fields(destination = %host, port = port))]
    pub async fn handshake(
        &self,
        mut transport: Transport<T>,
        host: &str,
        port: u16,
    ) -> crate::Result<Socks5Stream<T>> {
        if self.auths.is_empty() {
            return Err(Socks5Error::NoAuthMethodsConfigured);
        }
        let destination = SocksSocketAddr::new(Addr::from_host(host), port).to_bytes()?;

        match self.negotiate(&mut transport, destination).await {
            Ok(reply) => {
                debug!("Tunnel ready, proxy bound {}", reply.bound);
                Ok(Socks5Stream { transport, reply })
            }
            Err(err) => {
                if let Err(shutdown) = transport.shutdown().await {
                    trace!("Shutdown failed: {}", shutdown);
                }
                Err(err)
            }
        }
    }

    async fn negotiate(
        &self,
        transport: &mut Transport<T>,
        destination: Vec<u8>,
    ) -> crate::Result<ReplyInfo> {
        let mut greeting = Vec::with_capacity(2 + self.auths.len());
        greeting.push(VERSION);
        greeting.push(self.auths.len() as u8);
        greeting.extend(self.auths.iter().map(|strategy| strategy.method().to_u8()));
        transport.write_all(&greeting).await?;
        transport.flush().await?;

        let mut parser = ClientParser::new();
        let ClientEvent::Method(method) = transport.read_frame(&mut parser).await? else {
            return Err(Socks5Error::UnexpectedFrame("reply"));
        };
        trace!("Proxy selected method {:#04x}", method);

        let strategy = self
            .auths
            .iter()
            .find(|strategy| strategy.method().to_u8() == method)
            .cloned()
            .ok_or(Socks5Error::AuthMethodMismatch)?;
        if !strategy.as_client(transport).await? {
            return Err(Socks5Error::AuthenticationFailed);
        }

        parser.set_authed(true);
        parser.start();
        let mut request = vec![VERSION, Command::Connect.to_u8(), RESERVED];
        request.extend(destination);
        transport.write_all(&request).await?;
        transport.flush().await?;

        let ClientEvent::Reply(reply) = transport.read_frame(&mut parser).await? else {
            return Err(Socks5Error::UnexpectedFrame("method selection"));
        };
        Ok(reply)
    }
}

/// An established tunnel. Reads and writes go to the destination.
#[derive(Debug)]
pub struct Socks5Stream<T> {
    transport: Transport<T>,
    reply: ReplyInfo,
}

impl<T> Socks5Stream<T> {
    /// The address the proxy bound for the outbound connection.
    pub fn bound_addr(&self) -> &SocksSocketAddr {
        &self.reply.bound
    }

    pub fn reply(&self) -> &ReplyInfo {
        &self.reply
    }

    /// The underlying transport. Bytes the proxy sent right behind its reply are still
    /// pending in it.
    pub fn into_inner(self) -> Transport<T> {
        self.transport
    }
}

impl<T> AsyncRead for Socks5Stream<T>
where
    T: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.transport).poll_read(cx, buf)
    }
}

impl<T> AsyncWrite for Socks5Stream<T>
where
    T: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.transport).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.transport).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.transport).poll_shutdown(cx)
    }
}
