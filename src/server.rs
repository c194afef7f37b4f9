//! TCP front-end that runs a [`Socks5Socket`] for every accepted connection.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::{
    auth::AuthStrategy, method_handlers::TunnelConnect, RequestHandler, Socks5Error,
    Socks5Socket, Transport,
};

const MAX_AUTH_METHODS: usize = u8::MAX as usize;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Connections accepted while this many are open are dropped right away. `None` means
    /// no limit.
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }
}

/// A SOCKS5 server listening on TCP.
pub struct Server {
    listener: TcpListener,
    auths: Vec<Arc<dyn AuthStrategy<TcpStream>>>,
    request_handler: Option<Arc<dyn RequestHandler<TcpStream>>>,
    connect_handler: Arc<TunnelConnect>,
    connection_limit: Option<Arc<Semaphore>>,
    active: Arc<AtomicUsize>,
}

impl Server {
    pub async fn bind<A>(addr: A, config: ServerConfig) -> crate::Result<Self>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        let connection_limit = config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));
        match config.max_connections {
            Some(max) => info!(
                "Listening on {} (max {} connections)",
                listener.local_addr()?,
                max
            ),
            None => info!(
                "Listening on {} (unlimited connections)",
                listener.local_addr()?
            ),
        }

        Ok(Self {
            listener,
            auths: Vec::new(),
            request_handler: None,
            connect_handler: Arc::new(TunnelConnect),
            connection_limit,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Adds a strategy. When a client offers several methods, the strategy registered first
    /// wins.
    pub fn use_auth(&mut self, strategy: Arc<dyn AuthStrategy<TcpStream>>) -> crate::Result<()> {
        if self.auths.len() >= MAX_AUTH_METHODS {
            return Err(Socks5Error::TooManyAuthMethods);
        }
        self.auths.push(strategy);
        Ok(())
    }

    /// Installs the decision logic for CONNECT requests. Without one every request is
    /// relayed.
    pub fn on_request<H>(&mut self, handler: H)
    where
        H: RequestHandler<TcpStream> + 'static,
    {
        self.request_handler = Some(Arc::new(handler));
    }

    /// Number of connections currently being served.
    pub fn connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accepts connections forever. Failed accepts are logged and retried.
    pub async fn run(&self) -> crate::Result<()> {
        if self.auths.is_empty() {
            return Err(Socks5Error::NoAuthMethodsConfigured);
        }
        let listener = &self.listener;
        loop {
            let (stream, peer) = accept_next(move || listener.accept()).await;

            let permit = match &self.connection_limit {
                Some(limit) => match limit.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        debug!("Connection limit reached, dropping {}", peer);
                        continue;
                    }
                },
                None => None,
            };

            let mut transport = Transport::from(stream);
            transport.hold(ConnectionGuard::new(self.active.clone(), permit));
            let socket = Socks5Socket::new(transport, self.connect_handler.clone())
                .with_auths(self.auths.iter().cloned());
            let socket = match &self.request_handler {
                Some(handler) => socket.with_request_handler(handler.clone()),
                None => socket,
            };

            tokio::spawn(
                async move {
                    match socket.run().await {
                        Ok(decision) => debug!("Connection finished: {:?}", decision),
                        Err(err) => warn!("Connection failed: {}", err),
                    }
                }
                .instrument(span!(Level::INFO, "connection", %peer)),
            );
        }
    }
}

/// One connection slot of a [`Server`], carried by the connection's [`Transport`].
#[derive(Debug)]
pub(crate) struct ConnectionGuard {
    active: Arc<AtomicUsize>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    fn new(active: Arc<AtomicUsize>, permit: Option<OwnedSemaphorePermit>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active,
            _permit: permit,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Waits for the next connection. Accept errors (out of file descriptors, a connection
/// aborted before it was accepted) only affect that attempt.
async fn accept_next<S, F, Fut>(mut accept: F) -> (S, SocketAddr)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, SocketAddr)>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                error!("Accept error: {}", err);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}
