use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, trace};

use crate::{
    auth::AuthStrategy,
    method_handlers::{Connect, TunnelConnect},
    parser::{ProxyRequest, ServerEvent, ServerParser},
    protocol::{AuthMethod, Command, Reply, SocksSocketAddr, RESERVED, VERSION},
    Socks5Error, Transport,
};

mod connect;
mod decision;

pub use decision::{Decision, Intercepted, RequestHandler, Responder};
use decision::Verdict;

/// The server side of one SOCKS5 connection.
///
/// Built per accepted connection with the strategies to offer, in order of preference, and
/// an optional [`RequestHandler`]. Without a handler every CONNECT request is relayed.
pub struct Socks5Socket<T, C = TunnelConnect> {
    inner: Transport<T>,
    auths: Vec<Arc<dyn AuthStrategy<T>>>,
    connect_handler: Arc<C>,
    request_handler: Option<Arc<dyn RequestHandler<T>>>,
}

impl<T, C> Socks5Socket<T, C>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connect,
{
    pub fn new(inner: Transport<T>, connect_handler: Arc<C>) -> Self {
        Self {
            inner,
            auths: Vec::new(),
            connect_handler,
            request_handler: None,
        }
    }

    pub fn with_auth(mut self, strategy: Arc<dyn AuthStrategy<T>>) -> Self {
        self.auths.push(strategy);
        self
    }

    pub fn with_auths<I>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn AuthStrategy<T>>>,
    {
        self.auths.extend(strategies);
        self
    }

    pub fn with_request_handler(mut self, handler: Arc<dyn RequestHandler<T>>) -> Self {
        self.request_handler = Some(handler);
        self
    }

    /// Drives the connection through negotiation, the request and the decision taken on it.
    ///
    /// Returns once the relay ends, the transport was handed over, or the request was denied.
    /// Any error closes the connection.
    #[instrument(skip_all)]
    pub async fn run(mut self) -> crate::Result<Decision> {
        let request = match self.negotiate().await {
            Ok(request) => request,
            Err(err) => {
                self.close().await;
                return Err(err);
            }
        };
        info!(
            "{} request from {:?} to {}",
            request.command, request.source, request.destination
        );

        let verdict = Self::decide(self.request_handler.clone(), request.clone()).await;
        match verdict.decision {
            Decision::Accept => {
                self.connect(request.destination).await?;
            }
            Decision::Intercept => {
                self.reply(Reply::Success, &SocksSocketAddr::unspecified())
                    .await?;
                if let Some(handover) = verdict.handover {
                    if handover.send(self.inner).is_err() {
                        debug!("Intercepted connection was dropped before the handover");
                    }
                }
            }
            Decision::Deny => {
                debug!("Request to {} denied", request.destination);
                self.inner
                    .write_all(&Reply::ConnectionNotAllowedByRuleset.short_frame())
                    .await?;
                self.close().await;
            }
        }
        Ok(verdict.decision)
    }

    async fn negotiate(&mut self) -> crate::Result<ProxyRequest> {
        let mut parser = ServerParser::new();

        let ServerEvent::Methods(methods) = self.inner.read_frame(&mut parser).await? else {
            return Err(Socks5Error::UnexpectedFrame("request"));
        };
        trace!("Client offered methods {:?}", methods);

        let strategy = self
            .auths
            .iter()
            .find(|strategy| methods.contains(&strategy.method().to_u8()))
            .cloned();
        let Some(strategy) = strategy else {
            debug!("None of the offered methods {:?} is configured", methods);
            self.write_auth_method(AuthMethod::NoAcceptableMethods)
                .await?;
            return Err(Socks5Error::NoAcceptableMethods);
        };

        self.write_auth_method(strategy.method()).await?;
        if !strategy.as_server(&mut self.inner).await? {
            debug!("Authentication with {:?} failed", strategy.method());
            return Err(Socks5Error::AuthenticationFailed);
        }

        parser.set_authed(true);
        parser.start();
        let ServerEvent::Request(mut request) = self.inner.read_frame(&mut parser).await? else {
            return Err(Socks5Error::UnexpectedFrame("greeting"));
        };
        request.source = self.inner.peer_addr();

        if request.command != Command::Connect {
            debug!("{} is not supported", request.command);
            self.inner
                .write_all(&Reply::CommandNotSupported.short_frame())
                .await?;
            return Err(Reply::CommandNotSupported.into());
        }
        Ok(request)
    }

    async fn decide(
        handler: Option<Arc<dyn RequestHandler<T>>>,
        request: ProxyRequest,
    ) -> Verdict<T> {
        let Some(handler) = handler else {
            return Verdict::accept();
        };
        let (responder, decision) = Responder::new();
        handler.handle(request, responder);
        decision.await.unwrap_or_else(|_| {
            debug!("Request handler dropped the responder without deciding");
            Verdict::deny()
        })
    }

    async fn reply(&mut self, reply: Reply, bnd_address: &SocksSocketAddr) -> crate::Result<()> {
        let mut frame = vec![VERSION, reply.to_u8(), RESERVED];
        frame.extend(bnd_address.to_bytes()?);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn write_auth_method(&mut self, auth_method: AuthMethod) -> crate::Result<()> {
        self.inner
            .write_all(&[VERSION, auth_method.to_u8()])
            .await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(err) = self.inner.shutdown().await {
            trace!("Shutdown failed: {}", err);
        }
    }
}
