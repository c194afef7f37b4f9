use tokio::sync::oneshot;

use crate::{parser::ProxyRequest, Socks5Error, Transport};

/// How a connection request ended up being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Connected to the destination and relayed.
    Accept,
    /// Replied with success and handed the client connection to the application.
    Intercept,
    /// Replied with "connection not allowed by ruleset" and closed.
    Deny,
}

pub(crate) struct Verdict<T> {
    pub(crate) decision: Decision,
    pub(crate) handover: Option<oneshot::Sender<Transport<T>>>,
}

impl<T> Verdict<T> {
    pub(crate) fn accept() -> Self {
        Self {
            decision: Decision::Accept,
            handover: None,
        }
    }

    pub(crate) fn deny() -> Self {
        Self {
            decision: Decision::Deny,
            handover: None,
        }
    }
}

/// The one-shot answer to a connection request.
///
/// Exactly one of [`accept`](Self::accept), [`intercept`](Self::intercept) or
/// [`deny`](Self::deny) takes effect; later calls fail with
/// [`Socks5Error::DecisionAlreadyMade`]. Dropping an undecided responder denies the request.
/// The responder can be moved into another task to decide asynchronously.
pub struct Responder<T> {
    tx: Option<oneshot::Sender<Verdict<T>>>,
}

impl<T> Responder<T> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Verdict<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Connect to the destination and relay.
    pub fn accept(&mut self) -> crate::Result<()> {
        self.settle(Verdict::accept())
    }

    /// Refuse the request.
    pub fn deny(&mut self) -> crate::Result<()> {
        self.settle(Verdict::deny())
    }

    /// Reply with success without connecting anywhere and take over the client connection.
    ///
    /// The returned [`Intercepted`] resolves once the success reply has been written.
    pub fn intercept(&mut self) -> crate::Result<Intercepted<T>> {
        let (handover, rx) = oneshot::channel();
        self.settle(Verdict {
            decision: Decision::Intercept,
            handover: Some(handover),
        })?;
        Ok(Intercepted { rx })
    }

    pub fn is_decided(&self) -> bool {
        self.tx.is_none()
    }

    fn settle(&mut self, verdict: Verdict<T>) -> crate::Result<()> {
        let tx = self.tx.take().ok_or(Socks5Error::DecisionAlreadyMade)?;
        // The session may already be gone; the decision is spent either way.
        let _ = tx.send(verdict);
        Ok(())
    }
}

/// A client connection taken over by the application.
pub struct Intercepted<T> {
    rx: oneshot::Receiver<Transport<T>>,
}

impl<T> Intercepted<T> {
    /// Waits for the session to hand over the connection, right after the success reply.
    pub async fn transport(self) -> crate::Result<Transport<T>> {
        self.rx.await.map_err(|_| Socks5Error::InterceptAborted)
    }
}

/// Decides what to do with a CONNECT request.
///
/// Closures `Fn(ProxyRequest, Responder<T>)` implement this trait.
pub trait RequestHandler<T>: Send + Sync {
    fn handle(&self, request: ProxyRequest, responder: Responder<T>);
}

impl<T, F> RequestHandler<T> for F
where
    F: Fn(ProxyRequest, Responder<T>) + Send + Sync,
{
    fn handle(&self, request: ProxyRequest, responder: Responder<T>) {
        self(request, responder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_the_first_decision_counts() {
        let (mut responder, rx) = Responder::<()>::new();
        assert!(!responder.is_decided());
        responder.deny().unwrap();
        assert!(responder.is_decided());
        assert!(matches!(
            responder.accept(),
            Err(Socks5Error::DecisionAlreadyMade)
        ));
        assert!(matches!(
            responder.intercept(),
            Err(Socks5Error::DecisionAlreadyMade)
        ));
        assert_eq!(rx.await.unwrap().decision, Decision::Deny);
    }

    #[tokio::test]
    async fn dropped_responder_is_observable() {
        let (responder, rx) = Responder::<()>::new();
        drop(responder);
        assert!(rx.await.is_err());
    }
}
