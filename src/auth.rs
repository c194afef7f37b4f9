//! Authentication strategies.
//!
//! A strategy is identified by its METHOD byte and knows how to run the sub-negotiation from
//! either side of the connection. Strategies are built once and shared by every connection
//! through an `Arc`, so they must not keep per-connection state.

use std::{future::Future, pin::Pin};

use crate::{protocol::AuthMethod, Transport};

pub mod no_auth_authenticator;
pub mod username_password_authenticator;

pub use no_auth_authenticator::NoAuthAuthenticator;
pub use username_password_authenticator::{User, UserAuthenticator, UsernamePasswordAuthenticator};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait AuthStrategy<T>: Send + Sync {
    /// The METHOD byte this strategy negotiates.
    fn method(&self) -> AuthMethod;

    /// Runs the client side of the sub-negotiation over `transport`.
    ///
    /// - `Ok(true)`: the server accepted us.
    /// - `Ok(false)`: the server rejected us.
    /// - `Err(error)`: the exchange itself failed.
    fn as_client<'a>(
        &'a self,
        transport: &'a mut Transport<T>,
    ) -> BoxFuture<'a, crate::Result<bool>>;

    /// Runs the server side of the sub-negotiation over `transport`.
    ///
    /// Any bytes read past the end of the sub-negotiation must be pushed back into
    /// `transport` before returning.
    fn as_server<'a>(
        &'a self,
        transport: &'a mut Transport<T>,
    ) -> BoxFuture<'a, crate::Result<bool>>;
}
