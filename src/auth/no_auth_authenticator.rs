use tokio::io::{AsyncRead, AsyncWrite};

use crate::{protocol::AuthMethod, Transport};

use super::{AuthStrategy, BoxFuture};

/// The "no authentication" method (`0x00`). Both sides succeed immediately without
/// exchanging any bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthAuthenticator;

impl<T> AuthStrategy<T> for NoAuthAuthenticator
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn method(&self) -> AuthMethod {
        AuthMethod::NoAuthRequired
    }

    fn as_client<'a>(&'a self, _: &'a mut Transport<T>) -> BoxFuture<'a, crate::Result<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn as_server<'a>(&'a self, _: &'a mut Transport<T>) -> BoxFuture<'a, crate::Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}
