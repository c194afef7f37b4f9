//! # Username/Password Authentication
//!
//! The sub-negotiation of method `0x02`:
//!
//! ```text
//! +----+------+----------+------+----------+        +----+--------+
//! |VER | ULEN |  UNAME   | PLEN |  PASSWD  |        |VER | STATUS |
//! +----+------+----------+------+----------+        +----+--------+
//! | 1  |  1   | 1 to 255 |  1   | 1 to 255 |        | 1  |   1    |
//! +----+------+----------+------+----------+        +----+--------+
//! ```
//!
//! The request's VER is `0x01`; the reply carries the SOCKS version `0x05` and a status of
//! `0x00` on success.
//!
//! ## Example
//!
//! ```rust
//! use rsocks5::auth::{User, UsernamePasswordAuthenticator};
//!
//! // Server side: any async predicate over the received user.
//! let server = UsernamePasswordAuthenticator::new(|user: User| async move {
//!     user.username == "admin" && user.password == "password"
//! });
//!
//! // Client side: a static credential pair.
//! let client = UsernamePasswordAuthenticator::with_credentials("admin", "password").unwrap();
//! ```

use std::{fmt, future::Future};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    parser::{Field, FrameParser, Parsed},
    protocol::{AuthMethod, VERSION},
    Socks5Error, Transport,
};

use super::{AuthStrategy, BoxFuture};

const USER_PASSWORD_VERSION: u8 = 0x01;
const MAX_CREDENTIAL_LEN: usize = u8::MAX as usize;

/// Represents a user with a username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[repr(u8)]
enum AuthStatus {
    Success = 0x00,
    Failure = 0x01,
}

/// Decides whether a user may use the proxy.
pub trait UserAuthenticator: Send + Sync {
    /// Resolves to `true` when `user` is allowed in.
    fn authenticate_user(&self, user: User) -> BoxFuture<'_, bool>;
}

impl<F, Fut> UserAuthenticator for F
where
    F: Fn(User) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn authenticate_user(&self, user: User) -> BoxFuture<'_, bool> {
        Box::pin(self(user))
    }
}

/// Method `0x02`. Built with [`new`](Self::new) for the server role or
/// [`with_credentials`](Self::with_credentials) for the client role.
pub struct UsernamePasswordAuthenticator {
    credentials: Option<User>,
    user_authenticator: Option<Box<dyn UserAuthenticator>>,
}

impl UsernamePasswordAuthenticator {
    /// Server role: every received user is checked by `user_authenticator`.
    pub fn new<U>(user_authenticator: U) -> Self
    where
        U: UserAuthenticator + 'static,
    {
        Self {
            credentials: None,
            user_authenticator: Some(Box::new(user_authenticator)),
        }
    }

    /// Client role: sends `username` and `password` when the server selects this method.
    pub fn with_credentials(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> crate::Result<Self> {
        let user = User {
            username: username.into(),
            password: password.into(),
        };
        check_len(&user.username, Socks5Error::EmptyUsername)?;
        check_len(&user.password, Socks5Error::EmptyPassword)?;
        Ok(Self {
            credentials: Some(user),
            user_authenticator: None,
        })
    }

    async fn send_authentication_result<T>(
        &self,
        conn: &mut T,
        status: AuthStatus,
    ) -> crate::Result<()>
    where
        T: AsyncWrite + Unpin,
    {
        conn.write_all(&[VERSION, status as u8]).await?;
        conn.flush().await?;
        Ok(())
    }
}

fn check_len(value: &str, empty: Socks5Error) -> crate::Result<()> {
    match value.len() {
        0 => Err(empty),
        len if len > MAX_CREDENTIAL_LEN => Err(Socks5Error::CredentialTooLong(len)),
        _ => Ok(()),
    }
}

impl<T> AuthStrategy<T> for UsernamePasswordAuthenticator
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn method(&self) -> AuthMethod {
        AuthMethod::UsernamePassword
    }

    fn as_client<'a>(
        &'a self,
        transport: &'a mut Transport<T>,
    ) -> BoxFuture<'a, crate::Result<bool>> {
        Box::pin(async move {
            let user = self
                .credentials
                .as_ref()
                .ok_or(Socks5Error::MissingCredentials)?;

            let mut request =
                Vec::with_capacity(3 + user.username.len() + user.password.len());
            request.push(USER_PASSWORD_VERSION);
            request.push(user.username.len() as u8);
            request.extend_from_slice(user.username.as_bytes());
            request.push(user.password.len() as u8);
            request.extend_from_slice(user.password.as_bytes());
            transport.write_all(&request).await?;
            transport.flush().await?;

            let mut reply = [0u8; 2];
            transport.read_exact(&mut reply).await?;
            trace!("Username/password reply: {:?}", reply);

            Ok(reply[1] == AuthStatus::Success as u8)
        })
    }

    fn as_server<'a>(
        &'a self,
        transport: &'a mut Transport<T>,
    ) -> BoxFuture<'a, crate::Result<bool>> {
        Box::pin(async move {
            let mut parser = UserPassParser::new();
            let user = transport.read_frame(&mut parser).await?;
            debug!("Received username: {:?}", user.username);

            let accepted = match &self.user_authenticator {
                Some(authenticator) => authenticator.authenticate_user(user).await,
                None => false,
            };

            self.send_authentication_result(
                transport,
                if accepted {
                    AuthStatus::Success
                } else {
                    AuthStatus::Failure
                },
            )
            .await?;

            Ok(accepted)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Version,
    ULen,
    UName,
    PLen,
    Passwd,
}

/// Incremental decoder for the username/password request.
#[derive(Debug)]
pub struct UserPassParser {
    state: State,
    username: Field,
    password: Field,
    listening: bool,
}

impl Default for UserPassParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UserPassParser {
    pub fn new() -> Self {
        Self {
            state: State::Version,
            username: Field::default(),
            password: Field::default(),
            listening: true,
        }
    }

    fn step(&mut self, chunk: &[u8]) -> crate::Result<Parsed<User>> {
        let mut i = 0;
        while i < chunk.len() {
            match self.state {
                State::Version => {
                    if chunk[i] != USER_PASSWORD_VERSION {
                        return Err(Socks5Error::BadAuthVersion(chunk[i]));
                    }
                    i += 1;
                    self.state = State::ULen;
                }
                State::ULen => {
                    if chunk[i] == 0 {
                        return Err(Socks5Error::EmptyUsername);
                    }
                    self.username = Field::with_len(chunk[i] as usize);
                    i += 1;
                    self.state = State::UName;
                }
                State::UName => {
                    i += self.username.fill(&chunk[i..]);
                    if self.username.is_full() {
                        self.state = State::PLen;
                    }
                }
                State::PLen => {
                    if chunk[i] == 0 {
                        return Err(Socks5Error::EmptyPassword);
                    }
                    self.password = Field::with_len(chunk[i] as usize);
                    i += 1;
                    self.state = State::Passwd;
                }
                State::Passwd => {
                    i += self.password.fill(&chunk[i..]);
                    if self.password.is_full() {
                        let user = User {
                            username: String::from_utf8_lossy(&self.username.take()).into_owned(),
                            password: String::from_utf8_lossy(&self.password.take()).into_owned(),
                        };
                        return Ok(Parsed::Done {
                            event: user,
                            consumed: i,
                        });
                    }
                }
            }
        }
        Ok(Parsed::NeedMore)
    }
}

impl FrameParser for UserPassParser {
    type Event = User;

    fn feed(&mut self, chunk: &[u8]) -> crate::Result<Parsed<User>> {
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
        self.username = Field::default();
        self.password = Field::default();
    }

    fn is_listening(&self) -> bool {
        self.listening
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_util::{feed_split, partitions};

    fn request(username: &str, password: &str) -> Vec<u8> {
        let mut frame = vec![USER_PASSWORD_VERSION, username.len() as u8];
        frame.extend_from_slice(username.as_bytes());
        frame.push(password.len() as u8);
        frame.extend_from_slice(password.as_bytes());
        frame
    }

    #[test]
    fn parses_any_partition() {
        let mut frame = request("nodejs", "rules");
        frame.extend_from_slice(&[0x05, 0x01]);
        for cuts in partitions(frame.len()) {
            let (user, rest) = feed_split(&mut UserPassParser::new(), &frame, &cuts)
                .unwrap()
                .unwrap();
            assert_eq!(user.username, "nodejs");
            assert_eq!(user.password, "rules");
            assert_eq!(rest, [0x05, 0x01]);
        }
    }

    #[test]
    fn rejects_malformed_requests() {
        assert!(matches!(
            UserPassParser::new().feed(&[0x05]),
            Err(Socks5Error::BadAuthVersion(0x05))
        ));
        assert!(matches!(
            UserPassParser::new().feed(&[0x01, 0x00]),
            Err(Socks5Error::EmptyUsername)
        ));
        assert!(matches!(
            UserPassParser::new().feed(&[0x01, 0x01, b'a', 0x00]),
            Err(Socks5Error::EmptyPassword)
        ));
    }

    #[test]
    fn credentials_are_checked_up_front() {
        assert!(matches!(
            UsernamePasswordAuthenticator::with_credentials("", "pw"),
            Err(Socks5Error::EmptyUsername)
        ));
        assert!(matches!(
            UsernamePasswordAuthenticator::with_credentials("user", "x".repeat(256)),
            Err(Socks5Error::CredentialTooLong(256))
        ));
    }

    fn validator() -> UsernamePasswordAuthenticator {
        UsernamePasswordAuthenticator::new(|user: User| async move {
            user.username == "nodejs" && user.password == "rules"
        })
    }

    #[tokio::test]
    async fn client_and_server_agree() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = Transport::new(client);
        let mut server = Transport::new(server);

        let client_auth =
            UsernamePasswordAuthenticator::with_credentials("nodejs", "rules").unwrap();
        let server_auth = validator();

        let (client_result, server_result) = tokio::join!(
            client_auth.as_client(&mut client),
            server_auth.as_server(&mut server),
        );
        assert!(client_result.unwrap());
        assert!(server_result.unwrap());
    }

    #[tokio::test]
    async fn server_rejects_bad_password_and_keeps_trailing_bytes() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut server = Transport::new(server);

        let mut frame = request("nodejs", "drools");
        frame.extend_from_slice(b"tail");
        client.write_all(&frame).await.unwrap();

        let accepted = validator().as_server(&mut server).await.unwrap();
        assert!(!accepted);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x01]);

        let mut tail = [0u8; 4];
        server.read_exact(&mut tail).await.unwrap();
        assert_eq!(&tail, b"tail");
    }

    #[tokio::test]
    async fn client_without_credentials_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let mut client = Transport::new(client);
        let result = validator().as_client(&mut client).await;
        assert!(matches!(result, Err(Socks5Error::MissingCredentials)));
    }
}
