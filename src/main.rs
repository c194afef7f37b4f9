use std::{env, error::Error, sync::Arc};

use rsocks5::{
    auth::{NoAuthAuthenticator, User, UsernamePasswordAuthenticator},
    Server, ServerConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let listen_addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
    let mut server = Server::bind(listen_addr.as_str(), ServerConfig::default()).await?;

    match (env::var("SOCKS5_USER"), env::var("SOCKS5_PASS")) {
        (Ok(username), Ok(password)) => {
            info!("Username/password authentication enabled for {:?}", username);
            server.use_auth(Arc::new(UsernamePasswordAuthenticator::new(
                move |user: User| {
                    let accepted = user.username == username && user.password == password;
                    async move { accepted }
                },
            )))?;
        }
        _ => server.use_auth(Arc::new(NoAuthAuthenticator))?,
    }

    server.run().await?;
    Ok(())
}
