use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use rsocks5::{
    auth::{NoAuthAuthenticator, User, UsernamePasswordAuthenticator},
    parser::ProxyRequest,
    ClientConfig, Reply, Responder, Server, ServerConfig, Socks5Client, Socks5Error,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Echoes every connection back and counts how many were accepted.
async fn echo_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                tokio::io::copy(&mut reader, &mut writer).await.ok();
            });
        }
    });
    (addr, accepted)
}

async fn spawn_server(server: Server) -> SocketAddr {
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

fn client(proxy: SocketAddr) -> Socks5Client {
    let mut client = Socks5Client::new(
        ClientConfig::default().proxy(proxy.ip().to_string(), proxy.port()),
    );
    client.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    client
}

#[tokio::test]
async fn relays_through_the_proxy() {
    init_tracing();
    let (echo, accepted) = echo_server().await;

    let mut server = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    server.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    let proxy = spawn_server(server).await;

    let mut stream = client(proxy)
        .connect(&echo.ip().to_string(), echo.port())
        .await
        .unwrap();
    assert_eq!(stream.bound_addr().addr.to_string(), "127.0.0.1");

    stream.write_all(b"hello through socks").await.unwrap();
    let mut buf = [0u8; 19];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello through socks");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hostname_is_left_to_the_proxy_without_local_dns() {
    init_tracing();
    let (echo, _) = echo_server().await;

    let seen = Arc::new(std::sync::Mutex::new(None));
    let recorder = seen.clone();
    let mut server = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    server.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    server.on_request(
        move |request: ProxyRequest, mut responder: Responder<TcpStream>| {
            *recorder.lock().unwrap() = Some(request.destination.to_string());
            responder.accept().unwrap();
        },
    );
    let proxy = spawn_server(server).await;

    let mut remote_dns = Socks5Client::new(
        ClientConfig::default()
            .proxy(proxy.ip().to_string(), proxy.port())
            .local_dns(false),
    );
    remote_dns.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    match remote_dns.connect("localhost", echo.port()).await {
        Ok(mut stream) => {
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
        }
        // "localhost" may resolve to ::1 first, where the echo server is not listening.
        Err(err) => assert!(matches!(err, Socks5Error::Reply(_))),
    }
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some(format!("localhost:{}", echo.port()))
    );
}

#[tokio::test]
async fn intercepted_connection_sees_only_application_bytes() {
    init_tracing();
    let mut server = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    server.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    server.on_request(
        |_request: ProxyRequest, mut responder: Responder<TcpStream>| {
            let intercepted = responder.intercept().unwrap();
            tokio::spawn(async move {
                let mut transport = intercepted.transport().await.unwrap();
                transport.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
                transport.shutdown().await.unwrap();
            });
        },
    );
    let proxy = spawn_server(server).await;

    let mut stream = client(proxy).connect("192.0.2.1", 80).await.unwrap();
    assert_eq!(stream.bound_addr().to_string(), "0.0.0.0:0");
    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"HTTP/1.1 204 No Content\r\n\r\n");
}

#[tokio::test]
async fn denied_request_never_reaches_the_destination() {
    init_tracing();
    let (echo, accepted) = echo_server().await;

    let mut server = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    server.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    server.on_request(
        |request: ProxyRequest, mut responder: Responder<TcpStream>| {
            assert!(request.source.is_some());
            responder.deny().unwrap();
        },
    );
    let proxy = spawn_server(server).await;

    let err = client(proxy)
        .connect(&echo.ip().to_string(), echo.port())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Socks5Error::Reply(Reply::ConnectionNotAllowedByRuleset)
    ));
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_destination_is_reported() {
    init_tracing();
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let mut server = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    server.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    let proxy = spawn_server(server).await;

    let err = client(proxy)
        .connect(&closed_addr.ip().to_string(), closed_addr.port())
        .await
        .unwrap_err();
    assert!(matches!(err, Socks5Error::Reply(Reply::ConnectionRefused)));
}

#[tokio::test]
async fn username_password_authentication() {
    init_tracing();
    let (echo, _) = echo_server().await;

    let mut server = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    server
        .use_auth(Arc::new(UsernamePasswordAuthenticator::new(
            |user: User| async move { user.username == "admin" && user.password == "password" },
        )))
        .unwrap();
    let proxy = spawn_server(server).await;
    let config = ClientConfig::default().proxy(proxy.ip().to_string(), proxy.port());

    let mut client = Socks5Client::new(config.clone());
    client
        .use_auth(Arc::new(
            UsernamePasswordAuthenticator::with_credentials("admin", "password").unwrap(),
        ))
        .unwrap();
    let mut stream = client
        .connect(&echo.ip().to_string(), echo.port())
        .await
        .unwrap();
    stream.write_all(b"authed").await.unwrap();
    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"authed");

    let mut client = Socks5Client::new(config.clone());
    client
        .use_auth(Arc::new(
            UsernamePasswordAuthenticator::with_credentials("admin", "wrong").unwrap(),
        ))
        .unwrap();
    let err = client
        .connect(&echo.ip().to_string(), echo.port())
        .await
        .unwrap_err();
    assert!(matches!(err, Socks5Error::AuthenticationFailed));

    let mut client = Socks5Client::new(config);
    client.use_auth(Arc::new(NoAuthAuthenticator)).unwrap();
    let err = client
        .connect(&echo.ip().to_string(), echo.port())
        .await
        .unwrap_err();
    assert!(matches!(err, Socks5Error::AuthMethodMismatch));
}
