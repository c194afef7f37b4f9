mod connect;
pub use connect::tunnel_connect::TunnelConnect;
pub use connect::Connect;
