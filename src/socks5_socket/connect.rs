use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument};

use crate::{
    method_handlers::Connect,
    protocol::{Reply, SocksSocketAddr},
};

use super::Socks5Socket;

impl<T, C> Socks5Socket<T, C>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connect,
{
    #[instrument(skip_all, fields(destination = %destination))]
    pub(crate) async fn connect(mut self, destination: SocksSocketAddr) -> crate::Result<()> {
        let (conn, local_addr) = match self
            .connect_handler
            .establish_connection(&destination)
            .await
        {
            Ok(established) => established,
            Err(err) => {
                debug!("Connecting failed: {}", err);
                let reply = Reply::from(err);
                self.inner.write_all(&reply.short_frame()).await?;
                self.close().await;
                return Err(reply.into());
            }
        };

        debug!("Connection established from {}", local_addr);
        self.reply(Reply::Success, &local_addr.into()).await?;

        self.connect_handler
            .start_listening(&mut self.inner, conn)
            .await?;
        info!("Connection with {} closed", destination);
        Ok(())
    }
}
