//! Dial-back broker for the plugin → host callback channel.
//!
//! A unary channel only flows one way, so on `func_start` the host opens a
//! second listener and tells the plugin its id inside the start request.
//! The plugin dials back, and from then on pushes messages to the host as
//! unary requests against that connection.
//!
//! Broker ids are ephemeral loopback port numbers: unique per host for
//! the lifetime of the listener, and exactly what the plugin needs to
//! dial.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};

/// A one-shot dial-back endpoint on the host side.
pub struct Broker {
    listener: TcpListener,
    id: u32,
}

impl Broker {
    /// Binds a fresh loopback listener and allocates its id.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let id = u32::from(listener.local_addr()?.port());
        Ok(Self { listener, id })
    }

    /// The id the plugin must dial, carried in the start request.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Waits for the plugin to dial back.
    pub async fn accept(&self) -> std::io::Result<TcpStream> {
        let (stream, _) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Plugin side: connects back to the host's broker endpoint.
    pub async fn dial(id: u32) -> std::io::Result<TcpStream> {
        let port = u16::try_from(id).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("broker id {id} is not a loopback port"),
            )
        })?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn plugin_can_dial_the_announced_id() {
        let broker = Broker::bind().await.unwrap();
        let id = broker.id();

        let dial = tokio::spawn(async move {
            let mut stream = Broker::dial(id).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let mut accepted = broker.accept().await.unwrap();
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        dial.await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_ids_are_rejected() {
        assert!(Broker::dial(u32::from(u16::MAX) + 1).await.is_err());
    }
}
