//! Transport over any async byte stream.
//!
//! Covers modules reached through a TCP serial bridge, and in-memory
//! streams such as [`tokio::io::duplex`] in tests.

use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportReader};

/// Transport wrapping an already established byte stream.
///
/// The stream is split on [`Transport::connect`]. Once disconnected it
/// cannot be reconnected; build a new transport instead.
pub struct StreamTransport<S> {
    stream: Option<S>,
    writer: Option<WriteHalf<S>>,
    reader: Option<ReadHalf<S>>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wraps a stream.
    #[must_use]
    pub const fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            writer: None,
            reader: None,
        }
    }
}

impl StreamTransport<TcpStream> {
    /// Opens a TCP connection to a serial bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn tcp(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }
            let stream = self.stream.take().ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "stream already consumed",
                ))
            })?;
            let (reader, writer) = tokio::io::split(stream);
            self.reader = Some(reader);
            self.writer = Some(writer);
            tracing::debug!("stream transport connected");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(mut writer) = self.writer.take() {
                tracing::debug!("stream transport disconnected");
                // Peer may already be gone
                let _ = writer.shutdown().await;
            }
            self.reader = None;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::InterfaceNotOpen)?;
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn take_reader(&mut self) -> Option<TransportReader> {
        self.reader
            .take()
            .map(|reader| Box::new(reader) as TransportReader)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(local);
        assert!(!transport.is_connected());

        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.send(Bytes::from_static(b"+++")).await.unwrap();
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+++");

        let mut reader = transport.take_reader().unwrap();
        assert!(transport.take_reader().is_none());
        tokio::io::AsyncWriteExt::write_all(&mut remote, b"OK\r")
            .await
            .unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"OK\r");
    }

    #[tokio::test]
    async fn test_no_reconnect_after_disconnect() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(local);
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(Bytes::from_static(b"x")).await,
            Err(Error::InterfaceNotOpen)
        ));
        assert!(transport.connect().await.is_err());
    }
}
