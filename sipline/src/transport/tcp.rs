//! Content-Length framed stream channel.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{split, AsyncWriteExt, WriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use crate::error::{Error, Result};
use crate::message::TransportKind;
use crate::transport::{
    Factory, Packet, StreamDecoder, Transport, TransportEvent, TransportStartup, TransportTx,
};

type TcpWrite = Arc<Mutex<WriteHalf<TcpStream>>>;

/// One established TCP connection. Pooled by the remote address so
/// responses and in-dialog requests reuse it.
#[derive(Clone)]
pub struct TcpTransport {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    write: TcpWrite,
}

impl TcpTransport {
    fn from_stream(stream: TcpStream) -> Result<(Self, FramedRead<tokio::io::ReadHalf<TcpStream>, StreamDecoder>)> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let (read, write) = split(stream);

        let transport = TcpTransport {
            local_addr,
            remote_addr,
            write: Arc::new(Mutex::new(write)),
        };
        Ok((transport, FramedRead::new(read, StreamDecoder)))
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, buf: &[u8], _addr: &SocketAddr) -> Result<usize> {
        let mut writer = self.write.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(buf.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.local_addr.to_string())
    }

    fn key(&self) -> super::TransportKey {
        // Stream channels are pooled by the peer they reach.
        super::TransportKey::new(self.remote_addr, TransportKind::Tcp)
    }
}

/// Drains framed messages from one connection into the event funnel.
/// On decode failure the connection is reset; other channels are
/// unaffected.
pub(crate) async fn stream_read<R>(
    mut reader: FramedRead<R, StreamDecoder>,
    remote_addr: SocketAddr,
    transport: Arc<dyn Transport>,
    tx: TransportTx,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let key = transport.key();

    loop {
        match reader.next().await {
            Some(Ok(payload)) => {
                let packet = Packet {
                    payload,
                    addr: remote_addr,
                    time: SystemTime::now(),
                };
                tx.send(TransportEvent::Packet {
                    transport: transport.clone(),
                    packet,
                })
                .await?;
            }
            Some(Err(err)) => {
                tx.send(TransportEvent::Closed(key)).await?;
                return Err(Error::Io(err));
            }
            None => {
                tx.send(TransportEvent::Closed(key)).await?;
                return Ok(());
            }
        }
    }
}

/// Accepts inbound TCP connections.
pub struct TcpServer {
    sock: TcpListener,
    addr: SocketAddr,
    local_name: String,
}

impl TcpServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let sock = TcpListener::bind(addr).await?;
        let addr = sock.local_addr()?;
        let local_name = crate::local_binding_name(&addr);

        Ok(TcpServer {
            sock,
            addr,
            local_name,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) async fn handle_incoming(self, tx: TransportTx) -> Result<()> {
        loop {
            let (stream, remote_addr) = match self.sock.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::error!("Failed to accept connection: {err:#}");
                    continue;
                }
            };
            log::debug!("Got incoming TCP connection from {remote_addr}");

            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(err) = Self::on_accept(stream, remote_addr, tx).await {
                    log::warn!("TCP connection error: {err:#}");
                }
            });
        }
    }

    async fn on_accept(stream: TcpStream, remote_addr: SocketAddr, tx: TransportTx) -> Result<()> {
        let (transport, reader) = TcpTransport::from_stream(stream)?;
        let transport = Arc::new(transport) as Arc<dyn Transport>;

        tx.send(TransportEvent::Created(transport.clone())).await?;

        stream_read(reader, remote_addr, transport, tx).await
    }
}

/// Opens outbound TCP connections on demand.
#[derive(Clone)]
pub struct TcpFactory {
    tx: TransportTx,
}

impl TcpFactory {
    pub(crate) fn new(tx: TransportTx) -> Self {
        TcpFactory { tx }
    }
}

#[async_trait::async_trait]
impl Factory for TcpFactory {
    async fn create(&self, addr: SocketAddr) -> Result<Arc<dyn Transport>> {
        let stream = TcpStream::connect(addr).await?;
        let remote_addr = stream.peer_addr()?;
        let (transport, reader) = TcpTransport::from_stream(stream)?;
        let transport = Arc::new(transport) as Arc<dyn Transport>;

        let tx = self.tx.clone();
        let read_transport = transport.clone();
        tokio::spawn(async move {
            if let Err(err) = stream_read(reader, remote_addr, read_transport, tx).await {
                log::debug!("Outbound TCP connection closed: {err}");
            }
        });

        Ok(transport)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }
}

pub(crate) struct TcpStartup {
    addr: SocketAddr,
}

impl TcpStartup {
    pub fn new(addr: SocketAddr) -> Self {
        TcpStartup { addr }
    }
}

#[async_trait::async_trait]
impl TransportStartup for TcpStartup {
    async fn start(&self, layer: &crate::transport::TransportLayer, tx: TransportTx) -> Result<()> {
        let server = TcpServer::bind(self.addr).await?;

        log::debug!(
            "SIP {} transport ready for incoming connections at {}",
            TransportKind::Tcp,
            server.local_name
        );

        layer.add_factory(Arc::new(TcpFactory::new(tx.clone())));
        tokio::spawn(server.handle_incoming(tx));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    const MSG_TEST: &[u8] = b"OPTIONS sip:b@example.com SIP/2.0\r\n\
        Via: SIP/2.0/TCP a.example.com;branch=z9hG4bK77\r\n\
        Content-Length: 0\r\n\r\n";

    #[tokio::test]
    async fn test_accept_and_frame() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(2);

        let server = TcpServer::bind(addr).await.unwrap();
        let server_addr = server.addr();
        tokio::spawn(server.handle_incoming(tx));

        let mut client = TcpStream::connect(server_addr).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Created(_)
        ));

        client.write_all(MSG_TEST).await.unwrap();
        client.flush().await.unwrap();

        let TransportEvent::Packet { packet, .. } = rx.recv().await.unwrap() else {
            unreachable!();
        };
        assert_eq!(packet.payload.as_ref(), MSG_TEST);
    }
}
