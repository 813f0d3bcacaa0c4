//! SIP over WebSocket (RFC 7118), length-delimited frames over the
//! `sip` subprotocol.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::message::TransportKind;
use crate::transport::{
    Factory, Packet, Transport, TransportEvent, TransportStartup, TransportTx,
};

const SIP_SUBPROTOCOL: &str = "sip";

type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type ClientSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

enum WsWrite {
    Server(ServerSink),
    Client(ClientSink),
}

/// One WebSocket connection carrying SIP frames.
#[derive(Clone)]
pub struct WsTransport {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    write: Arc<Mutex<WsWrite>>,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send(&self, buf: &[u8], _addr: &SocketAddr) -> Result<usize> {
        let message = Message::Binary(buf.to_vec().into());
        let mut writer = self.write.lock().await;
        let sent = match &mut *writer {
            WsWrite::Server(sink) => sink.send(message).await,
            WsWrite::Client(sink) => sink.send(message).await,
        };
        sent.map_err(|err| Error::WebSocket(err.to_string()))?;
        Ok(buf.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ws
    }

    fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.local_addr.to_string())
    }

    fn key(&self) -> super::TransportKey {
        super::TransportKey::new(self.remote_addr, TransportKind::Ws)
    }
}

/// Packets from one WebSocket until close, then a Closed event.
async fn ws_read<S>(
    mut read: futures_util::stream::SplitStream<WebSocketStream<S>>,
    remote_addr: SocketAddr,
    transport: Arc<dyn Transport>,
    tx: TransportTx,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let key = transport.key();

    while let Some(msg) = read.next().await {
        let payload = match msg {
            Ok(Message::Text(text)) => bytes::Bytes::from(text.to_string()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tx.send(TransportEvent::Closed(key)).await?;
                return Err(Error::WebSocket(err.to_string()));
            }
        };

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

    tx.send(TransportEvent::Closed(key)).await?;
    Ok(())
}

/// Accepts inbound WebSocket connections speaking the `sip`
/// subprotocol.
pub struct WsServer {
    sock: TcpListener,
    local_name: String,
}

impl WsServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let sock = TcpListener::bind(addr).await?;
        let local_name = crate::local_binding_name(&sock.local_addr()?);
        Ok(WsServer { sock, local_name })
    }

    pub(crate) async fn handle_incoming(self, tx: TransportTx) -> Result<()> {
        loop {
            let (stream, remote_addr) = match self.sock.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::error!("Failed to accept WebSocket connection: {err:#}");
                    continue;
                }
            };
            log::debug!("Got incoming WebSocket connection from {remote_addr}");

            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(err) = Self::on_accept(stream, remote_addr, tx).await {
                    log::warn!("WebSocket connection error: {err:#}");
                }
            });
        }
    }

    async fn on_accept(stream: TcpStream, remote_addr: SocketAddr, tx: TransportTx) -> Result<()> {
        let local_addr = stream.local_addr()?;

        // Require the RFC 7118 subprotocol during the handshake.
        let negotiate = |req: &Request, mut res: Response| -> std::result::Result<Response, ErrorResponse> {
            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case(SIP_SUBPROTOCOL)))
                .unwrap_or(false);
            if !offered {
                return Err(ErrorResponse::new(Some(
                    "sip subprotocol required".to_string(),
                )));
            }
            res.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                SIP_SUBPROTOCOL.parse().expect("static header value"),
            );
            Ok(res)
        };

        let ws = accept_hdr_async(stream, negotiate)
            .await
            .map_err(|err| Error::WebSocket(err.to_string()))?;
        let (write, read) = ws.split();

        let transport = Arc::new(WsTransport {
            local_addr,
            remote_addr,
            write: Arc::new(Mutex::new(WsWrite::Server(write))),
        }) as Arc<dyn Transport>;

        tx.send(TransportEvent::Created(transport.clone())).await?;

        ws_read(read, remote_addr, transport, tx).await
    }
}

/// Opens outbound WebSocket connections.
#[derive(Clone)]
pub struct WsFactory {
    tx: TransportTx,
}

impl WsFactory {
    pub(crate) fn new(tx: TransportTx) -> Self {
        WsFactory { tx }
    }
}

#[async_trait::async_trait]
impl Factory for WsFactory {
    async fn create(&self, addr: SocketAddr) -> Result<Arc<dyn Transport>> {
        let request = http::Request::builder()
            .uri(format!("ws://{addr}"))
            .header("Host", addr.to_string())
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Protocol", SIP_SUBPROTOCOL)
            .body(())
            .map_err(|err| Error::WebSocket(err.to_string()))?;

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|err| Error::WebSocket(err.to_string()))?;

        let local_addr = match ws.get_ref() {
            MaybeTlsStream::Plain(stream) => stream.local_addr()?,
            _ => "0.0.0.0:0".parse().expect("static address"),
        };

        let (write, read) = ws.split();
        let transport = Arc::new(WsTransport {
            local_addr,
            remote_addr: addr,
            write: Arc::new(Mutex::new(WsWrite::Client(write))),
        }) as Arc<dyn Transport>;

        let tx = self.tx.clone();
        let read_transport = transport.clone();
        tokio::spawn(async move {
            if let Err(err) = ws_read(read, addr, read_transport, tx).await {
                log::debug!("Outbound WebSocket connection closed: {err}");
            }
        });

        Ok(transport)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ws
    }
}

pub(crate) struct WsStartup {
    addr: SocketAddr,
}

impl WsStartup {
    pub fn new(addr: SocketAddr) -> Self {
        WsStartup { addr }
    }
}

#[async_trait::async_trait]
impl TransportStartup for WsStartup {
    async fn start(&self, layer: &crate::transport::TransportLayer, tx: TransportTx) -> Result<()> {
        let server = WsServer::bind(self.addr).await?;

        log::debug!(
            "SIP {} transport ready for incoming connections at {}",
            TransportKind::Ws,
            server.local_name
        );

        layer.add_factory(Arc::new(WsFactory::new(tx.clone())));
        tokio::spawn(server.handle_incoming(tx));

        Ok(())
    }
}
