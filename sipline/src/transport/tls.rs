//! Encrypted stream channel over rustls.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{split, AsyncWriteExt, WriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::FramedRead;

use crate::error::{Error, Result};
use crate::message::TransportKind;
use crate::transport::tcp::stream_read;
use crate::transport::{
    Factory, StreamDecoder, Transport, TransportEvent, TransportStartup, TransportTx,
};

type ServerTls = tokio_rustls::server::TlsStream<TcpStream>;
type ClientTls = tokio_rustls::client::TlsStream<TcpStream>;

/// Certificate material and validation policy for the TLS channel.
///
/// Overriding `client_config` injects a custom certificate verifier;
/// the default trusts the webpki root set.
#[derive(Clone)]
pub struct TlsSettings {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: Arc<PrivateKeyDer<'static>>,
    pub client_config: Option<Arc<ClientConfig>>,
}

impl TlsSettings {
    /// Load certificate chain and private key from PEM buffers.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(cert_pem))
            .collect::<std::io::Result<Vec<_>>>()?;
        let key = rustls_pemfile::private_key(&mut std::io::Cursor::new(key_pem))?
            .ok_or_else(|| Error::Tls("no private key in PEM".to_string()))?;

        Ok(TlsSettings {
            certs,
            key: Arc::new(key),
            client_config: None,
        })
    }

    fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())
            .map_err(|err| Error::Tls(err.to_string()))?;
        Ok(Arc::new(config))
    }
}

fn default_client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// One established TLS connection.
#[derive(Clone)]
pub struct TlsTransport {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    write: Arc<Mutex<TlsWrite>>,
}

enum TlsWrite {
    Server(WriteHalf<ServerTls>),
    Client(WriteHalf<ClientTls>),
}

#[async_trait::async_trait]
impl Transport for TlsTransport {
    async fn send(&self, buf: &[u8], _addr: &SocketAddr) -> Result<usize> {
        let mut writer = self.write.lock().await;
        match &mut *writer {
            TlsWrite::Server(w) => {
                w.write_all(buf).await?;
                w.flush().await?;
            }
            TlsWrite::Client(w) => {
                w.write_all(buf).await?;
                w.flush().await?;
            }
        }
        Ok(buf.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.local_addr.to_string())
    }

    fn key(&self) -> super::TransportKey {
        super::TransportKey::new(self.remote_addr, TransportKind::Tls)
    }
}

/// Accepts inbound TLS connections.
pub struct TlsServer {
    sock: TcpListener,
    acceptor: TlsAcceptor,
    local_name: String,
}

impl TlsServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, settings: &TlsSettings) -> Result<Self> {
        let sock = TcpListener::bind(addr).await?;
        let local_name = crate::local_binding_name(&sock.local_addr()?);
        let acceptor = TlsAcceptor::from(settings.server_config()?);

        Ok(TlsServer {
            sock,
            acceptor,
            local_name,
        })
    }

    pub(crate) async fn handle_incoming(self, tx: TransportTx) -> Result<()> {
        loop {
            let (stream, remote_addr) = match self.sock.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::error!("Failed to accept TLS connection: {err:#}");
                    continue;
                }
            };
            log::debug!("Got incoming TLS connection from {remote_addr}");

            let acceptor = self.acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(err) = Self::on_accept(acceptor, stream, remote_addr, tx).await {
                    log::warn!("TLS connection error: {err:#}");
                }
            });
        }
    }

    async fn on_accept(
        acceptor: TlsAcceptor,
        stream: TcpStream,
        remote_addr: SocketAddr,
        tx: TransportTx,
    ) -> Result<()> {
        let local_addr = stream.local_addr()?;
        let tls = acceptor
            .accept(stream)
            .await
            .map_err(|err| Error::Tls(err.to_string()))?;
        let (read, write) = split(tls);

        let transport = Arc::new(TlsTransport {
            local_addr,
            remote_addr,
            write: Arc::new(Mutex::new(TlsWrite::Server(write))),
        }) as Arc<dyn Transport>;

        tx.send(TransportEvent::Created(transport.clone())).await?;

        stream_read(
            FramedRead::new(read, StreamDecoder),
            remote_addr,
            transport,
            tx,
        )
        .await
    }
}

/// Opens outbound TLS connections on demand.
#[derive(Clone)]
pub struct TlsFactory {
    connector: TlsConnector,
    tx: TransportTx,
}

impl TlsFactory {
    pub(crate) fn new(client_config: Option<Arc<ClientConfig>>, tx: TransportTx) -> Self {
        let config = client_config.unwrap_or_else(default_client_config);
        TlsFactory {
            connector: TlsConnector::from(config),
            tx,
        }
    }
}

#[async_trait::async_trait]
impl Factory for TlsFactory {
    async fn create(&self, addr: SocketAddr) -> Result<Arc<dyn Transport>> {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;
        let server_name = ServerName::IpAddress(addr.ip().into());

        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|err| Error::Tls(err.to_string()))?;
        let (read, write) = split(tls);

        let transport = Arc::new(TlsTransport {
            local_addr,
            remote_addr: addr,
            write: Arc::new(Mutex::new(TlsWrite::Client(write))),
        }) as Arc<dyn Transport>;

        let tx = self.tx.clone();
        let read_transport = transport.clone();
        tokio::spawn(async move {
            if let Err(err) = stream_read(
                FramedRead::new(read, StreamDecoder),
                addr,
                read_transport,
                tx,
            )
            .await
            {
                log::debug!("Outbound TLS connection closed: {err}");
            }
        });

        Ok(transport)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }
}

pub(crate) struct TlsStartup {
    addr: SocketAddr,
    settings: TlsSettings,
}

impl TlsStartup {
    pub fn new(addr: SocketAddr, settings: TlsSettings) -> Self {
        TlsStartup { addr, settings }
    }
}

#[async_trait::async_trait]
impl TransportStartup for TlsStartup {
    async fn start(&self, layer: &crate::transport::TransportLayer, tx: TransportTx) -> Result<()> {
        let server = TlsServer::bind(self.addr, &self.settings).await?;

        log::debug!(
            "SIP {} transport ready for incoming connections at {}",
            TransportKind::Tls,
            server.local_name
        );

        layer.add_factory(Arc::new(TlsFactory::new(
            self.settings.client_config.clone(),
            tx.clone(),
        )));
        tokio::spawn(server.handle_incoming(tx));

        Ok(())
    }
}
