//! Connectionless datagram channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::error::Result;
use crate::message::TransportKind;
use crate::transport::{
    Packet, Transport, TransportEvent, TransportStartup, TransportTx, MAX_DATAGRAM_SIZE,
};

struct Inner {
    sock: UdpSocket,
    addr: SocketAddr,
    local_name: String,
}

/// UDP channel: one message per datagram, unreliable.
#[derive(Clone)]
pub struct UdpTransport(Arc<Inner>);

impl UdpTransport {
    /// Bind to the given local address.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let sock = UdpSocket::bind(addr).await?;
        let addr = sock.local_addr()?;
        let local_name = crate::local_binding_name(&addr);

        Ok(UdpTransport(Arc::new(Inner {
            sock,
            addr,
            local_name,
        })))
    }

    async fn recv_loop(self, tx: TransportTx) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        loop {
            let (len, addr) = self.0.sock.recv_from(&mut buf).await?;
            let packet = Packet {
                payload: Bytes::copy_from_slice(&buf[..len]),
                addr,
                time: SystemTime::now(),
            };
            let transport = Arc::new(self.clone()) as Arc<dyn Transport>;

            tx.send(TransportEvent::Packet { transport, packet }).await?;
        }
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
        Ok(self.0.sock.send_to(buf, addr).await?)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    fn local_name(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed(&self.0.local_name)
    }
}

pub(crate) struct UdpStartup {
    addr: SocketAddr,
}

impl UdpStartup {
    pub fn new(addr: SocketAddr) -> Self {
        UdpStartup { addr }
    }
}

#[async_trait::async_trait]
impl TransportStartup for UdpStartup {
    async fn start(&self, layer: &crate::transport::TransportLayer, tx: TransportTx) -> Result<()> {
        let udp = UdpTransport::bind(self.addr).await?;

        log::debug!(
            "SIP {} transport started, listening on {}",
            TransportKind::Udp,
            udp.local_name()
        );

        layer.add_transport(Arc::new(udp.clone()));
        tokio::spawn(udp.recv_loop(tx));

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// An always-successful UDP channel for transaction tests.
    #[derive(Default)]
    pub struct MockUdpTransport;

    #[async_trait::async_trait]
    impl Transport for MockUdpTransport {
        async fn send(&self, buf: &[u8], _addr: &SocketAddr) -> Result<usize> {
            Ok(buf.len())
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Udp
        }

        fn addr(&self) -> SocketAddr {
            "127.0.0.1:5060".parse().unwrap()
        }

        fn local_name(&self) -> std::borrow::Cow<'_, str> {
            std::borrow::Cow::Borrowed("127.0.0.1:5060")
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    const MSG_TEST: &[u8] = b"REGISTER sip:registrar.biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP bobspc.biloxi.com:5060;branch=z9hG4bKnashds7\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: Bob <sip:bob@biloxi.com>;tag=456248\r\n\
        Call-ID: 843817637684230@998sdasdh09\r\n\
        CSeq: 1826 REGISTER\r\n\
        Contact: <sip:bob@192.0.2.4>\r\n\
        Expires: 7200\r\n\
        Content-Length: 0\r\n\r\n";

    #[tokio::test]
    async fn test_recv_packet() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let udp = UdpTransport::bind(addr).await.unwrap();
        let client = UdpSocket::bind(addr).await.unwrap();

        tokio::spawn(udp.clone().recv_loop(tx));

        client.send_to(MSG_TEST, udp.addr()).await.unwrap();

        let TransportEvent::Packet { packet, .. } = rx.recv().await.unwrap() else {
            unreachable!();
        };
        assert_eq!(packet.payload.as_ref(), MSG_TEST);
        assert_eq!(packet.addr, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_send_packet() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let udp = UdpTransport::bind(addr).await.unwrap();
        let client = UdpSocket::bind(addr).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        udp.send(MSG_TEST, &client_addr).await.unwrap();

        let mut buf = [0; MSG_TEST.len()];
        let len = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], MSG_TEST);
    }
}
