//! Endpoint construction.

use std::net::SocketAddr;
use std::sync::Arc;

use itertools::Itertools;

use crate::config::EndpointConfig;
use crate::dialog::DialogLayer;
use crate::endpoint::{Endpoint, Inner};
use crate::resolver::Resolver;
use crate::transaction::{TimerSettings, TransactionLayer};
use crate::transport::tcp::TcpStartup;
use crate::transport::tls::{TlsSettings, TlsStartup};
use crate::transport::udp::UdpStartup;
use crate::transport::ws::WsStartup;
use crate::transport::{TransportLayer, TransportStartup};
use crate::SipService;

/// Builds an [`Endpoint`]: listen bindings, timers, policy knobs and
/// the services that give it behavior.
///
/// # Examples
///
/// ```no_run
/// # use sipline::endpoint;
/// # async fn example() {
/// let endpoint = endpoint::Builder::new()
///     .with_name("softphone")
///     .with_udp("0.0.0.0:5060".parse().unwrap())
///     .build()
///     .await;
/// # }
/// ```
pub struct Builder {
    name: String,
    config: EndpointConfig,
    services: Vec<Box<dyn SipService>>,
    startups: Vec<Box<dyn TransportStartup>>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            name: String::new(),
            config: EndpointConfig::default(),
            services: vec![],
            startups: vec![],
        }
    }

    pub fn with_name<T: AsRef<str>>(mut self, name: T) -> Self {
        self.name = name.as_ref().to_string();
        self
    }

    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Listen for datagrams on `addr`.
    pub fn with_udp(mut self, addr: SocketAddr) -> Self {
        self.startups.push(Box::new(UdpStartup::new(addr)));
        self
    }

    /// Accept stream connections on `addr`.
    pub fn with_tcp(mut self, addr: SocketAddr) -> Self {
        self.startups.push(Box::new(TcpStartup::new(addr)));
        self
    }

    /// Accept TLS connections on `addr` with the given certificate
    /// material and validation policy.
    pub fn with_tls(mut self, addr: SocketAddr, settings: TlsSettings) -> Self {
        self.startups.push(Box::new(TlsStartup::new(addr, settings)));
        self
    }

    /// Accept WebSocket connections on `addr` (RFC 7118).
    pub fn with_ws(mut self, addr: SocketAddr) -> Self {
        self.startups.push(Box::new(WsStartup::new(addr)));
        self
    }

    pub fn with_timer_settings(mut self, timers: TimerSettings) -> Self {
        self.config.timers = timers;
        self
    }

    /// Suppress retransmission timers by default, for test harnesses
    /// and constrained links.
    pub fn with_retransmission_disabled(mut self, disabled: bool) -> Self {
        self.config.timers.retransmission_disabled = disabled;
        self
    }

    pub fn with_user_agent<T: AsRef<str>>(mut self, agent: T) -> Self {
        self.config.user_agent = agent.as_ref().to_string();
        self
    }

    pub fn with_max_forwards(mut self, hops: u8) -> Self {
        self.config.max_forwards = hops;
        self
    }

    /// Control the automatic 100 Trying for INVITE server transactions.
    pub fn with_auto_100_trying(mut self, enabled: bool) -> Self {
        self.config.auto_100_trying = enabled;
        self
    }

    pub fn with_srv_resolution(mut self, enabled: bool) -> Self {
        self.config.srv_resolution = enabled;
        self
    }

    /// Register a service. A name already registered is skipped.
    pub fn with_service(mut self, service: impl SipService) -> Self {
        if self.service_exists(service.name()) {
            return self;
        }
        self.services.push(Box::new(service));
        self
    }

    /// Register several services at once as trait objects.
    pub fn with_services<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn SipService>>,
    {
        for service in services {
            if self.service_exists(service.name()) {
                continue;
            }
            self.services.push(service);
        }
        self
    }

    fn service_exists(&self, name: &str) -> bool {
        let exists = self.services.iter().any(|s| s.name() == name);
        if exists {
            log::warn!("Service with name '{name}' already exists");
        }
        exists
    }

    /// Bind the configured transports and assemble the endpoint.
    pub async fn build(self) -> Endpoint {
        log::trace!("Creating endpoint...");
        log::debug!(
            "Services registered ({})",
            self.services.iter().map(|s| s.name()).join(", ")
        );

        let transport = TransportLayer::new();
        let resolver = Resolver::new(self.config.srv_resolution);

        for startup in &self.startups {
            if let Err(err) = startup.start(&transport, transport.sender().clone()).await {
                log::error!("Failed to start transport: {err}");
            }
        }

        Endpoint(Arc::new(Inner {
            name: self.name,
            config: self.config,
            transport,
            transaction: TransactionLayer::default(),
            dialogs: DialogLayer::default(),
            resolver,
            services: self.services.into_boxed_slice(),
        }))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}
