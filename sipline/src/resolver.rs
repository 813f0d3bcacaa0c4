//! RFC 3263 destination resolution.
//!
//! Given a URI, produce the ordered list of (transport, address)
//! candidates to try: explicit `transport=` parameter first, `sips`
//! forcing TLS, then NAPTR → SRV → A/AAAA fall-through. Positive results
//! are cached for the record TTL.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use rand::Rng;

use crate::error::{Error, Result};
use crate::message::{Host, TransportKind, Uri};

/// One destination candidate in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEntry {
    pub kind: TransportKind,
    pub addr: SocketAddr,
}

#[derive(Clone)]
struct CacheEntry {
    expires_at: Instant,
    entries: Vec<ServerEntry>,
}

/// RFC 3263 resolver over hickory-dns, with a TTL-bounded positive
/// cache on top of the library's own.
pub struct Resolver {
    dns: Option<TokioAsyncResolver>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// NAPTR/SRV lookups can be disabled by configuration; plain
    /// A/AAAA resolution still happens.
    srv_enabled: bool,
}

impl Resolver {
    pub fn new(srv_enabled: bool) -> Self {
        let dns = TokioAsyncResolver::tokio_from_system_conf().ok();
        if dns.is_none() {
            log::warn!("System DNS configuration unavailable, only literal addresses resolve");
        }
        Resolver {
            dns,
            cache: Mutex::new(HashMap::new()),
            srv_enabled,
        }
    }

    /// Resolve a URI to candidates per RFC 3263 section 4.
    pub async fn resolve(&self, uri: &Uri) -> Result<Vec<ServerEntry>> {
        let target_host = uri.maddr_param.as_ref().unwrap_or(&uri.host_port.host);
        let secure = uri.is_sips();

        // Explicit transport parameter short-circuits NAPTR.
        let forced = if secure {
            Some(TransportKind::Tls)
        } else {
            uri.transport_param
        };

        // A literal address never touches DNS.
        if let Host::IpAddr(ip) = target_host {
            let kind = forced.unwrap_or(TransportKind::Udp);
            let port = uri.host_port.port.unwrap_or(kind.default_port());
            return Ok(vec![ServerEntry {
                kind,
                addr: SocketAddr::new(*ip, port),
            }]);
        }
        let Host::DomainName(domain) = target_host else {
            unreachable!();
        };

        let cache_key = format!("{}|{:?}|{:?}", domain, uri.host_port.port, forced);
        if let Some(hit) = self.cache_lookup(&cache_key) {
            return Ok(hit);
        }

        let entries = self
            .resolve_domain(domain, uri.host_port.port, forced, secure)
            .await?;
        if entries.is_empty() {
            return Err(Error::Unresolvable(domain.clone()));
        }

        self.cache_store(cache_key, &entries);
        Ok(entries)
    }

    async fn resolve_domain(
        &self,
        domain: &str,
        explicit_port: Option<u16>,
        forced: Option<TransportKind>,
        secure: bool,
    ) -> Result<Vec<ServerEntry>> {
        // An explicit port means no SRV: straight A/AAAA (RFC 3263 §4.2).
        if let Some(port) = explicit_port {
            let kind = forced.unwrap_or(if secure {
                TransportKind::Tls
            } else {
                TransportKind::Udp
            });
            return self.lookup_addresses(domain, port, kind).await;
        }

        if self.srv_enabled {
            let kinds: Vec<TransportKind> = match forced {
                Some(kind) => vec![kind],
                None => self.naptr_transport_order(domain, secure).await,
            };

            let mut out = Vec::new();
            for kind in kinds {
                out.extend(self.lookup_srv(domain, kind).await?);
            }
            if !out.is_empty() {
                return Ok(out);
            }
        }

        // Fall through to plain address resolution on the default port.
        let kind = forced.unwrap_or(if secure {
            TransportKind::Tls
        } else {
            TransportKind::Udp
        });
        self.lookup_addresses(domain, kind.default_port(), kind).await
    }

    /// Transport preference from NAPTR, or the static default order.
    async fn naptr_transport_order(&self, domain: &str, secure: bool) -> Vec<TransportKind> {
        let fallback = if secure {
            vec![TransportKind::Tls]
        } else {
            vec![TransportKind::Udp, TransportKind::Tcp, TransportKind::Tls]
        };
        let Some(dns) = &self.dns else {
            return fallback;
        };

        let lookup = match dns.lookup(domain, RecordType::NAPTR).await {
            Ok(lookup) => lookup,
            Err(_) => return fallback,
        };

        let mut found: Vec<(u16, u16, TransportKind)> = Vec::new();
        for record in lookup.iter() {
            let RData::NAPTR(naptr) = record else {
                continue;
            };
            let service = String::from_utf8_lossy(naptr.services()).to_ascii_uppercase();
            let kind = match service.as_str() {
                "SIP+D2U" => TransportKind::Udp,
                "SIP+D2T" => TransportKind::Tcp,
                "SIPS+D2T" => TransportKind::Tls,
                "SIP+D2W" => TransportKind::Ws,
                _ => continue,
            };
            if secure && kind != TransportKind::Tls {
                continue;
            }
            found.push((naptr.order(), naptr.preference(), kind));
        }

        if found.is_empty() {
            return fallback;
        }
        found.sort_by_key(|(order, pref, _)| (*order, *pref));
        found.into_iter().map(|(_, _, kind)| kind).collect()
    }

    /// SRV lookup for one transport, candidates sorted by priority and
    /// weighted randomly within equal priority (RFC 2782).
    async fn lookup_srv(&self, domain: &str, kind: TransportKind) -> Result<Vec<ServerEntry>> {
        let Some(dns) = &self.dns else {
            return Ok(Vec::new());
        };
        let name = format!("{}.{}", kind.srv_service(), domain);

        let lookup = match dns.srv_lookup(name).await {
            Ok(lookup) => lookup,
            Err(_) => return Ok(Vec::new()),
        };

        let mut records: Vec<_> = lookup
            .iter()
            .map(|srv| {
                let jitter: u64 = rand::rng().random_range(0..=u16::MAX as u64);
                let weight_rank = u64::MAX - srv.weight() as u64 * jitter;
                (srv.priority(), weight_rank, srv.target().to_utf8(), srv.port())
            })
            .collect();
        records.sort_by_key(|(priority, weight_rank, _, _)| (*priority, *weight_rank));

        let mut out = Vec::new();
        for (_, _, target, port) in records {
            let target = target.trim_end_matches('.');
            for entry in self.lookup_addresses(target, port, kind).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn lookup_addresses(
        &self,
        domain: &str,
        port: u16,
        kind: TransportKind,
    ) -> Result<Vec<ServerEntry>> {
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Ok(vec![ServerEntry {
                kind,
                addr: SocketAddr::new(ip, port),
            }]);
        }
        let Some(dns) = &self.dns else {
            return Ok(Vec::new());
        };

        let lookup = dns
            .lookup_ip(domain)
            .await
            .map_err(|err| Error::Unresolvable(format!("{domain}: {err}")))?;

        Ok(lookup
            .iter()
            .map(|ip| ServerEntry {
                kind,
                addr: SocketAddr::new(ip, port),
            })
            .collect())
    }

    fn cache_lookup(&self, key: &str) -> Option<Vec<ServerEntry>> {
        let mut cache = self.cache.lock().expect("Lock failed");
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.entries.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_store(&self, key: String, entries: &[ServerEntry]) {
        // hickory enforces per-record TTLs underneath; this cache only
        // bounds re-running the full NAPTR/SRV walk.
        const CACHE_TTL: Duration = Duration::from_secs(60);
        let mut cache = self.cache.lock().expect("Lock failed");
        cache.insert(
            key,
            CacheEntry {
                expires_at: Instant::now() + CACHE_TTL,
                entries: entries.to_vec(),
            },
        );
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Uri;

    #[tokio::test]
    async fn test_literal_address_resolves_without_dns() {
        let resolver = Resolver::new(true);
        let uri: Uri = "sip:192.0.2.5:5080".parse().unwrap();

        let entries = resolver.resolve(&uri).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].addr, "192.0.2.5:5080".parse().unwrap());
        assert_eq!(entries[0].kind, TransportKind::Udp);
    }

    #[tokio::test]
    async fn test_sips_literal_forces_tls() {
        let resolver = Resolver::new(true);
        let uri: Uri = "sips:192.0.2.5".parse().unwrap();

        let entries = resolver.resolve(&uri).await.unwrap();
        assert_eq!(entries[0].kind, TransportKind::Tls);
        assert_eq!(entries[0].addr.port(), 5061);
    }

    #[tokio::test]
    async fn test_transport_param_wins() {
        let resolver = Resolver::new(true);
        let uri: Uri = "sip:192.0.2.5;transport=tcp".parse().unwrap();

        let entries = resolver.resolve(&uri).await.unwrap();
        assert_eq!(entries[0].kind, TransportKind::Tcp);
    }
}
