//! Asynchronous address enrichment: reverse DNS names and country lookup.
//!
//! Lookups run on background tokio tasks and never block the simulation;
//! results come back over a channel the consumer drains once per tick. Until
//! a name resolves, nodes render the raw address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, Clone)]
enum CacheEntry {
    Pending,
    Done(String),
}

/// Reverse-DNS resolver with an in-memory cache.
///
/// Failed lookups are cached as the raw address so they are not retried for
/// every packet. Failures never propagate; the worst case is an unresolved
/// label.
pub struct NameResolver {
    cache: Arc<Mutex<HashMap<IpAddr, CacheEntry>>>,
    resolver: Arc<OnceCell<TokioAsyncResolver>>,
    tx: Sender<(IpAddr, String)>,
    rx: Receiver<(IpAddr, String)>,
}

impl NameResolver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        NameResolver {
            cache: Arc::new(Mutex::new(HashMap::new())),
            resolver: Arc::new(OnceCell::new()),
            tx,
            rx,
        }
    }

    /// Fire-and-forget name request. Cached results are re-delivered
    /// immediately; a request already in flight is not duplicated. Must be
    /// called from within a tokio runtime.
    pub fn request(&self, ip: IpAddr) {
        {
            let mut cache = self.cache.lock().unwrap();
            match cache.get(&ip) {
                Some(CacheEntry::Done(name)) => {
                    let _ = self.tx.send((ip, name.clone()));
                    return;
                }
                Some(CacheEntry::Pending) => return,
                None => {
                    cache.insert(ip, CacheEntry::Pending);
                }
            }
        }

        let cache = self.cache.clone();
        let resolver = self.resolver.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let name = match reverse_lookup(&resolver, ip).await {
                Some(name) => name,
                None => ip.to_string(),
            };
            cache.lock().unwrap().insert(ip, CacheEntry::Done(name.clone()));
            let _ = tx.send((ip, name));
        });
    }

    /// Results that arrived since the last drain.
    pub fn drain(&self) -> Vec<(IpAddr, String)> {
        self.rx.try_iter().collect()
    }

    #[cfg(test)]
    fn seed(&self, ip: IpAddr, entry: CacheEntry) {
        self.cache.lock().unwrap().insert(ip, entry);
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new()
    }
}

async fn reverse_lookup(cell: &OnceCell<TokioAsyncResolver>, ip: IpAddr) -> Option<String> {
    let resolver = cell
        .get_or_init(|| async {
            TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
                tracing::warn!("system resolver config unavailable ({e}), using fallback");
                TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
            })
        })
        .await;
    let ptr = resolver.reverse_lookup(ip).await.ok()?;
    let name = ptr.iter().next()?.to_string();
    Some(name.trim_end_matches('.').to_string())
}

/// Capability interface for mapping an address to an ISO country code.
///
/// The default implementation knows nothing; country clustering simply stays
/// inert without a real backend. `cached` must be cheap, it runs on the
/// simulation thread for every event while clustering is enabled.
pub trait CountryLookup: Send + Sync {
    fn cached(&self, ip: &IpAddr) -> Option<String>;

    /// Kick off an asynchronous lookup so `cached` may answer later.
    fn request(&self, _ip: IpAddr) {}
}

/// No-op lookup selected when no geo backend is configured.
pub struct NoCountryLookup;

impl CountryLookup for NoCountryLookup {
    fn cached(&self, _ip: &IpAddr) -> Option<String> {
        None
    }
}
