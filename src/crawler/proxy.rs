//! Proxy pool with per-proxy HTTP clients
//!
//! reqwest binds a proxy at client build time, so the pool holds one client per
//! configured proxy and hands them out according to the rotation policy.

use crate::config::{CrawlerConfig, ProxyConfig, ProxyRotation};
use crate::crawler::fetcher::build_http_client;
use rand::Rng;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An HTTP client bound to one egress route
#[derive(Debug, Clone)]
pub struct ProxyClient {
    /// Proxy URL, or "direct"
    pub label: String,
    pub client: Client,
}

#[derive(Debug)]
pub struct ProxyPool {
    clients: Vec<ProxyClient>,
    rotation: ProxyRotation,
    cursor: AtomicUsize,
}

impl ProxyPool {
    /// Builds the pool; falls back to a single direct client when proxies are off
    pub fn from_config(
        crawler: &CrawlerConfig,
        proxy: &ProxyConfig,
    ) -> Result<Self, reqwest::Error> {
        let mut clients = Vec::new();

        if proxy.enabled {
            for url in &proxy.list {
                clients.push(ProxyClient {
                    label: url.clone(),
                    client: build_http_client(crawler, Some(url))?,
                });
            }
        }

        if clients.is_empty() {
            clients.push(ProxyClient {
                label: "direct".to_string(),
                client: build_http_client(crawler, None)?,
            });
        }

        Ok(Self {
            clients,
            rotation: proxy.rotate,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_proxied(&self) -> bool {
        self.clients.iter().any(|c| c.label != "direct")
    }

    /// Picks the client for the next request
    pub fn next(&self) -> (usize, &ProxyClient) {
        let idx = match self.rotation {
            ProxyRotation::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len()
            }
            ProxyRotation::Random => rand::thread_rng().gen_range(0..self.clients.len()),
        };
        (idx, &self.clients[idx])
    }

    /// Picks a client other than `used`, if the pool has one
    pub fn alternate(&self, used: usize) -> Option<(usize, &ProxyClient)> {
        let len = self.clients.len();
        if len < 2 {
            return None;
        }

        let idx = match self.rotation {
            ProxyRotation::RoundRobin => (used + 1) % len,
            ProxyRotation::Random => {
                let offset = rand::thread_rng().gen_range(1..len);
                (used + offset) % len
            }
        };
        Some((idx, &self.clients[idx]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(rotate: ProxyRotation) -> ProxyConfig {
        ProxyConfig {
            enabled: true,
            rotate,
            list: vec![
                "http://127.0.0.1:8001".to_string(),
                "http://127.0.0.1:8002".to_string(),
                "http://127.0.0.1:8003".to_string(),
            ],
        }
    }

    #[test]
    fn test_disabled_proxies_use_direct_client() {
        let pool = ProxyPool::from_config(&CrawlerConfig::default(), &ProxyConfig::default()).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_proxied());
        assert_eq!(pool.next().1.label, "direct");
        assert!(pool.alternate(0).is_none());
    }

    #[test]
    fn test_round_robin_cycles() {
        let pool = ProxyPool::from_config(&CrawlerConfig::default(), &proxies(ProxyRotation::RoundRobin)).unwrap();
        assert!(pool.is_proxied());

        let order: Vec<usize> = (0..4).map(|_| pool.next().0).collect();
        assert_eq!(order, vec![0, 1, 2, 0]);
        assert_eq!(pool.alternate(2).unwrap().0, 0);
    }

    #[test]
    fn test_random_alternate_differs() {
        let pool = ProxyPool::from_config(&CrawlerConfig::default(), &proxies(ProxyRotation::Random)).unwrap();
        for used in 0..3 {
            for _ in 0..20 {
                let (idx, _) = pool.alternate(used).unwrap();
                assert_ne!(idx, used);
            }
        }
    }
}
