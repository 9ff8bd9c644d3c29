//! Fetching documents from untrusted URLs.
//!
//! Source URLs come from third-party metadata, so every request target is
//! checked before it is contacted: only http(s), and every address the host
//! resolves to must be publicly routable. Redirects are never followed by the
//! HTTP client; one hop is followed manually after the target passes the same
//! check.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::IpNet;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{header, redirect, Client, ClientBuilder, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Host, Url};

use papertrail_core::{defaults, Error, Result};

/// Ranges that must never be contacted: private, loopback, link-local,
/// shared, documentation, benchmarking, multicast and reserved space.
/// `::/8` covers the unspecified, loopback and IPv4-compatible forms; the
/// NAT64 prefixes embed IPv4 addresses a translator would reach.
const BLOCKED_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::/8",
    "64:ff9b::/96",
    "64:ff9b:1::/48",
    "100::/64",
    "2001::/23",
    "2001:db8::/32",
    "fc00::/7",
    "fe80::/10",
    "fec0::/10",
    "ff00::/8",
];

/// Why a URL was refused before any request was made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlRejection {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    #[error("URL has no host")]
    NoHost,

    #[error("DNS resolution failed for {host}: {reason}")]
    DnsResolution { host: String, reason: String },

    #[error("{0} resolved to no addresses")]
    NoAddresses(String),

    #[error("{host} resolves to blocked address {ip}")]
    BlockedAddress { host: String, ip: IpAddr },
}

/// Why a fetch produced no document.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsafe URL: {0}")]
    Rejected(#[from] UrlRejection),

    #[error("unsafe redirect target: {0}")]
    RedirectRejected(UrlRejection),

    #[error("invalid redirect location: {0}")]
    InvalidRedirect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Request(e.to_string())
    }
}

/// Address classification for fetch targets.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    blocked: Vec<IpNet>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            blocked: BLOCKED_RANGES
                .iter()
                .filter_map(|cidr| cidr.parse().ok())
                .collect(),
        }
    }
}

impl UrlPolicy {
    /// Block an additional range.
    pub fn block(mut self, range: IpNet) -> Self {
        self.blocked.push(range);
        self
    }

    /// Whether `ip` falls in a blocked range. IPv4-mapped IPv6 addresses are
    /// judged by their IPv4 form.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        self.blocked.iter().any(|range| range.contains(&ip))
    }

    /// Refuse `host` unless it resolved to at least one address and none of
    /// them is blocked.
    fn screen(&self, host: &str, addrs: &[IpAddr]) -> std::result::Result<(), UrlRejection> {
        if addrs.is_empty() {
            return Err(UrlRejection::NoAddresses(host.to_string()));
        }
        match addrs.iter().find(|ip| self.is_blocked(**ip)) {
            Some(ip) => Err(UrlRejection::BlockedAddress {
                host: host.to_string(),
                ip: *ip,
            }),
            None => Ok(()),
        }
    }
}

/// Resolves a hostname to every address it currently maps to.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Fixed host table. Unknown hosts fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `addrs`, replacing any previous entry.
    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.into().to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such host: {}", host),
                )
            })
    }
}

/// DNS resolver installed in the fetch client. It applies the address policy
/// again when the connection is made, so a host cannot pass the URL check and
/// then resolve to an internal address for the request itself.
#[derive(Clone)]
pub struct PolicyResolver {
    resolver: Arc<dyn HostResolver>,
    policy: UrlPolicy,
}

impl PolicyResolver {
    pub fn new(resolver: Arc<dyn HostResolver>, policy: UrlPolicy) -> Self {
        Self { resolver, policy }
    }

    /// Resolve `host` to connectable addresses. The port is left at 0; the
    /// client fills in the one from the URL.
    pub async fn resolve_checked(
        &self,
        host: &str,
    ) -> std::result::Result<Vec<SocketAddr>, UrlRejection> {
        let addrs = self
            .resolver
            .resolve(host, 0)
            .await
            .map_err(|e| UrlRejection::DnsResolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        self.policy.screen(host, &addrs)?;
        Ok(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl Resolve for PolicyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let addrs = resolver.resolve_checked(name.as_str()).await.map_err(|e| {
                warn!(
                    subsystem = "jobs",
                    component = "fetch",
                    host = name.as_str(),
                    error = %e,
                    "Connection refused by address policy"
                );
                e
            })?;
            Ok::<Addrs, BoxError>(Box::new(addrs.into_iter()))
        })
    }
}

/// Fetch limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Largest accepted body.
    pub max_bytes: u64,
    /// Client identifier sent with every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(defaults::FETCH_TIMEOUT_SECS),
            max_bytes: defaults::FETCH_MAX_BYTES,
            user_agent: defaults::FETCH_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FETCH_TIMEOUT_SECS` | `60` | Per-request timeout |
    /// | `FETCH_MAX_BYTES` | `52428800` | Body size limit (50 MB) |
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::FETCH_TIMEOUT_SECS)
            .max(1);

        let max_bytes = std::env::var("FETCH_MAX_BYTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::FETCH_MAX_BYTES);

        Self::default()
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_max_bytes(max_bytes)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Client settings every [`SafeFetcher`] client needs: no automatic
/// redirects, the configured timeout and client identifier.
pub fn client_builder(config: &FetchConfig) -> ClientBuilder {
    Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
}

/// Build an HTTP client suitable for [`SafeFetcher`].
pub fn build_client(config: &FetchConfig) -> Result<Client> {
    client_builder(config)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// SSRF-resistant document fetcher.
pub struct SafeFetcher {
    client: Client,
    resolver: Arc<dyn HostResolver>,
    policy: UrlPolicy,
    config: FetchConfig,
}

impl SafeFetcher {
    /// Create a fetcher using system DNS.
    pub fn new(config: FetchConfig) -> Result<Self> {
        Self::with_resolver(config, Arc::new(SystemResolver), UrlPolicy::default())
    }

    /// Create a fetcher whose URL checks and connections both resolve through
    /// `resolver` and are screened by `policy`.
    pub fn with_resolver(
        config: FetchConfig,
        resolver: Arc<dyn HostResolver>,
        policy: UrlPolicy,
    ) -> Result<Self> {
        let client = client_builder(&config)
            .dns_resolver(Arc::new(PolicyResolver::new(
                resolver.clone(),
                policy.clone(),
            )))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            resolver,
            policy,
            config,
        })
    }

    /// Create a fetcher from an existing client and resolver.
    ///
    /// The client must not follow redirects; see [`client_builder`]. Its own
    /// DNS resolution is not screened unless it was built with a
    /// [`PolicyResolver`].
    pub fn with_parts(client: Client, resolver: Arc<dyn HostResolver>, config: FetchConfig) -> Self {
        Self {
            client,
            resolver,
            policy: UrlPolicy::default(),
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Validate `url`, resolving its host and checking every address.
    pub async fn check_url(&self, url: &str) -> std::result::Result<Url, UrlRejection> {
        let parsed = Url::parse(url).map_err(|e| UrlRejection::InvalidUrl(e.to_string()))?;
        self.check_parsed(&parsed).await?;
        Ok(parsed)
    }

    async fn check_parsed(&self, url: &Url) -> std::result::Result<(), UrlRejection> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(UrlRejection::DisallowedScheme(other.to_string())),
        }

        let addrs = match url.host() {
            None => return Err(UrlRejection::NoHost),
            Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(Host::Domain(domain)) => {
                if domain.is_empty() {
                    return Err(UrlRejection::NoHost);
                }
                let port = url.port_or_known_default().unwrap_or(80);
                self.resolver
                    .resolve(domain, port)
                    .await
                    .map_err(|e| UrlRejection::DnsResolution {
                        host: domain.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        self.policy
            .screen(url.host_str().unwrap_or_default(), &addrs)
    }

    /// Whether `url` may be fetched. Any failure to decide counts as unsafe.
    pub async fn is_safe(&self, url: &str) -> bool {
        self.check_url(url).await.is_ok()
    }

    /// Fetch `url`, following at most one validated redirect.
    pub async fn try_fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let start = Instant::now();
        let target = self.check_url(url).await?;

        let response = self.client.get(target.clone()).send().await?;
        let response = if is_redirect(response.status()) {
            let next = redirect_target(&target, &response)?;
            self.check_parsed(&next)
                .await
                .map_err(FetchError::RedirectRejected)?;
            debug!(
                subsystem = "jobs",
                component = "fetch",
                from = %target,
                to = %next,
                "Following redirect"
            );
            self.client.get(next).send().await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = self.read_limited(response).await?;
        debug!(
            subsystem = "jobs",
            component = "fetch",
            url = %target,
            bytes = body.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document fetched"
        );
        Ok(body)
    }

    /// Fetch `url`, or log why not and return `None`.
    pub async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        match self.try_fetch(url).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "fetch",
                    url,
                    error = %e,
                    "Fetch refused or failed"
                );
                None
            }
        }
    }

    /// Read the body, refusing anything over the configured limit.
    async fn read_limited(
        &self,
        mut response: reqwest::Response,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let limit = self.config.max_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Absolute redirect target; relative locations resolve against `base`.
fn redirect_target(
    base: &Url,
    response: &reqwest::Response,
) -> std::result::Result<Url, FetchError> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or(FetchError::Status(response.status()))?
        .to_str()
        .map_err(|e| FetchError::InvalidRedirect(e.to_string()))?;
    base.join(location)
        .map_err(|e| FetchError::InvalidRedirect(format!("{}: {}", location, e)))
}
