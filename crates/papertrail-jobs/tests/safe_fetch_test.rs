//! SafeFetcher behaviour against a live mock server.
//!
//! The mock server listens on loopback, which the fetch policy refuses. Tests
//! that need a reachable target give it a public-looking hostname: the policy
//! sees a public address from the static resolver while the HTTP client is
//! pinned to the mock server's socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use papertrail_jobs::fetch::{
    client_builder, FetchConfig, FetchError, HostResolver, SafeFetcher, StaticResolver,
    UrlPolicy, UrlRejection,
};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PUBLIC_HOST: &str = "papers.example.org";
const MIRROR_HOST: &str = "mirror.example.org";
const INTERNAL_HOST: &str = "intranet.example.org";

fn public_ip() -> IpAddr {
    "93.184.216.34".parse().unwrap()
}

/// Fetcher whose client routes every test hostname to the mock server.
fn fetcher_for(server: &MockServer, config: FetchConfig) -> SafeFetcher {
    pinned_fetcher(*server.address(), config)
}

/// Fetcher whose client routes every test hostname to `addr`.
fn pinned_fetcher(addr: SocketAddr, config: FetchConfig) -> SafeFetcher {
    let client = client_builder(&config)
        .resolve(PUBLIC_HOST, addr)
        .resolve(MIRROR_HOST, addr)
        .resolve(INTERNAL_HOST, addr)
        .build()
        .unwrap();

    let resolver = StaticResolver::new()
        .with_host(PUBLIC_HOST, vec![public_ip()])
        .with_host(MIRROR_HOST, vec![public_ip()])
        .with_host(INTERNAL_HOST, vec!["10.0.0.12".parse().unwrap()]);

    SafeFetcher::with_parts(client, Arc::new(resolver), config)
}

fn url(server: &MockServer, host: &str, path: &str) -> String {
    format!("http://{}:{}{}", host, server.address().port(), path)
}

#[tokio::test]
async fn test_fetch_public_document() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paper.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let body = fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/paper.pdf"))
        .await
        .expect("document fetched");
    assert_eq!(body, b"%PDF-1.4 body");
}

#[tokio::test]
async fn test_fetch_sends_client_identifier() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paper.pdf"))
        .and(wiremock::matchers::header("user-agent", "Papertrail-AI-Worker/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    assert!(fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/paper.pdf"))
        .await
        .is_some());
}

#[tokio::test]
async fn test_loopback_target_never_contacted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    // Direct loopback address of the mock server itself.
    assert!(fetcher.fetch(&format!("{}/paper.pdf", mock_server.uri())).await.is_none());
}

#[tokio::test]
async fn test_hostname_resolving_to_private_address_never_contacted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let err = fetcher
        .try_fetch(&url(&mock_server, INTERNAL_HOST, "/secret"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::Rejected(UrlRejection::BlockedAddress { .. })
    ));
}

#[tokio::test]
async fn test_body_over_limit_is_refused() {
    let mock_server = MockServer::start().await;
    let limit: u64 = 50 * 1024 * 1024;
    Mock::given(method("GET"))
        .and(path("/huge.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; limit as usize + 1]))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let err = fetcher
        .try_fetch(&url(&mock_server, PUBLIC_HOST, "/huge.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooLarge { limit: l } if l == limit));
}

#[tokio::test]
async fn test_body_at_limit_is_accepted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exact.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 1024]))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default().with_max_bytes(1024));
    let body = fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/exact.pdf"))
        .await
        .expect("body at the limit is accepted");
    assert_eq!(body.len(), 1024);

    let fetcher = fetcher_for(&mock_server, FetchConfig::default().with_max_bytes(1023));
    assert!(fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/exact.pdf"))
        .await
        .is_none());
}

/// Serve one response with a chunked body and no Content-Length.
async fn serve_chunked(chunks: Vec<Vec<u8>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;

        let mut response = b"HTTP/1.1 200 OK\r\n\
            Content-Type: application/pdf\r\n\
            Transfer-Encoding: chunked\r\n\
            Connection: close\r\n\r\n"
            .to_vec();
        for chunk in chunks {
            response.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            response.extend_from_slice(&chunk);
            response.extend_from_slice(b"\r\n");
        }
        response.extend_from_slice(b"0\r\n\r\n");
        let _ = socket.write_all(&response).await;
        let _ = socket.shutdown().await;
    });
    addr
}

fn pinned_url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}:{}{}", PUBLIC_HOST, addr.port(), path)
}

#[tokio::test]
async fn test_streamed_body_over_limit_is_refused() {
    let addr = serve_chunked(vec![vec![b'x'; 400]; 3]).await;
    let fetcher = pinned_fetcher(addr, FetchConfig::default().with_max_bytes(1000));

    let err = fetcher
        .try_fetch(&pinned_url(addr, "/stream.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooLarge { limit: 1000 }));
}

#[tokio::test]
async fn test_streamed_body_at_limit_is_accepted() {
    let addr = serve_chunked(vec![vec![b'x'; 500]; 2]).await;
    let fetcher = pinned_fetcher(addr, FetchConfig::default().with_max_bytes(1000));

    let body = fetcher
        .try_fetch(&pinned_url(addr, "/stream.pdf"))
        .await
        .expect("body at the limit is accepted");
    assert_eq!(body.len(), 1000);
}

/// Answers the first lookup with a public address and every later one with
/// loopback.
#[derive(Default)]
struct RebindingResolver {
    lookups: AtomicUsize,
}

#[async_trait]
impl HostResolver for RebindingResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addr = match self.lookups.fetch_add(1, Ordering::SeqCst) {
            0 => public_ip(),
            _ => "127.0.0.1".parse().unwrap(),
        };
        Ok(vec![addr])
    }
}

#[tokio::test]
async fn test_host_rebound_to_loopback_never_contacted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let resolver = Arc::new(RebindingResolver::default());
    let fetcher = SafeFetcher::with_resolver(
        FetchConfig::default(),
        resolver.clone(),
        UrlPolicy::default(),
    )
    .unwrap();

    let target = format!(
        "http://rebind.example.org:{}/paper.pdf",
        mock_server.address().port()
    );
    let err = fetcher.try_fetch(&target).await.unwrap_err();
    assert!(matches!(err, FetchError::Request(_)));
    assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_error_status_yields_none() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let err = fetcher
        .try_fetch(&url(&mock_server, PUBLIC_HOST, "/missing.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(StatusCode::NOT_FOUND)));
}

#[tokio::test]
async fn test_redirect_to_private_address_stops_before_second_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start.pdf"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", url(&mock_server, INTERNAL_HOST, "/admin").as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let err = fetcher
        .try_fetch(&url(&mock_server, PUBLIC_HOST, "/start.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::RedirectRejected(UrlRejection::BlockedAddress { .. })
    ));
}

#[tokio::test]
async fn test_redirect_to_metadata_address_refused() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start.pdf"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("location", "http://169.254.169.254/latest/meta-data/"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    assert!(fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/start.pdf"))
        .await
        .is_none());
}

#[tokio::test]
async fn test_redirect_to_safe_target_is_followed_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start.pdf"))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("location", url(&mock_server, MIRROR_HOST, "/final.pdf").as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/final.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"final".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let body = fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/start.pdf"))
        .await
        .expect("redirect followed");
    assert_eq!(body, b"final");
}

#[tokio::test]
async fn test_relative_redirect_resolves_against_original() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a/start.pdf"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "../b/final.pdf"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/final.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"relative".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let body = fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/a/start.pdf"))
        .await
        .expect("relative redirect followed");
    assert_eq!(body, b"relative");
}

#[tokio::test]
async fn test_second_redirect_is_not_followed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", url(&mock_server, MIRROR_HOST, "/two").as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", url(&mock_server, PUBLIC_HOST, "/three").as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/three"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"too far".to_vec()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    let err = fetcher
        .try_fetch(&url(&mock_server, PUBLIC_HOST, "/one"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(StatusCode::FOUND)));
}

#[tokio::test]
async fn test_redirect_without_location_yields_none() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start.pdf"))
        .respond_with(ResponseTemplate::new(302))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server, FetchConfig::default());
    assert!(fetcher
        .fetch(&url(&mock_server, PUBLIC_HOST, "/start.pdf"))
        .await
        .is_none());
}
