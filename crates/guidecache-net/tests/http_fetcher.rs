//! HttpFetcher against a local mock origin.

use std::net::TcpListener;
use std::time::Duration;

use guidecache_net::{HttpFetcher, LoaderConfig, NetError};
use guidecache_sw::{FetchError, FetchRequest, Fetcher};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(LoaderConfig::default()).unwrap()
}

fn get(server: &MockServer, route: &str) -> FetchRequest {
    let url = Url::parse(&server.uri()).unwrap().join(route).unwrap();
    FetchRequest::get(url)
}

#[tokio::test]
async fn returns_body_status_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/events.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"[{"id":1}]"#, "application/json"),
        )
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(&get(&server, "data/events.json"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert_eq!(response.body, br#"[{"id":1}]"#);
    assert!(!response.from_cache);
}

#[tokio::test]
async fn error_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = fetcher().fetch(&get(&server, "missing.png")).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert!(!response.is_ok());
}

#[tokio::test]
async fn forwards_request_headers() {
    let server = MockServer::start().await;
    Mock::given(path("/agenda"))
        .and(header("accept", "text/html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap().join("agenda").unwrap();
    let response = fetcher().fetch(&FetchRequest::navigate(url)).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<html>");
}

#[tokio::test]
async fn timeout_is_a_network_error() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(LoaderConfig {
        default_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap();

    let err = fetcher.load(&get(&server, "slow")).await.unwrap_err();
    assert!(matches!(err, NetError::Timeout(_)));
}

#[tokio::test]
async fn unreachable_origin_is_a_network_error() {
    // Nothing listens on a port once its listener is closed.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let url = Url::parse(&format!("http://127.0.0.1:{port}/index.html")).unwrap();
    let request = FetchRequest::get(url);

    let err = fetcher().fetch(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
}

#[tokio::test]
async fn non_http_scheme_is_rejected() {
    let request = FetchRequest::get(Url::parse("file:///etc/hosts").unwrap());
    let err = fetcher().fetch(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
}
