//! Behavioral tests for the HTTP cache proxy: coalescing, LRU eviction,
//! failure caching, and robots compliance against a mock server.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use librovore_core::config::Config;
use librovore_core::error::Error;
use librovore_core::retrieval::CacheProxy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    let mut config = Config::default();
    config.cache.robots.user_agent = "librovore-test/0.0".to_string();
    config
}

#[tokio::test]
async fn concurrent_retrievals_coalesce_into_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payload.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("shared payload")
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proxy = CacheProxy::new(&test_config()).unwrap();
    let url = format!("{}/payload.txt", server.uri());

    let (first, second) = tokio::join!(proxy.retrieve(&url), proxy.retrieve(&url));
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.bytes(), second.bytes());
    assert_eq!(first.bytes(), b"shared payload");
    // The cache grew by the payload size exactly once.
    assert_eq!(proxy.content_cache_bytes().await, "shared payload".len());
}

#[tokio::test]
async fn lru_eviction_triggers_refetch_of_evicted_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // Four 40-byte payloads against a 100-byte bound: a then b evict.
    let body = "x".repeat(40);
    for (name, expected_fetches) in [("a", 2u64), ("b", 1), ("c", 1), ("d", 1)] {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .expect(expected_fetches)
            .mount(&server)
            .await;
    }

    let mut config = test_config();
    config.cache.content.max_memory_bytes = 100;
    let proxy = CacheProxy::new(&config).unwrap();

    for name in ["a", "b", "c", "d"] {
        proxy
            .retrieve(&format!("{}/{name}", server.uri()))
            .await
            .unwrap();
    }
    assert!(proxy.content_cache_bytes().await <= 100);

    // "a" was evicted: retrieving it again goes back to the network.
    proxy
        .retrieve(&format!("{}/a", server.uri()))
        .await
        .unwrap();
    server.verify().await;
}

#[tokio::test]
async fn cached_failures_reraise_without_network_roundtrip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = CacheProxy::new(&test_config()).unwrap();
    let url = format!("{}/missing", server.uri());

    for _ in 0..3 {
        let result = proxy.retrieve(&url).await;
        assert!(matches!(
            result,
            Err(Error::HttpStatus { status: 404, .. })
        ));
    }
    server.verify().await;
}

#[tokio::test]
async fn probe_distinguishes_absent_from_failing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/present"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/absent"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let proxy = CacheProxy::new(&test_config()).unwrap();
    assert!(
        proxy
            .probe(&format!("{}/present", server.uri()))
            .await
            .unwrap()
    );
    assert!(
        !proxy
            .probe(&format!("{}/absent", server.uri()))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn robots_denial_fails_and_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proxy = CacheProxy::new(&test_config()).unwrap();
    let url = format!("{}/docs/index.html", server.uri());

    for _ in 0..3 {
        let result = proxy.retrieve(&url).await;
        assert!(matches!(result, Err(Error::AccessDisallowed { .. })));
    }
    let probe_result = proxy.probe(&url).await;
    assert!(matches!(probe_result, Err(Error::AccessDisallowed { .. })));

    // One robots fetch served every attempt.
    server.verify().await;
}

#[tokio::test]
async fn robots_crawl_delay_spaces_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 0.2\n"),
        )
        .mount(&server)
        .await;
    for name in ["one", "two"] {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(name))
            .mount(&server)
            .await;
    }

    let proxy = CacheProxy::new(&test_config()).unwrap();
    let started = std::time::Instant::now();
    proxy
        .retrieve(&format!("{}/one", server.uri()))
        .await
        .unwrap();
    proxy
        .retrieve(&format!("{}/two", server.uri()))
        .await
        .unwrap();
    assert!(
        started.elapsed() >= Duration::from_millis(200),
        "second request should wait out the crawl delay"
    );
}

#[tokio::test]
async fn text_retrieval_decodes_reported_charset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // "café" in ISO-8859-1: the 0xE9 byte is not valid UTF-8.
    Mock::given(method("GET"))
        .and(path("/latin1.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![b'c', b'a', b'f', 0xE9])
                .insert_header("content-type", "text/html; charset=ISO-8859-1"),
        )
        .mount(&server)
        .await;

    let proxy = CacheProxy::new(&test_config()).unwrap();
    let text = proxy
        .retrieve_text(&format!("{}/latin1.html", server.uri()))
        .await
        .unwrap();
    assert_eq!(text, "café");
}

#[tokio::test]
async fn text_retrieval_rejects_binary_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47])
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;

    let proxy = CacheProxy::new(&test_config()).unwrap();
    let url = format!("{}/logo.png", server.uri());

    let text_result = proxy.retrieve_text(&url).await;
    assert!(matches!(
        text_result,
        Err(Error::ContentTypeInvalid { actual, .. }) if actual == "image/png"
    ));
    // The bytes variant is unaffected by the allow-list.
    assert!(proxy.retrieve(&url).await.is_ok());
}
