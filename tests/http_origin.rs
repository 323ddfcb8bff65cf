use std::time::Duration;

use axum::http::{Method, StatusCode, header};
use httpmock::MockServer;
use url::Url;

use offline_cache::application::fetch::{FetchError, FetchRequest, Origin};
use offline_cache::infra::origin::HttpOrigin;

fn origin() -> HttpOrigin {
    HttpOrigin::new(Duration::from_secs(5)).expect("client should build")
}

#[tokio::test]
async fn buffers_origin_response_with_accurate_length() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/src/main.js");
            then.status(200)
                .header("content-type", "text/javascript")
                .body("console.log('ready');");
        })
        .await;

    let url = Url::parse(&server.url("/src/main.js")).unwrap();
    let response = origin()
        .fetch(&FetchRequest::get(url))
        .await
        .expect("origin should answer");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"console.log('ready');");
    assert_eq!(response.size(), 21);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/javascript"
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn forwards_method_and_body() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("POST").path("/api/scores").body("{\"score\":10}");
            then.status(201).body("created");
        })
        .await;

    let url = Url::parse(&server.url("/api/scores")).unwrap();
    let mut request = FetchRequest::new(Method::POST, url);
    request.body = "{\"score\":10}".into();
    let response = origin().fetch(&request).await.expect("origin should answer");

    assert_eq!(response.status(), StatusCode::CREATED);
    mock.assert_async().await;
}

#[tokio::test]
async fn error_statuses_are_responses_not_failures() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/missing.png");
            then.status(404);
        })
        .await;

    let url = Url::parse(&server.url("/missing.png")).unwrap();
    let response = origin()
        .fetch(&FetchRequest::get(url))
        .await
        .expect("a 404 is still a response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreachable_origin_is_reported() {
    // Port 9 (discard) is closed on test hosts.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let err = origin()
        .fetch(&FetchRequest::get(url))
        .await
        .expect_err("nothing listens there");
    assert!(matches!(
        err,
        FetchError::Unreachable { .. } | FetchError::Timeout { .. }
    ));
}
