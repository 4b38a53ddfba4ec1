use std::sync::Arc;
use std::time::Duration;

use assert_json_diff::assert_json_include;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use tower::ServiceExt; // for `oneshot`

use flags::flag_store::{FlagStore, MemoryFlagStore};
use flags::flag_sync::FLAGS_UPDATE_CHANNEL;
use flags::pubsub::{InMemoryPubSub, PubSub};
use flags::router::router;
use flags::test_utils::setup_registry;

struct TestApp {
    app: Router,
    store: Arc<MemoryFlagStore>,
    bus: InMemoryPubSub,
}

fn setup_app() -> TestApp {
    let store = Arc::new(MemoryFlagStore::new());
    let bus = InMemoryPubSub::new();
    let app = router(
        setup_registry(),
        store.clone(),
        Arc::new(bus.clone()),
        false,
    );
    TestApp { app, store, bus }
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_index() {
    let TestApp { app, .. } = setup_app();

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"flags");
}

#[tokio::test]
async fn test_flags_endpoint_mints_visitor_cookie() {
    let TestApp { app, .. } = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/flags")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("expected a minted visitor cookie")
        .to_str()
        .unwrap()
        .to_owned();
    assert!(cookie.starts_with("flag_id="));
    assert!(cookie.contains("Max-Age=31536000"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));

    let body = json_body(response).await;
    assert!(body.get("always-on").is_some());
}

#[tokio::test]
async fn test_flags_endpoint_is_deterministic_per_visitor() {
    let TestApp { app, .. } = setup_app();

    // Visitor "ab" hashes to bucket 5.
    let request = || {
        Request::builder()
            .uri("/api/flags")
            .header(header::COOKIE, "flag_id=ab")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    // A returning visitor keeps their cookie.
    assert!(first.headers().get(header::SET_COOKIE).is_none());

    let second = app.oneshot(request()).await.unwrap();

    let expected = serde_json::json!({
        "always-on": { "value": true, "override": null },
        "always-off": { "value": false, "override": null },
        "half-rollout": { "value": true, "override": null },
        "even-bucket": { "value": false, "override": null },
    });
    let first_body = json_body(first).await;
    let second_body = json_body(second).await;
    assert_eq!(first_body, expected);
    assert_eq!(second_body, expected);
}

#[tokio::test]
async fn test_override_unknown_flag_returns_404_without_side_effects() {
    let TestApp { app, store, bus } = setup_app();

    let mut subscription = bus.subscribe(FLAGS_UPDATE_CHANNEL).await.unwrap();

    let response = app
        .oneshot(post_json(
            "/api/admin/flags/override",
            serde_json::json!({ "flagKey": "does-not-exist", "value": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_json_include!(
        actual: json_body(response).await,
        expected: serde_json::json!({ "success": false, "error": "Flag not found" })
    );

    assert_eq!(store.row_count(), 0);
    let nothing = tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await;
    assert!(nothing.is_err(), "no publish expected for unknown flag");
}

#[tokio::test]
async fn test_override_persists_publishes_and_shows_up_in_decisions() {
    let TestApp { app, store, bus } = setup_app();

    let mut subscription = bus.subscribe(FLAGS_UPDATE_CHANNEL).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/admin/flags/override",
            serde_json::json!({ "flagKey": "always-on", "value": false }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "success": true })
    );

    let row = store.get_flag("always-on").await.unwrap().unwrap();
    assert!(!row.override_value);

    let message = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("timed out waiting for flag update")
        .unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&message).unwrap(),
        serde_json::json!({ "flagKey": "always-on", "value": false })
    );

    // The forced `false` is visible, distinct from the computed value.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/flags")
                .header(header::COOKIE, "flag_id=ab")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_json_include!(
        actual: json_body(response).await,
        expected: serde_json::json!({
            "always-on": { "value": true, "override": false }
        })
    );
}

#[tokio::test]
async fn test_clearing_override_restores_computed_decision() {
    let TestApp { app, store, .. } = setup_app();

    let set = app
        .clone()
        .oneshot(post_json(
            "/api/admin/flags/override",
            serde_json::json!({ "flagKey": "always-on", "value": false }),
        ))
        .await
        .unwrap();
    assert_eq!(set.status(), StatusCode::OK);
    assert_eq!(store.row_count(), 1);

    let clear = app
        .clone()
        .oneshot(post_json(
            "/api/admin/flags/override",
            serde_json::json!({ "flagKey": "always-on", "value": null }),
        ))
        .await
        .unwrap();
    assert_eq!(clear.status(), StatusCode::OK);
    assert_eq!(store.row_count(), 0);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/flags")
                .header(header::COOKIE, "flag_id=ab")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_json_include!(
        actual: json_body(response).await,
        expected: serde_json::json!({
            "always-on": { "value": true, "override": null }
        })
    );
}

#[tokio::test]
async fn test_sse_requires_channel_parameter() {
    let TestApp { app, .. } = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sse")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_publish_endpoint_broadcasts() {
    let TestApp { app, bus, .. } = setup_app();

    let mut subscription = bus.subscribe("room:1").await.unwrap();

    let response = app
        .oneshot(post_json(
            "/api/sse",
            serde_json::json!({ "channel": "room:1", "message": "hello" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "status": "ok" })
    );

    let message = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("timed out waiting for message")
        .unwrap();
    assert_eq!(message, "hello");
}

#[tokio::test]
async fn test_sse_stream_forwards_published_messages() {
    let TestApp { app, bus, .. } = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sse?channel=room:1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );
    assert_eq!(bus.subscriber_count("room:1"), 1);

    bus.publish("room:1", "live-update").await.unwrap();

    let mut frames = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await
        .expect("timed out waiting for event frame")
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(frame.to_vec()).unwrap();
    assert_eq!(frame, "data: live-update\n\n");
}

#[tokio::test]
async fn test_sse_disconnect_releases_subscription() {
    let TestApp { app, bus, .. } = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sse?channel=room:1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bus.subscriber_count("room:1"), 1);

    // Client goes away: dropping the body drops the stream and with it the
    // channel subscription.
    drop(response);

    for _ in 0..100 {
        if bus.subscriber_count("room:1") == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(bus.subscriber_count("room:1"), 0);

    // Publishing afterwards reaches nobody and does not error.
    bus.publish("room:1", "into the void").await.unwrap();
}
