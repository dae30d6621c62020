//! HTTP predictor against an in-process stub service

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use digit_canvas::compositor;
use digit_canvas::error::TransportError;
use digit_canvas::prediction::{BoundingBox, HttpPredictor, Predictor, RequestMode};
use digit_canvas::surface::{Point, Surface};

type Seen = Arc<Mutex<Vec<Value>>>;

/// Serve `router` on an ephemeral port and return its base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Stub that records request bodies and answers with a fixed status/body
async fn stub(status: StatusCode, body: &'static str) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let router = Router::new()
        .route(
            "/predict",
            post(
                move |State(seen): State<Seen>, Json(request): Json<Value>| async move {
                    seen.lock().unwrap().push(request);
                    (status, [(header::CONTENT_TYPE, "application/json")], body)
                },
            ),
        )
        .with_state(Arc::clone(&seen));
    (serve(router).await, seen)
}

fn snapshot(sequence: u64) -> compositor::Snapshot {
    let mut surface = Surface::new(56, 28);
    let pen = surface.pen();
    surface.apply_stroke(&[Point::new(14.0, 4.0), Point::new(14.0, 24.0)], &pen);
    compositor::compose(&surface, None, sequence)
}

#[tokio::test]
async fn single_shot_round_trip() {
    let (url, seen) = stub(
        StatusCode::OK,
        r#"{"full_digit": "0", "details": [{"digit": 0, "conf": "97.0%"}], "boxes": []}"#,
    )
    .await;
    let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();

    let result = predictor.predict(&snapshot(3), RequestMode::Single).await.unwrap();

    assert_eq!(result.full_digit.as_deref(), Some("0"));
    assert_eq!(result.sequence, 3);
    assert_eq!(result.details[0].digit, "0");
    assert!((result.details[0].confidence - 0.97).abs() < 1e-6);

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["is_realtime"], json!(false));
    let image = requests[0]["image"].as_str().unwrap();
    assert!(image.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn realtime_request_carries_boxes() {
    let (url, seen) = stub(
        StatusCode::OK,
        r#"{
            "full_digit": "17",
            "details": [{"digit": "1", "conf": 0.99}, {"digit": "7", "conf": 0.81}],
            "boxes": [{"x": 2, "y": 3, "w": 10, "h": 20}, {"x": 30, "y": 3, "w": 12, "h": 21}]
        }"#,
    )
    .await;
    let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();

    let result = predictor.predict(&snapshot(9), RequestMode::Stream).await.unwrap();

    assert_eq!(result.full_digit.as_deref(), Some("17"));
    assert_eq!(
        result.details[1].bounding_box,
        Some(BoundingBox { x: 30, y: 3, w: 12, h: 21 })
    );
    assert_eq!(seen.lock().unwrap()[0]["is_realtime"], json!(true));
}

#[tokio::test]
async fn server_error_is_status_error() {
    let (url, _) = stub(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error": "decode failed"}"#).await;
    let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();

    let err = predictor.predict(&snapshot(1), RequestMode::Single).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Status {
            status: 500,
            body: r#"{"error": "decode failed"}"#.to_string()
        }
    );
}

#[tokio::test]
async fn error_field_in_ok_body_is_service_error() {
    let (url, _) = stub(StatusCode::OK, r#"{"error": "no image"}"#).await;
    let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();

    let err = predictor.predict(&snapshot(1), RequestMode::Single).await.unwrap_err();
    assert_eq!(err, TransportError::Service("no image".to_string()));
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let (url, _) = stub(StatusCode::OK, "<html>gateway</html>").await;
    let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();

    let err = predictor.predict(&snapshot(1), RequestMode::Single).await.unwrap_err();
    assert!(matches!(err, TransportError::Malformed(_)));
}

#[tokio::test]
async fn slow_service_times_out() {
    let router = Router::new().route(
        "/predict",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "{}"
        }),
    );
    let url = serve(router).await;
    let predictor = HttpPredictor::new(&url, Duration::from_millis(100)).unwrap();

    let err = predictor.predict(&snapshot(1), RequestMode::Stream).await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
}

#[tokio::test]
async fn unreachable_service_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let predictor = HttpPredictor::new(&format!("http://{addr}"), Duration::from_secs(1)).unwrap();
    let err = predictor.predict(&snapshot(1), RequestMode::Single).await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
}
