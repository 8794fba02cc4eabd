use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use marquee_api::{app, AppState};
use marquee_core::{RoomLayout, SeatPos};
use marquee_order::{MemoryOrderStore, OrderController};
use marquee_reserve::{LockManager, MemoryLockTable};
use marquee_store::StaticDirectory;

fn test_app() -> (Router, Uuid) {
    let orders_store = Arc::new(MemoryOrderStore::new());
    let directory = StaticDirectory::new();
    let screening = Uuid::new_v4();
    directory.register(
        screening,
        RoomLayout::with_blocked(10, 10, vec![SeatPos::new(10, 10)]),
    );

    let locks = LockManager::new(
        Arc::new(MemoryLockTable::new()),
        orders_store.clone(),
        Arc::new(directory),
        chrono::Duration::minutes(15),
    );
    let orders = OrderController::new(locks.clone(), orders_store, chrono::Duration::minutes(15));
    let (sse_tx, _) = tokio::sync::broadcast::channel(16);

    (app(AppState { locks, orders, sse_tx }), screening)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn seats_json(seats: &[(i32, i32)]) -> Value {
    json!({
        "seats": seats
            .iter()
            .map(|&(row, col)| json!({ "row": row, "col": col }))
            .collect::<Vec<_>>()
    })
}

#[tokio::test]
async fn seat_map_reports_the_room_grid() {
    let (app, screening) = test_app();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/v1/screenings/{screening}/seats"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"], 10);
    assert_eq!(body["cols"], 10);
    assert_eq!(body["grid"][0][0], "AVAILABLE");
    assert_eq!(body["grid"][9][9], "UNAVAILABLE");
}

#[tokio::test]
async fn unknown_screening_is_404() {
    let (app, _) = test_app();
    let (status, _) = send(
        &app,
        "GET",
        &format!("/v1/screenings/{}/seats", Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn locking_requires_identity() {
    let (app, screening) = test_app();
    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/screenings/{screening}/locks"),
        None,
        Some(seats_json(&[(1, 1)])),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn lock_conflict_names_only_the_contested_seats() {
    let (app, screening) = test_app();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let uri = format!("/v1/screenings/{screening}/locks");

    let (status, body) = send(&app, "POST", &uri, Some(alice), Some(seats_json(&[(1, 6)]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "LOCKED");
    assert!(body["expires_at"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(bob),
        Some(seats_json(&[(1, 5), (1, 6)])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["seats"], json!([{ "row": 1, "col": 6 }]));

    // The all-or-nothing failure left the free seat free.
    let (status, _) = send(&app, "POST", &uri, Some(bob), Some(seats_json(&[(1, 5)]))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn out_of_grid_seats_are_rejected() {
    let (app, screening) = test_app();
    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/screenings/{screening}/locks"),
        Some(Uuid::new_v4()),
        Some(seats_json(&[(11, 1)])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unlock_frees_the_seats_for_others() {
    let (app, screening) = test_app();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let uri = format!("/v1/screenings/{screening}/locks");

    let (status, _) = send(&app, "POST", &uri, Some(alice), Some(seats_json(&[(2, 2)]))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "DELETE", &uri, Some(alice), Some(seats_json(&[(2, 2)]))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "POST", &uri, Some(bob), Some(seats_json(&[(2, 2)]))).await;
    assert_eq!(status, StatusCode::OK);

    // Releasing bob's seat as alice is refused.
    let (status, _) = send(&app, "DELETE", &uri, Some(alice), Some(seats_json(&[(2, 2)]))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn full_purchase_flow_ends_with_sold_seats() {
    let (app, screening) = test_app();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let locks_uri = format!("/v1/screenings/{screening}/locks");

    let (status, _) = send(
        &app,
        "POST",
        &locks_uri,
        Some(alice),
        Some(seats_json(&[(3, 4), (3, 5)])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, order) = send(
        &app,
        "POST",
        "/v1/orders",
        Some(alice),
        Some(json!({
            "screening_id": screening,
            "seats": [{ "row": 3, "col": 4 }, { "row": 3, "col": 5 }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "PENDING_PAYMENT");
    assert_eq!(order["seat_count"], 2);
    assert_eq!(order["seats_description"], json!(["C4", "C5"]));
    assert_eq!(order["order_no"].as_str().unwrap().len(), 23);
    assert!(order["countdown"]["expired"] == json!(false));

    let order_id = order["id"].as_str().unwrap();

    // The order holds the seats even though the raw locks were released.
    let (status, body) = send(
        &app,
        "POST",
        &locks_uri,
        Some(bob),
        Some(seats_json(&[(3, 4)])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["seats"], json!([{ "row": 3, "col": 4 }]));

    let (status, paid) = send(
        &app,
        "PUT",
        &format!("/v1/orders/{order_id}/mark-as-paid"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "PAID");
    assert!(paid["payment_time"].is_string());
    assert!(paid["countdown"].is_null());

    // Paying twice is harmless.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/v1/orders/{order_id}/mark-as-paid"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, map) = send(
        &app,
        "GET",
        &format!("/v1/screenings/{screening}/seats"),
        None,
        None,
    )
    .await;
    assert_eq!(map["grid"][2][3], "SOLD");
    assert_eq!(map["grid"][2][4], "SOLD");
}

#[tokio::test]
async fn order_requires_locks_first() {
    let (app, screening) = test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/v1/orders",
        Some(Uuid::new_v4()),
        Some(json!({
            "screening_id": screening,
            "seats": [{ "row": 4, "col": 4 }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["seats"], json!([{ "row": 4, "col": 4 }]));
}

#[tokio::test]
async fn cancelled_order_releases_its_seats() {
    let (app, screening) = test_app();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let locks_uri = format!("/v1/screenings/{screening}/locks");

    send(&app, "POST", &locks_uri, Some(alice), Some(seats_json(&[(5, 5)]))).await;
    let (_, order) = send(
        &app,
        "POST",
        "/v1/orders",
        Some(alice),
        Some(json!({
            "screening_id": screening,
            "seats": [{ "row": 5, "col": 5 }],
        })),
    )
    .await;
    let order_no = order["order_no"].as_str().unwrap().to_string();

    // Lookup works by order number too, and only for the owner.
    let (status, _) = send(&app, "GET", &format!("/v1/orders/{order_no}"), Some(bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/v1/orders/{order_no}/cancel"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, fetched) = send(
        &app,
        "GET",
        &format!("/v1/orders/{order_no}"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "CANCELLED");
    assert!(fetched["cancel_time"].is_string());

    let (status, _) = send(&app, "POST", &locks_uri, Some(bob), Some(seats_json(&[(5, 5)]))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn orders_list_is_scoped_to_the_caller() {
    let (app, screening) = test_app();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let locks_uri = format!("/v1/screenings/{screening}/locks");

    send(&app, "POST", &locks_uri, Some(alice), Some(seats_json(&[(6, 6)]))).await;
    send(
        &app,
        "POST",
        "/v1/orders",
        Some(alice),
        Some(json!({
            "screening_id": screening,
            "seats": [{ "row": 6, "col": 6 }],
        })),
    )
    .await;

    let (status, mine) = send(&app, "GET", "/v1/orders", Some(alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, theirs) = send(&app, "GET", "/v1/orders", Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(theirs.as_array().unwrap().is_empty());
}
