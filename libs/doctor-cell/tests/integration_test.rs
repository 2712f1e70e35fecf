use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doctor_cell::router::doctor_routes;
use doctor_cell::services::{
    AvailabilityRepository, AvailabilityService, InMemoryAvailabilityRepository,
    SupabaseAvailabilityRepository,
};
use notification_cell::NotificationFanout;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_test_app(repository: Arc<dyn AvailabilityRepository>) -> Router {
    let service = AvailabilityService::new(repository, NotificationFanout::new(), 30);
    doctor_routes(TestConfig::default().to_arc(), Arc::new(service))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn put_availability(provider_id: Uuid, auth: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(format!("/{}/availability", provider_id))
        .header("Authorization", auth)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn weekly_template() -> Value {
    json!({
        "slot_duration_minutes": 30,
        "days": [
            { "day": "Mon", "windows": [ { "start": "09:00:00", "end": "11:00:00" } ] }
        ]
    })
}

#[tokio::test]
async fn test_provider_sets_and_reads_availability() {
    let app = create_test_app(Arc::new(InMemoryAvailabilityRepository::new()));
    let provider = TestUser::provider("provider@example.com");

    let response = assert_ok!(
        app.clone()
            .oneshot(put_availability(provider.uuid(), &JwtTestUtils::bearer(&provider), weekly_template()))
            .await
    );
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri(format!("/{}/availability", provider.uuid()))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["days"][0]["day"], "Mon");
    assert_eq!(json_response["days"][0]["windows"][0]["start"], "09:00:00");

    let request = Request::builder()
        .uri(format!("/{}/available-slots?date=2030-01-07", provider.uuid()))
        .body(Body::empty())
        .unwrap();
    let json_response = body_json(app.oneshot(request).await.unwrap()).await;
    assert_eq!(json_response["slots"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_set_availability_requires_authentication() {
    let app = create_test_app(Arc::new(InMemoryAvailabilityRepository::new()));

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/{}/availability", Uuid::new_v4()))
        .header("Content-Type", "application/json")
        .body(Body::from(weekly_template().to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_patient_cannot_set_availability() {
    let app = create_test_app(Arc::new(InMemoryAvailabilityRepository::new()));
    let patient = TestUser::patient("patient@example.com");

    let response = app
        .oneshot(put_availability(patient.uuid(), &JwtTestUtils::bearer(&patient), weekly_template()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_overlapping_windows_rejected() {
    let app = create_test_app(Arc::new(InMemoryAvailabilityRepository::new()));
    let provider = TestUser::provider("provider@example.com");

    let body = json!({
        "days": [
            { "day": "Tue", "windows": [
                { "start": "09:00:00", "end": "10:00:00" },
                { "start": "09:30:00", "end": "11:00:00" }
            ] }
        ]
    });

    let response = app
        .oneshot(put_availability(provider.uuid(), &JwtTestUtils::bearer(&provider), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json_response = body_json(response).await;
    assert_eq!(json_response["kind"], "validation_error");
}

#[tokio::test]
async fn test_supabase_repository_reads_template() {
    let mock_server = MockServer::start().await;
    let provider_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/provider_availability"))
        .and(query_param("provider_id", format!("eq.{}", provider_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::availability_row(provider_id)
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase(&mock_server.uri()).to_app_config();
    let app = create_test_app(Arc::new(SupabaseAvailabilityRepository::new(&config)));

    let request = Request::builder()
        .uri(format!("/{}/available-slots?date=2030-01-09", provider_id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["slots"].as_array().unwrap().len(), 6);
    assert_eq!(json_response["slots"][0]["start"], "09:00:00");
}

#[tokio::test]
async fn test_supabase_outage_surfaces_as_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/provider_availability"))
        .respond_with(ResponseTemplate::new(503).set_body_json(
            MockSupabaseResponses::error_response("upstream down", "503")
        ))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase(&mock_server.uri()).to_app_config();
    let app = create_test_app(Arc::new(SupabaseAvailabilityRepository::new(&config)));

    let request = Request::builder()
        .uri(format!("/{}/availability", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
