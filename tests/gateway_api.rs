#![cfg(feature = "mock-vendors")]

mod common;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::net::TcpListener;

use disbursement_engine::gateway::{build_router, state::AppState};
use disbursement_engine::vendor::VendorId;
use disbursement_engine::vendor::mock::MockVendor;

use common::engine;

struct TestServer {
    base: String,
    client: reqwest::Client,
    mock: Arc<MockVendor>,
}

impl TestServer {
    async fn start() -> Self {
        let mock = Arc::new(MockVendor::new(VendorId::Mock));
        let e = engine(&[mock.clone()]);
        let app = build_router(Arc::new(AppState::new(e.coordinator.clone(), None)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            mock,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post_raw(&self, path: &str, body: &'static str) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn validated_recipient(&self) -> i64 {
        let (status, body) = self
            .post(
                "/api/v1/validations",
                json!({"bank_code": "bca", "account_number": "1234567890", "name_in_bank": "John Doe"}),
            )
            .await;
        assert_eq!(status, 201);
        assert_eq!(body["data"]["status"], "SUCCESS");
        body["data"]["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/v1/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["code"], 0);
    assert!(body["data"]["timestamp_ms"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_validation_lifecycle() {
    let server = TestServer::start().await;
    let id = server.validated_recipient().await;

    let (status, body) = server.get(&format!("/api/v1/validations/{}", id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["bank_code"], "BCA");
    assert_eq!(body["data"]["validated_name"], "John Doe");
    assert_eq!(body["data"]["vendor"], "mock");

    let (status, body) = server.get(&format!("/api/v1/validations/{}/history", id)).await;
    assert_eq!(status, 200);
    assert!(!body["data"].as_array().unwrap().is_empty());

    let (status, body) = server.get("/api/v1/validations/999").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], 4002);
}

#[tokio::test]
async fn test_submit_and_read_disbursement() {
    let server = TestServer::start().await;
    let validation_id = server.validated_recipient().await;

    let request = json!({
        "name_bank_validation_id": validation_id,
        "amount": "500000",
        "external_id": "123",
        "type": "loan"
    });
    let (status, body) = server.post("/api/v1/disbursements", request.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["status"], "PENDING");
    assert_eq!(body["data"]["method"], "mock");
    assert_eq!(body["data"]["amount"], "500000");
    assert_eq!(body["data"]["bank_info"]["validation_status"], "SUCCESS");
    let id = body["data"]["id"].as_i64().unwrap();

    // Idempotent re-submit
    let (status, again) = server.post("/api/v1/disbursements", request).await;
    assert_eq!(status, 200);
    assert_eq!(again["data"]["id"], id);
    assert_eq!(server.mock.disburse_calls(), 1);

    let (status, body) = server.get(&format!("/api/v1/disbursements/{}", id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "PENDING");

    let (status, body) = server.get(&format!("/api/v1/disbursements/{}/history", id)).await;
    assert_eq!(status, 200);
    assert!(body["data"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_submit_rejects_bad_requests() {
    let server = TestServer::start().await;
    let validation_id = server.validated_recipient().await;

    let (status, body) = server
        .post(
            "/api/v1/disbursements",
            json!({"name_bank_validation_id": validation_id, "amount": "500000", "external_id": ""}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], 1001);

    let (status, body) = server
        .post(
            "/api/v1/disbursements",
            json!({"name_bank_validation_id": validation_id, "amount": "0", "external_id": "124"}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], 1001);

    let (status, body) = server
        .post(
            "/api/v1/disbursements",
            json!({"name_bank_validation_id": 999, "amount": "500000", "external_id": "125"}),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], 4002);
    assert_eq!(server.mock.disburse_calls(), 0);
}

#[tokio::test]
async fn test_override_and_cancel_rules() {
    let server = TestServer::start().await;
    let validation_id = server.validated_recipient().await;
    let (_, body) = server
        .post(
            "/api/v1/disbursements",
            json!({"name_bank_validation_id": validation_id, "amount": "500000", "external_id": "130"}),
        )
        .await;
    let id = body["data"]["id"].as_i64().unwrap();

    // Acknowledged by the vendor
    let (status, body) = server
        .post(
            &format!("/api/v1/disbursements/{}/cancel", id),
            json!({"reason": "customer request"}),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], 4091);

    let (status, _) = server
        .post(
            &format!("/api/v1/disbursements/{}/override", id),
            json!({"status": "PENDING", "operator": "ops", "reason": "typo"}),
        )
        .await;
    assert_eq!(status, 400);

    let (status, body) = server
        .post(
            &format!("/api/v1/disbursements/{}/override", id),
            json!({"status": "COMPLETED", "operator": "ops", "reason": "confirmed on statement"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "COMPLETED");

    // Closed: no further override
    let (status, body) = server
        .post(
            &format!("/api/v1/disbursements/{}/override", id),
            json!({"status": "FAILED", "operator": "ops", "reason": "again"}),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], 4091);

    let (status, body) = server.get("/api/v1/disbursements/4242").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], 4001);
}

#[tokio::test]
async fn test_callbacks_are_always_acknowledged() {
    let server = TestServer::start().await;
    let validation_id = server.validated_recipient().await;
    let (_, body) = server
        .post(
            "/api/v1/disbursements",
            json!({"name_bank_validation_id": validation_id, "amount": "500000", "external_id": "140"}),
        )
        .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let callback = json!({"reference_id": "MOCK-140-0", "status": "SUCCESS"});
    let (status, body) = server
        .post("/api/v1/callbacks/mock/disbursement", callback.clone())
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["matched"], true);
    assert_eq!(body["data"]["outcome"], "APPLIED");

    let (_, view) = server.get(&format!("/api/v1/disbursements/{}", id)).await;
    assert_eq!(view["data"]["status"], "COMPLETED");

    // Replay
    let (status, body) = server
        .post("/api/v1/callbacks/mock/disbursement", callback)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["outcome"], "IGNORED");

    // Unknown reference
    let (status, body) = server
        .post(
            "/api/v1/callbacks/mock/disbursement",
            json!({"reference_id": "nope", "status": "SUCCESS"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["matched"], false);
    assert_eq!(body["data"]["outcome"], "DROPPED");

    // Unknown vendor
    let (status, body) = server
        .post("/api/v1/callbacks/paypal/disbursement", json!({"status": "SUCCESS"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["outcome"], "DROPPED");

    // Not JSON
    let (status, body) = server
        .post_raw("/api/v1/callbacks/mock/validation", "{not json")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["outcome"], "DROPPED");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let server = TestServer::start().await;
    let (status, doc) = server.get("/api-docs/openapi.json").await;
    assert_eq!(status, 200);
    assert_eq!(doc["info"]["title"], "Disbursement Settlement Engine API");
    assert!(doc["paths"]["/api/v1/disbursements"].is_object());
    assert!(doc["paths"]["/api/v1/callbacks/{vendor}/disbursement"].is_object());
}
