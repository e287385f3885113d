//! Vendor webhook handlers
//!
//! Always answer 200 with the `{code, msg, data}` envelope: a non-2xx only
//! makes the vendor redeliver, and every outcome is already logged.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};

use super::super::state::AppState;
use super::super::types::{ApiResponse, CallbackAckData};
use crate::vendor::VendorId;

type Ack = (StatusCode, Json<ApiResponse<CallbackAckData>>);

fn ack(data: CallbackAckData) -> Ack {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

/// Parse vendor and JSON body; `None` means the callback is dropped
fn parse(vendor: &str, body: &[u8], kind: &str) -> Option<(VendorId, serde_json::Value)> {
    let vendor_id = match vendor.parse::<VendorId>() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(vendor = %vendor, kind, error = %e, "Callback for unknown vendor dropped");
            return None;
        }
    };
    match serde_json::from_slice(body) {
        Ok(payload) => Some((vendor_id, payload)),
        Err(e) => {
            tracing::warn!(
                vendor = %vendor_id,
                kind,
                error = %e,
                body = %String::from_utf8_lossy(body),
                "Callback body is not JSON, dropped"
            );
            None
        }
    }
}

/// Disbursement status webhook
///
/// POST /api/v1/callbacks/{vendor}/disbursement
#[utoipa::path(
    post,
    path = "/api/v1/callbacks/{vendor}/disbursement",
    params(("vendor" = String, Path, description = "Vendor id, e.g. wire, wallet, aggregator, float")),
    request_body(content = String, description = "Vendor-specific JSON payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Acknowledged (matched or not)", body = CallbackAckData)
    ),
    tag = "Callback"
)]
pub async fn disbursement_callback(
    State(state): State<Arc<AppState>>,
    Path(vendor): Path<String>,
    body: Bytes,
) -> Ack {
    let Some((vendor, payload)) = parse(&vendor, &body, "disbursement") else {
        return ack(CallbackAckData::dropped());
    };
    let result = state.reconciler.handle_disbursement(vendor, &payload).await;
    ack(result.into())
}

/// Recipient validation webhook
///
/// POST /api/v1/callbacks/{vendor}/validation
#[utoipa::path(
    post,
    path = "/api/v1/callbacks/{vendor}/validation",
    params(("vendor" = String, Path, description = "Vendor id")),
    request_body(content = String, description = "Vendor-specific JSON payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Acknowledged (matched or not)", body = CallbackAckData)
    ),
    tag = "Callback"
)]
pub async fn validation_callback(
    State(state): State<Arc<AppState>>,
    Path(vendor): Path<String>,
    body: Bytes,
) -> Ack {
    let Some((vendor, payload)) = parse(&vendor, &body, "validation") else {
        return ack(CallbackAckData::dropped());
    };
    let result = state.reconciler.handle_validation(vendor, &payload).await;
    ack(result.into())
}
