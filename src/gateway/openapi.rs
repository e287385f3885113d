//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{
    BankInfoData, CallbackAckData, CancelRequest, CreateValidationRequest, DisbursementData,
    OverrideStatusRequest, SubmitDisbursementRequest, ValidationData,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Disbursement Settlement Engine API",
        version = "1.0.0",
        description = "Recipient validation, multi-vendor payouts and vendor callback reconciliation."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::validation::create_validation,
        crate::gateway::handlers::validation::get_validation,
        crate::gateway::handlers::validation::get_validation_history,
        crate::gateway::handlers::disbursement::submit_disbursement,
        crate::gateway::handlers::disbursement::get_disbursement,
        crate::gateway::handlers::disbursement::get_disbursement_history,
        crate::gateway::handlers::disbursement::override_disbursement,
        crate::gateway::handlers::disbursement::cancel_disbursement,
        crate::gateway::handlers::callback::disbursement_callback,
        crate::gateway::handlers::callback::validation_callback,
    ),
    components(
        schemas(
            HealthResponse,
            CreateValidationRequest,
            ValidationData,
            SubmitDisbursementRequest,
            DisbursementData,
            BankInfoData,
            OverrideStatusRequest,
            CancelRequest,
            CallbackAckData,
        )
    ),
    tags(
        (name = "Validation", description = "Recipient bank account validation"),
        (name = "Disbursement", description = "Payout submission, status and operator actions"),
        (name = "Callback", description = "Vendor webhooks"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Disbursement Settlement Engine API");
        assert_eq!(spec.info.version, "1.0.0");
    }

    #[test]
    fn test_openapi_json_serializable() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("SubmitDisbursementRequest"));
    }

    #[test]
    fn test_endpoints_registered() {
        let paths = ApiDoc::openapi().paths;
        for path in [
            "/api/v1/health",
            "/api/v1/validations",
            "/api/v1/validations/{id}",
            "/api/v1/disbursements",
            "/api/v1/disbursements/{id}",
            "/api/v1/disbursements/{id}/history",
            "/api/v1/disbursements/{id}/override",
            "/api/v1/disbursements/{id}/cancel",
            "/api/v1/callbacks/{vendor}/disbursement",
            "/api/v1/callbacks/{vendor}/validation",
        ] {
            assert!(paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
