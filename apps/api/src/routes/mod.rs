pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::credits::handlers as credits;
use crate::extraction::handlers as extraction;
use crate::generation::handlers as generation;
use crate::notifications::handlers as notifications;
use crate::state::AppState;

/// Multipart framing on top of the file itself.
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.extractor.max_bytes() + UPLOAD_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health::health_handler))
        // Accounts & billing
        .route("/api/v1/users", post(credits::handle_create_user))
        .route(
            "/api/v1/users/:id/credits",
            get(credits::handle_get_credits),
        )
        .route(
            "/api/v1/billing/settlements",
            post(credits::handle_settlement),
        )
        // Documents
        .route(
            "/api/v1/documents/extract",
            post(extraction::handle_extract).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Resumes
        .route("/api/v1/resumes", post(generation::handle_create_resume))
        .route(
            "/api/v1/resumes/:id",
            get(generation::handle_get_resume).delete(generation::handle_delete_resume),
        )
        .route(
            "/api/v1/resumes/:id/optimize",
            post(generation::handle_optimize),
        )
        .route(
            "/api/v1/resumes/:id/ats-score",
            post(generation::handle_ats_score),
        )
        .route(
            "/api/v1/resumes/:id/keywords",
            post(generation::handle_extract_keywords),
        )
        .route(
            "/api/v1/resumes/:id/cover-letters",
            post(generation::handle_create_cover_letter),
        )
        // Cover letters
        .route(
            "/api/v1/cover-letters/:id",
            get(generation::handle_get_cover_letter).delete(generation::handle_delete_cover_letter),
        )
        .route(
            "/api/v1/cover-letters/:id/variations",
            post(generation::handle_generate_variations),
        )
        // Live status
        .route(
            "/api/v1/artifacts/:id/events",
            get(notifications::handle_artifact_events),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::build_router;
    use crate::models::artifact::ProviderKind;
    use crate::testing::{fixtures, Harness, ScriptedProvider};

    fn harness() -> Harness {
        Harness::new(vec![ScriptedProvider::always_ok(
            ProviderKind::OpenAi,
            "Rust, Tokio, Postgres",
        )])
    }

    async fn send(harness: &Harness, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = build_router(harness.app_state())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_resume(harness: &Harness, user_id: Uuid) -> Uuid {
        let (status, body) = send(
            harness,
            Method::POST,
            "/api/v1/resumes",
            json!({
                "user_id": user_id,
                "original_content": fixtures::RESUME_TEXT,
                "job_description": fixtures::JOB_DESCRIPTION,
                "target_role": "Senior Backend Engineer"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = send(&h, Method::GET, "/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_account_starts_with_three_credits() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let (status, body) = send(
            &h,
            Method::POST,
            "/api/v1/users",
            json!({ "user_id": user_id, "country_code": "gb" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["credits_remaining"], 3);
        assert_eq!(body["can_generate"], true);

        let (status, body) = send(
            &h,
            Method::POST,
            "/api/v1/billing/settlements",
            json!({ "event": "credits_purchased", "user_id": user_id, "credits": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credits_remaining"], 13);
    }

    #[tokio::test]
    async fn test_purchase_that_overflows_balance_is_rejected() {
        let h = harness();
        let user_id = h.user(3).await;
        let (status, body) = send(
            &h,
            Method::POST,
            "/api/v1/billing/settlements",
            json!({ "event": "credits_purchased", "user_id": user_id, "credits": i32::MAX }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(h.balance(user_id).await, 3);
    }

    #[tokio::test]
    async fn test_optimize_returns_accepted_then_conflict() {
        let h = harness();
        let user_id = h.user(3).await;
        let resume_id = create_resume(&h, user_id).await;
        let uri = format!("/api/v1/resumes/{resume_id}/optimize");

        let (status, body) = send(&h, Method::POST, &uri, json!({ "user_id": user_id })).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing");
        assert_eq!(body["use_case"], "optimize");

        let (status, body) = send(&h, Method::POST, &uri, json!({ "user_id": user_id })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_IN_FLIGHT");
    }

    #[tokio::test]
    async fn test_out_of_credits_is_payment_required() {
        let h = harness();
        let user_id = h.user(0).await;
        let resume_id = create_resume(&h, user_id).await;

        let (status, body) = send(
            &h,
            Method::POST,
            &format!("/api/v1/resumes/{resume_id}/optimize"),
            json!({ "user_id": user_id }),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "INSUFFICIENT_CREDITS");
    }

    #[tokio::test]
    async fn test_refused_cover_letter_leaves_no_draft() {
        let h = harness();
        let user_id = h.user(0).await;
        let resume_id = create_resume(&h, user_id).await;

        let (status, _) = send(
            &h,
            Method::POST,
            &format!("/api/v1/resumes/{resume_id}/cover-letters"),
            json!({ "user_id": user_id, "company_name": "Acme", "tone": "casual" }),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(h.store.cover_letter_count(), 0);
    }

    #[tokio::test]
    async fn test_keywords_are_synchronous() {
        let h = harness();
        let user_id = h.user(0).await;
        let resume_id = create_resume(&h, user_id).await;

        let (status, body) = send(
            &h,
            Method::POST,
            &format!("/api/v1/resumes/{resume_id}/keywords"),
            json!({ "user_id": user_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["keywords"], json!(["Rust", "Tokio", "Postgres"]));
    }

    #[tokio::test]
    async fn test_other_users_resume_is_not_found() {
        let h = harness();
        let owner = h.user(3).await;
        let resume_id = create_resume(&h, owner).await;

        let (status, _) = send(
            &h,
            Method::GET,
            &format!("/api/v1/resumes/{resume_id}?user_id={}", Uuid::new_v4()),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_resume() {
        let h = harness();
        let user_id = h.user(3).await;
        let resume_id = create_resume(&h, user_id).await;
        let uri = format!("/api/v1/resumes/{resume_id}?user_id={user_id}");

        let (status, _) = send(&h, Method::DELETE, &uri, Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&h, Method::GET, &uri, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
