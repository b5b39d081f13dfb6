//! Axum route handlers for resumes and cover letters.
//!
//! Generation endpoints only enqueue: they answer 202 with the artifact's new
//! status and the result arrives on the artifact's event stream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::ats::{score_color, ScoreColor};
use crate::generation::{GenerationContext, ResumeInput};
use crate::jobs::{Accepted, UseCase};
use crate::models::artifact::{CoverLetter, LetterLength, ProviderKind, Resume, Tone};
use crate::state::AppState;
use crate::storage::{NewCoverLetter, NewResume};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateResumeRequest {
    pub user_id: Uuid,
    pub original_content: String,
    pub job_description: Option<String>,
    pub target_role: String,
    pub industry: Option<String>,
    pub experience_level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResumeView {
    #[serde(flatten)]
    pub resume: Resume,
    pub score_color: Option<ScoreColor>,
}

impl From<Resume> for ResumeView {
    fn from(resume: Resume) -> Self {
        Self {
            score_color: resume.ats_score.map(score_color),
            resume,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCoverLetterRequest {
    pub user_id: Uuid,
    pub company_name: String,
    pub hiring_manager_name: Option<String>,
    /// Defaults to the resume's target role.
    pub target_role: Option<String>,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub length: LetterLength,
    pub job_description: Option<String>,
    pub preferred_provider: Option<ProviderKind>,
}

#[derive(Debug, Deserialize)]
pub struct VariationsRequest {
    pub user_id: Uuid,
    #[serde(default = "default_variation_count")]
    pub count: u32,
}

fn default_variation_count() -> u32 {
    3
}

#[derive(Debug, Serialize)]
pub struct CoverLetterView {
    #[serde(flatten)]
    pub letter: CoverLetter,
    pub word_count: usize,
    pub estimated_read_time: String,
}

impl From<CoverLetter> for CoverLetterView {
    fn from(letter: CoverLetter) -> Self {
        Self {
            word_count: letter.word_count(),
            estimated_read_time: letter.estimated_read_time(),
            letter,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeywordsResponse {
    pub resume_id: Uuid,
    pub keywords: Vec<String>,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn require_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

async fn owned_resume(state: &AppState, id: Uuid, user_id: Uuid) -> Result<Resume, AppError> {
    state
        .artifacts
        .resume(id)
        .await?
        .filter(|r| r.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Resume {id}")))
}

async fn owned_letter(state: &AppState, id: Uuid, user_id: Uuid) -> Result<CoverLetter, AppError> {
    state
        .artifacts
        .cover_letter(id)
        .await?
        .filter(|l| l.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Cover letter {id}")))
}

async fn enqueue(
    state: &AppState,
    user_id: Uuid,
    artifact_id: Uuid,
    use_case: UseCase,
    preferred_provider: Option<ProviderKind>,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    let accepted = state
        .dispatcher
        .request_generation(user_id, artifact_id, use_case, preferred_provider)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

// ────────────────────────────────────────────────────────────────────────────
// Resume handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/resumes
///
/// Stores a draft. Length rules are checked when a generation is requested.
pub async fn handle_create_resume(
    State(state): State<AppState>,
    Json(request): Json<CreateResumeRequest>,
) -> Result<(StatusCode, Json<ResumeView>), AppError> {
    let new = NewResume {
        user_id: request.user_id,
        original_content: require_text("original_content", &request.original_content)?,
        job_description: blank_to_none(request.job_description),
        target_role: require_text("target_role", &request.target_role)?,
        industry: blank_to_none(request.industry),
        experience_level: blank_to_none(request.experience_level),
    };
    let resume = state.artifacts.create_resume(new).await?;
    Ok((StatusCode::CREATED, Json(resume.into())))
}

/// GET /api/v1/resumes/:id?user_id=
pub async fn handle_get_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<ResumeView>, AppError> {
    let resume = owned_resume(&state, id, params.user_id).await?;
    Ok(Json(resume.into()))
}

/// DELETE /api/v1/resumes/:id?user_id=
///
/// Cover letters written from the resume are deleted with it. A job still
/// queued for any of them is discarded when it runs.
pub async fn handle_delete_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<StatusCode, AppError> {
    owned_resume(&state, id, params.user_id).await?;
    state.artifacts.delete_resume(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/resumes/:id/optimize
pub async fn handle_optimize(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    enqueue(&state, request.user_id, id, UseCase::Optimize, None).await
}

/// POST /api/v1/resumes/:id/ats-score
pub async fn handle_ats_score(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    enqueue(&state, request.user_id, id, UseCase::AtsScore, None).await
}

/// POST /api/v1/resumes/:id/keywords
///
/// Synchronous and unmetered: one provider call, no job, no status change.
pub async fn handle_extract_keywords(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<KeywordsResponse>, AppError> {
    let account = state
        .ledger
        .account(request.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", request.user_id)))?;
    let resume = owned_resume(&state, id, request.user_id).await?;
    let input = ResumeInput::for_optimization(&resume);
    input.validate()?;

    let ctx = GenerationContext {
        user_id: request.user_id,
        country_code: account.country_code,
        preferred_provider: None,
    };
    let keywords = state
        .generation
        .extract_keywords(&ctx, input.job_description())
        .await?;

    Ok(Json(KeywordsResponse {
        resume_id: id,
        keywords,
    }))
}

/// POST /api/v1/resumes/:id/cover-letters
///
/// Creates the draft letter and queues its generation in one call. If the
/// generation is refused the draft is removed again.
pub async fn handle_create_cover_letter(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
    Json(request): Json<CreateCoverLetterRequest>,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    let resume = owned_resume(&state, resume_id, request.user_id).await?;
    let target_role = match request.target_role {
        Some(role) => require_text("target_role", &role)?,
        None => resume.target_role.clone(),
    };

    let new = NewCoverLetter {
        user_id: request.user_id,
        resume_id,
        company_name: require_text("company_name", &request.company_name)?,
        hiring_manager_name: blank_to_none(request.hiring_manager_name),
        target_role,
        tone: request.tone,
        length: request.length,
        job_description: blank_to_none(request.job_description),
    };
    let letter = state.artifacts.create_cover_letter(new).await?;

    match enqueue(
        &state,
        request.user_id,
        letter.id,
        UseCase::GenerateCoverLetter,
        request.preferred_provider,
    )
    .await
    {
        Ok(accepted) => Ok(accepted),
        Err(e) => {
            if let Err(cleanup) = state.artifacts.delete_cover_letter(letter.id).await {
                warn!("Failed to remove refused draft {}: {cleanup}", letter.id);
            }
            Err(e)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cover letter handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/cover-letters/:id?user_id=
pub async fn handle_get_cover_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<CoverLetterView>, AppError> {
    let letter = owned_letter(&state, id, params.user_id).await?;
    Ok(Json(letter.into()))
}

/// DELETE /api/v1/cover-letters/:id?user_id=
pub async fn handle_delete_cover_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<StatusCode, AppError> {
    owned_letter(&state, id, params.user_id).await?;
    state.artifacts.delete_cover_letter(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/cover-letters/:id/variations
///
/// `count` is clamped to 1..=5.
pub async fn handle_generate_variations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<VariationsRequest>,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    enqueue(
        &state,
        request.user_id,
        id,
        UseCase::variations(request.count),
        None,
    )
    .await
}
