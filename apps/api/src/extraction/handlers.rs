use axum::{
    extract::{Multipart, State},
    Json,
};
use bytes::Bytes;
use tracing::info;

use crate::errors::AppError;
use crate::extraction::ExtractedDocument;
use crate::state::AppState;

/// POST /api/v1/documents/extract
///
/// Multipart upload with the document in the `file` field.
pub async fn handle_extract(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractedDocument>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let bytes: Bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;

        let extractor = state.extractor;
        let document =
            tokio::task::spawn_blocking(move || extractor.extract(&content_type, &bytes))
                .await
                .map_err(|e| AppError::Internal(e.into()))??;

        info!(
            "Extracted {} words from {file_name} ({:?})",
            document.word_count, document.format
        );
        return Ok(Json(document));
    }

    Err(AppError::Validation(
        "multipart field 'file' is required".to_string(),
    ))
}
