//! Server-sent events for artifact status changes.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::handlers::UserIdQuery;
use crate::models::artifact::ArtifactRef;
use crate::state::AppState;

const KEEP_ALIVE_SECS: u64 = 15;

fn to_event(event_name: &str, payload: &impl serde::Serialize) -> Event {
    Event::default()
        .event(event_name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            warn!("Failed to encode {event_name} event: {e}");
            Event::default().event(event_name)
        })
}

/// Finds the artifact with this id among the user's resumes and letters.
async fn owned_artifact(
    state: &AppState,
    artifact_id: Uuid,
    user_id: Uuid,
) -> Result<ArtifactRef, AppError> {
    if let Some(resume) = state.artifacts.resume(artifact_id).await? {
        if resume.user_id == user_id {
            return Ok(ArtifactRef::resume(artifact_id));
        }
    } else if let Some(letter) = state.artifacts.cover_letter(artifact_id).await? {
        if letter.user_id == user_id {
            return Ok(ArtifactRef::cover_letter(artifact_id));
        }
    }
    Err(AppError::NotFound(format!("Artifact {artifact_id}")))
}

/// GET /api/v1/artifacts/:id/events?user_id=
///
/// Sends the current snapshot first, then one event per terminal transition.
/// Lagging subscribers skip missed events; clients re-fetch on any event.
pub async fn handle_artifact_events(
    State(state): State<AppState>,
    Path(artifact_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let artifact = owned_artifact(&state, artifact_id, query.user_id).await?;

    // Subscribe before reading the snapshot so no transition falls in between
    let rx = state.hub.subscribe(artifact_id);
    debug!(
        "SSE subscriber attached to {artifact_id} ({} live)",
        state.hub.subscriber_count(artifact_id)
    );

    // Deleted in between: the receiver drops here and its channel is pruned later
    let snapshot = state
        .artifacts
        .snapshot(artifact)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Artifact {artifact_id}")))?;

    let initial =
        stream::once(async move { Ok::<Event, Infallible>(to_event("snapshot", &snapshot)) });

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    let event = to_event(notification.event_name(), &notification);
                    return Some((Ok::<Event, Infallible>(event), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE subscriber lagged, skipped {skipped} notifications");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(initial.chain(live))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS))))
}
