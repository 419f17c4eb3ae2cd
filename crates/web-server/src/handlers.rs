use crate::{AppState, error::AppError};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use database::Note;
use serde::Deserialize;
use std::sync::Arc;

/// The request body accepted by both create and update.
///
/// A missing or null `content` is treated as the empty string, matching the
/// behavior clients of the original API rely on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl NotePayload {
    /// Trims both fields and rejects a blank title.
    fn normalized(self) -> Result<(String, String), AppError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("Title is required.".to_string()));
        }
        let content = self.content.as_deref().unwrap_or("").trim().to_string();
        Ok((title, content))
    }
}

/// # GET /notes
/// Fetches all notes, newest first.
pub async fn list_notes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Note>>, AppError> {
    let notes = state.notes.list_notes().await?;
    Ok(Json(notes))
}

/// # GET /notes/:id
pub async fn get_note(
    Path(id): Path<i32>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Note>, AppError> {
    let note = state.notes.get_note(id).await?;
    Ok(Json(note))
}

/// # POST /notes
/// Creates a note; rejects a blank title with 400.
pub async fn create_note(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotePayload>,
) -> Result<impl IntoResponse, AppError> {
    let (title, content) = payload.normalized()?;
    let note = state.notes.create_note(&title, &content).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// # PUT /notes/:id
/// Replaces a note's title and content and stamps its update time.
pub async fn update_note(
    Path(id): Path<i32>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotePayload>,
) -> Result<Json<Note>, AppError> {
    let (title, content) = payload.normalized()?;
    let note = state.notes.update_note(id, &title, &content).await?;
    Ok(Json(note))
}

/// # DELETE /notes/:id
pub async fn delete_note(
    Path(id): Path<i32>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    state.notes.delete_note(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(title: &str, content: Option<&str>) -> NotePayload {
        NotePayload {
            title: title.to_string(),
            content: content.map(str::to_string),
        }
    }

    #[test]
    fn normalization_trims_both_fields() {
        let (title, content) = payload("  shopping list  ", Some("  milk, eggs  "))
            .normalized()
            .unwrap();
        assert_eq!(title, "shopping list");
        assert_eq!(content, "milk, eggs");
    }

    #[test]
    fn missing_content_becomes_empty_string() {
        let (_, content) = payload("title", None).normalized().unwrap();
        assert_eq!(content, "");
    }

    #[test]
    fn blank_title_is_rejected() {
        assert!(matches!(
            payload("   ", Some("body")).normalized(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            payload("", None).normalized(),
            Err(AppError::Validation(_))
        ));
    }
}
