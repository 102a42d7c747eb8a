use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use keystone_staging::gallery::{
    self, GalleryApi, GalleryEntry, GalleryEntryPatch, NewGalleryEntry, ParentKind, ParentRef,
};
use serde::{Deserialize, Serialize};

use crate::error::{map_json_rejection, ApiAxumError, ApiError};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{kind}/{parent_id}/entries", get(list_entries).post(create_entry))
        .route(
            "/{kind}/{parent_id}/entries/{id}",
            patch(update_entry).delete(remove_entry),
        )
        .route("/{kind}/{parent_id}/entries/{id}/feature", post(feature_entry))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntry {
    #[serde(alias = "url")]
    image_url: String,
    caption: Option<String>,
    /// Appended after the last entry when absent
    display_order: Option<i32>,
    /// Defaults to true for the first entry of a featureless gallery
    is_feature: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovedView {
    removed: GalleryEntry,
    promoted: Option<GalleryEntry>,
}

fn parent_from(kind: &str, parent_id: String) -> Result<ParentRef, ApiAxumError> {
    let kind: ParentKind = kind.parse()?;
    if parent_id.trim().is_empty() {
        return Err(ApiError::bad_request("parent id must not be empty").into());
    }
    Ok(ParentRef::new(kind, parent_id))
}

/// The entry, as long as it belongs to `parent`
async fn entry_of(state: &AppState, parent: &ParentRef, id: &str) -> Result<GalleryEntry, ApiAxumError> {
    state
        .gallery
        .list(parent)
        .await?
        .into_iter()
        .find(|e| e.id == id)
        .ok_or_else(|| ApiError::not_found(format!("No gallery entry {id} under {parent}")).into())
}

async fn list_entries(
    State(state): State<AppState>,
    Path((kind, parent_id)): Path<(String, String)>,
) -> Result<Json<Vec<GalleryEntry>>, ApiAxumError> {
    let parent = parent_from(&kind, parent_id)?;
    Ok(Json(state.gallery.list(&parent).await?))
}

async fn create_entry(
    State(state): State<AppState>,
    Path((kind, parent_id)): Path<(String, String)>,
    body: Result<Json<CreateEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<GalleryEntry>), ApiAxumError> {
    let parent = parent_from(&kind, parent_id)?;
    let Json(request) = body.map_err(map_json_rejection)?;

    let existing = state.gallery.list(&parent).await?;
    let display_order = match request.display_order {
        Some(order) => order,
        None => existing.iter().map(|e| e.display_order + 1).max().unwrap_or(0),
    };
    let wants_feature = request
        .is_feature
        .unwrap_or_else(|| !existing.iter().any(|e| e.is_feature));

    let mut entry = NewGalleryEntry::new(request.image_url).with_display_order(display_order);
    entry.caption = request.caption;

    let created = state.gallery.create(&parent, entry).await?;
    let created = if wants_feature {
        gallery::set_feature(state.gallery.as_ref(), &parent, &created.id).await?
    } else {
        created
    };
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_entry(
    State(state): State<AppState>,
    Path((kind, parent_id, id)): Path<(String, String, String)>,
    body: Result<Json<GalleryEntryPatch>, JsonRejection>,
) -> Result<Json<GalleryEntry>, ApiAxumError> {
    let parent = parent_from(&kind, parent_id)?;
    let Json(mut patch) = body.map_err(map_json_rejection)?;
    entry_of(&state, &parent, &id).await?;

    // raising the flag must clear it everywhere else
    let feature = patch.is_feature.take();
    let updated = state.gallery.update(&id, patch).await?;
    let updated = match feature {
        Some(true) => gallery::set_feature(state.gallery.as_ref(), &parent, &id).await?,
        Some(false) => state.gallery.update(&id, GalleryEntryPatch::feature(false)).await?,
        None => updated,
    };
    Ok(Json(updated))
}

async fn remove_entry(
    State(state): State<AppState>,
    Path((kind, parent_id, id)): Path<(String, String, String)>,
) -> Result<Json<RemovedView>, ApiAxumError> {
    let parent = parent_from(&kind, parent_id)?;
    let removed = gallery::remove_entry(state.gallery.as_ref(), &parent, &id).await?;
    Ok(Json(RemovedView {
        removed: removed.removed,
        promoted: removed.promoted,
    }))
}

async fn feature_entry(
    State(state): State<AppState>,
    Path((kind, parent_id, id)): Path<(String, String, String)>,
) -> Result<Json<GalleryEntry>, ApiAxumError> {
    let parent = parent_from(&kind, parent_id)?;
    Ok(Json(gallery::set_feature(state.gallery.as_ref(), &parent, &id).await?))
}
