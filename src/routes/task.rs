use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use futures::stream::{self, Stream};
use garde::Validate;
use std::time::Duration;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::auth::Identity;
use crate::models::task::{
    CreateTaskRequest, JobStatusRecord, StatusUpdate, TaskStatus, UpdateTaskRequest,
};
use crate::routes::ApiError;
use crate::services::queue::TaskMessage;
use crate::services::status_store::{JobStatusStore, StoreError};

/// Delay between status polls on the event stream.
const SSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

const THUMBNAIL_PATH: &str = "/cdn-cgi/image/width=200,quality=75/api/uploads/";

const TASK_NOT_FOUND_EVENT: &str = r#"{"error": "Task not found"}"#;

/// POST /api/task — queue a new task and record it as WAITING.
pub async fn create_task(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<JobStatusRecord>, ApiError> {
    body.validate()?;

    let task_id = body
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    // Reserve the id before publishing so a concurrent duplicate is refused.
    let record = state
        .store
        .create_status(&task_id, StatusUpdate::with_status(TaskStatus::Waiting))
        .await?
        .ok_or(ApiError::Conflict("Task already exist"))?;

    let message = TaskMessage {
        task_id: task_id.clone(),
        prompt: body.prompt,
        lora_name: body.lora_name,
        cover_size: body.cover_size,
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };
    if let Err(e) = state.queue.publish(&message).await {
        if let Err(store_err) = state.store.remove_status(&task_id).await {
            tracing::warn!(task_id = %task_id, error = %store_err, "Failed to release task id");
        }
        return Err(e.into());
    }

    metrics::counter!("tasks_created_total").increment(1);
    tracing::info!(
        task_id = %task_id,
        user_id = %identity.user_id,
        brand_id = %identity.brand_id,
        lora_name = %message.lora_name,
        "Task created"
    );

    Ok(Json(record))
}

/// GET /api/task/{id} — current status, `{}` when unknown.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusRecord>, ApiError> {
    Ok(Json(state.store.get_status(&id).await?))
}

/// PATCH /api/task/{id} — progress webhook from the processing backend.
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<JobStatusRecord>, ApiError> {
    body.validate()?;

    let thumb_url = body
        .image_url
        .as_deref()
        .and_then(|image_url| thumbnail_url(&state.public_base_url, image_url));

    let record = state
        .store
        .set_status(
            &id,
            StatusUpdate {
                status: Some(body.status),
                progress: body.progress,
                image_url: body.image_url,
                thumb_url,
            },
        )
        .await?;

    metrics::counter!("tasks_updated_total", "status" => body.status.to_string()).increment(1);
    tracing::info!(
        task_id = %id,
        status = %body.status,
        progress = ?body.progress,
        "Task status updated"
    );

    Ok(Json(record))
}

/// GET /api/task/{id}/sse — push status snapshots until the task settles.
pub async fn task_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    Sse::new(status_stream(state.store, id, SSE_POLL_INTERVAL)).keep_alive(KeepAlive::default())
}

/// Poll `store` every `interval` and emit each snapshot.
///
/// Ends after a terminal status, after a single not-found event, or when the
/// store shuts down.
pub fn status_stream(
    store: JobStatusStore,
    id: String,
    interval: Duration,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(Some(store), move |store| {
        let id = id.clone();
        async move {
            let store = store?;
            tokio::time::sleep(interval).await;
            match store.get_status(&id).await {
                Ok(record) if !record.exists() => {
                    tracing::debug!(task_id = %id, "Task not found, closing stream");
                    Some((Ok(Event::default().data(TASK_NOT_FOUND_EVENT)), None))
                }
                Ok(record) => {
                    let settled = record.status.is_some_and(TaskStatus::is_terminal);
                    let event = Event::default().json_data(&record);
                    let next = if settled { None } else { Some(store) };
                    Some((event, next))
                }
                Err(StoreError::Unavailable) => {
                    tracing::warn!(task_id = %id, "Status store unavailable, closing stream");
                    None
                }
            }
        }
    })
}

/// Resize-on-the-fly URL for the uploaded image named by `image_url`'s last path segment.
pub fn thumbnail_url(base_url: &str, image_url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(image_url).ok()?;
    let file_name = parsed
        .path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())?;
    Some(format!(
        "{}{}{}",
        base_url.trim_end_matches('/'),
        THUMBNAIL_PATH,
        file_name
    ))
}
