use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub mod handler;

pub use handler::WebSocketHandler;

use crate::config::CoeditConfig;
use crate::document::DocumentStore;
use crate::version::{export, ExportFormat, VersionStore, VersionSummary};
use crate::CoeditError;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Axum state shared by the editing socket and the version routes
#[derive(Clone)]
pub struct CoeditState {
    store: Arc<DocumentStore>,
    config: CoeditConfig,
}

impl CoeditState {
    pub fn new(store: Arc<DocumentStore>, config: CoeditConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &CoeditConfig {
        &self.config
    }

    pub fn versions(&self) -> VersionStore {
        VersionStore::new(self.store.clone())
    }
}

impl IntoResponse for CoeditError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoeditError::DocumentNotFound { .. } | CoeditError::VersionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            CoeditError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            CoeditError::Validation { .. } | CoeditError::Protocol { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Create a router with the editing socket at `/coedit` and the version routes
pub fn router_with_coedit(state: CoeditState) -> Router {
    Router::new()
        .route("/coedit", get(websocket_handler))
        .route("/documents/{id}/versions", get(list_versions))
        .route(
            "/documents/{id}/versions/{version_id}/export/{format}",
            get(export_version),
        )
        .with_state(state)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<CoeditState>) -> Response {
    ws.on_upgrade(move |socket| WebSocketHandler::new(socket, state).handle())
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    before: Option<u64>,
    limit: Option<usize>,
}

async fn list_versions(
    State(state): State<CoeditState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<VersionSummary>>, CoeditError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let versions = state.versions().page(&id, query.before, limit)?;
    Ok(Json(versions.iter().map(|v| v.summary()).collect()))
}

async fn export_version(
    State(state): State<CoeditState>,
    Path((id, version_id, format)): Path<(String, String, String)>,
) -> Result<Response, CoeditError> {
    let format: ExportFormat = format.parse()?;
    let version = state.versions().get(&id, &version_id)?;
    let file = export(&version, format);

    tracing::debug!("Exporting version {} of {} as {}", version_id, id, format);
    Ok((
        [
            (header::CONTENT_TYPE, file.mime_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.filename),
            ),
        ],
        file.bytes,
    )
        .into_response())
}
