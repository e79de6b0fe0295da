use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use coedit::{
    CoeditConfig, CoeditResult, CoeditState, DocumentRecord, PersistenceManager, UserProfile,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub owner: UserProfile,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub code: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub actor_id: String,
}

async fn create_document(
    State(state): State<CoeditState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Json<Value> {
    let doc = state.store().create_document(&request.owner, request.title);
    info!("Created document {} for {}", doc.id(), request.owner.user_id);
    Json(json!({
        "id": doc.id(),
        "title": doc.title(),
        "join_code": doc.join_code(),
    }))
}

async fn join_document(
    State(state): State<CoeditState>,
    Json(request): Json<JoinRequest>,
) -> CoeditResult<Json<Value>> {
    let document_id = state.store().join_by_code(&request.code, &request.user)?;
    Ok(Json(json!({ "id": document_id })))
}

async fn documents_for(
    State(state): State<CoeditState>,
    Path(user_id): Path<String>,
) -> Json<Vec<DocumentRecord>> {
    Json(state.store().documents_for(&user_id))
}

async fn delete_document(
    State(state): State<CoeditState>,
    Path(id): Path<String>,
    Json(request): Json<DeleteRequest>,
) -> CoeditResult<StatusCode> {
    state.store().delete_document(&id, &request.actor_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting editor server...");

    let config = match std::env::args().nth(1) {
        Some(path) => CoeditConfig::load(path).await?,
        None => CoeditConfig::default(),
    };

    let store = Arc::new(coedit::DocumentStore::with_config(&config));

    let mut persistence = PersistenceManager::with_config(store.clone(), "./data", &config);
    persistence.load_all_documents().await?;
    persistence.start().await?;

    let state = CoeditState::new(store, config);
    let api = Router::new()
        .route("/documents", post(create_document))
        .route("/documents/{id}", axum::routing::delete(delete_document))
        .route("/join", post(join_document))
        .route("/users/{id}/documents", get(documents_for))
        .with_state(state.clone());
    let app = coedit::router_with_coedit(state).merge(api);

    let listener = TcpListener::bind("127.0.0.1:3001").await?;
    info!("Server running on http://127.0.0.1:3001");
    info!("Editing socket available at ws://127.0.0.1:3001/coedit");
    info!("API endpoints:");
    info!("  POST   /documents                                    - Create a document");
    info!("  DELETE /documents/{{id}}                               - Delete a document");
    info!("  POST   /join                                         - Join by code");
    info!("  GET    /users/{{id}}/documents                         - Documents of a user");
    info!("  GET    /documents/{{id}}/versions                      - Version history");
    info!("  GET    /documents/{{id}}/versions/{{v}}/export/{{format}} - Export a version");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    persistence.stop().await;
    Ok(())
}
