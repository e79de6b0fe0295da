use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::CoeditState;
use crate::protocol::{decode_message, encode_message, ClientMessage, ServerMessage};
use crate::sync::{EditSession, SyncEngine};
use crate::{CoeditError, CoeditResult};

/// Runs one editing session over one WebSocket connection
///
/// The first client message must be `Open`. The session closes, writing any
/// pending edit, when the client sends `Close` or the connection drops.
pub struct WebSocketHandler {
    socket: WebSocket,
    state: CoeditState,
}

impl WebSocketHandler {
    pub fn new(socket: WebSocket, state: CoeditState) -> Self {
        Self { socket, state }
    }

    pub async fn handle(self) {
        let (mut ws_sender, mut ws_receiver) = self.socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let client_id = Uuid::new_v4().to_string();
        info!("New WebSocket connection established for client {}", client_id);

        let sender_task = {
            let client_id = client_id.clone();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    match encode_message(&message) {
                        Ok(encoded) => {
                            if let Err(e) = ws_sender.send(Message::Binary(encoded.into())).await {
                                error!(
                                    "Failed to send WebSocket message to client {}: {}",
                                    client_id, e
                                );
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to encode message for client {}: {}", client_id, e);
                        }
                    }
                }
                debug!("Sender task ended for client {}", client_id);
            })
        };

        let receiver_task = {
            let mut connection = Connection::new(self.state.clone(), client_id.clone(), tx);
            tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            if let Err(e) = connection.handle_message(&data).await {
                                warn!(
                                    "Error handling message from client {}: {}",
                                    connection.client_id, e
                                );
                                connection.send(ServerMessage::Error {
                                    message: e.to_string(),
                                });
                            }
                        }
                        Ok(Message::Text(text)) => {
                            warn!(
                                "Received unexpected text message from client {}: {}",
                                connection.client_id, text
                            );
                        }
                        Ok(Message::Close(_)) => {
                            info!("Client {} closed connection normally", connection.client_id);
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                        Err(e) => {
                            warn!("WebSocket error for client {}: {}", connection.client_id, e);
                            break;
                        }
                    }
                }
                connection.close_session().await;
                debug!("Receiver task ended for client {}", connection.client_id);
            })
        };

        let completion_reason = tokio::select! {
            _ = sender_task => "sender task completed",
            _ = receiver_task => "receiver task completed",
        };

        info!(
            "WebSocket connection ending for client {} ({})",
            client_id, completion_reason
        );
    }
}

/// Per-connection session state
struct Connection {
    state: CoeditState,
    client_id: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
    engine: Option<SyncEngine>,
    notice_task: Option<JoinHandle<()>>,
}

impl Connection {
    fn new(state: CoeditState, client_id: String, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            state,
            client_id,
            tx,
            engine: None,
            notice_task: None,
        }
    }

    fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            debug!("Client {} is gone, dropping message", self.client_id);
        }
    }

    fn engine(&self) -> CoeditResult<&SyncEngine> {
        self.engine.as_ref().ok_or_else(|| CoeditError::Protocol {
            message: "no document is open on this connection".to_string(),
        })
    }

    async fn handle_message(&mut self, data: &[u8]) -> CoeditResult<()> {
        let message: ClientMessage = decode_message(data)?;

        match message {
            ClientMessage::Open { document_id, user } => {
                if self.engine.is_some() {
                    return Err(CoeditError::Protocol {
                        message: "a document is already open on this connection".to_string(),
                    });
                }
                debug!(
                    "Client {} opening document '{}' as {}",
                    self.client_id, document_id, user.user_id
                );
                self.open(document_id, user).await?;
            }

            ClientMessage::Edit { content } => {
                self.engine()?.apply_local_edit(content)?;
            }

            ClientMessage::Checkpoint { message } => {
                let version = self.engine()?.checkpoint(&message)?;
                self.send(ServerMessage::VersionCreated {
                    version_id: version.id,
                    reason: version.reason,
                });
            }

            ClientMessage::Restore { version_id } => {
                let outcome = self.engine()?.restore(&version_id).await?;
                self.send(ServerMessage::Restored {
                    version_id,
                    backup_version_id: outcome.backup.id,
                    restore_version_id: outcome.restored.id,
                    content: outcome.restored.content,
                });
            }

            ClientMessage::ListVersions => {
                let document_id = self.engine()?.document_id().to_string();
                let versions = self.state.versions().list(&document_id)?;
                self.send(ServerMessage::Versions {
                    document_id,
                    versions: versions.iter().map(|v| v.summary()).collect(),
                });
            }

            ClientMessage::Flush => {
                self.engine()?.flush().await?;
                self.send(ServerMessage::Ack);
            }

            ClientMessage::Close => {
                self.engine()?;
                self.close_session().await;
                self.send(ServerMessage::Ack);
            }
        }

        Ok(())
    }

    async fn open(&mut self, document_id: String, user: crate::document::UserProfile) -> CoeditResult<()> {
        let store = self.state.store().clone();
        let role = store
            .get_role(&document_id, &user.user_id)?
            .ok_or_else(|| CoeditError::denied(&document_id, &user.user_id, "open"))?;

        let engine = SyncEngine::open(
            EditSession::new(document_id.clone(), user),
            store.clone(),
            self.state.config().clone(),
        )?;

        let title = store
            .get_document(&document_id)
            .map(|doc| doc.title())
            .unwrap_or_default();
        self.send(ServerMessage::Opened {
            document_id: document_id.clone(),
            title,
            content: engine.content(),
            revision: engine.session().seen_revision(),
            role,
        });

        let tx = self.tx.clone();
        engine.on_remote_change(move |change| {
            let _ = tx.send(ServerMessage::RemoteChange {
                document_id: change.document_id,
                content: change.content,
                revision: change.revision,
                edited_by: change.edited_by,
                restored_from: change.restored_from,
                local_replaced: change.local_replaced,
            });
        })?;

        let tx = self.tx.clone();
        let presence_doc = document_id.clone();
        engine.on_presence_change(move |users| {
            let _ = tx.send(ServerMessage::Presence {
                document_id: presence_doc.clone(),
                users,
            });
        })?;

        let tx = self.tx.clone();
        let mut notices = engine.notices();
        self.notice_task = Some(tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => {
                        if tx.send(ServerMessage::Notice { notice }).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Notice forwarder skipped {} notices", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        self.engine = Some(engine);
        Ok(())
    }

    async fn close_session(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        engine.close().await;

        // Let the final write's notices reach the client before stopping
        tokio::task::yield_now().await;
        if let Some(task) = self.notice_task.take() {
            task.abort();
        }
        info!(
            "Client {} closed its session on document {}",
            self.client_id,
            engine.document_id()
        );
    }
}
