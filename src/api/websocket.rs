use actix_web::{get, web, Error, HttpMessage, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt as _;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::middleware::Identity;
use crate::api::models_ws::{WsClientMessage, WsServerMessage};
use crate::consultation::ConsultationService;
use crate::triage::ConsultationError;

#[get("/ws/consultations/{consultation_id}")]
pub async fn ws_consultation(
    req: HttpRequest,
    body: web::Payload,
    consultations: web::Data<ConsultationService>,
    consultation_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let id = consultation_id.into_inner();
    let identity = match req.extensions().get::<Identity>().cloned() {
        Some(identity) => identity,
        None => return Ok(HttpResponse::Unauthorized().finish()),
    };

    // Verify the consultation is active for this patient before upgrading
    if consultations.snapshot(id, &identity.user_id).await.is_err() {
        return Ok(HttpResponse::NotFound().body("Consultation not found"));
    }

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    info!("WebSocket connection established for consultation {:?}", id);

    let service = consultations.clone();

    actix_web::rt::spawn(async move {
        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                Message::Ping(bytes) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => {
                    let delivered = match serde_json::from_str::<WsClientMessage>(&text) {
                        Ok(msg) => {
                            let acked = match ack_frame(&msg) {
                                Some(ack) => send(&mut session, &ack).await,
                                None => true,
                            };
                            acked && send(&mut session, &handle_frame(msg, id, &identity, &service).await).await
                        }
                        Err(_) => send(&mut session, &WsServerMessage::new("error", "Malformed frame")).await,
                    };
                    if !delivered {
                        // Client likely disconnected
                        break;
                    }
                }
                Message::Close(reason) => {
                    let _ = session.close(reason).await;
                    break;
                }
                _ => {}
            }
        }
        info!("WebSocket connection closed for consultation {:?}", id);
        close_consultation(&service, id, &identity).await;
    });

    Ok(response)
}

/// Immediate acknowledgement sent before a frame is processed.
pub fn ack_frame(msg: &WsClientMessage) -> Option<WsServerMessage> {
    (msg.r#type == "message" && !msg.content.trim().is_empty()).then(|| WsServerMessage::new("status", "thinking"))
}

/// Map one client frame to the frame sent back once it has been handled.
pub async fn handle_frame(
    msg: WsClientMessage,
    consultation_id: Uuid,
    identity: &Identity,
    service: &ConsultationService,
) -> WsServerMessage {
    match msg.r#type.as_str() {
        "message" => match service.submit_turn(consultation_id, &identity.user_id, &msg.content).await {
            Ok(reply) => WsServerMessage::new("reply", reply.reply.content.clone()).with_data(to_value(&reply)),
            Err(e) => notice(&e),
        },
        "refer" => match service.send_referral(consultation_id, &identity.user_id).await {
            Ok(receipt) => {
                WsServerMessage::new("referral", receipt.announcement.content.clone()).with_data(to_value(&receipt))
            }
            Err(e) => notice(&e),
        },
        "sync" => match service.sync(consultation_id, &identity.user_id).await {
            Ok(true) => WsServerMessage::new("status", "synced"),
            Ok(false) => WsServerMessage::new("status", "sync_pending"),
            Err(e) => notice(&e),
        },
        other => WsServerMessage::new("error", format!("Unknown frame type '{}'", other)),
    }
}

/// Release the session once its socket is gone. A session with unsaved
/// writes stays registered so a reconnect or `sync` can still flush it.
pub async fn close_consultation(service: &ConsultationService, consultation_id: Uuid, identity: &Identity) {
    match service.end(consultation_id, &identity.user_id).await {
        Ok(()) | Err(ConsultationError::NoActiveSession) => {}
        Err(e) => warn!(consultation_id = %consultation_id, "Consultation kept active after disconnect: {}", e),
    }
}

/// Caller-misuse conditions are reported as non-blocking notices.
fn notice(e: &ConsultationError) -> WsServerMessage {
    WsServerMessage::new("notice", e.to_string()).with_data(serde_json::json!({ "kind": e.kind() }))
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

async fn send(session: &mut actix_ws::Session, msg: &WsServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => session.text(text).await.is_ok(),
        Err(e) => {
            error!("Failed to encode WebSocket frame: {}", e);
            true
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(ws_consultation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsultationConfig, UserRole};
    use crate::db::{self, service::DbService, DbPool};
    use crate::store::{ConsultationStore, DuckDbStore, StoreError};
    use crate::triage::{ConsultationSession, Message as ChatMessage, Referral};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// DuckDB store with a switch that makes every write fail.
    struct SwitchableStore {
        inner: DuckDbStore,
        down: AtomicBool,
    }

    impl SwitchableStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ConsultationStore for SwitchableStore {
        async fn append_message(&self, consultation_id: Uuid, seq: usize, message: &ChatMessage) -> Result<(), StoreError> {
            self.check()?;
            self.inner.append_message(consultation_id, seq, message).await
        }

        async fn upsert_consultation(&self, session: &ConsultationSession) -> Result<(), StoreError> {
            self.check()?;
            self.inner.upsert_consultation(session).await
        }

        async fn insert_referral(&self, referral: &Referral) -> Result<(), StoreError> {
            self.check()?;
            self.inner.insert_referral(referral).await
        }

        async fn load_consultation(&self, id: Uuid) -> Result<Option<ConsultationSession>, StoreError> {
            self.inner.load_consultation(id).await
        }
    }

    fn frame(kind: &str, content: &str) -> WsClientMessage {
        WsClientMessage {
            r#type: kind.to_string(),
            content: content.to_string(),
        }
    }

    fn patient() -> Identity {
        Identity {
            user_id: "patient-1".to_string(),
            role: UserRole::Patient,
        }
    }

    async fn setup() -> (DbPool, Arc<SwitchableStore>, ConsultationService, Uuid) {
        let pool = db::open_in_memory().unwrap();
        let expert = {
            let conn = pool.lock().unwrap();
            DbService::insert_expert(&conn, "Dr. AI Dermatologist", "Dermatology", "", &[]).unwrap()
        };
        let store = Arc::new(SwitchableStore {
            inner: DuckDbStore::new(pool.clone()),
            down: AtomicBool::new(false),
        });
        let config = ConsultationConfig {
            reply_delay_ms: 0,
            sync_retry_attempts: 1,
            sync_retry_backoff_ms: 0,
            ..Default::default()
        };
        let service = ConsultationService::new(store.clone(), config);
        let id = service.start(&expert, "patient-1").await.id;
        (pool, store, service, id)
    }

    #[test]
    fn only_non_blank_messages_are_acknowledged() {
        let ack = ack_frame(&frame("message", "I have a rash")).unwrap();
        assert_eq!(ack.r#type, "status");
        assert_eq!(ack.content, "thinking");

        assert!(ack_frame(&frame("message", "   ")).is_none());
        assert!(ack_frame(&frame("refer", "")).is_none());
        assert!(ack_frame(&frame("sync", "")).is_none());
    }

    #[tokio::test]
    async fn message_frame_gets_reply() {
        let (_pool, _store, service, id) = setup().await;

        let out = handle_frame(frame("message", "There is a rash on my arm"), id, &patient(), &service).await;
        assert_eq!(out.r#type, "reply");
        assert!(out.content.starts_with("Skin conditions"));
        let data = out.data.unwrap();
        assert_eq!(data["new_symptom"], "skin rash");
        assert_eq!(data["referral_available"], true);
        assert_eq!(data["sync_pending"], false);
    }

    #[tokio::test]
    async fn blank_message_becomes_notice() {
        let (_pool, _store, service, id) = setup().await;

        let out = handle_frame(frame("message", "  "), id, &patient(), &service).await;
        assert_eq!(out.r#type, "notice");
        assert_eq!(out.data.unwrap()["kind"], "empty_input");
    }

    #[tokio::test]
    async fn second_referral_becomes_notice() {
        let (_pool, _store, service, id) = setup().await;

        let early = handle_frame(frame("refer", ""), id, &patient(), &service).await;
        assert_eq!(early.data.unwrap()["kind"], "referral_not_offered");

        handle_frame(frame("message", "chest pain"), id, &patient(), &service).await;
        let sent = handle_frame(frame("refer", ""), id, &patient(), &service).await;
        assert_eq!(sent.r#type, "referral");
        assert!(sent.content.starts_with("I've referred your case to a doctor."));
        assert_eq!(sent.data.unwrap()["referral"]["severity"], "high");

        let again = handle_frame(frame("refer", ""), id, &patient(), &service).await;
        assert_eq!(again.r#type, "notice");
        assert_eq!(again.data.unwrap()["kind"], "already_referred");
    }

    #[tokio::test]
    async fn unknown_frame_type_is_an_error() {
        let (_pool, _store, service, id) = setup().await;

        let out = handle_frame(frame("dance", ""), id, &patient(), &service).await;
        assert_eq!(out.r#type, "error");
        assert!(out.content.contains("dance"));
    }

    #[tokio::test]
    async fn sync_reports_backlog_state() {
        let (pool, store, service, id) = setup().await;

        store.down.store(true, Ordering::SeqCst);
        let reply = handle_frame(frame("message", "a fever"), id, &patient(), &service).await;
        assert_eq!(reply.data.unwrap()["sync_pending"], true);

        let pending = handle_frame(frame("sync", ""), id, &patient(), &service).await;
        assert_eq!((pending.r#type.as_str(), pending.content.as_str()), ("status", "sync_pending"));

        store.down.store(false, Ordering::SeqCst);
        let synced = handle_frame(frame("sync", ""), id, &patient(), &service).await;
        assert_eq!((synced.r#type.as_str(), synced.content.as_str()), ("status", "synced"));

        let conn = pool.lock().unwrap();
        assert_eq!(DbService::get_messages(&conn, id, 10, 0).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn frames_for_another_patient_are_refused() {
        let (_pool, _store, service, id) = setup().await;
        let stranger = Identity {
            user_id: "patient-2".to_string(),
            role: UserRole::Patient,
        };

        let out = handle_frame(frame("message", "chest pain"), id, &stranger, &service).await;
        assert_eq!(out.data.unwrap()["kind"], "no_active_session");
    }

    #[tokio::test]
    async fn disconnect_releases_synced_session_only() {
        let (_pool, store, service, id) = setup().await;

        store.down.store(true, Ordering::SeqCst);
        handle_frame(frame("message", "a cough"), id, &patient(), &service).await;
        close_consultation(&service, id, &patient()).await;
        assert!(service.is_active(id).await);

        store.down.store(false, Ordering::SeqCst);
        close_consultation(&service, id, &patient()).await;
        assert!(!service.is_active(id).await);

        // Closing twice is harmless
        close_consultation(&service, id, &patient()).await;
    }
}
