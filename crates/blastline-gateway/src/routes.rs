//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blastline_channels::meta::MetaAdapter;
use blastline_channels::receipt::{self, Receipt};
use blastline_channels::whatsapp::WhatsAppAdapter;
use blastline_core::error::BlastlineError;
use blastline_core::types::{
    Campaign, MessageSpec, Platform, RecipientPolicy, ScheduleType,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::server::AppState;

/// Error envelope: every failure becomes `{"ok": false, "code", "error"}`.
pub struct ApiError(BlastlineError);

impl From<BlastlineError> for ApiError {
    fn from(e: BlastlineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BlastlineError::NotFound(_) => StatusCode::NOT_FOUND,
            BlastlineError::Validation(_) | BlastlineError::RecipientResolution(_) => {
                StatusCode::BAD_REQUEST
            }
            BlastlineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "ok": false,
            "code": self.0.code(),
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "blastline-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub owner_id: String,
    pub name: String,
    pub platform: Platform,
    pub message: MessageSpec,
    pub policy: RecipientPolicy,
    #[serde(default)]
    pub schedule: Option<ScheduleType>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Create a campaign. `now` campaigns land in `draft` and are picked up by
/// the next sweep; `scheduled` campaigns wait for their time.
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let schedule = req.schedule.unwrap_or(ScheduleType::Now);
    let campaign = Campaign::new(
        &req.owner_id,
        &req.name,
        req.platform,
        req.message,
        req.policy,
        schedule,
        req.scheduled_at,
    )?;
    state.db.insert_campaign(&campaign)?;
    tracing::info!(
        "📨 Campaign {} created ({} on {})",
        campaign.id,
        campaign.name,
        campaign.platform
    );
    Ok((StatusCode::CREATED, Json(campaign)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner_id: String,
}

/// List an owner's campaigns, newest first.
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(state.db.list_campaigns(&q.owner_id)?))
}

/// Status and counters for one campaign. Safe to poll.
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.db.get_campaign(&id)?))
}

/// Best-effort cancel. Returns the new status; conflicts (terminal or draft
/// campaigns) come back as 409 with `invalid_state_transition`.
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    blastline_engine::cancel_campaign(&state.db, &id, Utc::now())?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "id": id,
        "status": "cancelled",
    })))
}

/// Platform webhook intake. Parses provider-specific status payloads into
/// receipts and queues them for the delivery tracker. Unroutable platform
/// names get a 400; anything addressed to a known platform answers 200
/// with an accepted count, even when the payload yields no receipts.
pub async fn platform_webhook(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let platform: Platform = platform.parse()?;

    let receipts = parse_webhook(platform, &payload);
    let mut accepted = 0;
    for r in &receipts {
        if state.receipts.send(r.clone()).await.is_ok() {
            accepted += 1;
        } else {
            tracing::error!("⚠️ Receipt inbox closed, dropping receipt for {}", r.provider_message_id);
        }
    }
    tracing::debug!("📬 Webhook {}: {} receipt(s) accepted", platform, accepted);
    Ok(Json(serde_json::json!({ "ok": true, "accepted": accepted })))
}

/// Route a raw webhook payload through the right parser. The normalized
/// shape (`provider_message_id` + `event`) is accepted on every platform —
/// Telegram has no provider-side status callbacks at all, so its receipts
/// only ever arrive normalized.
fn parse_webhook(platform: Platform, payload: &serde_json::Value) -> Vec<Receipt> {
    if let Some(r) = receipt::parse_normalized(payload) {
        return vec![r];
    }
    match platform {
        Platform::WhatsApp => WhatsAppAdapter::parse_status_webhook(payload),
        Platform::Instagram | Platform::Facebook => MetaAdapter::parse_delivery_webhook(payload),
        Platform::Telegram => Vec::new(),
    }
}

/// Manual sweep trigger for external cron setups.
pub async fn trigger_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let promoted = state.sweep.run_once(Utc::now()).await?;
    Ok(Json(serde_json::json!({ "ok": true, "promoted": promoted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use blastline_core::config::{DispatcherConfig, GatewayConfig};
    use blastline_engine::{DeliveryTracker, Dispatcher, SchedulerSweep, receipt_inbox};
    use blastline_store::CampaignDb;
    use std::collections::HashMap;
    use tower::ServiceExt;

    async fn test_app(name: &str) -> (axum::Router, Arc<CampaignDb>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("blastline-gateway-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = Arc::new(CampaignDb::open(&dir.join("test.db")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            HashMap::new(),
            DispatcherConfig::default(),
        ));
        let sweep = Arc::new(SchedulerSweep::new(db.clone(), dispatcher));
        let receipts = receipt_inbox(Arc::new(DeliveryTracker::new(db.clone())));
        let state = AppState {
            gateway_config: GatewayConfig::default(),
            db: db.clone(),
            sweep,
            receipts,
        };
        (crate::server::build_router(state), db, dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_fetch_campaign() {
        let (app, _db, dir) = test_app("create").await;
        let req = post_json(
            "/api/v1/campaigns",
            serde_json::json!({
                "owner_id": "o1",
                "name": "promo",
                "platform": "whatsapp",
                "message": { "kind": "text", "body": "hello" },
                "policy": { "kind": "all" },
            }),
        );
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "draft");
        let id = created["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/campaigns/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "promo");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_create_rejects_scheduled_without_time() {
        let (app, _db, dir) = test_app("badcreate").await;
        let req = post_json(
            "/api/v1/campaigns",
            serde_json::json!({
                "owner_id": "o1",
                "name": "promo",
                "platform": "telegram",
                "message": { "kind": "text", "body": "hello" },
                "policy": { "kind": "all" },
                "schedule": "scheduled",
            }),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "validation_error");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cancel_draft_conflicts() {
        let (app, db, dir) = test_app("canceldraft").await;
        let c = Campaign::new(
            "o1",
            "promo",
            Platform::WhatsApp,
            MessageSpec::Text { body: "hi".into() },
            RecipientPolicy::All,
            ScheduleType::Now,
            None,
        )
        .unwrap();
        db.insert_campaign(&c).unwrap();
        let response = app
            .oneshot(post_json(
                &format!("/api/v1/campaigns/{}/cancel", c.id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await["code"],
            "invalid_state_transition"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_unknown_campaign_404() {
        let (app, _db, dir) = test_app("missing").await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/campaigns/cmp-nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_webhook_accepts_normalized_receipt() {
        let (app, _db, dir) = test_app("webhook").await;
        let response = app
            .oneshot(post_json(
                "/api/v1/webhooks/telegram",
                serde_json::json!({
                    "provider_message_id": "tg-1-99",
                    "event": "delivered",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["accepted"], 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_webhook_rejects_unknown_platform() {
        let (app, _db, dir) = test_app("badplatform").await;
        let response = app
            .oneshot(post_json(
                "/api/v1/webhooks/smoke-signal",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_sweep_endpoint_reports_promotions() {
        let (app, db, dir) = test_app("sweep").await;
        db.upsert_contact(&blastline_store::Contact::new(
            "o1",
            Platform::WhatsApp,
            "111",
            "X",
        ))
        .unwrap();
        let c = Campaign::new(
            "o1",
            "promo",
            Platform::WhatsApp,
            MessageSpec::Text { body: "hi".into() },
            RecipientPolicy::All,
            ScheduleType::Now,
            None,
        )
        .unwrap();
        db.insert_campaign(&c).unwrap();

        let response = app
            .oneshot(post_json("/api/v1/sweep", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["promoted"], 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
