use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use super::AppState;
use crate::admission::AdmissionError;
use crate::coordination::keys;
use crate::domain::TimeWindow;
use crate::metrics;
use crate::summary::SummaryError;

#[derive(Debug, Deserialize)]
pub(super) struct SummaryQuery {
    from: Option<String>,
    to: Option<String>,
}

impl SummaryQuery {
    fn window(&self) -> TimeWindow {
        TimeWindow::parse(self.from.as_deref(), self.to.as_deref())
    }
}

fn error_body(message: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({ "error": message.to_string() })
}

pub(super) async fn create_payment(state: web::Data<AppState>, body: web::Bytes) -> impl Responder {
    match state.admission.submit(&body).await {
        Ok(_) => HttpResponse::Accepted().finish(),
        Err(e @ (AdmissionError::Malformed(_) | AdmissionError::InvalidAmount(_))) => {
            tracing::debug!(error = %e, "Rejected payment request");
            HttpResponse::BadRequest().json(error_body(e))
        }
        Err(e @ AdmissionError::Saturated { .. }) => {
            HttpResponse::ServiceUnavailable().json(error_body(e))
        }
        Err(e @ AdmissionError::Store(_)) => {
            tracing::warn!(error = %e, "Admission failed");
            HttpResponse::InternalServerError().json(error_body(e))
        }
    }
}

pub(super) async fn payments_summary(
    state: web::Data<AppState>,
    query: web::Query<SummaryQuery>,
) -> impl Responder {
    match state.summary.merged(&query.window()).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e @ SummaryError::Peer(_)) => HttpResponse::BadGateway().json(error_body(e)),
        Err(e) => {
            tracing::warn!(error = %e, "Summary failed");
            HttpResponse::InternalServerError().json(error_body(e))
        }
    }
}

pub(super) async fn purge_payments(state: web::Data<AppState>) -> impl Responder {
    if let Err(e) = state.purge_local().await {
        tracing::warn!(error = %e, "Purge failed");
        return HttpResponse::InternalServerError().json(error_body(e));
    }
    state.summary.purge_peer().await;
    HttpResponse::Ok().json(serde_json::json!({ "message": "All payments purged." }))
}

pub(super) async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "payment-gateway"
    }))
}

pub(super) async fn internal_summary(
    state: web::Data<AppState>,
    query: web::Query<SummaryQuery>,
) -> impl Responder {
    match state.summary.local(&query.window()).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => {
            tracing::warn!(error = %e, "Local summary failed");
            HttpResponse::InternalServerError().json(error_body(e))
        }
    }
}

pub(super) async fn internal_purge(state: web::Data<AppState>) -> impl Responder {
    match state.purge_local().await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => {
            tracing::warn!(error = %e, "Purge failed");
            HttpResponse::InternalServerError().json(error_body(e))
        }
    }
}

pub(super) async fn metrics(state: web::Data<AppState>) -> impl Responder {
    match state.store.depth(keys::PAYMENTS_QUEUE).await {
        Ok(depth) => state.metrics.update_queue_depth(depth),
        Err(e) => tracing::warn!(error = %e, "Could not read queue depth"),
    }

    match metrics::encode(state.metrics.registry()) {
        Ok(body) => HttpResponse::Ok().content_type(metrics::CONTENT_TYPE).body(body),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}
