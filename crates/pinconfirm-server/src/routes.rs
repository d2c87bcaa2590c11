use actix_web::{get, post, put, web, HttpRequest, HttpResponse};
use pinconfirm::{
    ConfirmError, NewTransfer, ResolveOutcome, SetPinRequest, TransactionReference,
    VerifyRequest, VerifyResponse, EXPIRED_OR_UNKNOWN_REASON, INTERNAL_ERROR_REASON,
};

use crate::metrics;
use crate::state::AppState;
use crate::webhook;

/// Header carrying the HMAC of an upstream request body.
pub const UPSTREAM_AUTH_HEADER: &str = "X-Upstream-Auth";

/// Validate the HMAC header on an upstream request.
/// Returns an error response if the signature is missing or invalid.
fn validate_hmac(
    req: &HttpRequest,
    body_bytes: &[u8],
    state: &AppState,
) -> Result<(), HttpResponse> {
    let header_value = req
        .headers()
        .get(UPSTREAM_AUTH_HEADER)
        .and_then(|v| v.to_str().ok());

    match header_value {
        Some(sig) => {
            if pinconfirm::credential::verify_body(&state.upstream_secret, body_bytes, sig) {
                Ok(())
            } else {
                tracing::warn!("upstream HMAC verification failed, signature mismatch");
                metrics::AUTH_FAILURES.with_label_values(&["invalid"]).inc();
                Err(HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "authentication failed"
                })))
            }
        }
        None => {
            tracing::warn!("upstream HMAC header missing");
            metrics::AUTH_FAILURES.with_label_values(&["missing"]).inc();
            Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "authentication required"
            })))
        }
    }
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.verifier.health_check() {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "pinconfirm-server",
        })),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "degraded",
                "service": "pinconfirm-server",
                "error": "store unreachable",
            }))
        }
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(token) = &state.metrics_token else {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "forbidden",
            "message": "Set METRICS_TOKEN to access /metrics"
        }));
    };

    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| pinconfirm::credential::constant_time_eq(t.as_bytes(), token))
        .unwrap_or(false);

    if !authorized {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "unauthorized",
            "message": "Valid Bearer token required for /metrics"
        }));
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

/// The verification endpoint used by the confirmation page.
///
/// Protocol outcomes (found, not found, committed, denied) are all `200`
/// with `success` deciding; only malformed bodies and internal failures use
/// other statuses. Every response body is a [`VerifyResponse`].
#[post("/api/verify-pin")]
pub async fn verify_pin(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let request: VerifyRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => {
            return HttpResponse::BadRequest().json(VerifyResponse::failure("invalid request body"));
        }
    };

    // Malformed references get the same answer as unknown ones.
    let Ok(reference) = TransactionReference::parse(request.transaction_id()) else {
        let counter = match request {
            VerifyRequest::GetTransaction { .. } => &metrics::RESOLVE_REQUESTS,
            VerifyRequest::VerifyPin { .. } => &metrics::PIN_ATTEMPTS,
        };
        counter.with_label_values(&["unknown"]).inc();
        return HttpResponse::Ok().json(VerifyResponse::failure(EXPIRED_OR_UNKNOWN_REASON));
    };

    match request {
        VerifyRequest::GetTransaction { .. } => resolve(&state, &reference),
        VerifyRequest::VerifyPin { pin, .. } => verify(&state, &reference, &pin).await,
    }
}

fn resolve(state: &AppState, reference: &TransactionReference) -> HttpResponse {
    match state.verifier.resolve_transaction(reference) {
        Ok(ResolveOutcome::Found(details)) => {
            metrics::RESOLVE_REQUESTS.with_label_values(&["found"]).inc();
            HttpResponse::Ok().json(VerifyResponse::resolved(details))
        }
        Ok(ResolveOutcome::NotFound(reason)) => {
            metrics::RESOLVE_REQUESTS
                .with_label_values(&["not_found"])
                .inc();
            HttpResponse::Ok().json(VerifyResponse::failure(reason))
        }
        Err(e) => {
            metrics::RESOLVE_REQUESTS.with_label_values(&["error"]).inc();
            tracing::error!(reference = %reference, error = %e, "transaction lookup failed");
            HttpResponse::InternalServerError().json(VerifyResponse::failure(INTERNAL_ERROR_REASON))
        }
    }
}

async fn verify(state: &AppState, reference: &TransactionReference, pin: &str) -> HttpResponse {
    let start = std::time::Instant::now();

    let verdict = match state.verifier.verify_and_commit(reference, pin).await {
        Ok(v) => v,
        Err(e) => {
            metrics::PIN_ATTEMPTS.with_label_values(&["error"]).inc();
            metrics::VERIFY_LATENCY
                .with_label_values(&["error"])
                .observe(start.elapsed().as_secs_f64());
            tracing::error!(reference = %reference, error = %e, "pin verification internal error");
            return HttpResponse::InternalServerError()
                .json(VerifyResponse::failure(INTERNAL_ERROR_REASON));
        }
    };

    let result = verdict.label();
    metrics::PIN_ATTEMPTS.with_label_values(&[result]).inc();
    metrics::VERIFY_LATENCY
        .with_label_values(&[result])
        .observe(start.elapsed().as_secs_f64());

    if !state.webhook_urls.is_empty() {
        if let Some(hook) =
            webhook::TransferWebhook::for_verdict(&verdict, pinconfirm::store::unix_now())
        {
            webhook::fire_webhooks(
                &state.http_client,
                &state.webhook_urls,
                hook,
                state.webhook_hmac_key.as_deref(),
            );
        }
    }

    HttpResponse::Ok().json(verdict.to_response())
}

/// Register a pending transfer (upstream, HMAC-authenticated).
#[post("/api/transactions")]
pub async fn register_transaction(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = validate_hmac(&req, &body, &state) {
        return resp;
    }

    let new: NewTransfer = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(_) => {
            metrics::REGISTRATIONS.with_label_values(&["invalid"]).inc();
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid request body"
            }));
        }
    };

    match state.verifier.register(new) {
        Ok(registered) => {
            metrics::REGISTRATIONS.with_label_values(&["created"]).inc();
            HttpResponse::Created().json(registered)
        }
        Err(ConfirmError::InvalidTransfer(msg)) => {
            metrics::REGISTRATIONS.with_label_values(&["invalid"]).inc();
            HttpResponse::BadRequest().json(serde_json::json!({ "error": msg }))
        }
        Err(e) => {
            metrics::REGISTRATIONS.with_label_values(&["error"]).inc();
            tracing::error!(error = %e, "transfer registration failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "registration failed"
            }))
        }
    }
}

/// Set or replace an account's transaction PIN (upstream, HMAC-authenticated).
#[put("/api/accounts/{account_id}/pin")]
pub async fn set_account_pin(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = validate_hmac(&req, &body, &state) {
        return resp;
    }

    let parsed: SetPinRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid request body"
            }));
        }
    };

    let account_id = path.into_inner();
    match state.verifier.set_pin(&account_id, &parsed.pin) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(ConfirmError::InvalidPin(reason) | ConfirmError::InvalidTransfer(reason)) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": reason }))
        }
        Err(e) => {
            tracing::error!(account_id = %account_id, error = %e, "failed to set PIN");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "failed to set PIN"
            }))
        }
    }
}
