//! Mutating admission webhook endpoint.
//!
//! The API server posts an `AdmissionReview` for every pod it is about to create. We answer with
//! the review's response, carrying a JSON patch when the pod's step has already been executed.

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::{mutation::Mutator, patch::to_json_patch};

/// Shared state for webhook handlers
pub struct WebhookState {
    pub mutator: Mutator,
}

impl WebhookState {
    pub fn new(mutator: Mutator) -> Self {
        Self { mutator }
    }
}

/// Query string the API server appends to webhook calls, e.g. `/mutate?timeout=10s`.
#[derive(Debug, Default, Deserialize)]
pub struct MutateParams {
    timeout: Option<String>,
}

impl MutateParams {
    fn deadline(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }
}

/// Accepts the whole-number `ms` and `s` forms the API server produces.
fn parse_duration(s: &str) -> Option<Duration> {
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    s.strip_suffix('s')?.parse().ok().map(Duration::from_secs)
}

pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhook over TLS until the process is stopped.
pub async fn serve(
    addr: SocketAddr,
    cert: &Path,
    key: &Path,
    state: Arc<WebhookState>,
) -> anyhow::Result<()> {
    let tls = RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| {
            format!(
                "failed to load tls material from {} and {}",
                cert.display(),
                key.display()
            )
        })?;

    info!(addr = %addr, "starting execution cache webhook");
    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .context("webhook server failed")?;
    Ok(())
}

pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<MutateParams>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = admit(&state.mutator, &req, params.deadline()).await;
    Json(response.into_review())
}

/// Anything that goes wrong here admits the pod unchanged.
async fn admit(
    mutator: &Mutator,
    req: &AdmissionRequest<DynamicObject>,
    deadline: Option<Duration>,
) -> AdmissionResponse {
    let uid = req.uid.as_str();
    let unchanged = || AdmissionResponse::from(req);

    let Some(object) = &req.object else {
        debug!(uid, "no object in request, allowing unchanged");
        return unchanged();
    };
    let raw = match serde_json::to_vec(object) {
        Ok(raw) => raw,
        Err(e) => {
            error!(uid, error = %e, "failed to re-serialize admitted object");
            return unchanged();
        }
    };

    let patches = match mutator
        .mutate_pod_if_cached(&req.resource, &raw, deadline)
        .await
    {
        Ok(patches) if patches.is_empty() => return unchanged(),
        Ok(patches) => patches,
        Err(e) => {
            error!(uid, error = %e, "could not mutate pod, allowing unchanged");
            return unchanged();
        }
    };

    debug!(uid, patch_ops = patches.len(), "patching pod");
    match unchanged().with_patch(to_json_patch(patches)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid, error = %e, "failed to serialize patch");
            unchanged()
        }
    }
}
