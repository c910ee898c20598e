use std::sync::Arc;

use barops_core::SyncError;
use barops_storage::{HttpFetcher, OutboundRequest};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{info, warn};

/// Action name to downstream path. Anything not listed is rejected before
/// any network call.
pub const DISPATCH_ROUTES: [(&str, &str); 7] = [
    ("sync_pos", "/sync/pos"),
    ("sync_ticketing", "/sync/ticketing"),
    ("sync_accounting", "/sync/accounting"),
    ("sync_reviews", "/sync/reviews"),
    ("sync_sheets", "/sync/sheets"),
    ("process_raw", "/process"),
    ("recompute", "/recompute"),
];

pub fn route_for(action: &str) -> Option<&'static str> {
    DISPATCH_ROUTES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, path)| *path)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub action: Option<String>,
    /// Everything besides `action`, forwarded as the downstream body.
    #[serde(flatten)]
    pub params: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub status: u16,
    pub body: JsonValue,
}

#[derive(Clone)]
pub struct Dispatcher {
    http: Arc<HttpFetcher>,
    base_url: Option<String>,
    service_token: Option<String>,
}

impl Dispatcher {
    pub fn new(http: Arc<HttpFetcher>, base_url: Option<String>, service_token: Option<String>) -> Self {
        Self {
            http,
            base_url,
            service_token,
        }
    }

    /// Forward `request` to the handler mapped to its action, mirroring the
    /// downstream status. Sends exactly once.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        caller_token: Option<&str>,
    ) -> Result<DispatchOutcome, SyncError> {
        let action = request
            .action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SyncError::InvalidAction("missing action".into()))?;
        let path = route_for(action)
            .ok_or_else(|| SyncError::InvalidAction(format!("unknown action {action:?}")))?;

        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::Configuration("dispatch base url is not configured".into()))?;
        let token = caller_token
            .filter(|t| !t.trim().is_empty())
            .or(self.service_token.as_deref())
            .ok_or_else(|| SyncError::Configuration("no credential available for dispatch".into()))?;

        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let body = JsonValue::Object(request.params);
        let outbound = OutboundRequest::post_json(&url, &body).bearer(Some(token));

        let response = match self.http.forward(outbound).await {
            Ok(response) => response,
            Err(err) => {
                warn!(action, url = %url, error = %err, "dispatch failed");
                return Ok(failure(err.to_string()));
            }
        };

        let result = if response.body.is_empty() {
            JsonValue::Null
        } else {
            match response.json::<JsonValue>() {
                Ok(value) => value,
                Err(err) => {
                    warn!(action, url = %url, error = %err, "dispatch response was not json");
                    return Ok(failure(err.to_string()));
                }
            }
        };

        let status = response.status.as_u16();
        info!(action, url = %url, status, "dispatched");
        Ok(DispatchOutcome {
            status,
            body: json!({
                "success": response.status.is_success(),
                "action": action,
                "dispatched_to": path,
                "result": result,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        })
    }
}

fn failure(error: String) -> DispatchOutcome {
    DispatchOutcome {
        status: 500,
        body: json!({
            "success": false,
            "error": error,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    }
}
