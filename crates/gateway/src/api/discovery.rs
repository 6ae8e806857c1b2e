//! `GET /.well-known/resources` — what this gateway offers and how to
//! authenticate against it.

use axum::extract::State;
use axum::response::Json;
use prg_adapters::ResourceAdapter;
use serde_json::{json, Value};

use crate::state::AppState;

/// Constraint keys the enforcement engine understands, advertised so
/// clients know what a permission may carry.
const SUPPORTED_CONSTRAINTS: [&str; 5] = [
    "allowedModels",
    "maxOutputTokens",
    "allowTools",
    "allowStreaming",
    "modelRateLimits",
];

pub async fn well_known_resources(State(state): State<AppState>) -> Json<Value> {
    let resources: Vec<Value> = state
        .adapters
        .list()
        .iter()
        .map(|adapter| {
            let descriptor = adapter.descriptor();
            let mut entry = json!({
                "resourceId": descriptor.id,
                "actions": descriptor.actions,
                "auth": { "pop": { "version": 1 } },
                "constraints": {
                    "supports": if descriptor.supports_enforcement {
                        SUPPORTED_CONSTRAINTS.to_vec()
                    } else {
                        Vec::new()
                    },
                },
            });
            if let Some(schema) = &descriptor.credential_schema {
                entry["client"] = json!({ "credentialSchema": schema });
            }
            entry
        })
        .collect();

    Json(json!({
        "gateway": {
            "name": "resgate",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "resources": resources,
    }))
}
