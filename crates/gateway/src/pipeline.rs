//! The data-plane request pipeline.
//!
//! Strict stage order: resource → authenticate → permission → rate limit →
//! budget → enforcement → secret → execute → log. Each stage either
//! proceeds or produces a categorised error; the early stages never touch
//! the request body.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use prg_adapters::{AdapterResponse, ByteStream, ExecuteContext, ExecuteOptions, ResourceAdapter};
use prg_counters::{budget_key, model_rate_limit_key, rate_limit_key, BudgetPeriod};
use prg_domain::app::AppStatus;
use prg_domain::error::{ErrorCode, GatewayError, Result};
use prg_domain::log::Usage;
use prg_domain::permission::PermissionStatus;
use prg_pop::{
    body_hash, build_canonical, check_timestamp, decode_public_key, verify_signature, NonceStore,
    PopHeaders, Reservation,
};
use prg_policy::{check_permission_validity, enforce, has_enforceable_constraints, EnforcementPolicy};
use prg_store::Repository;
use prg_vault::VaultError;

use crate::recorder::RequestRecord;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the HTTP layer hands the pipeline.
pub struct InboundRequest {
    pub method: String,
    /// `pathname + search` exactly as signed by the client.
    pub path_and_query: String,
    /// Path only, for the request log.
    pub endpoint: String,
    /// `(resource_id, action)` resolved by the router; `None` when neither
    /// the URL nor the `x-gateway-resource` header named one.
    pub resource: Option<(String, String)>,
    pub headers: axum::http::HeaderMap,
    pub body: Bytes,
}

pub enum PipelineResponse {
    Complete {
        response: Value,
        content_type: &'static str,
    },
    Stream {
        stream: ByteStream,
        content_type: &'static str,
    },
}

impl std::fmt::Debug for PipelineResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineResponse::Complete {
                response,
                content_type,
            } => f
                .debug_struct("Complete")
                .field("response", response)
                .field("content_type", content_type)
                .finish(),
            PipelineResponse::Stream { content_type, .. } => f
                .debug_struct("Stream")
                .field("content_type", content_type)
                .finish(),
        }
    }
}

/// Internal: what `process` produced before logging is settled.
enum Executed {
    Complete {
        response: Value,
        content_type: &'static str,
        usage: Option<Usage>,
    },
    /// Logging already handed to the stream-end callback.
    Stream {
        stream: ByteStream,
        content_type: &'static str,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one data-plane request through the pipeline. Exactly one request-log
/// entry is written per call, whatever the outcome.
pub async fn handle(
    state: &AppState,
    inbound: InboundRequest,
    cancel: CancellationToken,
) -> Result<PipelineResponse> {
    let (resource_id, action) = match &inbound.resource {
        Some((resource_id, action)) => (resource_id.clone(), action.clone()),
        None => ("unknown".to_string(), "unknown".to_string()),
    };
    let mut record = RequestRecord::new(
        state.repo.clone(),
        state.counters.clone(),
        resource_id,
        action,
        inbound.endpoint.clone(),
        inbound.method.clone(),
    );

    match process(state, &inbound, cancel, &mut record).await {
        Ok(Executed::Complete {
            response,
            content_type,
            usage,
        }) => {
            record.finish(prg_domain::log::Decision::Allowed, None, usage);
            Ok(PipelineResponse::Complete {
                response,
                content_type,
            })
        }
        Ok(Executed::Stream {
            stream,
            content_type,
        }) => Ok(PipelineResponse::Stream {
            stream,
            content_type,
        }),
        Err(err) => {
            let reason = if err.is_cancelled() {
                "cancelled".to_string()
            } else {
                format!("{}: {}", err.code, err.message)
            };
            record.finish(err.code.decision(), Some(reason), None);
            Err(err)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn process(
    state: &AppState,
    inbound: &InboundRequest,
    cancel: CancellationToken,
    record: &mut RequestRecord,
) -> Result<Executed> {
    // ── 1. Resource identity ─────────────────────────────────────────
    let (resource_id, action) = inbound.resource.clone().ok_or_else(|| {
        GatewayError::new(
            ErrorCode::ErrResourceRequired,
            "no resource in URL path or x-gateway-resource header",
        )
    })?;
    let adapter = state.adapters.get(&resource_id).ok_or_else(|| {
        GatewayError::new(
            ErrorCode::ErrUnknownResource,
            format!("no adapter registered for '{resource_id}'"),
        )
    })?;
    if !adapter.descriptor().actions.iter().any(|a| a == &action) {
        return Err(GatewayError::new(
            ErrorCode::ErrUnsupportedAction,
            format!("'{resource_id}' does not support action '{action}'"),
        ));
    }

    // ── 2. Authenticate ──────────────────────────────────────────────
    let pop = PopHeaders::parse(|name| {
        inbound
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    })?;

    let app = state
        .repo
        .find_app(&pop.app_id)
        .await?
        .ok_or_else(|| GatewayError::new(ErrorCode::ErrAppNotFound, "unknown app id"))?;
    record.set_app_id(&app.id);
    if app.status != AppStatus::Active {
        return Err(GatewayError::new(
            ErrorCode::ErrAppDisabled,
            format!("app is {:?}", app.status),
        ));
    }

    let now = Utc::now();
    check_timestamp(pop.ts, now.timestamp(), state.config.auth.clock_skew_secs)?;

    let canonical = build_canonical(
        &inbound.method,
        &inbound.path_and_query,
        &pop.app_id,
        pop.ts,
        &pop.nonce,
        &body_hash(&inbound.body),
    );
    let public_key = decode_public_key(&app.public_key)?;
    verify_signature(&public_key, &canonical, &pop.sig)?;

    // Reserve after signature success so unauthenticated traffic cannot
    // grow the store; before anything downstream so replays stop here.
    if state
        .nonces
        .reserve(&pop.app_id, &pop.nonce, state.config.auth.nonce_ttl_secs)
        == Reservation::Replay
    {
        return Err(GatewayError::new(
            ErrorCode::ErrInvalidNonce,
            "nonce already used inside its window",
        ));
    }

    // ── 3. Permission ────────────────────────────────────────────────
    let permission = state
        .repo
        .find_permission(&app.id, &resource_id, &action)
        .await?
        .filter(|p| p.status == PermissionStatus::Active)
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ErrPermissionDenied,
                format!("no active permission for ({resource_id}, {action})"),
            )
        })?;
    check_permission_validity(&permission, now)?;

    // ── 4. Rate limit (most specific configured limit wins) ──────────
    // Specificity: permission (resource, action) > resource-wide config
    // override (resource, *) > global default.
    let limits = &state.config.limits;
    let resource_limit = state
        .config
        .resources
        .get(&resource_id)
        .and_then(|r| r.rate_limit_requests.zip(r.rate_limit_window_secs));
    let (rate_key, rate_limit, rate_window) = match (
        permission.rate_limit_requests,
        permission.rate_limit_window_secs,
    ) {
        (Some(max), Some(window)) => (
            rate_limit_key(&app.id, Some(&resource_id), Some(&action)),
            max,
            window,
        ),
        _ => match resource_limit {
            Some((max, window)) => (
                rate_limit_key(&app.id, Some(&resource_id), None),
                max,
                window,
            ),
            None => (
                rate_limit_key(&app.id, None, None),
                limits.default_rate_limit_requests,
                limits.default_rate_limit_window_secs,
            ),
        },
    };
    let rate = state
        .counters
        .check_rate(&rate_key, rate_limit, rate_window, now);
    if !rate.allowed {
        return Err(GatewayError::new(
            ErrorCode::ErrRateLimitExceeded,
            format!("rate limit of {rate_limit}/{rate_window}s exhausted"),
        )
        .with_details(serde_json::json!({ "resetAt": rate.reset_at.to_rfc3339() })));
    }

    // ── 5. Budget ────────────────────────────────────────────────────
    let daily_limit = permission.daily_quota.unwrap_or(limits.default_daily_budget);
    let daily = state.counters.check_budget(
        &budget_key(&app.id, BudgetPeriod::Daily),
        daily_limit,
        BudgetPeriod::Daily,
        now,
    );
    if !daily.allowed {
        return Err(GatewayError::new(
            ErrorCode::ErrBudgetExceeded,
            format!("daily budget of {daily_limit} requests exhausted"),
        )
        .with_details(serde_json::json!({ "resetAt": daily.resets_at.to_rfc3339() })));
    }
    if let Some(monthly_limit) = permission.monthly_quota.or(limits.default_monthly_budget) {
        let monthly = state.counters.check_budget(
            &budget_key(&app.id, BudgetPeriod::Monthly),
            monthly_limit,
            BudgetPeriod::Monthly,
            now,
        );
        if !monthly.allowed {
            return Err(GatewayError::new(
                ErrorCode::ErrBudgetExceeded,
                format!("monthly budget of {monthly_limit} requests exhausted"),
            )
            .with_details(serde_json::json!({ "resetAt": monthly.resets_at.to_rfc3339() })));
        }
    }

    // ── 6. Validate, shape, enforce ──────────────────────────────────
    let input: Value = serde_json::from_slice(&inbound.body).map_err(|e| {
        GatewayError::new(ErrorCode::ErrInvalidJson, format!("request body: {e}"))
    })?;
    let validated = adapter.validate_and_shape(&action, &input, &permission.constraints)?;
    if let Some(model) = &validated.enforcement.model {
        record.set_model(model);
    }

    if has_enforceable_constraints(&permission.constraints) {
        let policy = EnforcementPolicy::from_constraints(&permission.constraints);
        enforce(&policy, &validated.enforcement)?;

        // Per-model rate limits from the constraints.
        if let Some(model) = &validated.enforcement.model {
            for limit in &policy.model_rate_limits {
                if limit.model.trim_start_matches("models/") == model {
                    let key = model_rate_limit_key(&app.id, &resource_id, &action, model);
                    let decision = state.counters.check_rate(&key, limit.max, limit.window, now);
                    if !decision.allowed {
                        return Err(GatewayError::new(
                            ErrorCode::ErrRateLimitExceeded,
                            format!("model '{model}' limited to {}/{}s", limit.max, limit.window),
                        )
                        .with_details(
                            serde_json::json!({ "resetAt": decision.reset_at.to_rfc3339() }),
                        ));
                    }
                }
            }
        }
    }

    // ── 7. Secret ────────────────────────────────────────────────────
    let secret_record = state
        .repo
        .find_resource_secret(&resource_id)
        .await?
        .filter(|s| s.status == prg_domain::secret::SecretStatus::Active)
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ErrResourceNotConfigured,
                format!("no active credential for '{resource_id}'"),
            )
        })?;
    let secret = state
        .vault
        .open(&secret_record.encrypted_key, &secret_record.key_iv)
        .map_err(|e: VaultError| {
            // Deliberately vague toward the client; the log carries enough.
            tracing::error!(resource = %resource_id, error = %e, "secret decrypt failed");
            GatewayError::new(
                ErrorCode::ErrResourceNotConfigured,
                format!("credential for '{resource_id}' cannot be used"),
            )
        })?;

    // ── 8. Execute ───────────────────────────────────────────────────
    let stream_requested = validated.enforcement.stream == Some(true);
    let ctx = ExecuteContext {
        secret,
        config: secret_record.config.clone(),
    };
    let mut opts = ExecuteOptions::new(stream_requested, cancel);

    // For streams, stage 9 runs when the stream ends. The record moves into
    // this slot only once a stream actually starts, so a failed execute
    // still logs through the normal error path.
    let stream_log_slot: Arc<Mutex<Option<RequestRecord>>> = Arc::new(Mutex::new(None));
    if stream_requested {
        let slot = stream_log_slot.clone();
        opts.on_stream_end = Some(Box::new(move |end| {
            if let Some(stream_record) = slot.lock().take() {
                stream_record.into_stream_callback()(end);
            }
        }));
    }

    match adapter.execute(&action, &validated.shaped, &ctx, opts).await {
        Ok(AdapterResponse::Complete {
            response,
            content_type,
            usage,
        }) => {
            let usage = usage.or_else(|| Some(adapter.extract_usage(&response)));
            Ok(Executed::Complete {
                response,
                content_type,
                usage,
            })
        }
        Ok(AdapterResponse::Stream {
            stream,
            content_type,
        }) => {
            // Arm the deferred log before the stream reaches the client; if
            // the client walks away mid-stream the slot drops and the record
            // logs the cancellation.
            let stream_record = std::mem::replace(
                record,
                RequestRecord::disarmed(state.repo.clone(), state.counters.clone()),
            );
            *stream_log_slot.lock() = Some(stream_record);
            Ok(Executed::Stream {
                stream,
                content_type,
            })
        }
        Err(err) => Err(err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use axum::http::HeaderMap;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;

    use prg_adapters::{AdapterDescriptor, AdapterRegistry, ResourceAdapter, Validated};
    use prg_counters::CounterStore;
    use prg_domain::app::AppMetadata;
    use prg_domain::config::Config;
    use prg_domain::log::Decision;
    use prg_domain::permission::PermissionInput;
    use prg_domain::secret::{ResourceSecret, SecretStatus};
    use prg_pairing::PairingService;
    use prg_store::MemoryRepository;
    use prg_vault::{MasterKey, SecretVault};

    // ── Stub adapter: real validation, canned upstream ───────────────

    struct StubAdapter {
        descriptor: AdapterDescriptor,
    }

    impl StubAdapter {
        fn new() -> Self {
            Self::named("stub")
        }

        fn named(provider: &str) -> Self {
            Self {
                descriptor: AdapterDescriptor {
                    id: format!("llm:{provider}"),
                    resource_type: "llm".into(),
                    provider: provider.into(),
                    actions: vec!["chat.completions".into()],
                    supports_enforcement: true,
                    credential_schema: None,
                },
            }
        }
    }

    #[async_trait::async_trait]
    impl ResourceAdapter for StubAdapter {
        fn descriptor(&self) -> &AdapterDescriptor {
            &self.descriptor
        }

        fn validate_and_shape(
            &self,
            _action: &str,
            input: &Value,
            constraints: &Value,
        ) -> prg_domain::error::Result<Validated> {
            prg_adapters::chat::validate_chat_request(input, constraints, 4096)
        }

        async fn execute(
            &self,
            _action: &str,
            shaped: &Value,
            ctx: &ExecuteContext,
            _opts: ExecuteOptions,
        ) -> prg_domain::error::Result<prg_adapters::AdapterResponse> {
            // The decrypted credential must have made it this far.
            assert_eq!(ctx.secret, "sk-upstream-credential");
            let model = shaped["model"].as_str().unwrap_or("unknown").to_string();
            Ok(prg_adapters::AdapterResponse::Complete {
                response: json!({
                    "id": "chatcmpl-1",
                    "model": model,
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12},
                }),
                content_type: "application/json",
                usage: None,
            })
        }

        fn extract_usage(&self, response: &Value) -> Usage {
            Usage {
                input_tokens: response["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: response["usage"]["completion_tokens"].as_u64().unwrap_or(0),
                total_tokens: response["usage"]["total_tokens"].as_u64().unwrap_or(0),
                model: response["model"].as_str().map(String::from),
            }
        }
    }

    // ── Harness ──────────────────────────────────────────────────────

    struct Harness {
        state: AppState,
        repo: Arc<MemoryRepository>,
        app_id: String,
        signing_key: SigningKey,
    }

    async fn harness(constraints: Value, permission_overrides: PermissionTweaks) -> Harness {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let repo_dyn: Arc<dyn prg_store::Repository> = repo.clone();

        let master_key = MasterKey::generate();
        let vault = Arc::new(SecretVault::new(&master_key));

        // Upstream credential for the stub resource.
        let sealed = vault.seal("sk-upstream-credential").unwrap();
        repo_dyn
            .upsert_resource_secret(ResourceSecret {
                resource_id: "llm:stub".into(),
                status: SecretStatus::Active,
                encrypted_key: sealed.ciphertext_b64,
                key_iv: sealed.iv_b64,
                config: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        // A registered app with a real keypair.
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public_key = STANDARD.encode(signing_key.verifying_key().as_bytes());
        let app = repo_dyn
            .insert_app(
                &public_key,
                &AppMetadata {
                    name: "pipeline test app".into(),
                    description: None,
                    homepage: None,
                },
            )
            .await
            .unwrap();

        repo_dyn
            .bind_permissions(
                &app.id,
                &[PermissionInput {
                    resource_id: "llm:stub".into(),
                    action: "chat.completions".into(),
                    constraints,
                    valid_from: None,
                    expires_at: None,
                    time_window: None,
                    rate_limit_requests: permission_overrides.rate_limit_requests,
                    rate_limit_window_secs: permission_overrides.rate_limit_window_secs,
                    daily_quota: permission_overrides.daily_quota,
                    monthly_quota: None,
                }],
            )
            .await
            .unwrap();

        let adapters = Arc::new(AdapterRegistry::from_adapters(vec![
            Arc::new(StubAdapter::new()),
            Arc::new(StubAdapter::named("ungranted")),
        ]));
        let pairing = Arc::new(PairingService::new(
            repo_dyn.clone(),
            HashSet::from(["llm:stub".to_string()]),
            "http://127.0.0.1:8420".into(),
            600,
            900,
        ));

        let state = AppState {
            config: Arc::new(Config::default()),
            repo: repo_dyn,
            adapters,
            nonces: Arc::new(prg_pop::MemoryNonceStore::new()),
            vault,
            counters: Arc::new(CounterStore::new()),
            pairing,
            admin_token_hash: None,
        };

        Harness {
            state,
            repo,
            app_id: app.id,
            signing_key,
        }
    }

    #[derive(Default)]
    struct PermissionTweaks {
        rate_limit_requests: Option<u64>,
        rate_limit_window_secs: Option<u64>,
        daily_quota: Option<u64>,
    }

    const PATH: &str = "/r/llm/stub/v1/chat/completions";

    fn signed_request(harness: &Harness, body: &Value, nonce: &str, ts: i64) -> InboundRequest {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let canonical = build_canonical(
            "POST",
            PATH,
            &harness.app_id,
            ts,
            nonce,
            &body_hash(&body_bytes),
        );
        let sig = STANDARD.encode(harness.signing_key.sign(canonical.as_bytes()).to_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("x-pop-v", "1".parse().unwrap());
        headers.insert("x-app-id", harness.app_id.parse().unwrap());
        headers.insert("x-ts", ts.to_string().parse().unwrap());
        headers.insert("x-nonce", nonce.parse().unwrap());
        headers.insert("x-sig", sig.parse().unwrap());

        InboundRequest {
            method: "POST".into(),
            path_and_query: PATH.into(),
            endpoint: PATH.into(),
            resource: Some(("llm:stub".into(), "chat.completions".into())),
            headers,
            body: Bytes::from(body_bytes),
        }
    }

    fn chat_body() -> Value {
        json!({
            "model": "llama-3.1-8b-instant",
            "messages": [{"role": "user", "content": "hi"}],
        })
    }

    async fn last_log(repo: &Arc<MemoryRepository>) -> prg_domain::log::RequestLog {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        repo.recent_request_logs(1).await.unwrap().remove(0)
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    // ── Scenarios ────────────────────────────────────────────────────

    #[tokio::test]
    async fn happy_path_returns_upstream_json_and_logs_allowed() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;
        let inbound = signed_request(&h, &chat_body(), "nonce-happy-000001", now());

        let result = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap();
        match result {
            PipelineResponse::Complete { response, .. } => {
                assert_eq!(response["choices"][0]["message"]["content"], "hi");
            }
            _ => panic!("expected complete response"),
        }

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::Allowed);
        assert_eq!(log.app_id.as_deref(), Some(h.app_id.as_str()));
        assert_eq!(log.model.as_deref(), Some("llama-3.1-8b-instant"));
        assert_eq!(log.tokens_in, Some(5));
        assert_eq!(log.tokens_out, Some(7));
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;
        let ts = now();

        let first = signed_request(&h, &chat_body(), "nonce-replay-00001", ts);
        handle(&h.state, first, CancellationToken::new())
            .await
            .unwrap();

        let second = signed_request(&h, &chat_body(), "nonce-replay-00001", ts);
        let err = handle(&h.state, second, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrInvalidNonce);
        assert_eq!(err.http_status(), 401);

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::DeniedAuth);
    }

    #[tokio::test]
    async fn stale_timestamp_fails_regardless_of_signature() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;
        let inbound = signed_request(&h, &chat_body(), "nonce-stale-000001", now() - 301);
        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrExpiredTimestamp);
    }

    #[tokio::test]
    async fn tampered_body_fails_signature() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;
        let mut inbound = signed_request(&h, &chat_body(), "nonce-tamper-00001", now());
        // Swap the body after signing.
        let mut tampered = chat_body();
        tampered["messages"][0]["content"] = json!("transfer all funds");
        inbound.body = Bytes::from(serde_json::to_vec(&tampered).unwrap());

        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrInvalidSignature);
    }

    #[tokio::test]
    async fn missing_headers_reject_before_signature_work() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;
        let mut inbound = signed_request(&h, &chat_body(), "nonce-nohdr-00001", now());
        inbound.headers.remove("x-sig");
        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrMissingAuth);
    }

    #[tokio::test]
    async fn disallowed_model_is_denied_constraint() {
        let h = harness(
            json!({"allowedModels": ["llama-3.1-8b-instant"]}),
            PermissionTweaks::default(),
        )
        .await;
        let mut body = chat_body();
        body["model"] = json!("mixtral-8x7b-32768");
        let inbound = signed_request(&h, &body, "nonce-model-000001", now());

        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrModelNotAllowed);
        assert_eq!(err.http_status(), 403);

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::DeniedConstraint);
        assert_eq!(log.model.as_deref(), Some("mixtral-8x7b-32768"));
    }

    #[tokio::test]
    async fn token_cap_exceeded_is_denied() {
        let h = harness(json!({"maxOutputTokens": 1000}), PermissionTweaks::default()).await;
        let mut body = chat_body();
        body["max_tokens"] = json!(5000);
        let inbound = signed_request(&h, &body, "nonce-tokens-00001", now());

        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrMaxTokensExceeded);
    }

    #[tokio::test]
    async fn streaming_blocked_when_permission_says_no() {
        let h = harness(json!({"allowStreaming": false}), PermissionTweaks::default()).await;
        let mut body = chat_body();
        body["stream"] = json!(true);
        let inbound = signed_request(&h, &body, "nonce-stream-00001", now());

        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrStreamingNotAllowed);
    }

    #[tokio::test]
    async fn rate_limit_denies_third_request_with_reset() {
        let h = harness(
            Value::Null,
            PermissionTweaks {
                rate_limit_requests: Some(2),
                rate_limit_window_secs: Some(60),
                daily_quota: None,
            },
        )
        .await;

        for i in 0..2 {
            let inbound = signed_request(&h, &chat_body(), &format!("nonce-rate-{i:06}"), now());
            handle(&h.state, inbound, CancellationToken::new())
                .await
                .unwrap();
        }

        let third = signed_request(&h, &chat_body(), "nonce-rate-000003", now());
        let err = handle(&h.state, third, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrRateLimitExceeded);
        assert_eq!(err.http_status(), 429);
        assert!(err.details.unwrap().get("resetAt").is_some());

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::DeniedRateLimit);
    }

    #[tokio::test]
    async fn resource_config_limit_applies_when_permission_has_none() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;

        // Resource-wide override: 1 request / 60s for llm:stub, any action.
        let mut config = Config::default();
        config.resources.insert(
            "llm:stub".into(),
            prg_domain::config::ResourceConfig {
                rate_limit_requests: Some(1),
                rate_limit_window_secs: Some(60),
                ..Default::default()
            },
        );
        let mut state = h.state.clone();
        state.config = Arc::new(config);

        let first = signed_request(&h, &chat_body(), "nonce-rescfg-00001", now());
        handle(&state, first, CancellationToken::new()).await.unwrap();

        let second = signed_request(&h, &chat_body(), "nonce-rescfg-00002", now());
        let err = handle(&state, second, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrRateLimitExceeded);
    }

    #[tokio::test]
    async fn permission_limit_outranks_resource_config_limit() {
        // Permission says 2/60s; the resource override of 1/60s must not
        // apply to it.
        let h = harness(
            Value::Null,
            PermissionTweaks {
                rate_limit_requests: Some(2),
                rate_limit_window_secs: Some(60),
                daily_quota: None,
            },
        )
        .await;

        let mut config = Config::default();
        config.resources.insert(
            "llm:stub".into(),
            prg_domain::config::ResourceConfig {
                rate_limit_requests: Some(1),
                rate_limit_window_secs: Some(60),
                ..Default::default()
            },
        );
        let mut state = h.state.clone();
        state.config = Arc::new(config);

        for i in 0..2 {
            let inbound =
                signed_request(&h, &chat_body(), &format!("nonce-prec-{i:06}"), now());
            handle(&state, inbound, CancellationToken::new())
                .await
                .unwrap();
        }
        let third = signed_request(&h, &chat_body(), "nonce-prec-000003", now());
        assert_eq!(
            handle(&state, third, CancellationToken::new())
                .await
                .unwrap_err()
                .code,
            ErrorCode::ErrRateLimitExceeded
        );
    }

    #[tokio::test]
    async fn daily_budget_exhaustion_is_denied_budget() {
        let h = harness(
            Value::Null,
            PermissionTweaks {
                rate_limit_requests: None,
                rate_limit_window_secs: None,
                daily_quota: Some(1),
            },
        )
        .await;

        let first = signed_request(&h, &chat_body(), "nonce-budget-00001", now());
        handle(&h.state, first, CancellationToken::new())
            .await
            .unwrap();

        let second = signed_request(&h, &chat_body(), "nonce-budget-00002", now());
        let err = handle(&h.state, second, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrBudgetExceeded);

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::DeniedBudget);
    }

    #[tokio::test]
    async fn missing_permission_and_suspended_app() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;

        // Registered resource the app holds no grant for.
        let mut ungranted = signed_request(&h, &chat_body(), "nonce-perm-000001", now());
        ungranted.resource = Some(("llm:ungranted".into(), "chat.completions".into()));
        let err = handle(&h.state, ungranted, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrPermissionDenied);

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::DeniedPermission);

        // Unknown action → unsupported at the adapter, before auth.
        let mut unsupported = signed_request(&h, &chat_body(), "nonce-perm-000002", now());
        unsupported.resource = Some(("llm:stub".into(), "embeddings".into()));
        let err = handle(&h.state, unsupported, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrUnsupportedAction);

        // Suspend the app: authentication must now fail with APP_DISABLED.
        h.state
            .repo
            .set_app_status(&h.app_id, prg_domain::app::AppStatus::Suspended)
            .await
            .unwrap();
        let inbound = signed_request(&h, &chat_body(), "nonce-perm-000003", now());
        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrAppDisabled);
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn unknown_resource_and_missing_resource() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;

        let mut inbound = signed_request(&h, &chat_body(), "nonce-res-0000001", now());
        inbound.resource = Some(("llm:nowhere".into(), "chat.completions".into()));
        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrUnknownResource);

        let mut inbound = signed_request(&h, &chat_body(), "nonce-res-0000002", now());
        inbound.resource = None;
        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrResourceRequired);
    }

    #[tokio::test]
    async fn disabled_secret_means_resource_not_configured() {
        let h = harness(Value::Null, PermissionTweaks::default()).await;
        h.state
            .repo
            .set_resource_secret_status("llm:stub", SecretStatus::Disabled)
            .await
            .unwrap();

        let inbound = signed_request(&h, &chat_body(), "nonce-secret-00001", now());
        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrResourceNotConfigured);

        let log = last_log(&h.repo).await;
        assert_eq!(log.decision, Decision::Error);
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_json() {
        let h = harness(json!({"allowedModels": ["m"]}), PermissionTweaks::default()).await;
        let mut inbound = signed_request(&h, &chat_body(), "nonce-json-000001", now());

        // Sign over the broken body so auth passes and the JSON parse is
        // what fails.
        let broken = Bytes::from_static(b"{not json");
        let ts = now();
        let canonical = build_canonical(
            "POST",
            PATH,
            &h.app_id,
            ts,
            "nonce-json-000002",
            &body_hash(&broken),
        );
        let sig = STANDARD.encode(h.signing_key.sign(canonical.as_bytes()).to_bytes());
        inbound.body = broken;
        inbound.headers.insert("x-ts", ts.to_string().parse().unwrap());
        inbound
            .headers
            .insert("x-nonce", "nonce-json-000002".parse().unwrap());
        inbound.headers.insert("x-sig", sig.parse().unwrap());

        let err = handle(&h.state, inbound, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrInvalidJson);
    }
}
