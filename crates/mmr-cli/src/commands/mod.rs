//! Command handler modules for mmr-cli.
//!
//! Shared utilities used by multiple command paths live here.

pub mod dispatch;

use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::info;

use mmr_config::{load_layered_yaml, resolve_secrets};
use mmr_db::{PgLedger, PgRatingLookup, PgSequenceStore};
use mmr_ledger::{Dispatcher, EventProcessor, IdAllocator};
use mmr_submissions::{M2mCredentials, SubmissionApiClient};

/// Load one JSON message from a file. A UTF-8 BOM is tolerated.
pub fn load_message(path: &str) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("read message-file failed: {path}"))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    let raw = std::str::from_utf8(bytes).context("message-file must be UTF-8 text")?;
    serde_json::from_str(raw.trim()).context("message-file must contain valid JSON")
}

/// Wire the Postgres-backed dispatcher described by the layered config.
///
/// Ignored review-type names are resolved through the Submission API here,
/// once, before any message is handled.
pub async fn build_dispatcher(config_paths: &[String]) -> Result<Dispatcher<PgLedger>> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_layered_yaml(&path_refs)?;
    let cfg = loaded.processor_config()?;
    let secrets = resolve_secrets(&cfg)?;
    info!(config_hash = %loaded.config_hash, "loaded processor config");

    let url = secrets
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("missing env var {}", cfg.database.url_env))?;
    let pool = mmr_db::connect(url).await?;
    let side_pool = mmr_db::connect_side_pool(url).await?;

    let mut submissions = SubmissionApiClient::new_with_base_url(cfg.submission_api.base_url.clone());
    if let (Some(auth), Some(client_id), Some(client_secret)) = (
        cfg.submission_api.auth.as_ref(),
        secrets.auth_client_id.clone(),
        secrets.auth_client_secret.clone(),
    ) {
        submissions = submissions.with_credentials(M2mCredentials {
            token_url: auth.token_url.clone(),
            audience: auth.audience.clone(),
            client_id,
            client_secret,
            cache_for: auth.cache_for(),
        });
    }

    let resolved = submissions
        .resolve_ignored_review_types(&cfg.review.ignored_review_types)
        .await
        .context("failed to resolve ignored review types")?;
    let settings = cfg.processor_settings(resolved)?;

    let ids = Arc::new(IdAllocator::new(
        cfg.ledger.component_state_sequence.clone(),
        Arc::new(PgSequenceStore::new(side_pool.clone())),
    ));
    let processor = EventProcessor::new(
        PgLedger::new(pool),
        ids,
        Arc::new(submissions),
        Arc::new(PgRatingLookup::new(side_pool, cfg.ledger.rating_type_id)),
        settings,
    );
    let topics = cfg.topics();
    info!(topics = ?topics.subscribed(), "dispatcher ready");
    Ok(Dispatcher::new(processor, topics))
}
