//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES. Callers resolve them once at
//! startup and pass the values into constructors. `Debug` redacts values and
//! error messages name the env var, never its content.

use anyhow::{bail, Result};

use crate::ProcessorConfig;

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub database_url: Option<String>,
    pub auth_client_id: Option<String>,
    pub auth_client_secret: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .field("auth_client_id", &self.auth_client_id.as_ref().map(|_| "<REDACTED>"))
            .field(
                "auth_client_secret",
                &self.auth_client_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve from the process environment.
pub fn resolve_secrets(cfg: &ProcessorConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, |name| std::env::var(name).ok())
}

/// Resolve through `lookup` (env var name -> value). Empty values count as
/// absent. Auth credentials are required once `submission_api.auth` is set.
pub fn resolve_secrets_with<F>(cfg: &ProcessorConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let database_url = get(&cfg.database.url_env);

    let (auth_client_id, auth_client_secret) = match &cfg.submission_api.auth {
        None => (None, None),
        Some(auth) => {
            let Some(id) = get(&auth.client_id_env) else {
                bail!(
                    "SECRET_MISSING: env var {} (submission_api.auth.client_id_env) is not set",
                    auth.client_id_env
                );
            };
            let Some(secret) = get(&auth.client_secret_env) else {
                bail!(
                    "SECRET_MISSING: env var {} (submission_api.auth.client_secret_env) is not set",
                    auth.client_secret_env
                );
            };
            (Some(id), Some(secret))
        }
    };

    Ok(ResolvedSecrets {
        database_url,
        auth_client_id,
        auth_client_secret,
    })
}
