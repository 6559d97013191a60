//! mmr-submissions
//!
//! HTTP client for the Submission API: submission metadata for the
//! processor, and review-type search for building the ignore list.
//! Does not touch the ledger.

mod auth;

pub use auth::{M2mCredentials, TokenSource};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::Deserialize;
use tracing::{debug, info};

use mmr_ledger::{LookupError, SubmissionLookup, SubmissionRecord};
use reqwest::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

const TOTAL_PAGES_HEADER: &str = "x-total-pages";

#[derive(Debug, Clone)]
pub struct SubmissionApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Option<Arc<TokenSource>>,
}

impl SubmissionApiClient {
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            auth: None,
        }
    }

    /// Attach bearer-token auth to every request.
    pub fn with_credentials(mut self, creds: M2mCredentials) -> Self {
        self.auth = Some(Arc::new(TokenSource::new(creds, self.http.clone())));
        self
    }

    /// `base_url` with `segments` appended, each percent-encoded as a single
    /// path segment. Any path already on the base is kept.
    fn url(&self, segments: &[&str]) -> Result<Url, LookupError> {
        let bad_base = |detail: &str| {
            LookupError::new(format!(
                "invalid submission api base url {:?}: {detail}",
                self.base_url
            ))
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| bad_base(&e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| bad_base("cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::RequestBuilder, LookupError> {
        let req = self.http.get(url);
        Ok(match &self.auth {
            Some(auth) => req.bearer_auth(auth.token().await?),
            None => req,
        })
    }

    /// Ids of every active review type named `name`, across all pages.
    pub async fn search_review_types(&self, name: &str) -> Result<Vec<String>, LookupError> {
        let (first, total_pages) = self.review_type_page(name, 1).await?;
        let mut ids: Vec<String> = first.into_iter().map(|t| t.id).collect();

        if total_pages > 1 {
            let rest = try_join_all(
                (2..=total_pages).map(|page| self.review_type_page(name, page)),
            )
            .await?;
            for (types, _) in rest {
                ids.extend(types.into_iter().map(|t| t.id));
            }
        }
        debug!(review_type = name, count = ids.len(), "resolved review types");
        Ok(ids)
    }

    /// Resolve review-type names to the set of ids the processor ignores.
    pub async fn resolve_ignored_review_types(
        &self,
        names: &[String],
    ) -> Result<HashSet<String>, LookupError> {
        let mut ids = HashSet::new();
        for name in names {
            ids.extend(self.search_review_types(name).await?);
        }
        info!(names = ?names, count = ids.len(), "ignored review types loaded");
        Ok(ids)
    }

    async fn review_type_page(
        &self,
        name: &str,
        page: u32,
    ) -> Result<(Vec<ReviewType>, u32), LookupError> {
        let query = [
            ("name", name.to_string()),
            ("isActive", "true".to_string()),
            ("page", page.to_string()),
        ];

        let resp = self
            .get(self.url(&["reviewTypes"])?)
            .await?
            .query(&query)
            .send()
            .await
            .map_err(|e| LookupError::new(format!("review type search failed: {e}")))?;

        let resp = check_status(resp).await?;
        let total_pages = resp
            .headers()
            .get(TOTAL_PAGES_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(1);
        let types: Vec<ReviewType> = resp
            .json()
            .await
            .map_err(|e| LookupError::new(format!("review type decode failed: {e}")))?;
        Ok((types, total_pages))
    }
}

impl Default for SubmissionApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubmissionLookup for SubmissionApiClient {
    async fn submission(&self, submission_id: &str) -> Result<SubmissionRecord, LookupError> {
        let resp = self
            .get(self.url(&["submissions", submission_id])?)
            .await?
            .send()
            .await
            .map_err(|e| LookupError::new(format!("submission request failed: {e}")))?;

        let resp = check_status(resp).await?;
        resp.json::<SubmissionRecord>()
            .await
            .map_err(|e| LookupError::new(format!("submission decode failed: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct ReviewType {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// Pass 2xx through; otherwise surface the body's `message` verbatim.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LookupError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<ApiErrorBody>()
        .await
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("submission api http error status={}", status.as_u16()));
    Err(LookupError::with_status(status.as_u16(), message))
}

// -----------------
// Tests (local mock server, no network)
// -----------------
