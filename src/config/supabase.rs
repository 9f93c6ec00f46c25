//! Remote store configuration
//!
//! The durable store is a PostgREST endpoint (typically Supabase). When it is
//! not configured the scanner falls back to the in-memory store.

use tracing::{debug, info, warn};

use super::logging::SanitizedValue;
use crate::error::AppError;

/// Values copied from `.env.example` that were never filled in
const PLACEHOLDER_MARKERS: &[&str] = &["your-project", "your-anon-key"];

/// PostgREST endpoint and key, loaded from the environment
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL (e.g. <https://xxx.supabase.co>)
    pub url: String,
    /// API key sent as `apikey` and bearer token
    pub anon_key: String,
}

/// Non-empty, non-placeholder value of `name`
fn filled_var(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?.trim().to_string();
    if value.is_empty() {
        return None;
    }
    if PLACEHOLDER_MARKERS.iter().any(|marker| value.contains(marker)) {
        warn!(var = name, "Placeholder value ignored");
        return None;
    }
    Some(value)
}

impl SupabaseConfig {
    /// Read `SUPABASE_ENABLED`, `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    ///
    /// `Ok(None)` means "use the in-memory store": the store is switched off
    /// with `SUPABASE_ENABLED=false` or no usable URL is set. A URL without a
    /// key, or a URL that is not http(s), is a configuration error.
    pub fn from_env() -> Result<Option<Self>, AppError> {
        let disabled = std::env::var("SUPABASE_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        if disabled {
            info!("Remote store disabled via SUPABASE_ENABLED=false");
            return Ok(None);
        }

        let Some(url) = filled_var("SUPABASE_URL") else {
            debug!("SUPABASE_URL not set, remote store disabled");
            return Ok(None);
        };
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::Config(format!(
                "SUPABASE_URL must be an http(s) URL (got {})",
                url
            )));
        }

        let anon_key = filled_var("SUPABASE_ANON_KEY").ok_or_else(|| {
            AppError::Config("SUPABASE_ANON_KEY is required when SUPABASE_URL is set".to_string())
        })?;

        info!(
            url = %url,
            anon_key = %SanitizedValue::new(&anon_key),
            "Remote store configuration loaded"
        );
        Ok(Some(Self { url, anon_key }))
    }

    /// Config pointing at a local mock server
    pub fn new_for_test(url: &str, anon_key: &str) -> Self {
        Self {
            url: url.to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}
