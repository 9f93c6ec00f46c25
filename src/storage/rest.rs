//! PostgREST (Supabase) backed store
//!
//! Tables (natural keys in brackets):
//! - `watchlist_symbols` [symbol]: `id`, `symbol`, `is_active`
//! - `detector_state` [symbol, detector_name]: `last_triggered_at`,
//!   `last_payload_hash`, `memory`
//! - `alert_gate` [symbol, detector_name, payload_hash]: `last_sent_at`
//! - `alerts_log`: one row per `AlertRecord`
//!
//! The alert gate is claimed with an INSERT (201 = first claim, 409 = key
//! exists) followed, on conflict, by a conditional PATCH that only matches
//! rows whose `last_sent_at` is older than the window. Both statements are
//! atomic server-side, so concurrent claimers cannot both win.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::{StoreError, StoreResult};
use super::traits::{AlertLogStore, DetectorStateStore, Store, WatchlistStore};
use crate::config::SupabaseConfig;
use crate::core::types::{AlertRecord, DedupKey, DetectorState, Symbol};
use crate::error::{AppError, Result};

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);

const WATCHLIST_TABLE: &str = "watchlist_symbols";
const STATE_TABLE: &str = "detector_state";
const GATE_TABLE: &str = "alert_gate";
const ALERTS_TABLE: &str = "alerts_log";

#[derive(Debug, Deserialize)]
struct WatchlistRow {
    symbol: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRow {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    detector_name: Option<String>,
    last_triggered_at: Option<DateTime<Utc>>,
    last_payload_hash: Option<String>,
    #[serde(default)]
    memory: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GateRow<'a> {
    symbol: &'a str,
    detector_name: &'a str,
    payload_hash: &'a str,
    last_sent_at: String,
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Map a non-success response to a store error
async fn status_error(table: &str, response: Response) -> StoreError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StoreError::Unauthorized(format!("{} on {}", status, table))
        }
        _ => StoreError::Unavailable(format!("{} on {}: {}", status, table, body)),
    }
}

pub struct RestStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestStore {
    /// Build a client carrying the `apikey` and bearer headers on every call
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.anon_key)
            .map_err(|_| AppError::Config("SUPABASE_ANON_KEY is not a valid header value".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.anon_key))
            .map_err(|_| AppError::Config("SUPABASE_ANON_KEY is not a valid header value".into()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

#[async_trait]
impl WatchlistStore for RestStore {
    async fn list_active(&self, limit: Option<usize>) -> StoreResult<Vec<Symbol>> {
        let mut query = vec![
            ("select", "symbol".to_string()),
            ("is_active", "eq.true".to_string()),
            ("order", "id.asc".to_string()),
        ];
        if let Some(n) = limit {
            query.push(("limit", n.to_string()));
        }

        let response = self
            .client
            .get(self.table_url(WATCHLIST_TABLE))
            .query(&query)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(status_error(WATCHLIST_TABLE, response).await);
        }

        let rows: Vec<WatchlistRow> = response.json().await?;
        rows.into_iter()
            .map(|row| {
                Symbol::parse(&row.symbol).map_err(|e| StoreError::InvalidData(e.to_string()))
            })
            .collect()
    }

    async fn add(&self, symbol: &Symbol) -> StoreResult<()> {
        let response = self
            .client
            .post(self.table_url(WATCHLIST_TABLE))
            .query(&[("on_conflict", "symbol")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&serde_json::json!({ "symbol": symbol.as_str(), "is_active": true }))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => {
                debug!(symbol = %symbol, "Watchlist symbol upserted");
                Ok(())
            }
            _ => Err(status_error(WATCHLIST_TABLE, response).await),
        }
    }

    async fn remove(&self, symbol: &Symbol) -> StoreResult<()> {
        let response = self
            .client
            .patch(self.table_url(WATCHLIST_TABLE))
            .query(&[("symbol", format!("eq.{}", symbol))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "is_active": false }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(status_error(WATCHLIST_TABLE, response).await),
        }
    }
}

#[async_trait]
impl DetectorStateStore for RestStore {
    async fn get(&self, symbol: &Symbol, detector: &str) -> StoreResult<Option<DetectorState>> {
        let response = self
            .client
            .get(self.table_url(STATE_TABLE))
            .query(&[
                ("select", "last_triggered_at,last_payload_hash,memory".to_string()),
                ("symbol", format!("eq.{}", symbol)),
                ("detector_name", format!("eq.{}", detector)),
            ])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(status_error(STATE_TABLE, response).await);
        }

        let rows: Vec<StateRow> = response.json().await?;
        Ok(rows.into_iter().next().map(|row| DetectorState {
            last_triggered_at: row.last_triggered_at,
            last_payload_hash: row.last_payload_hash,
            memory: row.memory,
        }))
    }

    async fn upsert(&self, symbol: &Symbol, detector: &str, state: &DetectorState) -> StoreResult<()> {
        let row = StateRow {
            symbol: Some(symbol.to_string()),
            detector_name: Some(detector.to_string()),
            last_triggered_at: state.last_triggered_at,
            last_payload_hash: state.last_payload_hash.clone(),
            memory: state.memory.clone(),
        };
        let response = self
            .client
            .post(self.table_url(STATE_TABLE))
            .query(&[("on_conflict", "symbol,detector_name")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(status_error(STATE_TABLE, response).await),
        }
    }
}

#[async_trait]
impl AlertLogStore for RestStore {
    async fn try_insert_if_absent(
        &self,
        key: &DedupKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<bool> {
        let row = GateRow {
            symbol: key.symbol.as_str(),
            detector_name: &key.detector_name,
            payload_hash: &key.payload_hash,
            last_sent_at: timestamp(now),
        };
        let response = self
            .client
            .post(self.table_url(GATE_TABLE))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => return Ok(true),
            StatusCode::CONFLICT => {}
            _ => return Err(status_error(GATE_TABLE, response).await),
        }

        // Key exists: reclaim only if the previous send is outside the window
        let response = self
            .client
            .patch(self.table_url(GATE_TABLE))
            .query(&[
                ("symbol", format!("eq.{}", key.symbol)),
                ("detector_name", format!("eq.{}", key.detector_name)),
                ("payload_hash", format!("eq.{}", key.payload_hash)),
                ("last_sent_at", format!("lte.{}", timestamp(now - window))),
            ])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "last_sent_at": timestamp(now) }))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(status_error(GATE_TABLE, response).await);
        }

        let updated: Vec<serde_json::Value> = response.json().await?;
        if updated.is_empty() {
            debug!(key = %key, "Alert gate held within window");
        }
        Ok(!updated.is_empty())
    }

    async fn append(&self, record: &AlertRecord) -> StoreResult<()> {
        let response = self
            .client
            .post(self.table_url(ALERTS_TABLE))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => {
                // Same id already written; the log is append-only
                warn!(alert_id = %record.id, "Alert record already present");
                Ok(())
            }
            _ => Err(status_error(ALERTS_TABLE, response).await),
        }
    }
}

#[async_trait]
impl Store for RestStore {
    async fn ping(&self) -> StoreResult<()> {
        let response = self
            .client
            .get(self.table_url(WATCHLIST_TABLE))
            .query(&[("select", "symbol"), ("limit", "1")])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            _ => Err(status_error(WATCHLIST_TABLE, response).await),
        }
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::sync::Arc;

    fn store_for(server: &mockito::Server) -> RestStore {
        RestStore::new(&SupabaseConfig::new_for_test(&server.url(), "test-anon-key")).unwrap()
    }

    fn key() -> DedupKey {
        DedupKey {
            symbol: Symbol::parse("AAPL").unwrap(),
            detector_name: Arc::from("price_cross"),
            payload_hash: "abc123".into(),
        }
    }

    #[tokio::test]
    async fn test_list_active_parses_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/watchlist_symbols")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("is_active".into(), "eq.true".into()),
                Matcher::UrlEncoded("order".into(), "id.asc".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .match_header("apikey", "test-anon-key")
            .with_status(200)
            .with_body(r#"[{"symbol":"aapl"},{"symbol":"MSFT"}]"#)
            .create_async()
            .await;

        let symbols = store_for(&server).list_active(Some(2)).await.unwrap();
        assert_eq!(symbols, vec![Symbol::parse("AAPL").unwrap(), Symbol::parse("MSFT").unwrap()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/watchlist_symbols")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = store_for(&server).ping().await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_gate_first_claim_created() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/alert_gate")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "symbol": "AAPL",
                "detector_name": "price_cross",
                "payload_hash": "abc123"
            })))
            .with_status(201)
            .create_async()
            .await;

        let claimed = store_for(&server)
            .try_insert_if_absent(&key(), Utc::now(), Duration::seconds(300))
            .await
            .unwrap();
        assert!(claimed);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gate_conflict_within_window_is_duplicate() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/alert_gate")
            .with_status(409)
            .with_body(r#"{"message":"duplicate key value violates unique constraint"}"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/rest/v1/alert_gate")
            .match_query(Matcher::Any)
            .match_header("prefer", "return=representation")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let claimed = store_for(&server)
            .try_insert_if_absent(&key(), Utc::now(), Duration::seconds(300))
            .await
            .unwrap();
        assert!(!claimed);
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_gate_conflict_outside_window_reclaims() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/alert_gate")
            .with_status(409)
            .create_async()
            .await;
        server
            .mock("PATCH", "/rest/v1/alert_gate")
            .match_query(Matcher::Regex("last_sent_at=lte.".into()))
            .with_status(200)
            .with_body(r#"[{"symbol":"AAPL"}]"#)
            .create_async()
            .await;

        let claimed = store_for(&server)
            .try_insert_if_absent(&key(), Utc::now(), Duration::seconds(300))
            .await
            .unwrap();
        assert!(claimed);
    }

    #[tokio::test]
    async fn test_gate_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/alert_gate")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = store_for(&server)
            .try_insert_if_absent(&key(), Utc::now(), Duration::seconds(300))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_detector_state_get_missing_row() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/detector_state")
            .match_query(Matcher::UrlEncoded("detector_name".into(), "eq.bull_flag".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let state = store_for(&server)
            .get(&Symbol::parse("AAPL").unwrap(), "bull_flag")
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_detector_state_upsert_merges() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/detector_state")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "symbol,detector_name".into()))
            .match_header("prefer", "resolution=merge-duplicates,return=minimal")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "symbol": "AAPL",
                "detector_name": "bull_flag",
                "memory": {"bars_seen": 3}
            })))
            .with_status(201)
            .create_async()
            .await;

        let state = DetectorState {
            memory: serde_json::json!({"bars_seen": 3}),
            ..Default::default()
        };
        store_for(&server)
            .upsert(&Symbol::parse("AAPL").unwrap(), "bull_flag", &state)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
