//! Row insert boundary: one call per accepted lead, never fatal to the run.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::StatusCode;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait RowSink: Send + Sync {
    /// Inserts one row. Failures are logged and reported as `false`.
    async fn insert(&self, table: &str, row: &Map<String, JsonValue>) -> bool;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("request to {table} failed: {source}")]
    Request {
        table: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("duplicate row rejected by {table}")]
    Duplicate { table: String },
    #[error("table {table} does not exist")]
    MissingTable { table: String },
    #[error("{table} rejected row with status {status}: {body}")]
    Rejected {
        table: String,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    pub upsert: bool,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            upsert: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// PostgREST-style inserter: `POST {base}/rest/v1/{table}`.
#[derive(Debug, Clone)]
pub struct RestInserter {
    client: reqwest::Client,
    base_url: String,
    upsert: bool,
}

impl RestInserter {
    pub fn new(config: RestConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&config.api_key).context("api key is not a valid header value")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .context("api key is not a valid bearer token")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context("building datastore client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            upsert: config.upsert,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub async fn try_insert(&self, table: &str, row: &Map<String, JsonValue>) -> Result<(), InsertError> {
        let mut request = self.client.post(self.table_url(table)).json(row);
        request = if self.upsert {
            request
                .query(&[("on_conflict", "lead_hash")])
                .header("Prefer", "return=minimal,resolution=merge-duplicates")
        } else {
            request.header("Prefer", "return=minimal")
        };

        let resp = request.send().await.map_err(|source| InsertError::Request {
            table: table.to_string(),
            source,
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_rejection(table, status, body))
    }

    /// Exact row count via `HEAD` + `Prefer: count=exact`. `None` when the
    /// table is missing or the response carries no total.
    pub async fn table_count(&self, table: &str) -> anyhow::Result<Option<u64>> {
        let resp = self
            .client
            .head(self.table_url(table))
            .query(&[("select", "*")])
            .header("Prefer", "count=exact")
            .send()
            .await
            .with_context(|| format!("counting rows in {table}"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("counting rows in {table} returned status {}", resp.status());
        }

        Ok(resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total))
    }
}

fn classify_rejection(table: &str, status: StatusCode, body: String) -> InsertError {
    let lowered = body.to_lowercase();
    if status == StatusCode::CONFLICT || lowered.contains("duplicate key") {
        InsertError::Duplicate {
            table: table.to_string(),
        }
    } else if status == StatusCode::NOT_FOUND || lowered.contains("does not exist") {
        InsertError::MissingTable {
            table: table.to_string(),
        }
    } else {
        InsertError::Rejected {
            table: table.to_string(),
            status: status.as_u16(),
            body,
        }
    }
}

/// Total from a `Content-Range` value such as `0-24/3573` or `*/0`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl RowSink for RestInserter {
    async fn insert(&self, table: &str, row: &Map<String, JsonValue>) -> bool {
        match self.try_insert(table, row).await {
            Ok(()) => {
                info!(
                    table,
                    address = row.get("address_text").and_then(JsonValue::as_str).unwrap_or("unknown"),
                    score = row.get("lead_score").and_then(JsonValue::as_u64).unwrap_or(0),
                    "inserted lead"
                );
                true
            }
            Err(err @ InsertError::Duplicate { .. }) => {
                debug!(table, error = %err, "duplicate row skipped");
                false
            }
            Err(err @ InsertError::MissingTable { .. }) => {
                error!(table, error = %err, "insert target missing; deploy the schema first");
                false
            }
            Err(err) => {
                warn!(table, error = %err, "insert failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

/// Logs rows instead of writing them. Used without credentials or with `--dry-run`.
#[derive(Debug, Clone, Default)]
pub struct DryRunSink;

#[async_trait]
impl RowSink for DryRunSink {
    async fn insert(&self, table: &str, row: &Map<String, JsonValue>) -> bool {
        debug!(table, columns = row.len(), row = %JsonValue::Object(row.clone()), "dry-run insert");
        true
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row() -> Map<String, JsonValue> {
        json!({"address_text": "4512 Preston Rd, Dallas, TX 75205", "lead_score": 7, "lead_hash": "abc"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn inserter(server: &MockServer, upsert: bool) -> RestInserter {
        let mut config = RestConfig::new(server.uri(), "service-key");
        config.upsert = upsert;
        RestInserter::new(config).unwrap()
    }

    #[tokio::test]
    async fn insert_posts_row_with_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/redfin_leads"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("prefer", "return=minimal"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        assert!(inserter(&server, false).insert("redfin_leads", &row()).await);
    }

    #[tokio::test]
    async fn upsert_targets_lead_hash_conflicts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/cad_leads"))
            .and(query_param("on_conflict", "lead_hash"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        assert!(inserter(&server, true).insert("cad_leads", &row()).await);

        let requests = server.received_requests().await.unwrap();
        let prefer = requests[0].headers.get("prefer").unwrap().to_str().unwrap();
        assert!(prefer.contains("resolution=merge-duplicates"));
        assert!(prefer.contains("return=minimal"));
    }

    #[tokio::test]
    async fn conflict_is_a_duplicate_and_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_string(r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#),
            )
            .mount(&server)
            .await;

        let sink = inserter(&server, false);
        let err = sink.try_insert("zillow_leads", &row()).await.unwrap_err();
        assert!(matches!(err, InsertError::Duplicate { .. }));
        assert!(!sink.insert("zillow_leads", &row()).await);
    }

    #[tokio::test]
    async fn missing_table_and_server_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/permit_leads"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message":"relation does not exist"}"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/storm_events"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let sink = inserter(&server, false);
        assert!(matches!(
            sink.try_insert("permit_leads", &row()).await,
            Err(InsertError::MissingTable { .. })
        ));
        assert!(matches!(
            sink.try_insert("storm_events", &row()).await,
            Err(InsertError::Rejected { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_store_returns_false() {
        let mut config = RestConfig::new("http://127.0.0.1:9", "k");
        config.timeout = Duration::from_millis(500);
        let sink = RestInserter::new(config).unwrap();
        assert!(!sink.insert("zillow_leads", &row()).await);
    }

    #[tokio::test]
    async fn table_count_reads_content_range() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rest/v1/zillow_leads"))
            .and(header("prefer", "count=exact"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-range", "0-24/3573"))
            .mount(&server)
            .await;

        let count = inserter(&server, false).table_count("zillow_leads").await.unwrap();
        assert_eq!(count, Some(3573));
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/120"), Some(120));
        assert_eq!(parse_content_range_total("0-9/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[tokio::test]
    async fn dry_run_accepts_everything() {
        assert!(DryRunSink.insert("storm_events", &row()).await);
        assert_eq!(DryRunSink.name(), "dry-run");
    }
}
