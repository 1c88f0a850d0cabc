//! Minimal ClickHouse HTTP client.
//!
//! The engine's native surface for this workload is its HTTP interface:
//! statements go in the request body, results come back as `FORMAT JSON`,
//! inserts stream newline-delimited `JSONEachRow`. Credentials travel in the
//! `X-ClickHouse-*` headers and are never logged.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use glc_config::DbConfig;
use glc_core::DataError;

#[derive(Clone, Debug)]
pub struct ClickHouseClient {
    http: reqwest::Client,
    base_url: String,
    database: String,
    user: String,
    password: String,
}

impl ClickHouseClient {
    pub fn new(db: &DbConfig, http_timeout: Duration) -> Result<Self, DataError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| DataError::Config(format!("db http client: {e}")))?;
        Ok(Self {
            http,
            base_url: db.http_url(),
            database: db.database.clone(),
            user: db.user.clone(),
            password: db.password.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn request(&self, query_param: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(&self.base_url)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .query(&[("database", self.database.as_str())]);
        if let Some(q) = query_param {
            req = req.query(&[("query", q)]);
        }
        req
    }

    /// Liveness probe (`GET /ping`).
    pub async fn ping(&self) -> Result<(), DataError> {
        let url = format!("{}/ping", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DataError::TransientSource(format!("db ping failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(DataError::TransientSource(format!(
                "db ping returned http {}",
                resp.status().as_u16()
            )))
        }
    }

    /// Execute a statement that returns no rows (DDL, etc.).
    pub async fn execute(&self, sql: &str) -> Result<(), DataError> {
        debug!(sql, "db execute");
        let resp = self
            .request(None)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| DataError::TransientSource(format!("db request failed: {e}")))?;
        Self::check(resp).await.map(|_| ())
    }

    /// Run a SELECT with `FORMAT JSON` appended; returns the `data` rows.
    pub async fn query_json(&self, sql: &str) -> Result<Vec<Value>, DataError> {
        debug!(sql, "db query");
        let body = format!("{sql} FORMAT JSON");
        let resp = self
            .request(None)
            .body(body)
            .send()
            .await
            .map_err(|e| DataError::TransientSource(format!("db request failed: {e}")))?;
        let text = Self::check(resp).await?;
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| DataError::MalformedInput(format!("db response decode failed: {e}")))?;
        let rows = parsed
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                DataError::MalformedInput("db response missing 'data' array".into())
            })?;
        Ok(rows)
    }

    /// Stream rows into `table` as `JSONEachRow`.
    pub async fn insert_json_each_row(
        &self,
        table: &str,
        rows: &[Value],
    ) -> Result<(), DataError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for row in rows {
            body.push_str(&row.to_string());
            body.push('\n');
        }
        let insert = format!("INSERT INTO {table} FORMAT JSONEachRow");
        debug!(table, rows = rows.len(), "db insert batch");
        let resp = self
            .request(Some(&insert))
            .body(body)
            .send()
            .await
            .map_err(|e| DataError::TransientSource(format!("db insert failed: {e}")))?;
        Self::check(resp).await.map(|_| ())
    }

    async fn check(resp: reqwest::Response) -> Result<String, DataError> {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(text)
        } else {
            Err(DataError::TransientSource(format!(
                "db returned http {}: {}",
                status.as_u16(),
                text.trim()
            )))
        }
    }
}
