use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::Row;

use super::Store;
use crate::models::IdempotencyStats;

/// Stored outcome of a previously executed mutating request
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub endpoint: String,
    pub method: String,
    pub request_hash: String,
    pub response_data: serde_json::Value,
    pub status_code: u16,
}

impl Store {
    pub async fn get_idempotency_record(
        &self,
        request_id: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT endpoint, method, request_hash, response_data, status_code FROM idempotency_records WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| IdempotencyRecord {
            endpoint: row.get("endpoint"),
            method: row.get("method"),
            request_hash: row.get("request_hash"),
            response_data: serde_json::from_str(&row.get::<String, _>("response_data"))
                .unwrap_or(serde_json::Value::Null),
            status_code: row.get::<i64, _>("status_code") as u16,
        }))
    }

    /// Store a response for future replay. INSERT OR IGNORE swallows the
    /// unique-key race when another writer stored the same request first.
    /// Records are semantically permanent; expires_at holds a far-future
    /// sentinel for storage engines that require one.
    pub async fn store_idempotency_record(
        &self,
        request_id: &str,
        endpoint: &str,
        method: &str,
        request_hash: &str,
        request_params: &serde_json::Value,
        response_data: &serde_json::Value,
        status_code: u16,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + Duration::days(36500);

        sqlx::query(
            r#"INSERT OR IGNORE INTO idempotency_records
               (request_id, endpoint, method, request_hash, request_params, response_data, status_code, created_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(request_id)
        .bind(endpoint)
        .bind(method)
        .bind(request_hash)
        .bind(serde_json::to_string(request_params)?)
        .bind(serde_json::to_string(response_data)?)
        .bind(status_code as i64)
        .bind(now)
        .bind(expires_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn idempotency_stats(&self) -> Result<IdempotencyStats> {
        let (total_records,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM idempotency_records")
                .fetch_one(self.pool())
                .await?;
        Ok(IdempotencyStats { total_records })
    }
}
