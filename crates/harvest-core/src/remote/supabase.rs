//! `PostgREST` client for the Supabase-hosted harvest tables.

use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{RemoteError, RemoteErrorKind, RemoteResult, RemoteStore};
use crate::models::{
    AttendanceRecord, BucketRecord, HarvestSettings, PickerStatusChange, QualityGrade,
    QueueOperation,
};
use crate::util::{compact_text, is_http_url};

const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=minimal";
const IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates,return=representation";
const RETURN_REPRESENTATION: &str = "return=representation";
const SETTINGS_TABLE: &str = "harvest_settings";

/// Writes queued operations to Supabase over its REST interface.
#[derive(Clone)]
pub struct SupabaseRestClient {
    rest_url: String,
    anon_key: String,
    access_token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for SupabaseRestClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseRestClient")
            .field("rest_url", &self.rest_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl SupabaseRestClient {
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let rest_url = normalize_rest_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::invalid_configuration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            rest_url,
            anon_key,
            access_token: access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    /// Attach the project key and the caller's token (anon key when signed out).
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn upsert<T: Serialize>(&self, table: &str, row: &T) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", MERGE_DUPLICATES)
            .json(row);
        check_status(self.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn apply_status_change(&self, change: &PickerStatusChange) -> RemoteResult<()> {
        let request = self
            .client
            .patch(self.table_url("pickers"))
            .query(&[("id", format!("eq.{}", change.picker_id))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "status": change.status }));
        check_status(self.authorize(request).send().await?).await?;
        Ok(())
    }
}

impl RemoteStore for SupabaseRestClient {
    async fn apply(&self, operation: &QueueOperation) -> RemoteResult<()> {
        match operation {
            QueueOperation::BucketScan(record) => {
                self.upsert(operation.resource(), &BucketRow::try_from(record)?)
                    .await
            }
            QueueOperation::AttendanceCheckIn(record) => {
                self.upsert(operation.resource(), &AttendanceRow::try_from(record)?)
                    .await
            }
            QueueOperation::PickerStatusChange(change) => self.apply_status_change(change).await,
        }
    }

    async fn fetch_settings(&self, orchard_id: &str) -> RemoteResult<Option<HarvestSettings>> {
        let request = self
            .client
            .get(self.table_url(SETTINGS_TABLE))
            .query(&[
                ("orchard_id", format!("eq.{orchard_id}")),
                ("select", "*".to_string()),
                ("limit", "1".to_string()),
            ]);
        let response = check_status(self.authorize(request).send().await?).await?;
        let mut rows = response.json::<Vec<HarvestSettings>>().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn update_settings_if_unchanged(
        &self,
        settings: &HarvestSettings,
        expected_updated_at: i64,
    ) -> RemoteResult<Option<HarvestSettings>> {
        // No stored row yet: the first writer creates it, later ones lose.
        let request = if expected_updated_at == 0 {
            self.client
                .post(self.table_url(SETTINGS_TABLE))
                .query(&[("on_conflict", "orchard_id")])
                .header("Prefer", IGNORE_DUPLICATES)
                .json(settings)
        } else {
            self.client
                .patch(self.table_url(SETTINGS_TABLE))
                .query(&[
                    ("orchard_id", format!("eq.{}", settings.orchard_id)),
                    ("updated_at", format!("eq.{expected_updated_at}")),
                ])
                .header("Prefer", RETURN_REPRESENTATION)
                .json(settings)
        };

        let response = check_status(self.authorize(request).send().await?).await?;
        let mut rows = response.json::<Vec<HarvestSettings>>().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}

/// Normalize a project URL to its REST root (`.../rest/v1`).
pub fn normalize_rest_url(url: &str) -> RemoteResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RemoteError::invalid_configuration(
            "Supabase URL must not be empty",
        ));
    }
    if !is_http_url(trimmed) {
        return Err(RemoteError::invalid_configuration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/rest/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/rest/v1"))
    }
}

#[derive(Debug, Serialize)]
struct BucketRow<'a> {
    id: String,
    picker_id: &'a str,
    orchard_id: &'a str,
    quality_grade: QualityGrade,
    scanned_at: String,
}

impl<'a> TryFrom<&'a BucketRecord> for BucketRow<'a> {
    type Error = RemoteError;

    fn try_from(record: &'a BucketRecord) -> RemoteResult<Self> {
        Ok(Self {
            id: record.id.to_string(),
            picker_id: &record.picker_id,
            orchard_id: &record.orchard_id,
            quality_grade: record.quality_grade,
            scanned_at: rfc3339(record.timestamp)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct AttendanceRow<'a> {
    id: String,
    picker_id: &'a str,
    orchard_id: &'a str,
    date: NaiveDate,
    check_in_time: String,
    check_out_time: Option<String>,
}

impl<'a> TryFrom<&'a AttendanceRecord> for AttendanceRow<'a> {
    type Error = RemoteError;

    fn try_from(record: &'a AttendanceRecord) -> RemoteResult<Self> {
        Ok(Self {
            id: record.id.to_string(),
            picker_id: &record.picker_id,
            orchard_id: &record.orchard_id,
            date: record.date,
            check_in_time: rfc3339(record.check_in_time)?,
            check_out_time: record.check_out_time.map(rfc3339).transpose()?,
        })
    }
}

fn rfc3339(timestamp_ms: i64) -> RemoteResult<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|time| time.to_rfc3339())
        .ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::InvalidRequest,
                format!("timestamp {timestamp_ms} is out of range"),
            )
        })
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(parse_api_error(status, &body))
}

fn parse_api_error(status: StatusCode, body: &str) -> RemoteError {
    let kind = if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RemoteErrorKind::Unavailable {
            status: status.as_u16(),
        }
    } else {
        RemoteErrorKind::Rejected {
            status: status.as_u16(),
        }
    };

    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.details) {
            let mut message = message.trim().to_string();
            if let Some(hint) = payload.hint.filter(|hint| !hint.trim().is_empty()) {
                message = format!("{message} ({})", hint.trim());
            }
            return RemoteError {
                kind,
                code: payload.code.filter(|code| !code.trim().is_empty()),
                message,
            };
        }
    }

    let trimmed = compact_text(body);
    let message = if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    };
    RemoteError::new(kind, message)
}
