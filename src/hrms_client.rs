// src/hrms_client.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::attendance_session::{AttendanceState, Session};
use crate::roster_engine::RosterMember;
use crate::session_context::SessionContext;

// Constants
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const HTTP_TIMEOUT_SECS: u64 = 30;
const SERVER_DATE_FORMAT: &str = "%Y-%m-%d";
const SERVER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// --- Define Specific HRMS Error Type ---

#[derive(Error, Debug)]
pub enum HrmsError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("HRMS API error: Status={status}, Message='{message}'")]
    Api { status: StatusCode, message: String },

    #[error("Malformed session payload: {0}")]
    MalformedPayload(String),
}

// --- HRMS API Wire Structures ---

/// One subject's attendance session as the backend sends it. Flags and
/// timestamps are all optional: older backend builds omit the booleans and
/// only send the times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub has_checked_in: Option<bool>,
    #[serde(default)]
    pub has_checked_out: Option<bool>,
    #[serde(default)]
    pub check_in_time: Option<String>,
    #[serde(default)]
    pub check_out_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEmployee {
    pub employee_id: String,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub has_checked_in: bool,
    #[serde(default)]
    pub has_checked_out: bool,
    #[serde(default)]
    pub check_in_time: Option<String>,
    #[serde(default)]
    pub check_out_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRosterResponse {
    #[serde(default)]
    pub employees: Vec<PendingEmployee>,
}

/// Per-subject result sets of a bulk transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    #[serde(default)]
    pub succeeded: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A dated attendance row, as returned by the history and admin report
/// endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub employee_id: String,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub check_in_time: Option<String>,
    #[serde(default)]
    pub check_out_time: Option<String>,
}

// Error body shape; the backend is not consistent about the field name.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// --- Request Bodies ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckInBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    check_in_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckOutBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    check_out_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManagerCheckInBody {
    employee_id: String,
    check_in_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManagerCheckOutBody {
    employee_id: String,
    check_out_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkCheckInBody {
    employee_ids: Vec<String>,
    check_in_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkCheckOutBody {
    employee_ids: Vec<String>,
    check_out_time: String,
}

// --- Response Envelope Normalization ---

/// The backend sends payloads either bare or wrapped in `{data: ...}`,
/// depending on the route's vintage. Every typed fetch goes through this
/// adapter exactly once; nothing upstream re-checks both shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

// --- Timestamp Handling ---

/// The backend emits timestamps in RFC 3339 on newer routes and as bare
/// `YYYY-MM-DDTHH:MM:SS` on older ones.
pub fn parse_server_time(raw: &str) -> Result<NaiveDateTime, HrmsError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.naive_local());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(parsed);
    }
    NaiveDateTime::parse_from_str(raw, SERVER_TIME_FORMAT)
        .map_err(|_| HrmsError::MalformedPayload(format!("unparseable timestamp '{}'", raw)))
}

pub fn to_server_time(timestamp: NaiveDateTime) -> String {
    timestamp.format(SERVER_TIME_FORMAT).to_string()
}

/// Maps the backend's two status booleans plus nullable timestamps onto the
/// three-variant state. A set `hasCheckedOut` wins over any residual
/// `hasCheckedIn`, so the contradictory combination cannot reach the
/// domain model.
pub fn normalize_state(
    has_checked_in: bool,
    has_checked_out: bool,
    check_in_time: Option<&str>,
    check_out_time: Option<&str>,
) -> Result<AttendanceState, HrmsError> {
    let checked_in = check_in_time.map(parse_server_time).transpose()?;
    let checked_out = check_out_time.map(parse_server_time).transpose()?;

    if has_checked_out || checked_out.is_some() {
        let checked_out = checked_out.ok_or_else(|| {
            HrmsError::MalformedPayload("checked-out subject without a checkOutTime".to_string())
        })?;
        Ok(AttendanceState::CheckedOut {
            checked_in,
            checked_out,
        })
    } else if has_checked_in || checked_in.is_some() {
        let since = checked_in.ok_or_else(|| {
            HrmsError::MalformedPayload("checked-in subject without a checkInTime".to_string())
        })?;
        Ok(AttendanceState::CheckedIn { since })
    } else {
        Ok(AttendanceState::NotCheckedIn)
    }
}

/// The my-status route answers `{message: "..."}` instead of a session
/// record when the subject has no session yet.
pub(crate) fn is_status_message(value: &Value) -> bool {
    value.get("message").is_some()
        && value.get("checkInTime").is_none()
        && value.get("hasCheckedIn").is_none()
}

// --- Attendance API Seam ---

/// The operations the session and roster logic need from the backend.
/// Implemented by [`HrmsClient`] and by the in-memory fake in tests.
#[async_trait]
pub trait AttendanceApi {
    async fn check_in(&self, at: Option<NaiveDateTime>) -> Result<Session, HrmsError>;
    async fn check_out(&self, at: Option<NaiveDateTime>) -> Result<Session, HrmsError>;
    async fn self_status(&self) -> Result<Option<Session>, HrmsError>;
    async fn self_history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, HrmsError>;
    async fn manager_check_in(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
    ) -> Result<Session, HrmsError>;
    async fn manager_check_out(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
    ) -> Result<Session, HrmsError>;
    async fn bulk_check_in(
        &self,
        employee_ids: &[String],
        at: NaiveDateTime,
    ) -> Result<BulkOutcome, HrmsError>;
    async fn bulk_check_out(
        &self,
        employee_ids: &[String],
        at: NaiveDateTime,
    ) -> Result<BulkOutcome, HrmsError>;
    async fn roster_status(
        &self,
        date: NaiveDate,
        include_all: bool,
    ) -> Result<Vec<RosterMember>, HrmsError>;
    async fn admin_daily(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, HrmsError>;
    async fn admin_all(&self) -> Result<Vec<AttendanceRecord>, HrmsError>;
}

// --- HRMS API Client Implementation ---

#[derive(Clone)]
pub struct HrmsClient {
    http_client: Client,
    base_url: String,
    token: String,
    org_id: String,
    employee_id: String,
}

impl HrmsClient {
    pub fn new(base_url: &str, context: &SessionContext) -> Result<Self, HrmsError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        // Fail on a bad base URL here rather than on the first request.
        Url::parse(base_url)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: context.token.clone(),
            org_id: context.org_id.clone(),
            employee_id: context.employee_id.clone(),
        })
    }

    // The backend route segment really is spelled "attendence".
    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/org/{}/attendence/{}", self.base_url, self.org_id, endpoint)
    }

    fn build_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, HrmsError> {
        let url = self.endpoint_url(endpoint);
        Url::parse(&url)?;

        Ok(self
            .http_client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json"))
    }

    /// The failure-containment boundary: transport errors, non-2xx
    /// statuses, and malformed payloads all come back as `HrmsError`
    /// values. Nothing above this sees a raw transport failure.
    async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, HrmsError> {
        let request = match request_builder.build() {
            Ok(request) => request,
            Err(e) => {
                error!("Request build failed for '{}': {}", context_msg, e);
                return Err(HrmsError::Request(e));
            }
        };
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let response = match self.http_client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    "HTTP execution failed before receiving response for '{}' (URL: {}): {}",
                    context_msg, request_url, e
                );
                return Err(HrmsError::Request(e));
            }
        };

        let status = response.status();
        debug!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        if status.is_success() {
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to read response body for '{}': {}", context_msg, e);
                    return Err(HrmsError::Request(e));
                }
            };
            debug!(
                "Raw success response body for '{}': {}",
                context_msg,
                String::from_utf8_lossy(&bytes)
            );
            match serde_json::from_slice::<Envelope<T>>(&bytes) {
                Ok(envelope) => Ok(envelope.into_inner()),
                Err(e) => {
                    error!(
                        "JSON deserialization failed for '{}' (URL: {}): {}",
                        context_msg, request_url, e
                    );
                    Err(HrmsError::Json(e))
                }
            }
        } else {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            error!(
                "API error response for '{}': Status={}, Body='{}'",
                context_msg, status, error_body
            );
            let message = match serde_json::from_str::<ErrorBody>(&error_body) {
                Ok(parsed) => parsed.message.or(parsed.error).unwrap_or(error_body),
                Err(_) => error_body,
            };
            Err(HrmsError::Api { status, message })
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        context_msg: &str,
    ) -> Result<T, HrmsError> {
        let request = self.build_request(Method::GET, endpoint)?.query(query);
        self.send_and_deserialize(request, context_msg).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        context_msg: &str,
    ) -> Result<T, HrmsError> {
        let request = self.build_request(Method::POST, endpoint)?.json(body);
        self.send_and_deserialize(request, context_msg).await
    }

    fn normalize_session(&self, record: SessionRecord) -> Result<Session, HrmsError> {
        let state = normalize_state(
            record.has_checked_in.unwrap_or(false),
            record.has_checked_out.unwrap_or(false),
            record.check_in_time.as_deref(),
            record.check_out_time.as_deref(),
        )?;
        Ok(Session {
            subject_id: record
                .employee_id
                .unwrap_or_else(|| self.employee_id.clone()),
            state,
        })
    }
}

fn normalize_roster(response: PendingRosterResponse) -> Result<Vec<RosterMember>, HrmsError> {
    response
        .employees
        .into_iter()
        .map(|employee| {
            let state = normalize_state(
                employee.has_checked_in,
                employee.has_checked_out,
                employee.check_in_time.as_deref(),
                employee.check_out_time.as_deref(),
            )?;
            Ok(RosterMember {
                employee_name: employee
                    .employee_name
                    .unwrap_or_else(|| employee.employee_id.clone()),
                employee_id: employee.employee_id,
                state,
            })
        })
        .collect()
}

#[async_trait]
impl AttendanceApi for HrmsClient {
    async fn check_in(&self, at: Option<NaiveDateTime>) -> Result<Session, HrmsError> {
        info!("Checking in (requested time: {:?})...", at);
        let body = CheckInBody {
            check_in_time: at.map(to_server_time),
        };
        let record: SessionRecord = self.post_json("check-in", &body, "self check-in").await?;
        self.normalize_session(record)
    }

    async fn check_out(&self, at: Option<NaiveDateTime>) -> Result<Session, HrmsError> {
        info!("Checking out (requested time: {:?})...", at);
        let body = CheckOutBody {
            check_out_time: at.map(to_server_time),
        };
        let record: SessionRecord = self.post_json("check-out", &body, "self check-out").await?;
        self.normalize_session(record)
    }

    async fn self_status(&self) -> Result<Option<Session>, HrmsError> {
        let value: Value = match self.get_json("my-status", &[], "self status").await {
            Ok(value) => value,
            // No session today comes back as 404 from some backend builds.
            Err(HrmsError::Api { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        if is_status_message(&value) {
            return Ok(None);
        }
        let record: SessionRecord = serde_json::from_value(value)?;
        Ok(Some(self.normalize_session(record)?))
    }

    async fn self_history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, HrmsError> {
        info!("Fetching own attendance history from {} to {}...", start, end);
        self.get_json(
            "my-history",
            &[
                ("startDate", start.format(SERVER_DATE_FORMAT).to_string()),
                ("endDate", end.format(SERVER_DATE_FORMAT).to_string()),
            ],
            "self history",
        )
        .await
    }

    async fn manager_check_in(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
    ) -> Result<Session, HrmsError> {
        info!("Checking in {} at {}...", employee_id, at);
        let body = ManagerCheckInBody {
            employee_id: employee_id.to_string(),
            check_in_time: to_server_time(at),
        };
        let record: SessionRecord = self
            .post_json("manager-checkin", &body, "manager check-in")
            .await?;
        self.normalize_session(record)
    }

    async fn manager_check_out(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
    ) -> Result<Session, HrmsError> {
        info!("Checking out {} at {}...", employee_id, at);
        let body = ManagerCheckOutBody {
            employee_id: employee_id.to_string(),
            check_out_time: to_server_time(at),
        };
        let record: SessionRecord = self
            .post_json("manager-checkout", &body, "manager check-out")
            .await?;
        self.normalize_session(record)
    }

    async fn bulk_check_in(
        &self,
        employee_ids: &[String],
        at: NaiveDateTime,
    ) -> Result<BulkOutcome, HrmsError> {
        info!("Bulk check-in for {} subjects at {}...", employee_ids.len(), at);
        let body = BulkCheckInBody {
            employee_ids: employee_ids.to_vec(),
            check_in_time: to_server_time(at),
        };
        let outcome: BulkOutcome = self
            .post_json("bulk-manager-checkin", &body, "bulk check-in")
            .await?;
        if !outcome.is_complete() {
            warn!(
                "Bulk check-in partially failed for: {}",
                outcome.failed.join(", ")
            );
        }
        Ok(outcome)
    }

    async fn bulk_check_out(
        &self,
        employee_ids: &[String],
        at: NaiveDateTime,
    ) -> Result<BulkOutcome, HrmsError> {
        info!(
            "Bulk check-out for {} subjects at {}...",
            employee_ids.len(),
            at
        );
        let body = BulkCheckOutBody {
            employee_ids: employee_ids.to_vec(),
            check_out_time: to_server_time(at),
        };
        let outcome: BulkOutcome = self
            .post_json("bulk-manager-checkout", &body, "bulk check-out")
            .await?;
        if !outcome.is_complete() {
            warn!(
                "Bulk check-out partially failed for: {}",
                outcome.failed.join(", ")
            );
        }
        Ok(outcome)
    }

    async fn roster_status(
        &self,
        date: NaiveDate,
        include_all: bool,
    ) -> Result<Vec<RosterMember>, HrmsError> {
        info!("Fetching pending roster for {} (includeAll={})...", date, include_all);
        let response: PendingRosterResponse = self
            .get_json(
                "pending-checkins",
                &[
                    ("date", date.format(SERVER_DATE_FORMAT).to_string()),
                    ("includeAll", include_all.to_string()),
                ],
                "pending roster",
            )
            .await?;
        normalize_roster(response)
    }

    async fn admin_daily(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, HrmsError> {
        info!("Fetching daily attendance records for {}...", date);
        self.get_json(
            "admin/daily",
            &[("date", date.format(SERVER_DATE_FORMAT).to_string())],
            "daily records",
        )
        .await
    }

    async fn admin_all(&self) -> Result<Vec<AttendanceRecord>, HrmsError> {
        info!("Fetching all attendance records...");
        self.get_json("admin/all", &[], "all records").await
    }
}
