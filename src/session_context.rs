// src/session_context.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

// --- Session Context ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Employee,
    Manager,
    Admin,
}

impl Role {
    /// Unknown role strings degrade to `Employee`: the backend enforces
    /// authorization, the client only uses the role to pick affordances.
    pub fn parse(raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "owner" => Role::Admin,
            "manager" | "hr" => Role::Manager,
            _ => Role::Employee,
        }
    }

    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

/// Everything a backend call needs about the signed-in user. Resolved fresh
/// on every call so the latest login state always wins.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub token: String,
    pub org_id: String,
    pub employee_id: String,
    pub role: Role,
}

// The login flow persists its state as a small JSON key-value file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredSession {
    token: Option<String>,
    org_id: Option<String>,
    employee_id: Option<String>,
    role: Option<String>,
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to read session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolves the signed-in context from the session file, falling back to
/// `HRMS_TOKEN` / `HRMS_ORG_ID` / `HRMS_EMPLOYEE_ID` / `HRMS_ROLE`
/// environment variables per field. Returns `None` when any of token, org
/// id, or employee id cannot be resolved; callers must then abort without
/// issuing a request.
pub fn resolve_context(session_file: &Path) -> Result<Option<SessionContext>, ContextError> {
    let stored = if session_file.exists() {
        serde_json::from_str(&fs::read_to_string(session_file)?)?
    } else {
        debug!("Session file {:?} not found", session_file);
        StoredSession::default()
    };

    let token = field_or_env(stored.token, "HRMS_TOKEN");
    let org_id = field_or_env(stored.org_id, "HRMS_ORG_ID");
    let employee_id = field_or_env(stored.employee_id, "HRMS_EMPLOYEE_ID");
    let role = field_or_env(stored.role, "HRMS_ROLE");

    match (token, org_id, employee_id) {
        (Some(token), Some(org_id), Some(employee_id)) => Ok(Some(SessionContext {
            token,
            org_id,
            employee_id,
            role: Role::parse(role.as_deref().unwrap_or("")),
        })),
        (token, org_id, employee_id) => {
            debug!(
                "Session context incomplete (token={}, orgId={}, employeeId={})",
                token.is_some(),
                org_id.is_some(),
                employee_id.is_some()
            );
            Ok(None)
        }
    }
}

// A half-torn-down logout can leave the literal string "undefined" behind
// in the session file; treat it the same as an absent value.
fn usable(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v.as_str() != "undefined")
}

fn field_or_env(value: Option<String>, env_key: &str) -> Option<String> {
    usable(value).or_else(|| usable(env::var(env_key).ok()))
}
