// src/test_support.rs

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::attendance_session::{AttendanceState, Clock, Session};
use crate::hrms_client::{AttendanceApi, AttendanceRecord, BulkOutcome, HrmsError};
use crate::roster_engine::RosterMember;

// --- Test Clock ---

#[derive(Clone)]
pub struct TestClock {
    current_time: Arc<Mutex<NaiveDateTime>>,
}

impl TestClock {
    pub fn new(datetime_str: &str) -> Self {
        let dt = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Failed to parse datetime string in TestClock::new");
        Self {
            current_time: Arc::new(Mutex::new(dt)),
        }
    }

    pub fn set_time(&self, datetime_str: &str) {
        *self.current_time.lock().unwrap() =
            NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
                .expect("Failed to parse datetime string in TestClock::set_time");
    }

    pub fn advance(&self, duration: Duration) {
        *self.current_time.lock().unwrap() += duration;
    }
}

impl Clock for TestClock {
    fn now(&self) -> NaiveDateTime {
        *self.current_time.lock().unwrap()
    }
}

// --- Recorded Backend Calls ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRecord {
    CheckIn { at: Option<NaiveDateTime> },
    CheckOut { at: Option<NaiveDateTime> },
    SelfStatus,
    ManagerCheckIn { employee_id: String, at: NaiveDateTime },
    ManagerCheckOut { employee_id: String, at: NaiveDateTime },
    BulkCheckIn { ids: Vec<String>, at: NaiveDateTime },
    BulkCheckOut { ids: Vec<String>, at: NaiveDateTime },
    RosterStatus { date: NaiveDate, include_all: bool },
    SelfHistory { start: NaiveDate, end: NaiveDate },
    AdminDaily { date: NaiveDate },
    AdminAll,
}

// --- In-memory Fake Backend ---

#[derive(Default)]
struct FakeState {
    self_session: Option<Session>,
    roster: Vec<RosterMember>,
    records: Vec<AttendanceRecord>,
    // When set, the next call fails with this message and the flag clears.
    fail_next: Option<String>,
    // Bulk transitions for these ids land in the `failed` set but every
    // other id is applied, mirroring a backend that commits per subject.
    reject_in_bulk: HashSet<String>,
    calls: Vec<CallRecord>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_self_session(&self, session: Option<Session>) {
        self.state.lock().unwrap().self_session = session;
    }

    pub fn set_roster(&self, roster: Vec<RosterMember>) {
        self.state.lock().unwrap().roster = roster;
    }

    pub fn set_records(&self, records: Vec<AttendanceRecord>) {
        self.state.lock().unwrap().records = records;
    }

    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn reject_in_bulk(&self, employee_id: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_in_bulk
            .insert(employee_id.to_string());
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn roster_fetches(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches!(c, CallRecord::RosterStatus { .. }))
            .count()
    }

    pub fn roster_member(&self, employee_id: &str) -> Option<RosterMember> {
        self.state
            .lock()
            .unwrap()
            .roster
            .iter()
            .find(|m| m.employee_id == employee_id)
            .cloned()
    }

    fn begin_call(&self, call: CallRecord) -> Result<(), HrmsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(message) = state.fail_next.take() {
            return Err(HrmsError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AttendanceApi for FakeBackend {
    async fn check_in(&self, at: Option<NaiveDateTime>) -> Result<Session, HrmsError> {
        self.begin_call(CallRecord::CheckIn { at })?;
        let since = at.expect("FakeBackend expects an explicit check-in time");
        let session = Session {
            subject_id: "self".to_string(),
            state: AttendanceState::CheckedIn { since },
        };
        self.state.lock().unwrap().self_session = Some(session.clone());
        Ok(session)
    }

    async fn check_out(&self, at: Option<NaiveDateTime>) -> Result<Session, HrmsError> {
        self.begin_call(CallRecord::CheckOut { at })?;
        let checked_out = at.expect("FakeBackend expects an explicit check-out time");
        let mut state = self.state.lock().unwrap();
        let checked_in = match &state.self_session {
            Some(Session {
                state: AttendanceState::CheckedIn { since },
                ..
            }) => Some(*since),
            _ => None,
        };
        let session = Session {
            subject_id: "self".to_string(),
            state: AttendanceState::CheckedOut {
                checked_in,
                checked_out,
            },
        };
        state.self_session = Some(session.clone());
        Ok(session)
    }

    async fn self_status(&self) -> Result<Option<Session>, HrmsError> {
        self.begin_call(CallRecord::SelfStatus)?;
        Ok(self.state.lock().unwrap().self_session.clone())
    }

    async fn self_history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, HrmsError> {
        self.begin_call(CallRecord::SelfHistory { start, end })?;
        Ok(self.state.lock().unwrap().records.clone())
    }

    async fn manager_check_in(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
    ) -> Result<Session, HrmsError> {
        self.begin_call(CallRecord::ManagerCheckIn {
            employee_id: employee_id.to_string(),
            at,
        })?;
        let mut state = self.state.lock().unwrap();
        if let Some(member) = state
            .roster
            .iter_mut()
            .find(|m| m.employee_id == employee_id)
        {
            member.state = AttendanceState::CheckedIn { since: at };
        }
        Ok(Session {
            subject_id: employee_id.to_string(),
            state: AttendanceState::CheckedIn { since: at },
        })
    }

    async fn manager_check_out(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
    ) -> Result<Session, HrmsError> {
        self.begin_call(CallRecord::ManagerCheckOut {
            employee_id: employee_id.to_string(),
            at,
        })?;
        let mut state = self.state.lock().unwrap();
        let mut checked_in = None;
        if let Some(member) = state
            .roster
            .iter_mut()
            .find(|m| m.employee_id == employee_id)
        {
            if let AttendanceState::CheckedIn { since } = member.state {
                checked_in = Some(since);
            }
            member.state = AttendanceState::CheckedOut {
                checked_in,
                checked_out: at,
            };
        }
        Ok(Session {
            subject_id: employee_id.to_string(),
            state: AttendanceState::CheckedOut {
                checked_in,
                checked_out: at,
            },
        })
    }

    async fn bulk_check_in(
        &self,
        employee_ids: &[String],
        at: NaiveDateTime,
    ) -> Result<BulkOutcome, HrmsError> {
        self.begin_call(CallRecord::BulkCheckIn {
            ids: employee_ids.to_vec(),
            at,
        })?;
        let mut state = self.state.lock().unwrap();
        let mut outcome = BulkOutcome::default();
        for id in employee_ids {
            if state.reject_in_bulk.contains(id) {
                outcome.failed.push(id.clone());
                continue;
            }
            if let Some(member) = state.roster.iter_mut().find(|m| &m.employee_id == id) {
                member.state = AttendanceState::CheckedIn { since: at };
            }
            outcome.succeeded.push(id.clone());
        }
        Ok(outcome)
    }

    async fn bulk_check_out(
        &self,
        employee_ids: &[String],
        at: NaiveDateTime,
    ) -> Result<BulkOutcome, HrmsError> {
        self.begin_call(CallRecord::BulkCheckOut {
            ids: employee_ids.to_vec(),
            at,
        })?;
        let mut state = self.state.lock().unwrap();
        let mut outcome = BulkOutcome::default();
        for id in employee_ids {
            if state.reject_in_bulk.contains(id) {
                outcome.failed.push(id.clone());
                continue;
            }
            if let Some(member) = state.roster.iter_mut().find(|m| &m.employee_id == id) {
                let checked_in = match member.state {
                    AttendanceState::CheckedIn { since } => Some(since),
                    _ => None,
                };
                member.state = AttendanceState::CheckedOut {
                    checked_in,
                    checked_out: at,
                };
            }
            outcome.succeeded.push(id.clone());
        }
        Ok(outcome)
    }

    async fn roster_status(
        &self,
        date: NaiveDate,
        include_all: bool,
    ) -> Result<Vec<RosterMember>, HrmsError> {
        self.begin_call(CallRecord::RosterStatus { date, include_all })?;
        Ok(self.state.lock().unwrap().roster.clone())
    }

    async fn admin_daily(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, HrmsError> {
        self.begin_call(CallRecord::AdminDaily { date })?;
        Ok(self.state.lock().unwrap().records.clone())
    }

    async fn admin_all(&self) -> Result<Vec<AttendanceRecord>, HrmsError> {
        self.begin_call(CallRecord::AdminAll)?;
        Ok(self.state.lock().unwrap().records.clone())
    }
}

// --- Shared Test Fixtures ---

pub fn member(employee_id: &str, state: AttendanceState) -> RosterMember {
    RosterMember {
        employee_id: employee_id.to_string(),
        employee_name: format!("Employee {}", employee_id),
        state,
    }
}

pub fn checked_in(datetime_str: &str) -> AttendanceState {
    AttendanceState::CheckedIn {
        since: NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Failed to parse datetime string in checked_in fixture"),
    }
}

pub fn checked_out(datetime_str: &str) -> AttendanceState {
    AttendanceState::CheckedOut {
        checked_in: None,
        checked_out: NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Failed to parse datetime string in checked_out fixture"),
    }
}
