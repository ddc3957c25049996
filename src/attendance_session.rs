// src/attendance_session.rs

use chrono::{Local, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::hrms_client::{AttendanceApi, HrmsError};

// --- Attendance State ---

/// A subject's attendance for the current day. `CheckedOut` is terminal:
/// no further transition is permitted until the server opens a fresh day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceState {
    NotCheckedIn,
    CheckedIn {
        since: NaiveDateTime,
    },
    CheckedOut {
        checked_in: Option<NaiveDateTime>,
        checked_out: NaiveDateTime,
    },
}

impl AttendanceState {
    pub fn is_checked_in(&self) -> bool {
        matches!(self, AttendanceState::CheckedIn { .. })
    }

    pub fn is_checked_out(&self) -> bool {
        matches!(self, AttendanceState::CheckedOut { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttendanceState::NotCheckedIn => "not checked in",
            AttendanceState::CheckedIn { .. } => "checked in",
            AttendanceState::CheckedOut { .. } => "checked out",
        }
    }
}

/// One subject's normalized session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub subject_id: String,
    pub state: AttendanceState,
}

// --- Clock ---

/// Wall-clock source. Everything that needs "now" or "today" goes through
/// this seam so tests can drive time explicitly.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    fn today_at(&self, time: NaiveTime) -> NaiveDateTime {
        self.now().date().and_time(time)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

// --- Elapsed Timer ---

/// Derived display state only; nothing here is persisted. The counter is a
/// pure function of (started_at, now).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElapsedTimer {
    started_at: Option<NaiveDateTime>,
}

impl ElapsedTimer {
    pub fn start(&mut self, at: NaiveDateTime) {
        self.started_at = Some(at);
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed_seconds(&self, now: NaiveDateTime) -> u64 {
        match self.started_at {
            Some(started) => now.signed_duration_since(started).num_seconds().max(0) as u64,
            None => 0,
        }
    }
}

/// Renders a second count as zero-padded `HH:MM:SS`. Hours are not wrapped
/// at 24: a forgotten check-out can legitimately run past a full day.
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

// --- Session Events ---

/// Emitted after a transition has been confirmed by the backend, so a
/// coordinator can refresh dependent views. One-way notification only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    CheckedIn {
        subject_id: String,
        at: NaiveDateTime,
    },
    CheckedOut {
        subject_id: String,
        at: NaiveDateTime,
    },
}

// --- Errors ---

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Already checked in today")]
    AlreadyCheckedIn,
    #[error("Not checked in")]
    NotCheckedIn,
    #[error("Attendance for today is closed after check-out")]
    DayClosed,
    #[error(transparent)]
    Backend(#[from] HrmsError),
}

// --- Self Check-in/Check-out State Machine ---

/// Per-user state machine: `NotCheckedIn -> CheckedIn -> CheckedOut`.
/// Transitions are confirmed by the backend before local state changes;
/// a failed call leaves state and timer untouched.
pub struct SelfAttendance<A, C> {
    api: A,
    clock: C,
    subject_id: String,
    state: AttendanceState,
    login_time: Option<NaiveTime>,
    logout_time: Option<NaiveTime>,
    timer: ElapsedTimer,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl<A: AttendanceApi, C: Clock> SelfAttendance<A, C> {
    pub fn new(api: A, clock: C, subject_id: impl Into<String>) -> Self {
        Self {
            api,
            clock,
            subject_id: subject_id.into(),
            state: AttendanceState::NotCheckedIn,
            login_time: None,
            logout_time: None,
            timer: ElapsedTimer::default(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &AttendanceState {
        &self.state
    }

    /// Manual `HH:MM` override for the next check-in; defaults to the
    /// current clock time when unset.
    pub fn set_login_time(&mut self, time: Option<NaiveTime>) {
        self.login_time = time;
    }

    /// Manual `HH:MM` override for the next check-out, independent of the
    /// login-time field.
    pub fn set_logout_time(&mut self, time: Option<NaiveTime>) {
        self.logout_time = time;
    }

    pub fn can_check_in(&self) -> bool {
        matches!(self.state, AttendanceState::NotCheckedIn)
    }

    pub fn can_check_out(&self) -> bool {
        self.state.is_checked_in()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.timer.elapsed_seconds(self.clock.now())
    }

    /// Re-reads today's session from the backend and replaces local state.
    pub async fn load_status(&mut self) -> Result<(), SessionError> {
        let session = self.api.self_status().await?;
        self.state = match session {
            Some(session) => session.state,
            None => AttendanceState::NotCheckedIn,
        };
        // A reloaded session counts elapsed time from the recorded
        // check-in; anything else means the timer is idle.
        match &self.state {
            AttendanceState::CheckedIn { since } => self.timer.start(*since),
            _ => self.timer.stop(),
        }
        debug!(
            "Loaded self status for {}: {}",
            self.subject_id,
            self.state.label()
        );
        Ok(())
    }

    /// `NotCheckedIn -> CheckedIn`. Rejected locally, without a request,
    /// from any other state.
    pub async fn check_in(&mut self) -> Result<NaiveDateTime, SessionError> {
        match self.state {
            AttendanceState::NotCheckedIn => {}
            AttendanceState::CheckedIn { .. } => return Err(SessionError::AlreadyCheckedIn),
            AttendanceState::CheckedOut { .. } => return Err(SessionError::DayClosed),
        }

        let requested = self
            .clock
            .today_at(self.login_time.unwrap_or_else(|| self.clock.now().time()));
        let session = self.api.check_in(Some(requested)).await?;

        let since = match session.state {
            AttendanceState::CheckedIn { since } => since,
            _ => requested,
        };
        self.state = AttendanceState::CheckedIn { since };
        // A fresh transition counts from zero, even when the login time was
        // back-dated by hand.
        self.timer.start(self.clock.now());
        info!("{} checked in at {}", self.subject_id, since);
        self.notify(SessionEvent::CheckedIn {
            subject_id: self.subject_id.clone(),
            at: since,
        });
        Ok(since)
    }

    /// `CheckedIn -> CheckedOut` (terminal). Resets the elapsed timer on
    /// success.
    pub async fn check_out(&mut self) -> Result<NaiveDateTime, SessionError> {
        let checked_in = match self.state {
            AttendanceState::CheckedIn { since } => Some(since),
            AttendanceState::NotCheckedIn => return Err(SessionError::NotCheckedIn),
            AttendanceState::CheckedOut { .. } => return Err(SessionError::DayClosed),
        };

        let requested = self
            .clock
            .today_at(self.logout_time.unwrap_or_else(|| self.clock.now().time()));
        let session = self.api.check_out(Some(requested)).await?;

        let checked_out = match session.state {
            AttendanceState::CheckedOut { checked_out, .. } => checked_out,
            _ => requested,
        };
        self.state = AttendanceState::CheckedOut {
            checked_in,
            checked_out,
        };
        self.timer.stop();
        info!("{} checked out at {}", self.subject_id, checked_out);
        self.notify(SessionEvent::CheckedOut {
            subject_id: self.subject_id.clone(),
            at: checked_out,
        });
        Ok(checked_out)
    }

    fn notify(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // The coordinator may have gone away; the transition itself
            // already succeeded, so a dead receiver is not an error.
            let _ = events.send(event);
        }
    }
}
