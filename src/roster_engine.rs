// src/roster_engine.rs

use chrono::{NaiveDate, NaiveTime};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::attendance_session::{AttendanceState, Clock};
use crate::hrms_client::{AttendanceApi, HrmsError};

// --- Roster Model ---

/// One reportee's session as of the last successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMember {
    pub employee_id: String,
    pub employee_name: String,
    pub state: AttendanceState,
}

impl RosterMember {
    /// Checked-out subjects are closed for the day and never selectable.
    pub fn is_selectable(&self) -> bool {
        !self.state.is_checked_out()
    }
}

/// Cohorts the select-all control can operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Every subject still open for the day.
    All,
    /// Subjects that have not checked in yet.
    CheckIn,
    /// Subjects currently checked in.
    CheckOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
    CheckIn,
    CheckOut,
}

/// Identifies the one request allowed in flight at a time. Carrying an id
/// (rather than a bare boolean) lets a stale response be told apart from
/// the latest request if cancellation is ever added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkRequest {
    pub id: u64,
    pub kind: BulkKind,
}

// --- Errors ---

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Another operation is still in flight")]
    Busy,
    #[error("No selected subjects are eligible for this operation")]
    EmptySelection,
    #[error("Unknown subject {0}")]
    UnknownSubject(String),
    #[error("Subject {0} has already closed the day")]
    SubjectClosed(String),
    #[error("Subject {0} is already checked in")]
    SubjectAlreadyCheckedIn(String),
    #[error("Subject {0} is not checked in")]
    SubjectNotCheckedIn(String),
    #[error("Bulk operation failed for {}/{} subjects: {}", .failed.len(), .attempted, .failed.join(", "))]
    BulkRejected {
        attempted: usize,
        failed: Vec<String>,
    },
    #[error(transparent)]
    Backend(#[from] HrmsError),
}

// --- Roster Reconciliation & Bulk Operation Engine ---

/// Owns the reportee roster, the selection set, and the two global bulk
/// time fields. The roster is only ever replaced wholesale by a refetch;
/// bulk mutations never patch it optimistically.
pub struct RosterEngine<A, C> {
    api: A,
    clock: C,
    roster: Vec<RosterMember>,
    selected: HashSet<String>,
    bulk_check_in_time: Option<NaiveTime>,
    bulk_check_out_time: Option<NaiveTime>,
    view_date: Option<NaiveDate>,
    include_all: bool,
    in_flight: Option<BulkRequest>,
    next_request_id: u64,
}

impl<A: AttendanceApi, C: Clock> RosterEngine<A, C> {
    pub fn new(api: A, clock: C) -> Self {
        Self {
            api,
            clock,
            roster: Vec::new(),
            selected: HashSet::new(),
            bulk_check_in_time: None,
            bulk_check_out_time: None,
            view_date: None,
            include_all: false,
            in_flight: None,
            next_request_id: 1,
        }
    }

    pub fn roster(&self) -> &[RosterMember] {
        &self.roster
    }

    pub fn member(&self, employee_id: &str) -> Option<&RosterMember> {
        self.roster.iter().find(|m| m.employee_id == employee_id)
    }

    pub fn is_selected(&self, employee_id: &str) -> bool {
        self.selected.contains(employee_id)
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn in_flight(&self) -> Option<BulkRequest> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Shared `HH:MM` field applied to every subject of the next bulk
    /// check-in; defaults to the clock time when unset.
    pub fn set_bulk_check_in_time(&mut self, time: Option<NaiveTime>) {
        self.bulk_check_in_time = time;
    }

    /// Shared `HH:MM` field for the next bulk check-out, independent of the
    /// check-in field.
    pub fn set_bulk_check_out_time(&mut self, time: Option<NaiveTime>) {
        self.bulk_check_out_time = time;
    }

    // --- Roster Refresh ---

    /// Loads the roster for the given date (today when `None`), replacing
    /// membership and order wholesale. The selection is pruned so it stays
    /// a subset of selectable members.
    pub async fn refresh(
        &mut self,
        date: Option<NaiveDate>,
        include_all: bool,
    ) -> Result<(), RosterError> {
        self.view_date = date;
        self.include_all = include_all;
        self.refetch().await
    }

    async fn refetch(&mut self) -> Result<(), RosterError> {
        let date = self.view_date.unwrap_or_else(|| self.clock.now().date());
        let roster = self.api.roster_status(date, self.include_all).await?;
        info!("Loaded roster with {} members for {}", roster.len(), date);
        self.roster = roster;

        let roster = &self.roster;
        self.selected.retain(|id| {
            roster
                .iter()
                .any(|m| m.employee_id == *id && m.is_selectable())
        });
        Ok(())
    }

    // --- Selection ---

    /// Adds or removes one subject. Unknown and checked-out subjects are
    /// ignored; returns whether the selection changed.
    pub fn toggle_select(&mut self, employee_id: &str) -> bool {
        let Some(member) = self.member(employee_id) else {
            debug!("Ignoring selection toggle for unknown subject {}", employee_id);
            return false;
        };
        if !member.is_selectable() {
            debug!(
                "Ignoring selection toggle for checked-out subject {}",
                employee_id
            );
            return false;
        }
        if !self.selected.remove(employee_id) {
            self.selected.insert(employee_id.to_string());
        }
        true
    }

    fn cohort(&self, mode: SelectMode) -> Vec<String> {
        self.roster
            .iter()
            .filter(|m| match mode {
                SelectMode::All => m.is_selectable(),
                SelectMode::CheckIn => matches!(m.state, AttendanceState::NotCheckedIn),
                SelectMode::CheckOut => m.state.is_checked_in(),
            })
            .map(|m| m.employee_id.clone())
            .collect()
    }

    /// Select-all with toggle semantics: when the cohort is already fully
    /// selected, the same control deselects exactly that cohort (`All`
    /// clears the whole selection); otherwise it adds the cohort, leaving
    /// the rest of the selection alone.
    pub fn select_all(&mut self, mode: SelectMode) {
        let cohort = self.cohort(mode);
        if cohort.is_empty() {
            return;
        }
        let fully_selected = cohort.iter().all(|id| self.selected.contains(id));
        if fully_selected {
            match mode {
                SelectMode::All => self.selected.clear(),
                _ => {
                    for id in &cohort {
                        self.selected.remove(id);
                    }
                }
            }
        } else {
            self.selected.extend(cohort);
        }
    }

    /// Selected subjects eligible for bulk check-in, in roster order.
    pub fn pending_check_in(&self) -> Vec<String> {
        self.roster
            .iter()
            .filter(|m| {
                matches!(m.state, AttendanceState::NotCheckedIn)
                    && self.selected.contains(&m.employee_id)
            })
            .map(|m| m.employee_id.clone())
            .collect()
    }

    /// Selected subjects eligible for bulk check-out, in roster order.
    pub fn pending_check_out(&self) -> Vec<String> {
        self.roster
            .iter()
            .filter(|m| m.state.is_checked_in() && self.selected.contains(&m.employee_id))
            .map(|m| m.employee_id.clone())
            .collect()
    }

    // --- Bulk Execution ---

    pub async fn bulk_check_in(&mut self) -> Result<usize, RosterError> {
        self.run_bulk(BulkKind::CheckIn).await
    }

    pub async fn bulk_check_out(&mut self) -> Result<usize, RosterError> {
        self.run_bulk(BulkKind::CheckOut).await
    }

    async fn run_bulk(&mut self, kind: BulkKind) -> Result<usize, RosterError> {
        if self.in_flight.is_some() {
            return Err(RosterError::Busy);
        }
        let ids = match kind {
            BulkKind::CheckIn => self.pending_check_in(),
            BulkKind::CheckOut => self.pending_check_out(),
        };
        if ids.is_empty() {
            return Err(RosterError::EmptySelection);
        }

        let time = match kind {
            BulkKind::CheckIn => self.bulk_check_in_time,
            BulkKind::CheckOut => self.bulk_check_out_time,
        };
        let at = self
            .clock
            .today_at(time.unwrap_or_else(|| self.clock.now().time()));

        let request = BulkRequest {
            id: self.next_request_id,
            kind,
        };
        self.next_request_id += 1;
        self.in_flight = Some(request);
        info!(
            "Submitting bulk {:?} #{} for {} subjects at {}",
            kind,
            request.id,
            ids.len(),
            at
        );

        let result = match kind {
            BulkKind::CheckIn => self.api.bulk_check_in(&ids, at).await,
            BulkKind::CheckOut => self.api.bulk_check_out(&ids, at).await,
        };
        // The token must not outlive the call, error or not, or the
        // controls stay stuck.
        self.in_flight = None;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Selection stays as-is so the viewer can retry.
                warn!("Bulk {:?} #{} failed: {}", kind, request.id, e);
                return Err(e.into());
            }
        };

        if !outcome.is_complete() {
            // Treated as failed as a unit: the succeeded subset stays
            // applied server-side and shows up on the next refresh.
            warn!(
                "Bulk {:?} #{} rejected for {} of {} subjects",
                kind,
                request.id,
                outcome.failed.len(),
                ids.len()
            );
            return Err(RosterError::BulkRejected {
                attempted: ids.len(),
                failed: outcome.failed,
            });
        }

        // Both partitions of the selection are cleared, then truth is
        // re-derived from the server; nothing is patched locally.
        self.selected.clear();
        self.refetch().await?;
        Ok(ids.len())
    }

    // --- Single-subject Admin Transitions ---

    pub async fn check_in_one(
        &mut self,
        employee_id: &str,
        time: Option<NaiveTime>,
    ) -> Result<(), RosterError> {
        if self.in_flight.is_some() {
            return Err(RosterError::Busy);
        }
        match self.member(employee_id) {
            None => return Err(RosterError::UnknownSubject(employee_id.to_string())),
            Some(m) if m.state.is_checked_out() => {
                return Err(RosterError::SubjectClosed(employee_id.to_string()))
            }
            Some(m) if m.state.is_checked_in() => {
                return Err(RosterError::SubjectAlreadyCheckedIn(employee_id.to_string()))
            }
            Some(_) => {}
        }
        let at = self
            .clock
            .today_at(time.unwrap_or_else(|| self.clock.now().time()));
        self.api.manager_check_in(employee_id, at).await?;
        self.refetch().await
    }

    pub async fn check_out_one(
        &mut self,
        employee_id: &str,
        time: Option<NaiveTime>,
    ) -> Result<(), RosterError> {
        if self.in_flight.is_some() {
            return Err(RosterError::Busy);
        }
        match self.member(employee_id) {
            None => return Err(RosterError::UnknownSubject(employee_id.to_string())),
            Some(m) if m.state.is_checked_out() => {
                return Err(RosterError::SubjectClosed(employee_id.to_string()))
            }
            Some(m) if !m.state.is_checked_in() => {
                return Err(RosterError::SubjectNotCheckedIn(employee_id.to_string()))
            }
            Some(_) => {}
        }
        let at = self
            .clock
            .today_at(time.unwrap_or_else(|| self.clock.now().time()));
        self.api.manager_check_out(employee_id, at).await?;
        self.refetch().await
    }
}
