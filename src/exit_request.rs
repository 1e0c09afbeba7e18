//! The exit request aggregate root and its draft/patch inputs
use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ExitError, Violations};
use crate::lifecycle::{ActivityEntry, ExitStatus};
use crate::types::{Date, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitType {
    #[n(0)]
    Resignation,
    #[n(1)]
    Termination,
    #[n(2)]
    Absconded,
    #[n(3)]
    ContractEnd,
}

impl ExitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitType::Resignation => "Resignation",
            ExitType::Termination => "Termination",
            ExitType::Absconded => "Absconded",
            ExitType::ContractEnd => "Contract End",
        }
    }
}

impl fmt::Display for ExitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitType {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "resignation" => Ok(ExitType::Resignation),
            "termination" => Ok(ExitType::Termination),
            "absconded" => Ok(ExitType::Absconded),
            "contractend" => Ok(ExitType::ContractEnd),
            _ => Err(ExitError::invalid("exit_type", format!("unknown exit type '{s}'"))),
        }
    }
}

/// Write-once instants recording when the request entered each stage.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusStamps {
    #[n(0)]
    pub manager_approved_at: Option<TimeStamp<Utc>>,
    #[n(1)]
    pub hr_approved_at: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub clearance_completed_at: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub settlement_completed_at: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
}

impl StatusStamps {
    /// The stamp written on entry into `status`, if that state carries one.
    pub fn slot_mut(&mut self, status: ExitStatus) -> Option<&mut Option<TimeStamp<Utc>>> {
        match status {
            ExitStatus::ManagerApproved => Some(&mut self.manager_approved_at),
            ExitStatus::HrApproved => Some(&mut self.hr_approved_at),
            ExitStatus::ClearanceCompleted => Some(&mut self.clearance_completed_at),
            ExitStatus::SettlementPending => Some(&mut self.settlement_completed_at),
            ExitStatus::Completed => Some(&mut self.completed_at),
            ExitStatus::Cancelled => Some(&mut self.cancelled_at),
            ExitStatus::Initiated | ExitStatus::ClearancePending => None,
        }
    }

    pub fn get(&self, status: ExitStatus) -> Option<&TimeStamp<Utc>> {
        match status {
            ExitStatus::ManagerApproved => self.manager_approved_at.as_ref(),
            ExitStatus::HrApproved => self.hr_approved_at.as_ref(),
            ExitStatus::ClearanceCompleted => self.clearance_completed_at.as_ref(),
            ExitStatus::SettlementPending => self.settlement_completed_at.as_ref(),
            ExitStatus::Completed => self.completed_at.as_ref(),
            ExitStatus::Cancelled => self.cancelled_at.as_ref(),
            ExitStatus::Initiated | ExitStatus::ClearancePending => None,
        }
    }
}

// key is the bech32 id, value is this struct encoded into cbor
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ExitRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String, // the exiting employee
    #[n(2)]
    pub manager_id: String,
    #[n(3)]
    pub resignation_date: Date,
    #[n(4)]
    pub last_working_day: Date,
    #[n(5)]
    pub exit_type: ExitType,
    #[n(6)]
    pub reason: Option<String>,
    #[n(7)]
    pub status: ExitStatus,
    #[n(8)]
    pub stamps: StatusStamps,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
    #[n(11)]
    pub version: u64, // bumped on every stored write
    #[n(12)]
    pub activity_log: Vec<ActivityEntry>,
}

impl ExitRequest {
    /// Active requests block the employee from opening another one.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Notice actually served, counted from resignation to the last working day.
    pub fn notice_days_served(&self) -> i64 {
        self.resignation_date.days_until(self.last_working_day)
    }

    pub(crate) fn record(&mut self, entry: ActivityEntry) {
        self.updated_at = entry.timestamp.clone();
        self.version += 1;
        self.activity_log.push(entry);
    }
}

// used for constructing new requests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExitRequestDraft {
    user_id: Option<String>,
    manager_id: Option<String>,
    resignation_date: Option<Date>,
    last_working_day: Option<Date>,
    exit_type: Option<ExitType>,
    reason: Option<String>,
}

impl ExitRequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
    pub fn set_manager(mut self, manager_id: impl Into<String>) -> Self {
        self.manager_id = Some(manager_id.into());
        self
    }
    pub fn set_resignation_date(mut self, date: Date) -> Self {
        self.resignation_date = Some(date);
        self
    }
    pub fn set_last_working_day(mut self, date: Date) -> Self {
        self.last_working_day = Some(date);
        self
    }
    pub fn set_exit_type(mut self, exit_type: ExitType) -> Self {
        self.exit_type = Some(exit_type);
        self
    }
    pub fn set_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    // Checks every field and reports all failures together, then builds the initiated request
    pub fn finalise(self, id: String) -> Result<ExitRequest, ExitError> {
        let mut violations = Violations::new();

        let user_id = self.user_id.filter(|s| !s.trim().is_empty());
        let manager_id = self.manager_id.filter(|s| !s.trim().is_empty());
        if user_id.is_none() {
            violations.push("user_id", "is required");
        }
        if manager_id.is_none() {
            violations.push("manager_id", "is required");
        }
        if user_id.is_some() && user_id == manager_id {
            violations.push("manager_id", "an employee cannot be their own approving manager");
        }
        if self.resignation_date.is_none() {
            violations.push("resignation_date", "is required");
        }
        if self.last_working_day.is_none() {
            violations.push("last_working_day", "is required");
        }
        if let (Some(resigned), Some(last)) = (self.resignation_date, self.last_working_day) {
            if last < resigned {
                violations.push(
                    "last_working_day",
                    format!("{last} is before the resignation date {resigned}"),
                );
            }
        }
        if self.exit_type.is_none() {
            violations.push("exit_type", "is required");
        }
        violations.into_result()?;

        match (
            user_id,
            manager_id,
            self.resignation_date,
            self.last_working_day,
            self.exit_type,
        ) {
            (Some(user_id), Some(manager_id), Some(resignation_date), Some(last_working_day), Some(exit_type)) => {
                let now = TimeStamp::new();
                Ok(ExitRequest {
                    id,
                    user_id,
                    manager_id,
                    resignation_date,
                    last_working_day,
                    exit_type,
                    reason: self.reason,
                    status: ExitStatus::Initiated,
                    stamps: StatusStamps::default(),
                    created_at: now.clone(),
                    updated_at: now,
                    version: 0,
                    activity_log: vec![],
                })
            }
            _ => Err(ExitError::Internal("draft passed validation with missing fields".into())),
        }
    }
}

/// Field edits to an existing request. Never touches status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExitRequestPatch {
    pub resignation_date: Option<Date>,
    pub last_working_day: Option<Date>,
    pub exit_type: Option<ExitType>,
    pub reason: Option<String>,
    pub manager_id: Option<String>,
}

impl ExitRequestPatch {
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields = vec![];
        if self.resignation_date.is_some() {
            fields.push("resignation_date".to_string());
        }
        if self.last_working_day.is_some() {
            fields.push("last_working_day".to_string());
        }
        if self.exit_type.is_some() {
            fields.push("exit_type".to_string());
        }
        if self.reason.is_some() {
            fields.push("reason".to_string());
        }
        if self.manager_id.is_some() {
            fields.push("manager_id".to_string());
        }
        fields
    }

    /// Returns a patched copy of `request`, re-checking the date invariant on the merged values.
    pub fn apply_to(&self, request: &ExitRequest) -> Result<ExitRequest, ExitError> {
        let mut violations = Violations::new();
        if self.changed_fields().is_empty() {
            violations.push("patch", "contains no fields to update");
        }

        let mut next = request.clone();
        if let Some(date) = self.resignation_date {
            next.resignation_date = date;
        }
        if let Some(date) = self.last_working_day {
            next.last_working_day = date;
        }
        if let Some(exit_type) = self.exit_type {
            next.exit_type = exit_type;
        }
        if let Some(reason) = &self.reason {
            next.reason = Some(reason.clone());
        }
        if let Some(manager_id) = &self.manager_id {
            if manager_id.trim().is_empty() {
                violations.push("manager_id", "must not be empty");
            } else if *manager_id == next.user_id {
                violations.push("manager_id", "an employee cannot be their own approving manager");
            }
            next.manager_id = manager_id.clone();
        }
        if next.last_working_day < next.resignation_date {
            violations.push(
                "last_working_day",
                format!(
                    "{} is before the resignation date {}",
                    next.last_working_day, next.resignation_date
                ),
            );
        }
        violations.into_result()?;

        Ok(next)
    }
}
