//! Per-department clearance sign-off rows
use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ExitError, Violations};
use crate::types::TimeStamp;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClearanceStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

impl ClearanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearanceStatus::Pending => "pending",
            ClearanceStatus::Approved => "approved",
            ClearanceStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ClearanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClearanceStatus {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClearanceStatus::Pending),
            "approved" => Ok(ClearanceStatus::Approved),
            "rejected" => Ok(ClearanceStatus::Rejected),
            _ => Err(ExitError::invalid("status", format!("unknown clearance status '{s}'"))),
        }
    }
}

// keyed by `<exit_request_id>/<department>`
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ClearanceItem {
    #[n(0)]
    pub exit_request_id: String,
    #[n(1)]
    pub department: String,
    #[n(2)]
    pub status: ClearanceStatus,
    #[n(3)]
    pub remarks: Option<String>,
    #[n(4)]
    pub updated_by: String,
    #[n(5)]
    pub updated_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearanceUpdate {
    pub department: String,
    pub status: ClearanceStatus,
    pub remarks: Option<String>,
}

impl ClearanceUpdate {
    pub fn new(department: impl Into<String>, status: ClearanceStatus) -> Self {
        Self {
            department: department.into(),
            status,
            remarks: None,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    /// Department names are normalised to lower case so "Finance" and "finance" share a row.
    pub fn department_key(&self) -> String {
        self.department.trim().to_lowercase()
    }

    pub fn validate(&self) -> Result<(), ExitError> {
        let mut violations = Violations::new();
        if self.department_key().is_empty() {
            violations.push("department", "is required");
        }
        if self.status == ClearanceStatus::Rejected
            && self.remarks.as_deref().is_none_or(|r| r.trim().is_empty())
        {
            violations.push("remarks", "a rejected clearance needs a reason");
        }
        violations.into_result()
    }

    pub(crate) fn into_item(self, exit_request_id: &str, updated_by: &str) -> ClearanceItem {
        ClearanceItem {
            exit_request_id: exit_request_id.to_string(),
            department: self.department_key(),
            status: self.status,
            remarks: self.remarks,
            updated_by: updated_by.to_string(),
            updated_at: TimeStamp::new(),
        }
    }
}

/// True once every listed department has approved. Informational only: it never moves status.
pub fn all_cleared(items: &[ClearanceItem]) -> bool {
    !items.is_empty() && items.iter().all(|i| i.status == ClearanceStatus::Approved)
}
