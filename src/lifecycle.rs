//! Exit request status machine and its role guards
//!
//! Every write to an exit request goes through two checks, in this order:
//! [`authorize`] (is this caller allowed to attempt the operation at all) and
//! [`Transition::check`] (does the current status accept it). Both are pure; the
//! service layer applies the result with a compare-and-swap on the stored record,
//! so a writer racing on a stale status re-runs the checks and is rejected.
use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::ExitError;
use crate::exit_request::ExitRequest;
use crate::types::{Amount, CallerContext, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExitStatus {
    #[n(0)]
    Initiated,
    #[n(1)]
    ManagerApproved,
    #[n(2)]
    HrApproved,
    #[n(3)]
    ClearancePending,
    #[n(4)]
    ClearanceCompleted,
    #[n(5)]
    SettlementPending,
    #[n(6)]
    Completed,
    #[n(7)]
    Cancelled,
}

impl ExitStatus {
    pub const ALL: [ExitStatus; 8] = [
        ExitStatus::Initiated,
        ExitStatus::ManagerApproved,
        ExitStatus::HrApproved,
        ExitStatus::ClearancePending,
        ExitStatus::ClearanceCompleted,
        ExitStatus::SettlementPending,
        ExitStatus::Completed,
        ExitStatus::Cancelled,
    ];

    /// Every non-terminal status.
    pub const OPEN: [ExitStatus; 6] = [
        ExitStatus::Initiated,
        ExitStatus::ManagerApproved,
        ExitStatus::HrApproved,
        ExitStatus::ClearancePending,
        ExitStatus::ClearanceCompleted,
        ExitStatus::SettlementPending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Initiated => "initiated",
            ExitStatus::ManagerApproved => "manager_approved",
            ExitStatus::HrApproved => "hr_approved",
            ExitStatus::ClearancePending => "clearance_pending",
            ExitStatus::ClearanceCompleted => "clearance_completed",
            ExitStatus::SettlementPending => "settlement_pending",
            ExitStatus::Completed => "completed",
            ExitStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitStatus::Completed | ExitStatus::Cancelled)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitStatus {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExitStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ExitError::invalid("status", format!("unknown status '{s}'")))
    }
}

/// Which approval step the caller is signing.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalRole {
    #[n(0)]
    Manager,
    #[n(1)]
    Hr,
}

impl fmt::Display for ApprovalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalRole::Manager => f.write_str("manager"),
            ApprovalRole::Hr => f.write_str("hr"),
        }
    }
}

/// Status-changing moves. Each has a fixed target and a fixed set of accepted prior states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    ManagerApproval,
    HrApproval,
    StartClearance,
    CompleteClearance,
    OpenSettlement,
    Complete,
    Cancel,
}

impl Transition {
    pub const ALL: [Transition; 7] = [
        Transition::ManagerApproval,
        Transition::HrApproval,
        Transition::StartClearance,
        Transition::CompleteClearance,
        Transition::OpenSettlement,
        Transition::Complete,
        Transition::Cancel,
    ];

    pub fn approval(role: ApprovalRole) -> Self {
        match role {
            ApprovalRole::Manager => Transition::ManagerApproval,
            ApprovalRole::Hr => Transition::HrApproval,
        }
    }

    /// The manual promotion that lands on `target`, if there is one.
    pub fn promotion_to(target: ExitStatus) -> Option<Self> {
        match target {
            ExitStatus::ClearancePending => Some(Transition::StartClearance),
            ExitStatus::ClearanceCompleted => Some(Transition::CompleteClearance),
            ExitStatus::SettlementPending => Some(Transition::OpenSettlement),
            _ => None,
        }
    }

    pub fn target(&self) -> ExitStatus {
        match self {
            Transition::ManagerApproval => ExitStatus::ManagerApproved,
            Transition::HrApproval => ExitStatus::HrApproved,
            Transition::StartClearance => ExitStatus::ClearancePending,
            Transition::CompleteClearance => ExitStatus::ClearanceCompleted,
            Transition::OpenSettlement => ExitStatus::SettlementPending,
            Transition::Complete => ExitStatus::Completed,
            Transition::Cancel => ExitStatus::Cancelled,
        }
    }

    pub fn accepts_from(&self) -> &'static [ExitStatus] {
        match self {
            Transition::ManagerApproval => &[ExitStatus::Initiated],
            Transition::HrApproval => &[ExitStatus::ManagerApproved],
            Transition::StartClearance => &[ExitStatus::HrApproved],
            Transition::CompleteClearance => &[ExitStatus::ClearancePending],
            Transition::OpenSettlement => &[ExitStatus::ClearanceCompleted],
            Transition::Complete => &[ExitStatus::ClearanceCompleted, ExitStatus::SettlementPending],
            Transition::Cancel => &[ExitStatus::Initiated],
        }
    }

    /// Precondition check. A request already sitting in the target reports `AlreadyInState`.
    pub fn check(&self, current: ExitStatus) -> Result<ExitStatus, ExitError> {
        if self.accepts_from().contains(&current) {
            return Ok(self.target());
        }
        if current == self.target() {
            return Err(ExitError::already_in(current));
        }
        Err(ExitError::wrong_state(self.accepts_from(), current))
    }

    fn activity(&self) -> Activity {
        match self {
            Transition::ManagerApproval => Activity::Approved {
                role: ApprovalRole::Manager,
            },
            Transition::HrApproval => Activity::Approved {
                role: ApprovalRole::Hr,
            },
            Transition::Complete => Activity::Completed,
            Transition::Cancel => Activity::Cancelled,
            other => Activity::Promoted { to: other.target() },
        }
    }
}

/// Everything a caller can attempt against an existing exit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Transition(Transition),
    Edit,
    UpdateClearance,
    ManageFinance,
    Delete,
    View,
    ViewFinance,
}

/// Role and ownership guard. Says nothing about status; see [`Transition::check`].
pub fn authorize(
    caller: &CallerContext,
    request: &ExitRequest,
    operation: Operation,
) -> Result<(), ExitError> {
    let privileged = caller.is_admin_or_hr();
    let owner = caller.is(&request.user_id);
    let manager = caller.is(&request.manager_id);

    let allowed = match operation {
        Operation::Transition(Transition::ManagerApproval) => manager || privileged,
        Operation::Transition(Transition::Cancel) => owner || privileged,
        Operation::Transition(_) => privileged,
        Operation::Edit => owner || privileged,
        Operation::UpdateClearance | Operation::ManageFinance | Operation::Delete => privileged,
        Operation::View => owner || manager || privileged,
        Operation::ViewFinance => owner || privileged,
    };

    if allowed {
        Ok(())
    } else {
        Err(ExitError::Forbidden(format!(
            "{} may not {} exit request {}",
            caller.user_id,
            describe(operation),
            request.id
        )))
    }
}

/// Field edits by the employee are only open while the request is initiated or cancelled.
pub fn check_edit(caller: &CallerContext, request: &ExitRequest) -> Result<(), ExitError> {
    if caller.is_admin_or_hr() {
        return Ok(());
    }
    const EMPLOYEE_EDITABLE: [ExitStatus; 2] = [ExitStatus::Initiated, ExitStatus::Cancelled];
    if EMPLOYEE_EDITABLE.contains(&request.status) {
        Ok(())
    } else {
        Err(ExitError::wrong_state(&EMPLOYEE_EDITABLE, request.status))
    }
}

/// Status precondition for operations that are not transitions.
pub fn require_status(request: &ExitRequest, accepted: &[ExitStatus]) -> Result<(), ExitError> {
    if accepted.contains(&request.status) {
        Ok(())
    } else {
        Err(ExitError::wrong_state(accepted, request.status))
    }
}

/// Applies `transition` to a copy of `request`: guard, precondition, status, stamp and log entry.
///
/// The input is never mutated, so a rejected transition leaves nothing half-written.
pub fn apply_transition(
    caller: &CallerContext,
    request: &ExitRequest,
    transition: Transition,
) -> Result<ExitRequest, ExitError> {
    authorize(caller, request, Operation::Transition(transition))?;
    let target = transition.check(request.status)?;

    let mut next = request.clone();
    let entry = ActivityEntry::new(&caller.user_id, transition.activity());
    next.status = target;
    if let Some(slot) = next.stamps.slot_mut(target) {
        if slot.is_some() {
            return Err(ExitError::already_in(target));
        }
        *slot = Some(entry.timestamp.clone());
    }
    next.record(entry);

    Ok(next)
}

fn describe(operation: Operation) -> String {
    match operation {
        Operation::Transition(Transition::ManagerApproval) => "give manager approval on".into(),
        Operation::Transition(Transition::HrApproval) => "give HR approval on".into(),
        Operation::Transition(Transition::Cancel) => "cancel".into(),
        Operation::Transition(Transition::Complete) => "complete".into(),
        Operation::Transition(t) => format!("move to {}", t.target()),
        Operation::Edit => "edit".into(),
        Operation::UpdateClearance => "update clearance on".into(),
        Operation::ManageFinance => "manage settlement for".into(),
        Operation::Delete => "delete".into(),
        Operation::View => "view".into(),
        Operation::ViewFinance => "view the settlement of".into(),
    }
}

/// One line in a request's audit trail.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    #[n(0)]
    pub actor: String,
    #[n(1)]
    pub timestamp: TimeStamp<Utc>,
    #[n(2)]
    pub activity: Activity,
}

impl ActivityEntry {
    pub fn new(actor: &str, activity: Activity) -> Self {
        Self {
            actor: actor.to_string(),
            timestamp: TimeStamp::new(),
            activity,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    #[n(0)]
    Created,
    #[n(1)]
    Approved {
        #[n(0)]
        role: ApprovalRole,
    },
    #[n(2)]
    Promoted {
        #[n(0)]
        to: ExitStatus,
    },
    #[n(3)]
    Cancelled,
    #[n(4)]
    Completed,
    #[n(5)]
    Edited {
        #[n(0)]
        fields: Vec<String>,
    },
    #[n(6)]
    ClearanceUpdated {
        #[n(0)]
        department: String,
        #[n(1)]
        status: String,
    },
    #[n(7)]
    DueRecorded {
        #[n(0)]
        due_id: String,
        #[n(1)]
        amount: Amount,
    },
    #[n(8)]
    AssetRecoveryRecorded {
        #[n(0)]
        recovery_id: String,
        #[n(1)]
        cost_recovery: Amount,
    },
    #[n(9)]
    SettlementCalculated {
        #[n(0)]
        net_settlement_amount: Amount,
    },
    #[n(10)]
    SettlementStatusChanged {
        #[n(0)]
        status: String,
    },
    #[n(11)]
    GratuityCalculated {
        #[n(0)]
        gratuity_amount: Amount,
    },
    #[n(12)]
    PfExitInitiated {
        #[n(0)]
        pf_withdrawal_amount: Amount,
    },
}
