//! Dues, assets, profiles and payslips, plus the collaborator traits that supply them
//!
//! The settlement engine only reads through these traits. [`crate::store::Store`]
//! implements all of them on sled; tests may substitute their own.
use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ExitError, Violations};
use crate::types::{Amount, CallerContext, Date, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PayableDueType {
    #[n(0)]
    Bonus,
    #[n(1)]
    Incentive,
    #[n(2)]
    Reimbursement,
    #[n(3)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecoverableDueType {
    #[n(0)]
    Loan,
    #[n(1)]
    Advance,
    #[n(2)]
    Other,
}

impl FromStr for PayableDueType {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bonus" => Ok(PayableDueType::Bonus),
            "incentive" | "incentives" => Ok(PayableDueType::Incentive),
            "reimbursement" | "reimbursements" => Ok(PayableDueType::Reimbursement),
            "other" => Ok(PayableDueType::Other),
            _ => Err(ExitError::invalid("due_type", format!("unknown payable due type '{s}'"))),
        }
    }
}

impl FromStr for RecoverableDueType {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loan" => Ok(RecoverableDueType::Loan),
            "advance" => Ok(RecoverableDueType::Advance),
            "other" => Ok(RecoverableDueType::Other),
            _ => Err(ExitError::invalid("due_type", format!("unknown recoverable due type '{s}'"))),
        }
    }
}

/// Money owed to the employee beyond standard payroll.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PayableDue {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub exit_request_id: String,
    #[n(2)]
    pub due_type: PayableDueType,
    #[n(3)]
    pub description: String,
    #[n(4)]
    pub amount: Amount,
}

/// Money the company is owed by the employee.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RecoverableDue {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub exit_request_id: String,
    #[n(2)]
    pub due_type: RecoverableDueType,
    #[n(3)]
    pub description: String,
    #[n(4)]
    pub amount: Amount,
}

/// Input for recording a due line. Without an `id` a new line is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueDraft<T> {
    pub id: Option<String>,
    pub due_type: T,
    pub description: String,
    pub amount: Amount,
}

impl<T> DueDraft<T> {
    pub fn new(due_type: T, description: impl Into<String>, amount: Amount) -> Self {
        Self {
            id: None,
            due_type,
            description: description.into(),
            amount,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ExitError> {
        validate_line(&self.description, self.amount)
    }
}

fn validate_line(description: &str, amount: Amount) -> Result<(), ExitError> {
    let mut violations = Violations::new();
    violations.non_negative("amount", amount);
    if description.trim().is_empty() {
        violations.push("description", "is required");
    }
    violations.into_result()
}

impl PayableDue {
    pub fn validate(&self) -> Result<(), ExitError> {
        validate_line(&self.description, self.amount)
    }
}

impl RecoverableDue {
    pub fn validate(&self) -> Result<(), ExitError> {
        validate_line(&self.description, self.amount)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Returned,
    #[n(2)]
    Lost,
    #[n(3)]
    Damaged,
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryStatus::Pending => "pending",
            RecoveryStatus::Returned => "returned",
            RecoveryStatus::Lost => "lost",
            RecoveryStatus::Damaged => "damaged",
        })
    }
}

/// An asset handed to the employee. Keyed by `<user_id>/<asset_id>`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EmployeeAsset {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub serial_number: Option<String>,
    #[n(4)]
    pub assigned_on: Option<Date>,
}

/// What came back (or didn't) for one asset. `asset_id` is a soft reference and may dangle.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AssetRecovery {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub exit_request_id: String,
    #[n(2)]
    pub asset_id: String,
    #[n(3)]
    pub recovery_status: RecoveryStatus,
    #[n(4)]
    pub cost_recovery: Amount,
    #[n(5)]
    pub condition_on_return: Option<String>,
    #[n(6)]
    pub recorded_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecoveryDraft {
    pub id: Option<String>,
    pub asset_id: String,
    pub recovery_status: RecoveryStatus,
    pub cost_recovery: Amount,
    pub condition_on_return: Option<String>,
}

impl AssetRecoveryDraft {
    pub fn new(asset_id: impl Into<String>, recovery_status: RecoveryStatus, cost_recovery: Amount) -> Self {
        Self {
            id: None,
            asset_id: asset_id.into(),
            recovery_status,
            cost_recovery,
            condition_on_return: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition_on_return = Some(condition.into());
        self
    }

    pub fn validate(&self) -> Result<(), ExitError> {
        validate_recovery(&self.asset_id, self.cost_recovery)
    }
}

fn validate_recovery(asset_id: &str, cost_recovery: Amount) -> Result<(), ExitError> {
    let mut violations = Violations::new();
    violations.non_negative("cost_recovery", cost_recovery);
    if asset_id.trim().is_empty() {
        violations.push("asset_id", "is required");
    }
    violations.into_result()
}

impl AssetRecovery {
    pub fn validate(&self) -> Result<(), ExitError> {
        validate_recovery(&self.asset_id, self.cost_recovery)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EmployeeProfile {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub monthly_ctc: Option<Amount>,
    #[n(2)]
    pub basic_salary: Option<Amount>,
    #[n(3)]
    pub join_date: Date,
    #[n(4)]
    pub employment_type: String,
    #[n(5)]
    pub leave_balance_days: i64,
    #[n(6)]
    pub notice_period_days: Option<i64>,
}

impl EmployeeProfile {
    /// Gross monthly pay, preferring CTC over basic.
    pub fn gross_monthly(&self) -> Option<Amount> {
        self.monthly_ctc.or(self.basic_salary)
    }

    /// Salary gratuity is computed on, preferring basic over CTC.
    pub fn last_drawn_salary(&self) -> Option<Amount> {
        self.basic_salary.or(self.monthly_ctc)
    }
}

// keyed by `<user_id>/<yyyy>/<mm>/<payslip_id>`
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Payslip {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub year: i32,
    #[n(3)]
    pub month: u32,
    #[n(4)]
    pub gross_pay: Amount,
    #[n(5)]
    pub net_pay: Amount,
    #[n(6)]
    pub generated_at: TimeStamp<Utc>,
}

pub trait ProfileStore: Send + Sync {
    fn get_profile_by_id(&self, user_id: &str) -> Result<Option<EmployeeProfile>, ExitError>;
}

pub trait PayrollHistory: Send + Sync {
    fn get_payslips(&self, user_id: &str, year: i32, month: u32) -> Result<Vec<Payslip>, ExitError>;
}

/// Due lines of an exit request.
///
/// Upserts are made on behalf of `recorded_by`. An implementation must refuse
/// writes for a request that does not exist or is already terminal, and must
/// not accept negative amounts.
pub trait DuesLedger: Send + Sync {
    fn get_payable_dues(&self, exit_request_id: &str) -> Result<Vec<PayableDue>, ExitError>;
    fn get_recoverable_dues(&self, exit_request_id: &str) -> Result<Vec<RecoverableDue>, ExitError>;
    fn upsert_payable_due(&self, recorded_by: &CallerContext, due: &PayableDue) -> Result<(), ExitError>;
    fn upsert_recoverable_due(
        &self,
        recorded_by: &CallerContext,
        due: &RecoverableDue,
    ) -> Result<(), ExitError>;
}

/// Asset assignments per employee and recovery outcomes per exit request.
pub trait AssetLedger: Send + Sync {
    fn get_employee_assets(&self, user_id: &str) -> Result<Vec<EmployeeAsset>, ExitError>;
    fn get_asset_recovery(&self, exit_request_id: &str) -> Result<Vec<AssetRecovery>, ExitError>;
    fn upsert_asset_recovery(
        &self,
        recorded_by: &CallerContext,
        recovery: &AssetRecovery,
    ) -> Result<(), ExitError>;
}

/// Soft-reference lookup: a recovery may name an asset that no longer exists.
pub fn find_asset<'a>(assets: &'a [EmployeeAsset], asset_id: &str) -> Option<&'a EmployeeAsset> {
    assets.iter().find(|a| a.id == asset_id)
}

/// The payslip to settle against: latest generated wins, id breaks ties.
pub fn most_recent(payslips: &[Payslip]) -> Option<&Payslip> {
    payslips
        .iter()
        .max_by(|a, b| a.generated_at.cmp(&b.generated_at).then_with(|| a.id.cmp(&b.id)))
}
