//! Final settlement: the pure computation and the stored record
//!
//! [`compute_settlement`] turns assembled inputs into headline totals plus an
//! itemised breakdown. It reads no clock and no store, so identical inputs
//! always give identical totals and the same input digest.
use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ExitError, Violations};
use crate::exit_request::ExitRequest;
use crate::gratuity::{Gratuity, calculate_gratuity};
use crate::ledger::{
    AssetRecovery, EmployeeAsset, EmployeeProfile, PayableDue, PayableDueType, Payslip,
    RecoverableDue, RecoverableDueType, RecoveryStatus, find_asset,
};
use crate::notice::{NoticeShortfall, daily_equivalent_pay, evaluate_notice_period};
use crate::policy::{BPS_SCALE, PolicyConfig};
use crate::types::{Amount, CallerContext, TimeStamp};
use crate::utils::encode;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementStatus {
    #[n(0)]
    Calculated,
    #[n(1)]
    Approved,
    #[n(2)]
    Paid,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Calculated => "calculated",
            SettlementStatus::Approved => "approved",
            SettlementStatus::Paid => "paid",
        }
    }

    /// Prior statuses a manual status update may move from. `Calculated` is only reached by computing.
    pub fn accepts_from(&self) -> &'static [SettlementStatus] {
        match self {
            SettlementStatus::Calculated => &[],
            SettlementStatus::Approved => &[SettlementStatus::Calculated],
            SettlementStatus::Paid => &[SettlementStatus::Approved],
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calculated" => Ok(SettlementStatus::Calculated),
            "approved" => Ok(SettlementStatus::Approved),
            "paid" => Ok(SettlementStatus::Paid),
            _ => Err(ExitError::invalid(
                "settlement_status",
                format!("unknown settlement status '{s}'"),
            )),
        }
    }
}

/// Caller-supplied figures and overrides for one calculation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementAdjustments {
    #[n(0)]
    pub bonus: Amount,
    #[n(1)]
    pub incentives: Amount,
    #[n(2)]
    pub reimbursements: Amount,
    #[n(3)]
    pub leave_balance_days: Option<i64>,
    #[n(4)]
    pub notice_period_required_days: Option<i64>,
    #[n(5)]
    pub notice_period_served_days: Option<i64>,
    #[n(6)]
    pub remarks: Option<String>,
}

/// Everything the computation reads, fetched up front by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementInputs {
    pub exit_request: ExitRequest,
    pub profile: EmployeeProfile,
    pub payslip: Option<Payslip>,
    pub assets: Vec<EmployeeAsset>,
    pub recoveries: Vec<AssetRecovery>,
    pub payable_dues: Vec<PayableDue>,
    pub recoverable_dues: Vec<RecoverableDue>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Earnings {
    #[n(0)]
    pub final_salary: Amount,
    #[n(1)]
    pub leave_encashment: Amount,
    #[n(2)]
    pub gratuity: Amount,
    #[n(3)]
    pub bonus: Amount,
    #[n(4)]
    pub incentives: Amount,
    #[n(5)]
    pub reimbursements: Amount,
    #[n(6)]
    pub other_payables: Amount,
}

impl Earnings {
    pub fn total(&self) -> Result<Amount, ExitError> {
        checked_total(&[
            self.final_salary,
            self.leave_encashment,
            self.gratuity,
            self.bonus,
            self.incentives,
            self.reimbursements,
            self.other_payables,
        ])
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deductions {
    #[n(0)]
    pub statutory: Amount,
    #[n(1)]
    pub notice_shortfall: Amount,
    #[n(2)]
    pub asset_recovery: Amount,
    #[n(3)]
    pub loans: Amount,
    #[n(4)]
    pub advances: Amount,
    #[n(5)]
    pub other_recoverables: Amount,
}

impl Deductions {
    pub fn total(&self) -> Result<Amount, ExitError> {
        checked_total(&[
            self.statutory,
            self.notice_shortfall,
            self.asset_recovery,
            self.loans,
            self.advances,
            self.other_recoverables,
        ])
    }
}

/// How the final period salary was derived from the payslip.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalSalaryBasis {
    #[n(0)]
    pub payslip_id: Option<String>,
    #[n(1)]
    pub net_pay: Amount,
    #[n(2)]
    pub days_worked: u32,
    #[n(3)]
    pub days_in_month: u32,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AssetRecoveryLine {
    #[n(0)]
    pub recovery_id: String,
    #[n(1)]
    pub asset_id: String,
    #[n(2)]
    pub asset_name: Option<String>, // None when the asset record is gone
    #[n(3)]
    pub recovery_status: RecoveryStatus,
    #[n(4)]
    pub cost_recovery: Amount,
}

/// Itemised provenance stored as the settlement's notes.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementBreakdown {
    #[n(0)]
    pub earnings: Earnings,
    #[n(1)]
    pub deductions: Deductions,
    #[n(2)]
    pub gratuity: Gratuity,
    #[n(3)]
    pub notice: NoticeShortfall,
    #[n(4)]
    pub final_salary_basis: FinalSalaryBasis,
    #[n(5)]
    pub daily_pay: Amount,
    #[n(6)]
    pub leave_days_encashed: i64,
    #[n(7)]
    pub asset_lines: Vec<AssetRecoveryLine>,
    #[n(8)]
    pub payable_due_ids: Vec<String>,
    #[n(9)]
    pub recoverable_due_ids: Vec<String>,
    #[n(10)]
    pub data_gaps: Vec<String>,
    #[n(11)]
    pub input_digest: String, // sha256 over the cbor encoding of every input
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementComputation {
    pub total_payable: Amount,
    pub total_recoverable: Amount,
    pub net_settlement_amount: Amount,
    pub breakdown: SettlementBreakdown,
}

// one row per exit request, keyed by the exit request id
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    #[n(0)]
    pub exit_request_id: String,
    #[n(1)]
    pub total_payable: Amount,
    #[n(2)]
    pub total_recoverable: Amount,
    #[n(3)]
    pub net_settlement_amount: Amount,
    #[n(4)]
    pub settlement_status: SettlementStatus,
    #[n(5)]
    pub calculated_by: String,
    #[n(6)]
    pub calculated_at: TimeStamp<Utc>,
    #[n(7)]
    pub notes: SettlementBreakdown,
    #[n(8)]
    pub remarks: Option<String>,
    #[n(9)]
    pub payment_reference: Option<String>,
    #[n(10)]
    pub approved_by: Option<String>,
    #[n(11)]
    pub paid_at: Option<TimeStamp<Utc>>,
}

impl Settlement {
    pub fn from_computation(
        exit_request_id: &str,
        computation: SettlementComputation,
        calculated_by: &str,
        remarks: Option<String>,
    ) -> Self {
        Self {
            exit_request_id: exit_request_id.to_string(),
            total_payable: computation.total_payable,
            total_recoverable: computation.total_recoverable,
            net_settlement_amount: computation.net_settlement_amount,
            settlement_status: SettlementStatus::Calculated,
            calculated_by: calculated_by.to_string(),
            calculated_at: TimeStamp::new(),
            notes: computation.breakdown,
            remarks,
            payment_reference: None,
            approved_by: None,
            paid_at: None,
        }
    }

    /// Moves to `target`, one step at a time. Returns a new record; `self` is untouched.
    pub fn advance(
        &self,
        caller: &CallerContext,
        target: SettlementStatus,
        payment_reference: Option<String>,
    ) -> Result<Settlement, ExitError> {
        if self.settlement_status == target {
            return Err(ExitError::already_in(target));
        }
        if !target.accepts_from().contains(&self.settlement_status) {
            return Err(ExitError::wrong_state(
                target.accepts_from(),
                self.settlement_status,
            ));
        }
        if payment_reference
            .as_deref()
            .is_some_and(|r| r.trim().is_empty())
        {
            return Err(ExitError::invalid("payment_reference", "must not be blank"));
        }

        let mut next = self.clone();
        next.settlement_status = target;
        match target {
            SettlementStatus::Approved => next.approved_by = Some(caller.user_id.clone()),
            SettlementStatus::Paid => next.paid_at = Some(TimeStamp::new()),
            SettlementStatus::Calculated => {}
        }
        if payment_reference.is_some() {
            next.payment_reference = payment_reference;
        }
        Ok(next)
    }
}

fn checked_total(parts: &[Amount]) -> Result<Amount, ExitError> {
    parts
        .iter()
        .try_fold(0 as Amount, |acc, part| acc.checked_add(*part))
        .ok_or_else(|| ExitError::Internal("settlement total overflows".into()))
}

fn scale(amount: Amount, numerator: i64, denominator: i64) -> Result<Amount, ExitError> {
    if denominator == 0 {
        return Err(ExitError::Internal("division by a zero policy divisor".into()));
    }
    let scaled = i128::from(amount) * i128::from(numerator) / i128::from(denominator);
    Amount::try_from(scaled).map_err(|_| ExitError::Internal("settlement amount overflows".into()))
}

fn validate(inputs: &SettlementInputs, adjustments: &SettlementAdjustments) -> Result<(), ExitError> {
    let mut violations = Violations::new();
    violations.non_negative("bonus", adjustments.bonus);
    violations.non_negative("incentives", adjustments.incentives);
    violations.non_negative("reimbursements", adjustments.reimbursements);
    if let Some(days) = adjustments.leave_balance_days {
        violations.non_negative("leave_balance_days", days);
    }
    if let Some(days) = adjustments.notice_period_required_days {
        violations.non_negative("notice_period_required_days", days);
    }
    if let Some(days) = adjustments.notice_period_served_days {
        violations.non_negative("notice_period_served_days", days);
    }

    let profile = &inputs.profile;
    match profile.gross_monthly() {
        Some(salary) => violations.non_negative("profile.monthly_salary", salary),
        None => violations.push("profile.monthly_salary", "profile carries neither monthly CTC nor basic salary"),
    }
    if let Some(basic) = profile.basic_salary {
        violations.non_negative("profile.basic_salary", basic);
    }
    violations.non_negative("profile.leave_balance_days", profile.leave_balance_days);
    if let Some(days) = profile.notice_period_days {
        violations.non_negative("profile.notice_period_days", days);
    }

    let exit = &inputs.exit_request;
    if exit.last_working_day < exit.resignation_date {
        violations.push("last_working_day", "is before the resignation date");
    }
    if exit.last_working_day < profile.join_date {
        violations.push("profile.join_date", "is after the last working day");
    }

    if let Some(payslip) = &inputs.payslip {
        violations.non_negative(format!("payslip[{}].net_pay", payslip.id), payslip.net_pay);
    }
    for due in &inputs.payable_dues {
        violations.non_negative(format!("payable_dues[{}].amount", due.id), due.amount);
    }
    for due in &inputs.recoverable_dues {
        violations.non_negative(format!("recoverable_dues[{}].amount", due.id), due.amount);
    }
    for recovery in &inputs.recoveries {
        violations.non_negative(
            format!("asset_recoveries[{}].cost_recovery", recovery.id),
            recovery.cost_recovery,
        );
    }

    violations.into_result()
}

/// Digest over the settlement-relevant facts only; audit fields that change on every write are left out.
fn input_digest(
    inputs: &SettlementInputs,
    adjustments: &SettlementAdjustments,
    policy: &PolicyConfig,
) -> Result<String, ExitError> {
    let exit = &inputs.exit_request;
    let mut bytes = Vec::new();
    bytes.extend(encode(&exit.id)?);
    bytes.extend(encode(&exit.user_id)?);
    bytes.extend(encode(&exit.resignation_date)?);
    bytes.extend(encode(&exit.last_working_day)?);
    bytes.extend(encode(&exit.exit_type)?);
    bytes.extend(encode(&inputs.profile)?);
    bytes.extend(encode(&inputs.payslip)?);
    bytes.extend(encode(&inputs.assets)?);
    bytes.extend(encode(&inputs.recoveries)?);
    bytes.extend(encode(&inputs.payable_dues)?);
    bytes.extend(encode(&inputs.recoverable_dues)?);
    bytes.extend(encode(adjustments)?);
    let policy = toml::to_string(policy).map_err(|e| ExitError::Internal(e.to_string()))?;
    bytes.extend(policy.as_bytes());

    Ok(sha256::digest(&bytes))
}

fn sum_payable(dues: &[PayableDue], due_type: PayableDueType) -> Result<Amount, ExitError> {
    let parts: Vec<Amount> = dues
        .iter()
        .filter(|d| d.due_type == due_type)
        .map(|d| d.amount)
        .collect();
    checked_total(&parts)
}

fn sum_recoverable(dues: &[RecoverableDue], due_type: RecoverableDueType) -> Result<Amount, ExitError> {
    let parts: Vec<Amount> = dues
        .iter()
        .filter(|d| d.due_type == due_type)
        .map(|d| d.amount)
        .collect();
    checked_total(&parts)
}

/// Pure settlement computation. Nothing here is persisted; validation failures list every field.
pub fn compute_settlement(
    inputs: &SettlementInputs,
    adjustments: &SettlementAdjustments,
    policy: &PolicyConfig,
) -> Result<SettlementComputation, ExitError> {
    validate(inputs, adjustments)?;

    let exit = &inputs.exit_request;
    let profile = &inputs.profile;
    let last_day = exit.last_working_day;
    let mut data_gaps = vec![];

    let gross_monthly = profile.gross_monthly().unwrap_or_default();
    let daily_pay = daily_equivalent_pay(gross_monthly, policy);

    // final period salary
    let days_in_month = last_day.days_in_month();
    let final_salary_basis = match &inputs.payslip {
        Some(payslip) => FinalSalaryBasis {
            payslip_id: Some(payslip.id.clone()),
            net_pay: payslip.net_pay,
            days_worked: if policy.prorate_final_salary {
                last_day.day()
            } else {
                days_in_month
            },
            days_in_month,
        },
        None => {
            data_gaps.push(format!(
                "no payslip found for {:04}-{:02}; final salary counted as 0",
                last_day.year(),
                last_day.month()
            ));
            FinalSalaryBasis {
                days_in_month,
                ..Default::default()
            }
        }
    };
    let final_salary = scale(
        final_salary_basis.net_pay,
        i64::from(final_salary_basis.days_worked),
        i64::from(final_salary_basis.days_in_month),
    )?;

    let leave_days = adjustments
        .leave_balance_days
        .unwrap_or(profile.leave_balance_days);
    let leave_encashment = scale(
        scale(daily_pay, leave_days, 1)?,
        i64::from(policy.leave_encashment_rate_bps),
        BPS_SCALE,
    )?;

    let last_drawn = profile.last_drawn_salary().unwrap_or_default();
    let gratuity = calculate_gratuity(last_drawn, profile.join_date, last_day, policy)?;

    let required_days = adjustments
        .notice_period_required_days
        .or(profile.notice_period_days)
        .unwrap_or(i64::from(policy.default_notice_period_days));
    let served_days = adjustments
        .notice_period_served_days
        .unwrap_or_else(|| exit.notice_days_served());
    let notice = evaluate_notice_period(required_days, served_days, daily_pay)?;

    let mut asset_lines = Vec::with_capacity(inputs.recoveries.len());
    for recovery in &inputs.recoveries {
        let asset = find_asset(&inputs.assets, &recovery.asset_id);
        if asset.is_none() {
            data_gaps.push(format!(
                "asset recovery {} refers to unknown asset {}",
                recovery.id, recovery.asset_id
            ));
        }
        asset_lines.push(AssetRecoveryLine {
            recovery_id: recovery.id.clone(),
            asset_id: recovery.asset_id.clone(),
            asset_name: asset.map(|a| a.name.clone()),
            recovery_status: recovery.recovery_status,
            cost_recovery: recovery.cost_recovery,
        });
    }
    let asset_costs: Vec<Amount> = inputs.recoveries.iter().map(|r| r.cost_recovery).collect();

    let dues = &inputs.payable_dues;
    let earnings = Earnings {
        final_salary,
        leave_encashment,
        gratuity: if policy.include_gratuity_in_settlement {
            gratuity.gratuity_amount
        } else {
            0
        },
        bonus: checked_total(&[adjustments.bonus, sum_payable(dues, PayableDueType::Bonus)?])?,
        incentives: checked_total(&[
            adjustments.incentives,
            sum_payable(dues, PayableDueType::Incentive)?,
        ])?,
        reimbursements: checked_total(&[
            adjustments.reimbursements,
            sum_payable(dues, PayableDueType::Reimbursement)?,
        ])?,
        other_payables: sum_payable(dues, PayableDueType::Other)?,
    };

    let recoverable = &inputs.recoverable_dues;
    let deductions = Deductions {
        statutory: scale(
            final_salary,
            i64::from(policy.statutory_deduction_bps),
            BPS_SCALE,
        )?,
        notice_shortfall: notice.recovery_amount,
        asset_recovery: checked_total(&asset_costs)?,
        loans: sum_recoverable(recoverable, RecoverableDueType::Loan)?,
        advances: sum_recoverable(recoverable, RecoverableDueType::Advance)?,
        other_recoverables: sum_recoverable(recoverable, RecoverableDueType::Other)?,
    };

    let total_payable = earnings.total()?;
    let total_recoverable = deductions.total()?;
    let net_settlement_amount = total_payable
        .checked_sub(total_recoverable)
        .ok_or_else(|| ExitError::Internal("net settlement overflows".into()))?;

    let breakdown = SettlementBreakdown {
        earnings,
        deductions,
        gratuity,
        notice,
        final_salary_basis,
        daily_pay,
        leave_days_encashed: leave_days,
        asset_lines,
        payable_due_ids: dues.iter().map(|d| d.id.clone()).collect(),
        recoverable_due_ids: recoverable.iter().map(|d| d.id.clone()).collect(),
        data_gaps,
        input_digest: input_digest(inputs, adjustments, policy)?,
    };

    Ok(SettlementComputation {
        total_payable,
        total_recoverable,
        net_settlement_amount,
        breakdown,
    })
}
