//! Gathers settlement inputs from the collaborators and runs the computation
//!
//! The fetches are independent, so they run on scoped threads and are joined
//! before anything is computed. A failing collaborator fails the whole
//! calculation with a dependency error; a missing payslip is only a data gap.
use std::thread::{self, ScopedJoinHandle};

use tracing::{debug, warn};

use crate::error::{ErrorKind, ExitError};
use crate::exit_request::ExitRequest;
use crate::ledger::{AssetLedger, DuesLedger, PayrollHistory, ProfileStore, most_recent};
use crate::policy::PolicyConfig;
use crate::settlement::{
    SettlementAdjustments, SettlementComputation, SettlementInputs, compute_settlement,
};

pub struct SettlementEngine<'a> {
    profiles: &'a dyn ProfileStore,
    payroll: &'a dyn PayrollHistory,
    dues: &'a dyn DuesLedger,
    assets: &'a dyn AssetLedger,
}

impl<'a> SettlementEngine<'a> {
    pub fn new(
        profiles: &'a dyn ProfileStore,
        payroll: &'a dyn PayrollHistory,
        dues: &'a dyn DuesLedger,
        assets: &'a dyn AssetLedger,
    ) -> Self {
        Self {
            profiles,
            payroll,
            dues,
            assets,
        }
    }

    /// Fetches everything the computation reads, concurrently.
    pub fn assemble(&self, exit_request: &ExitRequest) -> Result<SettlementInputs, ExitError> {
        let user_id = exit_request.user_id.as_str();
        let exit_id = exit_request.id.as_str();
        let last_day = exit_request.last_working_day;

        let (profile, payslips, assets, recoveries, payable_dues, recoverable_dues) =
            thread::scope(|s| {
                let profile = s.spawn(|| self.profiles.get_profile_by_id(user_id));
                let payslips =
                    s.spawn(|| self.payroll.get_payslips(user_id, last_day.year(), last_day.month()));
                let assets = s.spawn(|| self.assets.get_employee_assets(user_id));
                let recoveries = s.spawn(|| self.assets.get_asset_recovery(exit_id));
                let payable = s.spawn(|| self.dues.get_payable_dues(exit_id));
                let recoverable = s.spawn(|| self.dues.get_recoverable_dues(exit_id));

                (
                    joined(profile, "profile store"),
                    joined(payslips, "payroll history"),
                    joined(assets, "asset ledger"),
                    joined(recoveries, "asset ledger"),
                    joined(payable, "dues ledger"),
                    joined(recoverable, "dues ledger"),
                )
            });

        let profile = profile?.ok_or_else(|| ExitError::not_found("employee profile", user_id))?;
        let payslips = payslips?;
        let payslip = most_recent(&payslips).cloned();

        let inputs = SettlementInputs {
            exit_request: exit_request.clone(),
            profile,
            payslip,
            assets: assets?,
            recoveries: recoveries?,
            payable_dues: payable_dues?,
            recoverable_dues: recoverable_dues?,
        };
        debug!(
            exit_request_id = exit_id,
            payslips = payslips.len(),
            assets = inputs.assets.len(),
            recoveries = inputs.recoveries.len(),
            payable_dues = inputs.payable_dues.len(),
            recoverable_dues = inputs.recoverable_dues.len(),
            "assembled settlement inputs"
        );

        Ok(inputs)
    }

    pub fn calculate(
        &self,
        exit_request: &ExitRequest,
        adjustments: &SettlementAdjustments,
        policy: &PolicyConfig,
    ) -> Result<SettlementComputation, ExitError> {
        let inputs = self.assemble(exit_request)?;
        let computation = compute_settlement(&inputs, adjustments, policy)?;
        for gap in &computation.breakdown.data_gaps {
            warn!(exit_request_id = exit_request.id.as_str(), gap = gap.as_str(), "settlement data gap");
        }
        Ok(computation)
    }
}

fn joined<T>(
    handle: ScopedJoinHandle<'_, Result<T, ExitError>>,
    collaborator: &'static str,
) -> Result<T, ExitError> {
    match handle.join() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) if err.kind() == ErrorKind::Dependency => Err(err),
        Ok(Err(err)) => Err(ExitError::Dependency {
            collaborator,
            message: err.to_string(),
        }),
        Err(_) => Err(ExitError::Dependency {
            collaborator,
            message: "worker thread panicked".into(),
        }),
    }
}
