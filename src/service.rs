//! Service layer API for exit workflow operations
//!
//! Every write follows the same shape: validate the input, run the role guard and
//! the status precondition against the freshest stored record, then commit the
//! change together with its activity entry. Rejected calls write nothing.
use std::sync::Arc;

use tracing::{info, warn};

use crate::clearance::{ClearanceItem, ClearanceUpdate};
use crate::engine::SettlementEngine;
use crate::error::ExitError;
use crate::exit_request::{ExitRequest, ExitRequestDraft, ExitRequestPatch};
use crate::gratuity::{GratuityRecord, calculate_gratuity};
use crate::ledger::{
    AssetLedger, AssetRecovery, AssetRecoveryDraft, DueDraft, DuesLedger, PayableDue,
    PayableDueType, ProfileStore, RecoverableDue, RecoverableDueType, find_asset,
};
use crate::lifecycle::{
    Activity, ActivityEntry, ApprovalRole, ExitStatus, Operation, Transition, apply_transition,
    authorize, check_edit, require_status,
};
use crate::pf::PfManagement;
use crate::policy::PolicyConfig;
use crate::settlement::{Settlement, SettlementAdjustments, SettlementStatus};
use crate::store::{Store, abort, tx_get, tx_put};
use crate::types::{Amount, CallerContext, Outcome, TimeStamp};
use crate::utils::{DUE_HRP, EXIT_HRP, RECOVERY_HRP, child_key, mint_id};

/// Recalculations tried before a settlement write gives up on a busy request.
pub const SETTLEMENT_ATTEMPTS: usize = 8;

/// Statuses in which a settlement may be (re)calculated.
const SETTLEABLE: [ExitStatus; 4] = [
    ExitStatus::HrApproved,
    ExitStatus::ClearancePending,
    ExitStatus::ClearanceCompleted,
    ExitStatus::SettlementPending,
];

const NOT_CANCELLED: [ExitStatus; 7] = [
    ExitStatus::Initiated,
    ExitStatus::ManagerApproved,
    ExitStatus::HrApproved,
    ExitStatus::ClearancePending,
    ExitStatus::ClearanceCompleted,
    ExitStatus::SettlementPending,
    ExitStatus::Completed,
];

/// Narrows [`ExitService::list_exit_requests`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitRequestFilter {
    pub user_id: Option<String>,
    pub status: Option<ExitStatus>,
}

impl ExitRequestFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ExitStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, request: &ExitRequest) -> bool {
        self.user_id.as_deref().is_none_or(|u| u == request.user_id)
            && self.status.is_none_or(|s| s == request.status)
    }
}

pub struct ExitService {
    instance: Arc<sled::Db>,
    store: Store,
    policy: PolicyConfig,
}

impl ExitService {
    pub fn new(instance: Arc<sled::Db>, policy: PolicyConfig) -> Result<Self, ExitError> {
        policy.validate()?;
        let store = Store::open(&instance)?;
        Ok(Self {
            instance,
            store,
            policy,
        })
    }

    /// Collaborator data (profiles, payslips, assets) lives here too.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), ExitError> {
        self.instance.flush()?;
        Ok(())
    }

    fn load_exit_request(&self, exit_id: &str) -> Result<ExitRequest, ExitError> {
        self.store.load_exit(exit_id)
    }

    fn engine(&self) -> SettlementEngine<'_> {
        SettlementEngine::new(&self.store, &self.store, &self.store, &self.store)
    }

    /// Submit a new exit request. Only the exiting employee may file it.
    pub fn create_exit_request(
        &self,
        caller: &CallerContext,
        draft: ExitRequestDraft,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        if draft.user_id().is_some_and(|user| !caller.is(user)) {
            return Err(ExitError::Forbidden(format!(
                "{} may not file an exit request for another employee",
                caller.user_id
            )));
        }

        let mut request = draft.finalise(mint_id(EXIT_HRP)?)?;
        request.record(ActivityEntry::new(&caller.user_id, Activity::Created));
        self.store.insert_exit(&request)?;

        info!(
            exit_request_id = request.id.as_str(),
            user_id = request.user_id.as_str(),
            exit_type = %request.exit_type,
            "exit request created"
        );
        Ok(Outcome::new(request, "Exit request submitted"))
    }

    pub fn get_exit_request_by_id(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<ExitRequest, ExitError> {
        let request = self.load_exit_request(exit_id)?;
        authorize(caller, &request, Operation::View)?;
        Ok(request)
    }

    /// Field edits. Employees may only edit their own request before approval starts, and never its approver.
    pub fn update_exit_request(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        patch: ExitRequestPatch,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        let request = self.store.update_exit(exit_id, |current| {
            authorize(caller, current, Operation::Edit)?;
            check_edit(caller, current)?;
            if patch.manager_id.is_some() && !caller.is_admin_or_hr() {
                return Err(ExitError::Forbidden(
                    "only HR or an admin may reassign the approving manager".into(),
                ));
            }
            let mut next = patch.apply_to(current)?;
            next.record(ActivityEntry::new(
                &caller.user_id,
                Activity::Edited {
                    fields: patch.changed_fields(),
                },
            ));
            Ok(next)
        })?;

        info!(
            exit_request_id = exit_id,
            actor = caller.user_id.as_str(),
            fields = ?patch.changed_fields(),
            "exit request edited"
        );
        Ok(Outcome::new(request, "Exit request updated"))
    }

    fn transition(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        transition: Transition,
    ) -> Result<ExitRequest, ExitError> {
        let request = self
            .store
            .update_exit(exit_id, |current| apply_transition(caller, current, transition))?;

        info!(
            exit_request_id = exit_id,
            actor = caller.user_id.as_str(),
            status = %request.status,
            "exit request status changed"
        );
        Ok(request)
    }

    pub fn approve_exit_request(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        role: ApprovalRole,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        let request = self.transition(caller, exit_id, Transition::approval(role))?;
        let message = match role {
            ApprovalRole::Manager => "Exit request approved by manager",
            ApprovalRole::Hr => "Exit request approved by HR",
        };
        Ok(Outcome::new(request, message))
    }

    /// Manual step through clearance and settlement. Clearance approvals never do this on their own.
    pub fn promote_exit_request(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        target: ExitStatus,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        let transition = Transition::promotion_to(target).ok_or_else(|| {
            ExitError::invalid(
                "status",
                format!("{target} cannot be reached by promotion"),
            )
        })?;
        let request = self.transition(caller, exit_id, transition)?;
        Ok(Outcome::new(request, format!("Exit request moved to {target}")))
    }

    pub fn cancel_exit_request(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        let request = self.transition(caller, exit_id, Transition::Cancel)?;
        Ok(Outcome::new(request, "Exit request cancelled"))
    }

    pub fn complete_exit(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        let request = self.transition(caller, exit_id, Transition::Complete)?;
        Ok(Outcome::new(request, "Exit process completed"))
    }

    /// Removes the request and all of its children.
    pub fn delete_exit_request(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Outcome<ExitRequest>, ExitError> {
        let request = self.load_exit_request(exit_id)?;
        authorize(caller, &request, Operation::Delete)?;
        let removed = self.store.delete_exit(exit_id)?;

        info!(
            exit_request_id = exit_id,
            actor = caller.user_id.as_str(),
            "exit request deleted"
        );
        Ok(Outcome::new(removed, "Exit request deleted"))
    }

    /// HR and admins see everything. Everyone else sees only their own requests.
    pub fn list_exit_requests(
        &self,
        caller: &CallerContext,
        filter: &ExitRequestFilter,
    ) -> Result<Vec<ExitRequest>, ExitError> {
        let mut filter = filter.clone();
        if !caller.is_admin_or_hr() {
            match filter.user_id.as_deref() {
                Some(user) if !caller.is(user) => {
                    return Err(ExitError::Forbidden(format!(
                        "{} may not list exit requests of {user}",
                        caller.user_id
                    )));
                }
                _ => filter.user_id = Some(caller.user_id.clone()),
            }
        }

        let mut requests: Vec<ExitRequest> = self
            .store
            .list_exits()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    pub fn get_activity_log(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Vec<ActivityEntry>, ExitError> {
        Ok(self.get_exit_request_by_id(caller, exit_id)?.activity_log)
    }

    /// Upserts one department's clearance row. Never moves the request status.
    pub fn update_clearance(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        update: ClearanceUpdate,
    ) -> Result<Outcome<ClearanceItem>, ExitError> {
        update.validate()?;

        let item = self
            .store
            .update_exit_with(exit_id, &self.store.clearance, |request, rows| {
                authorize(caller, request, Operation::UpdateClearance).or_else(abort)?;
                let item = update.clone().into_item(&request.id, &caller.user_id);
                tx_put(rows, &child_key(&request.id, &item.department), &item)?;
                request.record(ActivityEntry::new(
                    &caller.user_id,
                    Activity::ClearanceUpdated {
                        department: item.department.clone(),
                        status: item.status.to_string(),
                    },
                ));
                Ok(item)
            })?;

        info!(
            exit_request_id = exit_id,
            department = item.department.as_str(),
            status = %item.status,
            "clearance updated"
        );
        Ok(Outcome::new(item, "Clearance updated"))
    }

    pub fn get_clearance_items(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Vec<ClearanceItem>, ExitError> {
        self.get_exit_request_by_id(caller, exit_id)?;
        self.store.clearance_items(exit_id)
    }

    pub fn record_payable_due(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        draft: DueDraft<PayableDueType>,
    ) -> Result<Outcome<PayableDue>, ExitError> {
        draft.validate()?;
        let due = PayableDue {
            id: match draft.id {
                Some(id) => id,
                None => mint_id(DUE_HRP)?,
            },
            exit_request_id: exit_id.to_string(),
            due_type: draft.due_type,
            description: draft.description,
            amount: draft.amount,
        };
        self.store.upsert_payable_due(caller, &due)?;

        info!(exit_request_id = exit_id, due_id = due.id.as_str(), amount = due.amount, "payable due recorded");
        Ok(Outcome::new(due, "Payable due recorded"))
    }

    pub fn record_recoverable_due(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        draft: DueDraft<RecoverableDueType>,
    ) -> Result<Outcome<RecoverableDue>, ExitError> {
        draft.validate()?;
        let due = RecoverableDue {
            id: match draft.id {
                Some(id) => id,
                None => mint_id(DUE_HRP)?,
            },
            exit_request_id: exit_id.to_string(),
            due_type: draft.due_type,
            description: draft.description,
            amount: draft.amount,
        };
        self.store.upsert_recoverable_due(caller, &due)?;

        info!(exit_request_id = exit_id, due_id = due.id.as_str(), amount = due.amount, "recoverable due recorded");
        Ok(Outcome::new(due, "Recoverable due recorded"))
    }

    /// Records what came back for one asset. An unknown asset id is accepted and logged.
    pub fn record_asset_recovery(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        draft: AssetRecoveryDraft,
    ) -> Result<Outcome<AssetRecovery>, ExitError> {
        draft.validate()?;
        let request = self.load_exit_request(exit_id)?;
        let assets = self.store.get_employee_assets(&request.user_id)?;
        if find_asset(&assets, &draft.asset_id).is_none() {
            warn!(
                exit_request_id = exit_id,
                asset_id = draft.asset_id.as_str(),
                "recovery recorded against an asset not assigned to the employee"
            );
        }

        let recovery = AssetRecovery {
            id: match draft.id {
                Some(id) => id,
                None => mint_id(RECOVERY_HRP)?,
            },
            exit_request_id: exit_id.to_string(),
            asset_id: draft.asset_id,
            recovery_status: draft.recovery_status,
            cost_recovery: draft.cost_recovery,
            condition_on_return: draft.condition_on_return,
            recorded_at: TimeStamp::new(),
        };
        self.store.upsert_asset_recovery(caller, &recovery)?;

        info!(
            exit_request_id = exit_id,
            recovery_id = recovery.id.as_str(),
            status = %recovery.recovery_status,
            "asset recovery recorded"
        );
        Ok(Outcome::new(recovery, "Asset recovery recorded"))
    }

    /// Computes and upserts the settlement row.
    ///
    /// Inputs are assembled outside the write. If the request changed in the
    /// meantime (any child write bumps its version) the calculation is redone,
    /// up to [`SETTLEMENT_ATTEMPTS`] times.
    pub fn calculate_settlement(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        adjustments: SettlementAdjustments,
    ) -> Result<Outcome<Settlement>, ExitError> {
        self.calculate_settlement_within(caller, exit_id, &adjustments, SETTLEMENT_ATTEMPTS)
    }

    fn calculate_settlement_within(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        adjustments: &SettlementAdjustments,
        attempts: usize,
    ) -> Result<Outcome<Settlement>, ExitError> {
        for attempt in 1..=attempts {
            let snapshot = self.load_exit_request(exit_id)?;
            authorize(caller, &snapshot, Operation::ManageFinance)?;
            require_status(&snapshot, &SETTLEABLE)?;

            if let Some(settlement) = self.write_settlement(caller, &snapshot, adjustments)? {
                info!(
                    exit_request_id = exit_id,
                    total_payable = settlement.total_payable,
                    total_recoverable = settlement.total_recoverable,
                    net_settlement_amount = settlement.net_settlement_amount,
                    digest = settlement.notes.input_digest.as_str(),
                    "settlement calculated"
                );
                return Ok(Outcome::new(settlement, "Settlement calculated"));
            }
            info!(exit_request_id = exit_id, attempt, "exit request changed during calculation, recomputing");
        }

        warn!(exit_request_id = exit_id, attempts, "settlement calculation kept losing to concurrent writes");
        Err(ExitError::contended(attempts))
    }

    /// Computes against `snapshot` and writes the row only if the stored request
    /// still carries the snapshot's version. `None` means nothing was written.
    fn write_settlement(
        &self,
        caller: &CallerContext,
        snapshot: &ExitRequest,
        adjustments: &SettlementAdjustments,
    ) -> Result<Option<Settlement>, ExitError> {
        let exit_id = snapshot.id.as_str();
        let computation = self.engine().calculate(snapshot, adjustments, &self.policy)?;

        self.store
            .update_exit_with(exit_id, &self.store.settlements, |request, rows| {
                if request.version != snapshot.version {
                    return Ok(None);
                }
                if let Some(existing) = tx_get::<Settlement>(rows, exit_id)? {
                    if existing.settlement_status == SettlementStatus::Paid {
                        return abort(ExitError::wrong_state(
                            &[SettlementStatus::Calculated, SettlementStatus::Approved],
                            SettlementStatus::Paid,
                        ));
                    }
                }
                let settlement = Settlement::from_computation(
                    exit_id,
                    computation.clone(),
                    &caller.user_id,
                    adjustments.remarks.clone(),
                );
                tx_put(rows, exit_id, &settlement)?;
                request.record(ActivityEntry::new(
                    &caller.user_id,
                    Activity::SettlementCalculated {
                        net_settlement_amount: settlement.net_settlement_amount,
                    },
                ));
                Ok(Some(settlement))
            })
    }

    /// Moves the settlement forward: `calculated` to `approved` to `paid`.
    pub fn update_settlement_status(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        status: SettlementStatus,
        payment_reference: Option<String>,
    ) -> Result<Outcome<Settlement>, ExitError> {
        let settlement = self
            .store
            .update_exit_with(exit_id, &self.store.settlements, |request, rows| {
                authorize(caller, request, Operation::ManageFinance).or_else(abort)?;
                let Some(existing) = tx_get::<Settlement>(rows, exit_id)? else {
                    return abort(ExitError::not_found("settlement", exit_id));
                };
                let next = existing
                    .advance(caller, status, payment_reference.clone())
                    .or_else(abort)?;
                tx_put(rows, exit_id, &next)?;
                request.record(ActivityEntry::new(
                    &caller.user_id,
                    Activity::SettlementStatusChanged {
                        status: status.to_string(),
                    },
                ));
                Ok(next)
            })?;

        info!(
            exit_request_id = exit_id,
            status = %settlement.settlement_status,
            payment_reference = settlement.payment_reference.as_deref(),
            "settlement status changed"
        );
        Ok(Outcome::new(settlement, format!("Settlement marked {status}")))
    }

    pub fn get_settlement(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Settlement, ExitError> {
        let request = self.load_exit_request(exit_id)?;
        authorize(caller, &request, Operation::ViewFinance)?;
        self.store
            .get_settlement(exit_id)?
            .ok_or_else(|| ExitError::not_found("settlement", exit_id))
    }

    /// Recomputes gratuity from the profile's last drawn salary and stores it.
    pub fn calculate_gratuity(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<Outcome<GratuityRecord>, ExitError> {
        let snapshot = self.load_exit_request(exit_id)?;
        authorize(caller, &snapshot, Operation::ManageFinance)?;
        require_status(&snapshot, &NOT_CANCELLED)?;

        let profile = self
            .store
            .get_profile_by_id(&snapshot.user_id)?
            .ok_or_else(|| ExitError::not_found("employee profile", snapshot.user_id.as_str()))?;
        let salary = profile
            .last_drawn_salary()
            .ok_or_else(|| ExitError::invalid("profile.basic_salary", "no salary on the employee profile"))?;
        let gratuity = calculate_gratuity(
            salary,
            profile.join_date,
            snapshot.last_working_day,
            &self.policy,
        )?;

        let record = self
            .store
            .update_exit_with(exit_id, &self.store.gratuity, |request, rows| {
                authorize(caller, request, Operation::ManageFinance).or_else(abort)?;
                require_status(request, &NOT_CANCELLED).or_else(abort)?;
                let record = GratuityRecord {
                    exit_request_id: exit_id.to_string(),
                    gratuity,
                    last_drawn_salary: salary,
                    calculated_by: caller.user_id.clone(),
                    calculated_at: TimeStamp::new(),
                };
                tx_put(rows, exit_id, &record)?;
                request.record(ActivityEntry::new(
                    &caller.user_id,
                    Activity::GratuityCalculated {
                        gratuity_amount: gratuity.gratuity_amount,
                    },
                ));
                Ok(record)
            })?;

        info!(
            exit_request_id = exit_id,
            eligible = gratuity.eligible,
            years_of_service = gratuity.years_of_service,
            gratuity_amount = gratuity.gratuity_amount,
            "gratuity calculated"
        );
        Ok(Outcome::new(record, "Gratuity calculated"))
    }

    pub fn get_gratuity(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<GratuityRecord, ExitError> {
        let request = self.load_exit_request(exit_id)?;
        authorize(caller, &request, Operation::ViewFinance)?;
        self.store
            .get_gratuity(exit_id)?
            .ok_or_else(|| ExitError::not_found("gratuity", exit_id))
    }

    /// Marks the provident fund exit as started. Initiating twice is a conflict.
    pub fn initiate_pf_exit(
        &self,
        caller: &CallerContext,
        exit_id: &str,
        pf_withdrawal_amount: Amount,
    ) -> Result<Outcome<PfManagement>, ExitError> {
        if pf_withdrawal_amount < 0 {
            return Err(ExitError::invalid(
                "pf_withdrawal_amount",
                format!("must not be negative, got {pf_withdrawal_amount}"),
            ));
        }

        let pf = self
            .store
            .update_exit_with(exit_id, &self.store.pf, |request, rows| {
                authorize(caller, request, Operation::ManageFinance).or_else(abort)?;
                require_status(request, &NOT_CANCELLED).or_else(abort)?;
                if tx_get::<PfManagement>(rows, exit_id)?.is_some_and(|pf| pf.pf_exit_initiated) {
                    return abort(ExitError::already_in("pf_exit_initiated"));
                }
                let pf = PfManagement {
                    exit_request_id: exit_id.to_string(),
                    pf_exit_initiated: true,
                    pf_withdrawal_amount,
                    initiated_by: caller.user_id.clone(),
                    initiated_at: TimeStamp::new(),
                };
                tx_put(rows, exit_id, &pf)?;
                request.record(ActivityEntry::new(
                    &caller.user_id,
                    Activity::PfExitInitiated {
                        pf_withdrawal_amount,
                    },
                ));
                Ok(pf)
            })?;

        info!(exit_request_id = exit_id, pf_withdrawal_amount, "pf exit initiated");
        Ok(Outcome::new(pf, "PF exit initiated"))
    }

    pub fn get_pf_management(
        &self,
        caller: &CallerContext,
        exit_id: &str,
    ) -> Result<PfManagement, ExitError> {
        let request = self.load_exit_request(exit_id)?;
        authorize(caller, &request, Operation::ViewFinance)?;
        self.store
            .get_pf(exit_id)?
            .ok_or_else(|| ExitError::not_found("pf management", exit_id))
    }
}
