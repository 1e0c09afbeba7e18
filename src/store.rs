//! sled persistence for exit requests and their children
//!
//! One named tree per entity. Child rows are keyed `<exit_request_id>/<child>`
//! so a prefix scan finds every child of a request. Status changes go through a
//! compare-and-swap loop on the raw record; a child row and the activity entry
//! it produces are committed together in a two-tree transaction.
use std::sync::Arc;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Batch, Db, Transactional, Tree};
use tracing::debug;

use crate::clearance::ClearanceItem;
use crate::error::ExitError;
use crate::exit_request::ExitRequest;
use crate::gratuity::GratuityRecord;
use crate::ledger::{
    AssetLedger, AssetRecovery, DuesLedger, EmployeeAsset, EmployeeProfile, PayableDue,
    PayrollHistory, Payslip, ProfileStore, RecoverableDue,
};
use crate::lifecycle::{Activity, ActivityEntry, ExitStatus, Operation, authorize, require_status};
use crate::pf::PfManagement;
use crate::settlement::Settlement;
use crate::types::CallerContext;
use crate::utils::{child_key, child_prefix, decode, encode};

#[derive(Clone)]
pub struct Store {
    pub(crate) exit_requests: Tree,
    pub(crate) active_exits: Tree, // user_id -> id of that user's non-terminal request
    pub(crate) clearance: Tree,
    pub(crate) payable_dues: Tree,
    pub(crate) recoverable_dues: Tree,
    pub(crate) employee_assets: Tree,
    pub(crate) asset_recoveries: Tree,
    pub(crate) settlements: Tree,
    pub(crate) gratuity: Tree,
    pub(crate) pf: Tree,
    pub(crate) profiles: Tree,
    pub(crate) payslips: Tree,
}

pub(crate) fn abort<T>(err: ExitError) -> ConflictableTransactionResult<T, ExitError> {
    Err(ConflictableTransactionError::Abort(err))
}

fn from_transaction(err: TransactionError<ExitError>) -> ExitError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => ExitError::Storage(err),
    }
}

/// Reads and decodes `key` inside a transaction.
pub(crate) fn tx_get<T: for<'b> minicbor::Decode<'b, ()>>(
    tree: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Option<T>, ExitError> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => decode(&bytes).map(Some).or_else(abort),
        None => Ok(None),
    }
}

/// Encodes and writes `value` under `key` inside a transaction.
pub(crate) fn tx_put<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<(), ExitError> {
    let bytes = encode(value).or_else(abort)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

impl Store {
    pub fn open(db: &Arc<Db>) -> Result<Self, ExitError> {
        Ok(Self {
            exit_requests: db.open_tree("exit_requests")?,
            active_exits: db.open_tree("active_exits")?,
            clearance: db.open_tree("clearance")?,
            payable_dues: db.open_tree("payable_dues")?,
            recoverable_dues: db.open_tree("recoverable_dues")?,
            employee_assets: db.open_tree("employee_assets")?,
            asset_recoveries: db.open_tree("asset_recoveries")?,
            settlements: db.open_tree("settlements")?,
            gratuity: db.open_tree("gratuity")?,
            pf: db.open_tree("pf")?,
            profiles: db.open_tree("profiles")?,
            payslips: db.open_tree("payslips")?,
        })
    }

    fn get_row<T: for<'b> minicbor::Decode<'b, ()>>(
        tree: &Tree,
        key: &str,
    ) -> Result<Option<T>, ExitError> {
        tree.get(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn scan_rows<T: for<'b> minicbor::Decode<'b, ()>>(
        tree: &Tree,
        prefix: &str,
    ) -> Result<Vec<T>, ExitError> {
        tree.scan_prefix(prefix)
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn get_exit(&self, exit_id: &str) -> Result<Option<ExitRequest>, ExitError> {
        Self::get_row(&self.exit_requests, exit_id)
    }

    pub fn load_exit(&self, exit_id: &str) -> Result<ExitRequest, ExitError> {
        self.get_exit(exit_id)?
            .ok_or_else(|| ExitError::not_found("exit request", exit_id))
    }

    pub fn list_exits(&self) -> Result<Vec<ExitRequest>, ExitError> {
        self.exit_requests
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    /// Stores a new request and claims the user's active slot in one transaction.
    ///
    /// A slot left pointing at a terminal or vanished request counts as free.
    pub(crate) fn insert_exit(&self, request: &ExitRequest) -> Result<(), ExitError> {
        let user_id = request.user_id.as_str();
        (&self.exit_requests, &self.active_exits)
            .transaction(|(exits, active)| {
                if let Some(holder) = active.get(user_id.as_bytes())? {
                    let holder = String::from_utf8_lossy(&holder).into_owned();
                    if let Some(existing) = tx_get::<ExitRequest>(exits, &holder)? {
                        if existing.is_active() {
                            return abort(ExitError::invalid(
                                "user_id",
                                format!("{user_id} already has an active exit request {holder}"),
                            ));
                        }
                    }
                }
                active.insert(user_id.as_bytes(), request.id.as_bytes())?;
                tx_put(exits, &request.id, request)
            })
            .map_err(from_transaction)
    }

    /// Read-modify-write of one request with compare-and-swap on the stored bytes.
    ///
    /// `f` is re-run against the fresh record whenever another writer got in first,
    /// so its guards always judge the latest status.
    pub(crate) fn update_exit<F>(&self, exit_id: &str, f: F) -> Result<ExitRequest, ExitError>
    where
        F: Fn(&ExitRequest) -> Result<ExitRequest, ExitError>,
    {
        loop {
            let current_bytes = self
                .exit_requests
                .get(exit_id)?
                .ok_or_else(|| ExitError::not_found("exit request", exit_id))?;
            let current: ExitRequest = decode(&current_bytes)?;
            let next = f(&current)?;

            let swap = self.exit_requests.compare_and_swap(
                exit_id,
                Some(current_bytes),
                Some(encode(&next)?),
            )?;
            match swap {
                Ok(()) => {
                    if current.is_active() && !next.is_active() {
                        self.release_active(&next)?;
                    }
                    return Ok(next);
                }
                Err(_) => debug!(exit_request_id = exit_id, "lost compare-and-swap, retrying"),
            }
        }
    }

    fn release_active(&self, request: &ExitRequest) -> Result<(), ExitError> {
        // only clears the slot if it still names this request
        let _ = self.active_exits.compare_and_swap(
            request.user_id.as_bytes(),
            Some(request.id.as_bytes()),
            None::<&[u8]>,
        )?;
        Ok(())
    }

    /// Runs `f` against the stored request and one child tree in a single transaction.
    ///
    /// Whatever `f` does to the request (typically appending an activity entry) is
    /// written back with the child rows, or nothing is written at all.
    pub(crate) fn update_exit_with<T, F>(&self, exit_id: &str, child: &Tree, f: F) -> Result<T, ExitError>
    where
        F: Fn(&mut ExitRequest, &TransactionalTree) -> ConflictableTransactionResult<T, ExitError>,
    {
        (&self.exit_requests, child)
            .transaction(|(exits, children)| {
                let Some(mut request) = tx_get::<ExitRequest>(exits, exit_id)? else {
                    return abort(ExitError::not_found("exit request", exit_id));
                };
                let out = f(&mut request, children)?;
                tx_put(exits, exit_id, &request)?;
                Ok(out)
            })
            .map_err(from_transaction)
    }

    /// Writes one ledger line under `tree` together with its activity entry.
    ///
    /// The caller must be allowed to manage the request's finances and the
    /// request must still be open. The line lands only if the request exists.
    fn record_line<R: minicbor::Encode<()>>(
        &self,
        recorded_by: &CallerContext,
        exit_id: &str,
        tree: &Tree,
        line_id: &str,
        line: &R,
        activity: Activity,
    ) -> Result<(), ExitError> {
        self.update_exit_with(exit_id, tree, |request, rows| {
            authorize(recorded_by, request, Operation::ManageFinance).or_else(abort)?;
            require_status(request, &ExitStatus::OPEN).or_else(abort)?;
            tx_put(rows, &child_key(exit_id, line_id), line)?;
            request.record(ActivityEntry::new(&recorded_by.user_id, activity.clone()));
            Ok(())
        })
    }

    /// Removes the request, its active slot and every child row.
    ///
    /// The record goes first so concurrent child writes fail instead of leaving orphans.
    pub(crate) fn delete_exit(&self, exit_id: &str) -> Result<ExitRequest, ExitError> {
        let removed = (&self.exit_requests, &self.active_exits)
            .transaction(|(exits, active)| {
                let Some(request) = tx_get::<ExitRequest>(exits, exit_id)? else {
                    return abort(ExitError::not_found("exit request", exit_id));
                };
                exits.remove(exit_id.as_bytes())?;
                let user = request.user_id.as_bytes();
                if active
                    .get(user)?
                    .is_some_and(|holder| &*holder == request.id.as_bytes())
                {
                    active.remove(user)?;
                }
                Ok(request)
            })
            .map_err(from_transaction)?;

        let prefix = child_prefix(exit_id);
        for tree in [
            &self.clearance,
            &self.payable_dues,
            &self.recoverable_dues,
            &self.asset_recoveries,
        ] {
            let mut batch = Batch::default();
            for key in tree.scan_prefix(&prefix).keys() {
                batch.remove(key?);
            }
            tree.apply_batch(batch)?;
        }
        for tree in [&self.settlements, &self.gratuity, &self.pf] {
            tree.remove(exit_id)?;
        }

        Ok(removed)
    }

    pub fn clearance_items(&self, exit_id: &str) -> Result<Vec<ClearanceItem>, ExitError> {
        Self::scan_rows(&self.clearance, &child_prefix(exit_id))
    }

    pub fn get_settlement(&self, exit_id: &str) -> Result<Option<Settlement>, ExitError> {
        Self::get_row(&self.settlements, exit_id)
    }

    pub fn get_gratuity(&self, exit_id: &str) -> Result<Option<GratuityRecord>, ExitError> {
        Self::get_row(&self.gratuity, exit_id)
    }

    pub fn get_pf(&self, exit_id: &str) -> Result<Option<PfManagement>, ExitError> {
        Self::get_row(&self.pf, exit_id)
    }

    pub fn put_profile(&self, profile: &EmployeeProfile) -> Result<(), ExitError> {
        self.profiles.insert(profile.user_id.as_bytes(), encode(profile)?)?;
        Ok(())
    }

    pub fn put_payslip(&self, payslip: &Payslip) -> Result<(), ExitError> {
        let key = format!(
            "{}/{:04}/{:02}/{}",
            payslip.user_id, payslip.year, payslip.month, payslip.id
        );
        self.payslips.insert(key.as_bytes(), encode(payslip)?)?;
        Ok(())
    }

    pub fn put_employee_asset(&self, asset: &EmployeeAsset) -> Result<(), ExitError> {
        let key = child_key(&asset.user_id, &asset.id);
        self.employee_assets.insert(key.as_bytes(), encode(asset)?)?;
        Ok(())
    }
}

impl ProfileStore for Store {
    fn get_profile_by_id(&self, user_id: &str) -> Result<Option<EmployeeProfile>, ExitError> {
        Self::get_row(&self.profiles, user_id)
    }
}

impl PayrollHistory for Store {
    fn get_payslips(&self, user_id: &str, year: i32, month: u32) -> Result<Vec<Payslip>, ExitError> {
        Self::scan_rows(&self.payslips, &format!("{user_id}/{year:04}/{month:02}/"))
    }
}

impl DuesLedger for Store {
    fn get_payable_dues(&self, exit_request_id: &str) -> Result<Vec<PayableDue>, ExitError> {
        Self::scan_rows(&self.payable_dues, &child_prefix(exit_request_id))
    }

    fn get_recoverable_dues(&self, exit_request_id: &str) -> Result<Vec<RecoverableDue>, ExitError> {
        Self::scan_rows(&self.recoverable_dues, &child_prefix(exit_request_id))
    }

    fn upsert_payable_due(&self, recorded_by: &CallerContext, due: &PayableDue) -> Result<(), ExitError> {
        due.validate()?;
        let activity = Activity::DueRecorded {
            due_id: due.id.clone(),
            amount: due.amount,
        };
        self.record_line(recorded_by, &due.exit_request_id, &self.payable_dues, &due.id, due, activity)
    }

    fn upsert_recoverable_due(
        &self,
        recorded_by: &CallerContext,
        due: &RecoverableDue,
    ) -> Result<(), ExitError> {
        due.validate()?;
        let activity = Activity::DueRecorded {
            due_id: due.id.clone(),
            amount: due.amount,
        };
        self.record_line(recorded_by, &due.exit_request_id, &self.recoverable_dues, &due.id, due, activity)
    }
}

impl AssetLedger for Store {
    fn get_employee_assets(&self, user_id: &str) -> Result<Vec<EmployeeAsset>, ExitError> {
        Self::scan_rows(&self.employee_assets, &child_prefix(user_id))
    }

    fn get_asset_recovery(&self, exit_request_id: &str) -> Result<Vec<AssetRecovery>, ExitError> {
        Self::scan_rows(&self.asset_recoveries, &child_prefix(exit_request_id))
    }

    fn upsert_asset_recovery(
        &self,
        recorded_by: &CallerContext,
        recovery: &AssetRecovery,
    ) -> Result<(), ExitError> {
        recovery.validate()?;
        let activity = Activity::AssetRecoveryRecorded {
            recovery_id: recovery.id.clone(),
            cost_recovery: recovery.cost_recovery,
        };
        self.record_line(
            recorded_by,
            &recovery.exit_request_id,
            &self.asset_recoveries,
            &recovery.id,
            recovery,
            activity,
        )
    }
}
