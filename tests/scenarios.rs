use anyhow::Context;
use exit_settlement::{
    CallerContext, Date, ExitRequestDraft, ExitRequestFilter, ExitRequestPatch, ExitService,
    ExitType, PolicyConfig,
    clearance::{ClearanceStatus, ClearanceUpdate, all_cleared},
    error::ErrorKind,
    ledger::{
        AssetLedger, AssetRecovery, AssetRecoveryDraft, DueDraft, DuesLedger, EmployeeAsset,
        EmployeeProfile, PayableDueType, Payslip, RecoverableDue, RecoverableDueType,
        RecoveryStatus,
    },
    lifecycle::{Activity, ApprovalRole, ExitStatus},
    settlement::{SettlementAdjustments, SettlementStatus},
    types::TimeStamp,
    utils,
};
use sled::open;
use std::sync::Arc;

use tempfile::tempdir; // Use for test db cleanup.

// Each test gets its own sled database in a temp dir; sled locks the files.
fn open_service(dir: &tempfile::TempDir, name: &str) -> anyhow::Result<ExitService> {
    let db = Arc::new(open(dir.path().join(name))?);
    db.clear()?;
    Ok(ExitService::new(db, PolicyConfig::default())?)
}

fn date(y: i32, m: u32, d: u32) -> Date {
    Date::from_ymd_opt(y, m, d).expect("valid calendar date")
}

struct Staff {
    employee: CallerContext,
    manager: CallerContext,
    hr: CallerContext,
}

fn staff() -> anyhow::Result<Staff> {
    Ok(Staff {
        employee: CallerContext::employee(utils::new_uuid_to_bech32("user_")?),
        manager: CallerContext::employee(utils::new_uuid_to_bech32("user_")?),
        hr: CallerContext::hr(utils::new_uuid_to_bech32("user_")?),
    })
}

fn draft(staff: &Staff, resigned: Date, last_day: Date) -> ExitRequestDraft {
    ExitRequestDraft::new()
        .set_user(staff.employee.user_id.clone())
        .set_manager(staff.manager.user_id.clone())
        .set_resignation_date(resigned)
        .set_last_working_day(last_day)
        .set_exit_type(ExitType::Resignation)
        .set_reason("relocating")
}

/// Files a request and takes it through both approvals.
fn hr_approved_request(
    service: &ExitService,
    staff: &Staff,
    resigned: Date,
    last_day: Date,
) -> anyhow::Result<String> {
    let created = service
        .create_exit_request(&staff.employee, draft(staff, resigned, last_day))
        .context("Exit request failed on create: ")?;
    let id = created.data.id;
    service
        .approve_exit_request(&staff.manager, &id, ApprovalRole::Manager)
        .context("Exit request failed on manager approval: ")?;
    service
        .approve_exit_request(&staff.hr, &id, ApprovalRole::Hr)
        .context("Exit request failed on HR approval: ")?;
    Ok(id)
}

fn seed_employee(service: &ExitService, user_id: &str) -> anyhow::Result<()> {
    service.store().put_profile(&EmployeeProfile {
        user_id: user_id.to_string(),
        monthly_ctc: Some(60_000),
        basic_salary: Some(60_000),
        join_date: date(2019, 1, 10),
        employment_type: "full_time".into(),
        leave_balance_days: 0,
        notice_period_days: Some(30),
    })?;
    service.store().put_payslip(&Payslip {
        id: "slip_2024_01".into(),
        user_id: user_id.to_string(),
        year: 2024,
        month: 1,
        gross_pay: 60_000,
        net_pay: 58_000,
        generated_at: TimeStamp::new(),
    })?;
    Ok(())
}

#[test]
fn submit_and_approve_exit_request() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "submit_and_approve.db")?;
    let staff = staff()?;

    let created = service
        .create_exit_request(&staff.employee, draft(&staff, date(2024, 1, 1), date(2024, 1, 31)))
        .context("Exit request failed on create: ")?;
    assert_eq!(created.data.status, ExitStatus::Initiated);
    assert!(created.data.id.starts_with("exit_1"));

    let approved = service
        .approve_exit_request(&staff.manager, &created.data.id, ApprovalRole::Manager)
        .context("Exit request failed on manager approval: ")?;
    assert_eq!(approved.data.status, ExitStatus::ManagerApproved);
    assert!(approved.data.stamps.manager_approved_at.is_some());
    assert!(approved.data.stamps.hr_approved_at.is_none());

    // the manager cannot sign the HR step
    let err = service
        .approve_exit_request(&staff.manager, &created.data.id, ApprovalRole::Hr)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let approved = service
        .approve_exit_request(&staff.hr, &created.data.id, ApprovalRole::Hr)
        .context("Exit request failed on HR approval: ")?;
    assert_eq!(approved.data.status, ExitStatus::HrApproved);

    // a repeat is reported as already done, not as out of order
    let err = service
        .approve_exit_request(&staff.hr, &created.data.id, ApprovalRole::Hr)
        .unwrap_err();
    assert!(err.is_already_in_state());

    service.flush()?;
    Ok(())
}

#[test]
fn full_exit_through_completion() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "full_exit.db")?;
    let staff = staff()?;
    seed_employee(&service, &staff.employee.user_id)?;

    let id = hr_approved_request(&service, &staff, date(2024, 1, 5), date(2024, 1, 15))?;

    // promotion is one step at a time
    let err = service
        .promote_exit_request(&staff.hr, &id, ExitStatus::ClearanceCompleted)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!err.is_already_in_state());

    service.promote_exit_request(&staff.hr, &id, ExitStatus::ClearancePending)?;
    for department in ["IT", "Finance"] {
        service.update_clearance(
            &staff.hr,
            &id,
            ClearanceUpdate::new(department, ClearanceStatus::Approved),
        )?;
    }
    let items = service.get_clearance_items(&staff.employee, &id)?;
    assert_eq!(items.len(), 2);
    assert!(all_cleared(&items));
    // clearing every department does not move the status
    assert_eq!(
        service.get_exit_request_by_id(&staff.hr, &id)?.status,
        ExitStatus::ClearancePending
    );

    let promoted = service.promote_exit_request(&staff.hr, &id, ExitStatus::ClearanceCompleted)?;
    assert!(promoted.data.stamps.clearance_completed_at.is_some());
    let promoted = service.promote_exit_request(&staff.hr, &id, ExitStatus::SettlementPending)?;
    assert!(promoted.data.stamps.settlement_completed_at.is_some());

    let settlement = service.calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())?;
    assert_eq!(settlement.data.settlement_status, SettlementStatus::Calculated);

    service.update_settlement_status(&staff.hr, &id, SettlementStatus::Approved, None)?;
    let paid = service.update_settlement_status(
        &staff.hr,
        &id,
        SettlementStatus::Paid,
        Some("NEFT-20240131-001".into()),
    )?;
    assert_eq!(paid.data.payment_reference.as_deref(), Some("NEFT-20240131-001"));
    assert!(paid.data.paid_at.is_some());

    // a paid settlement is final
    let err = service
        .calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let completed = service.complete_exit(&staff.hr, &id)?;
    assert_eq!(completed.data.status, ExitStatus::Completed);
    assert!(completed.data.stamps.completed_at.is_some());

    let log = service.get_activity_log(&staff.employee, &id)?;
    assert_eq!(log.len(), 12);
    assert!(matches!(log[0].activity, Activity::Created));
    assert!(matches!(log[11].activity, Activity::Completed));
    assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // the active slot is free again
    service.create_exit_request(&staff.employee, draft(&staff, date(2025, 3, 1), date(2025, 3, 31)))?;

    Ok(())
}

#[test]
fn settlement_matches_worked_example() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "worked_example.db")?;
    let staff = staff()?;
    let user_id = staff.employee.user_id.clone();
    seed_employee(&service, &user_id)?;
    service.store().put_employee_asset(&EmployeeAsset {
        id: "laptop-01".into(),
        user_id: user_id.clone(),
        name: "Laptop".into(),
        serial_number: Some("SN-4471".into()),
        assigned_on: Some(date(2019, 1, 10)),
    })?;

    // resigned on the 5th, leaves on the 15th: 10 of 30 notice days served
    let id = hr_approved_request(&service, &staff, date(2024, 1, 5), date(2024, 1, 15))?;

    service.record_asset_recovery(
        &staff.hr,
        &id,
        AssetRecoveryDraft::new("laptop-01", RecoveryStatus::Lost, 5_000),
    )?;
    service.record_recoverable_due(
        &staff.hr,
        &id,
        DueDraft::new(RecoverableDueType::Loan, "housing loan balance", 10_000),
    )?;

    let gratuity = service.calculate_gratuity(&staff.hr, &id)?;
    assert!(gratuity.data.gratuity.eligible);
    assert_eq!(gratuity.data.gratuity.years_of_service, 5);

    let settlement = service
        .calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())?
        .data;
    let notes = &settlement.notes;

    assert_eq!(notes.gratuity.gratuity_amount, 173_076);
    assert_eq!(notes.notice.daily_pay, 2_000);
    assert_eq!(notes.notice.shortfall_days, 20);
    assert_eq!(notes.deductions.notice_shortfall, 40_000);
    assert_eq!(notes.deductions.asset_recovery, 5_000);
    assert_eq!(notes.deductions.loans, 10_000);
    assert_eq!(settlement.total_recoverable, 5_000 + 10_000 + 40_000);

    // 58_000 net pay for 15 of 31 days
    assert_eq!(notes.earnings.final_salary, 28_064);
    assert_eq!(settlement.total_payable, 28_064 + 173_076);
    assert_eq!(
        settlement.net_settlement_amount,
        settlement.total_payable - settlement.total_recoverable
    );
    assert_eq!(notes.asset_lines[0].asset_name.as_deref(), Some("Laptop"));
    assert!(notes.data_gaps.is_empty());

    // recalculating replaces the row and reproduces the same digest
    let again = service
        .calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())?
        .data;
    assert_eq!(again.net_settlement_amount, settlement.net_settlement_amount);
    assert_eq!(again.notes.input_digest, settlement.notes.input_digest);
    assert_eq!(service.get_settlement(&staff.employee, &id)?, again);

    Ok(())
}

#[test]
fn adjustments_feed_the_settlement() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "adjustments.db")?;
    let staff = staff()?;
    seed_employee(&service, &staff.employee.user_id)?;
    let id = hr_approved_request(&service, &staff, date(2024, 1, 5), date(2024, 1, 15))?;

    service.record_payable_due(
        &staff.hr,
        &id,
        DueDraft::new(PayableDueType::Bonus, "annual bonus", 12_000),
    )?;

    let adjustments = SettlementAdjustments {
        bonus: 3_000,
        reimbursements: 1_500,
        leave_balance_days: Some(4),
        notice_period_served_days: Some(30),
        remarks: Some("notice waived by HR".into()),
        ..Default::default()
    };
    let settlement = service.calculate_settlement(&staff.hr, &id, adjustments)?.data;

    assert_eq!(settlement.notes.earnings.bonus, 15_000);
    assert_eq!(settlement.notes.earnings.reimbursements, 1_500);
    assert_eq!(settlement.notes.earnings.leave_encashment, 8_000);
    assert_eq!(settlement.notes.deductions.notice_shortfall, 0);
    assert_eq!(settlement.remarks.as_deref(), Some("notice waived by HR"));

    // every bad field is reported, and nothing is written
    let bad = SettlementAdjustments {
        bonus: -1,
        incentives: -2,
        notice_period_required_days: Some(-30),
        ..Default::default()
    };
    let err = service.calculate_settlement(&staff.hr, &id, bad).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.fields().len(), 3);
    assert_eq!(service.get_settlement(&staff.hr, &id)?, settlement);

    Ok(())
}

#[test]
fn dangling_asset_and_missing_payslip_are_gaps() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "gaps.db")?;
    let staff = staff()?;
    service.store().put_profile(&EmployeeProfile {
        user_id: staff.employee.user_id.clone(),
        monthly_ctc: Some(30_000),
        basic_salary: None,
        join_date: date(2022, 4, 1),
        employment_type: "contract".into(),
        leave_balance_days: 0,
        notice_period_days: Some(0),
    })?;
    let id = hr_approved_request(&service, &staff, date(2024, 3, 1), date(2024, 3, 20))?;

    service.record_asset_recovery(
        &staff.hr,
        &id,
        AssetRecoveryDraft::new("phone-09", RecoveryStatus::Damaged, 2_500)
            .with_condition("cracked screen"),
    )?;

    let settlement = service
        .calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())?
        .data;
    assert_eq!(settlement.notes.earnings.final_salary, 0);
    assert_eq!(settlement.notes.asset_lines[0].asset_name, None);
    assert_eq!(settlement.notes.data_gaps.len(), 2);
    assert_eq!(settlement.total_recoverable, 2_500);
    // nothing payable, so the net goes negative
    assert_eq!(settlement.net_settlement_amount, -2_500);

    Ok(())
}

#[test]
fn ledger_writes_through_the_store_are_guarded() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "guarded_ledger.db")?;
    let staff = staff()?;
    let id = hr_approved_request(&service, &staff, date(2024, 4, 1), date(2024, 4, 30))?;
    let store = service.store();

    let orphan = RecoverableDue {
        id: "due_orphan".into(),
        exit_request_id: "exit_1nonexistent".into(),
        due_type: RecoverableDueType::Loan,
        description: "laptop loan".into(),
        amount: -500,
    };
    let err = store.upsert_recoverable_due(&staff.hr, &orphan).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.fields()[0].field, "amount");

    let orphan = RecoverableDue { amount: 500, ..orphan };
    let err = store.upsert_recoverable_due(&staff.hr, &orphan).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(store.get_recoverable_dues("exit_1nonexistent")?.is_empty());

    // the employee cannot book lines against their own request
    let own = RecoverableDue {
        exit_request_id: id.clone(),
        ..orphan.clone()
    };
    let before = store.load_exit(&id)?;
    let err = store.upsert_recoverable_due(&staff.employee, &own).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(store.get_recoverable_dues(&id)?.is_empty());
    assert_eq!(store.load_exit(&id)?, before);

    store.upsert_recoverable_due(&staff.hr, &own)?;
    let after = store.load_exit(&id)?;
    assert_eq!(after.version, before.version + 1);
    assert!(matches!(
        after.activity_log.last().map(|e| &e.activity),
        Some(Activity::DueRecorded { amount: 500, .. })
    ));
    assert_eq!(store.get_recoverable_dues(&id)?.len(), 1);

    // a cancelled request takes no more lines
    let other = self::staff()?;
    let cancelled = service
        .create_exit_request(&other.employee, draft(&other, date(2024, 4, 1), date(2024, 4, 30)))?
        .data
        .id;
    service.cancel_exit_request(&other.employee, &cancelled)?;
    let recovery = AssetRecovery {
        id: "rec_late".into(),
        exit_request_id: cancelled.clone(),
        asset_id: "badge-1".into(),
        recovery_status: RecoveryStatus::Returned,
        cost_recovery: 0,
        condition_on_return: None,
        recorded_at: TimeStamp::new(),
    };
    let err = store.upsert_asset_recovery(&other.hr, &recovery).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(store.get_asset_recovery(&cancelled)?.is_empty());

    Ok(())
}

#[test]
fn settlement_preconditions() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "settlement_preconditions.db")?;
    let staff = staff()?;

    let created = service
        .create_exit_request(&staff.employee, draft(&staff, date(2024, 1, 1), date(2024, 1, 31)))?;
    let id = created.data.id;

    let err = service
        .calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    service.approve_exit_request(&staff.manager, &id, ApprovalRole::Manager)?;
    service.approve_exit_request(&staff.hr, &id, ApprovalRole::Hr)?;

    // no profile on file
    let err = service
        .calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = service
        .calculate_settlement(&staff.employee, &id, SettlementAdjustments::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = service
        .calculate_settlement(&staff.hr, "exit_1missing", SettlementAdjustments::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = service
        .update_settlement_status(&staff.hr, &id, SettlementStatus::Approved, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    Ok(())
}

#[test]
fn employee_edits_and_cancellation() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "edits.db")?;
    let staff = staff()?;

    let created = service
        .create_exit_request(&staff.employee, draft(&staff, date(2024, 1, 1), date(2024, 1, 31)))?;
    let id = created.data.id.clone();

    let edited = service.update_exit_request(
        &staff.employee,
        &id,
        ExitRequestPatch {
            last_working_day: Some(date(2024, 2, 15)),
            ..Default::default()
        },
    )?;
    assert_eq!(edited.data.last_working_day, date(2024, 2, 15));
    assert_eq!(edited.data.status, ExitStatus::Initiated);
    assert!(edited.data.version > created.data.version);

    // employees never pick their own approver
    let err = service
        .update_exit_request(
            &staff.employee,
            &id,
            ExitRequestPatch {
                manager_id: Some(staff.employee.user_id.clone()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = service
        .update_exit_request(
            &staff.employee,
            &id,
            ExitRequestPatch {
                last_working_day: Some(date(2023, 12, 1)),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.fields()[0].field, "last_working_day");

    // a second active request is refused
    let err = service
        .create_exit_request(&staff.employee, draft(&staff, date(2024, 1, 2), date(2024, 1, 30)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let cancelled = service.cancel_exit_request(&staff.employee, &id)?;
    assert_eq!(cancelled.data.status, ExitStatus::Cancelled);
    assert!(cancelled.data.stamps.cancelled_at.is_some());

    let err = service.approve_exit_request(&staff.manager, &id, ApprovalRole::Manager).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // cancelling frees the slot
    service.create_exit_request(&staff.employee, draft(&staff, date(2024, 1, 2), date(2024, 1, 30)))?;

    Ok(())
}

#[test]
fn edits_after_approval() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "edits_after_approval.db")?;
    let staff = staff()?;
    let id = hr_approved_request(&service, &staff, date(2024, 1, 1), date(2024, 1, 31))?;

    let patch = ExitRequestPatch {
        reason: Some("changed plans".into()),
        ..Default::default()
    };
    let err = service
        .update_exit_request(&staff.employee, &id, patch.clone())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let edited = service.update_exit_request(&staff.hr, &id, patch)?;
    assert_eq!(edited.data.reason.as_deref(), Some("changed plans"));
    assert_eq!(edited.data.status, ExitStatus::HrApproved);

    let err = service.cancel_exit_request(&staff.employee, &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    Ok(())
}

#[test]
fn create_is_for_the_employee_only() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "create_guard.db")?;
    let staff = staff()?;

    let err = service
        .create_exit_request(&staff.hr, draft(&staff, date(2024, 1, 1), date(2024, 1, 31)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = service
        .create_exit_request(&staff.employee, ExitRequestDraft::new().set_user(staff.employee.user_id.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.fields().len(), 4);

    Ok(())
}

#[test]
fn delete_cascades_to_children() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "delete.db")?;
    let staff = staff()?;
    seed_employee(&service, &staff.employee.user_id)?;
    let id = hr_approved_request(&service, &staff, date(2024, 1, 5), date(2024, 1, 15))?;

    service.update_clearance(
        &staff.hr,
        &id,
        ClearanceUpdate::new("IT", ClearanceStatus::Rejected).with_remarks("badge not returned"),
    )?;
    service.record_payable_due(
        &staff.hr,
        &id,
        DueDraft::new(PayableDueType::Incentive, "Q4 incentive", 4_000),
    )?;
    service.calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())?;
    service.initiate_pf_exit(&staff.hr, &id, 80_000)?;

    let err = service.delete_exit_request(&staff.employee, &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let removed = service.delete_exit_request(&staff.hr, &id)?;
    assert_eq!(removed.data.id, id);

    let err = service.get_exit_request_by_id(&staff.hr, &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(service.store().clearance_items(&id)?.is_empty());
    assert!(service.store().get_payable_dues(&id)?.is_empty());
    assert!(service.store().get_settlement(&id)?.is_none());
    assert!(service.store().get_pf(&id)?.is_none());

    // deleting an active request frees the slot too
    service.create_exit_request(&staff.employee, draft(&staff, date(2024, 6, 1), date(2024, 6, 30)))?;

    Ok(())
}

#[test]
fn listing_respects_ownership() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "listing.db")?;
    let first = staff()?;
    let second = staff()?;

    let a = service.create_exit_request(&first.employee, draft(&first, date(2024, 1, 1), date(2024, 1, 31)))?;
    service.create_exit_request(&second.employee, draft(&second, date(2024, 2, 1), date(2024, 2, 29)))?;
    service.approve_exit_request(&first.manager, &a.data.id, ApprovalRole::Manager)?;

    let own = service.list_exit_requests(&first.employee, &ExitRequestFilter::default())?;
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].id, a.data.id);

    let err = service
        .list_exit_requests(&first.employee, &ExitRequestFilter::for_user(second.employee.user_id.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let all = service.list_exit_requests(&first.hr, &ExitRequestFilter::default())?;
    assert_eq!(all.len(), 2);

    let approved = service.list_exit_requests(
        &first.hr,
        &ExitRequestFilter::default().with_status(ExitStatus::ManagerApproved),
    )?;
    assert_eq!(approved.len(), 1);

    // a stranger cannot read someone else's request
    let err = service.get_exit_request_by_id(&second.employee, &a.data.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    Ok(())
}

#[test]
fn finance_records_are_private() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "finance_privacy.db")?;
    let staff = staff()?;
    seed_employee(&service, &staff.employee.user_id)?;
    let id = hr_approved_request(&service, &staff, date(2024, 1, 5), date(2024, 1, 15))?;

    service.calculate_settlement(&staff.hr, &id, SettlementAdjustments::default())?;
    service.calculate_gratuity(&staff.hr, &id)?;

    // the manager sees the request but not the money
    service.get_exit_request_by_id(&staff.manager, &id)?;
    let err = service.get_settlement(&staff.manager, &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = service.get_gratuity(&staff.manager, &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    service.get_settlement(&staff.employee, &id)?;
    let gratuity = service.get_gratuity(&staff.employee, &id)?;
    assert_eq!(gratuity.last_drawn_salary, 60_000);

    Ok(())
}

#[test]
fn pf_exit_is_initiated_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "pf.db")?;
    let staff = staff()?;
    let id = hr_approved_request(&service, &staff, date(2024, 1, 1), date(2024, 1, 31))?;

    let err = service.initiate_pf_exit(&staff.hr, &id, -1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let pf = service.initiate_pf_exit(&staff.hr, &id, 150_000)?;
    assert!(pf.data.pf_exit_initiated);

    let err = service.initiate_pf_exit(&staff.hr, &id, 150_000).unwrap_err();
    assert!(err.is_already_in_state());

    let stored = service.get_pf_management(&staff.employee, &id)?;
    assert_eq!(stored.pf_withdrawal_amount, 150_000);

    Ok(())
}

#[test]
fn clearance_is_hr_only() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = open_service(&temp_dir, "clearance.db")?;
    let staff = staff()?;
    let id = hr_approved_request(&service, &staff, date(2024, 1, 1), date(2024, 1, 31))?;

    let err = service
        .update_clearance(&staff.manager, &id, ClearanceUpdate::new("IT", ClearanceStatus::Approved))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // same department in another case overwrites the row
    service.update_clearance(&staff.hr, &id, ClearanceUpdate::new("IT", ClearanceStatus::Pending))?;
    service.update_clearance(&staff.hr, &id, ClearanceUpdate::new("it", ClearanceStatus::Approved))?;
    let items = service.get_clearance_items(&staff.hr, &id)?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, ClearanceStatus::Approved);
    assert_eq!(items[0].updated_by, staff.hr.user_id);

    Ok(())
}
