//! Tenure-based gratuity
//!
//! Tenure counts the inclusive day span from the join date to the last working
//! day. Eligibility is judged on whole completed years; the payable year count
//! additionally rounds a partial year up once it reaches
//! [`PolicyConfig::gratuity_round_up_months`]. The amount is
//! `salary × days_per_year × years_of_service / day_divisor`, truncated.
use chrono::{Datelike, Months, NaiveDate, Utc};

use crate::error::{ExitError, Violations};
use crate::policy::PolicyConfig;
use crate::types::{Amount, Date, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gratuity {
    #[n(0)]
    pub eligible: bool,
    #[n(1)]
    pub years_of_service: u32,
    #[n(2)]
    pub completed_years: u32,
    #[n(3)]
    pub gratuity_amount: Amount,
}

/// Service length as whole years plus the whole months of the unfinished year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenure {
    pub completed_years: u32,
    pub remainder_months: u32,
}

/// Stored per exit request, replaced on every recalculation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct GratuityRecord {
    #[n(0)]
    pub exit_request_id: String,
    #[n(1)]
    pub gratuity: Gratuity,
    #[n(2)]
    pub last_drawn_salary: Amount,
    #[n(3)]
    pub calculated_by: String,
    #[n(4)]
    pub calculated_at: TimeStamp<Utc>,
}

fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

/// Tenure from `join_date` through `last_working_day` inclusive. `None` when the span is empty.
pub fn tenure(join_date: Date, last_working_day: Date) -> Option<Tenure> {
    let start = join_date.naive();
    let end = last_working_day.naive().succ_opt()?;
    if end <= start {
        return None;
    }

    let mut years = u32::try_from((end.year() - start.year()).max(0)).ok()?;
    while years > 0 && add_months(start, years * 12).is_none_or(|d| d > end) {
        years -= 1;
    }
    let anniversary = add_months(start, years * 12)?;

    let mut months = 0;
    while months < 11 && add_months(anniversary, months + 1).is_some_and(|d| d <= end) {
        months += 1;
    }

    Some(Tenure {
        completed_years: years,
        remainder_months: months,
    })
}

pub fn calculate_gratuity(
    last_drawn_salary: Amount,
    join_date: Date,
    last_working_day: Date,
    policy: &PolicyConfig,
) -> Result<Gratuity, ExitError> {
    let mut violations = Violations::new();
    violations.non_negative("last_drawn_salary", last_drawn_salary);
    if last_working_day < join_date {
        violations.push(
            "last_working_day",
            format!("{last_working_day} is before the join date {join_date}"),
        );
    }
    violations.into_result()?;

    let Some(tenure) = tenure(join_date, last_working_day) else {
        return Ok(Gratuity::default());
    };

    let rounds_up = policy.gratuity_round_up_months > 0
        && tenure.remainder_months >= policy.gratuity_round_up_months;
    let years_of_service = tenure.completed_years + u32::from(rounds_up);
    let eligible = tenure.completed_years >= policy.gratuity_min_years;

    let gratuity_amount = if eligible {
        let amount = i128::from(last_drawn_salary)
            * i128::from(policy.gratuity_days_per_year)
            * i128::from(years_of_service)
            / i128::from(policy.gratuity_day_divisor);
        Amount::try_from(amount)
            .map_err(|_| ExitError::invalid("last_drawn_salary", "gratuity amount overflows"))?
    } else {
        0
    };

    Ok(Gratuity {
        eligible,
        years_of_service,
        completed_years: tenure.completed_years,
        gratuity_amount,
    })
}
