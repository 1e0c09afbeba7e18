//! Organization policy constants for gratuity, notice recovery and settlement
//!
//! None of these are statutory values. Every figure is configuration and may be
//! loaded from a TOML file; fields missing from the file fall back to defaults.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Basis points in one whole (100%).
pub const BPS_SCALE: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Completed years of service required before gratuity is payable.
    pub gratuity_min_years: u32,
    /// Days of salary paid per year of service.
    pub gratuity_days_per_year: u32,
    /// Working days the monthly salary is divided by to get a gratuity day.
    pub gratuity_day_divisor: u32,
    /// Months into a partial year at which it counts as a whole year. Zero disables rounding.
    pub gratuity_round_up_months: u32,
    pub include_gratuity_in_settlement: bool,

    /// Divisor turning gross monthly salary into daily-equivalent pay.
    pub daily_pay_divisor: u32,
    /// Used when neither the profile nor the request carries a notice period.
    pub default_notice_period_days: u32,

    /// Fraction of a daily-equivalent wage paid per encashed leave day.
    pub leave_encashment_rate_bps: u32,
    /// Statutory deduction charged against the final period salary.
    pub statutory_deduction_bps: u32,
    /// Pay only the worked share of the final month's net pay.
    pub prorate_final_salary: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            gratuity_min_years: 5,
            gratuity_days_per_year: 15,
            gratuity_day_divisor: 26,
            gratuity_round_up_months: 6,
            include_gratuity_in_settlement: true,
            daily_pay_divisor: 30,
            default_notice_period_days: 30,
            leave_encashment_rate_bps: 10_000,
            statutory_deduction_bps: 0,
            prorate_final_salary: true,
        }
    }
}

impl PolicyConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ExitError> {
        let policy: PolicyConfig =
            toml::from_str(contents).map_err(|e| ExitError::Config(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self, ExitError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ExitError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ExitError> {
        if self.gratuity_day_divisor == 0 {
            return Err(ExitError::Config("gratuity_day_divisor must be positive".into()));
        }
        if self.daily_pay_divisor == 0 {
            return Err(ExitError::Config("daily_pay_divisor must be positive".into()));
        }
        if self.gratuity_round_up_months > 11 {
            return Err(ExitError::Config(
                "gratuity_round_up_months must be between 0 and 11".into(),
            ));
        }
        if i64::from(self.statutory_deduction_bps) > BPS_SCALE {
            return Err(ExitError::Config(
                "statutory_deduction_bps cannot exceed 10000".into(),
            ));
        }
        Ok(())
    }
}
