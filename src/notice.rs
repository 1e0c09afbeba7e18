//! Notice-period shortfall recovery
use crate::error::{ExitError, Violations};
use crate::policy::PolicyConfig;
use crate::types::Amount;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoticeShortfall {
    #[n(0)]
    pub required_days: i64,
    #[n(1)]
    pub served_days: i64,
    #[n(2)]
    pub shortfall_days: i64,
    #[n(3)]
    pub daily_pay: Amount,
    #[n(4)]
    pub recovery_amount: Amount,
}

/// Gross monthly salary spread over the policy's day divisor, truncated.
pub fn daily_equivalent_pay(gross_monthly: Amount, policy: &PolicyConfig) -> Amount {
    gross_monthly / Amount::from(policy.daily_pay_divisor.max(1))
}

/// Negative inputs are rejected, never clamped. Served at or beyond required recovers nothing.
pub fn evaluate_notice_period(
    required_days: i64,
    served_days: i64,
    daily_pay: Amount,
) -> Result<NoticeShortfall, ExitError> {
    let mut violations = Violations::new();
    violations.non_negative("notice_period_required_days", required_days);
    violations.non_negative("notice_period_served_days", served_days);
    violations.non_negative("daily_pay", daily_pay);
    violations.into_result()?;

    let shortfall_days = (required_days - served_days).max(0);
    let recovery_amount = shortfall_days
        .checked_mul(daily_pay)
        .ok_or_else(|| ExitError::invalid("daily_pay", "notice recovery overflows"))?;

    Ok(NoticeShortfall {
        required_days,
        served_days,
        shortfall_days,
        daily_pay,
        recovery_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortfall_is_charged_per_day() {
        let daily = daily_equivalent_pay(60_000, &PolicyConfig::default());
        assert_eq!(daily, 2_000);

        let n = evaluate_notice_period(30, 10, daily).unwrap();
        assert_eq!(n.shortfall_days, 20);
        assert_eq!(n.recovery_amount, 40_000);
    }

    #[test]
    fn served_in_full_recovers_nothing() {
        assert_eq!(evaluate_notice_period(30, 30, 2_000).unwrap().recovery_amount, 0);
        assert_eq!(evaluate_notice_period(30, 45, 2_000).unwrap().recovery_amount, 0);
    }

    #[test]
    fn negative_days_are_validation_errors() {
        let err = evaluate_notice_period(-1, -5, 100).unwrap_err();
        let fields: Vec<_> = err.fields().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["notice_period_required_days", "notice_period_served_days"]
        );
    }
}
