//! Provident fund exit record
use chrono::Utc;

use crate::types::{Amount, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PfManagement {
    #[n(0)]
    pub exit_request_id: String,
    #[n(1)]
    pub pf_exit_initiated: bool,
    #[n(2)]
    pub pf_withdrawal_amount: Amount,
    #[n(3)]
    pub initiated_by: String,
    #[n(4)]
    pub initiated_at: TimeStamp<Utc>,
}
