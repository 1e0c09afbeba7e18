//! Employee exit workflow and final settlement engine
//!
//! An [`ExitRequest`] moves through manager and HR approval, department
//! clearance and settlement before it is completed. [`ExitService`] is the
//! caller-facing API; every operation takes the caller's [`CallerContext`]
//! and is checked against the status machine in [`lifecycle`].

pub mod clearance;
pub mod engine;
pub mod error;
pub mod exit_request;
pub mod gratuity;
pub mod ledger;
pub mod lifecycle;
pub mod notice;
pub mod pf;
pub mod policy;
pub mod service;
pub mod settlement;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{ErrorKind, ExitError};
pub use exit_request::{ExitRequest, ExitRequestDraft, ExitRequestPatch, ExitType};
pub use lifecycle::{ApprovalRole, ExitStatus};
pub use policy::PolicyConfig;
pub use service::{ExitRequestFilter, ExitService};
pub use types::{Amount, CallerContext, Date, Outcome, Role};
