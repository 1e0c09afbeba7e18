//! Error taxonomy shared by every exit workflow operation
use std::convert::Infallible;
use std::fmt;

/// Stable classification of an [`ExitError`], safe to match on across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Dependency,
    Storage,
    Internal,
}

/// A single offending input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Distinguishes an idempotent repeat from a genuinely out-of-order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The record already sits in the state the caller asked for.
    AlreadyInState { state: String },
    /// The record is in a state the operation does not accept.
    WrongState { expected: Vec<String>, actual: String },
    /// Other writers kept changing the record for every attempt.
    Contended { attempts: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum ExitError {
    #[error("Validation failed: {}", render_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(ConflictKind),
    #[error("{collaborator} failed: {message}")]
    Dependency {
        collaborator: &'static str,
        message: String,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Invalid policy configuration: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExitError::Validation(_) | ExitError::Config(_) => ErrorKind::Validation,
            ExitError::NotFound { .. } => ErrorKind::NotFound,
            ExitError::Forbidden(_) => ErrorKind::Forbidden,
            ExitError::Conflict(_) => ErrorKind::Conflict,
            ExitError::Dependency { .. } => ErrorKind::Dependency,
            ExitError::Storage(_) | ExitError::Encode(_) | ExitError::Decode(_) => {
                ErrorKind::Storage
            }
            ExitError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Machine readable code for the error, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            ExitError::Validation(_) => "VALIDATION_ERROR",
            ExitError::NotFound { .. } => "NOT_FOUND",
            ExitError::Forbidden(_) => "FORBIDDEN",
            ExitError::Conflict(ConflictKind::AlreadyInState { .. }) => "ALREADY_IN_STATE",
            ExitError::Conflict(ConflictKind::WrongState { .. }) => "INVALID_STATUS",
            ExitError::Conflict(ConflictKind::Contended { .. }) => "CONTENDED",
            ExitError::Dependency { .. } => "DEPENDENCY_ERROR",
            ExitError::Storage(_) => "STORAGE_ERROR",
            ExitError::Encode(_) => "ENCODE_ERROR",
            ExitError::Decode(_) => "DECODE_ERROR",
            ExitError::Config(_) => "CONFIG_ERROR",
            ExitError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ExitError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ExitError::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn already_in(state: impl ToString) -> Self {
        ExitError::Conflict(ConflictKind::AlreadyInState {
            state: state.to_string(),
        })
    }

    pub fn wrong_state<S: ToString>(expected: &[S], actual: impl ToString) -> Self {
        ExitError::Conflict(ConflictKind::WrongState {
            expected: expected.iter().map(ToString::to_string).collect(),
            actual: actual.to_string(),
        })
    }

    pub fn contended(attempts: usize) -> Self {
        ExitError::Conflict(ConflictKind::Contended { attempts })
    }

    pub fn is_already_in_state(&self) -> bool {
        matches!(self, ExitError::Conflict(ConflictKind::AlreadyInState { .. }))
    }

    /// Offending fields for a validation failure, empty for every other kind.
    pub fn fields(&self) -> &[FieldError] {
        match self {
            ExitError::Validation(fields) => fields,
            _ => &[],
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::AlreadyInState { state } => write!(f, "Invalid status: already {state}"),
            ConflictKind::WrongState { expected, actual } => write!(
                f,
                "Invalid status: expected one of [{}], found {actual}",
                expected.join(", ")
            ),
            ConflictKind::Contended { attempts } => {
                write!(f, "Record kept changing, gave up after {attempts} attempts")
            }
        }
    }
}

impl From<minicbor::encode::Error<Infallible>> for ExitError {
    fn from(value: minicbor::encode::Error<Infallible>) -> Self {
        ExitError::Encode(value.to_string())
    }
}

fn render_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects every offending field before failing, so callers see all of them at once.
#[derive(Debug, Default)]
pub struct Violations(Vec<FieldError>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }
    /// Records a violation for `field` when `amount` is below zero.
    pub fn non_negative(&mut self, field: impl Into<String>, amount: i64) {
        if amount < 0 {
            self.push(field, format!("must not be negative, got {amount}"));
        }
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn into_result(self) -> Result<(), ExitError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ExitError::Validation(self.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_report_every_field() {
        let mut v = Violations::new();
        v.non_negative("bonus", -1);
        v.non_negative("incentives", 10);
        v.non_negative("reimbursements", -5);

        let err = v.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let fields: Vec<_> = err.fields().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["bonus", "reimbursements"]);
    }

    #[test]
    fn conflict_codes_differ() {
        let repeat = ExitError::already_in("manager_approved");
        let wrong = ExitError::wrong_state(&["initiated"], "hr_approved");

        assert!(repeat.is_already_in_state());
        assert!(!wrong.is_already_in_state());
        assert_eq!(repeat.kind(), wrong.kind());
        assert_ne!(repeat.code(), wrong.code());
        assert_eq!(
            wrong.to_string(),
            "Invalid status: expected one of [initiated], found hr_approved"
        );

        let busy = ExitError::contended(3);
        assert_eq!(busy.kind(), ErrorKind::Conflict);
        assert_eq!(busy.code(), "CONTENDED");
        assert!(!busy.is_already_in_state());
    }
}
