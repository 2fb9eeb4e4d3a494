//! Service-level error surfaced by the registry and the ledger.

use serde::Serialize;
use thiserror::Error;

use equiptrack_auth::AuthzError;
use equiptrack_core::{DomainError, InstanceId};
use equiptrack_inventory::MovementType;

use crate::store::StoreError;

/// Stable classification callers can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    DuplicateSerial,
    InvalidTransition,
    MissingField,
    InvariantViolation,
    /// Lost a race on the instance; safe to retry.
    ConcurrencyConflict,
    Validation,
    Unauthorized,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::DuplicateSerial => "duplicate_serial",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::MissingField => "missing_field",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Storage => "storage",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by inventory operations.
///
/// Carries the instance and movement type involved (when known) for
/// caller-side diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct InventoryError {
    pub kind: ErrorKind,
    pub message: String,
    pub instance_id: Option<InstanceId>,
    pub movement_type: Option<MovementType>,
}

pub type InventoryResult<T> = Result<T, InventoryError>;

impl InventoryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            instance_id: None,
            movement_type: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn with_movement_type(mut self, movement_type: MovementType) -> Self {
        self.movement_type = Some(movement_type);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::ConcurrencyConflict
    }
}

impl From<DomainError> for InventoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => Self::new(ErrorKind::Validation, msg),
            DomainError::InvariantViolation(msg) => Self::new(ErrorKind::InvariantViolation, msg),
            DomainError::InvalidId(msg) => Self::new(ErrorKind::Validation, msg),
            DomainError::NotFound(msg) => Self::new(ErrorKind::NotFound, msg),
            DomainError::Conflict(msg) => Self::new(ErrorKind::ConcurrencyConflict, msg),
            DomainError::Unauthorized(msg) => Self::new(ErrorKind::Unauthorized, msg),
            DomainError::DuplicateSerial(msg) => Self::new(ErrorKind::DuplicateSerial, msg),
            DomainError::InvalidTransition(msg) => Self::new(ErrorKind::InvalidTransition, msg),
            DomainError::MissingField(msg) => Self::new(ErrorKind::MissingField, msg),
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => Self::new(ErrorKind::ConcurrencyConflict, msg),
            StoreError::Duplicate { serials } => Self::new(
                ErrorKind::DuplicateSerial,
                format!("serial number already registered: {}", serials.join(", ")),
            ),
            StoreError::NotFound(msg) => Self::new(ErrorKind::NotFound, msg),
            StoreError::Backend(msg) => Self::new(ErrorKind::Storage, msg),
        }
    }
}

impl From<AuthzError> for InventoryError {
    fn from(value: AuthzError) -> Self {
        Self::new(ErrorKind::Unauthorized, value.to_string())
    }
}
