//! Error types for solver preconditions.

use thiserror::Error;

/// Recoverable precondition failures surfaced before iteration begins.
///
/// Everything that happens during iteration is reported through the
/// returned status and results snapshot, never through `Result`.
#[derive(Debug, Error)]
pub enum SqpError {
    /// The initial point does not match the problem's variable count.
    #[error("initialization vector has wrong length: expected {expected}, got {got}")]
    InitializationLength { expected: usize, got: usize },
}
