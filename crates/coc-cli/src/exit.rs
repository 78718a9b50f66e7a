//! Error-to-exit-code mapping for CI consumers.

use std::process::ExitCode;

use coc_core::ledger::LedgerError;
use coc_core::schema::SchemaError;
use coc_core::trace::TraceStoreError;

/// Verification reported failures.
pub const VERIFICATION_FAILED: u8 = 1;

/// Malformed input: bad ids, hashes, documents, or arguments.
pub const VALIDATION: u8 = 2;

/// Runtime protocol error: integrity preconditions, lock contention.
pub const PROTOCOL: u8 = 3;

/// Internal error: I/O and everything unclassified.
pub const INTERNAL: u8 = 4;

/// A policy preflight blocked the operation before anything was written.
pub const POLICY_BLOCKED: u8 = 5;

/// Classifies an error chain into the documented exit codes and prints it
/// to stderr.
pub fn report(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {error:#}");
    ExitCode::from(classify(error))
}

fn classify(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if cause.is::<SchemaError>() {
            return VALIDATION;
        }
        if let Some(ledger) = cause.downcast_ref::<LedgerError>() {
            return match ledger {
                LedgerError::Validation(_) => VALIDATION,
                LedgerError::TraceIdMismatch { .. }
                | LedgerError::PrevHashMismatch { .. }
                | LedgerError::DuplicateEventId { .. }
                | LedgerError::LockTimeout { .. } => PROTOCOL,
                _ => INTERNAL,
            };
        }
        if let Some(trace) = cause.downcast_ref::<TraceStoreError>() {
            return match trace {
                TraceStoreError::NotFound { .. }
                | TraceStoreError::InsufficientParticipants { .. } => VALIDATION,
                _ => INTERNAL,
            };
        }
    }
    INTERNAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_errors_classify_as_validation() {
        let error = anyhow::Error::new(SchemaError::InvalidHash {
            value: "xyz".to_string(),
        });
        assert_eq!(classify(&error), VALIDATION);
    }

    #[test]
    fn test_ledger_preconditions_classify_as_protocol() {
        let error = anyhow::Error::new(LedgerError::DuplicateEventId {
            event_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
        });
        assert_eq!(classify(&error), PROTOCOL);
    }

    #[test]
    fn test_unknown_errors_classify_as_internal() {
        let error = anyhow::anyhow!("something else");
        assert_eq!(classify(&error), INTERNAL);
    }

    #[test]
    fn test_wrapped_causes_are_found() {
        let error = anyhow::Error::new(TraceStoreError::NotFound {
            trace_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
        })
        .context("while verifying");
        assert_eq!(classify(&error), VALIDATION);
    }
}
