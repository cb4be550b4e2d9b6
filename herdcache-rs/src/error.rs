//! Contains the errors raised by the coordination layer itself.
//!
//! All operations of this crate return **anyhow::Result**. Errors of the collaborators (the
//! cache store, the data source or the lock backend) are passed through untouched, so that the
//! caller sees exactly what went wrong. Errors which originate in the coordinator are represented
//! as [CoordinatorError](CoordinatorError) and can be recovered via **downcast_ref**:
//!
//! ```
//! # use herdcache::error::CoordinatorError;
//! let error: anyhow::Error = CoordinatorError::Unsupported("populate_batch").into();
//! assert!(matches!(
//!     error.downcast_ref::<CoordinatorError>(),
//!     Some(CoordinatorError::Unsupported(_))
//! ));
//! ```
//!
//! Note that lock contention is never reported as error. It is either resolved by retrying or, if
//! the wait is interrupted, by returning an empty result.

/// Enumerates the failures detected by the coordination layer.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A collaborator was asked to perform an operation it doesn't provide.
    ///
    /// This signals a wiring problem (e.g. calling **batch_find** with a data source which only
    /// implements single lookups). It is raised on the first call and never retried.
    #[error("{0} is not implemented by this collaborator")]
    Unsupported(&'static str),

    /// A [Builder](crate::builder::Builder) was asked to build a coordinator without a required
    /// collaborator.
    #[error("Cannot build a coordinator for scope {scope}: no {collaborator} was provided")]
    Incomplete {
        /// The name of the scope of the coordinator being built.
        scope: String,
        /// The missing collaborator.
        collaborator: &'static str,
    },

    /// A bulk operation returned a number of values which doesn't match the number of requested
    /// keys or positions.
    #[error("{operation} returned {actual} values but {expected} were requested")]
    BatchMismatch {
        /// The bulk operation which misbehaved.
        operation: &'static str,
        /// The number of requested keys or positions.
        expected: usize,
        /// The number of values actually returned.
        actual: usize,
    },
}

/// Ensures that a bulk operation returned one value per requested key or position.
pub(crate) fn ensure_batch_len<T>(
    operation: &'static str,
    expected: usize,
    values: &[T],
) -> anyhow::Result<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(CoordinatorError::BatchMismatch {
            operation,
            expected,
            actual: values.len(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ensure_batch_len, CoordinatorError};

    #[test]
    fn mismatches_are_reported_with_both_lengths() {
        assert!(ensure_batch_len("get_many", 2, &[1, 2]).is_ok());

        let error = ensure_batch_len("get_many", 3, &[1]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "get_many returned 1 values but 3 were requested"
        );
        assert!(matches!(
            error.downcast_ref::<CoordinatorError>(),
            Some(CoordinatorError::BatchMismatch { expected: 3, .. })
        ));
    }
}
