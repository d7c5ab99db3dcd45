use crate::error::IngestError;

/// Tagged result of an adapter call.
///
/// `Degraded` carries the value the caller should continue with (usually empty)
/// together with the reason the real value could not be produced.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { fallback: T, reason: String },
    Fatal(IngestError),
}

impl<T> Outcome<T> {
    pub fn degraded(fallback: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            fallback,
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    /// Collapses soft failures into their fallback value; only `Fatal` is an error.
    pub fn into_result(self) -> Result<T, IngestError> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::Degraded { fallback, .. } => Ok(fallback),
            Outcome::Fatal(err) => Err(err),
        }
    }
}

/// Result of one bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// All entries were accepted by the store
    Applied(usize),
    /// Nothing to write; no request was made
    Empty,
    /// The store rejected the operation; none of the entries count as written
    Failed(String),
}

impl BatchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed(_))
    }

    pub fn applied(&self) -> usize {
        match self {
            BatchOutcome::Applied(n) => *n,
            _ => 0,
        }
    }
}
