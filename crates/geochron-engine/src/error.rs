use std::fmt;

use thiserror::Error;

/// A circular reference among named expressions, with the offending path.
///
/// Cycles are rejected up front, before evaluation ordering: the legacy
/// partial-order comparator produces inconsistent answers for a genuine
/// cycle, so the registry refuses to order one at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: ")?;
        for (idx, name) in self.path.iter().enumerate() {
            if idx > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{name}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}

/// Data-integrity failures at the engine's seams.
///
/// Everything recoverable (parse problems, missing references, arity
/// mismatches, degenerate fits) degrades to placeholders, audit strings, or
/// `bad` result flags instead. These variants are reserved for inputs the
/// engine cannot meaningfully evaluate against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("spot {spot:?} carries no data for species {species:?}")]
    UnknownSpecies { species: String, spot: String },

    #[error("spot {spot:?} carries no field {field:?}")]
    UnknownField { field: String, spot: String },

    #[error("spot {spot:?} carries no isotopic ratio {ratio:?}")]
    UnknownRatio { ratio: String, spot: String },

    #[error("an expression named {0:?} is already registered")]
    DuplicateExpressionName(String),

    #[error("ratio name {0:?} is not of the form \"numerator/denominator\"")]
    InvalidRatioName(String),

    #[error("no expression named {0:?} is registered")]
    UnknownExpression(String),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}
