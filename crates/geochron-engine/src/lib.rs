#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Formula-driven reduction engine for SHRIMP ion-microprobe data.
//!
//! Raw per-spot mass-spectrometry arrays are reduced to isotopic ratios and
//! ages through a user-extensible calculation system: Excel-like infix
//! formulas are lexed and converted to postfix ([`parser`]), rebuilt into
//! named, cross-referencing expression trees ([`tree`]), ordered so that
//! dependencies evaluate first, and evaluated per analysis spot into
//! `(value, one_sigma)` pairs ([`eval`]). The worksheet-style function
//! vocabulary ([`functions`]) calls into a pure numeric statistics kernel
//! ([`stats`]): weighted means and regressions with automatic single-point
//! outlier rejection, Tukey's biweight, and an arbitrary-precision square
//! root.
//!
//! The engine is a pure library: no filesystem, network, or process surface.
//! Collaborators hand it a [`TaskDefinition`] (registry seed and switches)
//! plus per-spot raw data ([`Spot`]), and consume evaluated rows
//! ([`EvaluationResult`]) per expression per spot group.
//!
//! Malformed input stays workable by design: a formula that fails to parse
//! roots its tree in a sentinel, unknown names degrade to missing
//! placeholders, and degenerate fits return flagged results. Health checks
//! and audit strings surface all of it without aborting an interactive
//! session.

pub mod constants;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod registry;
pub mod stats;
pub mod task;
pub mod tree;

mod value;

pub use error::{CycleError, EngineError};
pub use eval::{EvaluationResult, RatioValue, Spot};
pub use parser::{
    infix_to_postfix, lex, lex_partial, ParseError, PartialLex, PostfixOutput, Span, Token,
    TokenKind, UncertaintyDirective,
};
pub use registry::NamedExpressionRegistry;
pub use task::{
    CompiledExpression, ConstantDefinition, ExpressionDefinition, GroupResults, RoundTripReport,
    SpotCollection, Task, TaskDefinition, TaskResults,
};
pub use tree::{ContextFlags, ExpressionNode, NodeId, NodeKind};
pub use value::{ErrorKind, Value};
