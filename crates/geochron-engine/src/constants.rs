//! Physical constants seeded into every task registry.
//!
//! Decay constants follow Steiger & Jaeger (1977); `uRatio` is the natural
//! present-day 238U/235U abundance ratio.

/// 238U decay constant, 1/year.
pub const LAMBDA_238: f64 = 1.55125e-10;

/// 235U decay constant, 1/year.
pub const LAMBDA_235: f64 = 9.8485e-10;

/// 232Th decay constant, 1/year.
pub const LAMBDA_232: f64 = 4.9475e-11;

/// Present-day natural 238U/235U.
pub const URANIUM_238_235_RATIO: f64 = 137.88;

/// Named constants every registry starts from.
pub(crate) const PHYSICAL_CONSTANTS: [(&str, f64); 4] = [
    ("lambda238", LAMBDA_238),
    ("lambda235", LAMBDA_235),
    ("lambda232", LAMBDA_232),
    ("uRatio", URANIUM_238_235_RATIO),
];
