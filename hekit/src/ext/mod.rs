//! Circuit extensions written purely against the [crate::Evaluator]
//! contract, usable under any variant.

pub mod poly;
pub mod sign;
