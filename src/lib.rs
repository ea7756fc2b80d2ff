//! Parser and evaluator for compact single-letter variable math expressions.
//!
//! Expressions are written without whitespace: variables are uppercase
//! letters, literals are unsigned decimal integers, `%pi` and `%e` are the
//! usual constants, and `ln abs sin cos tan arcsin arccos arctan` apply to a
//! parenthesized argument. `+ - * / ^` combine operands with the usual
//! precedence, `^` being right-associative.
//!
//! Parsing is a single left-to-right scan driven by an explicit stack of
//! grammar symbols. The tree is built as the scan goes: an operator found
//! after its left operand is already in place is spliced in above that
//! operand.
//!
//! # Example
//!
//! ```rust
//! use letter_expr::*;
//!
//! let (mut function, num_vars) = parse("2*(X+Y)^2").unwrap();
//! assert_eq!(num_vars, 2);
//! assert_eq!(function.evaluate_with(&[1.0, 2.0]), 18.0);
//!
//! // Wrong number of values.
//! assert!(function.evaluate_at(1.0).is_nan());
//! ```

mod error;
mod evaluate;
mod expression;
mod parse;
mod proptests;

/// The accepted grammar.
///
/// ```text
#[doc = include_str!("grammar.ebnf")]
/// ```
pub mod grammar_doc {}

pub use error::*;
pub use evaluate::*;
pub use expression::*;
pub use parse::parse;

pub trait FloatExt:
    num_traits::Float
    + num_traits::FloatConst
    + std::str::FromStr
    + std::fmt::Debug
    + std::fmt::Display
    + Send
    + Sync
{
}
impl FloatExt for f32 {}
impl FloatExt for f64 {}
