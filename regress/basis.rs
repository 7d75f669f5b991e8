//! # Basis functions
//!
//! Every candidate regressor is a [`BasisFunction`]: a kind tag plus explicit
//! operands, evaluated by a single `match`. Functions that would divide by
//! zero or take the logarithm of zero evaluate to `1.0` on a zero input, so a
//! trial whose metric is exactly zero never produces a non-finite design
//! entry.
//!
//! ## Encoding
//!
//! Each function has a stable text form, a tag followed by its operands:
//!
//! | tag | function                 | operands |
//! |-----|--------------------------|----------|
//! | `0` | constant one             |          |
//! | `1` | `x[i]^e`                 | `i e`    |
//! | `2` | `x[i] * x[j]`            | `i j`    |
//! | `3` | `max(x[j] - c, 0)`       | `j c`    |
//! | `4` | `log2(abs(x[i]))`        | `i`      |
//! | `5` | `max(c - x[j], 0)`       | `j c`    |
//! | `6` | `sqrt(abs(x[i]))`        | `i`      |
//!
//! A product of functions is encoded by concatenating its factors; decoding
//! consumes operands by the arity of each tag.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exponents expanded for every column when the power kind is enabled.
pub const POWER_EXPONENTS: [f64; 6] = [-2.0, -1.0, -0.5, 0.5, 1.0, 2.0];

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Encoded function is empty.")]
    Empty,
    #[error("Unknown basis function tag '{0}'.")]
    UnknownTag(String),
    #[error("Basis function tag {tag} is missing its operands.")]
    MissingOperand { tag: u8 },
    #[error("Operand '{token}' is not a valid {expected}.")]
    InvalidOperand {
        token: String,
        expected: &'static str,
    },
    #[error("Expected a single basis function but found trailing operands.")]
    TrailingInput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BasisFunction {
    Constant,
    Power { column: usize, exponent: f64 },
    Cross { left: usize, right: usize },
    Hinge { column: usize, knot: f64 },
    Log2 { column: usize },
    ReflectedHinge { column: usize, knot: f64 },
    Sqrt { column: usize },
}

impl BasisFunction {
    pub fn tag(&self) -> u8 {
        match self {
            BasisFunction::Constant => 0,
            BasisFunction::Power { .. } => 1,
            BasisFunction::Cross { .. } => 2,
            BasisFunction::Hinge { .. } => 3,
            BasisFunction::Log2 { .. } => 4,
            BasisFunction::ReflectedHinge { .. } => 5,
            BasisFunction::Sqrt { .. } => 6,
        }
    }

    pub fn evaluate(&self, row: ArrayView1<f64>) -> f64 {
        match *self {
            BasisFunction::Constant => 1.0,
            BasisFunction::Power { column, exponent } => power(row[column], exponent),
            BasisFunction::Cross { left, right } => row[left] * row[right],
            BasisFunction::Hinge { column, knot } => (row[column] - knot).max(0.0),
            BasisFunction::Log2 { column } => {
                let x = row[column];
                if x == 0.0 { 1.0 } else { x.abs().log2() }
            }
            BasisFunction::ReflectedHinge { column, knot } => (knot - row[column]).max(0.0),
            BasisFunction::Sqrt { column } => row[column].abs().sqrt(),
        }
    }

    /// Input columns this function reads, in operand order.
    pub fn columns(&self) -> Vec<usize> {
        match *self {
            BasisFunction::Constant => Vec::new(),
            BasisFunction::Cross { left, right } => vec![left, right],
            BasisFunction::Power { column, .. }
            | BasisFunction::Hinge { column, .. }
            | BasisFunction::Log2 { column }
            | BasisFunction::ReflectedHinge { column, .. }
            | BasisFunction::Sqrt { column } => vec![column],
        }
    }

    pub fn is_hinge(&self) -> bool {
        matches!(
            self,
            BasisFunction::Hinge { .. } | BasisFunction::ReflectedHinge { .. }
        )
    }

    pub fn encode(&self) -> String {
        match *self {
            BasisFunction::Constant => "0".to_string(),
            BasisFunction::Power { column, exponent } => format!("1 {column} {exponent}"),
            BasisFunction::Cross { left, right } => format!("2 {left} {right}"),
            BasisFunction::Hinge { column, knot } => format!("3 {column} {knot}"),
            BasisFunction::Log2 { column } => format!("4 {column}"),
            BasisFunction::ReflectedHinge { column, knot } => format!("5 {column} {knot}"),
            BasisFunction::Sqrt { column } => format!("6 {column}"),
        }
    }

    /// Human-oriented rendering used in logs and model summaries.
    pub fn readable(&self) -> String {
        match *self {
            BasisFunction::Constant => "1".to_string(),
            BasisFunction::Power { column, exponent } => format!("x[{column}]^{exponent}"),
            BasisFunction::Cross { left, right } => format!("x[{left}] * x[{right}]"),
            BasisFunction::Hinge { column, knot } => format!("max(x[{column}] - {knot}, 0)"),
            BasisFunction::Log2 { column } => format!("log(|x[{column}]|)"),
            BasisFunction::ReflectedHinge { column, knot } => {
                format!("max({knot} - x[{column}], 0)")
            }
            BasisFunction::Sqrt { column } => format!("sqrt(|x[{column}]|)"),
        }
    }

    /// Decodes every function in a whitespace separated sequence.
    pub fn decode_sequence(encoded: &str) -> Result<Vec<BasisFunction>, DecodeError> {
        let mut tokens = encoded.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Err(DecodeError::Empty);
        }
        let mut functions = Vec::new();
        while tokens.peek().is_some() {
            functions.push(internal::decode_one(&mut tokens)?);
        }
        Ok(functions)
    }
}

impl FromStr for BasisFunction {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Err(DecodeError::Empty);
        }
        let function = internal::decode_one(&mut tokens)?;
        if tokens.next().is_some() {
            return Err(DecodeError::TrailingInput);
        }
        Ok(function)
    }
}

impl fmt::Display for BasisFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.readable())
    }
}

/// `|x|^e`, and 1 when `x` is zero whatever the exponent.
fn power(x: f64, exponent: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    x.abs().powf(exponent)
}

/// Families of functions that can be expanded into a candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasisKind {
    Constant,
    Power,
    Cross,
    Log,
    Sqrt,
}

impl BasisKind {
    pub fn default_set() -> Vec<BasisKind> {
        vec![
            BasisKind::Constant,
            BasisKind::Power,
            BasisKind::Cross,
            BasisKind::Log,
        ]
    }
}

impl FromStr for BasisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" => Ok(BasisKind::Constant),
            "power" => Ok(BasisKind::Power),
            "cross" => Ok(BasisKind::Cross),
            "log" => Ok(BasisKind::Log),
            "sqrt" => Ok(BasisKind::Sqrt),
            other => Err(format!(
                "unknown basis kind '{other}' (expected constant, power, cross, log or sqrt)"
            )),
        }
    }
}

/// Expands the enabled kinds over `columns` input columns. Each kind appears
/// once no matter how often it is listed; cross products cover `i <= j` only.
pub fn build_pool(kinds: &[BasisKind], columns: usize) -> Vec<BasisFunction> {
    let mut seen = Vec::with_capacity(kinds.len());
    let mut pool = Vec::new();
    for &kind in kinds {
        if seen.contains(&kind) {
            continue;
        }
        seen.push(kind);
        match kind {
            BasisKind::Constant => pool.push(BasisFunction::Constant),
            BasisKind::Power => {
                for column in 0..columns {
                    for &exponent in &POWER_EXPONENTS {
                        pool.push(BasisFunction::Power { column, exponent });
                    }
                }
            }
            BasisKind::Cross => {
                for left in 0..columns {
                    for right in left..columns {
                        pool.push(BasisFunction::Cross { left, right });
                    }
                }
            }
            BasisKind::Log => {
                pool.extend((0..columns).map(|column| BasisFunction::Log2 { column }))
            }
            BasisKind::Sqrt => {
                pool.extend((0..columns).map(|column| BasisFunction::Sqrt { column }))
            }
        }
    }
    pool
}

mod internal {
    use super::*;
    use std::iter::Peekable;

    pub(super) fn decode_one<'a, I>(tokens: &mut Peekable<I>) -> Result<BasisFunction, DecodeError>
    where
        I: Iterator<Item = &'a str>,
    {
        let tag_token = tokens.next().ok_or(DecodeError::Empty)?;
        let tag: u8 = tag_token
            .parse()
            .map_err(|_| DecodeError::UnknownTag(tag_token.to_string()))?;
        let function = match tag {
            0 => BasisFunction::Constant,
            1 => BasisFunction::Power {
                column: index(tokens, tag)?,
                exponent: real(tokens, tag)?,
            },
            2 => BasisFunction::Cross {
                left: index(tokens, tag)?,
                right: index(tokens, tag)?,
            },
            3 => BasisFunction::Hinge {
                column: index(tokens, tag)?,
                knot: real(tokens, tag)?,
            },
            4 => BasisFunction::Log2 {
                column: index(tokens, tag)?,
            },
            5 => BasisFunction::ReflectedHinge {
                column: index(tokens, tag)?,
                knot: real(tokens, tag)?,
            },
            6 => BasisFunction::Sqrt {
                column: index(tokens, tag)?,
            },
            _ => return Err(DecodeError::UnknownTag(tag_token.to_string())),
        };
        Ok(function)
    }

    fn index<'a, I>(tokens: &mut Peekable<I>, tag: u8) -> Result<usize, DecodeError>
    where
        I: Iterator<Item = &'a str>,
    {
        let token = tokens.next().ok_or(DecodeError::MissingOperand { tag })?;
        token.parse().map_err(|_| DecodeError::InvalidOperand {
            token: token.to_string(),
            expected: "column index",
        })
    }

    fn real<'a, I>(tokens: &mut Peekable<I>, tag: u8) -> Result<f64, DecodeError>
    where
        I: Iterator<Item = &'a str>,
    {
        let token = tokens.next().ok_or(DecodeError::MissingOperand { tag })?;
        match token.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(DecodeError::InvalidOperand {
                token: token.to_string(),
                expected: "finite number",
            }),
        }
    }
}
