//! # Sorted-Set Scores
//!
//! Purpose: Represent sorted-set scores, range endpoints and member/score
//! pairs, and convert them to and from their wire text.
//!
//! ## Design Principles
//! 1. **Sentinels Are Values**: Positive and negative infinity are ordinary
//!    `Score` values, so arithmetic results such as `zincrby` at `+inf`
//!    decode without special cases.
//! 2. **Tagged Endpoints**: Inclusive, exclusive and infinite endpoints are
//!    distinct variants; an infinite endpoint never carries a flag.
//! 3. **Exact Integers**: Integral scores within the 53-bit safe range are
//!    written without a fractional part.
//!
//! ## Wire Forms
//!
//! ```text
//! Score           1     2.5     +inf    -inf
//! ScoreBound      1     (1      +inf    -inf
//! LexBound        [a    (a      +       -
//! ```

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

use crate::error::ScoreParseError;

/// Largest integer a score can hold without losing precision (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Sorted-set score.
///
/// Scores are IEEE doubles on the store side; `Score` keeps that
/// representation and adds the infinity sentinels as named constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f64);

impl Score {
    /// Positive infinity sentinel.
    pub const INFINITY: Score = Score(f64::INFINITY);
    /// Negative infinity sentinel.
    pub const NEG_INFINITY: Score = Score(f64::NEG_INFINITY);

    /// Wraps a raw double.
    pub const fn new(value: f64) -> Self {
        Score(value)
    }

    /// Returns the raw double.
    pub const fn value(self) -> f64 {
        self.0
    }

    /// True for either infinity sentinel.
    pub fn is_infinite(self) -> bool {
        self.0.is_infinite()
    }

    /// True when the score is NaN, which the store rejects.
    pub fn is_nan(self) -> bool {
        self.0.is_nan()
    }

    /// Returns the score as an integer when it is integral and 53-bit safe.
    pub fn as_safe_integer(self) -> Option<i64> {
        let value = self.0;
        if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER as f64 {
            Some(value as i64)
        } else {
            None
        }
    }

    /// Encodes the score into its wire text.
    pub fn to_wire(self) -> Vec<u8> {
        if self.0 == f64::INFINITY {
            return b"+inf".to_vec();
        }
        if self.0 == f64::NEG_INFINITY {
            return b"-inf".to_vec();
        }
        match self.as_safe_integer() {
            Some(int) => int.to_string().into_bytes(),
            None => self.0.to_string().into_bytes(),
        }
    }

    /// Parses a score from a reply payload.
    ///
    /// Accepts plain decimals, exponent notation and `inf`/`+inf`/`-inf` in
    /// any case.
    pub fn parse(raw: &[u8]) -> Result<Self, ScoreParseError> {
        let invalid = || ScoreParseError {
            raw: String::from_utf8_lossy(raw).into_owned(),
        };
        let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
        let lowered = text.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "inf" | "+inf" | "infinity" | "+infinity" => return Ok(Score::INFINITY),
            "-inf" | "-infinity" => return Ok(Score::NEG_INFINITY),
            "" | "nan" | "+nan" | "-nan" => return Err(invalid()),
            _ => {}
        }
        lowered.parse::<f64>().map(Score).map_err(|_| invalid())
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl From<f64> for Score {
    fn from(value: f64) -> Self {
        Score(value)
    }
}

impl From<i32> for Score {
    fn from(value: i32) -> Self {
        Score(f64::from(value))
    }
}

impl From<i64> for Score {
    fn from(value: i64) -> Self {
        Score(value as f64)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_wire()))
    }
}

/// Endpoint of a score interval used by range-by-score queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    /// Includes members whose score equals the bound.
    Inclusive(Score),
    /// Excludes members whose score equals the bound.
    Exclusive(Score),
    /// Unbounded below.
    NegInfinity,
    /// Unbounded above.
    PosInfinity,
}

impl ScoreBound {
    /// Encodes the endpoint, prefixing `(` for exclusive bounds.
    pub fn to_wire(self) -> Vec<u8> {
        match self {
            ScoreBound::Inclusive(score) => score.to_wire(),
            ScoreBound::Exclusive(score) => {
                let mut out = Vec::with_capacity(8);
                out.push(b'(');
                out.extend_from_slice(&score.to_wire());
                out
            }
            ScoreBound::NegInfinity => b"-inf".to_vec(),
            ScoreBound::PosInfinity => b"+inf".to_vec(),
        }
    }
}

/// Endpoint of a lexicographic interval (`zremrangebylex`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    /// Includes the given member.
    Inclusive(Bytes),
    /// Excludes the given member.
    Exclusive(Bytes),
    /// Smallest possible member.
    Min,
    /// Largest possible member.
    Max,
}

impl LexBound {
    /// Encodes the endpoint with its `[`, `(`, `-` or `+` marker.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            LexBound::Inclusive(member) => prefixed(b'[', member),
            LexBound::Exclusive(member) => prefixed(b'(', member),
            LexBound::Min => b"-".to_vec(),
            LexBound::Max => b"+".to_vec(),
        }
    }
}

fn prefixed(marker: u8, member: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(member.len() + 1);
    out.push(marker);
    out.extend_from_slice(member);
    out
}

/// Member of a sorted set together with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberScore {
    /// Member name (binary-safe).
    pub member: Bytes,
    /// Ordering score.
    pub score: Score,
}

impl MemberScore {
    /// Builds a pair from any byte-like member.
    pub fn new(member: impl Into<Bytes>, score: impl Into<Score>) -> Self {
        MemberScore {
            member: member.into(),
            score: score.into(),
        }
    }
}

/// Flattens member/score pairs into `ZADD` argument order (score, member).
pub fn flatten_scored(members: &[MemberScore]) -> Vec<Vec<u8>> {
    let mut args = Vec::with_capacity(members.len() * 2);
    for pair in members {
        args.push(pair.score.to_wire());
        args.push(pair.member.to_vec());
    }
    args
}
