//! Cardinality ranges in the literal `[min:max]` syntax.
//!
//! Either bound may be empty: `[:]` means zero to unbounded, `[2:]`
//! means at least two, `[:5]` means at most five. Parsed once, here,
//! and reused by the tree builder and the scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permitted instance-count range for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    /// Lower bound (0 when the bound was empty).
    pub min: u32,

    /// Upper bound, `None` when unbounded.
    pub max: Option<u32>,
}

/// Cardinality syntax errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CardinalityError {
    #[error("cardinality must be of the form [min:max], got {0:?}")]
    Malformed(String),

    #[error("cardinality bound is not a number: {0:?}")]
    BadBound(String),

    #[error("cardinality min {min} exceeds max {max}")]
    Inverted { min: u32, max: u32 },
}

impl Cardinality {
    /// An exact range: `[n:n]`.
    pub fn exactly(n: u32) -> Self {
        Self { min: n, max: Some(n) }
    }

    /// `[min:]`, unbounded above.
    pub fn at_least(min: u32) -> Self {
        Self { min, max: None }
    }

    /// `[:]`, any count.
    pub fn any() -> Self {
        Self { min: 0, max: None }
    }

    /// Whether `count` lies within the range.
    pub fn contains(&self, count: u32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::any()
    }
}

impl std::str::FromStr for Cardinality {
    type Err = CardinalityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| CardinalityError::Malformed(s.to_string()))?;

        let (lo, hi) = inner
            .split_once(':')
            .ok_or_else(|| CardinalityError::Malformed(s.to_string()))?;

        let parse_bound = |bound: &str| -> Result<Option<u32>, CardinalityError> {
            let bound = bound.trim();
            if bound.is_empty() {
                return Ok(None);
            }
            bound
                .parse::<u32>()
                .map(Some)
                .map_err(|_| CardinalityError::BadBound(bound.to_string()))
        };

        let min = parse_bound(lo)?.unwrap_or(0);
        let max = parse_bound(hi)?;

        if let Some(max) = max {
            if min > max {
                return Err(CardinalityError::Inverted { min, max });
            }
        }

        Ok(Self { min, max })
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}:{}]", self.min, max),
            None => write!(f, "[{}:]", self.min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_range() {
        let c: Cardinality = "[2:5]".parse().unwrap();
        assert_eq!(c, Cardinality { min: 2, max: Some(5) });
    }

    #[test]
    fn parses_open_bounds() {
        assert_eq!("[:]".parse::<Cardinality>().unwrap(), Cardinality::any());
        assert_eq!(
            "[3:]".parse::<Cardinality>().unwrap(),
            Cardinality::at_least(3)
        );
        assert_eq!(
            "[:10]".parse::<Cardinality>().unwrap(),
            Cardinality { min: 0, max: Some(10) }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "2:5".parse::<Cardinality>(),
            Err(CardinalityError::Malformed(_))
        ));
        assert!(matches!(
            "[a:5]".parse::<Cardinality>(),
            Err(CardinalityError::BadBound(_))
        ));
        assert!(matches!(
            "[5:2]".parse::<Cardinality>(),
            Err(CardinalityError::Inverted { .. })
        ));
    }

    #[test]
    fn contains_respects_bounds() {
        let c: Cardinality = "[1:3]".parse().unwrap();
        assert!(!c.contains(0));
        assert!(c.contains(1));
        assert!(c.contains(3));
        assert!(!c.contains(4));
        assert!(Cardinality::at_least(1).contains(1_000_000));
    }
}
