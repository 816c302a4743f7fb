use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("Cursor cannot move backwards from {current} to {proposed}")]
    Regression { current: i64, proposed: i64 },

    #[error("Invalid cursor value '{0}': expected a signed 64-bit integer")]
    Parse(String),
}

/// Highest source primary key known to be fully copied.
///
/// Every row with a key less than or equal to the cursor has been applied to
/// the destination at least once. The cursor never moves backwards.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(i64);

impl Cursor {
    /// Cursor of a run that has not copied anything yet.
    pub const START: Cursor = Cursor(0);

    pub fn new(value: i64) -> Self {
        Cursor(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Moves the cursor to `key`, the last key of a fully copied batch.
    pub fn advance_to(self, key: i64) -> Result<Cursor, CursorError> {
        if key < self.0 {
            return Err(CursorError::Regression {
                current: self.0,
                proposed: key,
            });
        }
        Ok(Cursor(key))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Cursor)
            .map_err(|_| CursorError::Parse(s.to_string()))
    }
}

impl From<i64> for Cursor {
    fn from(value: i64) -> Self {
        Cursor(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_forward_and_stays_put() {
        let cursor = Cursor::START.advance_to(100).unwrap();
        assert_eq!(cursor.value(), 100);
        assert_eq!(cursor.advance_to(100).unwrap(), cursor);
    }

    #[test]
    fn rejects_regression() {
        let cursor = Cursor::new(250);
        assert_eq!(
            cursor.advance_to(200),
            Err(CursorError::Regression {
                current: 250,
                proposed: 200
            })
        );
    }

    #[test]
    fn parses_operator_input() {
        assert_eq!(" 42 ".parse::<Cursor>().unwrap(), Cursor::new(42));
        assert!(matches!("forty".parse::<Cursor>(), Err(CursorError::Parse(_))));
    }
}
