use crate::pagination::cursor::Cursor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batch holds {len} keys but the limit is {limit}")]
    TooLarge { len: usize, limit: usize },

    #[error("Key {key} is not after cursor {cursor}")]
    NotAfterCursor { key: i64, cursor: Cursor },

    #[error("Keys are not strictly ascending: {prev} followed by {next}")]
    OutOfOrder { prev: i64, next: i64 },
}

/// Ordered primary keys listed after a cursor, processed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    keys: Vec<i64>,
}

impl Batch {
    /// Validates a listing result: at most `limit` keys, all greater than
    /// `after`, strictly ascending.
    pub fn new(after: Cursor, keys: Vec<i64>, limit: usize) -> Result<Self, BatchError> {
        if keys.len() > limit {
            return Err(BatchError::TooLarge {
                len: keys.len(),
                limit,
            });
        }

        if let Some(&first) = keys.first()
            && first <= after.value()
        {
            return Err(BatchError::NotAfterCursor {
                key: first,
                cursor: after,
            });
        }

        if let Some(pair) = keys.windows(2).find(|w| w[0] >= w[1]) {
            return Err(BatchError::OutOfOrder {
                prev: pair[0],
                next: pair[1],
            });
        }

        Ok(Batch { keys })
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Largest key in the batch.
    pub fn last(&self) -> Option<i64> {
        self.keys.last().copied()
    }
}

/// Result of applying one batch to the destination.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Keys the copier was asked to apply.
    pub requested: usize,
    /// Rows found at the source and upserted.
    pub copied: usize,
}
