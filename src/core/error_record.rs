//! Fixed ring of recent hardware error records.
//!
//! Configuration failures and execution timeouts push a record with the
//! register dump taken at the time. The ring keeps the last
//! [`ERROR_RING_LEN`] records and overwrites the oldest when full.

use std::time::SystemTime;

use serde::Serialize;

pub const ERROR_RING_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Config,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub core: usize,
    pub kind: ErrorKind,
    /// Register programmer code; 0 for timeouts.
    pub code: i32,
    pub dump: String,
    #[serde(skip)]
    pub when: SystemTime,
}

#[derive(Debug)]
pub struct ErrorRecordRing {
    records: [Option<ErrorRecord>; ERROR_RING_LEN],
    /// Next write position.
    head: usize,
    len: usize,
    total: u64,
}

impl Default for ErrorRecordRing {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRecordRing {
    pub fn new() -> Self {
        Self {
            records: Default::default(),
            head: 0,
            len: 0,
            total: 0,
        }
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.records[self.head] = Some(record);
        self.head = (self.head + 1) % ERROR_RING_LEN;
        self.len = (self.len + 1).min(ERROR_RING_LEN);
        self.total += 1;
    }

    /// Records oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        let start = (self.head + ERROR_RING_LEN - self.len) % ERROR_RING_LEN;
        (0..self.len).filter_map(move |k| self.records[(start + k) % ERROR_RING_LEN].as_ref())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records pushed since start, including overwritten ones.
    pub fn total(&self) -> u64 {
        self.total
    }
}
