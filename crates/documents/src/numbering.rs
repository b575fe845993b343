//! Identifier Generator: `<PREFIX>-<YYYYMM>-<RRR>`.
//!
//! The random suffix makes numbers probabilistic, not unique: two documents of
//! the same kind for the same owner in the same month collide with p≈1/1000.
//! Uniqueness is enforced at the store write boundary, which retries with a
//! fresh number.

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::document::DocumentKind;

/// Exclusive upper bound of the random suffix.
pub const SUFFIX_SPACE: u32 = 1000;

/// Human-readable document number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentNumber(String);

impl DocumentNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn generate_number<R: Rng + ?Sized>(
    kind: DocumentKind,
    at: DateTime<Utc>,
    rng: &mut R,
) -> DocumentNumber {
    let suffix = rng.gen_range(0..SUFFIX_SPACE);
    DocumentNumber(format!(
        "{}-{:04}{:02}-{:03}",
        kind.prefix(),
        at.year(),
        at.month(),
        suffix
    ))
}

/// Generate a number for the current month using the thread-local RNG.
pub fn next_number(kind: DocumentKind) -> DocumentNumber {
    generate_number(kind, Utc::now(), &mut rand::thread_rng())
}
