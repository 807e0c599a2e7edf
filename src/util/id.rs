//! Issue id generation.
//!
//! Ids have the shape `<prefix>-<suffix>` with a lowercase base36 suffix
//! folded out of a SHA-256 digest over the issue's title, creation time,
//! and a retry counter. The suffix width scales with database size: two
//! base36 digits of headroom over the current issue count, so the space
//! stays sparse without ids growing past [`MAX_SUFFIX_WIDTH`].

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Narrowest suffix ever produced.
pub const MIN_SUFFIX_WIDTH: usize = 4;
/// Widest suffix produced by the widening retry loop.
pub const MAX_SUFFIX_WIDTH: usize = 10;

/// Retries between suffix widenings.
const WIDEN_EVERY: u32 = 8;
/// Retry ceiling before the counter is appended verbatim.
const GIVE_UP_AFTER: u32 = 4096;

/// Produces unique issue ids under one workspace prefix.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Suffix width for a database of `issue_count` issues: the base36
    /// digit count of the population plus two digits of headroom.
    #[must_use]
    pub fn suffix_width(&self, issue_count: usize) -> usize {
        let mut digits = 1;
        let mut n = issue_count;
        while n >= 36 {
            n /= 36;
            digits += 1;
        }
        (digits + 2).clamp(MIN_SUFFIX_WIDTH, MAX_SUFFIX_WIDTH)
    }

    /// Generate an id that the `exists` probe reports as free.
    ///
    /// Each retry reseeds the digest with the attempt counter; every
    /// [`WIDEN_EVERY`] collisions the suffix widens by one character up
    /// to [`MAX_SUFFIX_WIDTH`]. Past [`GIVE_UP_AFTER`] attempts the
    /// counter itself is appended, which cannot collide with digest-only
    /// suffixes of the same run.
    pub fn generate<F>(
        &self,
        title: &str,
        created_at: DateTime<Utc>,
        issue_count: usize,
        exists: F,
    ) -> String
    where
        F: Fn(&str) -> bool,
    {
        let nanos = created_at.timestamp_nanos_opt().unwrap_or(0);
        let mut width = self.suffix_width(issue_count);
        let mut attempt: u32 = 0;

        loop {
            let seed = format!("{title}\n{nanos}\n{attempt}");
            let candidate = format!("{}-{}", self.prefix, id_suffix(&seed, width));
            if !exists(&candidate) {
                return candidate;
            }

            attempt += 1;
            if attempt % WIDEN_EVERY == 0 && width < MAX_SUFFIX_WIDTH {
                width += 1;
            }
            if attempt > GIVE_UP_AFTER {
                // The probe keeps rejecting everything; a counter tail
                // ends the search deterministically.
                return format!("{candidate}{attempt}");
            }
        }
    }
}

/// Fold a seed into a lowercase base36 suffix of the given width.
///
/// One digest byte feeds one output character; SHA-256 provides 32
/// bytes, comfortably more than [`MAX_SUFFIX_WIDTH`].
#[must_use]
pub fn id_suffix(seed: &str, width: usize) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    digest
        .iter()
        .cycle()
        .take(width)
        .map(|byte| BASE36[(*byte % 36) as usize] as char)
        .collect()
}

/// Extract the prefix from an issue id: the characters before the last
/// `-`.
///
/// `bd-a3f8e9` -> `Some("bd")`, `bd-import-2` -> `Some("bd-import")`,
/// `nohyphen` -> `None`.
#[must_use]
pub fn extract_prefix(issue_id: &str) -> Option<&str> {
    let idx = issue_id.rfind('-')?;
    if idx == 0 {
        return None;
    }
    Some(&issue_id[..idx])
}
