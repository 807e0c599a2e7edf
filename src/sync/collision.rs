//! Collision detection for import reconciliation.
//!
//! Pure classification of incoming records against the existing database:
//! no writes, deterministic output ordering (by incoming id) so dry-run
//! reporting is reproducible.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::Issue;
use crate::storage::Storage;

/// Index over existing issues by id and by content hash.
#[derive(Debug, Default)]
pub struct ExistingIndex {
    /// id -> content hash
    by_id: HashMap<String, String>,
    /// content hash -> id (first id in ascending order wins)
    by_hash: HashMap<String, String>,
}

impl ExistingIndex {
    /// Build the index from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the bulk read fails.
    pub fn build(storage: &dyn Storage) -> Result<Self> {
        let mut index = Self::default();
        for issue in storage.get_all_issues()? {
            let hash = issue
                .content_hash
                .clone()
                .unwrap_or_else(|| issue.compute_content_hash());
            index.by_hash.entry(hash.clone()).or_insert_with(|| issue.id.clone());
            index.by_id.insert(issue.id, hash);
        }
        Ok(index)
    }

    #[must_use]
    pub fn hash_for_id(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    #[must_use]
    pub fn id_for_hash(&self, hash: &str) -> Option<&str> {
        self.by_hash.get(hash).map(String::as_str)
    }
}

/// A content-matched record whose id changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePair {
    /// Existing DB id.
    pub old_id: String,
    /// Incoming id that replaces it.
    pub new_id: String,
}

/// Disjoint classification of one import batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifiedBatch {
    /// Incoming ids whose record already exists byte-for-byte (by hash).
    pub exact_matches: Vec<String>,
    /// Incoming ids that exist in the DB with different content.
    pub collisions: Vec<String>,
    /// Content matches under a new id.
    pub renames: Vec<RenamePair>,
    /// Genuinely new incoming ids.
    pub new_issues: Vec<String>,
}

/// Classify each incoming record against the existing index.
///
/// Per record `I` (content hashes are assumed recomputed by the caller):
/// 1. id exists: same hash -> `ExactMatch`, else -> `Collision`
/// 2. hash exists under another id -> `Rename { old_id, new_id: I.id }`
/// 3. otherwise -> `New`
#[must_use]
pub fn classify(index: &ExistingIndex, incoming: &[Issue]) -> ClassifiedBatch {
    let mut batch = ClassifiedBatch::default();

    let mut ordered: Vec<&Issue> = incoming.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    for issue in ordered {
        let hash = issue
            .content_hash
            .clone()
            .unwrap_or_else(|| issue.compute_content_hash());

        if let Some(existing_hash) = index.hash_for_id(&issue.id) {
            if existing_hash == hash {
                batch.exact_matches.push(issue.id.clone());
            } else {
                batch.collisions.push(issue.id.clone());
            }
            continue;
        }

        if let Some(old_id) = index.id_for_hash(&hash) {
            batch.renames.push(RenamePair {
                old_id: old_id.to_string(),
                new_id: issue.id.clone(),
            });
            continue;
        }

        batch.new_issues.push(issue.id.clone());
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use crate::storage::MemoryStorage;

    fn normalized(id: &str, title: &str) -> Issue {
        let mut issue = Issue::new(id, title);
        issue.content_hash = Some(issue.compute_content_hash());
        issue
    }

    fn index_of(issues: &[Issue]) -> ExistingIndex {
        let mut storage = MemoryStorage::new();
        for issue in issues {
            storage.create_issue(issue, "tester").unwrap();
        }
        ExistingIndex::build(&storage).unwrap()
    }

    #[test]
    fn classifies_exact_match() {
        let existing = normalized("bd-1", "Same");
        let index = index_of(std::slice::from_ref(&existing));
        let batch = classify(&index, &[existing.clone()]);
        assert_eq!(batch.exact_matches, vec!["bd-1".to_string()]);
        assert!(batch.collisions.is_empty());
        assert!(batch.renames.is_empty());
        assert!(batch.new_issues.is_empty());
    }

    #[test]
    fn classifies_collision() {
        let index = index_of(&[normalized("bd-1", "Original")]);
        let incoming = normalized("bd-1", "Changed");
        let batch = classify(&index, &[incoming]);
        assert_eq!(batch.collisions, vec!["bd-1".to_string()]);
    }

    #[test]
    fn classifies_rename() {
        let index = index_of(&[normalized("old-1", "Same content")]);
        let incoming = normalized("new-1", "Same content");
        let batch = classify(&index, &[incoming]);
        assert_eq!(
            batch.renames,
            vec![RenamePair {
                old_id: "old-1".to_string(),
                new_id: "new-1".to_string(),
            }]
        );
    }

    #[test]
    fn classifies_new() {
        let index = index_of(&[normalized("bd-1", "A")]);
        let incoming = normalized("bd-2", "B");
        let batch = classify(&index, &[incoming]);
        assert_eq!(batch.new_issues, vec!["bd-2".to_string()]);
    }

    #[test]
    fn id_match_takes_precedence_over_hash_match() {
        // bd-1 exists with content X; incoming bd-1 has content Y which also
        // matches bd-2. The id match wins: this is a collision, not a rename.
        let index = index_of(&[normalized("bd-1", "X"), normalized("bd-2", "Y")]);
        let incoming = normalized("bd-1", "Y");
        let batch = classify(&index, &[incoming]);
        assert_eq!(batch.collisions, vec!["bd-1".to_string()]);
        assert!(batch.renames.is_empty());
    }

    #[test]
    fn output_is_sorted_by_incoming_id() {
        let index = index_of(&[]);
        let batch = classify(&index, &[normalized("bd-9", "Z"), normalized("bd-1", "A")]);
        assert_eq!(
            batch.new_issues,
            vec!["bd-1".to_string(), "bd-9".to_string()]
        );
    }
}
