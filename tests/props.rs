//! Property tests for the convergence primitives.

use beads::model::Issue;
use beads::sync::rewrite::rewrite_token;
use beads::util::hash::content_hash;
use beads::util::id::id_suffix;
use proptest::prelude::*;

proptest! {
    #[test]
    fn content_hash_is_stable(title in "\\PC{1,80}", description in proptest::option::of("\\PC{0,200}")) {
        let mut issue = Issue::new("bd-x1", title);
        issue.description = description;
        prop_assert_eq!(content_hash(&issue), content_hash(&issue));
    }

    #[test]
    fn content_hash_ignores_identity(title in "\\PC{1,80}", id_a in "[a-z]{2}-[a-z0-9]{3,8}", id_b in "[a-z]{2}-[a-z0-9]{3,8}") {
        let mut a = Issue::new(id_a, title.clone());
        let mut b = Issue::new(id_b, title);
        b.created_at = a.created_at + chrono::Duration::days(3);
        b.updated_at = b.created_at;
        a.content_hash = None;
        b.content_hash = None;
        prop_assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn id_suffix_length_and_charset(input in "\\PC{0,64}", width in 1usize..12) {
        let suffix = id_suffix(&input, width);
        prop_assert_eq!(suffix.len(), width);
        prop_assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn rewrite_never_touches_unbounded_tokens(
        before in "[a-z0-9]{1,4}",
        after in "[a-z0-9]{1,4}",
    ) {
        // Token glued to alphanumerics on both sides must survive.
        let text = format!("{before}old-1{after}");
        let (out, count) = rewrite_token(&text, "old-1", "new-1");
        prop_assert_eq!(out, text);
        prop_assert_eq!(count, 0);
    }

    #[test]
    fn rewrite_replaces_every_bounded_occurrence(n in 1usize..6) {
        let text = vec!["old-1"; n].join(" ");
        let (out, count) = rewrite_token(&text, "old-1", "new-1");
        prop_assert_eq!(count, n);
        prop_assert_eq!(out, vec!["new-1"; n].join(" "));
    }
}
