//! Shared helpers for the integration suites.

#![allow(dead_code)]

pub mod fixtures {
    use beads::model::{Issue, IssueType, Priority, Status};
    use beads::storage::Storage;
    use beads::util::id::id_suffix;
    use chrono::{TimeZone, Utc};

    /// A deterministic issue: id derived from the title, fixed timestamps.
    pub fn issue(title: &str) -> Issue {
        let mut issue = Issue::new(format!("bd-{}", id_suffix(title, 6)), title);
        issue.created_at = Utc.timestamp_opt(1_750_000_000, 0).unwrap();
        issue.updated_at = issue.created_at;
        issue
    }

    pub fn issue_with_id(id: &str, title: &str) -> Issue {
        let mut issue = issue(title);
        issue.id = id.to_string();
        issue
    }

    pub fn closed(mut issue: Issue) -> Issue {
        issue.status = Status::Closed;
        issue.closed_at = Some(issue.updated_at);
        issue
    }

    pub fn epic(title: &str) -> Issue {
        let mut issue = self::issue(title);
        issue.issue_type = IssueType::Epic;
        issue.priority = Priority::HIGH;
        issue
    }

    /// Populate a storage with the workspace prefix config set.
    pub fn with_prefix<S: Storage>(mut storage: S, prefix: &str) -> S {
        storage
            .set_config(beads::config::CONFIG_ISSUE_PREFIX, prefix)
            .unwrap();
        storage
    }
}
