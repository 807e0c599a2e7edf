//! In-memory storage backend.
//!
//! Satisfies the same [`Storage`] contracts as the `SQLite` backing; used
//! by tests and as the reference implementation for the facade semantics.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{Duration, Utc};

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, EpicStatus, Event, EventType, Issue, IssueType, Status,
};
use crate::storage::{
    DependencyTree, IssueUpdate, ListFilters, ReadyFilters, SortPolicy, Statistics, Storage,
    TreeNode, normalize_label,
};
use crate::validation::validate_issue;

/// BTreeMap-backed storage; id ordering falls out of the map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    issues: BTreeMap<String, Issue>,
    dependencies: Vec<Dependency>,
    labels: BTreeMap<String, Vec<String>>,
    comments: Vec<Comment>,
    events: Vec<Event>,
    dirty: HashSet<String>,
    config: HashMap<String, String>,
    metadata: HashMap<String, String>,
    export_hashes: HashMap<String, String>,
    next_comment_id: i64,
    next_event_id: i64,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_comment_id: 1,
            next_event_id: 1,
            ..Default::default()
        }
    }

    fn record_event(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        actor: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        comment: Option<String>,
    ) {
        self.events.push(Event {
            id: self.next_event_id,
            issue_id: issue_id.to_string(),
            event_type,
            actor: actor.to_string(),
            old_value,
            new_value,
            comment,
            created_at: Utc::now(),
        });
        self.next_event_id += 1;
    }

    fn require_issue(&self, id: &str) -> Result<&Issue> {
        self.issues
            .get(id)
            .ok_or_else(|| BeadsError::NotFound { id: id.to_string() })
    }

    fn blocks_path_exists(&self, start: &str, target: &str) -> bool {
        let mut queue = VecDeque::from([start.to_string()]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            for dep in &self.dependencies {
                if dep.issue_id == current && dep.dep_type.is_blocking() {
                    queue.push_back(dep.depends_on_id.clone());
                }
            }
        }
        false
    }

    fn is_ready(&self, issue: &Issue) -> bool {
        issue.status == Status::Open
            && !self.dependencies.iter().any(|dep| {
                dep.issue_id == issue.id
                    && dep.dep_type.is_blocking()
                    && self
                        .issues
                        .get(&dep.depends_on_id)
                        .is_some_and(|blocker| !blocker.status.is_closed())
            })
    }

    fn matches_filters(&self, issue: &Issue, filters: &ListFilters) -> bool {
        if let Some(status) = filters.status {
            if issue.status != status {
                return false;
            }
        }
        if let Some(priority) = filters.priority {
            if issue.priority != priority {
                return false;
            }
        }
        if let Some(issue_type) = filters.issue_type {
            if issue.issue_type != issue_type {
                return false;
            }
        }
        if let Some(ref assignee) = filters.assignee {
            if issue.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if !filters.ids.is_empty() && !filters.ids.contains(&issue.id) {
            return false;
        }
        if !filters.labels.is_empty() {
            let have: HashSet<&str> = self
                .labels
                .get(&issue.id)
                .map(|labels| labels.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let wanted: Vec<String> = filters
                .labels
                .iter()
                .filter_map(|l| normalize_label(l))
                .collect();
            let ok = if filters.labels_any {
                wanted.iter().any(|l| have.contains(l.as_str()))
            } else {
                wanted.iter().all(|l| have.contains(l.as_str()))
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl Storage for MemoryStorage {
    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        if self.issues.contains_key(&issue.id) {
            return Err(BeadsError::DuplicateId {
                id: issue.id.clone(),
            });
        }
        if let Some(ref external_ref) = issue.external_ref {
            if self
                .issues
                .values()
                .any(|i| i.external_ref.as_deref() == Some(external_ref))
            {
                return Err(BeadsError::validation(
                    "external_ref",
                    format!("'{external_ref}' already in use"),
                ));
            }
        }

        let mut record = issue.clone();
        record.content_hash = Some(record.compute_content_hash());
        record.labels = Vec::new();
        record.dependencies = Vec::new();
        record.comments = Vec::new();
        validate_issue(&record)?;

        self.record_event(
            EventType::Created,
            &record.id,
            actor,
            None,
            None,
            Some(format!("Created issue: {}", record.title)),
        );
        self.dirty.insert(record.id.clone());
        self.issues.insert(record.id.clone(), record);
        Ok(())
    }

    fn create_issues_batch(&mut self, issues: &[Issue], actor: &str) -> Result<()> {
        // all-or-nothing: validate before any write
        let mut batch_ids = HashSet::new();
        for issue in issues {
            if self.issues.contains_key(&issue.id) || !batch_ids.insert(issue.id.clone()) {
                return Err(BeadsError::DuplicateId {
                    id: issue.id.clone(),
                });
            }
            let mut record = issue.clone();
            record.content_hash = Some(record.compute_content_hash());
            validate_issue(&record)?;
        }
        for issue in issues {
            self.create_issue(issue, actor)?;
        }
        Ok(())
    }

    fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        Ok(self.issues.get(id).cloned())
    }

    fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let mut issue = self.require_issue(id)?.clone();
        if updates.is_empty() {
            return Ok(issue);
        }

        let before = issue.clone();
        let old_status = issue.status;
        issue.apply_update(updates);
        validate_issue(&issue)?;

        if issue == before {
            return Ok(issue);
        }

        issue.updated_at = Utc::now();

        if issue.status != old_status {
            self.record_event(
                EventType::StatusChanged,
                id,
                actor,
                Some(old_status.as_str().to_string()),
                Some(issue.status.as_str().to_string()),
                None,
            );
            if issue.status == Status::Closed {
                self.record_event(EventType::Closed, id, actor, None, None, None);
            } else if old_status == Status::Closed {
                self.record_event(EventType::Reopened, id, actor, None, None, None);
            }
        } else {
            self.record_event(EventType::Updated, id, actor, None, None, None);
        }

        self.dirty.insert(id.to_string());
        self.issues.insert(id.to_string(), issue.clone());
        Ok(issue)
    }

    fn delete_issue(&mut self, id: &str) -> Result<()> {
        if self.issues.remove(id).is_none() {
            return Err(BeadsError::NotFound { id: id.to_string() });
        }
        self.dependencies
            .retain(|dep| dep.issue_id != id && dep.depends_on_id != id);
        self.labels.remove(id);
        self.comments.retain(|c| c.issue_id != id);
        self.events.retain(|e| e.issue_id != id);
        self.dirty.remove(id);
        self.export_hashes.remove(id);
        Ok(())
    }

    fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut issues: Vec<Issue> = self
            .issues
            .values()
            .filter(|i| self.matches_filters(i, filters))
            .cloned()
            .collect();
        if let Some(limit) = filters.limit {
            issues.truncate(limit);
        }
        Ok(issues)
    }

    fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>> {
        let needle = query.to_lowercase();
        let mut issues: Vec<Issue> = self
            .issues
            .values()
            .filter(|i| self.matches_filters(i, filters))
            .filter(|i| {
                i.title.to_lowercase().contains(&needle)
                    || i.description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        if let Some(limit) = filters.limit {
            issues.truncate(limit);
        }
        Ok(issues)
    }

    fn add_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<bool> {
        if dep.issue_id == dep.depends_on_id {
            return Err(BeadsError::SelfDependency {
                id: dep.issue_id.clone(),
            });
        }
        self.require_issue(&dep.issue_id)?;
        self.require_issue(&dep.depends_on_id)?;

        if self.dependencies.iter().any(|d| {
            d.issue_id == dep.issue_id
                && d.depends_on_id == dep.depends_on_id
                && d.dep_type == dep.dep_type
        }) {
            return Ok(false);
        }

        if dep.dep_type.is_blocking() && self.blocks_path_exists(&dep.depends_on_id, &dep.issue_id)
        {
            return Err(BeadsError::CycleDetected {
                path: format!("{} -> {}", dep.issue_id, dep.depends_on_id),
            });
        }

        self.record_event(
            EventType::DependencyAdded,
            &dep.issue_id,
            actor,
            None,
            Some(dep.depends_on_id.clone()),
            Some(dep.dep_type.as_str().to_string()),
        );
        self.dirty.insert(dep.issue_id.clone());
        self.dependencies.push(dep.clone());
        Ok(true)
    }

    fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<bool> {
        let before = self.dependencies.len();
        self.dependencies
            .retain(|d| !(d.issue_id == issue_id && d.depends_on_id == depends_on_id));
        if self.dependencies.len() == before {
            return Ok(false);
        }
        self.record_event(
            EventType::DependencyRemoved,
            issue_id,
            actor,
            Some(depends_on_id.to_string()),
            None,
            None,
        );
        self.dirty.insert(issue_id.to_string());
        Ok(true)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let mut out: Vec<Issue> = self
            .dependencies
            .iter()
            .filter(|d| d.issue_id == issue_id)
            .filter_map(|d| self.issues.get(&d.depends_on_id).cloned())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.dedup_by(|a, b| a.id == b.id);
        Ok(out)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let mut out: Vec<Issue> = self
            .dependencies
            .iter()
            .filter(|d| d.depends_on_id == issue_id)
            .filter_map(|d| self.issues.get(&d.issue_id).cloned())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.dedup_by(|a, b| a.id == b.id);
        Ok(out)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut deps: Vec<Dependency> = self
            .dependencies
            .iter()
            .filter(|d| d.issue_id == issue_id)
            .cloned()
            .collect();
        deps.sort_by(|a, b| {
            (&a.depends_on_id, a.dep_type.as_str()).cmp(&(&b.depends_on_id, b.dep_type.as_str()))
        });
        Ok(deps)
    }

    fn get_dependency_tree(&self, issue_id: &str, max_depth: usize) -> Result<DependencyTree> {
        let root = self.require_issue(issue_id)?.clone();
        let mut nodes = vec![TreeNode {
            issue: root,
            depth: 0,
            dep_type: None,
        }];
        let mut truncated = false;
        let mut seen = HashSet::from([issue_id.to_string()]);
        let mut queue = VecDeque::from([(issue_id.to_string(), 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            for dep in self.get_dependency_records(&current)? {
                if seen.contains(&dep.depends_on_id) {
                    continue;
                }
                if depth + 1 > max_depth {
                    truncated = true;
                    continue;
                }
                if let Some(issue) = self.issues.get(&dep.depends_on_id) {
                    seen.insert(dep.depends_on_id.clone());
                    queue.push_back((dep.depends_on_id.clone(), depth + 1));
                    nodes.push(TreeNode {
                        issue: issue.clone(),
                        depth: depth + 1,
                        dep_type: Some(dep.dep_type),
                    });
                }
            }
        }
        Ok(DependencyTree { nodes, truncated })
    }

    fn rename_dependency_references(&mut self, old_id: &str, new_id: &str) -> Result<usize> {
        let mut count = 0;
        for dep in &mut self.dependencies {
            if dep.issue_id == old_id {
                dep.issue_id = new_id.to_string();
                count += 1;
            }
            if dep.depends_on_id == old_id {
                dep.depends_on_id = new_id.to_string();
                count += 1;
            }
        }
        // collapse duplicates a concurrent rename may have produced
        let mut seen = HashSet::new();
        self.dependencies.retain(|d| {
            seen.insert((
                d.issue_id.clone(),
                d.depends_on_id.clone(),
                d.dep_type.as_str(),
            ))
        });
        Ok(count)
    }

    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let Some(label) = normalize_label(label) else {
            return Err(BeadsError::validation("label", "cannot be empty"));
        };
        self.require_issue(issue_id)?;
        let labels = self.labels.entry(issue_id.to_string()).or_default();
        if labels.contains(&label) {
            return Ok(false);
        }
        labels.push(label.clone());
        labels.sort();
        self.record_event(EventType::LabelAdded, issue_id, actor, None, Some(label), None);
        self.dirty.insert(issue_id.to_string());
        Ok(true)
    }

    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let Some(label) = normalize_label(label) else {
            return Ok(false);
        };
        let Some(labels) = self.labels.get_mut(issue_id) else {
            return Ok(false);
        };
        let before = labels.len();
        labels.retain(|l| *l != label);
        if labels.len() == before {
            return Ok(false);
        }
        self.record_event(
            EventType::LabelRemoved,
            issue_id,
            actor,
            Some(label),
            None,
            None,
        );
        self.dirty.insert(issue_id.to_string());
        Ok(true)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        Ok(self.labels.get(issue_id).cloned().unwrap_or_default())
    }

    fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.require_issue(issue_id)?;
        let comment = Comment {
            id: self.next_comment_id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            body: text.to_string(),
            created_at: Utc::now(),
        };
        self.next_comment_id += 1;
        self.record_event(
            EventType::Commented,
            issue_id,
            author,
            None,
            None,
            Some(text.to_string()),
        );
        self.dirty.insert(issue_id.to_string());
        self.comments.push(comment.clone());
        Ok(comment)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        Ok(self
            .comments
            .iter()
            .filter(|c| c.issue_id == issue_id)
            .cloned()
            .collect())
    }

    fn update_comment_body(&mut self, comment_id: i64, body: &str) -> Result<()> {
        if let Some(comment) = self.comments.iter_mut().find(|c| c.id == comment_id) {
            comment.body = body.to_string();
        }
        Ok(())
    }

    fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.issue_id == issue_id)
            .cloned()
            .collect();
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    fn get_ready_work(&self, filters: &ReadyFilters) -> Result<Vec<Issue>> {
        let mut ready: Vec<Issue> = self
            .issues
            .values()
            .filter(|i| self.is_ready(i))
            .filter(|i| {
                filters
                    .assignee
                    .as_deref()
                    .is_none_or(|a| i.assignee.as_deref() == Some(a))
            })
            .filter(|i| filters.priority.is_none_or(|p| i.priority.0 <= p.0))
            .cloned()
            .collect();

        match filters.sort {
            SortPolicy::Hybrid => {
                let cutoff = Utc::now() - Duration::hours(48);
                ready.sort_by(|a, b| {
                    let a_recent = a.created_at >= cutoff;
                    let b_recent = b.created_at >= cutoff;
                    b_recent
                        .cmp(&a_recent)
                        .then_with(|| {
                            if a_recent && b_recent {
                                a.priority.cmp(&b.priority)
                            } else {
                                std::cmp::Ordering::Equal
                            }
                        })
                        .then_with(|| a.created_at.cmp(&b.created_at))
                });
            }
            SortPolicy::Priority => {
                ready.sort_by(|a, b| {
                    a.priority
                        .cmp(&b.priority)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                });
            }
            SortPolicy::Oldest => ready.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }

        if let Some(limit) = filters.limit {
            ready.truncate(limit);
        }
        Ok(ready)
    }

    fn get_epic_closure_status(&self) -> Result<Vec<EpicStatus>> {
        let mut statuses = Vec::new();
        for epic in self
            .issues
            .values()
            .filter(|i| i.issue_type == IssueType::Epic)
        {
            let children: Vec<&Issue> = self
                .dependencies
                .iter()
                .filter(|d| {
                    d.depends_on_id == epic.id
                        && d.dep_type == crate::model::DependencyType::ParentChild
                })
                .filter_map(|d| self.issues.get(&d.issue_id))
                .collect();
            let total = children.len();
            let closed = children.iter().filter(|c| c.status.is_closed()).count();
            statuses.push(EpicStatus {
                epic_id: epic.id.clone(),
                title: epic.title.clone(),
                total_children: total,
                closed_children: closed,
                eligible_for_close: total > 0 && total == closed && !epic.status.is_closed(),
            });
        }
        Ok(statuses)
    }

    fn get_statistics(&self) -> Result<Statistics> {
        let mut stats = Statistics {
            total: self.issues.len(),
            ..Default::default()
        };
        for issue in self.issues.values() {
            match issue.status {
                Status::Open => stats.open += 1,
                Status::InProgress => stats.in_progress += 1,
                Status::Blocked => stats.blocked += 1,
                Status::Closed => stats.closed += 1,
            }
        }
        stats.ready = self.get_ready_work(&ReadyFilters::default())?.len();
        stats.epics_eligible_for_close = self
            .get_epic_closure_status()?
            .iter()
            .filter(|e| e.eligible_for_close)
            .count();
        Ok(stats)
    }

    fn get_dirty_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.dirty.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn clear_dirty_ids(&mut self, ids: &[String]) -> Result<usize> {
        let mut cleared = 0;
        for id in ids {
            if self.dirty.remove(id) {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn mark_dirty(&mut self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.dirty.insert(id.clone());
        }
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.config.get(key).cloned())
    }

    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_config(&mut self, key: &str) -> Result<bool> {
        Ok(self.config.remove(key).is_some())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.metadata.get(key).cloned())
    }

    fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_all_issues(&self) -> Result<Vec<Issue>> {
        Ok(self.issues.values().cloned().collect())
    }

    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for dep in &self.dependencies {
            map.entry(dep.issue_id.clone()).or_default().push(dep.clone());
        }
        for deps in map.values_mut() {
            deps.sort_by(|a, b| {
                (&a.depends_on_id, a.dep_type.as_str())
                    .cmp(&(&b.depends_on_id, b.dep_type.as_str()))
            });
        }
        Ok(map)
    }

    fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        Ok(self
            .labels
            .iter()
            .filter(|(_, labels)| !labels.is_empty())
            .map(|(id, labels)| (id.clone(), labels.clone()))
            .collect())
    }

    fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for comment in &self.comments {
            map.entry(comment.issue_id.clone())
                .or_default()
                .push(comment.clone());
        }
        Ok(map)
    }

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Option<Issue>> {
        Ok(self
            .issues
            .values()
            .find(|i| i.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Issue>> {
        Ok(self
            .issues
            .values()
            .find(|i| i.content_hash.as_deref() == Some(content_hash))
            .cloned())
    }

    fn id_exists(&self, id: &str) -> Result<bool> {
        Ok(self.issues.contains_key(id))
    }

    fn count_issues(&self) -> Result<usize> {
        Ok(self.issues.len())
    }

    fn upsert_issue_for_import(&mut self, issue: &Issue) -> Result<()> {
        let mut record = issue.clone();
        record.labels = Vec::new();
        record.dependencies = Vec::new();
        record.comments = Vec::new();
        self.dirty.insert(record.id.clone());
        self.issues.insert(record.id.clone(), record);
        Ok(())
    }

    fn merge_labels_for_import(&mut self, issue_id: &str, labels: &[String]) -> Result<usize> {
        let entry = self.labels.entry(issue_id.to_string()).or_default();
        let mut added = 0;
        for label in labels {
            let Some(label) = normalize_label(label) else {
                continue;
            };
            if !entry.contains(&label) {
                entry.push(label);
                added += 1;
            }
        }
        entry.sort();
        Ok(added)
    }

    fn merge_dependencies_for_import(
        &mut self,
        issue_id: &str,
        deps: &[Dependency],
    ) -> Result<usize> {
        let mut added = 0;
        for dep in deps {
            if dep.depends_on_id == issue_id {
                continue;
            }
            let exists = self.dependencies.iter().any(|d| {
                d.issue_id == issue_id
                    && d.depends_on_id == dep.depends_on_id
                    && d.dep_type == dep.dep_type
            });
            if !exists {
                let mut dep = dep.clone();
                dep.issue_id = issue_id.to_string();
                self.dependencies.push(dep);
                added += 1;
            }
        }
        Ok(added)
    }

    fn merge_comments_for_import(&mut self, issue_id: &str, comments: &[Comment]) -> Result<usize> {
        let seen: HashSet<(String, String)> = self
            .comments
            .iter()
            .filter(|c| c.issue_id == issue_id)
            .map(|c| (c.author.clone(), c.body.trim().to_string()))
            .collect();
        let mut added = 0;
        for comment in comments {
            let key = (comment.author.clone(), comment.body.trim().to_string());
            if seen.contains(&key) {
                continue;
            }
            let mut comment = comment.clone();
            // Keep the incoming id when free (byte-identical round-trip).
            let id_free = comment.id > 0 && !self.comments.iter().any(|c| c.id == comment.id);
            if !id_free {
                comment.id = self.next_comment_id;
            }
            self.next_comment_id = self.next_comment_id.max(comment.id + 1);
            comment.issue_id = issue_id.to_string();
            self.comments.push(comment);
            added += 1;
        }
        Ok(added)
    }

    fn set_export_hashes(&mut self, hashes: &[(String, String)]) -> Result<usize> {
        for (id, hash) in hashes {
            self.export_hashes.insert(id.clone(), hash.clone());
        }
        Ok(hashes.len())
    }

    fn clear_export_hashes(&mut self) -> Result<usize> {
        let count = self.export_hashes.len();
        self.export_hashes.clear();
        Ok(count)
    }

    fn checkpoint(&mut self) -> Result<()> {
        Ok(())
    }
}
