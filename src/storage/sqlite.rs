//! `SQLite` storage implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::str::FromStr;

use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, DependencyType, EpicStatus, Event, EventType, Issue, IssueType, Priority,
    Status,
};
use crate::storage::events::{fmt_ts, get_events, parse_ts};
use crate::storage::schema::apply_schema;
use crate::storage::{
    DependencyTree, IssueUpdate, ListFilters, ReadyFilters, SortPolicy, Statistics, Storage,
    TreeNode, normalize_label,
};
use crate::validation::validate_issue;

/// Window inside which the hybrid ready-work sort prefers priority.
const HYBRID_RECENT_WINDOW_HOURS: i64 = 48;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Side effects collected while a mutation closure runs.
struct MutationContext {
    actor: String,
    events: Vec<Event>,
    dirty_ids: HashSet<String>,
}

impl MutationContext {
    fn new(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: HashSet::new(),
        }
    }

    fn record_event(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        comment: Option<String>,
    ) {
        self.events.push(Event {
            id: 0, // assigned by the DB
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment,
            created_at: Utc::now(),
        });
    }

    fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }
}

impl SqliteStorage {
    /// Open a connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run a mutation inside an immediate transaction, then persist the
    /// collected audit events and dirty marks in the same transaction.
    fn mutate<F, R>(&mut self, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.old_value,
                    event.new_value,
                    event.comment,
                    fmt_ts(event.created_at),
                ],
            )?;
        }

        for id in &ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, fmt_ts(Utc::now())],
            )?;
        }

        tx.commit()?;
        Ok(result)
    }

    fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
        let status: String = row.get(7)?;
        let issue_type: String = row.get(9)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;
        let closed_at: Option<String> = row.get(15)?;
        let compacted_at: Option<String> = row.get(17)?;

        let parse_enum = |col: usize, msg: String| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                msg.into(),
            )
        };

        Ok(Issue {
            id: row.get(0)?,
            content_hash: row.get(1)?,
            title: row.get(2)?,
            description: none_if_empty(row.get(3)?),
            design: none_if_empty(row.get(4)?),
            acceptance_criteria: none_if_empty(row.get(5)?),
            notes: none_if_empty(row.get(6)?),
            status: Status::from_str(&status)
                .map_err(|e| parse_enum(7, e.to_string()))?,
            priority: Priority(row.get(8)?),
            issue_type: IssueType::from_str(&issue_type)
                .map_err(|e| parse_enum(9, e.to_string()))?,
            assignee: row.get::<_, Option<String>>(10)?.filter(|s| !s.is_empty()),
            external_ref: row.get::<_, Option<String>>(11)?.filter(|s| !s.is_empty()),
            estimated_minutes: row.get(12)?,
            created_at: parse_ts(&created_at, 13)?,
            updated_at: parse_ts(&updated_at, 14)?,
            closed_at: closed_at.as_deref().map(|s| parse_ts(s, 15)).transpose()?,
            compaction_level: row.get(16)?,
            compacted_at: compacted_at
                .as_deref()
                .map(|s| parse_ts(s, 17))
                .transpose()?,
            compacted_at_commit: row.get(18)?,
            original_size: row.get(19)?,
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
        })
    }

    const SELECT_COLS: &'static str = "id, content_hash, title, description, design, \
         acceptance_criteria, notes, status, priority, issue_type, assignee, external_ref, \
         estimated_minutes, created_at, updated_at, closed_at, compaction_level, compacted_at, \
         compacted_at_commit, original_size";

    fn write_issue_row(tx: &Transaction, issue: &Issue, replace: bool) -> Result<()> {
        let verb = if replace {
            "INSERT OR REPLACE INTO"
        } else {
            "INSERT INTO"
        };
        let sql = format!(
            "{verb} issues (
                id, content_hash, title, description, design, acceptance_criteria, notes,
                status, priority, issue_type, assignee, external_ref, estimated_minutes,
                created_at, updated_at, closed_at, compaction_level, compacted_at,
                compacted_at_commit, original_size
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        tx.execute(
            &sql,
            rusqlite::params![
                issue.id,
                issue.content_hash,
                issue.title,
                issue.description.as_deref().unwrap_or(""),
                issue.design.as_deref().unwrap_or(""),
                issue.acceptance_criteria.as_deref().unwrap_or(""),
                issue.notes.as_deref().unwrap_or(""),
                issue.status.as_str(),
                issue.priority.0,
                issue.issue_type.as_str(),
                issue.assignee,
                issue.external_ref,
                issue.estimated_minutes,
                fmt_ts(issue.created_at),
                fmt_ts(issue.updated_at),
                issue.closed_at.map(fmt_ts),
                issue.compaction_level,
                issue.compacted_at.map(fmt_ts),
                issue.compacted_at_commit,
                issue.original_size,
            ],
        )?;
        Ok(())
    }

    fn create_issue_tx(tx: &Transaction, ctx: &mut MutationContext, issue: &Issue) -> Result<()> {
        let exists: bool = tx
            .prepare("SELECT 1 FROM issues WHERE id = ?")?
            .exists([&issue.id])?;
        if exists {
            return Err(BeadsError::DuplicateId {
                id: issue.id.clone(),
            });
        }

        let mut record = issue.clone();
        record.content_hash = Some(record.compute_content_hash());
        validate_issue(&record)?;

        Self::write_issue_row(tx, &record, false)?;

        ctx.record_event(
            EventType::Created,
            &record.id,
            None,
            None,
            Some(format!("Created issue: {}", record.title)),
        );
        ctx.mark_dirty(&record.id);
        Ok(())
    }

    /// BFS over `blocks` edges to see whether `start` can reach `target`.
    fn blocks_path_exists(conn: &Connection, start: &str, target: &str) -> Result<bool> {
        let mut queue = VecDeque::from([start.to_string()]);
        let mut seen = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if current == target {
                return Ok(true);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            let mut stmt = conn.prepare(
                "SELECT depends_on_id FROM dependencies WHERE issue_id = ? AND type = 'blocks'",
            )?;
            let next: Vec<String> = stmt
                .query_map([&current], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            queue.extend(next);
        }
        Ok(false)
    }

    fn issues_by_edge(&self, issue_id: &str, outgoing: bool) -> Result<Vec<Issue>> {
        let sql = if outgoing {
            format!(
                "SELECT {} FROM issues WHERE id IN
                   (SELECT depends_on_id FROM dependencies WHERE issue_id = ?)
                 ORDER BY id",
                Self::SELECT_COLS
            )
        } else {
            format!(
                "SELECT {} FROM issues WHERE id IN
                   (SELECT issue_id FROM dependencies WHERE depends_on_id = ?)
                 ORDER BY id",
                Self::SELECT_COLS
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([issue_id], |row| Self::issue_from_row(row))?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    fn query_issues(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| Self::issue_from_row(row))?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Build a WHERE clause from the list filters. Label filtering happens
    /// in a second pass to keep the SQL simple.
    fn filter_clause(filters: &ListFilters) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filters.status {
            clauses.push("status = ?".to_string());
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(priority) = filters.priority {
            clauses.push("priority = ?".to_string());
            params.push(Box::new(priority.0));
        }
        if let Some(issue_type) = filters.issue_type {
            clauses.push("issue_type = ?".to_string());
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(ref assignee) = filters.assignee {
            clauses.push("assignee = ?".to_string());
            params.push(Box::new(assignee.clone()));
        }
        if !filters.ids.is_empty() {
            let placeholders = vec!["?"; filters.ids.len()].join(", ");
            clauses.push(format!("id IN ({placeholders})"));
            for id in &filters.ids {
                params.push(Box::new(id.clone()));
            }
        }

        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (clause, params)
    }

    fn apply_label_filter(&self, issues: Vec<Issue>, filters: &ListFilters) -> Result<Vec<Issue>> {
        if filters.labels.is_empty() {
            return Ok(issues);
        }
        let wanted: Vec<String> = filters
            .labels
            .iter()
            .filter_map(|l| normalize_label(l))
            .collect();
        let mut kept = Vec::new();
        for issue in issues {
            let labels: HashSet<String> = self.get_labels(&issue.id)?.into_iter().collect();
            let matched = if filters.labels_any {
                wanted.iter().any(|l| labels.contains(l))
            } else {
                wanted.iter().all(|l| labels.contains(l))
            };
            if matched {
                kept.push(issue);
            }
        }
        Ok(kept)
    }
}

fn none_if_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl Storage for SqliteStorage {
    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        self.mutate(actor, |tx, ctx| Self::create_issue_tx(tx, ctx, issue))
    }

    fn create_issues_batch(&mut self, issues: &[Issue], actor: &str) -> Result<()> {
        self.mutate(actor, |tx, ctx| {
            for issue in issues {
                Self::create_issue_tx(tx, ctx, issue)?;
            }
            Ok(())
        })
    }

    fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let sql = format!("SELECT {} FROM issues WHERE id = ?", Self::SELECT_COLS);
        let mut stmt = self.conn.prepare(&sql)?;
        let result = stmt
            .query_row([id], |row| Self::issue_from_row(row))
            .optional()?;
        Ok(result)
    }

    fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::NotFound { id: id.to_string() })?;

        if updates.is_empty() {
            return Ok(issue);
        }

        let before = issue.clone();
        let old_status = issue.status;
        let old_priority = issue.priority;
        let old_assignee = issue.assignee.clone();

        let canonical_changed = issue.apply_update(updates);
        validate_issue(&issue)?;

        // Same-value updates are a full no-op: no write, no event, no
        // dirty flag. Non-canonical fields (estimates) still count as
        // changes even though the content hash is untouched.
        if issue == before {
            return Ok(issue);
        }

        issue.updated_at = Utc::now();

        self.mutate(actor, |tx, ctx| {
            Self::write_issue_row(tx, &issue, true)?;

            if issue.status != old_status {
                ctx.record_event(
                    EventType::StatusChanged,
                    id,
                    Some(old_status.as_str().to_string()),
                    Some(issue.status.as_str().to_string()),
                    None,
                );
                if issue.status == Status::Closed {
                    ctx.record_event(EventType::Closed, id, None, None, None);
                } else if old_status == Status::Closed {
                    ctx.record_event(EventType::Reopened, id, None, None, None);
                }
            }
            if issue.priority != old_priority {
                ctx.record_event(
                    EventType::Updated,
                    id,
                    Some(old_priority.0.to_string()),
                    Some(issue.priority.0.to_string()),
                    Some("priority".to_string()),
                );
            }
            if issue.assignee != old_assignee {
                ctx.record_event(
                    EventType::Updated,
                    id,
                    old_assignee.clone(),
                    issue.assignee.clone(),
                    Some("assignee".to_string()),
                );
            }
            if canonical_changed && issue.status == old_status {
                ctx.record_event(EventType::Updated, id, None, None, None);
            }

            ctx.mark_dirty(id);
            Ok(())
        })?;

        Ok(issue)
    }

    fn delete_issue(&mut self, id: &str) -> Result<()> {
        let exists = self.id_exists(id)?;
        if !exists {
            return Err(BeadsError::NotFound { id: id.to_string() });
        }

        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM dependencies WHERE issue_id = ? OR depends_on_id = ?",
            [id, id],
        )?;
        tx.execute("DELETE FROM labels WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM comments WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM events WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM export_hashes WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM issues WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(())
    }

    fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let (clause, params) = Self::filter_clause(filters);
        let sql = format!(
            "SELECT {} FROM issues{clause} ORDER BY id",
            Self::SELECT_COLS
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = self.query_issues(&sql, &param_refs)?;
        let mut issues = self.apply_label_filter(issues, filters)?;
        if let Some(limit) = filters.limit {
            issues.truncate(limit);
        }
        Ok(issues)
    }

    fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>> {
        let (clause, mut params) = Self::filter_clause(filters);
        let like = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let text_clause = if clause.is_empty() {
            " WHERE (title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')".to_string()
        } else {
            format!("{clause} AND (title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')")
        };
        params.push(Box::new(like.clone()));
        params.push(Box::new(like));

        let sql = format!(
            "SELECT {} FROM issues{text_clause} ORDER BY id",
            Self::SELECT_COLS
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = self.query_issues(&sql, &param_refs)?;
        let mut issues = self.apply_label_filter(issues, filters)?;
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
        for id in [&dep.issue_id, &dep.depends_on_id] {
            if !self.id_exists(id)? {
                return Err(BeadsError::NotFound { id: id.clone() });
            }
        }

        if dep.dep_type.is_blocking()
            && Self::blocks_path_exists(&self.conn, &dep.depends_on_id, &dep.issue_id)?
        {
            return Err(BeadsError::CycleDetected {
                path: format!("{} -> {}", dep.issue_id, dep.depends_on_id),
            });
        }

        let dep = dep.clone();
        self.mutate(actor, |tx, ctx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    dep.issue_id,
                    dep.depends_on_id,
                    dep.dep_type.as_str(),
                    fmt_ts(dep.created_at),
                    dep.created_by,
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            ctx.record_event(
                EventType::DependencyAdded,
                &dep.issue_id,
                None,
                Some(dep.depends_on_id.clone()),
                Some(dep.dep_type.as_str().to_string()),
            );
            ctx.mark_dirty(&dep.issue_id);
            Ok(true)
        })
    }

    fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<bool> {
        let issue_id = issue_id.to_string();
        let depends_on_id = depends_on_id.to_string();
        self.mutate(actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                [&issue_id, &depends_on_id],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            ctx.record_event(
                EventType::DependencyRemoved,
                &issue_id,
                Some(depends_on_id.clone()),
                None,
                None,
            );
            ctx.mark_dirty(&issue_id);
            Ok(true)
        })
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.issues_by_edge(issue_id, true)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.issues_by_edge(issue_id, false)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies WHERE issue_id = ? ORDER BY depends_on_id, type",
        )?;
        let rows = stmt.query_map([issue_id], dependency_from_row)?;
        let mut deps = Vec::new();
        for row in rows {
            deps.push(row?);
        }
        Ok(deps)
    }

    fn get_dependency_tree(&self, issue_id: &str, max_depth: usize) -> Result<DependencyTree> {
        let root = self
            .get_issue(issue_id)?
            .ok_or_else(|| BeadsError::NotFound {
                id: issue_id.to_string(),
            })?;

        let mut nodes = vec![TreeNode {
            issue: root,
            depth: 0,
            dep_type: None,
        }];
        let mut truncated = false;
        let mut seen = HashSet::from([issue_id.to_string()]);
        let mut queue = VecDeque::from([(issue_id.to_string(), 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            let deps = self.get_dependency_records(&current)?;
            for dep in deps {
                if seen.contains(&dep.depends_on_id) {
                    continue;
                }
                if depth + 1 > max_depth {
                    truncated = true;
                    continue;
                }
                if let Some(issue) = self.get_issue(&dep.depends_on_id)? {
                    seen.insert(dep.depends_on_id.clone());
                    queue.push_back((dep.depends_on_id.clone(), depth + 1));
                    nodes.push(TreeNode {
                        issue,
                        depth: depth + 1,
                        dep_type: Some(dep.dep_type),
                    });
                }
            }
        }

        Ok(DependencyTree { nodes, truncated })
    }

    fn rename_dependency_references(&mut self, old_id: &str, new_id: &str) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut count = tx.execute(
            "UPDATE OR IGNORE dependencies SET issue_id = ? WHERE issue_id = ?",
            [new_id, old_id],
        )?;
        count += tx.execute(
            "UPDATE OR IGNORE dependencies SET depends_on_id = ? WHERE depends_on_id = ?",
            [new_id, old_id],
        )?;
        // Drop edges a concurrent rename already created under the new id.
        count += tx.execute(
            "DELETE FROM dependencies WHERE issue_id = ? OR depends_on_id = ?",
            [old_id, old_id],
        )?;
        tx.commit()?;
        Ok(count)
    }

    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let Some(label) = normalize_label(label) else {
            return Err(BeadsError::validation("label", "cannot be empty"));
        };
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::NotFound {
                id: issue_id.to_string(),
            });
        }
        let issue_id = issue_id.to_string();
        self.mutate(actor, |tx, ctx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                [&issue_id, &label],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            ctx.record_event(
                EventType::LabelAdded,
                &issue_id,
                None,
                Some(label.clone()),
                None,
            );
            ctx.mark_dirty(&issue_id);
            Ok(true)
        })
    }

    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let Some(label) = normalize_label(label) else {
            return Ok(false);
        };
        let issue_id = issue_id.to_string();
        self.mutate(actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM labels WHERE issue_id = ? AND label = ?",
                [&issue_id, &label],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            ctx.record_event(
                EventType::LabelRemoved,
                &issue_id,
                Some(label.clone()),
                None,
                None,
            );
            ctx.mark_dirty(&issue_id);
            Ok(true)
        })
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let rows = stmt.query_map([issue_id], |row| row.get(0))?;
        let mut labels = Vec::new();
        for row in rows {
            labels.push(row?);
        }
        Ok(labels)
    }

    fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::NotFound {
                id: issue_id.to_string(),
            });
        }
        let issue_id = issue_id.to_string();
        let author = author.to_string();
        let text = text.to_string();
        let created_at = Utc::now();

        let id = self.mutate(&author.clone(), |tx, ctx| {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![issue_id, author, text, fmt_ts(created_at)],
            )?;
            let id = tx.last_insert_rowid();
            ctx.record_event(
                EventType::Commented,
                &issue_id,
                None,
                None,
                Some(text.clone()),
            );
            ctx.mark_dirty(&issue_id);
            Ok(id)
        })?;

        Ok(Comment {
            id,
            issue_id,
            author,
            body: text,
            created_at,
        })
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at
             FROM comments WHERE issue_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([issue_id], comment_from_row)?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    fn update_comment_body(&mut self, comment_id: i64, body: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE comments SET text = ? WHERE id = ?",
            rusqlite::params![body, comment_id],
        )?;
        Ok(())
    }

    fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>> {
        get_events(&self.conn, issue_id, limit)
    }

    fn get_ready_work(&self, filters: &ReadyFilters) -> Result<Vec<Issue>> {
        let mut sql = format!(
            "SELECT {} FROM issues i WHERE i.status = 'open'
               AND NOT EXISTS (
                 SELECT 1 FROM dependencies d
                 JOIN issues b ON b.id = d.depends_on_id
                 WHERE d.issue_id = i.id AND d.type = 'blocks' AND b.status != 'closed'
               )",
            Self::SELECT_COLS
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref assignee) = filters.assignee {
            sql.push_str(" AND i.assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if let Some(priority) = filters.priority {
            sql.push_str(" AND i.priority <= ?");
            params.push(Box::new(priority.0));
        }

        match filters.sort {
            SortPolicy::Hybrid => {
                let cutoff = fmt_ts(Utc::now() - Duration::hours(HYBRID_RECENT_WINDOW_HOURS));
                sql.push_str(
                    " ORDER BY CASE WHEN i.created_at >= ? THEN 0 ELSE 1 END,
                       CASE WHEN i.created_at >= ? THEN i.priority ELSE 0 END,
                       i.created_at",
                );
                params.push(Box::new(cutoff.clone()));
                params.push(Box::new(cutoff));
            }
            SortPolicy::Priority => sql.push_str(" ORDER BY i.priority, i.created_at"),
            SortPolicy::Oldest => sql.push_str(" ORDER BY i.created_at"),
        }

        if let Some(limit) = filters.limit {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(limit as i64));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        self.query_issues(&sql, &param_refs)
    }

    fn get_epic_closure_status(&self) -> Result<Vec<EpicStatus>> {
        let epics = self.list_issues(&ListFilters {
            issue_type: Some(IssueType::Epic),
            ..Default::default()
        })?;

        let mut statuses = Vec::new();
        for epic in epics {
            let (total, closed): (usize, usize) = self.conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN i.status = 'closed' THEN 1 ELSE 0 END), 0)
                 FROM dependencies d JOIN issues i ON i.id = d.issue_id
                 WHERE d.depends_on_id = ? AND d.type = 'parent-child'",
                [&epic.id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as usize,
                        row.get::<_, i64>(1)? as usize,
                    ))
                },
            )?;
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
        let mut stats = Statistics::default();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM issues GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            match status.as_str() {
                "open" => stats.open = count,
                "in_progress" => stats.in_progress = count,
                "blocked" => stats.blocked = count,
                "closed" => stats.closed = count,
                _ => {}
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
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY issue_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn clear_dirty_ids(&mut self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut cleared = 0;
        for id in ids {
            cleared += tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
        }
        tx.commit()?;
        Ok(cleared)
    }

    fn mark_dirty(&mut self, ids: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, fmt_ts(Utc::now())],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    fn delete_config(&mut self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM config WHERE key = ?", [key])?;
        Ok(removed > 0)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    fn get_all_issues(&self) -> Result<Vec<Issue>> {
        let sql = format!("SELECT {} FROM issues ORDER BY id", Self::SELECT_COLS);
        self.query_issues(&sql, &[])
    }

    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies ORDER BY issue_id, depends_on_id, type",
        )?;
        let rows = stmt.query_map([], dependency_from_row)?;
        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for row in rows {
            let dep = row?;
            map.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        Ok(map)
    }

    fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let (issue_id, label) = row?;
            map.entry(issue_id).or_default().push(label);
        }
        Ok(map)
    }

    fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments ORDER BY issue_id, id",
        )?;
        let rows = stmt.query_map([], comment_from_row)?;
        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for row in rows {
            let comment = row?;
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Option<Issue>> {
        let sql = format!(
            "SELECT {} FROM issues WHERE external_ref = ?",
            Self::SELECT_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let result = stmt
            .query_row([external_ref], |row| Self::issue_from_row(row))
            .optional()?;
        Ok(result)
    }

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Issue>> {
        let sql = format!(
            "SELECT {} FROM issues WHERE content_hash = ? ORDER BY id LIMIT 1",
            Self::SELECT_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let result = stmt
            .query_row([content_hash], |row| Self::issue_from_row(row))
            .optional()?;
        Ok(result)
    }

    fn id_exists(&self, id: &str) -> Result<bool> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM issues WHERE id = ?")?
            .exists([id])?;
        Ok(exists)
    }

    fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn upsert_issue_for_import(&mut self, issue: &Issue) -> Result<()> {
        let issue = issue.clone();
        self.mutate("import", |tx, ctx| {
            Self::write_issue_row(tx, &issue, true)?;
            ctx.mark_dirty(&issue.id);
            Ok(())
        })
    }

    fn merge_labels_for_import(&mut self, issue_id: &str, labels: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        for label in labels {
            let Some(label) = normalize_label(label) else {
                continue;
            };
            added += tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                [issue_id, &label],
            )?;
        }
        tx.commit()?;
        Ok(added)
    }

    fn merge_dependencies_for_import(
        &mut self,
        issue_id: &str,
        deps: &[Dependency],
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        for dep in deps {
            if dep.depends_on_id == issue_id {
                continue; // self edge
            }
            added += tx.execute(
                "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    dep.depends_on_id,
                    dep.dep_type.as_str(),
                    fmt_ts(dep.created_at),
                    dep.created_by,
                ],
            )?;
        }
        tx.commit()?;
        Ok(added)
    }

    fn merge_comments_for_import(&mut self, issue_id: &str, comments: &[Comment]) -> Result<usize> {
        let existing: Vec<(String, String)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT author, text FROM comments WHERE issue_id = ?")?;
            let rows = stmt.query_map([issue_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut pairs = Vec::new();
            for row in rows {
                pairs.push(row?);
            }
            pairs
        };
        let seen: HashSet<(String, String)> = existing
            .into_iter()
            .map(|(author, text)| (author, text.trim().to_string()))
            .collect();

        let tx = self.conn.transaction()?;
        let mut added = 0;
        for comment in comments {
            let key = (comment.author.clone(), comment.body.trim().to_string());
            if seen.contains(&key) {
                continue;
            }
            // Keep the incoming id when it is free so an empty-database
            // import reproduces the log byte-for-byte.
            let id_free = comment.id > 0
                && !tx
                    .prepare("SELECT 1 FROM comments WHERE id = ?")?
                    .exists([comment.id])?;
            if id_free {
                tx.execute(
                    "INSERT INTO comments (id, issue_id, author, text, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                    rusqlite::params![
                        comment.id,
                        issue_id,
                        comment.author,
                        comment.body,
                        fmt_ts(comment.created_at),
                    ],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                    rusqlite::params![
                        issue_id,
                        comment.author,
                        comment.body,
                        fmt_ts(comment.created_at),
                    ],
                )?;
            }
            added += 1;
        }
        tx.commit()?;
        Ok(added)
    }

    fn set_export_hashes(&mut self, hashes: &[(String, String)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let now = fmt_ts(Utc::now());
        let mut written = 0;
        for (issue_id, content_hash) in hashes {
            written += tx.execute(
                "INSERT OR REPLACE INTO export_hashes (issue_id, content_hash, exported_at)
                 VALUES (?, ?, ?)",
                rusqlite::params![issue_id, content_hash, now],
            )?;
        }
        tx.commit()?;
        Ok(written)
    }

    fn clear_export_hashes(&mut self) -> Result<usize> {
        let cleared = self.conn.execute("DELETE FROM export_hashes", [])?;
        Ok(cleared)
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

fn dependency_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    let dep_type: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(Dependency {
        issue_id: row.get(0)?,
        depends_on_id: row.get(1)?,
        dep_type: DependencyType::from_str(&dep_type).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        created_at: parse_ts(&created_at, 3)?,
        created_by: row.get(4)?,
    })
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    let created_at: String = row.get(4)?;
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_ts(&created_at, 4)?,
    })
}
