//! Operation handlers: parse args, drive the storage facade, publish
//! mutation events.

use chrono::Utc;
use serde_json::{Value, json};

use crate::config::issue_prefix;
use crate::daemon::protocol::{
    BatchArgs, CloseArgs, CommentAddArgs, CreateArgs, DepArgs, ExportArgs, IdArgs, ImportArgs,
    LabelArgs, ListArgs, Operation, ReadyArgs, UpdateArgs,
};
use crate::daemon::server::ServerState;
use crate::error::{BeadsError, Result};
use crate::model::{Dependency, DependencyType, Issue, Status};
use crate::storage::{IssueUpdate, Storage};
use crate::sync::export::{ExportOptions, export_to_jsonl};
use crate::sync::import_from_jsonl;
use crate::util::id::IdGenerator;

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| BeadsError::validation("args", e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Dispatch one operation. `actor` comes from the request envelope.
pub fn dispatch(
    state: &ServerState,
    operation: Operation,
    args: &Value,
    actor: &str,
) -> Result<Value> {
    let actor = if actor.is_empty() { "daemon" } else { actor };

    match operation {
        Operation::Ping => Ok(json!({"pong": true, "version": super::PROTOCOL_VERSION})),
        Operation::Status => handle_status(state),
        Operation::Metrics => to_value(&state.metrics.snapshot()),
        Operation::GetMutations => to_value(&state.mutations.recent()),
        Operation::Shutdown => {
            // notify_one buffers a permit, so the signal survives even if
            // the accept loop is not parked on notified() right now.
            state.shutdown.notify_one();
            Ok(json!({"stopping": true}))
        }
        Operation::Batch => handle_batch(state, args, actor),
        // health is driven asynchronously by the server so the storage
        // probe can run under a deadline
        Operation::Health => Err(BeadsError::Config(
            "health is handled by the server pipeline".to_string(),
        )),
        _ => dispatch_storage(state, operation, args, actor),
    }
}

fn dispatch_storage(
    state: &ServerState,
    operation: Operation,
    args: &Value,
    actor: &str,
) -> Result<Value> {
    let handle = state.cache.get(&state.workspace.root)?;
    let mut guard = handle.lock();
    let storage: &mut dyn Storage = &mut *guard;

    match operation {
        Operation::Create => {
            let args: CreateArgs = parse_args(args)?;
            let issue = create_issue(storage, args, actor)?;
            state.mutations.publish("created", &issue.id);
            to_value(&issue)
        }
        Operation::Update => {
            let args: UpdateArgs = parse_args(args)?;
            let updates = IssueUpdate {
                title: args.title,
                description: args.description,
                design: args.design,
                acceptance_criteria: args.acceptance_criteria,
                notes: args.notes,
                status: args.status,
                priority: args.priority,
                issue_type: args.issue_type,
                assignee: args.assignee,
                external_ref: args.external_ref,
                estimated_minutes: args.estimated_minutes,
                closed_at: None,
            };
            let issue = storage.update_issue(&args.id, &updates, actor)?;
            state.mutations.publish("updated", &issue.id);
            to_value(&issue)
        }
        Operation::Close => {
            let args: CloseArgs = parse_args(args)?;
            if let Some(reason) = args.reason.as_deref() {
                storage.add_comment(&args.id, actor, reason)?;
            }
            let issue = storage.update_issue(
                &args.id,
                &IssueUpdate {
                    status: Some(Status::Closed),
                    ..Default::default()
                },
                actor,
            )?;
            state.mutations.publish("closed", &issue.id);
            to_value(&issue)
        }
        Operation::Delete => {
            let args: IdArgs = parse_args(args)?;
            storage.delete_issue(&args.id)?;
            state.mutations.publish("deleted", &args.id);
            Ok(json!({"deleted": args.id}))
        }
        Operation::List => {
            let args: ListArgs = parse_args(args)?;
            let issues = match args.query.as_deref() {
                Some(query) if !query.is_empty() => {
                    storage.search_issues(query, &args.filters)?
                }
                _ => storage.list_issues(&args.filters)?,
            };
            to_value(&issues)
        }
        Operation::Show => {
            let args: IdArgs = parse_args(args)?;
            let mut issue = storage
                .get_issue(&args.id)?
                .ok_or(BeadsError::NotFound { id: args.id })?;
            issue.labels = storage.get_labels(&issue.id)?;
            issue.dependencies = storage.get_dependency_records(&issue.id)?;
            issue.comments = storage.get_comments(&issue.id)?;
            to_value(&issue)
        }
        Operation::Ready => {
            let args: ReadyArgs = parse_args(args)?;
            to_value(&storage.get_ready_work(&args)?)
        }
        Operation::Stats => to_value(&storage.get_statistics()?),
        Operation::DepAdd => {
            let args: DepArgs = parse_args(args)?;
            let dep = Dependency {
                issue_id: args.issue_id.clone(),
                depends_on_id: args.depends_on_id,
                dep_type: args.dep_type.unwrap_or(DependencyType::Blocks),
                created_at: Utc::now(),
                created_by: Some(actor.to_string()),
            };
            let added = storage.add_dependency(&dep, actor)?;
            if added {
                state.mutations.publish("dependency_added", &args.issue_id);
            }
            Ok(json!({"added": added}))
        }
        Operation::DepRemove => {
            let args: DepArgs = parse_args(args)?;
            let removed =
                storage.remove_dependency(&args.issue_id, &args.depends_on_id, actor)?;
            if removed {
                state.mutations.publish("dependency_removed", &args.issue_id);
            }
            Ok(json!({"removed": removed}))
        }
        Operation::LabelAdd => {
            let args: LabelArgs = parse_args(args)?;
            let added = storage.add_label(&args.id, &args.label, actor)?;
            if added {
                state.mutations.publish("label_added", &args.id);
            }
            Ok(json!({"added": added}))
        }
        Operation::LabelRemove => {
            let args: LabelArgs = parse_args(args)?;
            let removed = storage.remove_label(&args.id, &args.label, actor)?;
            if removed {
                state.mutations.publish("label_removed", &args.id);
            }
            Ok(json!({"removed": removed}))
        }
        Operation::CommentAdd => {
            let args: CommentAddArgs = parse_args(args)?;
            let comment = storage.add_comment(&args.id, actor, &args.text)?;
            state.mutations.publish("commented", &args.id);
            to_value(&comment)
        }
        Operation::CommentList => {
            let args: IdArgs = parse_args(args)?;
            to_value(&storage.get_comments(&args.id)?)
        }
        Operation::EpicStatus => to_value(&storage.get_epic_closure_status()?),
        Operation::Export => {
            let args: ExportArgs = parse_args(args)?;
            let outcome = export_to_jsonl(
                storage,
                &state.workspace.jsonl_path(),
                &ExportOptions { force: args.force },
            )?;
            Ok(json!({
                "exported_count": outcome.exported_count,
                "content_hash": outcome.content_hash,
            }))
        }
        Operation::Import => {
            let args: ImportArgs = parse_args(args)?;
            let path = args
                .path
                .map_or_else(|| state.workspace.jsonl_path(), std::path::PathBuf::from);
            let report = import_from_jsonl(storage, &path, &args.options)?;
            state.mutations.publish("imported", "");
            to_value(&report)
        }
        Operation::Ping
        | Operation::Status
        | Operation::Health
        | Operation::Metrics
        | Operation::Batch
        | Operation::GetMutations
        | Operation::Shutdown => unreachable!("handled before storage dispatch"),
    }
}

fn create_issue(storage: &mut dyn Storage, args: CreateArgs, actor: &str) -> Result<Issue> {
    let prefix = issue_prefix(storage)?;
    let id = match args.id {
        Some(id) if !id.is_empty() => id,
        _ => {
            let generator = IdGenerator::new(prefix);
            let count = storage.count_issues()?;
            generator.generate(&args.title, Utc::now(), count, |candidate| {
                storage.id_exists(candidate).unwrap_or(true)
            })
        }
    };

    let mut issue = Issue::new(id, args.title);
    issue.description = args.description;
    issue.design = args.design;
    issue.acceptance_criteria = args.acceptance_criteria;
    issue.notes = args.notes;
    if let Some(priority) = args.priority {
        issue.priority = priority;
    }
    if let Some(issue_type) = args.issue_type {
        issue.issue_type = issue_type;
    }
    issue.assignee = args.assignee;
    issue.external_ref = args.external_ref;
    issue.estimated_minutes = args.estimated_minutes;

    storage.create_issue(&issue, actor)?;
    for label in &args.labels {
        storage.add_label(&issue.id, label, actor)?;
    }
    storage
        .get_issue(&issue.id)?
        .ok_or(BeadsError::NotFound { id: issue.id })
}

/// Execute sub-requests in order, stopping at the first failure. The
/// parent envelope's actor applies to every child.
fn handle_batch(state: &ServerState, args: &Value, actor: &str) -> Result<Value> {
    let args: BatchArgs = parse_args(args)?;
    let mut responses = Vec::with_capacity(args.requests.len());

    for (index, item) in args.requests.iter().enumerate() {
        if matches!(item.operation, Operation::Batch) {
            return Err(BeadsError::validation("batch", "batches cannot nest"));
        }
        match dispatch(state, item.operation, &item.args, actor) {
            Ok(data) => responses.push(json!({"success": true, "data": data})),
            Err(e) => {
                return Err(BeadsError::Config(format!(
                    "batch stopped at request {index} ({}): {e}",
                    item.operation
                )));
            }
        }
    }
    Ok(json!({"responses": responses}))
}

fn handle_status(state: &ServerState) -> Result<Value> {
    let exclusive = match crate::daemon::lifecycle::check_exclusive_lock(&state.workspace) {
        crate::daemon::lifecycle::ExclusiveLockState::Held { holder } => Some(holder),
        _ => None,
    };
    // Workspace config wins over the daemon's environment fallback.
    let sync_branch = state
        .cache
        .get(&state.workspace.root)
        .ok()
        .and_then(|handle| {
            let guard = handle.lock();
            crate::config::sync_branch(&*guard).ok().flatten()
        })
        .or_else(|| state.options.sync_branch.clone());
    Ok(json!({
        "version": super::PROTOCOL_VERSION,
        "workspace": state.workspace.root,
        "db_path": state.workspace.db_path(),
        "socket_path": state.workspace.socket_path(),
        "pid": std::process::id(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "last_activity_secs_ago": state.last_activity.lock().elapsed().as_secs(),
        "exclusive_lock": exclusive,
        "sync_branch": sync_branch,
        "cached_workspaces": state.cache.len(),
    }))
}
