use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    #[serde(rename = "task.start")]
    Start {
        task_id: Uuid,
        parent_id: Option<Uuid>,
        message: String,
        data: serde_json::Value,
        at: DateTime<Utc>,
    },
    #[serde(rename = "task.end")]
    End {
        task_id: Uuid,
        status: TaskStatus,
        result: serde_json::Value,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TaskOpts {
    pub parent_id: Option<Uuid>,
    pub message: String,
    pub data: serde_json::Value,
}

/// wraps async work in `task.start`/`task.end` events with parent chaining (C5).
/// Cloning is cheap — the sink is an `Arc`, so a logger can be threaded through
/// nested tasks without lifetime gymnastics.
#[derive(Clone)]
pub struct TaskLogger {
    sink: Arc<dyn Fn(TaskEvent) + Send + Sync>,
}

impl TaskLogger {
    pub fn new(sink: impl Fn(TaskEvent) + Send + Sync + 'static) -> Self {
        TaskLogger { sink: Arc::new(sink) }
    }

    /// a logger that only emits to `tracing`, for callers that don't need
    /// in-process consolidation
    pub fn tracing_only() -> Self {
        Self::new(|event| match &event {
            TaskEvent::Start { task_id, message, .. } => {
                tracing::debug!(%task_id, message, "task.start");
            }
            TaskEvent::End { task_id, status, .. } => {
                tracing::debug!(%task_id, ?status, "task.end");
            }
        })
    }

    fn emit(&self, event: TaskEvent) {
        (self.sink)(event);
    }

    /// runs `fut`, bracketing it with start/end events; the original
    /// `Ok`/`Err` is returned unchanged (§4.5)
    pub async fn wrap<T, E, Fut>(&self, opts: TaskOpts, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: std::fmt::Display,
    {
        let task_id = Uuid::new_v4();
        self.emit(TaskEvent::Start {
            task_id,
            parent_id: opts.parent_id,
            message: opts.message,
            data: opts.data,
            at: Utc::now(),
        });

        let result = fut.await;

        let (status, result_json) = match &result {
            Ok(value) => (
                TaskStatus::Success,
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            ),
            Err(e) => (
                TaskStatus::Failure,
                serde_json::json!({ "message": e.to_string() }),
            ),
        };

        self.emit(TaskEvent::End {
            task_id,
            status,
            result: result_json,
            at: Utc::now(),
        });

        result
    }

    /// same as `wrap`, but `f` receives the allocated `task_id` as its first
    /// argument so nested tasks can reference it as their `parent_id`
    pub async fn wrap_fn<T, E, F, Fut>(&self, opts: TaskOpts, f: F) -> Result<T, E>
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: std::fmt::Display,
    {
        let task_id = Uuid::new_v4();
        self.emit(TaskEvent::Start {
            task_id,
            parent_id: opts.parent_id,
            message: opts.message,
            data: opts.data,
            at: Utc::now(),
        });

        let result = f(task_id).await;

        let (status, result_json) = match &result {
            Ok(value) => (
                TaskStatus::Success,
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            ),
            Err(e) => (
                TaskStatus::Failure,
                serde_json::json!({ "message": e.to_string() }),
            ),
        };

        self.emit(TaskEvent::End {
            task_id,
            status,
            result: result_json,
            at: Utc::now(),
        });

        result
    }
}

/// a folded start/end pair, ready for consolidation output (§4.11)
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedTask {
    pub task_id: Uuid,
    pub message: String,
    pub data: serde_json::Value,
    pub status: Option<TaskStatus>,
    pub result: Option<serde_json::Value>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[serde(skip)]
    parent_id: Option<Uuid>,
}

/// a quirk of the upstream double-logging bug this was ported from: degenerate
/// same-instant pairs with these exact messages carry no information (§9 open
/// question 4). Preserve the literal set, including the misspelling.
const DISCARD_DEGENERATE_MESSAGES: &[&str] = &["merge", "tranfer"];

/// groups a flat, time-ordered event stream by `parentId`, folding
/// `task.start`/`task.end` pairs by `taskId`. Root-level tasks (no parent)
/// are bucketed under `"roots"`.
pub fn consolidate(events: &[TaskEvent]) -> HashMap<String, Vec<ConsolidatedTask>> {
    let mut in_progress: HashMap<Uuid, ConsolidatedTask> = HashMap::new();
    let mut by_parent: HashMap<String, Vec<ConsolidatedTask>> = HashMap::new();

    for event in events {
        match event {
            TaskEvent::Start {
                task_id,
                parent_id,
                message,
                data,
                at,
            } => {
                in_progress.insert(
                    *task_id,
                    ConsolidatedTask {
                        task_id: *task_id,
                        message: message.clone(),
                        data: data.clone(),
                        status: None,
                        result: None,
                        start: *at,
                        end: None,
                        duration_ms: None,
                        parent_id: *parent_id,
                    },
                );
            }
            TaskEvent::End {
                task_id,
                status,
                result,
                at,
            } => {
                let Some(mut task) = in_progress.remove(task_id) else {
                    continue;
                };
                task.status = Some(*status);
                task.result = Some(result.clone());
                task.end = Some(*at);
                task.duration_ms = Some((*at - task.start).num_milliseconds());

                if task.duration_ms == Some(0) && DISCARD_DEGENERATE_MESSAGES.contains(&task.message.as_str()) {
                    continue;
                }

                let key = task
                    .parent_id
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "roots".to_string());
                by_parent.entry(key).or_default().push(task);
            }
        }
    }

    by_parent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wrap_emits_start_then_end_and_returns_the_original_outcome() {
        let events: Arc<std::sync::Mutex<Vec<TaskEvent>>> = Arc::new(std::sync::Mutex::new(vec![]));
        let sink_events = events.clone();
        let logger = TaskLogger::new(move |e| sink_events.lock().unwrap().push(e));

        let result: Result<i32, String> = logger
            .wrap(
                TaskOpts {
                    message: "do-thing".into(),
                    ..Default::default()
                },
                async { Ok(42) },
            )
            .await;

        assert_eq!(result, Ok(42));
        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(matches!(recorded[0], TaskEvent::Start { .. }));
        assert!(matches!(recorded[1], TaskEvent::End { status: TaskStatus::Success, .. }));
    }

    #[tokio::test]
    async fn wrap_rethrows_failure_and_serializes_the_error_message() {
        let events: Arc<std::sync::Mutex<Vec<TaskEvent>>> = Arc::new(std::sync::Mutex::new(vec![]));
        let sink_events = events.clone();
        let logger = TaskLogger::new(move |e| sink_events.lock().unwrap().push(e));

        let result: Result<i32, String> = logger
            .wrap(TaskOpts::default(), async { Err("boom".to_string()) })
            .await;

        assert_eq!(result, Err("boom".to_string()));
        let recorded = events.lock().unwrap();
        assert!(matches!(recorded[1], TaskEvent::End { status: TaskStatus::Failure, .. }));
    }

    #[test]
    fn consolidate_folds_pairs_by_task_id_and_roots_parentless_ones() {
        let parent = Uuid::new_v4();
        let t0 = Utc::now();
        let events = vec![
            TaskEvent::Start {
                task_id: parent,
                parent_id: None,
                message: "job".into(),
                data: serde_json::Value::Null,
                at: t0,
            },
            TaskEvent::End {
                task_id: parent,
                status: TaskStatus::Success,
                result: serde_json::Value::Null,
                at: t0 + chrono::Duration::seconds(5),
            },
        ];

        let consolidated = consolidate(&events);
        let roots = consolidated.get("roots").unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].duration_ms, Some(5000));
    }

    #[test]
    fn consolidate_discards_degenerate_merge_and_tranfer_pairs() {
        let t0 = Utc::now();
        for message in ["merge", "tranfer"] {
            let task_id = Uuid::new_v4();
            let events = vec![
                TaskEvent::Start {
                    task_id,
                    parent_id: None,
                    message: message.into(),
                    data: serde_json::Value::Null,
                    at: t0,
                },
                TaskEvent::End {
                    task_id,
                    status: TaskStatus::Success,
                    result: serde_json::Value::Null,
                    at: t0,
                },
            ];
            let consolidated = consolidate(&events);
            assert!(consolidated.is_empty(), "expected {message} pair to be discarded");
        }
    }

    #[test]
    fn consolidate_keeps_zero_duration_pairs_with_other_messages() {
        let t0 = Utc::now();
        let task_id = Uuid::new_v4();
        let events = vec![
            TaskEvent::Start {
                task_id,
                parent_id: None,
                message: "snapshot".into(),
                data: serde_json::Value::Null,
                at: t0,
            },
            TaskEvent::End {
                task_id,
                status: TaskStatus::Success,
                result: serde_json::Value::Null,
                at: t0,
            },
        ];
        let consolidated = consolidate(&events);
        assert_eq!(consolidated.get("roots").unwrap().len(), 1);
    }
}
