//! End-to-end dispatcher tests with the real command executor.
//!
//! In-process handlers cover the `internal` and `function` methods on every
//! platform; the subprocess tests write small shell scripts into a temporary
//! commands directory and only run on unix.

use std::sync::Arc;
use taskq::config::{DispatcherConfig, SubmitConfig};
use taskq::db::Database;
use taskq::dispatcher::{Dispatched, Dispatcher, RunMode};
use taskq::events::{MemorySink, QueueEvent};
use taskq::exec::CommandExecutor;
use taskq::payload::Payload;
use taskq::queue::{SubmitRequest, TaskQueue};
use taskq::types::{Method, TaskStatus};
use tempfile::TempDir;
use tokio::sync::watch;

struct Harness {
    _temp: TempDir,
    commands: std::path::PathBuf,
    db: Database,
    queue: TaskQueue,
}

fn setup() -> Harness {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let commands = temp.path().join("commands");
    std::fs::create_dir_all(&commands).unwrap();
    let db = Database::open(temp.path().join("tasks.db")).expect("Failed to open database");
    let queue = TaskQueue::new(
        db.clone(),
        SubmitConfig {
            auto_dispatch: false,
            ..Default::default()
        },
    );
    Harness {
        _temp: temp,
        commands,
        db,
        queue,
    }
}

impl Harness {
    fn dispatcher(&self, executor: CommandExecutor) -> (Dispatcher, Arc<MemorySink>) {
        let sink = MemorySink::new();
        let dispatcher = Dispatcher::new(
            self.db.clone(),
            Arc::new(executor),
            DispatcherConfig {
                commands_dir: self.commands.clone(),
                ..Default::default()
            },
        )
        .with_events(sink.clone());
        (dispatcher, sink)
    }

    async fn drain(&self, executor: CommandExecutor) -> usize {
        let (dispatcher, _) = self.dispatcher(executor);
        let (_tx, rx) = watch::channel(false);
        dispatcher.run(RunMode::Drain, rx).await.expect("drain failed")
    }

    #[cfg(unix)]
    fn script(&self, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = self.commands.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[tokio::test]
async fn handler_results_are_stored() {
    let h = setup();
    let task = h
        .queue
        .submit(
            SubmitRequest::new("echo")
                .method(Method::Internal)
                .data(Payload::map([("n", Payload::Int(3))])),
        )
        .unwrap();

    assert_eq!(h.drain(CommandExecutor::new(&h.commands)).await, 1);

    let task = h.queue.get_task(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.results.get("n"), Some(&Payload::Int(3)));
    assert!(task.pid.is_none());
}

#[tokio::test]
async fn custom_function_handlers_run() {
    let h = setup();
    let mut executor = CommandExecutor::new(&h.commands);
    executor.handlers_mut().register_fn("double", |payload| async move {
        let Some(n) = payload.as_i64() else {
            return Err("expected a number".to_string());
        };
        Ok(Payload::Int(n * 2))
    });

    let ok = h
        .queue
        .submit(SubmitRequest::new("double").method(Method::Function).data(Payload::Int(21)))
        .unwrap();
    let bad = h
        .queue
        .submit(SubmitRequest::new("double").method(Method::Function).data(Payload::from("x")))
        .unwrap();

    assert_eq!(h.drain(executor).await, 2);

    assert_eq!(h.queue.get_task(ok.id).unwrap().results, Payload::Int(42));
    let bad = h.queue.get_task(bad.id).unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(
        bad.results.get("error").and_then(Payload::as_str),
        Some("expected a number")
    );
}

#[tokio::test]
async fn handler_timeout_is_recorded() {
    let h = setup();
    let task = h
        .queue
        .submit(
            SubmitRequest::new("sleep")
                .method(Method::Internal)
                .timeout_seconds(1)
                .data(Payload::map([("ms", Payload::Int(10_000))])),
        )
        .unwrap();

    h.drain(CommandExecutor::new(&h.commands)).await;

    let task = h.queue.get_task(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Timeout);
    assert!(task.pid.is_none());
}

#[tokio::test]
async fn missing_command_fails_with_diagnostic() {
    let h = setup();
    let task = h.queue.submit(SubmitRequest::new("nothing-here")).unwrap();

    let (dispatcher, sink) = h.dispatcher(CommandExecutor::new(&h.commands));
    let done = dispatcher.run_once().await.unwrap();
    assert_eq!(
        done,
        Some(Dispatched::Finished {
            task_id: task.id,
            status: TaskStatus::Failed
        })
    );

    let task = h.queue.get_task(task.id).unwrap();
    let error = task.results.get("error").and_then(Payload::as_str).unwrap();
    assert!(error.starts_with("command not found"));
    assert!(sink.events().contains(&QueueEvent::Finished {
        task_id: task.id,
        status: TaskStatus::Failed,
        time_spent_ms: task.time_spent_ms.unwrap(),
    }));
}

#[cfg(unix)]
mod subprocess {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiting_child_runs_after_parent_completes() {
        let h = setup();
        h.script("step", "cat");
        let parent = h
            .queue
            .submit(SubmitRequest::new("step").data(Payload::from("parent")))
            .unwrap();
        let child = h
            .queue
            .submit(
                SubmitRequest::new("step")
                    .parent(parent.id)
                    .data(Payload::from("child")),
            )
            .unwrap();
        assert_eq!(child.status, TaskStatus::WaitingParent);

        assert_eq!(h.drain(CommandExecutor::new(&h.commands)).await, 2);

        let parent = h.queue.get_task(parent.id).unwrap();
        let child = h.queue.get_task(child.id).unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
        assert_eq!(parent.results, Payload::from("parent"));
        assert_eq!(child.status, TaskStatus::Completed);
        assert_eq!(child.results, Payload::from("child"));
        assert!(child.executed_at >= parent.executed_at);
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let h = setup();
        h.script("broken", "echo '{\"error\": \"bad input\"}'\nexit 2");
        let task = h.queue.submit(SubmitRequest::new("broken")).unwrap();

        h.drain(CommandExecutor::new(&h.commands)).await;

        let task = h.queue.get_task(task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.results.get("error").and_then(Payload::as_str),
            Some("bad input")
        );
    }

    #[tokio::test]
    async fn slow_process_times_out() {
        let h = setup();
        h.script("slow", "sleep 30");
        let task = h
            .queue
            .submit(SubmitRequest::new("slow").timeout_seconds(1))
            .unwrap();

        h.drain(CommandExecutor::new(&h.commands)).await;

        let task = h.queue.get_task(task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        assert!(task.time_spent_ms.unwrap() >= 1000);
    }

    #[tokio::test]
    async fn verbose_task_keeps_stderr() {
        let h = setup();
        h.script("chatty", "echo progress >&2\necho 7");
        let task = h
            .queue
            .submit(SubmitRequest::new("chatty").verbose(true))
            .unwrap();

        h.drain(CommandExecutor::new(&h.commands)).await;

        let task = h.queue.get_task(task.id).unwrap();
        assert_eq!(task.results.get("output"), Some(&Payload::Int(7)));
        assert_eq!(
            task.results.get("stderr").and_then(Payload::as_str),
            Some("progress")
        );
    }

    #[tokio::test]
    async fn background_task_reports_its_own_result() {
        let h = setup();
        let bin = env!("CARGO_BIN_EXE_taskq");
        h.script(
            "detached",
            &format!(
                "cat > /dev/null\nexec '{}' --log off report --results '{{\"reported\": true}}'",
                bin
            ),
        );
        let task = h
            .queue
            .submit(SubmitRequest::new("detached").method(Method::Background))
            .unwrap();

        let (dispatcher, _) = h.dispatcher(CommandExecutor::new(&h.commands));
        let done = dispatcher.run_once().await.unwrap();
        assert!(matches!(done, Some(Dispatched::Detached { .. })));

        let mut status = TaskStatus::Processing;
        for _ in 0..200 {
            status = h.queue.get_status(task.id).unwrap();
            if status != TaskStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, TaskStatus::Completed);

        let task = h.queue.get_task(task.id).unwrap();
        assert_eq!(task.results.get("reported"), Some(&Payload::Bool(true)));
        assert!(task.pid.is_none());
    }
}
