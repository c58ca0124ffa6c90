//! Dependency graph task scheduler
//!
//! Tasks are added to a [`Graph`] with their dependencies, an optional
//! deadline and an optional run condition. [`Graph::compile`] validates the
//! graph into a [`Flow`], which runs every task as soon as all of its
//! dependencies succeeded. Independent tasks run concurrently.
//!
//! A failed task blocks everything depending on it, while independent
//! branches keep running. All failures are reported together in one
//! [`FlowError::Flow`].

use crate::error::{FlowError, Result, TaskFailure};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;
type Condition = Box<dyn Fn() -> bool + Send + Sync>;

/// Handle of a task within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

/// Scheduling options of a task
#[derive(Default)]
pub struct TaskOptions {
    pub timeout: Option<Duration>,
    pub dependencies: Vec<TaskId>,
    /// Evaluated once the dependencies are done; a false condition skips
    /// the task without blocking its dependents
    pub run_if: Option<Condition>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn depends_on(mut self, task: TaskId) -> Self {
        self.dependencies.push(task);
        self
    }

    pub fn depends_on_all(mut self, tasks: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(tasks);
        self
    }

    pub fn run_if<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.run_if = Some(Box::new(condition));
        self
    }
}

struct Task {
    name: String,
    run: TaskFn,
    options: TaskOptions,
}

/// Graph under construction
pub struct Graph {
    name: String,
    tasks: Vec<Task>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_task<F, Fut>(&mut self, name: impl Into<String>, f: F, options: TaskOptions) -> TaskId
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task {
            name: name.into(),
            run: Box::new(move |cancel| f(cancel).boxed()),
            options,
        });
        id
    }

    /// Validate the graph
    ///
    /// Task names must be unique and a task may only depend on tasks added
    /// before it, which rules out cycles.
    pub fn compile(self) -> Result<Flow> {
        let mut names = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if !names.insert(task.name.as_str()) {
                return Err(FlowError::Config(format!(
                    "flow {} has two tasks named {}",
                    self.name, task.name
                )));
            }
            if let Some(dep) = task.options.dependencies.iter().find(|d| d.0 >= index) {
                return Err(FlowError::Config(format!(
                    "task {} of flow {} depends on unknown task #{}",
                    task.name, self.name, dep.0
                )));
            }
        }

        Ok(Flow {
            name: self.name,
            tasks: self.tasks,
        })
    }
}

/// Compiled, runnable graph
pub struct Flow {
    name: String,
    tasks: Vec<Task>,
}

enum Outcome {
    Succeeded,
    Skipped,
    Failed(FlowError),
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Run all tasks; returns the aggregated failures, if any
    pub async fn run(self, cancel: &CancellationToken) -> Result<()> {
        let flow_name = self.name;
        let count = self.tasks.len();
        info!(flow = %flow_name, tasks = count, "Running flow");

        let mut pending_deps = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut names = Vec::with_capacity(count);
        let mut slots = Vec::with_capacity(count);
        for (index, task) in self.tasks.into_iter().enumerate() {
            let mut deps: Vec<usize> = task.options.dependencies.iter().map(|d| d.0).collect();
            deps.sort_unstable();
            deps.dedup();
            pending_deps[index] = deps.len();
            for dep in deps {
                dependents[dep].push(index);
            }
            names.push(task.name);
            slots.push(Some((task.run, task.options.timeout, task.options.run_if)));
        }

        let mut ready: Vec<usize> = (0..count).filter(|&i| pending_deps[i] == 0).collect();
        let mut running = FuturesUnordered::new();
        let mut failures = Vec::new();
        let mut finished = 0usize;

        loop {
            for index in ready.drain(..) {
                if cancel.is_cancelled() {
                    break;
                }
                let Some((run, timeout, run_if)) = slots[index].take() else {
                    continue;
                };
                let name = names[index].clone();

                if run_if.is_some_and(|condition| !condition()) {
                    debug!(flow = %flow_name, task = %name, "Skipping task, condition not met");
                    running.push(async move { (index, Outcome::Skipped) }.boxed());
                    continue;
                }

                let span = info_span!("task", flow = %flow_name, task = %name);
                let token = cancel.child_token();
                running.push(
                    async move {
                        debug!("Starting task");
                        let work = run(token.clone());
                        let result = tokio::select! {
                            _ = token.cancelled() => {
                                Err(FlowError::Cancelled(format!("task {}", name)))
                            }
                            result = with_deadline(work, timeout, &name) => result,
                        };
                        token.cancel();
                        match result {
                            Ok(()) => (index, Outcome::Succeeded),
                            Err(e) => (index, Outcome::Failed(e)),
                        }
                    }
                    .instrument(span)
                    .boxed(),
                );
            }

            let Some((index, outcome)) = running.next().await else {
                break;
            };
            finished += 1;

            match outcome {
                Outcome::Succeeded | Outcome::Skipped => {
                    if matches!(outcome, Outcome::Succeeded) {
                        debug!(flow = %flow_name, task = %names[index], "Task succeeded");
                    }
                    for &dependent in &dependents[index] {
                        pending_deps[dependent] -= 1;
                        if pending_deps[dependent] == 0 {
                            ready.push(dependent);
                        }
                    }
                }
                Outcome::Failed(error) => {
                    warn!(flow = %flow_name, task = %names[index], error = %error, "Task failed");
                    failures.push(TaskFailure {
                        task: names[index].clone(),
                        error,
                    });
                }
            }
        }

        if cancel.is_cancelled() && finished < count && failures.is_empty() {
            failures.push(TaskFailure {
                task: flow_name.clone(),
                error: FlowError::Cancelled(format!(
                    "{} of {} tasks did not run",
                    count - finished,
                    count
                )),
            });
        }

        if failures.is_empty() {
            info!(flow = %flow_name, "Flow finished");
            Ok(())
        } else {
            let blocked = count - finished;
            if blocked > 0 {
                debug!(flow = %flow_name, blocked, "Tasks not run because of failed dependencies");
            }
            Err(FlowError::Flow {
                flow: flow_name,
                failures,
            })
        }
    }
}

async fn with_deadline(
    work: BoxFuture<'static, Result<()>>,
    timeout: Option<Duration>,
    name: &str,
) -> Result<()> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::TaskTimeout {
                task: name.to_string(),
                timeout,
            }),
        },
        None => work.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, name: &'static str) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + use<> {
        let log = log.clone();
        move |_| {
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            }
            .boxed()
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn position(log: &[String], name: &str) -> usize {
        log.iter().position(|n| n == name).unwrap()
    }

    #[tokio::test]
    async fn test_respects_dependencies() {
        let log: Log = Arc::default();
        let mut graph = Graph::new("reconcile");
        let vpc = graph.add_task("vpc", record(&log, "vpc"), TaskOptions::new());
        let sg = graph.add_task("sg", record(&log, "sg"), TaskOptions::new().depends_on(vpc));
        let vsw = graph.add_task(
            "vswitches",
            record(&log, "vswitches"),
            TaskOptions::new().depends_on(vpc),
        );
        graph.add_task(
            "nat",
            record(&log, "nat"),
            TaskOptions::new().depends_on_all([vsw, sg]),
        );

        graph
            .compile()
            .unwrap()
            .run(&CancellationToken::new())
            .await
            .unwrap();

        let log = entries(&log);
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "vpc");
        assert!(position(&log, "nat") > position(&log, "sg"));
        assert!(position(&log, "nat") > position(&log, "vswitches"));
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_only() {
        let log: Log = Arc::default();
        let mut graph = Graph::new("reconcile");
        let vpc = graph.add_task("vpc", record(&log, "vpc"), TaskOptions::new());
        let bad = graph.add_task(
            "vswitches",
            |_| async { Err(FlowError::ProtectedDeletion("vsw-1".into())) },
            TaskOptions::new().depends_on(vpc),
        );
        graph.add_task("nat", record(&log, "nat"), TaskOptions::new().depends_on(bad));
        graph.add_task("sg", record(&log, "sg"), TaskOptions::new().depends_on(vpc));

        let err = graph
            .compile()
            .unwrap()
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_protected_deletion());
        let log = entries(&log);
        assert!(log.contains(&"sg".to_string()));
        assert!(!log.contains(&"nat".to_string()));
    }

    #[tokio::test]
    async fn test_failures_are_aggregated() {
        let mut graph = Graph::new("delete");
        graph.add_task(
            "zone-a",
            |_| async { Err(FlowError::Config("a".into())) },
            TaskOptions::new(),
        );
        graph.add_task(
            "zone-b",
            |_| async { Err(FlowError::Config("b".into())) },
            TaskOptions::new(),
        );

        let err = graph
            .compile()
            .unwrap()
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        let FlowError::Flow { failures, .. } = err else {
            panic!("expected aggregated error");
        };
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn test_condition_skips_without_blocking() {
        let log: Log = Arc::default();
        let mut graph = Graph::new("delete");
        let skipped = graph.add_task(
            "nat",
            record(&log, "nat"),
            TaskOptions::new().run_if(|| false),
        );
        graph.add_task("vpc", record(&log, "vpc"), TaskOptions::new().depends_on(skipped));

        graph
            .compile()
            .unwrap()
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entries(&log), vec!["vpc".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut graph = Graph::new("reconcile");
        graph.add_task(
            "slow",
            |_| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            },
            TaskOptions::new().timeout(Duration::from_secs(120)),
        );

        let err = graph
            .compile()
            .unwrap()
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_running_tasks() {
        let cancel = CancellationToken::new();
        let mut graph = Graph::new("reconcile");
        let first = graph.add_task(
            "slow",
            |_| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            },
            TaskOptions::new(),
        );
        graph.add_task("after", |_| async { Ok(()) }, TaskOptions::new().depends_on(first));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = graph.compile().unwrap().run(&cancel).await.unwrap_err();
        assert!(matches!(
            err.causes().first(),
            Some(FlowError::Cancelled(_))
        ));
    }

    #[test]
    fn test_compile_rejects_duplicates_and_forward_references() {
        let mut graph = Graph::new("reconcile");
        graph.add_task("vpc", |_| async { Ok(()) }, TaskOptions::new());
        graph.add_task("vpc", |_| async { Ok(()) }, TaskOptions::new());
        assert!(graph.compile().is_err());

        let mut graph = Graph::new("reconcile");
        graph.add_task(
            "vpc",
            |_| async { Ok(()) },
            TaskOptions::new().depends_on(TaskId(1)),
        );
        graph.add_task("sg", |_| async { Ok(()) }, TaskOptions::new());
        assert!(graph.compile().is_err());
    }
}
