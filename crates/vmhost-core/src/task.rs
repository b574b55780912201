//! Ordered do/undo execution with compensation on failure.
//!
//! A [`Saga`] is a stack of compensations for actions that already took
//! effect. [`run_tasks`] pushes one entry per successful [`Task`] and, on the
//! first failure, unwinds the stack last-committed-first. The failing task
//! itself is never compensated and later tasks never run.

use std::fmt;

use tracing::{info, warn};

use crate::error::{Error, Result};

type Action<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// One step of an orchestrated setup: an action and the action that undoes it.
pub struct Task<'a> {
    name: String,
    execute: Action<'a>,
    compensate: Action<'a>,
}

impl<'a> Task<'a> {
    pub fn new<E, C>(name: impl Into<String>, execute: E, compensate: C) -> Self
    where
        E: FnOnce() -> Result<()> + 'a,
        C: FnOnce() -> Result<()> + 'a,
    {
        Self {
            name: name.into(),
            execute: Box::new(execute),
            compensate: Box::new(compensate),
        }
    }

    /// A task whose effects need no undo.
    pub fn irreversible<E>(name: impl Into<String>, execute: E) -> Self
    where
        E: FnOnce() -> Result<()> + 'a,
    {
        Self::new(name, execute, || Ok(()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Stack of compensations for committed actions.
#[derive(Default)]
pub struct Saga<'a> {
    committed: Vec<(String, Action<'a>)>,
}

impl<'a> Saga<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` took effect and how to undo it.
    pub fn commit<C>(&mut self, name: impl Into<String>, compensate: C)
    where
        C: FnOnce() -> Result<()> + 'a,
    {
        self.committed.push((name.into(), Box::new(compensate)));
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Run every compensation, most recent first. Failures are collected,
    /// never short-circuit the remaining compensations.
    pub fn unwind(mut self) -> UnwindReport {
        let mut report = UnwindReport::default();
        while let Some((name, compensate)) = self.committed.pop() {
            match compensate() {
                Ok(()) => report.compensated.push(name),
                Err(e) => {
                    warn!(step = %name, error = %e, "compensation failed");
                    report.failures.push((name, e));
                }
            }
        }
        report
    }

    /// Forget all compensations; the committed actions are kept.
    pub fn complete(mut self) {
        self.committed.clear();
    }
}

impl fmt::Debug for Saga<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.committed.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Saga").field("committed", &names).finish()
    }
}

/// Outcome of [`Saga::unwind`].
#[derive(Debug, Default)]
pub struct UnwindReport {
    /// Steps undone successfully, in the order they were undone.
    pub compensated: Vec<String>,
    pub failures: Vec<(String, Error)>,
}

impl UnwindReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A task failed; earlier tasks have been compensated.
#[derive(Debug)]
pub struct TaskFailure {
    /// Name of the task whose execute action failed.
    pub task: String,
    /// The triggering error, never replaced by compensation errors.
    pub error: Error,
    pub unwind: UnwindReport,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:?} failed: {}", self.task, self.error)
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Execute `tasks` in order, unwinding on the first failure.
pub fn run_tasks(tasks: Vec<Task<'_>>) -> std::result::Result<(), TaskFailure> {
    let mut saga = Saga::new();

    for task in tasks {
        let Task {
            name,
            execute,
            compensate,
        } = task;

        if let Err(error) = execute() {
            warn!(task = %name, error = %error, rollback = saga.len(), "task failed, rolling back");
            let unwind = saga.unwind();
            return Err(TaskFailure {
                task: name,
                error,
                unwind,
            });
        }
        info!(task = %name, "task completed");
        saga.commit(name, compensate);
    }

    saga.complete();
    Ok(())
}

/// [`run_tasks`], returning only the triggering error.
pub fn execute_tasks(tasks: Vec<Task<'_>>) -> Result<()> {
    run_tasks(tasks).map_err(|failure| failure.error)
}
