//! Progress accounting for storage tasks.
//!
//! Every task admitted to a worker pool owns a [`SimpleProgress`]. The worker is
//! the only writer; any number of threads may read its [`ProgressParts`] or block
//! in [`Progress::join`] until the task finishes or aborts.
//!
//! A task must apply all of its side effects *before* calling
//! [`SimpleProgress::finish`]: `join` returning `Ok` is the signal that the
//! post-state is visible.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
};

use ghostdex_common::{Result, error::Error, verify_arg};

/// Estimate of the total number of parts of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalEstimate {
    /// Nothing is known about the total.
    Unknown,
    /// `known` is the exact total; no more parts will be discovered.
    Finalized,
    /// A guess at the total, at least `known`.
    Estimate(u64),
}

/// Snapshot of a task's progress: `done <= started <= known`, and
/// `known <= estimate` when an estimate is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressParts {
    pub done: u64,
    pub started: u64,
    pub known: u64,
    pub total: TotalEstimate,
}

impl ProgressParts {
    pub fn new(done: u64, started: u64, known: u64, total: TotalEstimate) -> Result<ProgressParts> {
        verify_arg!(done, done <= started);
        verify_arg!(started, started <= known);
        if let TotalEstimate::Estimate(estimate) = total {
            verify_arg!(known, known <= estimate);
        }
        Ok(ProgressParts {
            done,
            started,
            known,
            total,
        })
    }

    pub const fn empty() -> ProgressParts {
        ProgressParts {
            done: 0,
            started: 0,
            known: 0,
            total: TotalEstimate::Unknown,
        }
    }

    /// A completed task of `parts` parts.
    pub const fn completed(parts: u64) -> ProgressParts {
        ProgressParts {
            done: parts,
            started: parts,
            known: parts,
            total: TotalEstimate::Finalized,
        }
    }

    pub fn is_total_finalized(&self) -> bool {
        self.total == TotalEstimate::Finalized
    }

    pub fn is_done(&self) -> bool {
        self.is_total_finalized() && self.done == self.known
    }

    /// Best available total: the estimate if there is one, otherwise `known`.
    pub fn known_total(&self) -> u64 {
        match self.total {
            TotalEstimate::Estimate(estimate) => estimate.max(self.known),
            _ => self.known,
        }
    }

    /// Fraction of the best available total that is done, in `[0, 1]`.
    pub fn fraction_done(&self) -> f64 {
        let total = self.known_total();
        if total == 0 {
            if self.is_done() { 1.0 } else { 0.0 }
        } else {
            self.done as f64 / total as f64
        }
    }

    /// `"done/total (pct%)"`; the total carries a `~` when it is only an
    /// estimate and a `+` when it is unknown.
    pub fn percent_done_string(&self) -> String {
        let marker = match self.total {
            TotalEstimate::Finalized => "",
            TotalEstimate::Estimate(_) => "~",
            TotalEstimate::Unknown => "+",
        };
        format!(
            "{}/{}{} ({:.1}%)",
            self.done,
            self.known_total(),
            marker,
            self.fraction_done() * 100.0
        )
    }

    /// Sums a set of sub-task parts. The result is finalized only if every part
    /// is, and unknown as soon as one part is.
    pub fn aggregate(parts: impl IntoIterator<Item = ProgressParts>) -> ProgressParts {
        let mut sum = ProgressParts::completed(0);
        let mut estimate = 0u64;
        let mut finalized = true;
        let mut unknown = false;
        for p in parts {
            sum.done += p.done;
            sum.started += p.started;
            sum.known += p.known;
            estimate += p.known_total();
            match p.total {
                TotalEstimate::Finalized => {}
                TotalEstimate::Estimate(_) => finalized = false,
                TotalEstimate::Unknown => unknown = true,
            }
        }
        sum.total = if unknown {
            TotalEstimate::Unknown
        } else if finalized {
            TotalEstimate::Finalized
        } else {
            TotalEstimate::Estimate(estimate)
        };
        sum
    }
}

impl Default for ProgressParts {
    fn default() -> Self {
        ProgressParts::empty()
    }
}

impl fmt::Display for ProgressParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.percent_done_string())
    }
}

/// Read side of a task's progress.
pub trait Progress: Send + Sync {
    fn subject(&self) -> String;

    fn status(&self) -> String;

    fn parts(&self) -> ProgressParts;

    /// `true` once the task finished successfully.
    fn is_done(&self) -> bool;

    /// Blocks until the task finishes or aborts.
    ///
    /// A fatal abort is returned as a fatal `TaskAbort` error carrying the cause;
    /// a benign abort as a non-fatal one.
    fn join(&self) -> Result<()>;
}

#[derive(Clone)]
enum Outcome {
    Running,
    Finished,
    Aborted(Arc<Error>),
}

struct ProgressState {
    status: String,
    parts: ProgressParts,
    outcome: Outcome,
}

/// Progress of a single task, written by the worker executing it.
pub struct SimpleProgress {
    subject: String,
    state: Mutex<ProgressState>,
    changed: Condvar,
}

impl SimpleProgress {
    pub fn new(subject: impl Into<String>) -> SimpleProgress {
        SimpleProgress {
            subject: subject.into(),
            state: Mutex::new(ProgressState {
                status: "waiting".to_string(),
                parts: ProgressParts::empty(),
                outcome: Outcome::Running,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.state.lock().unwrap().status = status.into();
    }

    /// Registers `parts` newly discovered parts; `finalize` declares that no
    /// more will follow.
    pub fn add_part_known(&self, parts: u64, finalize: bool) {
        let mut state = self.state.lock().unwrap();
        state.parts.known += parts;
        if finalize {
            state.parts.total = TotalEstimate::Finalized;
        } else if let TotalEstimate::Estimate(estimate) = state.parts.total {
            state.parts.total = TotalEstimate::Estimate(estimate.max(state.parts.known));
        }
    }

    pub fn add_part_started(&self) {
        let mut state = self.state.lock().unwrap();
        let parts = &mut state.parts;
        parts.started += 1;
        parts.known = parts.known.max(parts.started);
    }

    pub fn add_part_done(&self) {
        let mut state = self.state.lock().unwrap();
        let parts = &mut state.parts;
        parts.done += 1;
        parts.started = parts.started.max(parts.done);
        parts.known = parts.known.max(parts.started);
        drop(state);
        self.changed.notify_all();
    }

    /// Ignored once the total is finalized.
    pub fn set_estimate(&self, estimate: u64) {
        let mut state = self.state.lock().unwrap();
        if !state.parts.is_total_finalized() {
            state.parts.total = TotalEstimate::Estimate(estimate.max(state.parts.known));
        }
    }

    /// Marks the task complete. Every known part becomes done and the total
    /// is finalized. Has no effect after an abort.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        if !matches!(state.outcome, Outcome::Running) {
            return;
        }
        let known = state.parts.known.max(1);
        state.parts = ProgressParts::completed(known);
        state.status = "done".to_string();
        state.outcome = Outcome::Finished;
        drop(state);
        self.changed.notify_all();
    }

    /// Marks the task aborted with `error`. The first outcome wins.
    pub fn abort(&self, error: Error) {
        let mut state = self.state.lock().unwrap();
        if !matches!(state.outcome, Outcome::Running) {
            return;
        }
        state.status = if error.is_benign_abort() {
            "already complete".to_string()
        } else {
            format!("aborted: {error}")
        };
        state.outcome = Outcome::Aborted(Arc::new(error));
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.state.lock().unwrap().outcome, Outcome::Running)
    }

    fn outcome_to_result(&self, outcome: &Outcome) -> Result<()> {
        match outcome {
            Outcome::Running => unreachable!("joined a running task"),
            Outcome::Finished => Ok(()),
            Outcome::Aborted(error) if error.is_benign_abort() => {
                Err(Error::task_complete(self.subject.clone()))
            }
            Outcome::Aborted(error) => Err(Error::task_abort(self.subject.clone(), error.clone())),
        }
    }
}

impl Progress for SimpleProgress {
    fn subject(&self) -> String {
        self.subject.clone()
    }

    fn status(&self) -> String {
        self.state.lock().unwrap().status.clone()
    }

    fn parts(&self) -> ProgressParts {
        self.state.lock().unwrap().parts
    }

    fn is_done(&self) -> bool {
        matches!(self.state.lock().unwrap().outcome, Outcome::Finished)
    }

    fn join(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while matches!(state.outcome, Outcome::Running) {
            state = self.changed.wait(state).unwrap();
        }
        let outcome = state.outcome.clone();
        drop(state);
        self.outcome_to_result(&outcome)
    }
}

impl fmt::Debug for SimpleProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleProgress")
            .field("subject", &self.subject)
            .field("status", &self.status())
            .field("parts", &self.parts())
            .finish()
    }
}

/// Progress of a batch of tasks.
pub struct CompositeProgress {
    subject: String,
    children: Vec<Arc<dyn Progress>>,
}

impl CompositeProgress {
    pub fn new(subject: impl Into<String>, children: Vec<Arc<dyn Progress>>) -> CompositeProgress {
        CompositeProgress {
            subject: subject.into(),
            children,
        }
    }

    pub fn children(&self) -> &[Arc<dyn Progress>] {
        &self.children
    }

    /// Joins every child and collects the individual outcomes, in order.
    pub fn join_each(&self) -> Vec<Result<()>> {
        self.children.iter().map(|p| p.join()).collect()
    }
}

impl Progress for CompositeProgress {
    fn subject(&self) -> String {
        self.subject.clone()
    }

    fn status(&self) -> String {
        let parts = self.parts();
        format!("{} of {} tasks", parts.done, self.children.len())
    }

    /// Each child counts as one part, done when the child is done.
    fn parts(&self) -> ProgressParts {
        ProgressParts::aggregate(self.children.iter().map(|p| {
            if p.is_done() {
                ProgressParts::completed(1)
            } else {
                ProgressParts {
                    done: 0,
                    started: 0,
                    known: 1,
                    total: TotalEstimate::Finalized,
                }
            }
        }))
    }

    fn is_done(&self) -> bool {
        self.children.iter().all(|p| p.is_done())
    }

    /// Waits for all children; the first fatal abort wins, benign aborts are
    /// ignored.
    fn join(&self) -> Result<()> {
        let mut first_error = None;
        for result in self.join_each() {
            if let Err(e) = result {
                if !e.is_benign_abort() && first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
