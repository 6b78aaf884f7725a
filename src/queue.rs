use std::{
  collections::VecDeque,
  panic::{self, AssertUnwindSafe},
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  models::{QuestionnaireResponse, UpdateReason},
  path::ItemPath,
};

/// Makes a document snapshot visible to readers. Called synchronously,
/// before recomputation of the same snapshot starts.
pub trait Publish: Send + Sync {
  fn publish(&self, snapshot: &Arc<QuestionnaireResponse>, reason: UpdateReason);
}

/// Recomputes derived values (calculated expressions and the like) against a
/// published snapshot. Runs on the queue's worker thread.
///
/// The task carries the reason and the edited location, so an evaluator can
/// tell the initial document apart from later edits.
pub trait Recompute: Send + Sync {
  fn recompute(&self, task: &UpdateTask) -> Result<(), RecomputeError>;
}

#[derive(Debug, Error)]
#[error("recompute failed: {0}")]
pub struct RecomputeError(pub String);

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecompute;

impl Recompute for NoopRecompute {
  fn recompute(&self, _task: &UpdateTask) -> Result<(), RecomputeError> {
    Ok(())
  }
}

/// One whole-document snapshot waiting to be published and recomputed.
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct UpdateTask {
  snapshot: Arc<QuestionnaireResponse>,
  target_path: Option<ItemPath>,
  reason: UpdateReason,
}

impl UpdateTask {
  pub fn new(snapshot: impl Into<Arc<QuestionnaireResponse>>) -> Self {
    Self {
      snapshot: snapshot.into(),
      target_path: None,
      reason: UpdateReason::Edit,
    }
  }

  pub fn with_target(mut self, path: ItemPath) -> Self {
    self.target_path = Some(path);
    self
  }

  pub fn with_reason(mut self, reason: UpdateReason) -> Self {
    self.reason = reason;
    self
  }

  pub fn snapshot(&self) -> &Arc<QuestionnaireResponse> {
    &self.snapshot
  }

  pub fn target_path(&self) -> Option<&ItemPath> {
    self.target_path.as_ref()
  }

  pub fn reason(&self) -> UpdateReason {
    self.reason
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
  Idle,
  Processing,
}

/// Serializes document updates: every task is published, then recomputed,
/// strictly in queue order, one at a time.
///
/// While processing, position 0 is the task being applied. The queue is the
/// only component that decides which snapshot is authoritative.
#[derive(Clone)]
pub struct UpdateQueue {
  inner: Arc<QueueInner>,
}

struct QueueInner {
  state: Mutex<QueueState>,
  idle: Condvar,
  publisher: Arc<dyn Publish>,
  recompute: Arc<dyn Recompute>,
}

struct QueueState {
  tasks: VecDeque<Arc<UpdateTask>>,
  status: QueueStatus,
  completed: u64,
  failed: u64,
}

impl UpdateQueue {
  pub fn new(publisher: Arc<dyn Publish>, recompute: Arc<dyn Recompute>) -> Self {
    Self {
      inner: Arc::new(QueueInner {
        state: Mutex::new(QueueState {
          tasks: VecDeque::new(),
          status: QueueStatus::Idle,
          completed: 0,
          failed: 0,
        }),
        idle: Condvar::new(),
        publisher,
        recompute,
      }),
    }
  }

  /// Appends a task; starts the worker when the queue was idle.
  pub fn enqueue(&self, task: UpdateTask) {
    let start = {
      let mut st = self.inner.state.lock();
      st.tasks.push_back(Arc::new(task));
      self.claim_worker(&mut st)
    };
    if start {
      self.spawn_worker();
    }
  }

  /// Supersedes every task that has not started yet with `task`.
  ///
  /// The in-flight task (position 0 while processing) is never dropped or
  /// reordered; when idle the queue becomes exactly `[task]`.
  pub fn collapse_to_latest(&self, task: UpdateTask) {
    let start = {
      let mut st = self.inner.state.lock();
      match st.status {
        QueueStatus::Processing => {
          let dropped = st.tasks.len().saturating_sub(1);
          st.tasks.truncate(1);
          if dropped > 0 {
            log::debug!("collapsed {dropped} pending update task(s)");
          }
        }
        QueueStatus::Idle => st.tasks.clear(),
      }
      st.tasks.push_back(Arc::new(task));
      self.claim_worker(&mut st)
    };
    if start {
      self.spawn_worker();
    }
  }

  pub fn status(&self) -> QueueStatus {
    self.inner.state.lock().status
  }

  /// Tasks still in the queue, in-flight task first.
  pub fn pending(&self) -> Vec<Arc<UpdateTask>> {
    self.inner.state.lock().tasks.iter().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.inner.state.lock().tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.state.lock().tasks.is_empty()
  }

  /// Number of tasks fully processed so far, failures included.
  pub fn completed_count(&self) -> u64 {
    self.inner.state.lock().completed
  }

  pub fn failed_count(&self) -> u64 {
    self.inner.state.lock().failed
  }

  /// Blocks until the queue is idle or the timeout elapses. Returns whether
  /// the queue is idle.
  pub fn wait_idle(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut st = self.inner.state.lock();
    while st.status == QueueStatus::Processing {
      if self.inner.idle.wait_until(&mut st, deadline).timed_out() {
        return st.status == QueueStatus::Idle;
      }
    }
    true
  }

  fn claim_worker(&self, st: &mut QueueState) -> bool {
    if st.status == QueueStatus::Idle && !st.tasks.is_empty() {
      st.status = QueueStatus::Processing;
      log::debug!("update queue: idle -> processing");
      return true;
    }
    false
  }

  fn spawn_worker(&self) {
    let inner = self.inner.clone();
    thread::spawn(move || run_queue(&inner));
  }
}

fn run_queue(inner: &QueueInner) {
  loop {
    let task = {
      let mut st = inner.state.lock();
      match st.tasks.front() {
        Some(t) => t.clone(),
        None => {
          st.status = QueueStatus::Idle;
          inner.idle.notify_all();
          return;
        }
      }
    };

    let published = panic::catch_unwind(AssertUnwindSafe(|| {
      inner.publisher.publish(task.snapshot(), task.reason())
    }));
    if published.is_err() {
      log::error!("publish panicked for {:?} update; continuing", task.reason());
    }

    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| inner.recompute.recompute(&task)));
    let ok = match outcome {
      Ok(Ok(())) => {
        log::trace!("recompute finished in {:?}", started.elapsed());
        true
      }
      Ok(Err(e)) => {
        log::warn!("{e}; queue continues");
        false
      }
      Err(_) => {
        log::warn!("recompute panicked; queue continues");
        false
      }
    };

    let mut st = inner.state.lock();
    st.tasks.pop_front();
    st.completed += 1;
    if !ok {
      st.failed += 1;
    }
    if st.tasks.is_empty() {
      st.status = QueueStatus::Idle;
      log::debug!("update queue: processing -> idle after {} task(s)", st.completed);
      inner.idle.notify_all();
      return;
    }
  }
}
