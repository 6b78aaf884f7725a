use std::{
  sync::{mpsc, Arc, Mutex},
  time::Duration,
};

use form_core::{
  Publish, QueueStatus, QuestionnaireResponse, Recompute, RecomputeError, UpdateQueue, UpdateReason, UpdateTask,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logs() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn doc(id: &str) -> QuestionnaireResponse {
  let mut response = QuestionnaireResponse::new(None);
  response.id = Some(id.to_string());
  response
}

fn task(id: &str) -> UpdateTask {
  UpdateTask::new(doc(id))
}

fn id_of(response: &QuestionnaireResponse) -> String {
  response.id.clone().unwrap_or_default()
}

/// Shared event log for publish and recompute calls.
#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl Events {
  fn push(&self, event: String) {
    self.0.lock().unwrap().push(event);
  }

  fn all(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  fn with_prefix(&self, prefix: &str) -> Vec<String> {
    self
      .all()
      .into_iter()
      .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
      .collect()
  }
}

struct Recorder {
  events: Arc<Events>,
}

impl Publish for Recorder {
  fn publish(&self, snapshot: &Arc<QuestionnaireResponse>, reason: UpdateReason) {
    self.events.push(format!("publish:{}", id_of(snapshot)));
    if reason == UpdateReason::Initial {
      self.events.push("initial".into());
    }
  }
}

impl Recompute for Recorder {
  fn recompute(&self, task: &UpdateTask) -> Result<(), RecomputeError> {
    std::thread::sleep(Duration::from_millis(5));
    self.events.push(format!("recompute:{}", id_of(task.snapshot())));
    self.events.push(format!("reason:{:?}", task.reason()));
    Ok(())
  }
}

/// Recompute that reports when it starts and blocks until released.
struct Gate {
  started: Mutex<mpsc::Sender<String>>,
  release: Mutex<mpsc::Receiver<()>>,
}

impl Recompute for Gate {
  fn recompute(&self, task: &UpdateTask) -> Result<(), RecomputeError> {
    let _ = self.started.lock().unwrap().send(id_of(task.snapshot()));
    self
      .release
      .lock()
      .unwrap()
      .recv()
      .map_err(|e| RecomputeError(e.to_string()))
  }
}

fn gated_queue(events: &Arc<Events>) -> (UpdateQueue, mpsc::Receiver<String>, mpsc::Sender<()>) {
  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  let gate = Gate {
    started: Mutex::new(started_tx),
    release: Mutex::new(release_rx),
  };
  let queue = UpdateQueue::new(Arc::new(Recorder { events: events.clone() }), Arc::new(gate));
  (queue, started_rx, release_tx)
}

#[test]
fn three_tasks_are_published_and_recomputed_in_enqueue_order() {
  init_logs();
  let events = Arc::new(Events::default());
  let recorder = Arc::new(Recorder { events: events.clone() });
  let queue = UpdateQueue::new(recorder.clone(), recorder);

  queue.enqueue(task("t1"));
  queue.enqueue(task("t2"));
  queue.enqueue(task("t3"));

  assert!(queue.wait_idle(WAIT));
  assert_eq!(events.with_prefix("publish:"), vec!["t1", "t2", "t3"]);
  assert_eq!(events.with_prefix("recompute:"), vec!["t1", "t2", "t3"]);
  assert_eq!(queue.status(), QueueStatus::Idle);
  assert!(queue.is_empty());
  assert_eq!(queue.completed_count(), 3);
}

#[test]
fn each_snapshot_is_published_before_its_recompute_and_after_the_previous_one() {
  let events = Arc::new(Events::default());
  let recorder = Arc::new(Recorder { events: events.clone() });
  let queue = UpdateQueue::new(recorder.clone(), recorder);

  for id in ["a", "b", "c"] {
    queue.enqueue(task(id));
  }
  assert!(queue.wait_idle(WAIT));
  let order: Vec<String> = events.all().into_iter().filter(|e| !e.starts_with("reason:")).collect();
  assert_eq!(
    order,
    vec!["publish:a", "recompute:a", "publish:b", "recompute:b", "publish:c", "recompute:c"]
  );
}

#[test]
fn collapse_keeps_the_in_flight_task_and_drops_pending_ones() {
  init_logs();
  let events = Arc::new(Events::default());
  let (queue, started, release) = gated_queue(&events);

  queue.enqueue(task("t1"));
  assert_eq!(started.recv_timeout(WAIT).unwrap(), "t1");
  queue.enqueue(task("t2"));
  queue.collapse_to_latest(task("t-new"));

  let pending: Vec<String> = queue.pending().iter().map(|t| id_of(t.snapshot())).collect();
  assert_eq!(pending, vec!["t1", "t-new"]);
  assert_eq!(queue.status(), QueueStatus::Processing);

  release.send(()).unwrap();
  assert_eq!(started.recv_timeout(WAIT).unwrap(), "t-new");
  release.send(()).unwrap();

  assert!(queue.wait_idle(WAIT));
  assert_eq!(events.with_prefix("publish:"), vec!["t1", "t-new"]);
}

#[test]
fn collapse_on_an_idle_queue_runs_just_that_task() {
  let events = Arc::new(Events::default());
  let recorder = Arc::new(Recorder { events: events.clone() });
  let queue = UpdateQueue::new(recorder.clone(), recorder);

  queue.collapse_to_latest(task("only").with_reason(UpdateReason::Replace));
  assert!(queue.wait_idle(WAIT));
  assert_eq!(events.with_prefix("publish:"), vec!["only"]);
  assert_eq!(queue.completed_count(), 1);
}

#[test]
fn snapshot_is_visible_while_recompute_is_still_running() {
  let events = Arc::new(Events::default());
  let (queue, started, release) = gated_queue(&events);

  queue.enqueue(task("first").with_reason(UpdateReason::Initial));
  started.recv_timeout(WAIT).unwrap();
  assert_eq!(events.all(), vec!["publish:first", "initial"]);
  assert!(!queue.wait_idle(Duration::from_millis(20)));

  release.send(()).unwrap();
  assert!(queue.wait_idle(WAIT));
}

struct Flaky;

impl Recompute for Flaky {
  fn recompute(&self, task: &UpdateTask) -> Result<(), RecomputeError> {
    match id_of(task.snapshot()).as_str() {
      "bad" => Err(RecomputeError("expression error".into())),
      "boom" => panic!("evaluator crashed"),
      _ => Ok(()),
    }
  }
}

#[test]
fn recompute_failures_do_not_stall_the_queue() {
  init_logs();
  let events = Arc::new(Events::default());
  let queue = UpdateQueue::new(Arc::new(Recorder { events: events.clone() }), Arc::new(Flaky));

  for id in ["ok1", "bad", "boom", "ok2"] {
    queue.enqueue(task(id));
  }

  assert!(queue.wait_idle(WAIT));
  assert_eq!(events.with_prefix("publish:"), vec!["ok1", "bad", "boom", "ok2"]);
  assert_eq!(queue.completed_count(), 4);
  assert_eq!(queue.failed_count(), 2);
  assert!(queue.is_empty());
}

#[test]
fn queue_restarts_after_going_idle() {
  let events = Arc::new(Events::default());
  let recorder = Arc::new(Recorder { events: events.clone() });
  let queue = UpdateQueue::new(recorder.clone(), recorder);

  queue.enqueue(task("one"));
  assert!(queue.wait_idle(WAIT));
  queue.enqueue(task("two"));
  assert!(queue.wait_idle(WAIT));
  assert_eq!(events.with_prefix("publish:"), vec!["one", "two"]);
}

#[test]
fn recompute_sees_the_reason_of_each_task() {
  let events = Arc::new(Events::default());
  let recorder = Arc::new(Recorder { events: events.clone() });
  let queue = UpdateQueue::new(recorder.clone(), recorder);

  queue.enqueue(task("open").with_reason(UpdateReason::Initial));
  queue.enqueue(task("edit"));
  queue.enqueue(task("swap").with_reason(UpdateReason::Replace));

  assert!(queue.wait_idle(WAIT));
  assert_eq!(events.with_prefix("reason:"), vec!["Initial", "Edit", "Replace"]);
}
