use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  models::{ItemContainer, QuestionnaireResponse, ResponseNode, UpdateReason},
  queue::Publish,
};

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&ResponseState) + Send + Sync>;

/// The published document plus bookkeeping about how it got there.
#[derive(Debug, Clone)]
pub struct ResponseState {
  pub response: Arc<QuestionnaireResponse>,
  pub reason: UpdateReason,
  /// Bumped on every publish, starting at 0 for the empty document.
  pub version: u64,
}

/// Holds the currently published response of one session and notifies
/// subscribers whenever a new snapshot is published.
///
/// Nothing derived from the document is cached here; the accessors below
/// walk the current snapshot on every call.
#[derive(Clone)]
pub struct ResponseStore {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  state: Mutex<ResponseState>,
  listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
  next_id: AtomicU64,
}

impl ResponseStore {
  pub fn new(initial: QuestionnaireResponse) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        state: Mutex::new(ResponseState {
          response: Arc::new(initial),
          reason: UpdateReason::Initial,
          version: 0,
        }),
        listeners: Mutex::new(Vec::new()),
        next_id: AtomicU64::new(1),
      }),
    }
  }

  pub fn get_state(&self) -> ResponseState {
    self.inner.state.lock().clone()
  }

  pub fn response(&self) -> Arc<QuestionnaireResponse> {
    self.inner.state.lock().response.clone()
  }

  /// Replaces the published snapshot, then calls every subscriber with the
  /// new state. Subscribers run on the caller's thread with no lock held.
  pub fn set_state(&self, response: Arc<QuestionnaireResponse>, reason: UpdateReason) {
    let state = {
      let mut st = self.inner.state.lock();
      st.response = response;
      st.reason = reason;
      st.version += 1;
      st.clone()
    };
    let listeners: Vec<Listener> = self.inner.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
    for listener in listeners {
      listener(&state);
    }
  }

  pub fn subscribe(&self, listener: impl Fn(&ResponseState) + Send + Sync + 'static) -> SubscriptionId {
    let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
    self.inner.listeners.lock().push((id, Arc::new(listener)));
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut listeners = self.inner.listeners.lock();
    let before = listeners.len();
    listeners.retain(|(lid, _)| *lid != id);
    listeners.len() != before
  }

  pub fn version(&self) -> u64 {
    self.inner.state.lock().version
  }

  /// LinkIds of every node, at any depth, that carries at least one answer.
  pub fn answered_link_ids(&self) -> Vec<String> {
    let response = self.response();
    let mut out = Vec::new();
    collect_answered(response.children(), &mut out);
    out
  }

  pub fn is_blank(&self) -> bool {
    self.response().children().iter().all(|n| !n.has_content())
  }
}

impl Publish for ResponseStore {
  fn publish(&self, snapshot: &Arc<QuestionnaireResponse>, reason: UpdateReason) {
    log::debug!("publishing {reason:?} snapshot");
    self.set_state(snapshot.clone(), reason);
  }
}

fn collect_answered(nodes: &[ResponseNode], out: &mut Vec<String>) {
  for node in nodes {
    if let Some(answers) = &node.answer {
      if !answers.is_empty() && !out.contains(&node.link_id) {
        out.push(node.link_id.clone());
      }
      for answer in answers {
        if let Some(children) = &answer.item {
          collect_answered(children, out);
        }
      }
    }
    collect_answered(node.children(), out);
  }
}
