use std::{
  collections::HashMap,
  path::Path,
  sync::Arc,
  time::Duration,
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  export as export_impl,
  index::{build_index, match_slots, schema_children_at, SchemaIndex, Slot},
  layout::{resolve_column_widths, ResolvedColumnWidth},
  merge::{insert_in_schema_order, merge_repeats, merge_single, RepeatUpdate},
  models::{
    Answer, DraftInfo, ExportResult, ItemContainer, ItemPathSegment, Questionnaire, QuestionnaireResponse,
    ResponseNode, SchemaItem, SessionInfo, UpdateReason,
  },
  path::{extend_item_path, resolve_path, ItemPath},
  queue::{NoopRecompute, QueueStatus, Recompute, UpdateQueue, UpdateTask},
  registry::{BehaviorRegistry, ItemBehavior},
  repeat::{hydrate_repeat_answers, IdGenerator, RepeatInstanceList, UuidIdGenerator},
  storage::{now_ms, RecentQuestionnaire, Storage, StorageOptions},
  store::{ResponseState, ResponseStore, SubscriptionId},
};

const CONTAINER_WIDTH_SETTING: &str = "column_container_width_px";

#[derive(Debug, Error)]
pub enum FormError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("unknown session: {0}")]
  UnknownSession(String),
  #[error("invalid item path: {0}")]
  InvalidPath(String),
  #[error("bad path token: {0}")]
  BadPathToken(String),
  #[error("invalid argument: {0}")]
  InvalidArg(String),
  #[error("storage error: {0}")]
  Storage(String),
}

#[derive(Debug, Clone)]
pub struct FormOptions {
  pub storage: StorageOptions,
  pub recent_limit: usize,
  pub trim_strings_on_export: bool,
  /// Used by `column_widths` when the caller has not measured a container.
  pub default_container_width_px: f64,
}

impl Default for FormOptions {
  fn default() -> Self {
    Self {
      storage: StorageOptions::default(),
      recent_limit: 20,
      trim_strings_on_export: true,
      default_container_width_px: 1000.0,
    }
  }
}

struct SessionState {
  info: SessionInfo,
  questionnaire: Arc<Questionnaire>,
  store: ResponseStore,
  queue: UpdateQueue,
  /// Most recently enqueued document. Edits are applied to a copy of this,
  /// never to the published snapshot, so queued edits are not lost.
  head: Arc<QuestionnaireResponse>,
}

#[derive(Clone)]
pub struct FormEngine {
  options: FormOptions,
  sessions: Arc<Mutex<HashMap<String, SessionState>>>,
  behaviors: Arc<RwLock<BehaviorRegistry>>,
  recompute: Arc<dyn Recompute>,
  ids: Arc<dyn IdGenerator>,
  storage: Storage,
}

impl FormEngine {
  pub fn new(options: FormOptions) -> Result<Self, FormError> {
    Self::with_collaborators(options, Arc::new(NoopRecompute), Arc::new(UuidIdGenerator))
  }

  pub fn with_collaborators(
    options: FormOptions,
    recompute: Arc<dyn Recompute>,
    ids: Arc<dyn IdGenerator>,
  ) -> Result<Self, FormError> {
    let storage = Storage::new(options.storage.clone()).map_err(FormError::Storage)?;
    Ok(Self {
      options,
      sessions: Arc::new(Mutex::new(HashMap::new())),
      behaviors: Arc::new(RwLock::new(BehaviorRegistry::default())),
      recompute,
      ids,
      storage,
    })
  }

  /// Reads a questionnaire from disk and opens a session with a blank response.
  pub fn open_questionnaire(&self, path: impl AsRef<Path>) -> Result<SessionInfo, FormError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let questionnaire: Questionnaire = serde_json::from_str(&json)?;
    let origin = path.to_string_lossy().to_string();

    if let Err(e) = self.storage.touch_recent(&origin, questionnaire.title.as_deref(), None) {
      log::warn!("could not record recent questionnaire '{origin}': {e}");
    }
    self.open_with_response(questionnaire, None, origin)
  }

  pub fn open_questionnaire_str(&self, json: &str, origin: impl Into<String>) -> Result<SessionInfo, FormError> {
    let questionnaire: Questionnaire = serde_json::from_str(json)?;
    self.open_with_response(questionnaire, None, origin)
  }

  /// Opens a session over `questionnaire`, continuing `response` when given.
  /// The initial document goes through the queue like any other update.
  pub fn open_with_response(
    &self,
    questionnaire: Questionnaire,
    response: Option<QuestionnaireResponse>,
    origin: impl Into<String>,
  ) -> Result<SessionInfo, FormError> {
    let questionnaire_ref = questionnaire.reference();
    let response = match response {
      Some(r) => {
        if r.questionnaire.is_some() && questionnaire_ref.is_some() && r.questionnaire != questionnaire_ref {
          log::warn!(
            "response references {:?} but questionnaire is {:?}; continuing",
            r.questionnaire, questionnaire_ref
          );
        }
        r
      }
      None => QuestionnaireResponse::new(questionnaire_ref.clone()),
    };

    let session_id = Uuid::new_v4().to_string();
    let info = SessionInfo {
      session_id: session_id.clone(),
      origin: origin.into(),
      questionnaire_ref,
      created_at_ms: now_ms(),
    };

    let store = ResponseStore::new(QuestionnaireResponse::new(info.questionnaire_ref.clone()));
    let queue = UpdateQueue::new(Arc::new(store.clone()), self.recompute.clone());
    let head = Arc::new(response);
    queue.enqueue(UpdateTask::new(head.clone()).with_reason(UpdateReason::Initial));

    log::debug!("opened session {session_id} for {}", info.origin);
    self.sessions.lock().insert(
      session_id,
      SessionState {
        info: info.clone(),
        questionnaire: Arc::new(questionnaire),
        store,
        queue,
        head,
      },
    );
    Ok(info)
  }

  pub fn session_info(&self, session_id: &str) -> Result<SessionInfo, FormError> {
    self.with_session(session_id, |s| Ok(s.info.clone()))
  }

  /// Drops the session. Tasks already queued still run to completion on the
  /// worker thread.
  pub fn close_session(&self, session_id: &str) -> Result<(), FormError> {
    self
      .sessions
      .lock()
      .remove(session_id)
      .map(|_| log::debug!("closed session {session_id}"))
      .ok_or_else(|| FormError::UnknownSession(session_id.to_string()))
  }

  pub fn questionnaire(&self, session_id: &str) -> Result<Arc<Questionnaire>, FormError> {
    self.with_session(session_id, |s| Ok(s.questionnaire.clone()))
  }

  /// The currently published snapshot.
  pub fn response(&self, session_id: &str) -> Result<Arc<QuestionnaireResponse>, FormError> {
    self.with_session(session_id, |s| Ok(s.store.response()))
  }

  pub fn response_state(&self, session_id: &str) -> Result<ResponseState, FormError> {
    self.with_session(session_id, |s| Ok(s.store.get_state()))
  }

  pub fn subscribe(
    &self,
    session_id: &str,
    listener: impl Fn(&ResponseState) + Send + Sync + 'static,
  ) -> Result<SubscriptionId, FormError> {
    self.with_session(session_id, |s| Ok(s.store.subscribe(listener)))
  }

  pub fn unsubscribe(&self, session_id: &str, id: SubscriptionId) -> Result<bool, FormError> {
    self.with_session(session_id, |s| Ok(s.store.unsubscribe(id)))
  }

  /// Slots of the group `parent` addresses, matched against the published
  /// document. A parent with no data yet yields unanswered slots.
  pub fn slots(&self, session_id: &str, parent: &ItemPath) -> Result<Vec<Slot>, FormError> {
    self.with_session(session_id, |s| {
      let schema = schema_children_at(s.questionnaire.as_ref(), parent)
        .ok_or_else(|| FormError::InvalidPath(parent.to_string()))?;
      let response = s.store.response();
      let children = published_children(response.as_ref(), parent);
      Ok(match_slots(schema, children, &build_index(schema)))
    })
  }

  /// The node a path addresses in the published document, if any.
  pub fn node_at(&self, session_id: &str, path: &ItemPath) -> Result<Option<ResponseNode>, FormError> {
    self.with_session(session_id, |s| Ok(resolve_path(s.store.response().as_ref(), path).cloned()))
  }

  /// Editable repeat instances of the repeating item `link_id` under `parent`.
  pub fn repeat_instances(
    &self,
    session_id: &str,
    parent: &ItemPath,
    link_id: &str,
  ) -> Result<RepeatInstanceList, FormError> {
    let nodes = self.repeating_slot(session_id, parent, link_id)?;
    Ok(RepeatInstanceList::hydrate(link_id, &nodes, self.ids.clone()))
  }

  /// Answers of the repeating question `link_id` under `parent`, each with an identity.
  pub fn repeat_answers(&self, session_id: &str, parent: &ItemPath, link_id: &str) -> Result<Vec<Answer>, FormError> {
    let nodes = self.repeating_slot(session_id, parent, link_id)?;
    Ok(hydrate_repeat_answers(link_id, nodes.first(), self.ids.as_ref()))
  }

  /// Merges `node` under `parent` in a copy of the latest document and queues it.
  pub fn update_item(&self, session_id: &str, parent: &ItemPath, node: ResponseNode) -> Result<(), FormError> {
    let target = extend_item_path(parent, node.link_id.clone(), None);
    self.edit(session_id, parent, UpdateReason::Edit, target, |children, index| {
      merge_single(node, children, index)
    })
  }

  /// Replaces every instance of `update.link_id` under `parent` and queues the result.
  pub fn update_repeats(&self, session_id: &str, parent: &ItemPath, update: RepeatUpdate) -> Result<(), FormError> {
    let target = extend_item_path(parent, update.link_id.clone(), None);
    self.edit(session_id, parent, UpdateReason::Edit, target, |children, index| {
      merge_repeats(update, children, index)
    })
  }

  /// Swaps in a whole new document, superseding every edit that has not
  /// started processing yet.
  pub fn replace_response(&self, session_id: &str, response: QuestionnaireResponse) -> Result<(), FormError> {
    let mut sessions = self.sessions.lock();
    let s = sessions
      .get_mut(session_id)
      .ok_or_else(|| FormError::UnknownSession(session_id.to_string()))?;
    s.head = Arc::new(response);
    s.queue
      .collapse_to_latest(UpdateTask::new(s.head.clone()).with_reason(UpdateReason::Replace));
    Ok(())
  }

  pub fn queue_status(&self, session_id: &str) -> Result<QueueStatus, FormError> {
    self.with_session(session_id, |s| Ok(s.queue.status()))
  }

  /// Blocks until every queued update of the session has been published and
  /// recomputed, or the timeout elapses.
  pub fn wait_idle(&self, session_id: &str, timeout: Duration) -> Result<bool, FormError> {
    let queue = self.with_session(session_id, |s| Ok(s.queue.clone()))?;
    Ok(queue.wait_idle(timeout))
  }

  pub fn register_behavior(&self, link_id: impl Into<String>, behavior: Arc<dyn ItemBehavior>) {
    self.behaviors.write().register(link_id, behavior);
  }

  /// Column widths for the children of the group at `group`, laid out as a table.
  ///
  /// A measured container width is remembered in settings; without one the
  /// last remembered width is used, then the configured default.
  pub fn column_widths(
    &self,
    session_id: &str,
    group: &ItemPath,
    container_width_px: Option<f64>,
  ) -> Result<Vec<ResolvedColumnWidth>, FormError> {
    let questionnaire = self.questionnaire(session_id)?;
    let columns = schema_children_at(questionnaire.as_ref(), group)
      .ok_or_else(|| FormError::InvalidPath(group.to_string()))?;
    let specs = self.behaviors.read().column_specs(columns);
    let container = match container_width_px {
      Some(width) => {
        self.remember_container_width(width);
        width
      }
      None => self
        .remembered_container_width()
        .unwrap_or(self.options.default_container_width_px),
    };
    Ok(resolve_column_widths(&specs, container))
  }

  fn remember_container_width(&self, width: f64) {
    if !width.is_finite() || width <= 0.0 {
      return;
    }
    let stored = serde_json::to_string(&width)
      .map_err(|e| e.to_string())
      .and_then(|json| self.storage.set_setting_json(CONTAINER_WIDTH_SETTING, &json));
    if let Err(e) = stored {
      log::warn!("could not remember container width {width}: {e}");
    }
  }

  fn remembered_container_width(&self) -> Option<f64> {
    match self.storage.get_setting_json(CONTAINER_WIDTH_SETTING) {
      Ok(Some(json)) => serde_json::from_str::<f64>(&json)
        .map_err(|e| log::warn!("ignoring stored container width '{json}': {e}"))
        .ok()
        .filter(|w| w.is_finite() && *w > 0.0),
      Ok(None) => None,
      Err(e) => {
        log::warn!("could not read stored container width: {e}");
        None
      }
    }
  }

  /// Persists the latest document (queued edits included) as a draft.
  pub fn save_draft(&self, session_id: &str) -> Result<DraftInfo, FormError> {
    let (questionnaire_ref, head) = self.with_session(session_id, |s| {
      Ok((s.info.questionnaire_ref.clone(), s.head.clone()))
    })?;
    let json = serde_json::to_string(head.as_ref())?;
    let draft_id = head.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let info = self
      .storage
      .save_draft(&draft_id, questionnaire_ref.as_deref(), head.status, &json)
      .map_err(FormError::Storage)?;
    log::debug!("saved draft {draft_id} for session {session_id}");
    Ok(info)
  }

  pub fn list_drafts(&self, questionnaire_ref: Option<&str>) -> Result<Vec<DraftInfo>, FormError> {
    self.storage.list_drafts(questionnaire_ref).map_err(FormError::Storage)
  }

  pub fn load_draft(&self, draft_id: &str) -> Result<QuestionnaireResponse, FormError> {
    let json = self
      .storage
      .load_draft(draft_id)
      .map_err(FormError::Storage)?
      .ok_or_else(|| FormError::InvalidArg(format!("no draft with id {draft_id}")))?;
    let mut response: QuestionnaireResponse = serde_json::from_str(&json)?;
    if response.id.is_none() {
      response.id = Some(draft_id.to_string());
    }
    Ok(response)
  }

  pub fn delete_draft(&self, draft_id: &str) -> Result<bool, FormError> {
    self.storage.delete_draft(draft_id).map_err(FormError::Storage)
  }

  pub fn recent_questionnaires(&self) -> Result<Vec<RecentQuestionnaire>, FormError> {
    self
      .storage
      .list_recent(self.options.recent_limit)
      .map_err(FormError::Storage)
  }

  /// Writes the pruned latest document to `output_path`.
  pub fn export_response(&self, session_id: &str, output_path: impl AsRef<Path>) -> Result<ExportResult, FormError> {
    let (questionnaire, head) = self.with_session(session_id, |s| Ok((s.questionnaire.clone(), s.head.clone())))?;
    export_impl::export_response(
      questionnaire.as_ref(),
      head.as_ref(),
      self.options.trim_strings_on_export,
      output_path.as_ref(),
    )
  }

  pub fn storage(&self) -> &Storage {
    &self.storage
  }

  fn with_session<T>(
    &self,
    session_id: &str,
    f: impl FnOnce(&SessionState) -> Result<T, FormError>,
  ) -> Result<T, FormError> {
    let sessions = self.sessions.lock();
    let s = sessions
      .get(session_id)
      .ok_or_else(|| FormError::UnknownSession(session_id.to_string()))?;
    f(s)
  }

  fn repeating_slot(&self, session_id: &str, parent: &ItemPath, link_id: &str) -> Result<Vec<ResponseNode>, FormError> {
    let questionnaire = self.questionnaire(session_id)?;
    let schema = schema_children_at(questionnaire.as_ref(), parent)
      .ok_or_else(|| FormError::InvalidPath(parent.to_string()))?;
    let pos = build_index(schema)
      .position(link_id)
      .ok_or_else(|| FormError::InvalidArg(format!("'{link_id}' is not a child of {parent}")))?;
    let slots = self.slots(session_id, parent)?;
    match slots.into_iter().nth(pos) {
      Some(Slot::List(nodes)) => Ok(nodes),
      _ => Err(FormError::InvalidArg(format!("'{link_id}' does not repeat"))),
    }
  }

  /// Copy-on-write edit of the children under `parent`, followed by an enqueue.
  fn edit(
    &self,
    session_id: &str,
    parent: &ItemPath,
    reason: UpdateReason,
    target: ItemPath,
    apply: impl FnOnce(&mut Vec<ResponseNode>, &SchemaIndex),
  ) -> Result<(), FormError> {
    let behaviors = self.behaviors.read().clone();
    let mut sessions = self.sessions.lock();
    let s = sessions
      .get_mut(session_id)
      .ok_or_else(|| FormError::UnknownSession(session_id.to_string()))?;

    let mut working = s.head.as_ref().clone();
    let schema = schema_children_at(s.questionnaire.as_ref(), parent)
      .ok_or_else(|| FormError::InvalidPath(parent.to_string()))?;
    let children = children_at_mut(
      working.children_mut(),
      &s.questionnaire.item,
      parent.segments(),
      &behaviors,
    )?;
    apply(children, &build_index(schema));
    drop_empty_along(working.children_mut(), parent.segments());
    if working.item.as_ref().is_some_and(Vec::is_empty) {
      working.item = None;
    }

    s.head = Arc::new(working);
    s.queue
      .enqueue(UpdateTask::new(s.head.clone()).with_target(target).with_reason(reason));
    Ok(())
  }
}

fn published_children<'a>(response: &'a QuestionnaireResponse, parent: &ItemPath) -> &'a [ResponseNode] {
  if parent.is_empty() {
    return response.children();
  }
  resolve_path(response, parent).map(|n| n.children()).unwrap_or(&[])
}

/// Removes nodes on `path` that were left without content, deepest first.
fn drop_empty_along(children: &mut Vec<ResponseNode>, path: &[ItemPathSegment]) {
  let Some((seg, rest)) = path.split_first() else {
    return;
  };
  let Some(pos) = children
    .iter()
    .enumerate()
    .filter(|(_, c)| c.link_id == seg.link_id)
    .nth(seg.repeat_index.unwrap_or(0))
    .map(|(i, _)| i)
  else {
    return;
  };
  if let Some(grandchildren) = children[pos].item.as_mut() {
    drop_empty_along(grandchildren, rest);
  }
  if !children[pos].has_content() {
    children.remove(pos);
  }
}

/// Walks `path` down a working copy, materializing blank nodes for groups and
/// repeat instances that do not exist yet. Pointing past the end of a repeat
/// list by more than one is an error.
fn children_at_mut<'a>(
  children: &'a mut Vec<ResponseNode>,
  schema: &[SchemaItem],
  path: &[ItemPathSegment],
  behaviors: &BehaviorRegistry,
) -> Result<&'a mut Vec<ResponseNode>, FormError> {
  let Some((seg, rest)) = path.split_first() else {
    return Ok(children);
  };
  let item = schema
    .iter()
    .find(|s| s.link_id == seg.link_id)
    .ok_or_else(|| FormError::InvalidPath(format!("'{}' has no schema item at this level", seg.link_id)))?;

  let wanted = seg.repeat_index.unwrap_or(0);
  if wanted > 0 && !item.repeats {
    return Err(FormError::InvalidPath(format!(
      "'{}' does not repeat but got index {wanted}",
      seg.link_id
    )));
  }
  let count = children.iter().filter(|c| c.link_id == seg.link_id).count();
  if wanted > count {
    return Err(FormError::InvalidPath(format!(
      "'{}' has {count} instance(s), cannot address [{wanted}]",
      seg.link_id
    )));
  }
  if wanted == count {
    let blank = behaviors.resolve(&item.link_id).blank_node(item);
    match children.iter().rposition(|c| c.link_id == seg.link_id) {
      Some(last) => children.insert(last + 1, blank),
      None => {
        insert_in_schema_order(children, blank, &build_index(schema));
      }
    }
  }

  let pos = children
    .iter()
    .enumerate()
    .filter(|(_, c)| c.link_id == seg.link_id)
    .nth(wanted)
    .map(|(i, _)| i)
    .ok_or_else(|| FormError::InvalidPath(seg.link_id.clone()))?;
  children_at_mut(children[pos].children_mut(), &item.item, rest, behaviors)
}
