use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use uuid::Uuid;

use crate::{
  merge::RepeatUpdate,
  models::{Answer, ResponseNode},
};

/// Source of fresh identities for newly created repeat instances.
pub trait IdGenerator: Send + Sync {
  fn next(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
  fn next(&self) -> String {
    Uuid::new_v4().simple().to_string()
  }
}

/// Counts up from zero with a fixed prefix. Deterministic, so handy in tests
/// and demos.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
  prefix: String,
  next: AtomicU64,
}

impl SequentialIdGenerator {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      next: AtomicU64::new(0),
    }
  }
}

impl IdGenerator for SequentialIdGenerator {
  fn next(&self) -> String {
    let n = self.next.fetch_add(1, Ordering::SeqCst);
    format!("{}{n}", self.prefix)
  }
}

/// Identity of an instance the user just added.
pub fn new_repeat_id(link_id: &str, ids: &dyn IdGenerator) -> String {
  format!("{link_id}-repeat-{}", ids.next())
}

/// Identity of the instance found at `index` when hydrating existing data.
/// Stable across re-hydration of the same document.
pub fn existing_repeat_id(link_id: &str, index: usize) -> String {
  format!("{link_id}-repeat-{index:06}")
}

/// One occurrence of a repeating item; `node` is `None` for a blank
/// instance that has not been answered yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatInstance {
  pub id: String,
  pub node: Option<ResponseNode>,
}

/// Pairs existing instances with deterministic identities. No data yields a
/// single blank instance so a repeating group always shows one row.
pub fn hydrate_repeat_instances(
  link_id: &str,
  nodes: &[ResponseNode],
  ids: &dyn IdGenerator,
) -> Vec<RepeatInstance> {
  if nodes.is_empty() {
    return vec![RepeatInstance {
      id: new_repeat_id(link_id, ids),
      node: None,
    }];
  }
  nodes
    .iter()
    .enumerate()
    .map(|(i, node)| RepeatInstance {
      id: existing_repeat_id(link_id, i),
      node: Some(node.clone()),
    })
    .collect()
}

/// Answers of a repeating question, each carrying an identity.
///
/// A missing node or answer list yields one blank answer. An explicitly empty
/// answer list yields none. Answers that already have an id keep it.
pub fn hydrate_repeat_answers(
  link_id: &str,
  node: Option<&ResponseNode>,
  ids: &dyn IdGenerator,
) -> Vec<Answer> {
  let Some(answers) = node.and_then(|n| n.answer.as_ref()) else {
    return vec![Answer {
      id: Some(new_repeat_id(link_id, ids)),
      ..Answer::default()
    }];
  };
  answers
    .iter()
    .enumerate()
    .map(|(i, answer)| {
      let mut answer = answer.clone();
      if answer.id.is_none() {
        answer.id = Some(existing_repeat_id(link_id, i));
      }
      answer
    })
    .collect()
}

/// Editable list of repeat instances for one repeating item.
///
/// Identities are assigned on creation or hydration and never change when
/// other instances are added, removed or moved.
pub struct RepeatInstanceList {
  link_id: String,
  instances: Vec<RepeatInstance>,
  ids: Arc<dyn IdGenerator>,
}

impl RepeatInstanceList {
  pub fn hydrate(link_id: impl Into<String>, nodes: &[ResponseNode], ids: Arc<dyn IdGenerator>) -> Self {
    let link_id = link_id.into();
    let instances = hydrate_repeat_instances(&link_id, nodes, ids.as_ref());
    Self {
      link_id,
      instances,
      ids,
    }
  }

  pub fn link_id(&self) -> &str {
    &self.link_id
  }

  pub fn instances(&self) -> &[RepeatInstance] {
    &self.instances
  }

  pub fn len(&self) -> usize {
    self.instances.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instances.is_empty()
  }

  /// Appends a blank instance and returns its identity.
  pub fn add_blank(&mut self) -> String {
    let id = new_repeat_id(&self.link_id, self.ids.as_ref());
    self.instances.push(RepeatInstance {
      id: id.clone(),
      node: None,
    });
    id
  }

  pub fn remove(&mut self, id: &str) -> Option<RepeatInstance> {
    let pos = self.instances.iter().position(|r| r.id == id)?;
    Some(self.instances.remove(pos))
  }

  /// Moves the instance at `from` to `to`. Out-of-range positions are ignored.
  pub fn move_instance(&mut self, from: usize, to: usize) -> bool {
    if from >= self.instances.len() || to >= self.instances.len() {
      return false;
    }
    let inst = self.instances.remove(from);
    self.instances.insert(to, inst);
    true
  }

  pub fn set_node(&mut self, id: &str, node: Option<ResponseNode>) -> bool {
    match self.instances.iter_mut().find(|r| r.id == id) {
      Some(inst) => {
        inst.node = node;
        true
      }
      None => false,
    }
  }

  /// Answered instances, in list order, ready for `merge_repeats`.
  pub fn to_update(&self) -> RepeatUpdate {
    let nodes = self
      .instances
      .iter()
      .filter_map(|r| r.node.clone())
      .filter(ResponseNode::has_content)
      .collect();
    RepeatUpdate::new(self.link_id.clone(), nodes)
  }
}
