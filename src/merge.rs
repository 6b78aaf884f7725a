use crate::{
  index::SchemaIndex,
  models::{Answer, ItemContainer, ResponseNode, SchemaItem},
};

/// The full instance list of one repeating item, written back as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatUpdate {
  pub link_id: String,
  pub instances: Vec<ResponseNode>,
}

impl RepeatUpdate {
  pub fn new(link_id: impl Into<String>, instances: Vec<ResponseNode>) -> Self {
    Self {
      link_id: link_id.into(),
      instances,
    }
  }
}

/// Writes one node into `parent` at the position its schema index dictates,
/// replacing any existing child with the same linkId.
///
/// An update without answers or children removes the child instead. Updates
/// whose linkId is not part of `index` leave `parent` untouched. Siblings
/// with other linkIds keep their relative order.
pub fn merge_single<C: ItemContainer + ?Sized>(update: ResponseNode, parent: &mut C, index: &SchemaIndex) {
  let Some(target) = index.position(&update.link_id) else {
    log::warn!("merge of '{}' skipped: not a child of this group", update.link_id);
    return;
  };
  let children = parent.children_mut();
  children.retain(|c| c.link_id != update.link_id);
  if !update.has_content() {
    return;
  }
  let at = insertion_point(children, target, index);
  children.insert(at, update);
}

/// Replaces every instance of a repeating item in `parent` with
/// `update.instances`, placed at the item's schema position.
///
/// Instances without content are dropped; an empty list removes the item
/// entirely since an unanswered repeat is represented by absence.
pub fn merge_repeats<C: ItemContainer + ?Sized>(update: RepeatUpdate, parent: &mut C, index: &SchemaIndex) {
  let Some(target) = index.position(&update.link_id) else {
    log::warn!("repeat merge of '{}' skipped: not a child of this group", update.link_id);
    return;
  };
  let children = parent.children_mut();
  children.retain(|c| c.link_id != update.link_id);

  let at = insertion_point(children, target, index);
  let kept = update.instances.into_iter().filter(|n| {
    if n.link_id != update.link_id {
      log::warn!(
        "repeat instance '{}' does not match '{}'; dropped",
        n.link_id, update.link_id
      );
      return false;
    }
    n.has_content()
  });
  children.splice(at..at, kept);
}

/// Inserts `node` after any siblings at or before its schema position and
/// returns where it landed. Used to materialize placeholders in working copies.
pub(crate) fn insert_in_schema_order(
  children: &mut Vec<ResponseNode>,
  node: ResponseNode,
  index: &SchemaIndex,
) -> usize {
  let target = index.position(&node.link_id).unwrap_or(usize::MAX);
  let at = insertion_point(children, target, index);
  children.insert(at, node);
  at
}

/// First position whose schema index is past `target`. Children unknown to
/// the index are stepped over so they keep their place.
fn insertion_point(children: &[ResponseNode], target: usize, index: &SchemaIndex) -> usize {
  children
    .iter()
    .position(|c| index.position(&c.link_id).is_some_and(|p| p > target))
    .unwrap_or(children.len())
}

/// Placeholder group node for a schema group that has no response data yet.
pub fn empty_group(item: &SchemaItem) -> ResponseNode {
  ResponseNode {
    link_id: item.link_id.clone(),
    text: item.text.clone(),
    answer: None,
    item: Some(Vec::new()),
  }
}

/// Placeholder question node, optionally with an answer that only carries an id.
pub fn empty_item(item: &SchemaItem, answer_key: Option<&str>) -> ResponseNode {
  ResponseNode {
    link_id: item.link_id.clone(),
    text: item.text.clone(),
    answer: answer_key.map(|key| {
      vec![Answer {
        id: Some(key.to_string()),
        ..Answer::default()
      }]
    }),
    item: None,
  }
}
