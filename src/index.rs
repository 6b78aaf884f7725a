use std::collections::HashMap;

use crate::{
  models::{ItemContainer, Questionnaire, QuestionnaireResponse, ResponseNode, SchemaContainer, SchemaItem},
  path::ItemPath,
};

/// Lookup from a schema child's linkId to its 0-based position among its
/// siblings. Built once per group so updates never rescan the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaIndex {
  positions: HashMap<String, usize>,
}

impl SchemaIndex {
  pub fn position(&self, link_id: &str) -> Option<usize> {
    self.positions.get(link_id).copied()
  }

  pub fn contains(&self, link_id: &str) -> bool {
    self.positions.contains_key(link_id)
  }

  pub fn len(&self) -> usize {
    self.positions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }
}

pub fn build_index(schema_children: &[SchemaItem]) -> SchemaIndex {
  let mut positions = HashMap::with_capacity(schema_children.len());
  for (i, item) in schema_children.iter().enumerate() {
    if positions.contains_key(&item.link_id) {
      log::warn!("duplicate sibling linkId '{}' at position {i}; keeping the first", item.link_id);
      continue;
    }
    positions.insert(item.link_id.clone(), i);
  }
  SchemaIndex { positions }
}

/// Response data matched to one schema position.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
  /// Nothing answered yet for a non-repeating item.
  Empty,
  /// The node of a non-repeating item.
  Single(ResponseNode),
  /// Instances of a repeating item; empty when nothing is answered.
  List(Vec<ResponseNode>),
}

impl Slot {
  pub fn is_empty(&self) -> bool {
    match self {
      Slot::Empty => true,
      Slot::Single(_) => false,
      Slot::List(nodes) => nodes.is_empty(),
    }
  }

  pub fn as_single(&self) -> Option<&ResponseNode> {
    match self {
      Slot::Single(node) => Some(node),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[ResponseNode]> {
    match self {
      Slot::List(nodes) => Some(nodes),
      _ => None,
    }
  }

  pub fn into_nodes(self) -> Vec<ResponseNode> {
    match self {
      Slot::Empty => Vec::new(),
      Slot::Single(node) => vec![node],
      Slot::List(nodes) => nodes,
    }
  }
}

/// Aligns response children with schema children, one slot per schema
/// position, in schema order.
///
/// Repeating items always get a `List` slot. A second node for a
/// non-repeating item replaces the first; this is logged as a structural
/// warning rather than treated as fatal.
pub fn match_slots(
  schema_children: &[SchemaItem],
  response_children: &[ResponseNode],
  index: &SchemaIndex,
) -> Vec<Slot> {
  let mut slots: Vec<Slot> = schema_children
    .iter()
    .map(|s| if s.repeats { Slot::List(Vec::new()) } else { Slot::Empty })
    .collect();

  for node in response_children {
    let Some(pos) = index.position(&node.link_id) else {
      log::warn!("response item '{}' has no schema counterpart; ignored", node.link_id);
      continue;
    };
    let Some(slot) = slots.get_mut(pos) else {
      log::warn!(
        "index position {pos} for '{}' is outside the schema children; stale index?",
        node.link_id
      );
      continue;
    };
    if let Slot::List(nodes) = slot {
      nodes.push(node.clone());
      continue;
    }
    if matches!(slot, Slot::Single(_)) {
      log::warn!(
        "duplicate response items for non-repeating '{}'; last one wins",
        node.link_id
      );
    }
    *slot = Slot::Single(node.clone());
  }
  slots
}

/// Every schema linkId (at any depth) mapped to the response nodes found for
/// it at the matching structural location. Unanswered items map to an empty list.
pub fn response_item_map(
  questionnaire: &Questionnaire,
  response: &QuestionnaireResponse,
) -> HashMap<String, Vec<ResponseNode>> {
  let mut map = HashMap::new();
  collect_level(questionnaire.schema_children(), response.children(), &mut map);
  map
}

fn collect_level(
  schema: &[SchemaItem],
  response: &[ResponseNode],
  map: &mut HashMap<String, Vec<ResponseNode>>,
) {
  let index = build_index(schema);
  let slots = match_slots(schema, response, &index);
  for (item, slot) in schema.iter().zip(slots) {
    let nodes = slot.into_nodes();
    map
      .entry(item.link_id.clone())
      .or_insert_with(Vec::new)
      .extend(nodes.iter().cloned());

    if item.item.is_empty() {
      continue;
    }
    if nodes.is_empty() {
      collect_level(&item.item, &[], map);
    } else {
      for node in &nodes {
        collect_level(&item.item, node.children(), map);
      }
    }
  }
}

/// The schema item a path addresses, following linkIds level by level.
/// Repeat indexes are irrelevant on the schema side.
pub fn find_schema_item<'a, S: SchemaContainer + ?Sized>(
  root: &'a S,
  path: &ItemPath,
) -> Option<&'a SchemaItem> {
  let mut children = root.schema_children();
  let mut found = None;
  for seg in path.segments() {
    let item = children.iter().find(|c| c.link_id == seg.link_id)?;
    children = &item.item;
    found = Some(item);
  }
  found
}

/// Schema children of the group a path addresses; the root path yields the
/// questionnaire's top-level items.
pub fn schema_children_at<'a, S: SchemaContainer + ?Sized>(
  root: &'a S,
  path: &ItemPath,
) -> Option<&'a [SchemaItem]> {
  if path.is_empty() {
    return Some(root.schema_children());
  }
  find_schema_item(root, path).map(|item| item.item.as_slice())
}
