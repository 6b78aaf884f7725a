use std::{collections::HashMap, sync::Arc};

use crate::{
  layout::ColumnWidthSpec,
  merge::{empty_group, empty_item},
  models::{ResponseNode, SchemaItem},
};

/// Per-item capabilities that can be overridden by linkId.
pub trait ItemBehavior: Send + Sync {
  /// Declared width of the item when it is laid out as a table column.
  fn column_width(&self, item: &SchemaItem) -> ColumnWidthSpec {
    ColumnWidthSpec::from_schema_item(item)
  }

  /// Node inserted when the item has to exist before it has any answers,
  /// e.g. a group on the way to an edited descendant.
  fn blank_node(&self, item: &SchemaItem) -> ResponseNode {
    if item.item_type.is_group() {
      empty_group(item)
    } else {
      empty_item(item, None)
    }
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBehavior;

impl ItemBehavior for DefaultBehavior {}

/// LinkId to behavior table with a shared fallback.
#[derive(Clone)]
pub struct BehaviorRegistry {
  by_link_id: HashMap<String, Arc<dyn ItemBehavior>>,
  fallback: Arc<dyn ItemBehavior>,
}

impl Default for BehaviorRegistry {
  fn default() -> Self {
    Self::new(Arc::new(DefaultBehavior))
  }
}

impl BehaviorRegistry {
  pub fn new(fallback: Arc<dyn ItemBehavior>) -> Self {
    Self {
      by_link_id: HashMap::new(),
      fallback,
    }
  }

  /// Registers `behavior` for `link_id`, returning the one it replaced.
  pub fn register(
    &mut self,
    link_id: impl Into<String>,
    behavior: Arc<dyn ItemBehavior>,
  ) -> Option<Arc<dyn ItemBehavior>> {
    self.by_link_id.insert(link_id.into(), behavior)
  }

  pub fn unregister(&mut self, link_id: &str) -> bool {
    self.by_link_id.remove(link_id).is_some()
  }

  pub fn resolve(&self, link_id: &str) -> Arc<dyn ItemBehavior> {
    self
      .by_link_id
      .get(link_id)
      .cloned()
      .unwrap_or_else(|| self.fallback.clone())
  }

  pub fn is_overridden(&self, link_id: &str) -> bool {
    self.by_link_id.contains_key(link_id)
  }

  pub fn column_specs(&self, items: &[SchemaItem]) -> Vec<ColumnWidthSpec> {
    items
      .iter()
      .map(|item| self.resolve(&item.link_id).column_width(item))
      .collect()
  }
}
