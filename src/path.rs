use std::fmt;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{
  engine::FormError,
  models::{ItemContainer, ItemPathSegment, ResponseNode},
};

/// Route from the response root to a specific, possibly repeated, node.
///
/// A repeat index is only meaningful for the structure it was computed
/// against; paths are recomputed after structural edits rather than patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemPath(Vec<ItemPathSegment>);

impl ItemPath {
  pub fn root() -> Self {
    Self(Vec::new())
  }

  pub fn segments(&self) -> &[ItemPathSegment] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn last(&self) -> Option<&ItemPathSegment> {
    self.0.last()
  }

  /// The path with its last segment dropped; the root stays the root.
  pub fn parent(&self) -> ItemPath {
    let mut segs = self.0.clone();
    segs.pop();
    Self(segs)
  }
}

impl From<Vec<ItemPathSegment>> for ItemPath {
  fn from(segs: Vec<ItemPathSegment>) -> Self {
    Self(segs)
  }
}

impl fmt::Display for ItemPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, seg) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(".")?;
      }
      write!(f, "item.where(linkId='{}')", seg.link_id.replace('\'', "\\'"))?;
      if let Some(idx) = seg.repeat_index {
        write!(f, "[{idx}]")?;
      }
    }
    Ok(())
  }
}

pub fn create_single_item_path(link_id: impl Into<String>, repeat_index: Option<usize>) -> ItemPath {
  ItemPath(vec![ItemPathSegment {
    link_id: link_id.into(),
    repeat_index,
  }])
}

pub fn extend_item_path(
  path: &ItemPath,
  link_id: impl Into<String>,
  repeat_index: Option<usize>,
) -> ItemPath {
  let mut segs = Vec::with_capacity(path.len() + 1);
  segs.extend_from_slice(&path.0);
  segs.push(ItemPathSegment {
    link_id: link_id.into(),
    repeat_index,
  });
  ItemPath(segs)
}

/// Sets the repeat index of the last segment. An empty path comes back empty.
pub fn append_repeat_index_to_last_segment(path: &ItemPath, index: usize) -> ItemPath {
  let mut out = path.clone();
  if let Some(last) = out.0.last_mut() {
    last.repeat_index = Some(index);
  }
  out
}

/// Renders a path as an expression locator, e.g.
/// `item.where(linkId='a').item.where(linkId='b')[1]`.
pub fn item_path_to_locator_string(path: &ItemPath) -> String {
  path.to_string()
}

/// Opaque, URL-safe token for handing a path across an IPC boundary.
pub fn encode_path_token(path: &ItemPath) -> Result<String, FormError> {
  let json = serde_json::to_vec(path)?;
  Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_path_token(token: Option<&str>) -> Result<ItemPath, FormError> {
  match token {
    None => Ok(ItemPath::root()),
    Some(t) if t.is_empty() => Ok(ItemPath::root()),
    Some(t) => {
      let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(t)
        .map_err(|e| FormError::BadPathToken(e.to_string()))?;
      serde_json::from_slice(&bytes).map_err(|e| FormError::BadPathToken(e.to_string()))
    }
  }
}

/// Finds the node a path addresses. A segment without a repeat index
/// addresses the first sibling carrying that linkId.
pub fn resolve_path<'a, C: ItemContainer + ?Sized>(
  root: &'a C,
  path: &ItemPath,
) -> Option<&'a ResponseNode> {
  let mut children = root.children();
  let mut found = None;
  for seg in path.segments() {
    let node = nth_with_link_id(children, seg)?;
    children = node.children();
    found = Some(node);
  }
  found
}

fn nth_with_link_id<'a>(children: &'a [ResponseNode], seg: &ItemPathSegment) -> Option<&'a ResponseNode> {
  children
    .iter()
    .filter(|c| c.link_id == seg.link_id)
    .nth(seg.repeat_index.unwrap_or(0))
}
