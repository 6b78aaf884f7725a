use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Item kinds of a questionnaire schema.
///
/// Kept as a string-backed enum so documents carrying item types this crate
/// does not know about still round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
  Group,
  Display,
  Boolean,
  Decimal,
  Integer,
  Date,
  DateTime,
  Time,
  String,
  Text,
  Url,
  Choice,
  OpenChoice,
  Attachment,
  Reference,
  Quantity,
  Coding,
  Other(String),
}

impl ItemType {
  pub fn is_group(&self) -> bool {
    matches!(self, ItemType::Group)
  }

  pub fn as_str(&self) -> &str {
    match self {
      ItemType::Group => "group",
      ItemType::Display => "display",
      ItemType::Boolean => "boolean",
      ItemType::Decimal => "decimal",
      ItemType::Integer => "integer",
      ItemType::Date => "date",
      ItemType::DateTime => "dateTime",
      ItemType::Time => "time",
      ItemType::String => "string",
      ItemType::Text => "text",
      ItemType::Url => "url",
      ItemType::Choice => "choice",
      ItemType::OpenChoice => "open-choice",
      ItemType::Attachment => "attachment",
      ItemType::Reference => "reference",
      ItemType::Quantity => "quantity",
      ItemType::Coding => "coding",
      ItemType::Other(s) => s,
    }
  }
}

impl From<String> for ItemType {
  fn from(s: String) -> Self {
    match s.as_str() {
      "group" => ItemType::Group,
      "display" => ItemType::Display,
      "boolean" => ItemType::Boolean,
      "decimal" => ItemType::Decimal,
      "integer" => ItemType::Integer,
      "date" => ItemType::Date,
      "dateTime" => ItemType::DateTime,
      "time" => ItemType::Time,
      "string" => ItemType::String,
      "text" => ItemType::Text,
      "url" => ItemType::Url,
      "choice" => ItemType::Choice,
      "open-choice" => ItemType::OpenChoice,
      "attachment" => ItemType::Attachment,
      "reference" => ItemType::Reference,
      "quantity" => ItemType::Quantity,
      "coding" => ItemType::Coding,
      _ => ItemType::Other(s),
    }
  }
}

impl From<ItemType> for String {
  fn from(t: ItemType) -> Self {
    match t {
      ItemType::Other(s) => s,
      other => other.as_str().to_string(),
    }
  }
}

/// A node of the static form definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaItem {
  pub link_id: String,
  #[serde(rename = "type")]
  pub item_type: ItemType,
  #[serde(default, skip_serializing_if = "is_false")]
  pub repeats: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(default, skip_serializing_if = "is_false")]
  pub read_only: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub required: bool,
  /// Raw extensions; only the ones this crate understands are interpreted.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub extension: Vec<Value>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub item: Vec<SchemaItem>,
}

impl SchemaItem {
  pub fn new(link_id: impl Into<String>, item_type: ItemType) -> Self {
    Self {
      link_id: link_id.into(),
      item_type,
      repeats: false,
      text: None,
      read_only: false,
      required: false,
      extension: Vec::new(),
      item: Vec::new(),
    }
  }

  pub fn repeating(mut self) -> Self {
    self.repeats = true;
    self
  }

  pub fn with_children(mut self, children: Vec<SchemaItem>) -> Self {
    self.item = children;
    self
  }

  pub fn with_text(mut self, text: impl Into<String>) -> Self {
    self.text = Some(text.into());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
  #[serde(default = "questionnaire_resource_type")]
  pub resource_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub item: Vec<SchemaItem>,
}

impl Questionnaire {
  pub fn new(items: Vec<SchemaItem>) -> Self {
    Self {
      resource_type: questionnaire_resource_type(),
      id: None,
      url: None,
      title: None,
      status: None,
      item: items,
    }
  }

  /// Canonical reference stored on responses and drafts: url, else id.
  pub fn reference(&self) -> Option<String> {
    self.url.clone().or_else(|| self.id.clone())
  }
}

/// One answer of a response node. `value[x]` fields are kept as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(flatten)]
  pub value: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item: Option<Vec<ResponseNode>>,
}

impl Answer {
  pub fn string(s: impl Into<String>) -> Self {
    Self::with_value("valueString", Value::String(s.into()))
  }

  pub fn integer(n: i64) -> Self {
    Self::with_value("valueInteger", Value::from(n))
  }

  pub fn boolean(b: bool) -> Self {
    Self::with_value("valueBoolean", Value::Bool(b))
  }

  pub fn with_value(key: &str, value: Value) -> Self {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Self {
      id: None,
      value: map,
      item: None,
    }
  }

  pub fn value_string(&self) -> Option<&str> {
    self.value.get("valueString").and_then(Value::as_str)
  }
}

/// A node of the mutable answer tree. Absence of a node means "unanswered".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseNode {
  pub link_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub answer: Option<Vec<Answer>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item: Option<Vec<ResponseNode>>,
}

impl ResponseNode {
  pub fn new(link_id: impl Into<String>) -> Self {
    Self {
      link_id: link_id.into(),
      text: None,
      answer: None,
      item: None,
    }
  }

  pub fn with_answer(mut self, answer: Answer) -> Self {
    self.answer.get_or_insert_with(Vec::new).push(answer);
    self
  }

  pub fn with_children(mut self, children: Vec<ResponseNode>) -> Self {
    self.item = Some(children);
    self
  }

  /// True when the node carries at least one answer or one child.
  pub fn has_content(&self) -> bool {
    self.answer.as_ref().is_some_and(|a| !a.is_empty())
      || self.item.as_ref().is_some_and(|i| !i.is_empty())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseStatus {
  #[default]
  InProgress,
  Completed,
  Amended,
  EnteredInError,
  Stopped,
}

impl ResponseStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseStatus::InProgress => "in-progress",
      ResponseStatus::Completed => "completed",
      ResponseStatus::Amended => "amended",
      ResponseStatus::EnteredInError => "entered-in-error",
      ResponseStatus::Stopped => "stopped",
    }
  }

  /// Unknown codes read back as `InProgress`.
  pub fn parse(s: &str) -> Self {
    match s {
      "completed" => ResponseStatus::Completed,
      "amended" => ResponseStatus::Amended,
      "entered-in-error" => ResponseStatus::EnteredInError,
      "stopped" => ResponseStatus::Stopped,
      _ => ResponseStatus::InProgress,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
  #[serde(default = "response_resource_type")]
  pub resource_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub status: ResponseStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub questionnaire: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item: Option<Vec<ResponseNode>>,
}

impl QuestionnaireResponse {
  pub fn new(questionnaire: Option<String>) -> Self {
    Self {
      resource_type: response_resource_type(),
      id: None,
      status: ResponseStatus::InProgress,
      questionnaire,
      item: None,
    }
  }

  pub fn with_items(mut self, items: Vec<ResponseNode>) -> Self {
    self.item = Some(items);
    self
  }
}

/// Anything that owns an ordered list of response children: the document
/// root or a nested response node.
pub trait ItemContainer {
  fn children(&self) -> &[ResponseNode];
  fn children_mut(&mut self) -> &mut Vec<ResponseNode>;
}

impl ItemContainer for ResponseNode {
  fn children(&self) -> &[ResponseNode] {
    self.item.as_deref().unwrap_or(&[])
  }

  fn children_mut(&mut self) -> &mut Vec<ResponseNode> {
    self.item.get_or_insert_with(Vec::new)
  }
}

impl ItemContainer for QuestionnaireResponse {
  fn children(&self) -> &[ResponseNode] {
    self.item.as_deref().unwrap_or(&[])
  }

  fn children_mut(&mut self) -> &mut Vec<ResponseNode> {
    self.item.get_or_insert_with(Vec::new)
  }
}

impl ItemContainer for Vec<ResponseNode> {
  fn children(&self) -> &[ResponseNode] {
    self
  }

  fn children_mut(&mut self) -> &mut Vec<ResponseNode> {
    self
  }
}

/// Anything that owns an ordered list of schema children.
pub trait SchemaContainer {
  fn schema_children(&self) -> &[SchemaItem];
}

impl SchemaContainer for Questionnaire {
  fn schema_children(&self) -> &[SchemaItem] {
    &self.item
  }
}

impl SchemaContainer for SchemaItem {
  fn schema_children(&self) -> &[SchemaItem] {
    &self.item
  }
}

/// One step of an item path: a linkId plus, for repeating items, the
/// instance index within that item's list slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ItemPathSegment {
  pub link_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repeat_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
  Initial,
  Edit,
  Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
  pub session_id: String,
  /// File path or caller-supplied label the questionnaire was loaded from.
  pub origin: String,
  pub questionnaire_ref: Option<String>,
  pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
  pub output_path: String,
  pub items_written: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftInfo {
  pub draft_id: String,
  pub questionnaire_ref: Option<String>,
  pub status: ResponseStatus,
  pub saved_at_ms: i64,
}

fn is_false(b: &bool) -> bool {
  !*b
}

fn questionnaire_resource_type() -> String {
  "Questionnaire".into()
}

fn response_resource_type() -> String {
  "QuestionnaireResponse".into()
}
