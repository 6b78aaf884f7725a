use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use serde_json::Value;

use crate::{
  engine::FormError,
  index::build_index,
  models::{Answer, ExportResult, ItemContainer, Questionnaire, QuestionnaireResponse, ResponseNode, SchemaItem},
};

/// Copy of `response` fit for hand-off: nodes without content and nodes with
/// no schema counterpart at their level are dropped, and `valueString`
/// answers are trimmed when `trim_strings` is set.
pub fn prune_response(
  questionnaire: &Questionnaire,
  response: &QuestionnaireResponse,
  trim_strings: bool,
) -> QuestionnaireResponse {
  let mut out = response.clone();
  let kept = prune_level(&questionnaire.item, response.children().to_vec(), trim_strings);
  out.item = (!kept.is_empty()).then_some(kept);
  out
}

fn prune_level(schema: &[SchemaItem], nodes: Vec<ResponseNode>, trim_strings: bool) -> Vec<ResponseNode> {
  let index = build_index(schema);
  nodes
    .into_iter()
    .filter_map(|node| {
      let Some(item) = index.position(&node.link_id).and_then(|pos| schema.get(pos)) else {
        log::debug!("export: dropping '{}' (no schema item at this level)", node.link_id);
        return None;
      };
      prune_node(item, node, trim_strings)
    })
    .collect()
}

fn prune_node(item: &SchemaItem, mut node: ResponseNode, trim_strings: bool) -> Option<ResponseNode> {
  if let Some(answers) = node.answer.take() {
    let kept: Vec<Answer> = answers
      .into_iter()
      .filter_map(|a| prune_answer(item, a, trim_strings))
      .collect();
    node.answer = (!kept.is_empty()).then_some(kept);
  }
  if let Some(children) = node.item.take() {
    let kept = prune_level(&item.item, children, trim_strings);
    node.item = (!kept.is_empty()).then_some(kept);
  }
  node.has_content().then_some(node)
}

fn prune_answer(item: &SchemaItem, mut answer: Answer, trim_strings: bool) -> Option<Answer> {
  if trim_strings {
    let blank = match answer.value.get_mut("valueString") {
      Some(Value::String(s)) => {
        let trimmed = s.trim();
        if trimmed.len() != s.len() {
          *s = trimmed.to_string();
        }
        s.is_empty()
      }
      _ => false,
    };
    if blank {
      answer.value.remove("valueString");
    }
  }
  if let Some(children) = answer.item.take() {
    let kept = prune_level(&item.item, children, trim_strings);
    answer.item = (!kept.is_empty()).then_some(kept);
  }
  (!answer.value.is_empty() || answer.item.is_some()).then_some(answer)
}

/// Writes the pruned response as pretty JSON and reports how many response
/// nodes made it into the file.
pub(crate) fn export_response(
  questionnaire: &Questionnaire,
  response: &QuestionnaireResponse,
  trim_strings: bool,
  output_path: &Path,
) -> Result<ExportResult, FormError> {
  if let Some(parent) = output_path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let pruned = prune_response(questionnaire, response, trim_strings);

  let out_file = File::create(output_path)?;
  let mut writer = BufWriter::new(out_file);
  serde_json::to_writer_pretty(&mut writer, &pruned)?;
  writer.write_all(b"\n")?;
  writer.flush()?;

  Ok(ExportResult {
    output_path: output_path.to_string_lossy().to_string(),
    items_written: count_nodes(pruned.children()),
  })
}

fn count_nodes(nodes: &[ResponseNode]) -> u64 {
  nodes
    .iter()
    .map(|n| {
      let nested: u64 = n
        .answer
        .iter()
        .flatten()
        .filter_map(|a| a.item.as_deref())
        .map(count_nodes)
        .sum();
      1 + nested + count_nodes(n.children())
    })
    .sum()
}
