use std::{path::PathBuf, time::Duration};

use form_core::{Answer, FormEngine, FormOptions, ItemPath, ResponseNode, StorageOptions};

fn main() -> Result<(), String> {
  env_logger::init();
  let path = std::env::args()
    .nth(1)
    .ok_or_else(|| "usage: cargo run --example smoke_session -- <path-to-questionnaire.json> [answer]".to_string())?;
  let path = PathBuf::from(path);
  let answer = std::env::args().nth(2).unwrap_or_else(|| "smoke".to_string());

  let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
  let sqlite = dir.path().join("smoke.sqlite");

  let eng = FormEngine::new(FormOptions {
    storage: StorageOptions {
      sqlite_path: Some(sqlite),
    },
    ..FormOptions::default()
  })
  .map_err(|e| e.to_string())?;

  let session = eng.open_questionnaire(&path).map_err(|e| e.to_string())?;
  println!("session={}", session.session_id);
  println!("questionnaire={:?}", session.questionnaire_ref);

  let questionnaire = eng.questionnaire(&session.session_id).map_err(|e| e.to_string())?;
  let first_question = questionnaire
    .item
    .iter()
    .find(|i| !i.item_type.is_group())
    .ok_or_else(|| "questionnaire has no top-level question".to_string())?;
  println!("answering {}", first_question.link_id);

  let node = ResponseNode::new(first_question.link_id.clone()).with_answer(Answer::string(answer));
  eng
    .update_item(&session.session_id, &ItemPath::root(), node)
    .map_err(|e| e.to_string())?;
  if !eng
    .wait_idle(&session.session_id, Duration::from_secs(5))
    .map_err(|e| e.to_string())?
  {
    return Err("update queue did not settle".into());
  }

  let slots = eng.slots(&session.session_id, &ItemPath::root()).map_err(|e| e.to_string())?;
  println!("slots={}", slots.len());
  let response = eng.response(&session.session_id).map_err(|e| e.to_string())?;
  let json = serde_json::to_string_pretty(response.as_ref()).map_err(|e| e.to_string())?;
  println!("{json}");
  Ok(())
}
