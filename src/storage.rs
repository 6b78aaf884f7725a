use std::{
  fs,
  path::{Path, PathBuf},
  time::{SystemTime, UNIX_EPOCH},
};

use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{DraftInfo, ResponseStatus};

#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
  /// Path to SQLite file. If None, defaults to ~/.form-core/storage.sqlite (or %USERPROFILE% on Windows).
  pub sqlite_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Storage {
  path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RecentQuestionnaire {
  pub path: String,
  pub display_name: String,
  pub last_opened_at_ms: i64,
  pub exists: bool,
  pub pinned: bool,
}

impl Storage {
  pub fn new(opts: StorageOptions) -> Result<Self, String> {
    let path = opts.sqlite_path.unwrap_or_else(default_sqlite_path);

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let conn = Connection::open(&path).map_err(|e| e.to_string())?;
    migrate(&conn).map_err(|e| e.to_string())?;
    Ok(Self { path })
  }

  fn open(&self) -> Result<Connection, String> {
    Connection::open(&self.path).map_err(|e| e.to_string())
  }

  /// Add/update a recent questionnaire entry. `display_name` falls back to the file name.
  pub fn touch_recent(&self, path: &str, display_name: Option<&str>, pinned: Option<bool>) -> Result<(), String> {
    let conn = self.open()?;
    let now = now_ms();
    let display_name = display_name
      .map(str::to_string)
      .unwrap_or_else(|| {
        Path::new(path)
          .file_name()
          .and_then(|s| s.to_str())
          .unwrap_or(path)
          .to_string()
      });
    let exists = Path::new(path).exists();

    conn
      .execute(
        r#"
INSERT INTO recent_questionnaires(path, display_name, last_opened_at, exists_flag, pinned)
VALUES(?1, ?2, ?3, ?4, COALESCE(?5, 0))
ON CONFLICT(path) DO UPDATE SET
  display_name=excluded.display_name,
  last_opened_at=excluded.last_opened_at,
  exists_flag=excluded.exists_flag,
  pinned=COALESCE(?5, pinned)
        "#,
        params![path, display_name, now, exists as i32, pinned.map(|b| b as i32)],
      )
      .map_err(|e| e.to_string())?;
    Ok(())
  }

  pub fn list_recent(&self, limit: usize) -> Result<Vec<RecentQuestionnaire>, String> {
    let conn = self.open()?;
    let mut stmt = conn
      .prepare(
        r#"
SELECT path, display_name, last_opened_at, exists_flag, pinned
FROM recent_questionnaires
ORDER BY pinned DESC, last_opened_at DESC
LIMIT ?1
        "#,
      )
      .map_err(|e| e.to_string())?;

    let rows = stmt
      .query_map(params![limit as i64], |row| {
        Ok(RecentQuestionnaire {
          path: row.get(0)?,
          display_name: row.get(1)?,
          last_opened_at_ms: row.get(2)?,
          exists: row.get::<_, i64>(3)? != 0,
          pinned: row.get::<_, i64>(4)? != 0,
        })
      })
      .map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    for r in rows {
      out.push(r.map_err(|e| e.to_string())?);
    }
    Ok(out)
  }

  pub fn set_setting_json(&self, key: &str, value_json: &str) -> Result<(), String> {
    let conn = self.open()?;
    conn
      .execute(
        r#"
INSERT INTO settings(key, value_json)
VALUES(?1, ?2)
ON CONFLICT(key) DO UPDATE SET value_json=excluded.value_json
        "#,
        params![key, value_json],
      )
      .map_err(|e| e.to_string())?;
    Ok(())
  }

  pub fn get_setting_json(&self, key: &str) -> Result<Option<String>, String> {
    let conn = self.open()?;
    conn
      .query_row("SELECT value_json FROM settings WHERE key=?1", params![key], |row| row.get(0))
      .optional()
      .map_err(|e| e.to_string())
  }

  /// Insert or overwrite a saved response.
  pub fn save_draft(
    &self,
    draft_id: &str,
    questionnaire_ref: Option<&str>,
    status: ResponseStatus,
    response_json: &str,
  ) -> Result<DraftInfo, String> {
    let conn = self.open()?;
    let saved_at = now_ms();
    conn
      .execute(
        r#"
INSERT INTO drafts(id, questionnaire_ref, status, saved_at, response_json)
VALUES(?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
  questionnaire_ref=excluded.questionnaire_ref,
  status=excluded.status,
  saved_at=excluded.saved_at,
  response_json=excluded.response_json
        "#,
        params![draft_id, questionnaire_ref, status.as_str(), saved_at, response_json],
      )
      .map_err(|e| e.to_string())?;
    Ok(DraftInfo {
      draft_id: draft_id.to_string(),
      questionnaire_ref: questionnaire_ref.map(str::to_string),
      status,
      saved_at_ms: saved_at,
    })
  }

  /// Newest first. `questionnaire_ref = None` lists every draft.
  pub fn list_drafts(&self, questionnaire_ref: Option<&str>) -> Result<Vec<DraftInfo>, String> {
    let conn = self.open()?;
    let mut stmt = conn
      .prepare(
        r#"
SELECT id, questionnaire_ref, status, saved_at
FROM drafts
WHERE ?1 IS NULL OR questionnaire_ref = ?1
ORDER BY saved_at DESC, id ASC
        "#,
      )
      .map_err(|e| e.to_string())?;

    let rows = stmt
      .query_map(params![questionnaire_ref], |row| {
        Ok(DraftInfo {
          draft_id: row.get(0)?,
          questionnaire_ref: row.get(1)?,
          status: ResponseStatus::parse(&row.get::<_, String>(2)?),
          saved_at_ms: row.get(3)?,
        })
      })
      .map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    for r in rows {
      out.push(r.map_err(|e| e.to_string())?);
    }
    Ok(out)
  }

  /// Raw response JSON of a draft.
  pub fn load_draft(&self, draft_id: &str) -> Result<Option<String>, String> {
    let conn = self.open()?;
    conn
      .query_row("SELECT response_json FROM drafts WHERE id=?1", params![draft_id], |row| row.get(0))
      .optional()
      .map_err(|e| e.to_string())
  }

  pub fn delete_draft(&self, draft_id: &str) -> Result<bool, String> {
    let conn = self.open()?;
    let n = conn
      .execute("DELETE FROM drafts WHERE id=?1", params![draft_id])
      .map_err(|e| e.to_string())?;
    Ok(n > 0)
  }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
  conn.execute_batch(
    r#"
CREATE TABLE IF NOT EXISTS recent_questionnaires(
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  path TEXT NOT NULL UNIQUE,
  display_name TEXT NOT NULL,
  last_opened_at INTEGER NOT NULL,
  exists_flag INTEGER NOT NULL,
  pinned INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS settings(
  key TEXT PRIMARY KEY,
  value_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS drafts(
  id TEXT PRIMARY KEY,
  questionnaire_ref TEXT,
  status TEXT NOT NULL,
  saved_at INTEGER NOT NULL,
  response_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS drafts_by_questionnaire ON drafts(questionnaire_ref, saved_at);
    "#,
  )?;
  Ok(())
}

fn default_sqlite_path() -> PathBuf {
  // - macOS/Linux: $HOME/.form-core/storage.sqlite
  // - Windows: %USERPROFILE%\.form-core\storage.sqlite
  let base = std::env::var_os("HOME")
    .or_else(|| std::env::var_os("USERPROFILE"))
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));
  base.join(".form-core").join("storage.sqlite")
}

pub(crate) fn now_ms() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as i64
}
