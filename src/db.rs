use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Project visibility. Anything that is not explicitly `private` is treated
/// as `public` (rows written before the ownership model carry no owner and
/// must stay editable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "private" => Visibility::Private,
            _ => Visibility::Public,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub base_language: String,
    pub target_languages: Vec<String>,
    pub visibility: Visibility,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationKey {
    pub id: i64,
    pub project_id: String,
    pub string_name: String,
    pub remarks: Option<String>,
    pub last_modified_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationValue {
    pub id: i64,
    pub translation_key_id: i64,
    pub language_code: String,
    pub content: Option<String>,
    pub last_modified_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A key together with all of its per-language values.
#[derive(Debug, Clone, Serialize)]
pub struct KeyWithValues {
    pub key: TranslationKey,
    pub values: Vec<TranslationValue>,
}

impl KeyWithValues {
    /// Look up the value row for a language code, if any.
    pub fn value_for(&self, language_code: &str) -> Option<&TranslationValue> {
        self.values.iter().find(|v| v.language_code == language_code)
    }
}

/// One staged operation of an import plan. The reconciler computes a list of
/// these in memory; `apply_import` commits the whole list in one transaction.
#[derive(Debug, Clone)]
pub enum ImportOp {
    /// New key with its base-language value.
    CreateKey {
        string_name: String,
        language_code: String,
        content: String,
    },
    /// Existing key that is missing its base-language value.
    CreateValue {
        key_id: i64,
        language_code: String,
        content: String,
    },
    /// Existing base value whose content changed: overwrite it and replace
    /// the key's remarks with the already-appended audit text.
    UpdateValue {
        value_id: i64,
        key_id: i64,
        content: String,
        remarks: String,
    },
}

/// One cell write for the translation orchestrator: upserted on the
/// `(translation_key_id, language_code)` uniqueness constraint.
#[derive(Debug, Clone)]
pub struct ValueUpsert {
    pub key_id: i64,
    pub language_code: String,
    pub content: String,
}

/// Partial update of a key: `None` fields are left untouched. `remarks` uses
/// a double Option so callers can explicitly clear it.
#[derive(Debug, Clone, Default)]
pub struct KeyUpdate {
    pub string_name: Option<String>,
    pub remarks: Option<Option<String>>,
    pub values: Vec<(String, String)>,
}

/// Partial update of a project's settings.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub base_language: Option<String>,
    pub target_languages: Option<Vec<String>>,
    pub visibility: Option<Visibility>,
    pub owner_id: Option<Option<String>>,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database, enable foreign keys, and create the schema.
    pub fn new(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)
            .context(format!("Failed to open database at {}", database_path))?;

        conn.execute_batch("PRAGMA foreign_keys = ON")
            .context("Failed to enable foreign keys")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                base_language TEXT NOT NULL,
                target_languages TEXT NOT NULL DEFAULT '[]',
                visibility TEXT NOT NULL DEFAULT 'public',
                owner_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create projects table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS translation_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                string_name TEXT NOT NULL,
                remarks TEXT,
                last_modified_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (project_id, string_name)
            )",
            [],
        )
        .context("Failed to create translation_keys table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS translation_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                translation_key_id INTEGER NOT NULL
                    REFERENCES translation_keys(id) ON DELETE CASCADE,
                language_code TEXT NOT NULL,
                content TEXT,
                last_modified_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (translation_key_id, language_code)
            )",
            [],
        )
        .context("Failed to create translation_values table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- Projects ----

    /// Create a project and return it. The id is a fresh opaque UUID.
    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        base_language: &str,
        target_languages: &[String],
        visibility: Visibility,
        owner_id: Option<&str>,
    ) -> Result<Project> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let languages_json = serde_json::to_string(target_languages)
            .context("Failed to serialize target languages")?;

        conn.execute(
            "INSERT INTO projects
                (id, name, description, base_language, target_languages,
                 visibility, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                name,
                description,
                base_language,
                languages_json,
                visibility.as_str(),
                owner_id,
                now
            ],
        )
        .context("Failed to create project")?;

        Ok(Project {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            base_language: base_language.to_string(),
            target_languages: target_languages.to_vec(),
            visibility,
            owner_id: owner_id.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, base_language, target_languages,
                    visibility, owner_id, created_at, updated_at
             FROM projects WHERE id = ?1",
        )?;

        let project = stmt
            .query_row(params![project_id], |row| {
                let languages_json: String = row.get(4)?;
                let visibility: String = row.get(5)?;
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    base_language: row.get(3)?,
                    // A corrupt list degrades to "no targets configured"
                    target_languages: serde_json::from_str(&languages_json)
                        .unwrap_or_default(),
                    visibility: Visibility::parse(&visibility),
                    owner_id: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })
            .optional()?;

        Ok(project)
    }

    /// Apply a partial settings update. Returns the updated project.
    pub fn update_project_settings(
        &self,
        project_id: &str,
        update: &ProjectUpdate,
    ) -> Result<Project> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            if let Some(name) = &update.name {
                tx.execute(
                    "UPDATE projects SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name, now, project_id],
                )?;
            }
            if let Some(description) = &update.description {
                tx.execute(
                    "UPDATE projects SET description = ?1, updated_at = ?2 WHERE id = ?3",
                    params![description, now, project_id],
                )?;
            }
            if let Some(base_language) = &update.base_language {
                tx.execute(
                    "UPDATE projects SET base_language = ?1, updated_at = ?2 WHERE id = ?3",
                    params![base_language, now, project_id],
                )?;
            }
            if let Some(target_languages) = &update.target_languages {
                let languages_json = serde_json::to_string(target_languages)
                    .context("Failed to serialize target languages")?;
                tx.execute(
                    "UPDATE projects SET target_languages = ?1, updated_at = ?2 WHERE id = ?3",
                    params![languages_json, now, project_id],
                )?;
            }
            if let Some(visibility) = update.visibility {
                tx.execute(
                    "UPDATE projects SET visibility = ?1, updated_at = ?2 WHERE id = ?3",
                    params![visibility.as_str(), now, project_id],
                )?;
            }
            if let Some(owner_id) = &update.owner_id {
                tx.execute(
                    "UPDATE projects SET owner_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![owner_id, now, project_id],
                )?;
            }

            tx.commit().context("Failed to commit project update")?;
        }

        self.get_project(project_id)?
            .context("Project disappeared during settings update")
    }

    /// Delete a project; keys and values cascade. Returns false if absent.
    pub fn delete_project(&self, project_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute("DELETE FROM projects WHERE id = ?1", params![project_id])
            .context("Failed to delete project")?;
        Ok(rows > 0)
    }

    // ---- Keys & values ----

    /// Manually create a key with optional per-language values and remarks.
    /// Rejects a `string_name` that already exists in the project.
    pub fn create_key(
        &self,
        project_id: &str,
        string_name: &str,
        values: &[(String, String)],
        remarks: Option<&str>,
        actor: &str,
    ) -> Result<KeyWithValues> {
        let key_id = {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            let exists: bool = tx.query_row(
                "SELECT COUNT(*) FROM translation_keys
                 WHERE project_id = ?1 AND string_name = ?2",
                params![project_id, string_name],
                |row| row.get::<_, i64>(0).map(|count| count > 0),
            )?;
            if exists {
                anyhow::bail!(
                    "A key named '{}' already exists in this project",
                    string_name
                );
            }

            tx.execute(
                "INSERT INTO translation_keys
                    (project_id, string_name, remarks, last_modified_by,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![project_id, string_name, remarks, actor, now],
            )
            .context("Failed to create translation key")?;
            let key_id = tx.last_insert_rowid();

            for (language_code, content) in values {
                tx.execute(
                    "INSERT INTO translation_values
                        (translation_key_id, language_code, content,
                         last_modified_by, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![key_id, language_code, content, actor, now],
                )
                .context("Failed to create translation value")?;
            }

            tx.commit().context("Failed to commit key creation")?;
            key_id
        };

        self.get_key(key_id)?
            .context("Key disappeared after creation")
    }

    /// Apply a partial key update (rename, replace remarks, upsert values)
    /// in one transaction.
    pub fn update_key(&self, key_id: i64, update: &KeyUpdate, actor: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        if let Some(string_name) = &update.string_name {
            tx.execute(
                "UPDATE translation_keys
                 SET string_name = ?1, last_modified_by = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![string_name, actor, now, key_id],
            )?;
        }
        if let Some(remarks) = &update.remarks {
            tx.execute(
                "UPDATE translation_keys
                 SET remarks = ?1, last_modified_by = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![remarks, actor, now, key_id],
            )?;
        }
        for (language_code, content) in &update.values {
            Self::upsert_value_in_tx(&tx, key_id, language_code, content, actor, &now)?;
        }

        tx.commit().context("Failed to commit key update")
    }

    /// Delete a key; its values cascade. Returns false if absent.
    pub fn delete_key(&self, key_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute("DELETE FROM translation_keys WHERE id = ?1", params![key_id])
            .context("Failed to delete translation key")?;
        Ok(rows > 0)
    }

    pub fn get_key(&self, key_id: i64) -> Result<Option<KeyWithValues>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = stmt_ordered(&conn, &format!("{} WHERE k.id = ?1", Self::KEY_JOIN_SQL))?;
        let rows = stmt.query_map(params![key_id], Self::joined_row)?;
        let keys = Self::fold_joined_rows(rows)?;
        Ok(keys.into_iter().next())
    }

    /// All keys of a project with their values, in key id order. This is the
    /// stable enumeration order the missing-translation selector relies on.
    pub fn list_keys(&self, project_id: &str) -> Result<Vec<KeyWithValues>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = stmt_ordered(&conn, &format!("{} WHERE k.project_id = ?1", Self::KEY_JOIN_SQL))?;
        let rows = stmt.query_map(params![project_id], Self::joined_row)?;
        Self::fold_joined_rows(rows)
    }

    /// Bulk-fetch the keys whose `string_name` is in `names`, with their
    /// values, as a lookup map. One query regardless of import size.
    pub fn keys_by_names(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<HashMap<String, KeyWithValues>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "{} WHERE k.project_id = ? AND k.string_name IN ({})",
            Self::KEY_JOIN_SQL,
            placeholders
        );
        let mut stmt = stmt_ordered(&conn, &sql)?;

        let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(names.len() + 1);
        bound.push(&project_id);
        for name in names {
            bound.push(name);
        }

        let rows = stmt.query_map(params_from_iter(bound), Self::joined_row)?;
        let keys = Self::fold_joined_rows(rows)?;

        Ok(keys
            .into_iter()
            .map(|k| (k.key.string_name.clone(), k))
            .collect())
    }

    // ---- Import & translation writes ----

    /// Commit a staged import plan as a single transaction. Any failure
    /// rolls back the whole plan; no partial import is ever visible.
    pub fn apply_import(&self, project_id: &str, ops: &[ImportOp], actor: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for op in ops {
            match op {
                ImportOp::CreateKey {
                    string_name,
                    language_code,
                    content,
                } => {
                    tx.execute(
                        "INSERT INTO translation_keys
                            (project_id, string_name, last_modified_by,
                             created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![project_id, string_name, actor, now],
                    )
                    .context("Failed to insert imported key")?;
                    let key_id = tx.last_insert_rowid();
                    Self::upsert_value_in_tx(&tx, key_id, language_code, content, actor, &now)?;
                }
                ImportOp::CreateValue {
                    key_id,
                    language_code,
                    content,
                } => {
                    Self::upsert_value_in_tx(&tx, *key_id, language_code, content, actor, &now)?;
                }
                ImportOp::UpdateValue {
                    value_id,
                    key_id,
                    content,
                    remarks,
                } => {
                    tx.execute(
                        "UPDATE translation_values
                         SET content = ?1, last_modified_by = ?2, updated_at = ?3
                         WHERE id = ?4",
                        params![content, actor, now, value_id],
                    )
                    .context("Failed to overwrite imported value")?;
                    tx.execute(
                        "UPDATE translation_keys
                         SET remarks = ?1, last_modified_by = ?2, updated_at = ?3
                         WHERE id = ?4",
                        params![remarks, actor, now, key_id],
                    )
                    .context("Failed to append import remark")?;
                }
            }
        }

        tx.commit().context("Failed to commit import transaction")
    }

    /// Upsert a batch of translated cells in one transaction, keyed on the
    /// `(translation_key_id, language_code)` uniqueness constraint. Returns
    /// the number of cells written.
    pub fn upsert_values(&self, entries: &[ValueUpsert], actor: &str) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for entry in entries {
            Self::upsert_value_in_tx(
                &tx,
                entry.key_id,
                &entry.language_code,
                &entry.content,
                actor,
                &now,
            )?;
        }

        tx.commit()
            .context("Failed to commit translation value batch")?;
        Ok(entries.len())
    }

    fn upsert_value_in_tx(
        tx: &rusqlite::Transaction<'_>,
        key_id: i64,
        language_code: &str,
        content: &str,
        actor: &str,
        now: &str,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO translation_values
                (translation_key_id, language_code, content,
                 last_modified_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (translation_key_id, language_code) DO UPDATE SET
                content = excluded.content,
                last_modified_by = excluded.last_modified_by,
                updated_at = excluded.updated_at",
            params![key_id, language_code, content, actor, now],
        )
        .context("Failed to upsert translation value")?;
        Ok(())
    }

    // ---- Row plumbing ----

    const KEY_JOIN_SQL: &'static str = "SELECT k.id, k.project_id, k.string_name, k.remarks,
                k.last_modified_by, k.created_at, k.updated_at,
                v.id, v.translation_key_id, v.language_code, v.content,
                v.last_modified_by, v.created_at, v.updated_at
         FROM translation_keys k
         LEFT JOIN translation_values v ON v.translation_key_id = k.id";

    #[allow(clippy::type_complexity)]
    fn joined_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(TranslationKey, Option<TranslationValue>)> {
        let key = TranslationKey {
            id: row.get(0)?,
            project_id: row.get(1)?,
            string_name: row.get(2)?,
            remarks: row.get(3)?,
            last_modified_by: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        };
        let value_id: Option<i64> = row.get(7)?;
        let value = match value_id {
            Some(id) => Some(TranslationValue {
                id,
                translation_key_id: row.get(8)?,
                language_code: row.get(9)?,
                content: row.get(10)?,
                last_modified_by: row.get(11)?,
                created_at: row.get(12)?,
                updated_at: row.get(13)?,
            }),
            None => None,
        };
        Ok((key, value))
    }

    fn fold_joined_rows<I>(rows: I) -> Result<Vec<KeyWithValues>>
    where
        I: Iterator<Item = rusqlite::Result<(TranslationKey, Option<TranslationValue>)>>,
    {
        let mut keys: Vec<KeyWithValues> = Vec::new();
        let mut index: HashMap<i64, usize> = HashMap::new();

        for row in rows {
            let (key, value) = row.context("Failed to read key row")?;
            let slot = *index.entry(key.id).or_insert_with(|| {
                keys.push(KeyWithValues {
                    key,
                    values: Vec::new(),
                });
                keys.len() - 1
            });
            if let Some(value) = value {
                keys[slot].values.push(value);
            }
        }

        Ok(keys)
    }
}

/// Prepare a joined key query ordered by key id then value id, so results
/// enumerate in stable store order.
fn stmt_ordered<'c>(conn: &'c Connection, sql: &str) -> Result<rusqlite::Statement<'c>> {
    let ordered = format!("{} ORDER BY k.id, v.id", sql);
    conn.prepare(&ordered).context("Failed to prepare key query")
}
