use anyhow::Result;

use crate::db::{Database, Project};

/// One key that still needs a translation for some target language, paired
/// with the base-language text to translate from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingItem {
    pub key_id: i64,
    pub source_text: String,
}

/// Collect the keys of a project that lack a non-blank value in
/// `target_lang`.
///
/// Keys whose base-language value is absent or blank are skipped entirely:
/// there is nothing to translate from, regardless of the target state.
/// Output order follows the store's key enumeration order and is stable
/// within one invocation, which the orchestrator relies on to map translated
/// texts back by position.
pub fn find_missing(
    db: &Database,
    project: &Project,
    target_lang: &str,
) -> Result<Vec<MissingItem>> {
    let keys = db.list_keys(&project.id)?;
    let mut items = Vec::new();

    for key in &keys {
        let base = key
            .value_for(&project.base_language)
            .and_then(|v| v.content.as_deref());
        let Some(source_text) = base.filter(|c| !c.trim().is_empty()) else {
            continue;
        };

        let translated = key
            .value_for(target_lang)
            .and_then(|v| v.content.as_deref())
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);

        if !translated {
            items.push(MissingItem {
                key_id: key.key.id,
                source_text: source_text.to_string(),
            });
        }
    }

    Ok(items)
}
