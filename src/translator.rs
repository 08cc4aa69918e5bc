use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::db::{Database, Project, ValueUpsert};
use crate::engine::TranslationEngine;
use crate::selector::{self, MissingItem};

/// Fill in missing translations for the given target languages.
///
/// Languages are processed sequentially to bound load on the translation
/// engine. Within one language the missing items are chunked; every chunk is
/// translated and persisted in its own transaction, so one failed chunk
/// never aborts the rest — its items simply stay missing and are picked up
/// again by the next invocation. The returned map holds, per language, the
/// number of values actually persisted (not merely attempted).
pub async fn translate_missing(
    db: &Database,
    engine: &TranslationEngine,
    project: &Project,
    target_languages: &[String],
    actor: &str,
    batch_size: usize,
) -> Result<BTreeMap<String, usize>> {
    anyhow::ensure!(
        !target_languages.is_empty(),
        "No target languages configured"
    );
    anyhow::ensure!(batch_size > 0, "Batch size must be at least 1");

    let mut results = BTreeMap::new();

    for lang in target_languages {
        let items = selector::find_missing(db, project, lang)?;
        if items.is_empty() {
            results.insert(lang.clone(), 0);
            continue;
        }

        info!(
            "Project {}: {} keys missing {} translations",
            project.id,
            items.len(),
            lang
        );

        let mut persisted = 0usize;
        for chunk in items.chunks(batch_size) {
            match translate_chunk(db, engine, chunk, lang, actor).await {
                Ok(written) => persisted += written,
                Err(e) => {
                    // The failed chunk's items remain missing and will be
                    // retried on the next invocation
                    warn!(
                        "Batch translation failed for {} (chunk of {} items): {:#}",
                        lang,
                        chunk.len(),
                        e
                    );
                }
            }
        }

        info!(
            "Project {}: persisted {}/{} {} translations",
            project.id,
            persisted,
            items.len(),
            lang
        );
        results.insert(lang.clone(), persisted);
    }

    Ok(results)
}

/// Translate one chunk and persist the non-blank results in a single
/// transaction. Returns the number of values written.
async fn translate_chunk(
    db: &Database,
    engine: &TranslationEngine,
    chunk: &[MissingItem],
    target_lang: &str,
    actor: &str,
) -> Result<usize> {
    let source_texts: Vec<String> = chunk.iter().map(|i| i.source_text.clone()).collect();
    let translated = engine.translate_batch(&source_texts, target_lang).await?;

    anyhow::ensure!(
        translated.len() == chunk.len(),
        "Translation engine returned {} texts for a chunk of {}",
        translated.len(),
        chunk.len()
    );

    // Blank results signal "no translation produced"; leave those cells
    // missing instead of persisting junk
    let entries: Vec<ValueUpsert> = chunk
        .iter()
        .zip(translated)
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(item, text)| ValueUpsert {
            key_id: item.key_id,
            language_code: target_lang.to_string(),
            content: text,
        })
        .collect();

    if entries.is_empty() {
        return Ok(0);
    }

    db.upsert_values(&entries, actor)
}
