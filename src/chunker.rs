// src/chunker.rs
//! # Chunker
//!
//! Splits raw source text into bounded word-count batches, per source,
//! deterministically. Later stages rely on stable `(source, chunk_index)`
//! ordering for reproducible merge outcomes, so there is no randomness and
//! no parallelism here.

use crate::fact::{Chunk, Section, Source};

/// Split `text` into batches of at most `max_words` words.
///
/// Batch `i` holds words `[i*max_words, (i+1)*max_words)`. If the final batch
/// ends up shorter than `min_words`, words are transferred from the
/// penultimate batch until the final batch reaches `min_words`, or, when the
/// combined penultimate+final batch fits within `max_words`, the two are
/// merged outright.
pub fn split_text_into_word_batches(text: &str, max_words: usize, min_words: usize) -> Vec<String> {
    if max_words == 0 {
        return Vec::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut batches: Vec<Vec<&str>> = words.chunks(max_words).map(|c| c.to_vec()).collect();

    if batches.len() >= 2 {
        let last_len = batches[batches.len() - 1].len();
        if last_len < min_words {
            let penult_len = batches[batches.len() - 2].len();
            if penult_len + last_len <= max_words {
                // Merge: the combined batch still fits the cap.
                let tail = batches.pop().unwrap();
                batches.last_mut().unwrap().extend(tail);
            } else {
                // Transfer words from the penultimate batch until the final
                // batch reaches min_words. The penultimate batch cannot go
                // below min_words itself (it started at max_words).
                let needed = (min_words - last_len).min(penult_len.saturating_sub(1));
                let n = batches.len();
                let moved: Vec<&str> = {
                    let penult = &mut batches[n - 2];
                    let keep = penult.len() - needed;
                    penult.split_off(keep)
                };
                let last = &mut batches[n - 1];
                for (i, w) in moved.into_iter().enumerate() {
                    last.insert(i, w);
                }
            }
        }
    }

    batches.iter().map(|b| b.join(" ")).collect()
}

/// Build the chunk list for one section across all sources.
///
/// Source order is preserved; chunk indices are zero-based per source with no
/// gaps. A source with no extractable batches still yields exactly one
/// (empty) chunk so every source stays traceable in provenance.
pub fn build_chunks_for_section(
    section: Section,
    sources: &[Source],
    max_words: usize,
    min_words: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for source in sources {
        let batches = split_text_into_word_batches(&source.text, max_words, min_words);
        if batches.is_empty() {
            chunks.push(Chunk {
                source_id: source.id.clone(),
                source_file_name: source.file_name.clone(),
                chunk_index: 0,
                text: String::new(),
            });
            continue;
        }
        for (chunk_index, text) in batches.into_iter().enumerate() {
            chunks.push(Chunk {
                source_id: source.id.clone(),
                source_file_name: source.file_name.clone(),
                chunk_index,
                text,
            });
        }
    }
    tracing::debug!(
        section = section.as_str(),
        sources = sources.len(),
        chunks = chunks.len(),
        "built section chunks"
    );
    chunks
}
