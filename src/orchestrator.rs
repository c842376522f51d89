// src/orchestrator.rs
//! # Orchestrator
//!
//! Drives one import job end to end: sections in a fixed order, chunks in
//! stable `(source, chunk_index)` order, extraction → post-processing →
//! resolution → application per section, per-section deduplication for the
//! multi-entity sections, and progress reporting through the job store.
//!
//! Stages run strictly sequentially within a job: later chunks depend on
//! rolling fact context from earlier ones, so there is no intra-job
//! parallelism in the extraction path.

use metrics::{counter, describe_counter, gauge};
use once_cell::sync::OnceCell;

use crate::chunker::build_chunks_for_section;
use crate::completion::CompletionClient;
use crate::config::PipelineConfig;
use crate::dedup;
use crate::enrich::enrich_import_data;
use crate::extract::{
    extract_facts_from_chunk, postprocess::post_process_extracted_facts, ChunkExtractRequest,
};
use crate::fact::{ImportFact, Section, Source};
use crate::flights::{enrich_flights, reconstruct_flights, FlightDataApi};
use crate::import_data::{
    apply_resolutions_to_import_data, merge_confidence_maps, merge_import_data, stable_entity_id,
    ConfidenceMap, ImportData, ImportedDocument,
};
use crate::jobs::{ImportJobRecord, ImportProgress, JobStore};
use crate::resolve::{resolve_import_facts, ResolveRequest};

/// One-time metrics registration (so series show up on the host's exporter).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "import_chunks_total",
            "Chunks submitted to fact extraction."
        );
        describe_counter!(
            "import_facts_extracted_total",
            "Facts accepted at the stage-1 parse boundary."
        );
        describe_counter!(
            "import_facts_dropped_total",
            "Raw facts dropped for violating the one-value-slot invariant."
        );
        describe_counter!(
            "import_resolver_fallback_total",
            "Groups resolved by the rule-based fallback instead of the LLM."
        );
        describe_counter!(
            "import_dedup_removed_total",
            "Entities removed by per-section deduplication."
        );
        describe_counter!(
            "import_jobs_failed_total",
            "Import jobs that reached the failed status."
        );
    });
}

/// Normalize raw source text before chunking: booking documents arrive as
/// email HTML often enough that the chunker must not see markup. Line
/// structure is preserved for downstream pattern matching.
pub fn normalize_source_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let stripped = re_tags.replace_all(&decoded, " ").to_string();

    let unquoted = stripped
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_SPACES: OnceCell<regex::Regex> = OnceCell::new();
    let re_spaces = RE_SPACES.get_or_init(|| regex::Regex::new(r"[ \t\u{A0}]+").unwrap());
    unquoted
        .lines()
        .map(|line| re_spaces.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Filename/MIME → document category for the mechanical `documents` section.
pub fn categorize_document(file_name: &str, mime_type: Option<&str>) -> &'static str {
    let name = file_name.to_lowercase();
    if name.contains("contract") || name.contains("agreement") {
        "contract"
    } else if name.contains("rider") {
        "rider"
    } else if name.contains("visa") || name.contains("passport") {
        "visa"
    } else if name.contains("boarding") || name.contains("ticket") {
        "boarding_pass"
    } else if name.contains("itinerary") || name.contains("schedule") {
        "itinerary"
    } else if mime_type.map(|m| m.contains("pdf")).unwrap_or(false)
        && (name.contains("offer") || name.contains("deal"))
    {
        "contract"
    } else {
        "other"
    }
}

fn build_documents(sources: &[Source]) -> Vec<ImportedDocument> {
    sources
        .iter()
        .map(|s| ImportedDocument {
            id: stable_entity_id(Section::Documents, &s.id),
            file_name: s.file_name.clone(),
            category: categorize_document(&s.file_name, s.mime_type.as_deref()).to_string(),
            mime_type: s.mime_type.clone().unwrap_or_default(),
        })
        .collect()
}

async fn report_progress(store: &dyn JobStore, job_id: uuid::Uuid, progress: ImportProgress) {
    // Fire-and-forget: losing a progress write never fails the job.
    if let Err(e) = store.update_progress(job_id, progress).await {
        tracing::debug!(job_id = %job_id, error = ?e, "progress write failed");
    }
}

/// Run one import job. Returns the finished record and its confidence map.
///
/// Errors escaping this function are job-fatal and handled at the worker's
/// per-job boundary; every recoverable condition inside the stages has
/// already degraded to warnings.
pub async fn run_import(
    client: &dyn CompletionClient,
    flight_api: &dyn FlightDataApi,
    store: &dyn JobStore,
    job: &ImportJobRecord,
    cfg: &PipelineConfig,
) -> anyhow::Result<(ImportData, ConfidenceMap)> {
    ensure_metrics_described();

    let sources: Vec<Source> = job
        .sources
        .iter()
        .map(|s| Source {
            id: s.id.clone(),
            file_name: s.file_name.clone(),
            mime_type: s.mime_type.clone(),
            text: normalize_source_text(&s.text),
        })
        .collect();

    let mut result = ImportData::default();
    let mut confidence = ConfidenceMap::new();
    let total_sections = Section::ORDER.len();

    for (section_number, section) in Section::ORDER.into_iter().enumerate() {
        report_progress(
            store,
            job.id,
            ImportProgress {
                current_section: section.as_str().to_string(),
                current_source: None,
                current_chunk: None,
                total_chunks: None,
                sections_completed: section_number,
                total_sections,
            },
        )
        .await;

        if section == Section::Documents {
            let mut partial = ImportData::default();
            partial.documents = build_documents(&sources);
            merge_import_data(&mut result, &partial);
            continue;
        }

        let chunks = build_chunks_for_section(section, &sources, cfg.chunk_max_words, cfg.chunk_min_words);
        let total_chunks = chunks.len();

        // Extraction, chunk by chunk in stable order, with a per-source
        // rolling context window.
        let mut section_facts = Vec::new();
        let mut current_source_id = String::new();
        let mut source_window_start = 0usize;
        let mut message_index = 0usize;
        for (chunk_number, chunk) in chunks.iter().enumerate() {
            if chunk.source_id != current_source_id {
                if !current_source_id.is_empty() {
                    message_index += 1;
                }
                current_source_id = chunk.source_id.clone();
                source_window_start = section_facts.len();
            }
            report_progress(
                store,
                job.id,
                ImportProgress {
                    current_section: section.as_str().to_string(),
                    current_source: Some(chunk.source_file_name.clone()),
                    current_chunk: Some(chunk_number),
                    total_chunks: Some(total_chunks),
                    sections_completed: section_number,
                    total_sections,
                },
            )
            .await;

            let window_start = section_facts
                .len()
                .saturating_sub(cfg.rolling_context_facts)
                .max(source_window_start);
            let extraction = extract_facts_from_chunk(
                client,
                ChunkExtractRequest {
                    chunk,
                    message_index,
                    section_focus: Some(section),
                    prior_facts: &section_facts[window_start..],
                },
            )
            .await;
            for warning in &extraction.warnings {
                tracing::warn!(job_id = %job.id, section = section.as_str(), warning = %warning, "extraction warning");
            }
            section_facts.extend(extraction.facts);
        }

        let section_facts = post_process_extracted_facts(section_facts);
        let mut import_facts: Vec<ImportFact> = section_facts
            .into_iter()
            .map(|f| ImportFact::from_extracted(job.id, f))
            .collect();

        let outcome = resolve_import_facts(
            client,
            ResolveRequest {
                job_id: job.id,
                facts: import_facts.clone(),
            },
        )
        .await;
        for fact in import_facts.iter_mut() {
            if outcome.selected_fact_ids.contains(&fact.id) {
                fact.is_selected = true;
                fact.updated_at = chrono::Utc::now();
            }
        }

        // Only this section's resolutions feed this pass; other sections get
        // their own pass over the same sources.
        let section_resolutions: Vec<_> = outcome
            .resolutions
            .into_iter()
            .filter(|r| r.fact_type.section() == section)
            .collect();

        let mut partial = ImportData::default();
        let partial_confidence = if section == Section::Flights {
            let (flights, flight_confidence) =
                reconstruct_flights(&section_resolutions, &import_facts);
            partial.flights = flights;
            flight_confidence
        } else {
            let (applied, applied_confidence) =
                apply_resolutions_to_import_data(&section_resolutions, &import_facts);
            partial = applied;
            applied_confidence
        };

        // Partial confidence paths are section-local; reindex array paths by
        // the running result's current length before merging.
        let offset = match section {
            Section::Hotels => result.hotels.len(),
            Section::Flights => result.flights.len(),
            Section::Food => result.food.len(),
            Section::Activities => result.activities.len(),
            Section::Contacts => result.contacts.len(),
            _ => 0,
        };
        let shifted = shift_section_indices(partial_confidence, section, offset);

        merge_import_data(&mut result, &partial);
        merge_confidence_maps(&mut confidence, shifted);

        match section {
            Section::Hotels => dedup::dedup_hotels(&mut result, &mut confidence),
            Section::Flights => dedup::dedup_flights(&mut result, &mut confidence),
            Section::Contacts => dedup::dedup_contacts(&mut result, &mut confidence),
            _ => {}
        }
    }

    enrich_import_data(&mut result);
    enrich_flights(&mut result.flights, flight_api).await;

    report_progress(
        store,
        job.id,
        ImportProgress {
            current_section: "done".to_string(),
            current_source: None,
            current_chunk: None,
            total_chunks: None,
            sections_completed: total_sections,
            total_sections,
        },
    )
    .await;

    gauge!("import_last_job_ts").set(chrono::Utc::now().timestamp() as f64);
    counter!("import_jobs_completed_total").increment(1);
    Ok((result, confidence))
}

/// Shift `section[i].field` paths by `offset` so they address the running
/// result instead of the section-local partial.
fn shift_section_indices(
    map: ConfidenceMap,
    section: Section,
    offset: usize,
) -> ConfidenceMap {
    if offset == 0 {
        return map;
    }
    map.into_iter()
        .map(|(key, entry)| {
            match crate::import_data::FieldPath::parse(&key) {
                Some(path) if path.section == section && path.index.is_some() => {
                    let shifted = crate::import_data::FieldPath::indexed(
                        section,
                        path.index.unwrap() + offset,
                        &path.field,
                    );
                    (shifted.render(), entry)
                }
                _ => (key, entry),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_text_normalization() {
        let raw = "<b>Artist&nbsp;fee:</b> \u{201C}$5000\u{201D}\n\n  Seat:   12A  ";
        let out = normalize_source_text(raw);
        assert_eq!(out, "Artist fee: \"$5000\"\nSeat: 12A");
    }

    #[test]
    fn document_categorization() {
        assert_eq!(categorize_document("booking_contract.pdf", None), "contract");
        assert_eq!(categorize_document("Tech_Rider.pdf", None), "rider");
        assert_eq!(categorize_document("passport_scan.jpg", None), "visa");
        assert_eq!(categorize_document("e-ticket.pdf", None), "boarding_pass");
        assert_eq!(categorize_document("tour_schedule.xlsx", None), "itinerary");
        assert_eq!(categorize_document("notes.txt", None), "other");
    }

    #[test]
    fn index_shift_only_touches_own_section() {
        let mut map = ConfidenceMap::new();
        map.insert(
            "hotels[0].name".to_string(),
            crate::import_data::ConfidenceEntry::Score(0.5),
        );
        map.insert(
            "deal.fee".to_string(),
            crate::import_data::ConfidenceEntry::Score(0.9),
        );
        let shifted = shift_section_indices(map, Section::Hotels, 2);
        assert!(shifted.contains_key("hotels[2].name"));
        assert!(shifted.contains_key("deal.fee"));
        assert!(!shifted.contains_key("hotels[0].name"));
    }
}
