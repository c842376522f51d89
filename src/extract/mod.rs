// src/extract/mod.rs
//! # Stage 1: fact extraction
//!
//! Per chunk: build prompts, call the completion interface, parse the
//! loosely-typed JSON the model returns, and repair it into the strict
//! `ExtractedFact` shape. Every failure mode short of a bug is recovered
//! locally. A chunk can yield zero facts plus warnings, never an error.

pub mod fallback;
pub mod postprocess;
pub mod prompt;

use metrics::counter;
use serde::Deserialize;

use crate::completion::CompletionClient;
use crate::config::PipelineConfig;
use crate::fact::{
    clamp01, Chunk, ExtractedFact, FactStatus, FactValue, Provenance, Section, Source, SourceScope,
};
use crate::normalize;

/// Result of extracting one chunk (or one source).
#[derive(Debug, Clone, Default)]
pub struct ChunkExtraction {
    pub facts: Vec<ExtractedFact>,
    pub warnings: Vec<String>,
}

/// One chunk-extraction request.
pub struct ChunkExtractRequest<'a> {
    pub chunk: &'a Chunk,
    /// Index of the owning source within the job (chronological replay key).
    pub message_index: usize,
    pub section_focus: Option<Section>,
    /// Rolling context from earlier chunks, newest last.
    pub prior_facts: &'a [ExtractedFact],
}

/// Loose wire shape of one model-emitted fact. Everything optional; repair
/// happens in `parse_raw_fact`.
#[derive(Debug, Deserialize)]
struct RawFact {
    fact_type: Option<String>,
    fact_domain: Option<String>,
    value_text: Option<serde_json::Value>,
    value_number: Option<serde_json::Value>,
    value_boolean: Option<serde_json::Value>,
    value_date: Option<serde_json::Value>,
    value_time: Option<serde_json::Value>,
    value_datetime: Option<serde_json::Value>,
    currency: Option<String>,
    unit: Option<String>,
    direction: Option<String>,
    status: Option<String>,
    speaker_role: Option<String>,
    source_scope: Option<String>,
    confidence: Option<f64>,
    raw_snippet: Option<String>,
    extraction_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFactList {
    #[serde(default)]
    facts: Vec<RawFact>,
}

fn coerce_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        // Models sometimes emit "$5,000" as a number slot.
        serde_json::Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

fn coerce_bool(v: &serde_json::Value) -> Option<bool> {
    match v {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Repair one raw fact into the strict shape. Returns None (with a warning
/// pushed) when the exactly-one-value invariant cannot be met.
fn parse_raw_fact(
    raw: RawFact,
    chunk: &Chunk,
    message_index: usize,
    warnings: &mut Vec<String>,
) -> Option<ExtractedFact> {
    let mut slots: Vec<FactValue> = Vec::new();
    if let Some(s) = raw.value_text.as_ref().and_then(coerce_text) {
        slots.push(FactValue::Text(s));
    }
    if let Some(n) = raw.value_number.as_ref().and_then(coerce_number) {
        slots.push(FactValue::Number(n));
    }
    if let Some(b) = raw.value_boolean.as_ref().and_then(coerce_bool) {
        slots.push(FactValue::Boolean(b));
    }
    if let Some(s) = raw.value_date.as_ref().and_then(coerce_text) {
        slots.push(FactValue::Date(s));
    }
    if let Some(s) = raw.value_time.as_ref().and_then(coerce_text) {
        slots.push(FactValue::Time(s));
    }
    if let Some(s) = raw.value_datetime.as_ref().and_then(coerce_text) {
        slots.push(FactValue::DateTime(s));
    }

    if slots.len() != 1 {
        counter!("import_facts_dropped_total").increment(1);
        warnings.push(format!(
            "dropped fact with {} value slots (type: {})",
            slots.len(),
            raw.fact_type.as_deref().unwrap_or("?")
        ));
        return None;
    }
    let value = slots.pop().unwrap();

    let fact_type = raw
        .fact_type
        .as_deref()
        .map(normalize::normalize_fact_type)
        .unwrap_or(crate::fact::FactType::Other);

    let mut source_scope = raw
        .source_scope
        .as_deref()
        .map(normalize::normalize_source_scope)
        .unwrap_or(SourceScope::Unknown);
    if source_scope == SourceScope::Unknown {
        source_scope = normalize::scope_from_file_name(&chunk.source_file_name);
    }

    let mut fact = ExtractedFact {
        fact_type,
        fact_domain: raw
            .fact_domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        value,
        currency: raw.currency.map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()),
        unit: raw.unit.filter(|u| !u.trim().is_empty()),
        direction: raw
            .direction
            .as_deref()
            .map(normalize::normalize_direction)
            .unwrap_or_default(),
        status: raw
            .status
            .as_deref()
            .map(normalize::normalize_status)
            .unwrap_or_default(),
        speaker_role: raw
            .speaker_role
            .as_deref()
            .map(normalize::normalize_speaker_role)
            .unwrap_or_default(),
        source_scope,
        confidence: clamp01(raw.confidence.unwrap_or(0.5) as f32),
        extraction_reason: raw.extraction_reason.filter(|r| !r.trim().is_empty()),
        provenance: Provenance {
            message_index,
            chunk_index: chunk.chunk_index,
            source_id: chunk.source_id.clone(),
            source_file_name: chunk.source_file_name.clone(),
            raw_snippet: raw.raw_snippet.unwrap_or_default(),
        },
    };

    apply_confirmation_status_net(&mut fact);
    Some(fact)
}

/// Filename-based status upgrade safety net.
///
/// Models systematically classify confirmation documents (e-tickets, booking
/// confirmations) as negotiations-in-progress. When the filename says the
/// document IS a confirmation and the fact is a booking identity field, an
/// `offer`/`info`/`unknown` status is upgraded to `final` with an audit note.
pub fn apply_confirmation_status_net(fact: &mut ExtractedFact) {
    if !normalize::is_confirmation_file_name(&fact.provenance.source_file_name) {
        return;
    }
    if !fact.fact_type.is_confirmation_type() {
        return;
    }
    if !matches!(
        fact.status,
        FactStatus::Offer | FactStatus::Info | FactStatus::Unknown
    ) {
        return;
    }
    let prior = fact.status;
    fact.status = FactStatus::Final;
    let note = format!(
        "status upgraded {:?} -> final: confirmation-class filename '{}'",
        prior, fact.provenance.source_file_name
    );
    fact.extraction_reason = Some(match fact.extraction_reason.take() {
        Some(r) => format!("{r}; {note}"),
        None => note,
    });
}

/// Best-effort recovery: pull the first balanced `{...}` block out of a
/// response that has prose around (or after) the JSON.
pub(crate) fn recover_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_response(
    content: &str,
    chunk: &Chunk,
    message_index: usize,
    warnings: &mut Vec<String>,
) -> Vec<ExtractedFact> {
    let parsed: Option<RawFactList> = match serde_json::from_str(content) {
        Ok(list) => Some(list),
        Err(first_err) => match recover_json_block(content).and_then(|block| {
            serde_json::from_str::<RawFactList>(block).ok()
        }) {
            Some(list) => {
                warnings.push("recovered JSON block from malformed response".to_string());
                Some(list)
            }
            None => {
                warnings.push(format!("unparsable extraction response: {first_err}"));
                None
            }
        },
    };

    let Some(list) = parsed else {
        return Vec::new();
    };
    list.facts
        .into_iter()
        .filter_map(|raw| parse_raw_fact(raw, chunk, message_index, warnings))
        .collect()
}

/// Extract facts from one chunk. Never fails; transport and parse problems
/// degrade to zero facts plus warnings.
pub async fn extract_facts_from_chunk(
    client: &dyn CompletionClient,
    req: ChunkExtractRequest<'_>,
) -> ChunkExtraction {
    counter!("import_chunks_total").increment(1);
    let mut out = ChunkExtraction::default();

    if req.chunk.text.trim().is_empty() {
        return out;
    }

    // A disabled client is not a failure: the deterministic local extractor
    // keeps the demo/no-credentials path producing usable output.
    if client.provider_name() == "disabled" {
        out.facts = fallback::extract_with_patterns(req.chunk, req.message_index);
        out.warnings
            .push("completion disabled; used local pattern extractor".to_string());
        counter!("import_facts_extracted_total").increment(out.facts.len() as u64);
        return out;
    }

    let system = prompt::build_system_prompt();
    let user = prompt::build_user_prompt(
        &req.chunk.source_file_name,
        req.chunk.chunk_index,
        &req.chunk.text,
        req.section_focus,
        req.prior_facts,
    );

    let completion = client.complete(&system, &user).await;
    let Some(content) = completion.content else {
        let why = completion.error.unwrap_or_else(|| "no content".to_string());
        tracing::warn!(
            source = %req.chunk.source_file_name,
            chunk = req.chunk.chunk_index,
            error = %why,
            "extraction call failed; continuing with zero facts"
        );
        out.warnings.push(format!(
            "extraction failed for {} chunk {}: {why}",
            req.chunk.source_file_name, req.chunk.chunk_index
        ));
        return out;
    };

    out.facts = parse_response(&content, req.chunk, req.message_index, &mut out.warnings);
    counter!("import_facts_extracted_total").increment(out.facts.len() as u64);
    out
}

/// Extract facts from every chunk of one source, threading up to
/// `cfg.rolling_context_facts` trailing facts into each subsequent call so
/// counter-offers spanning chunk boundaries stay detectable.
pub async fn extract_facts_from_source(
    client: &dyn CompletionClient,
    source: &Source,
    message_index: usize,
    section_focus: Option<Section>,
    cfg: &PipelineConfig,
) -> ChunkExtraction {
    let chunks = crate::chunker::build_chunks_for_section(
        section_focus.unwrap_or(Section::General),
        std::slice::from_ref(source),
        cfg.chunk_max_words,
        cfg.chunk_min_words,
    );

    let mut all = ChunkExtraction::default();
    for chunk in &chunks {
        let window_start = all.facts.len().saturating_sub(cfg.rolling_context_facts);
        let extraction = extract_facts_from_chunk(
            client,
            ChunkExtractRequest {
                chunk,
                message_index,
                section_focus,
                prior_facts: &all.facts[window_start..],
            },
        )
        .await;
        all.facts.extend(extraction.facts);
        all.warnings.extend(extraction.warnings);
    }
    all
}
