// src/extract/prompt.rs
//! Prompt builders for stage-1 fact extraction.
//!
//! The system prompt is a fixed extraction contract: it enumerates every
//! valid fact type grouped by category, forbids inventing new ones, and
//! carries worked examples disambiguating the categories models most often
//! confuse (offer vs. info, confirmation vs. negotiation, rider examples).

use crate::fact::{ExtractedFact, FactType, Section};

/// Category → types listing, generated from the closed enum so the prompt
/// can never drift from the type system.
fn fact_type_listing() -> String {
    let mut out = String::new();
    for section in [
        Section::General,
        Section::Deal,
        Section::Hotels,
        Section::Flights,
        Section::Food,
        Section::Activities,
        Section::Contacts,
        Section::Technical,
    ] {
        let types: Vec<&str> = FactType::ALL
            .iter()
            .filter(|ft| **ft != FactType::Other && ft.section() == section)
            .map(|ft| ft.as_str())
            .collect();
        out.push_str(&format!("- {}: {}\n", section.as_str(), types.join(", ")));
    }
    out.push_str("- fallback: other\n");
    out
}

pub fn build_system_prompt() -> String {
    format!(
        r#"You are a booking-document fact extractor for live-show advancing.

Read the supplied text chunk and emit every atomic claim it contains as a JSON object:
{{"facts": [{{
  "fact_type": "<one of the valid types below>",
  "fact_domain": "<grouping key for one entity instance, e.g. flight_leg_1, hotel_main; null for scalar facts>",
  "value_text": "...", "value_number": 0, "value_boolean": false,
  "value_date": "YYYY-MM-DD", "value_time": "HH:MM", "value_datetime": "...",
  "currency": "USD", "unit": "...",
  "direction": "we_pay|they_pay|included|external_cost|split|unknown",
  "status": "offer|counter_offer|accepted|rejected|withdrawn|info|question|final|unknown",
  "speaker_role": "artist|artist_agent|promoter|venue|production|unknown",
  "source_scope": "contract_main|itinerary|confirmation|rider_example|general_info|unknown",
  "confidence": 0.0,
  "raw_snippet": "<verbatim evidence from the chunk>",
  "extraction_reason": "<one sentence>"
}}]}}

Rules:
- Populate EXACTLY ONE value_* field per fact.
- fact_type MUST be one of the valid types. Never invent a type; use "other" when nothing fits.
- Emit one fact per atomic claim. "Fee $5000 plus hotel" is two facts.
- status models negotiation state: an amount someone proposes is "offer"; a reply
  proposing a different amount is "counter_offer"; wording like "agreed",
  "confirmed", "we accept" makes it "accepted"; a signed contract value or a
  ticketed booking detail is "final"; plain schedule/logistics statements are "info".
- raw_snippet is verbatim text from the chunk, max ~200 characters.

Valid fact types by category:
{listing}
Worked examples:
- "Artist fee: $5000 USD, accepted." -> fact_type=deal_fee, value_number=5000,
  currency=USD, status=accepted.
- "We could do 4000." in an email reply -> deal_fee, status=counter_offer.
- "Flight TK67, seat 12A" on an e-ticket -> flight_number value_text=TK67 with
  status=final, and flight_seat value_text=12A with status=final, same fact_domain.
- "Doors 19:00, set 21:00" in an itinerary -> general_doors_time 19:00 and
  general_set_time 21:00, both status=info.
- A rider saying "Promoter provides 24 bottles of water" is rider_example scope:
  it is a template demand, not a negotiated fact of this show.
- A venue capacity mentioned in passing is "other" (no capacity type exists);
  do NOT shoehorn it into technical_stage."#,
        listing = fact_type_listing()
    )
}

/// User prompt: the chunk itself plus provenance and rolling context.
pub fn build_user_prompt(
    file_name: &str,
    chunk_index: usize,
    chunk_text: &str,
    section_focus: Option<Section>,
    prior_facts: &[ExtractedFact],
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Document: {file_name} (chunk {chunk_index})\n"
    ));
    if let Some(section) = section_focus {
        out.push_str(&format!(
            "Current pass focuses on the `{}` section; extract everything you see, but be exhaustive for that category.\n",
            section.as_str()
        ));
    }
    if !prior_facts.is_empty() {
        out.push_str("\nFacts already extracted from earlier chunks (for counter-offer detection; do not repeat them verbatim unless restated):\n");
        for f in prior_facts {
            out.push_str(&format!(
                "- {} = {} [status: {}]\n",
                f.fact_type.as_str(),
                f.value.to_display(),
                serde_json::to_value(f.status)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default()
            ));
        }
    }
    out.push_str("\n--- CHUNK TEXT ---\n");
    out.push_str(chunk_text);
    out
}
