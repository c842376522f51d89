// src/extract/fallback.rs
//! Deterministic local extractor used when the completion interface is
//! disabled. Recognizes only the highest-signal patterns (fee lines, flight
//! numbers, emails, dates, seats), so an unconfigured deployment still yields
//! a usable, if under-populated, import record. Facts emitted here carry
//! `speaker_role = unknown` and reduced confidence.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::fact::{
    Chunk, ExtractedFact, FactStatus, FactType, FactValue, Provenance,
};
use crate::normalize;

fn base_fact(
    fact_type: FactType,
    value: FactValue,
    chunk: &Chunk,
    message_index: usize,
    snippet: &str,
) -> ExtractedFact {
    let mut fact = ExtractedFact::new(fact_type, value);
    fact.status = FactStatus::Info;
    fact.confidence = 0.4;
    fact.source_scope = normalize::scope_from_file_name(&chunk.source_file_name);
    fact.extraction_reason = Some("local pattern extractor".to_string());
    fact.provenance = Provenance {
        message_index,
        chunk_index: chunk.chunk_index,
        source_id: chunk.source_id.clone(),
        source_file_name: chunk.source_file_name.clone(),
        raw_snippet: snippet.trim().chars().take(200).collect(),
    };
    fact
}

/// Line-level sweep with a handful of anchored patterns.
pub fn extract_with_patterns(chunk: &Chunk, message_index: usize) -> Vec<ExtractedFact> {
    static RE_FEE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\bfee\b[^\d$€£]{0,20}[$€£]?\s*([\d][\d,. ]*\d|\d)\s*(USD|EUR|GBP)?").unwrap()
    });
    static RE_ACCEPT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b(accepted|agreed|confirmed|approved)\b").unwrap());
    static RE_FLIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{2}\d{2,4})\b").unwrap());
    static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
    });
    static RE_DATE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\b(\d{1,2}[./-]\d{1,2}[./-]\d{4}|\d{4}-\d{2}-\d{2})\b").unwrap());
    static RE_SEAT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\bseat\s*:?\s*(\d{1,2}[A-K])\b").unwrap());

    let mut facts = Vec::new();
    for line in chunk.text.lines() {
        if let Some(c) = RE_FEE.captures(line) {
            let amount: String = c[1].chars().filter(|ch| ch.is_ascii_digit() || *ch == '.').collect();
            if let Ok(n) = amount.parse::<f64>() {
                let mut f = base_fact(FactType::DealFee, FactValue::Number(n), chunk, message_index, line);
                f.currency = c.get(2).map(|m| m.as_str().to_uppercase());
                if RE_ACCEPT.is_match(line) {
                    f.status = FactStatus::Accepted;
                    f.confidence = 0.6;
                } else {
                    f.status = FactStatus::Offer;
                }
                facts.push(f);
            }
        }
        for c in RE_FLIGHT.captures_iter(line) {
            facts.push(base_fact(
                FactType::FlightNumber,
                FactValue::Text(c[1].to_string()),
                chunk,
                message_index,
                line,
            ));
        }
        if let Some(c) = RE_SEAT.captures(line) {
            facts.push(base_fact(
                FactType::FlightSeat,
                FactValue::Text(c[1].to_uppercase()),
                chunk,
                message_index,
                line,
            ));
        }
        for c in RE_EMAIL.captures_iter(line) {
            facts.push(base_fact(
                FactType::ContactEmail,
                FactValue::Text(c[0].to_string()),
                chunk,
                message_index,
                line,
            ));
        }
        if let Some(c) = RE_DATE.captures(line) {
            facts.push(base_fact(
                FactType::GeneralDate,
                FactValue::Date(c[1].to_string()),
                chunk,
                message_index,
                line,
            ));
        }
    }

    // The confirmation-filename net applies to locally extracted facts too.
    for f in &mut facts {
        super::apply_confirmation_status_net(f);
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(file: &str, text: &str) -> Chunk {
        Chunk {
            source_id: "s1".to_string(),
            source_file_name: file.to_string(),
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn recognizes_accepted_fee_line() {
        let c = chunk("contract.pdf", "Artist fee: $5000 USD, accepted.");
        let facts = extract_with_patterns(&c, 0);
        let fee = facts
            .iter()
            .find(|f| f.fact_type == FactType::DealFee)
            .expect("fee fact");
        assert_eq!(fee.value, FactValue::Number(5000.0));
        assert_eq!(fee.currency.as_deref(), Some("USD"));
        assert_eq!(fee.status, FactStatus::Accepted);
    }

    #[test]
    fn recognizes_flight_seat_and_email() {
        let c = chunk(
            "Booking_Confirmation.pdf",
            "Flight TK67, Seat: 12A\nContact tm@example.com on 15.06.2025",
        );
        let facts = extract_with_patterns(&c, 0);
        let types: Vec<FactType> = facts.iter().map(|f| f.fact_type).collect();
        assert!(types.contains(&FactType::FlightNumber));
        assert!(types.contains(&FactType::FlightSeat));
        assert!(types.contains(&FactType::ContactEmail));
        assert!(types.contains(&FactType::GeneralDate));
        // Confirmation filename upgrades the booking identity facts.
        let flight = facts.iter().find(|f| f.fact_type == FactType::FlightNumber).unwrap();
        assert_eq!(flight.status, FactStatus::Final);
    }
}
