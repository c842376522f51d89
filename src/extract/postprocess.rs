// src/extract/postprocess.rs
//! # Post-processing
//!
//! Deterministic pattern pass that upgrades facts the model filed under
//! `other` into specific types. No model calls: regex + lookup heuristics
//! over the fact's value text and raw snippet. Matchers run in a fixed order
//! (flight, general, hotel, contact) and the first hit wins.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::fact::{ExtractedFact, FactType, FactValue};

/// IATA codes the flight matcher recognizes as airport mentions. A bare code
/// on its own line carries routing information worth keeping as a note even
/// when we cannot tell departure from arrival.
static KNOWN_IATA: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "AMS", "ARN", "ATH", "BCN", "BER", "BRU", "BUD", "CDG", "CPH", "DUB",
        "DXB", "FCO", "FRA", "GVA", "HAM", "HEL", "HND", "IST", "JFK", "LAX",
        "LGW", "LHR", "LIS", "MAD", "MIA", "MUC", "MXP", "NRT", "ORD", "OSL",
        "OTP", "PRG", "RIX", "SFO", "SIN", "SYD", "TLL", "TXL", "VIE", "VNO",
        "WAW", "YYZ", "ZRH",
    ])
});

struct Upgrade {
    fact_type: FactType,
    new_value: Option<String>,
}

fn up(fact_type: FactType) -> Option<Upgrade> {
    Some(Upgrade {
        fact_type,
        new_value: None,
    })
}

fn snippet_has(fact: &ExtractedFact, re: &Regex) -> bool {
    re.is_match(&fact.provenance.raw_snippet)
}

// --- flight matchers (order matters, first match wins) ---

fn match_flight(fact: &ExtractedFact, text: &str) -> Option<Upgrade> {
    static RE_FLIGHT_NO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}\d{2,4}$").unwrap());
    static RE_TICKET_CTX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ticket").unwrap());
    static RE_LONG_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10,16}$").unwrap());
    static RE_BOOKING_CTX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)booking|pnr|reference|reservation|record\s*locator").unwrap());
    static RE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{5,8}$").unwrap());
    static RE_CLASS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^(economy|business|first|premium\s+economy)(\s*class)?$").unwrap());
    static RE_TITLE_NAME: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(?:Mr|Ms|Mrs|Dr)\.?\s+[A-Z][A-Za-z'-]+(?:\s+[A-Z][A-Za-z'-]+)*$").unwrap());
    static RE_DURATION: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^\d{1,2}\s*h(?:ours?)?\s*(?:\d{1,2}\s*m(?:in)?)?$").unwrap());
    static RE_TRAVEL_TIME_CTX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)total\s+travel\s+time").unwrap());
    static RE_SEAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}[A-K]$").unwrap());

    if RE_FLIGHT_NO.is_match(text) {
        return up(FactType::FlightNumber);
    }
    if RE_LONG_DIGITS.is_match(text) && snippet_has(fact, &RE_TICKET_CTX) {
        return up(FactType::FlightTicketNumber);
    }
    if RE_REF.is_match(text) && snippet_has(fact, &RE_BOOKING_CTX) {
        return up(FactType::FlightBookingReference);
    }
    if let Some(c) = RE_CLASS.captures(text) {
        // "business class" -> "Business"; "premium economy" -> "Premium Economy".
        let cleaned = c[1]
            .split_whitespace()
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        return Some(Upgrade {
            fact_type: FactType::FlightTravelClass,
            new_value: Some(cleaned),
        });
    }
    if RE_TITLE_NAME.is_match(text) {
        return up(FactType::FlightFullName);
    }
    if RE_DURATION.is_match(text) || snippet_has(fact, &RE_TRAVEL_TIME_CTX) {
        return up(FactType::FlightNotes);
    }
    if RE_SEAT.is_match(text) {
        return up(FactType::FlightSeat);
    }
    if KNOWN_IATA.contains(text) {
        return up(FactType::FlightNotes);
    }
    None
}

// --- general matchers ---

fn match_general(fact: &ExtractedFact, text: &str, known: &KnownValues) -> Option<Upgrade> {
    static RE_DATE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\d{1,2}[./-]\d{1,2}[./-]\d{4}$").unwrap());
    static RE_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}$").unwrap());
    static RE_SET_CTX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)set\s*time|show\s*start|on\s*stage|stage\s*time").unwrap());

    if RE_DATE.is_match(text) && !known.dates.contains(text) {
        return up(FactType::GeneralDate);
    }
    if RE_TIME.is_match(text) && snippet_has(fact, &RE_SET_CTX) && !known.set_times.contains(text) {
        return up(FactType::GeneralSetTime);
    }
    None
}

// --- hotel matchers ---

fn match_hotel(fact: &ExtractedFact, text: &str) -> Option<Upgrade> {
    static RE_HOTEL_CTX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)hotel|room").unwrap());
    static RE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{6,10}$").unwrap());

    if RE_REF.is_match(text) && snippet_has(fact, &RE_HOTEL_CTX) {
        return up(FactType::HotelBookingReference);
    }
    None
}

// --- contact matchers ---

fn match_contact(fact: &ExtractedFact, text: &str) -> Option<Upgrade> {
    static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
    });
    static RE_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[\d\s()/-]{7,20}$").unwrap());
    static RE_PHONE_CTX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)phone|call|tel|mobile|cell|whatsapp").unwrap());

    if RE_EMAIL.is_match(text) {
        return up(FactType::ContactEmail);
    }
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    if digits >= 7 && RE_PHONE.is_match(text) && snippet_has(fact, &RE_PHONE_CTX) {
        return up(FactType::ContactPhone);
    }
    None
}

/// Values already claimed by specific fact types, so the general matchers do
/// not duplicate a date/time the model extracted properly elsewhere.
struct KnownValues {
    dates: HashSet<String>,
    set_times: HashSet<String>,
}

impl KnownValues {
    fn collect(facts: &[ExtractedFact]) -> Self {
        let mut dates = HashSet::new();
        let mut set_times = HashSet::new();
        for f in facts {
            match f.fact_type {
                FactType::GeneralDate => {
                    dates.insert(f.value.to_display());
                }
                FactType::GeneralSetTime => {
                    set_times.insert(f.value.to_display());
                }
                _ => {}
            }
        }
        Self { dates, set_times }
    }
}

/// Upgrade `other` facts in place. Pure: no model calls, deterministic.
pub fn post_process_extracted_facts(mut facts: Vec<ExtractedFact>) -> Vec<ExtractedFact> {
    let known = KnownValues::collect(&facts);
    let mut upgraded = 0usize;
    let mut skipped = 0usize;

    for fact in facts.iter_mut() {
        if fact.fact_type != FactType::Other {
            continue;
        }
        let Some(text) = fact.value.as_text().map(str::trim).map(String::from) else {
            continue;
        };

        let hit = match_flight(fact, &text)
            .or_else(|| match_general(fact, &text, &known))
            .or_else(|| match_hotel(fact, &text))
            .or_else(|| match_contact(fact, &text));

        match hit {
            Some(upgrade) => {
                tracing::debug!(
                    from = "other",
                    to = upgrade.fact_type.as_str(),
                    value = %text,
                    "post-processor upgraded fact"
                );
                fact.fact_type = upgrade.fact_type;
                if let Some(v) = upgrade.new_value {
                    fact.value = FactValue::Text(v);
                }
                upgraded += 1;
            }
            None => {
                tracing::debug!(value = %text, "post-processor skipped `other` fact");
                skipped += 1;
            }
        }
    }

    if upgraded > 0 || skipped > 0 {
        tracing::debug!(upgraded, skipped, "post-processing pass complete");
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactValue;

    fn other(text: &str, snippet: &str) -> ExtractedFact {
        let mut f = ExtractedFact::new(FactType::Other, FactValue::Text(text.to_string()));
        f.provenance.raw_snippet = snippet.to_string();
        f
    }

    fn run_one(fact: ExtractedFact) -> ExtractedFact {
        post_process_extracted_facts(vec![fact]).pop().unwrap()
    }

    #[test]
    fn flight_number_shape() {
        assert_eq!(run_one(other("TK67", "")).fact_type, FactType::FlightNumber);
        assert_eq!(run_one(other("LH1302", "")).fact_type, FactType::FlightNumber);
    }

    #[test]
    fn ticket_number_needs_context() {
        let with_ctx = run_one(other("2357364828437", "E-Ticket number 2357364828437"));
        assert_eq!(with_ctx.fact_type, FactType::FlightTicketNumber);
        let without = run_one(other("2357364828437", "ref 2357364828437"));
        assert_eq!(without.fact_type, FactType::Other);
    }

    #[test]
    fn booking_reference_needs_context() {
        let hit = run_one(other("V7Q2XR", "Booking reference: V7Q2XR"));
        assert_eq!(hit.fact_type, FactType::FlightBookingReference);
    }

    #[test]
    fn travel_class_normalized() {
        let f = run_one(other("business class", "Class: business class"));
        assert_eq!(f.fact_type, FactType::FlightTravelClass);
        assert_eq!(f.value, FactValue::Text("Business".to_string()));

        let f = run_one(other("Premium Economy", ""));
        assert_eq!(f.value, FactValue::Text("Premium Economy".to_string()));
    }

    #[test]
    fn titled_name_and_seat() {
        assert_eq!(
            run_one(other("Mr. John Smith", "")).fact_type,
            FactType::FlightFullName
        );
        assert_eq!(run_one(other("12A", "")).fact_type, FactType::FlightSeat);
    }

    #[test]
    fn seat_loses_to_flight_number_shape() {
        // "12A" is a seat; "AB12" is a flight number. Order of matchers decides.
        assert_eq!(run_one(other("AB12", "")).fact_type, FactType::FlightNumber);
    }

    #[test]
    fn duration_and_iata_become_notes() {
        assert_eq!(run_one(other("11h 25m", "")).fact_type, FactType::FlightNotes);
        assert_eq!(
            run_one(other("4h", "total travel time 4h")).fact_type,
            FactType::FlightNotes
        );
        assert_eq!(run_one(other("IST", "")).fact_type, FactType::FlightNotes);
        assert_eq!(run_one(other("XQZ", "")).fact_type, FactType::Other);
    }

    #[test]
    fn email_and_phone() {
        assert_eq!(
            run_one(other("tm@example.com", "")).fact_type,
            FactType::ContactEmail
        );
        assert_eq!(
            run_one(other("+49 171 2345678", "call me: +49 171 2345678")).fact_type,
            FactType::ContactPhone
        );
        // No phone context, no upgrade.
        assert_eq!(
            run_one(other("+49 171 2345678", "invoice 2345678")).fact_type,
            FactType::Other
        );
    }

    #[test]
    fn hotel_reference_needs_context() {
        assert_eq!(
            run_one(other("HX83KD21", "Hotel confirmation HX83KD21")).fact_type,
            FactType::HotelBookingReference
        );
    }

    #[test]
    fn date_not_duplicated_when_already_extracted() {
        let existing = ExtractedFact::new(
            FactType::GeneralDate,
            FactValue::Date("15.06.2025".to_string()),
        );
        let candidate = other("15.06.2025", "Show on 15.06.2025");
        let out = post_process_extracted_facts(vec![existing, candidate]);
        assert_eq!(out[1].fact_type, FactType::Other);

        let fresh = other("16.06.2025", "Travel day 16.06.2025");
        let out = post_process_extracted_facts(vec![fresh]);
        assert_eq!(out[0].fact_type, FactType::GeneralDate);
    }

    #[test]
    fn set_time_needs_context_and_novelty() {
        let f = run_one(other("21:00", "Set time 21:00"));
        assert_eq!(f.fact_type, FactType::GeneralSetTime);
        let f = run_one(other("21:00", "dinner at 21:00"));
        assert_eq!(f.fact_type, FactType::Other);
    }
}
