// src/enrich.rs
//! Deterministic post-fill of derived fields. Runs after application, before
//! the record is handed to the review UI: infers the deal type from what the
//! deal section already holds, normalizes payment-terms shorthand, and parses
//! a city out of the venue string when the city field is blank.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::import_data::ImportData;

/// Infer `deal.dealType` when the extractor produced none.
fn infer_deal_type(data: &ImportData) -> Option<String> {
    if !data.deal.deal_type.is_empty() {
        return None;
    }
    if data.deal.fee.is_empty() {
        return None;
    }
    if !data.deal.bonus.is_empty() {
        Some("guarantee_plus_bonus".to_string())
    } else if data.deal.fee.contains('%') {
        Some("percentage".to_string())
    } else {
        Some("guarantee".to_string())
    }
}

/// Expand common payment-terms shorthand into review-ready phrasing.
fn normalize_payment_terms(raw: &str) -> Option<String> {
    static RE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2})\s*/\s*(\d{1,2})$").unwrap());
    if let Some(c) = RE_SPLIT.captures(raw.trim()) {
        let (deposit, balance) = (&c[1], &c[2]);
        return Some(format!("{deposit}% deposit, {balance}% balance on show day"));
    }
    static RE_NET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^net\s*(\d{1,3})$").unwrap());
    if let Some(c) = RE_NET.captures(raw.trim()) {
        return Some(format!("invoice payable within {} days", &c[1]));
    }
    None
}

/// Pull a plausible city from "Venue Name, City" when the city is blank.
/// The candidate must be short and alphabetic; addresses with street numbers
/// or long tails are left alone.
fn city_from_venue(venue: &str) -> Option<String> {
    let candidate = venue.rsplit(',').next()?.trim();
    if candidate.is_empty() || candidate == venue.trim() {
        return None;
    }
    let words: Vec<&str> = candidate.split_whitespace().collect();
    if words.len() > 3 {
        return None;
    }
    if !words
        .iter()
        .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '-' || c == '.'))
    {
        return None;
    }
    Some(candidate.to_string())
}

/// Deterministic enrichment pass, pure over the record.
pub fn enrich_import_data(data: &mut ImportData) {
    if let Some(deal_type) = infer_deal_type(data) {
        tracing::debug!(deal_type = %deal_type, "inferred deal type");
        data.deal.deal_type = deal_type;
    }

    if let Some(terms) = normalize_payment_terms(&data.deal.payment_terms) {
        data.deal.payment_terms = terms;
    }

    if data.general.city.is_empty() {
        if let Some(city) = city_from_venue(&data.general.venue) {
            tracing::debug!(city = %city, "inferred city from venue");
            data.general.city = city;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_type_inference() {
        let mut data = ImportData::default();
        data.deal.fee = "5000".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.deal.deal_type, "guarantee");

        let mut data = ImportData::default();
        data.deal.fee = "5000".to_string();
        data.deal.bonus = "500 after 300 tickets".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.deal.deal_type, "guarantee_plus_bonus");

        // Existing value is never overwritten.
        let mut data = ImportData::default();
        data.deal.fee = "5000".to_string();
        data.deal.deal_type = "versus".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.deal.deal_type, "versus");
    }

    #[test]
    fn payment_terms_shorthand() {
        let mut data = ImportData::default();
        data.deal.payment_terms = "50/50".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.deal.payment_terms, "50% deposit, 50% balance on show day");

        let mut data = ImportData::default();
        data.deal.payment_terms = "Net 30".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.deal.payment_terms, "invoice payable within 30 days");

        let mut data = ImportData::default();
        data.deal.payment_terms = "wire on arrival".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.deal.payment_terms, "wire on arrival");
    }

    #[test]
    fn city_parsed_from_venue() {
        let mut data = ImportData::default();
        data.general.venue = "Huxleys Neue Welt, Berlin".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.general.city, "Berlin");

        // Street addresses are not cities.
        let mut data = ImportData::default();
        data.general.venue = "Somewhere, Hauptstr. 12".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.general.city, "");

        // Existing city wins.
        let mut data = ImportData::default();
        data.general.venue = "Huxleys Neue Welt, Berlin".to_string();
        data.general.city = "Hamburg".to_string();
        enrich_import_data(&mut data);
        assert_eq!(data.general.city, "Hamburg");
    }
}
