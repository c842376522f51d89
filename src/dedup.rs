// src/dedup.rs
//! # Per-section deduplication
//!
//! Hotels, flights and contacts are extracted independently from multiple
//! documents, so the same entity shows up more than once. Each section gets a
//! normalized composite key; the first occurrence per key survives. Index
//! remapping of the confidence map goes through the typed `FieldPath`
//! representation: entries for removed duplicates are dropped, surviving
//! entries are renumbered.

use metrics::counter;

use crate::fact::Section;
use crate::import_data::{ConfidenceMap, FieldPath, ImportData};

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Keep the first occurrence per key. Returns `old index → new index`
/// (`None` for removed items). A `None` key means "never deduplicate".
fn dedup_by_key<T, F>(items: &mut Vec<T>, key_fn: F) -> Vec<Option<usize>>
where
    F: Fn(&T, usize) -> Option<String>,
{
    let mut seen: Vec<String> = Vec::new();
    let mut index_map: Vec<Option<usize>> = Vec::with_capacity(items.len());
    let mut kept: Vec<T> = Vec::with_capacity(items.len());

    for (i, item) in items.drain(..).enumerate() {
        match key_fn(&item, i) {
            Some(key) if seen.contains(&key) => {
                index_map.push(None);
            }
            key => {
                if let Some(k) = key {
                    seen.push(k);
                }
                index_map.push(Some(kept.len()));
                kept.push(item);
            }
        }
    }
    *items = kept;
    index_map
}

/// Rewrite confidence paths of one section after dedup: removed indices drop
/// their entries, surviving indices are renumbered.
fn remap_confidence(confidence: &mut ConfidenceMap, section: Section, index_map: &[Option<usize>]) {
    let mut rewritten = ConfidenceMap::new();
    for (key, entry) in std::mem::take(confidence) {
        let Some(path) = FieldPath::parse(&key) else {
            rewritten.insert(key, entry);
            continue;
        };
        if path.section != section {
            rewritten.insert(key, entry);
            continue;
        }
        let Some(old_index) = path.index else {
            rewritten.insert(key, entry);
            continue;
        };
        match index_map.get(old_index).copied().flatten() {
            Some(new_index) => {
                rewritten.insert(
                    FieldPath::indexed(section, new_index, &path.field).render(),
                    entry,
                );
            }
            None => {} // removed duplicate: entry dropped
        }
    }
    *confidence = rewritten;
}

/// Hotels: `name|city|checkInDate`.
pub fn dedup_hotels(data: &mut ImportData, confidence: &mut ConfidenceMap) {
    let before = data.hotels.len();
    let index_map = dedup_by_key(&mut data.hotels, |h, _| {
        if h.name.is_empty() && h.city.is_empty() && h.check_in_date.is_empty() {
            return None;
        }
        Some(format!(
            "{}|{}|{}",
            norm(&h.name),
            norm(&h.city),
            norm(&h.check_in_date)
        ))
    });
    remap_confidence(confidence, Section::Hotels, &index_map);
    record_removed(Section::Hotels, before - data.hotels.len());
}

/// Flights: `flightNumber|departureTime|fromAirport`.
pub fn dedup_flights(data: &mut ImportData, confidence: &mut ConfidenceMap) {
    let before = data.flights.len();
    let index_map = dedup_by_key(&mut data.flights, |f, _| {
        if f.flight_number.is_empty() {
            return None;
        }
        Some(format!(
            "{}|{}|{}",
            norm(&f.flight_number),
            norm(&f.departure_time),
            norm(&f.from_airport)
        ))
    });
    remap_confidence(confidence, Section::Flights, &index_map);
    record_removed(Section::Flights, before - data.flights.len());
}

/// Contacts: email, else phone, else positional (never deduplicated).
pub fn dedup_contacts(data: &mut ImportData, confidence: &mut ConfidenceMap) {
    let before = data.contacts.len();
    let index_map = dedup_by_key(&mut data.contacts, |c, _| {
        if !c.email.is_empty() {
            Some(format!("email:{}", norm(&c.email)))
        } else if !c.phone.is_empty() {
            let digits: String = c.phone.chars().filter(|ch| ch.is_ascii_digit()).collect();
            Some(format!("phone:{digits}"))
        } else {
            None
        }
    });
    remap_confidence(confidence, Section::Contacts, &index_map);
    record_removed(Section::Contacts, before - data.contacts.len());
}

fn record_removed(section: Section, removed: usize) {
    if removed > 0 {
        counter!("import_dedup_removed_total").increment(removed as u64);
        tracing::debug!(section = section.as_str(), removed, "deduplicated section");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import_data::{ConfidenceEntry, ImportedContact, ImportedFlight, ImportedHotel};

    fn hotel(name: &str, city: &str, check_in: &str) -> ImportedHotel {
        ImportedHotel {
            name: name.to_string(),
            city: city.to_string(),
            check_in_date: check_in.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn hotel_dedup_keeps_first_and_remaps_confidence() {
        let mut data = ImportData::default();
        data.hotels = vec![
            hotel("Grand Hotel", "Berlin", "2025-06-15"),
            hotel("Ibis", "Berlin", "2025-06-15"),
            hotel("GRAND HOTEL ", "berlin", "2025-06-15"),
        ];
        let mut conf = ConfidenceMap::new();
        conf.insert("hotels[0].name".to_string(), ConfidenceEntry::Score(0.9));
        conf.insert("hotels[1].name".to_string(), ConfidenceEntry::Score(0.8));
        conf.insert("hotels[2].name".to_string(), ConfidenceEntry::Score(0.7));
        conf.insert("deal.fee".to_string(), ConfidenceEntry::Score(0.5));

        dedup_hotels(&mut data, &mut conf);

        assert_eq!(data.hotels.len(), 2);
        assert_eq!(data.hotels[0].name, "Grand Hotel");
        assert_eq!(data.hotels[1].name, "Ibis");
        // Surviving entries keep (possibly renumbered) paths; the removed
        // duplicate's entry is gone; other sections untouched.
        assert!((conf["hotels[0].name"].score() - 0.9).abs() < 1e-6);
        assert!((conf["hotels[1].name"].score() - 0.8).abs() < 1e-6);
        assert!(!conf.contains_key("hotels[2].name"));
        assert!(conf.contains_key("deal.fee"));
    }

    #[test]
    fn index_renumbering_after_removal_in_the_middle() {
        let mut data = ImportData::default();
        data.hotels = vec![
            hotel("A", "X", "1"),
            hotel("a", "x", "1"),
            hotel("B", "Y", "2"),
        ];
        let mut conf = ConfidenceMap::new();
        conf.insert("hotels[2].name".to_string(), ConfidenceEntry::Score(0.6));
        dedup_hotels(&mut data, &mut conf);
        assert_eq!(data.hotels.len(), 2);
        assert_eq!(data.hotels[1].name, "B");
        assert!(conf.contains_key("hotels[1].name"));
        assert!(!conf.contains_key("hotels[2].name"));
    }

    #[test]
    fn flight_dedup_by_number_departure_airport() {
        let mut data = ImportData::default();
        data.flights = vec![
            ImportedFlight {
                flight_number: "TK67".to_string(),
                departure_time: "10:40".to_string(),
                ..Default::default()
            },
            ImportedFlight {
                flight_number: "tk67".to_string(),
                departure_time: "10:40".to_string(),
                ..Default::default()
            },
            ImportedFlight {
                flight_number: "TK67".to_string(),
                departure_time: "18:30".to_string(),
                ..Default::default()
            },
        ];
        let mut conf = ConfidenceMap::new();
        dedup_flights(&mut data, &mut conf);
        // Same number at a different departure time is a different leg.
        assert_eq!(data.flights.len(), 2);
    }

    #[test]
    fn contact_dedup_email_then_phone_then_positional() {
        let mut data = ImportData::default();
        data.contacts = vec![
            ImportedContact {
                email: "tm@example.com".to_string(),
                ..Default::default()
            },
            ImportedContact {
                email: "TM@EXAMPLE.COM".to_string(),
                ..Default::default()
            },
            ImportedContact {
                phone: "+49 171 2345678".to_string(),
                ..Default::default()
            },
            ImportedContact {
                phone: "0171/2345678".to_string(),
                name: "different formatting, different digits".to_string(),
                ..Default::default()
            },
            ImportedContact {
                name: "No identifiers".to_string(),
                ..Default::default()
            },
            ImportedContact {
                name: "Also no identifiers".to_string(),
                ..Default::default()
            },
        ];
        let mut conf = ConfidenceMap::new();
        dedup_contacts(&mut data, &mut conf);
        // Email-dupe removed; phones differ by digits; positional contacts
        // are never merged.
        assert_eq!(data.contacts.len(), 5);
    }
}
