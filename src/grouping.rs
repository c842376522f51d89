// src/grouping.rs
//! # Fact grouping
//!
//! Resolution operates on `(fact_type, fact_domain)` groups. Before generic
//! grouping, flight facts are re-anchored to consistent per-leg domains: the
//! model's per-chunk domain keys drift across chunks ("flight_1" here,
//! "leg-a" there), so the only reliable anchors are the flight numbers
//! themselves plus positional proximity.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::fact::{FactType, ImportFact};

/// One resolution unit: every fact asserting a value for the same logical
/// field of the same entity instance.
#[derive(Debug, Clone)]
pub struct FactGroup {
    pub fact_type: FactType,
    pub fact_domain: Option<String>,
    pub facts: Vec<ImportFact>,
}

static RE_LEG_DOMAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^flight_leg_\d+$").unwrap());

fn position(f: &ImportFact) -> (usize, usize) {
    (f.fact.provenance.message_index, f.fact.provenance.chunk_index)
}

/// Lowercased, alphanumeric-only flight number for substring matching
/// ("TK 67" and "tk67" both match snippet text mentioning TK67).
fn normalize_flight_number(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn slugify(s: &str) -> String {
    let slug: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    slug.trim_matches('_').to_string()
}

/// Re-anchor flight facts onto stable `flight_leg_N` domains.
///
/// 1. Flight-number facts, ordered by `(message_index, chunk_index)`, each
///    get a stable leg domain (reusing an existing `flight_leg_\d+` one).
/// 2. Every other flight-typed fact is matched against the known flight
///    numbers (snippet or value text); a hit adopts that leg's domain.
/// 3. No hit: positional proximity among same-source flight-number facts:
///    nearest preceding number, or nearest upcoming for arrival-oriented
///    types (destination facts usually appear before the next leg's number).
/// 4. Still ambiguous: round-robin across known domains, or the sole domain
///    when only one leg exists.
pub fn normalize_flight_domains(mut facts: Vec<ImportFact>) -> Vec<ImportFact> {
    // Pass 1: anchor flight numbers.
    let mut number_indices: Vec<usize> = facts
        .iter()
        .enumerate()
        .filter(|(_, f)| f.fact.fact_type == FactType::FlightNumber)
        .map(|(i, _)| i)
        .collect();
    number_indices.sort_by_key(|&i| position(&facts[i]));

    // (normalized number, source_id, position, domain)
    struct Anchor {
        number: String,
        source_id: String,
        pos: (usize, usize),
        domain: String,
    }
    let mut anchors: Vec<Anchor> = Vec::new();
    let mut used_domains: Vec<String> = Vec::new();
    let mut leg_counter = 0usize;

    for &i in &number_indices {
        let existing = facts[i]
            .fact
            .fact_domain
            .as_deref()
            .filter(|d| RE_LEG_DOMAIN.is_match(d))
            .map(String::from);
        let number = normalize_flight_number(&facts[i].fact.value.to_display());
        // The same flight number seen again (another document confirming the
        // same leg) reuses the first anchor's domain.
        let domain = if let Some(a) = anchors.iter().find(|a| a.number == number && !number.is_empty())
        {
            a.domain.clone()
        } else if let Some(d) = existing.filter(|d| !used_domains.contains(d)) {
            d
        } else {
            loop {
                leg_counter += 1;
                let candidate = format!("flight_leg_{leg_counter}");
                if !used_domains.contains(&candidate) {
                    break candidate;
                }
            }
        };
        if !used_domains.contains(&domain) {
            used_domains.push(domain.clone());
        }
        facts[i].fact.fact_domain = Some(domain.clone());
        anchors.push(Anchor {
            number,
            source_id: facts[i].fact.provenance.source_id.clone(),
            pos: position(&facts[i]),
            domain,
        });
    }

    let known_domains: Vec<String> = {
        let mut seen = Vec::new();
        for a in &anchors {
            if !seen.contains(&a.domain) {
                seen.push(a.domain.clone());
            }
        }
        seen
    };

    // Pass 2: anchor the remaining flight facts.
    let mut round_robin = 0usize;
    let mut orphan_counter = 0usize;
    for i in 0..facts.len() {
        let ft = facts[i].fact.fact_type;
        if !ft.is_flight() || ft == FactType::FlightNumber {
            continue;
        }

        if known_domains.is_empty() {
            // No flight numbers at all: fall back to the default-domain rule
            // (keep what the model said, else slug/counter).
            if facts[i].fact.fact_domain.is_none() {
                let slug = slugify(&facts[i].fact.value.to_display());
                orphan_counter += 1;
                facts[i].fact.fact_domain = Some(if slug.is_empty() {
                    format!("flight_leg_{orphan_counter}")
                } else {
                    format!("flight_{slug}")
                });
            }
            continue;
        }

        // 2a: direct flight-number mention in snippet or value.
        let evidence = normalize_flight_number(&facts[i].fact.evidence_text());
        let hit = anchors
            .iter()
            .find(|a| !a.number.is_empty() && evidence.contains(&a.number))
            .map(|a| a.domain.clone());
        if let Some(domain) = hit {
            facts[i].fact.fact_domain = Some(domain);
            continue;
        }

        // 2b: positional proximity among same-source anchors.
        let pos = position(&facts[i]);
        let source_id = facts[i].fact.provenance.source_id.clone();
        let same_source: Vec<&Anchor> =
            anchors.iter().filter(|a| a.source_id == source_id).collect();

        let chosen = if ft.is_arrival_oriented() {
            // Nearest upcoming anchor; fall back to nearest preceding.
            same_source
                .iter()
                .filter(|a| a.pos >= pos)
                .min_by_key(|a| a.pos)
                .or_else(|| same_source.iter().filter(|a| a.pos < pos).max_by_key(|a| a.pos))
        } else {
            same_source
                .iter()
                .filter(|a| a.pos <= pos)
                .max_by_key(|a| a.pos)
                .or_else(|| same_source.iter().filter(|a| a.pos > pos).min_by_key(|a| a.pos))
        };

        // Identical anchor positions make proximity meaningless.
        let unambiguous = chosen.filter(|best| {
            same_source
                .iter()
                .filter(|a| a.pos == best.pos && a.domain != best.domain)
                .count()
                == 0
        });

        facts[i].fact.fact_domain = Some(match unambiguous {
            Some(a) => a.domain.clone(),
            None => {
                if known_domains.len() == 1 {
                    known_domains[0].clone()
                } else {
                    let d = known_domains[round_robin % known_domains.len()].clone();
                    round_robin += 1;
                    d
                }
            }
        });
    }

    facts
}

/// Default domain for non-flight facts that arrived without one.
fn default_domain(fact_type: FactType) -> Option<&'static str> {
    if fact_type.is_hotel() {
        Some("hotel_main")
    } else if fact_type.is_contact() {
        Some("contact_main")
    } else {
        None
    }
}

/// Group facts into resolution units.
///
/// Runs the flight-domain normalization pass, applies default domains, then
/// groups by `(fact_type, fact_domain)` preserving first-seen order. Facts
/// within a group are sorted by `(message_index, chunk_index)` ascending,
/// chronological replay order the resolver relies on for latest-wins
/// tie-breaking.
pub fn group_facts_for_resolution(facts: Vec<ImportFact>) -> Vec<FactGroup> {
    let mut facts = normalize_flight_domains(facts);

    for f in facts.iter_mut() {
        if f.fact.fact_domain.is_none() {
            if let Some(d) = default_domain(f.fact.fact_type) {
                f.fact.fact_domain = Some(d.to_string());
            }
        }
    }

    let mut order: Vec<(FactType, Option<String>)> = Vec::new();
    let mut by_key: HashMap<(FactType, Option<String>), Vec<ImportFact>> = HashMap::new();
    for f in facts {
        let key = (f.fact.fact_type, f.fact.fact_domain.clone());
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.entry(key).or_default().push(f);
    }

    order
        .into_iter()
        .map(|key| {
            let mut group_facts = by_key.remove(&key).unwrap_or_default();
            group_facts.sort_by_key(position);
            FactGroup {
                fact_type: key.0,
                fact_domain: key.1,
                facts: group_facts,
            }
        })
        .collect()
}
