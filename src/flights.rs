// src/flights.rs
//! # Flight reconstruction & enrichment
//!
//! Resolved flight facts are regrouped into one `ImportedFlight` per leg,
//! keyed by the normalized `flight_leg_N` domain the grouping pass assigned.
//! This module declares the fact types it consumes so the generic
//! application layer does not double-apply them.
//!
//! Flight enrichment (airports, scheduled times, aircraft) is delegated to
//! an external flight-data collaborator keyed by flight number + date; a
//! lookup failure silently keeps the extracted values.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::fact::{FactResolution, FactType, ImportFact, ResolutionState, Section};
use crate::import_data::{stable_entity_id, ConfidenceEntry, ConfidenceMap, FieldPath, ImportedFlight};

/// Fact types consumed here and skipped by the generic application layer.
pub const CONSUMED_FACT_TYPES: [FactType; 12] = [
    FactType::FlightNumber,
    FactType::FlightFullName,
    FactType::FlightTicketNumber,
    FactType::FlightBookingReference,
    FactType::FlightSeat,
    FactType::FlightTravelClass,
    FactType::FlightDate,
    FactType::FlightDepartureTime,
    FactType::FlightArrivalTime,
    FactType::FlightFromAirport,
    FactType::FlightToAirport,
    FactType::FlightNotes,
];

fn leg_ordinal(domain: &str) -> usize {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^flight_leg_(\d+)$").unwrap());
    RE.captures(domain)
        .and_then(|c| c[1].parse::<usize>().ok())
        .unwrap_or(usize::MAX)
}

fn set_flight_field(flight: &mut ImportedFlight, fact_type: FactType, value: &str) -> bool {
    let slot = match fact_type {
        FactType::FlightNumber => &mut flight.flight_number,
        FactType::FlightFullName => &mut flight.full_name,
        FactType::FlightTicketNumber => &mut flight.ticket_number,
        FactType::FlightBookingReference => &mut flight.booking_reference,
        FactType::FlightSeat => &mut flight.seat,
        FactType::FlightTravelClass => &mut flight.travel_class,
        FactType::FlightDate => &mut flight.date,
        FactType::FlightDepartureTime => &mut flight.departure_time,
        FactType::FlightArrivalTime => &mut flight.arrival_time,
        FactType::FlightFromAirport => &mut flight.from_airport,
        FactType::FlightToAirport => &mut flight.to_airport,
        FactType::FlightNotes => &mut flight.notes,
        _ => return false,
    };
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_string();
        true
    } else {
        false
    }
}

/// Regroup resolved flight facts into per-leg flight instances, in leg order.
/// Returns the flights plus their confidence entries.
pub fn reconstruct_flights(
    resolutions: &[FactResolution],
    selected_facts: &[ImportFact],
) -> (Vec<ImportedFlight>, ConfidenceMap) {
    let facts_by_id: HashMap<uuid::Uuid, &ImportFact> =
        selected_facts.iter().map(|f| (f.id, f)).collect();

    // Leg domain → (flight, pending confidence entries by field).
    let mut legs: Vec<(String, ImportedFlight, Vec<(&'static str, f32, String)>)> = Vec::new();
    let mut leg_index: HashMap<String, usize> = HashMap::new();

    let mut flight_resolutions: Vec<&FactResolution> = resolutions
        .iter()
        .filter(|r| {
            r.fact_type.section() == Section::Flights
                && matches!(
                    r.state,
                    ResolutionState::Resolved | ResolutionState::Informational
                )
        })
        .collect();
    // Stable leg ordering regardless of resolution arrival order.
    flight_resolutions.sort_by_key(|r| {
        r.fact_domain
            .as_deref()
            .map(leg_ordinal)
            .unwrap_or(usize::MAX)
    });

    for resolution in flight_resolutions {
        let Some(selected_id) = resolution.selected_fact_id else {
            continue;
        };
        let Some(fact) = facts_by_id.get(&selected_id) else {
            continue;
        };
        let domain = resolution
            .fact_domain
            .clone()
            .unwrap_or_else(|| "flight_leg_1".to_string());
        let value = resolution
            .final_value
            .as_ref()
            .map(|v| v.to_display())
            .unwrap_or_else(|| fact.fact.value.to_display());

        let idx = *leg_index.entry(domain.clone()).or_insert_with(|| {
            legs.push((
                domain.clone(),
                ImportedFlight {
                    id: stable_entity_id(Section::Flights, &domain),
                    ..Default::default()
                },
                Vec::new(),
            ));
            legs.len() - 1
        });

        let field = crate::import_data::fact_field(resolution.fact_type)
            .map(|(_, f)| f)
            .unwrap_or("notes");
        if set_flight_field(&mut legs[idx].1, resolution.fact_type, &value) {
            legs[idx]
                .2
                .push((field, resolution.confidence, resolution.reason.clone()));
        }
    }

    let mut confidence = ConfidenceMap::new();
    let mut flights = Vec::with_capacity(legs.len());
    for (i, (_, flight, entries)) in legs.into_iter().enumerate() {
        for (field, score, reason) in entries {
            confidence.insert(
                FieldPath::indexed(Section::Flights, i, field).render(),
                ConfidenceEntry::Detailed {
                    score,
                    reason: Some(reason),
                },
            );
        }
        flights.push(flight);
    }
    (flights, confidence)
}

// ------------------------------------------------------------
// External flight-data collaborator
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightLookupRequest {
    pub flight_number: String,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FlightInfo {
    pub from_airport: Option<String>,
    pub to_airport: Option<String>,
    pub departure_time: Option<String>,
    pub arrival_time: Option<String>,
    pub aircraft: Option<String>,
}

/// External flight-data API. Failure is expressed as `None`: enrichment is
/// best-effort and never blocks the pipeline.
#[async_trait]
pub trait FlightDataApi: Send + Sync {
    async fn lookup(&self, req: &FlightLookupRequest) -> Option<FlightInfo>;
    fn name(&self) -> &'static str;
}

/// No-credentials collaborator: every lookup misses.
pub struct DisabledFlightData;

#[async_trait]
impl FlightDataApi for DisabledFlightData {
    async fn lookup(&self, _req: &FlightLookupRequest) -> Option<FlightInfo> {
        None
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixture-backed collaborator for tests and demos.
pub struct FixtureFlightData {
    pub by_number: HashMap<String, FlightInfo>,
}

#[async_trait]
impl FlightDataApi for FixtureFlightData {
    async fn lookup(&self, req: &FlightLookupRequest) -> Option<FlightInfo> {
        self.by_number.get(&req.flight_number).cloned()
    }
    fn name(&self) -> &'static str {
        "fixture"
    }
}

/// HTTP collaborator for an AeroDataBox-style schedule API.
pub struct HttpFlightData {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpFlightData {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(4))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl FlightDataApi for HttpFlightData {
    async fn lookup(&self, req: &FlightLookupRequest) -> Option<FlightInfo> {
        if self.api_key.is_empty() {
            return None;
        }
        let mut url = format!("{}/flights/{}", self.base_url, req.flight_number);
        if let Some(date) = &req.date {
            url.push_str(&format!("/{date}"));
        }
        let resp = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            tracing::debug!(
                flight = %req.flight_number,
                status = resp.status().as_u16(),
                "flight lookup miss"
            );
            return None;
        }
        resp.json::<FlightInfo>().await.ok()
    }
    fn name(&self) -> &'static str {
        "http"
    }
}

/// Fill empty airport/time/aircraft fields from the collaborator. Extracted
/// values always win over API data; lookup failures are skipped silently.
pub async fn enrich_flights(flights: &mut [ImportedFlight], api: &dyn FlightDataApi) {
    for flight in flights.iter_mut() {
        if flight.flight_number.is_empty() {
            continue;
        }
        let req = FlightLookupRequest {
            flight_number: flight.flight_number.clone(),
            date: if flight.date.is_empty() {
                None
            } else {
                Some(flight.date.clone())
            },
        };
        let Some(info) = api.lookup(&req).await else {
            continue;
        };
        tracing::debug!(flight = %flight.flight_number, api = api.name(), "flight enriched");
        let fill = |slot: &mut String, value: Option<String>| {
            if slot.is_empty() {
                if let Some(v) = value {
                    *slot = v;
                }
            }
        };
        fill(&mut flight.from_airport, info.from_airport);
        fill(&mut flight.to_airport, info.to_airport);
        fill(&mut flight.departure_time, info.departure_time);
        fill(&mut flight.arrival_time, info.arrival_time);
        fill(&mut flight.aircraft, info.aircraft);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{ExtractedFact, FactStatus, FactValue};
    use uuid::Uuid;

    fn flight_resolution(
        fact_type: FactType,
        domain: &str,
        value: &str,
    ) -> (FactResolution, ImportFact) {
        let mut f = ExtractedFact::new(fact_type, FactValue::Text(value.to_string()));
        f.status = FactStatus::Final;
        f.fact_domain = Some(domain.to_string());
        let fact = ImportFact::from_extracted(Uuid::new_v4(), f);
        let r = FactResolution {
            fact_type,
            fact_domain: Some(domain.to_string()),
            selected_fact_id: Some(fact.id),
            state: ResolutionState::Resolved,
            reason: "test".to_string(),
            final_value: Some(FactValue::Text(value.to_string())),
            reasoning_trace: Vec::new(),
            confidence: 0.9,
        };
        (r, fact)
    }

    #[test]
    fn one_leg_per_domain_with_all_fields() {
        let (r1, f1) = flight_resolution(FactType::FlightNumber, "flight_leg_1", "TK67");
        let (r2, f2) = flight_resolution(FactType::FlightSeat, "flight_leg_1", "12A");
        let (r3, f3) = flight_resolution(FactType::FlightNumber, "flight_leg_2", "LH1302");
        let (flights, conf) =
            reconstruct_flights(&[r2, r3, r1], &[f1, f2, f3]);
        assert_eq!(flights.len(), 2);
        assert_eq!(flights[0].flight_number, "TK67");
        assert_eq!(flights[0].seat, "12A");
        assert_eq!(flights[1].flight_number, "LH1302");
        assert!(conf.contains_key("flights[0].seat"));
        assert!(conf.contains_key("flights[1].flightNumber"));
    }

    #[test]
    fn unresolved_flight_groups_are_skipped() {
        let (mut r, f) = flight_resolution(FactType::FlightNumber, "flight_leg_1", "TK67");
        r.state = ResolutionState::Unagreed;
        r.selected_fact_id = None;
        let (flights, conf) = reconstruct_flights(&[r], &[f]);
        assert!(flights.is_empty());
        assert!(conf.is_empty());
    }

    #[tokio::test]
    async fn enrichment_fills_only_empty_fields() {
        let mut flights = vec![ImportedFlight {
            flight_number: "TK67".to_string(),
            from_airport: "BER".to_string(),
            ..Default::default()
        }];
        let api = FixtureFlightData {
            by_number: HashMap::from([(
                "TK67".to_string(),
                FlightInfo {
                    from_airport: Some("SAW".to_string()),
                    to_airport: Some("IST".to_string()),
                    departure_time: Some("10:40".to_string()),
                    arrival_time: None,
                    aircraft: Some("A321".to_string()),
                },
            )]),
        };
        enrich_flights(&mut flights, &api).await;
        // Extracted value wins; API fills the blanks.
        assert_eq!(flights[0].from_airport, "BER");
        assert_eq!(flights[0].to_airport, "IST");
        assert_eq!(flights[0].departure_time, "10:40");
        assert_eq!(flights[0].aircraft, "A321");
    }

    #[tokio::test]
    async fn lookup_failure_keeps_extracted_values() {
        let mut flights = vec![ImportedFlight {
            flight_number: "XX999".to_string(),
            to_airport: "IST".to_string(),
            ..Default::default()
        }];
        enrich_flights(&mut flights, &DisabledFlightData).await;
        assert_eq!(flights[0].to_airport, "IST");
        assert!(flights[0].from_airport.is_empty());
    }
}
