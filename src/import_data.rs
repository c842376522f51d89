// src/import_data.rs
//! # ImportData: the canonical output record
//!
//! Fixed scalar sections (general, deal, technical) plus repeated-entity
//! sections (hotels, food, flights, activities, contacts, documents), built
//! once per job by the application layer and consumed by the review UI
//! together with a per-field confidence map.
//!
//! Merge semantics throughout: first meaningful value wins. The resolver has
//! already chosen the single best candidate per group; the application layer
//! never clobbers a non-empty field with a later, possibly-lower-priority one.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fact::{
    FactResolution, FactType, ImportFact, ResolutionState, Section,
};

// ------------------------------------------------------------
// Record types
// ------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub artist: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub event_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub venue: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub set_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub doors_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DealSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fee: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub currency: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub deal_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payment_terms: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bonus: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TechnicalSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stage: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sound: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backline: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rider_notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedHotel {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub check_in_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub check_out_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub room_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub booking_reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedFlight {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub flight_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub full_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ticket_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub booking_reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub seat: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub travel_class: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub departure_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arrival_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from_airport: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to_airport: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub aircraft: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedFood {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub catering: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub buyout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dietary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedActivity {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedContact {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedDocument {
    pub id: String,
    pub file_name: String,
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportData {
    pub general: GeneralSection,
    pub deal: DealSection,
    pub technical: TechnicalSection,
    pub hotels: Vec<ImportedHotel>,
    pub food: Vec<ImportedFood>,
    pub flights: Vec<ImportedFlight>,
    pub activities: Vec<ImportedActivity>,
    pub contacts: Vec<ImportedContact>,
    pub documents: Vec<ImportedDocument>,
}

/// Stable synthetic entity id from section + grouping key; re-running the
/// same job yields the same ids.
pub fn stable_entity_id(section: Section, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(section.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{}_{hex}", section.as_str())
}

// ------------------------------------------------------------
// Confidence map
// ------------------------------------------------------------

/// Either a bare score or a score with a short reason for the review UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfidenceEntry {
    Score(f32),
    Detailed {
        score: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ConfidenceEntry {
    pub fn score(&self) -> f32 {
        match self {
            ConfidenceEntry::Score(s) => *s,
            ConfidenceEntry::Detailed { score, .. } => *score,
        }
    }
}

/// Dotted/bracketed field path → confidence. BTreeMap keeps serialization
/// deterministic for tests and diffs.
pub type ConfidenceMap = BTreeMap<String, ConfidenceEntry>;

/// Merge `incoming` into `base`, keeping the higher score per path. Ties keep
/// the existing entry.
pub fn merge_confidence_maps(base: &mut ConfidenceMap, incoming: ConfidenceMap) {
    for (path, entry) in incoming {
        match base.get(&path) {
            Some(existing) if existing.score() >= entry.score() => {}
            _ => {
                base.insert(path, entry);
            }
        }
    }
}

/// Typed field path: the dedup pass rewrites indices through this instead of
/// regex-editing path strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub section: Section,
    pub index: Option<usize>,
    pub field: String,
}

impl FieldPath {
    pub fn scalar(section: Section, field: &str) -> Self {
        Self {
            section,
            index: None,
            field: field.to_string(),
        }
    }

    pub fn indexed(section: Section, index: usize, field: &str) -> Self {
        Self {
            section,
            index: Some(index),
            field: field.to_string(),
        }
    }

    pub fn render(&self) -> String {
        match self.index {
            Some(i) => format!("{}[{}].{}", self.section.as_str(), i, self.field),
            None => format!("{}.{}", self.section.as_str(), self.field),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^([a-z]+)(?:\[(\d+)\])?\.([A-Za-z0-9_]+)$").unwrap());
        let c = RE.captures(s)?;
        let section = Section::ORDER
            .iter()
            .copied()
            .find(|sec| sec.as_str() == &c[1])?;
        let index = c.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
        Some(Self {
            section,
            index,
            field: c[3].to_string(),
        })
    }
}

// ------------------------------------------------------------
// Fact type → output field mapping
// ------------------------------------------------------------

/// Fixed mapping from fact type to `(section, camelCase field)`. Flight types
/// are listed for completeness but excluded from generic application; the
/// flight reconstruction pass owns them.
pub fn fact_field(fact_type: FactType) -> Option<(Section, &'static str)> {
    use FactType::*;
    Some(match fact_type {
        GeneralArtist => (Section::General, "artist"),
        GeneralEventName => (Section::General, "eventName"),
        GeneralDate => (Section::General, "date"),
        GeneralVenue => (Section::General, "venue"),
        GeneralCity => (Section::General, "city"),
        GeneralSetTime => (Section::General, "setTime"),
        GeneralDoorsTime => (Section::General, "doorsTime"),
        DealFee => (Section::Deal, "fee"),
        DealType => (Section::Deal, "dealType"),
        DealPaymentTerms => (Section::Deal, "paymentTerms"),
        DealBonus => (Section::Deal, "bonus"),
        DealCurrency => (Section::Deal, "currency"),
        HotelName => (Section::Hotels, "name"),
        HotelCity => (Section::Hotels, "city"),
        HotelAddress => (Section::Hotels, "address"),
        HotelCheckInDate => (Section::Hotels, "checkInDate"),
        HotelCheckOutDate => (Section::Hotels, "checkOutDate"),
        HotelRoomType => (Section::Hotels, "roomType"),
        HotelBookingReference => (Section::Hotels, "bookingReference"),
        FlightNumber => (Section::Flights, "flightNumber"),
        FlightFullName => (Section::Flights, "fullName"),
        FlightTicketNumber => (Section::Flights, "ticketNumber"),
        FlightBookingReference => (Section::Flights, "bookingReference"),
        FlightSeat => (Section::Flights, "seat"),
        FlightTravelClass => (Section::Flights, "travelClass"),
        FlightDate => (Section::Flights, "date"),
        FlightDepartureTime => (Section::Flights, "departureTime"),
        FlightArrivalTime => (Section::Flights, "arrivalTime"),
        FlightFromAirport => (Section::Flights, "fromAirport"),
        FlightToAirport => (Section::Flights, "toAirport"),
        FlightNotes => (Section::Flights, "notes"),
        FoodCatering => (Section::Food, "catering"),
        FoodBuyout => (Section::Food, "buyout"),
        FoodDietary => (Section::Food, "dietary"),
        ActivityName => (Section::Activities, "name"),
        ActivityTime => (Section::Activities, "time"),
        ActivityLocation => (Section::Activities, "location"),
        ContactName => (Section::Contacts, "name"),
        ContactRole => (Section::Contacts, "role"),
        ContactEmail => (Section::Contacts, "email"),
        ContactPhone => (Section::Contacts, "phone"),
        TechnicalStage => (Section::Technical, "stage"),
        TechnicalSound => (Section::Technical, "sound"),
        TechnicalBackline => (Section::Technical, "backline"),
        TechnicalRiderNotes => (Section::Technical, "riderNotes"),
        Other => return None,
    })
}

fn set_if_empty(slot: &mut String, value: &str) -> bool {
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_string();
        true
    } else {
        false
    }
}

fn set_scalar_field(data: &mut ImportData, section: Section, field: &str, value: &str) -> bool {
    match (section, field) {
        (Section::General, "artist") => set_if_empty(&mut data.general.artist, value),
        (Section::General, "eventName") => set_if_empty(&mut data.general.event_name, value),
        (Section::General, "date") => set_if_empty(&mut data.general.date, value),
        (Section::General, "venue") => set_if_empty(&mut data.general.venue, value),
        (Section::General, "city") => set_if_empty(&mut data.general.city, value),
        (Section::General, "setTime") => set_if_empty(&mut data.general.set_time, value),
        (Section::General, "doorsTime") => set_if_empty(&mut data.general.doors_time, value),
        (Section::Deal, "fee") => set_if_empty(&mut data.deal.fee, value),
        (Section::Deal, "currency") => set_if_empty(&mut data.deal.currency, value),
        (Section::Deal, "dealType") => set_if_empty(&mut data.deal.deal_type, value),
        (Section::Deal, "paymentTerms") => set_if_empty(&mut data.deal.payment_terms, value),
        (Section::Deal, "bonus") => set_if_empty(&mut data.deal.bonus, value),
        (Section::Technical, "stage") => set_if_empty(&mut data.technical.stage, value),
        (Section::Technical, "sound") => set_if_empty(&mut data.technical.sound, value),
        (Section::Technical, "backline") => set_if_empty(&mut data.technical.backline, value),
        (Section::Technical, "riderNotes") => set_if_empty(&mut data.technical.rider_notes, value),
        _ => false,
    }
}

fn set_hotel_field(hotel: &mut ImportedHotel, field: &str, value: &str) -> bool {
    match field {
        "name" => set_if_empty(&mut hotel.name, value),
        "city" => set_if_empty(&mut hotel.city, value),
        "address" => set_if_empty(&mut hotel.address, value),
        "checkInDate" => set_if_empty(&mut hotel.check_in_date, value),
        "checkOutDate" => set_if_empty(&mut hotel.check_out_date, value),
        "roomType" => set_if_empty(&mut hotel.room_type, value),
        "bookingReference" => set_if_empty(&mut hotel.booking_reference, value),
        _ => false,
    }
}

fn set_food_field(food: &mut ImportedFood, field: &str, value: &str) -> bool {
    match field {
        "catering" => set_if_empty(&mut food.catering, value),
        "buyout" => set_if_empty(&mut food.buyout, value),
        "dietary" => set_if_empty(&mut food.dietary, value),
        _ => false,
    }
}

fn set_activity_field(activity: &mut ImportedActivity, field: &str, value: &str) -> bool {
    match field {
        "name" => set_if_empty(&mut activity.name, value),
        "time" => set_if_empty(&mut activity.time, value),
        "location" => set_if_empty(&mut activity.location, value),
        _ => false,
    }
}

fn set_contact_field(contact: &mut ImportedContact, field: &str, value: &str) -> bool {
    match field {
        "name" => set_if_empty(&mut contact.name, value),
        "role" => set_if_empty(&mut contact.role, value),
        "email" => set_if_empty(&mut contact.email, value),
        "phone" => set_if_empty(&mut contact.phone, value),
        _ => false,
    }
}

// ------------------------------------------------------------
// Application layer
// ------------------------------------------------------------

/// Map resolutions onto a fresh ImportData record.
///
/// Resolved and informational verdicts contribute; unagreed/missing groups
/// contribute nothing and their fields stay empty for the review UI to flag.
/// Flight facts are excluded here; `flights::reconstruct_flights` owns them.
pub fn apply_resolutions_to_import_data(
    resolutions: &[FactResolution],
    selected_facts: &[ImportFact],
) -> (ImportData, ConfidenceMap) {
    let mut data = ImportData::default();
    let mut confidence = ConfidenceMap::new();
    let facts_by_id: HashMap<uuid::Uuid, &ImportFact> =
        selected_facts.iter().map(|f| (f.id, f)).collect();

    // Per array section: domain key → element index.
    let mut hotel_index: HashMap<String, usize> = HashMap::new();
    let mut food_index: HashMap<String, usize> = HashMap::new();
    let mut activity_index: HashMap<String, usize> = HashMap::new();
    let mut contact_index: HashMap<String, usize> = HashMap::new();

    for resolution in resolutions {
        if !matches!(
            resolution.state,
            ResolutionState::Resolved | ResolutionState::Informational
        ) {
            continue;
        }
        let Some(selected_id) = resolution.selected_fact_id else {
            continue;
        };
        let Some(fact) = facts_by_id.get(&selected_id) else {
            continue;
        };
        let Some((section, field)) = fact_field(resolution.fact_type) else {
            continue;
        };
        // Flight reconstruction declares these as its own.
        if crate::flights::CONSUMED_FACT_TYPES.contains(&resolution.fact_type) {
            continue;
        }

        let value = resolution
            .final_value
            .as_ref()
            .map(|v| v.to_display())
            .unwrap_or_else(|| fact.fact.value.to_display());
        let domain = resolution
            .fact_domain
            .clone()
            .unwrap_or_else(|| format!("{}_main", section.as_str()));

        let path = match section {
            Section::Hotels => {
                let next = data.hotels.len();
                let idx = *hotel_index.entry(domain.clone()).or_insert_with(|| {
                    data.hotels.push(ImportedHotel {
                        id: stable_entity_id(section, &domain),
                        ..Default::default()
                    });
                    next
                });
                if !set_hotel_field(&mut data.hotels[idx], field, &value) {
                    continue;
                }
                FieldPath::indexed(section, idx, field)
            }
            Section::Food => {
                let next = data.food.len();
                let idx = *food_index.entry(domain.clone()).or_insert_with(|| {
                    data.food.push(ImportedFood {
                        id: stable_entity_id(section, &domain),
                        ..Default::default()
                    });
                    next
                });
                if !set_food_field(&mut data.food[idx], field, &value) {
                    continue;
                }
                FieldPath::indexed(section, idx, field)
            }
            Section::Activities => {
                let next = data.activities.len();
                let idx = *activity_index.entry(domain.clone()).or_insert_with(|| {
                    data.activities.push(ImportedActivity {
                        id: stable_entity_id(section, &domain),
                        ..Default::default()
                    });
                    next
                });
                if !set_activity_field(&mut data.activities[idx], field, &value) {
                    continue;
                }
                FieldPath::indexed(section, idx, field)
            }
            Section::Contacts => {
                let next = data.contacts.len();
                let idx = *contact_index.entry(domain.clone()).or_insert_with(|| {
                    data.contacts.push(ImportedContact {
                        id: stable_entity_id(section, &domain),
                        ..Default::default()
                    });
                    next
                });
                if !set_contact_field(&mut data.contacts[idx], field, &value) {
                    continue;
                }
                FieldPath::indexed(section, idx, field)
            }
            _ => {
                if !set_scalar_field(&mut data, section, field, &value) {
                    continue;
                }
                FieldPath::scalar(section, field)
            }
        };

        confidence.insert(
            path.render(),
            ConfidenceEntry::Detailed {
                score: resolution.confidence,
                reason: Some(resolution.reason.clone()),
            },
        );
    }

    (data, confidence)
}

// ------------------------------------------------------------
// Running-result merge (orchestrator)
// ------------------------------------------------------------

macro_rules! merge_scalar {
    ($base:expr, $incoming:expr, $($field:ident),+ $(,)?) => {
        $(
            if $base.$field.is_empty() && !$incoming.$field.is_empty() {
                $base.$field = $incoming.$field.clone();
            }
        )+
    };
}

/// Merge one section pass's partial data into the running result: scalars
/// prefer the existing non-empty value, arrays concatenate.
pub fn merge_import_data(base: &mut ImportData, incoming: &ImportData) {
    merge_scalar!(
        base.general,
        incoming.general,
        artist,
        event_name,
        date,
        venue,
        city,
        set_time,
        doors_time
    );
    merge_scalar!(
        base.deal,
        incoming.deal,
        fee,
        currency,
        deal_type,
        payment_terms,
        bonus
    );
    merge_scalar!(
        base.technical,
        incoming.technical,
        stage,
        sound,
        backline,
        rider_notes
    );
    base.hotels.extend(incoming.hotels.iter().cloned());
    base.food.extend(incoming.food.iter().cloned());
    base.flights.extend(incoming.flights.iter().cloned());
    base.activities.extend(incoming.activities.iter().cloned());
    base.contacts.extend(incoming.contacts.iter().cloned());
    base.documents.extend(incoming.documents.iter().cloned());
}
