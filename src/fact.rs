// src/fact.rs
//! Core data model: typed facts, negotiation status, provenance, resolutions.
//!
//! A fact is an atomic, provenance-tagged claim pulled out of one document
//! chunk ("the fee is $5000", "flight TK67 departs 10:40"). Facts carry the
//! negotiation status asserted by the document, who said it, and which class
//! of document it came from. Resolution (stage 2) later picks one canonical
//! fact per `(fact_type, fact_domain)` group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output sections of the advancing record, in canonical processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    General,
    Deal,
    Hotels,
    Flights,
    Food,
    Activities,
    Contacts,
    Technical,
    Documents,
}

impl Section {
    /// Fixed processing order relied on by the orchestrator and tests.
    pub const ORDER: [Section; 9] = [
        Section::General,
        Section::Deal,
        Section::Hotels,
        Section::Flights,
        Section::Food,
        Section::Activities,
        Section::Contacts,
        Section::Technical,
        Section::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::General => "general",
            Section::Deal => "deal",
            Section::Hotels => "hotels",
            Section::Flights => "flights",
            Section::Food => "food",
            Section::Activities => "activities",
            Section::Contacts => "contacts",
            Section::Technical => "technical",
            Section::Documents => "documents",
        }
    }

    /// Sections whose output is an array of entities (one per domain).
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Section::Hotels
                | Section::Flights
                | Section::Food
                | Section::Activities
                | Section::Contacts
                | Section::Documents
        )
    }
}

/// Closed set of fact types the extractor may emit. The model is told this
/// list verbatim and forbidden from inventing new ones; anything it makes up
/// anyway is normalized to `Other` (see `normalize::normalize_fact_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    // general
    GeneralArtist,
    GeneralEventName,
    GeneralDate,
    GeneralVenue,
    GeneralCity,
    GeneralSetTime,
    GeneralDoorsTime,
    // deal
    DealFee,
    DealType,
    DealPaymentTerms,
    DealBonus,
    DealCurrency,
    // hotel
    HotelName,
    HotelCity,
    HotelAddress,
    HotelCheckInDate,
    HotelCheckOutDate,
    HotelRoomType,
    HotelBookingReference,
    // flight
    FlightNumber,
    FlightFullName,
    FlightTicketNumber,
    FlightBookingReference,
    FlightSeat,
    FlightTravelClass,
    FlightDate,
    FlightDepartureTime,
    FlightArrivalTime,
    FlightFromAirport,
    FlightToAirport,
    FlightNotes,
    // food
    FoodCatering,
    FoodBuyout,
    FoodDietary,
    // activities
    ActivityName,
    ActivityTime,
    ActivityLocation,
    // contacts
    ContactName,
    ContactRole,
    ContactEmail,
    ContactPhone,
    // technical
    TechnicalStage,
    TechnicalSound,
    TechnicalBackline,
    TechnicalRiderNotes,
    // catch-all
    Other,
}

impl FactType {
    /// Every valid type, used for prompt building and wire-name lookup.
    pub const ALL: [FactType; 46] = [
        FactType::GeneralArtist,
        FactType::GeneralEventName,
        FactType::GeneralDate,
        FactType::GeneralVenue,
        FactType::GeneralCity,
        FactType::GeneralSetTime,
        FactType::GeneralDoorsTime,
        FactType::DealFee,
        FactType::DealType,
        FactType::DealPaymentTerms,
        FactType::DealBonus,
        FactType::DealCurrency,
        FactType::HotelName,
        FactType::HotelCity,
        FactType::HotelAddress,
        FactType::HotelCheckInDate,
        FactType::HotelCheckOutDate,
        FactType::HotelRoomType,
        FactType::HotelBookingReference,
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
        FactType::FoodCatering,
        FactType::FoodBuyout,
        FactType::FoodDietary,
        FactType::ActivityName,
        FactType::ActivityTime,
        FactType::ActivityLocation,
        FactType::ContactName,
        FactType::ContactRole,
        FactType::ContactEmail,
        FactType::ContactPhone,
        FactType::TechnicalStage,
        FactType::TechnicalSound,
        FactType::TechnicalBackline,
        FactType::TechnicalRiderNotes,
        FactType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::GeneralArtist => "general_artist",
            FactType::GeneralEventName => "general_event_name",
            FactType::GeneralDate => "general_date",
            FactType::GeneralVenue => "general_venue",
            FactType::GeneralCity => "general_city",
            FactType::GeneralSetTime => "general_set_time",
            FactType::GeneralDoorsTime => "general_doors_time",
            FactType::DealFee => "deal_fee",
            FactType::DealType => "deal_type",
            FactType::DealPaymentTerms => "deal_payment_terms",
            FactType::DealBonus => "deal_bonus",
            FactType::DealCurrency => "deal_currency",
            FactType::HotelName => "hotel_name",
            FactType::HotelCity => "hotel_city",
            FactType::HotelAddress => "hotel_address",
            FactType::HotelCheckInDate => "hotel_check_in_date",
            FactType::HotelCheckOutDate => "hotel_check_out_date",
            FactType::HotelRoomType => "hotel_room_type",
            FactType::HotelBookingReference => "hotel_booking_reference",
            FactType::FlightNumber => "flight_number",
            FactType::FlightFullName => "flight_full_name",
            FactType::FlightTicketNumber => "flight_ticket_number",
            FactType::FlightBookingReference => "flight_booking_reference",
            FactType::FlightSeat => "flight_seat",
            FactType::FlightTravelClass => "flight_travel_class",
            FactType::FlightDate => "flight_date",
            FactType::FlightDepartureTime => "flight_departure_time",
            FactType::FlightArrivalTime => "flight_arrival_time",
            FactType::FlightFromAirport => "flight_from_airport",
            FactType::FlightToAirport => "flight_to_airport",
            FactType::FlightNotes => "flight_notes",
            FactType::FoodCatering => "food_catering",
            FactType::FoodBuyout => "food_buyout",
            FactType::FoodDietary => "food_dietary",
            FactType::ActivityName => "activity_name",
            FactType::ActivityTime => "activity_time",
            FactType::ActivityLocation => "activity_location",
            FactType::ContactName => "contact_name",
            FactType::ContactRole => "contact_role",
            FactType::ContactEmail => "contact_email",
            FactType::ContactPhone => "contact_phone",
            FactType::TechnicalStage => "technical_stage",
            FactType::TechnicalSound => "technical_sound",
            FactType::TechnicalBackline => "technical_backline",
            FactType::TechnicalRiderNotes => "technical_rider_notes",
            FactType::Other => "other",
        }
    }

    /// Which output section this type feeds.
    pub fn section(&self) -> Section {
        match self.as_str().split('_').next().unwrap_or("") {
            "general" => Section::General,
            "deal" => Section::Deal,
            "hotel" => Section::Hotels,
            "flight" => Section::Flights,
            "food" => Section::Food,
            "activity" => Section::Activities,
            "contact" => Section::Contacts,
            "technical" => Section::Technical,
            _ => Section::General,
        }
    }

    pub fn is_flight(&self) -> bool {
        matches!(
            self,
            FactType::FlightNumber
                | FactType::FlightFullName
                | FactType::FlightTicketNumber
                | FactType::FlightBookingReference
                | FactType::FlightSeat
                | FactType::FlightTravelClass
                | FactType::FlightDate
                | FactType::FlightDepartureTime
                | FactType::FlightArrivalTime
                | FactType::FlightFromAirport
                | FactType::FlightToAirport
                | FactType::FlightNotes
        )
    }

    pub fn is_hotel(&self) -> bool {
        self.section() == Section::Hotels && *self != FactType::Other
    }

    pub fn is_contact(&self) -> bool {
        self.section() == Section::Contacts && *self != FactType::Other
    }

    /// Types whose fact, when found in a confirmation-class document, is a
    /// confirmed booking detail rather than a negotiation position. Used by
    /// the filename status safety net (see `extract`).
    pub fn is_confirmation_type(&self) -> bool {
        matches!(
            self,
            FactType::FlightNumber
                | FactType::FlightFullName
                | FactType::FlightTicketNumber
                | FactType::FlightBookingReference
                | FactType::FlightSeat
                | FactType::FlightTravelClass
                | FactType::FlightDate
                | FactType::FlightDepartureTime
                | FactType::FlightArrivalTime
                | FactType::FlightFromAirport
                | FactType::FlightToAirport
                | FactType::HotelName
                | FactType::HotelBookingReference
                | FactType::HotelCheckInDate
                | FactType::HotelCheckOutDate
                | FactType::ContactName
                | FactType::ContactEmail
                | FactType::ContactPhone
        )
    }

    /// Arrival/destination-oriented flight types. The flight-domain
    /// normalizer anchors these to the nearest *upcoming* flight number
    /// instead of the nearest preceding one.
    pub fn is_arrival_oriented(&self) -> bool {
        matches!(
            self,
            FactType::FlightArrivalTime | FactType::FlightToAirport
        )
    }
}

/// Exactly one value slot per fact. A raw model fact with zero or multiple
/// populated slots is dropped at the parse boundary (`extract::parse_raw_fact`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(String),
    Time(String),
    DateTime(String),
}

impl FactValue {
    /// Render the value as display text for the output record.
    pub fn to_display(&self) -> String {
        match self {
            FactValue::Text(s) | FactValue::Date(s) | FactValue::Time(s) | FactValue::DateTime(s) => {
                s.clone()
            }
            FactValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            FactValue::Boolean(b) => b.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FactValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Who pays / who benefits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    WePay,
    TheyPay,
    Included,
    ExternalCost,
    Split,
    #[default]
    Unknown,
}

/// Negotiation state asserted by the document for this claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    Offer,
    CounterOffer,
    Accepted,
    Rejected,
    Withdrawn,
    Info,
    Question,
    Final,
    #[default]
    Unknown,
}

impl FactStatus {
    /// Rejected, withdrawn and question facts can never be selected by a
    /// resolution. Hard invariant, independent of any model output.
    pub fn is_selectable(&self) -> bool {
        !matches!(
            self,
            FactStatus::Rejected | FactStatus::Withdrawn | FactStatus::Question
        )
    }

    /// Only accepted/final facts can produce a `Resolved` state.
    pub fn is_finalizable(&self) -> bool {
        matches!(self, FactStatus::Accepted | FactStatus::Final)
    }

    /// Relative strength used when checking whether a later fact contradicts
    /// an earlier one (equal-or-higher strength counts).
    pub fn strength(&self) -> u8 {
        match self {
            FactStatus::Final => 100,
            FactStatus::Accepted => 90,
            FactStatus::CounterOffer => 60,
            FactStatus::Offer => 50,
            FactStatus::Rejected | FactStatus::Withdrawn => 40,
            FactStatus::Info => 30,
            FactStatus::Question => 20,
            FactStatus::Unknown => 10,
        }
    }
}

/// Which negotiating party asserted the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    Artist,
    ArtistAgent,
    Promoter,
    Venue,
    Production,
    #[default]
    Unknown,
}

/// Document-class provenance, used as a trust weight during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
    ContractMain,
    Itinerary,
    Confirmation,
    RiderExample,
    GeneralInfo,
    #[default]
    Unknown,
}

impl SourceScope {
    /// Tie-breaking priority: a signed contract outweighs an itinerary,
    /// which outweighs a booking confirmation; rider examples are nearly
    /// worthless as claims about *this* show.
    pub fn priority(&self) -> u8 {
        match self {
            SourceScope::ContractMain => 100,
            SourceScope::Itinerary => 90,
            SourceScope::Confirmation => 85,
            SourceScope::GeneralInfo => 50,
            SourceScope::RiderExample => 20,
            SourceScope::Unknown => 10,
        }
    }
}

/// Where in the input a fact was observed. `raw_snippet` is verbatim evidence
/// shown to reviewers and consumed by the flight-domain normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Provenance {
    pub message_index: usize,
    pub chunk_index: usize,
    pub source_id: String,
    pub source_file_name: String,
    pub raw_snippet: String,
}

/// Stage-1 output: one atomic claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub fact_type: FactType,
    /// Groups the fact to one entity instance (e.g. `flight_leg_1`,
    /// `hotel_main`). None for scalar facts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_domain: Option<String>,
    pub value: FactValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub direction: Direction,
    pub status: FactStatus,
    pub speaker_role: SpeakerRole,
    pub source_scope: SourceScope,
    /// Model self-report; superseded by computed confidence at resolution.
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_reason: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl ExtractedFact {
    pub fn new(fact_type: FactType, value: FactValue) -> Self {
        Self {
            fact_type,
            fact_domain: None,
            value,
            currency: None,
            unit: None,
            direction: Direction::Unknown,
            status: FactStatus::Unknown,
            speaker_role: SpeakerRole::Unknown,
            source_scope: SourceScope::Unknown,
            confidence: 0.5,
            extraction_reason: None,
            provenance: Provenance::default(),
        }
    }

    /// Lowercased haystack of snippet + value text, used by domain matching.
    pub fn evidence_text(&self) -> String {
        let mut s = self.provenance.raw_snippet.to_lowercase();
        s.push(' ');
        s.push_str(&self.value.to_display().to_lowercase());
        s
    }
}

/// A persisted fact: stage-1 output plus identity and audit fields.
/// Never deleted; only `is_selected` flips after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFact {
    pub id: Uuid,
    pub job_id: Uuid,
    #[serde(flatten)]
    pub fact: ExtractedFact,
    pub is_selected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportFact {
    pub fn from_extracted(job_id: Uuid, fact: ExtractedFact) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            fact,
            is_selected: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Verdict states for one `(fact_type, fact_domain)` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Resolved,
    Unagreed,
    Informational,
    Missing,
}

/// One step of the resolver's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: u32,
    pub action: String,
    pub observation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

/// Stage-2 verdict for one fact group.
///
/// Invariants (enforced by `resolve::validate_resolution`, never overridable
/// by a model):
/// - `Resolved` ⇒ `selected_fact_id` is set and that fact is accepted/final.
/// - `Unagreed`/`Missing` ⇒ `selected_fact_id` is None.
/// - A rejected/withdrawn/question fact is never the selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactResolution {
    pub fact_type: FactType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_fact_id: Option<Uuid>,
    pub state: ResolutionState,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_value: Option<FactValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_trace: Vec<ReasoningStep>,
    pub confidence: f32,
}

/// One input document. Immutable once its text is extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

impl Source {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            mime_type: None,
            text: text.into(),
        }
    }
}

/// A bounded-size slice of a source's text. Never persisted; consumed
/// immediately by extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub source_id: String,
    pub source_file_name: String,
    pub chunk_index: usize,
    pub text: String,
}

/// Clamp to [0.0, 1.0].
pub(crate) fn clamp01(x: f32) -> f32 {
    if x < 0.0 {
        0.0
    } else if x > 1.0 {
        1.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_type_wire_names_round_trip() {
        for ft in FactType::ALL {
            let json = serde_json::to_string(&ft).unwrap();
            assert_eq!(json, format!("\"{}\"", ft.as_str()));
            let back: FactType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, ft);
        }
    }

    #[test]
    fn sections_route_by_prefix() {
        assert_eq!(FactType::DealFee.section(), Section::Deal);
        assert_eq!(FactType::FlightSeat.section(), Section::Flights);
        assert_eq!(FactType::ContactEmail.section(), Section::Contacts);
        assert_eq!(FactType::HotelBookingReference.section(), Section::Hotels);
    }

    #[test]
    fn selectability_excludes_dead_statuses() {
        assert!(!FactStatus::Rejected.is_selectable());
        assert!(!FactStatus::Withdrawn.is_selectable());
        assert!(!FactStatus::Question.is_selectable());
        assert!(FactStatus::Offer.is_selectable());
        assert!(FactStatus::Final.is_selectable());
    }

    #[test]
    fn scope_priorities_are_ordered() {
        assert!(SourceScope::ContractMain.priority() > SourceScope::Itinerary.priority());
        assert!(SourceScope::Itinerary.priority() > SourceScope::Confirmation.priority());
        assert!(SourceScope::Confirmation.priority() > SourceScope::GeneralInfo.priority());
        assert!(SourceScope::GeneralInfo.priority() > SourceScope::RiderExample.priority());
        assert!(SourceScope::RiderExample.priority() > SourceScope::Unknown.priority());
    }

    #[test]
    fn number_values_render_without_trailing_zeros() {
        assert_eq!(FactValue::Number(5000.0).to_display(), "5000");
        assert_eq!(FactValue::Number(12.5).to_display(), "12.5");
    }
}
