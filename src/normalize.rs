// src/normalize.rs
//! # Enum normalization
//!
//! The model returns enum-like fields as free text. Every such field goes
//! through a dedicated normalizer that:
//!
//! 1. lowercases and strips non-alphanumeric characters,
//! 2. checks membership in the valid set,
//! 3. checks a hand-maintained alias table (e.g. `"pnr"` → flight booking
//!    reference),
//! 4. only then falls back to `other`/`unknown`, logging a diagnostic.
//!
//! Misses that look flight- or contact-related are logged as "important" to
//! drive alias-table maintenance; everything else is debug-level noise.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use strsim::normalized_levenshtein;

use crate::fact::{Direction, FactStatus, FactType, SourceScope, SpeakerRole};

/// Compact form used for membership and alias lookup: lowercase, alphanumeric
/// only. `"Counter-Offer"` and `"counter_offer"` both become `"counteroffer"`.
pub fn compact(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// A normalization miss worth recording. Logged with structured fields so
/// alias tables can be maintained from production logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationMiss {
    pub field: &'static str,
    pub raw: String,
    pub fallback: &'static str,
    pub important: bool,
    pub nearest: Option<String>,
}

impl NormalizationMiss {
    fn emit(self) {
        if self.important {
            tracing::warn!(
                field = self.field,
                raw = %self.raw,
                fallback = self.fallback,
                nearest = self.nearest.as_deref().unwrap_or(""),
                "unknown enum value (important: looks flight/contact-related)"
            );
        } else {
            tracing::debug!(
                field = self.field,
                raw = %self.raw,
                fallback = self.fallback,
                nearest = self.nearest.as_deref().unwrap_or(""),
                "unknown enum value"
            );
        }
    }
}

fn looks_important(raw: &str) -> bool {
    let c = compact(raw);
    ["flight", "pnr", "booking", "ticket", "seat", "airline", "contact", "email", "phone"]
        .iter()
        .any(|k| c.contains(k))
}

/// Nearest known wire name, for "did you mean" in diagnostics.
fn nearest_of<'a>(raw: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    let c = compact(raw);
    let mut best: Option<(f64, &str)> = None;
    for cand in candidates {
        let sim = normalized_levenshtein(&c, &compact(cand));
        if best.map(|(b, _)| sim > b).unwrap_or(true) {
            best = Some((sim, cand));
        }
    }
    best.filter(|(sim, _)| *sim >= 0.6).map(|(_, s)| s.to_string())
}

static FACT_TYPE_BY_COMPACT: Lazy<HashMap<String, FactType>> = Lazy::new(|| {
    FactType::ALL
        .iter()
        .map(|ft| (compact(ft.as_str()), *ft))
        .collect()
});

static FACT_TYPE_ALIASES: Lazy<HashMap<&'static str, FactType>> = Lazy::new(|| {
    HashMap::from([
        // flight
        ("pnr", FactType::FlightBookingReference),
        ("bookingreference", FactType::FlightBookingReference),
        ("flightbookingref", FactType::FlightBookingReference),
        ("recordlocator", FactType::FlightBookingReference),
        ("flightno", FactType::FlightNumber),
        ("flightflightnumber", FactType::FlightNumber),
        ("flightnum", FactType::FlightNumber),
        ("eticket", FactType::FlightTicketNumber),
        ("ticketnumber", FactType::FlightTicketNumber),
        ("flightticket", FactType::FlightTicketNumber),
        ("seatnumber", FactType::FlightSeat),
        ("seatassignment", FactType::FlightSeat),
        ("cabinclass", FactType::FlightTravelClass),
        ("travelclass", FactType::FlightTravelClass),
        ("class", FactType::FlightTravelClass),
        ("passengername", FactType::FlightFullName),
        ("passenger", FactType::FlightFullName),
        ("departureairport", FactType::FlightFromAirport),
        ("origin", FactType::FlightFromAirport),
        ("arrivalairport", FactType::FlightToAirport),
        ("destination", FactType::FlightToAirport),
        ("departure", FactType::FlightDepartureTime),
        ("arrival", FactType::FlightArrivalTime),
        // deal
        ("fee", FactType::DealFee),
        ("artistfee", FactType::DealFee),
        ("guarantee", FactType::DealFee),
        ("dealfee", FactType::DealFee),
        ("dealtype", FactType::DealType),
        ("paymentterms", FactType::DealPaymentTerms),
        ("payment", FactType::DealPaymentTerms),
        ("bonus", FactType::DealBonus),
        ("currency", FactType::DealCurrency),
        // general
        ("artist", FactType::GeneralArtist),
        ("artistname", FactType::GeneralArtist),
        ("act", FactType::GeneralArtist),
        ("venue", FactType::GeneralVenue),
        ("venuename", FactType::GeneralVenue),
        ("city", FactType::GeneralCity),
        ("showdate", FactType::GeneralDate),
        ("eventdate", FactType::GeneralDate),
        ("date", FactType::GeneralDate),
        ("settime", FactType::GeneralSetTime),
        ("showtime", FactType::GeneralSetTime),
        ("doors", FactType::GeneralDoorsTime),
        ("doorstime", FactType::GeneralDoorsTime),
        ("eventname", FactType::GeneralEventName),
        ("festival", FactType::GeneralEventName),
        // hotel
        ("hotel", FactType::HotelName),
        ("hotelname", FactType::HotelName),
        ("checkin", FactType::HotelCheckInDate),
        ("checkindate", FactType::HotelCheckInDate),
        ("checkout", FactType::HotelCheckOutDate),
        ("checkoutdate", FactType::HotelCheckOutDate),
        ("roomtype", FactType::HotelRoomType),
        ("hotelbookingref", FactType::HotelBookingReference),
        ("confirmationnumber", FactType::HotelBookingReference),
        // contact
        ("email", FactType::ContactEmail),
        ("emailaddress", FactType::ContactEmail),
        ("phone", FactType::ContactPhone),
        ("phonenumber", FactType::ContactPhone),
        ("mobile", FactType::ContactPhone),
        ("contactperson", FactType::ContactName),
        ("name", FactType::ContactName),
        ("role", FactType::ContactRole),
        ("position", FactType::ContactRole),
        // food
        ("catering", FactType::FoodCatering),
        ("buyout", FactType::FoodBuyout),
        ("dietary", FactType::FoodDietary),
        ("allergies", FactType::FoodDietary),
        // technical
        ("backline", FactType::TechnicalBackline),
        ("soundcheck", FactType::TechnicalSound),
        ("sound", FactType::TechnicalSound),
        ("stage", FactType::TechnicalStage),
        ("rider", FactType::TechnicalRiderNotes),
    ])
});

/// Normalize a raw `fact_type` string. Falls back to `Other`.
pub fn normalize_fact_type(raw: &str) -> FactType {
    let c = compact(raw);
    if let Some(ft) = FACT_TYPE_BY_COMPACT.get(&c) {
        return *ft;
    }
    if let Some(ft) = FACT_TYPE_ALIASES.get(c.as_str()) {
        return *ft;
    }
    NormalizationMiss {
        field: "fact_type",
        raw: raw.to_string(),
        fallback: FactType::Other.as_str(),
        important: looks_important(raw),
        nearest: nearest_of(raw, FactType::ALL.iter().map(|t| t.as_str())),
    }
    .emit();
    FactType::Other
}

static STATUS_ALIASES: Lazy<HashMap<&'static str, FactStatus>> = Lazy::new(|| {
    HashMap::from([
        ("offered", FactStatus::Offer),
        ("proposal", FactStatus::Offer),
        ("proposed", FactStatus::Offer),
        ("counter", FactStatus::CounterOffer),
        ("countered", FactStatus::CounterOffer),
        ("agreed", FactStatus::Accepted),
        ("confirmed", FactStatus::Accepted),
        ("approved", FactStatus::Accepted),
        ("declined", FactStatus::Rejected),
        ("refused", FactStatus::Rejected),
        ("cancelled", FactStatus::Withdrawn),
        ("canceled", FactStatus::Withdrawn),
        ("retracted", FactStatus::Withdrawn),
        ("information", FactStatus::Info),
        ("informational", FactStatus::Info),
        ("fyi", FactStatus::Info),
        ("asking", FactStatus::Question),
        ("inquiry", FactStatus::Question),
        ("booked", FactStatus::Final),
        ("finalized", FactStatus::Final),
        ("signed", FactStatus::Final),
    ])
});

const STATUS_SET: [(FactStatus, &str); 9] = [
    (FactStatus::Offer, "offer"),
    (FactStatus::CounterOffer, "counteroffer"),
    (FactStatus::Accepted, "accepted"),
    (FactStatus::Rejected, "rejected"),
    (FactStatus::Withdrawn, "withdrawn"),
    (FactStatus::Info, "info"),
    (FactStatus::Question, "question"),
    (FactStatus::Final, "final"),
    (FactStatus::Unknown, "unknown"),
];

pub fn normalize_status(raw: &str) -> FactStatus {
    let c = compact(raw);
    for (st, name) in STATUS_SET {
        if c == name {
            return st;
        }
    }
    if let Some(st) = STATUS_ALIASES.get(c.as_str()) {
        return *st;
    }
    NormalizationMiss {
        field: "status",
        raw: raw.to_string(),
        fallback: "unknown",
        important: looks_important(raw),
        nearest: nearest_of(raw, STATUS_SET.iter().map(|(_, n)| *n)),
    }
    .emit();
    FactStatus::Unknown
}

const DIRECTION_SET: [(Direction, &str); 6] = [
    (Direction::WePay, "wepay"),
    (Direction::TheyPay, "theypay"),
    (Direction::Included, "included"),
    (Direction::ExternalCost, "externalcost"),
    (Direction::Split, "split"),
    (Direction::Unknown, "unknown"),
];

static DIRECTION_ALIASES: Lazy<HashMap<&'static str, Direction>> = Lazy::new(|| {
    HashMap::from([
        ("artistpays", Direction::WePay),
        ("ourcost", Direction::WePay),
        ("promoterpays", Direction::TheyPay),
        ("venuepays", Direction::TheyPay),
        ("covered", Direction::Included),
        ("inclusive", Direction::Included),
        ("external", Direction::ExternalCost),
        ("thirdparty", Direction::ExternalCost),
        ("shared", Direction::Split),
        ("5050", Direction::Split),
    ])
});

pub fn normalize_direction(raw: &str) -> Direction {
    let c = compact(raw);
    for (d, name) in DIRECTION_SET {
        if c == name {
            return d;
        }
    }
    if let Some(d) = DIRECTION_ALIASES.get(c.as_str()) {
        return *d;
    }
    NormalizationMiss {
        field: "direction",
        raw: raw.to_string(),
        fallback: "unknown",
        important: false,
        nearest: nearest_of(raw, DIRECTION_SET.iter().map(|(_, n)| *n)),
    }
    .emit();
    Direction::Unknown
}

const SPEAKER_SET: [(SpeakerRole, &str); 6] = [
    (SpeakerRole::Artist, "artist"),
    (SpeakerRole::ArtistAgent, "artistagent"),
    (SpeakerRole::Promoter, "promoter"),
    (SpeakerRole::Venue, "venue"),
    (SpeakerRole::Production, "production"),
    (SpeakerRole::Unknown, "unknown"),
];

static SPEAKER_ALIASES: Lazy<HashMap<&'static str, SpeakerRole>> = Lazy::new(|| {
    HashMap::from([
        ("agent", SpeakerRole::ArtistAgent),
        ("agency", SpeakerRole::ArtistAgent),
        ("management", SpeakerRole::ArtistAgent),
        ("manager", SpeakerRole::ArtistAgent),
        ("band", SpeakerRole::Artist),
        ("performer", SpeakerRole::Artist),
        ("buyer", SpeakerRole::Promoter),
        ("organizer", SpeakerRole::Promoter),
        ("organiser", SpeakerRole::Promoter),
        ("festival", SpeakerRole::Promoter),
        ("club", SpeakerRole::Venue),
        ("house", SpeakerRole::Venue),
        ("tourmanager", SpeakerRole::Production),
        ("crew", SpeakerRole::Production),
        ("productionmanager", SpeakerRole::Production),
    ])
});

pub fn normalize_speaker_role(raw: &str) -> SpeakerRole {
    let c = compact(raw);
    for (r, name) in SPEAKER_SET {
        if c == name {
            return r;
        }
    }
    if let Some(r) = SPEAKER_ALIASES.get(c.as_str()) {
        return *r;
    }
    NormalizationMiss {
        field: "speaker_role",
        raw: raw.to_string(),
        fallback: "unknown",
        important: false,
        nearest: nearest_of(raw, SPEAKER_SET.iter().map(|(_, n)| *n)),
    }
    .emit();
    SpeakerRole::Unknown
}

const SCOPE_SET: [(SourceScope, &str); 6] = [
    (SourceScope::ContractMain, "contractmain"),
    (SourceScope::Itinerary, "itinerary"),
    (SourceScope::Confirmation, "confirmation"),
    (SourceScope::RiderExample, "riderexample"),
    (SourceScope::GeneralInfo, "generalinfo"),
    (SourceScope::Unknown, "unknown"),
];

static SCOPE_ALIASES: Lazy<HashMap<&'static str, SourceScope>> = Lazy::new(|| {
    HashMap::from([
        ("contract", SourceScope::ContractMain),
        ("agreement", SourceScope::ContractMain),
        ("maincontract", SourceScope::ContractMain),
        ("schedule", SourceScope::Itinerary),
        ("runofshow", SourceScope::Itinerary),
        ("daysheet", SourceScope::Itinerary),
        ("booking", SourceScope::Confirmation),
        ("bookingconfirmation", SourceScope::Confirmation),
        ("ticket", SourceScope::Confirmation),
        ("rider", SourceScope::RiderExample),
        ("techrider", SourceScope::RiderExample),
        ("hospitalityrider", SourceScope::RiderExample),
        ("general", SourceScope::GeneralInfo),
        ("info", SourceScope::GeneralInfo),
        ("email", SourceScope::GeneralInfo),
    ])
});

pub fn normalize_source_scope(raw: &str) -> SourceScope {
    let c = compact(raw);
    for (s, name) in SCOPE_SET {
        if c == name {
            return s;
        }
    }
    if let Some(s) = SCOPE_ALIASES.get(c.as_str()) {
        return *s;
    }
    NormalizationMiss {
        field: "source_scope",
        raw: raw.to_string(),
        fallback: "unknown",
        important: false,
        nearest: nearest_of(raw, SCOPE_SET.iter().map(|(_, n)| *n)),
    }
    .emit();
    SourceScope::Unknown
}

/// Filename-based scope fallback for when the model omits `source_scope`.
pub fn scope_from_file_name(file_name: &str) -> SourceScope {
    static RE: Lazy<Vec<(regex::Regex, SourceScope)>> = Lazy::new(|| {
        vec![
            (
                regex::Regex::new(r"(?i)rider").unwrap(),
                SourceScope::RiderExample,
            ),
            (
                regex::Regex::new(r"(?i)itinerary|schedule|run[-_ ]?of[-_ ]?show").unwrap(),
                SourceScope::Itinerary,
            ),
            (
                regex::Regex::new(r"(?i)flight|booking|confirmation|ticket|pnr").unwrap(),
                SourceScope::Confirmation,
            ),
            (
                regex::Regex::new(r"(?i)contract|agreement|offer").unwrap(),
                SourceScope::ContractMain,
            ),
        ]
    });
    for (re, scope) in RE.iter() {
        if re.is_match(file_name) {
            return *scope;
        }
    }
    SourceScope::Unknown
}

/// Filenames that indicate a confirmation document for the status safety net.
pub fn is_confirmation_file_name(file_name: &str) -> bool {
    static RE: Lazy<regex::Regex> = Lazy::new(|| {
        regex::Regex::new(
            r"(?i)booking|confirmation|e[-_ ]?ticket|boarding[-_ ]?pass|pnr|reservation|itinerary[-_ ]?receipt",
        )
        .unwrap()
    });
    RE.is_match(file_name)
}

static MONTHS: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        ("jan", 1), ("january", 1),
        ("feb", 2), ("february", 2),
        ("mar", 3), ("march", 3),
        ("apr", 4), ("april", 4),
        ("may", 5),
        ("jun", 6), ("june", 6),
        ("jul", 7), ("july", 7),
        ("aug", 8), ("august", 8),
        ("sep", 9), ("sept", 9), ("september", 9),
        ("oct", 10), ("october", 10),
        ("nov", 11), ("november", 11),
        ("dec", 12), ("december", 12),
    ])
});

/// Best-effort ISO date normalization for resolved date values.
///
/// Recognizes `DD.MM.YYYY` (also `/` and `-` separators), `DD Month YYYY`,
/// and `Month DD, YYYY`. Unrecognized formats pass through unchanged.
pub fn normalize_date_to_iso(raw: &str) -> String {
    let s = raw.trim();

    static RE_DOTTED: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"^(\d{1,2})[./-](\d{1,2})[./-](\d{4})$").unwrap());
    if let Some(c) = RE_DOTTED.captures(s) {
        let (d, m, y) = (&c[1], &c[2], &c[3]);
        if let (Ok(d), Ok(m)) = (d.parse::<u32>(), m.parse::<u32>()) {
            if (1..=31).contains(&d) && (1..=12).contains(&m) {
                return format!("{y}-{m:02}-{d:02}");
            }
        }
    }

    static RE_DM_Y: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"^(\d{1,2})\.?\s+([A-Za-z]+),?\s+(\d{4})$").unwrap());
    if let Some(c) = RE_DM_Y.captures(s) {
        if let Some(&m) = MONTHS.get(c[2].to_ascii_lowercase().as_str()) {
            if let Ok(d) = c[1].parse::<u32>() {
                if (1..=31).contains(&d) {
                    return format!("{}-{m:02}-{d:02}", &c[3]);
                }
            }
        }
    }

    static RE_M_DY: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})$").unwrap());
    if let Some(c) = RE_M_DY.captures(s) {
        if let Some(&m) = MONTHS.get(c[1].to_ascii_lowercase().as_str()) {
            if let Ok(d) = c[2].parse::<u32>() {
                if (1..=31).contains(&d) {
                    return format!("{}-{m:02}-{d:02}", &c[3]);
                }
            }
        }
    }

    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_strips_noise() {
        assert_eq!(compact("Counter-Offer"), "counteroffer");
        assert_eq!(compact("  flight_number "), "flightnumber");
    }

    #[test]
    fn fact_type_exact_and_alias() {
        assert_eq!(normalize_fact_type("deal_fee"), FactType::DealFee);
        assert_eq!(normalize_fact_type("Deal Fee"), FactType::DealFee);
        assert_eq!(normalize_fact_type("PNR"), FactType::FlightBookingReference);
        assert_eq!(normalize_fact_type("record locator"), FactType::FlightBookingReference);
        assert_eq!(normalize_fact_type("made_up_thing"), FactType::Other);
    }

    #[test]
    fn camel_case_wire_names_still_land() {
        // Models trained on camelCase schemas keep emitting them.
        assert_eq!(normalize_fact_type("flight_flightNumber"), FactType::FlightNumber);
        assert_eq!(normalize_fact_type("flightNumber"), FactType::FlightNumber);
    }

    #[test]
    fn status_aliases() {
        assert_eq!(normalize_status("accepted"), FactStatus::Accepted);
        assert_eq!(normalize_status("Confirmed"), FactStatus::Accepted);
        assert_eq!(normalize_status("counter-offer"), FactStatus::CounterOffer);
        assert_eq!(normalize_status("signed"), FactStatus::Final);
        assert_eq!(normalize_status("???"), FactStatus::Unknown);
    }

    #[test]
    fn scope_from_file_names() {
        assert_eq!(scope_from_file_name("Tech_Rider_2025.pdf"), SourceScope::RiderExample);
        assert_eq!(scope_from_file_name("tour-itinerary.docx"), SourceScope::Itinerary);
        assert_eq!(scope_from_file_name("TK_Booking_Confirmation.pdf"), SourceScope::Confirmation);
        assert_eq!(scope_from_file_name("performance agreement.pdf"), SourceScope::ContractMain);
        assert_eq!(scope_from_file_name("notes.txt"), SourceScope::Unknown);
    }

    #[test]
    fn rider_wins_over_contract_in_file_names() {
        // "rider_agreement.pdf" matches both patterns; rider is checked first.
        assert_eq!(scope_from_file_name("rider_agreement.pdf"), SourceScope::RiderExample);
    }

    #[test]
    fn confirmation_file_names() {
        assert!(is_confirmation_file_name("Turkish_Airlines_Booking_Confirmation.pdf"));
        assert!(is_confirmation_file_name("e-ticket_12345.pdf"));
        assert!(is_confirmation_file_name("BoardingPass.pdf"));
        assert!(!is_confirmation_file_name("contract.pdf"));
    }

    #[test]
    fn iso_dates() {
        assert_eq!(normalize_date_to_iso("15.06.2025"), "2025-06-15");
        assert_eq!(normalize_date_to_iso("15/06/2025"), "2025-06-15");
        assert_eq!(normalize_date_to_iso("15 June 2025"), "2025-06-15");
        assert_eq!(normalize_date_to_iso("June 15, 2025"), "2025-06-15");
        assert_eq!(normalize_date_to_iso("Jun 3rd, 2025"), "2025-06-03");
        assert_eq!(normalize_date_to_iso("2025-06-15"), "2025-06-15");
        assert_eq!(normalize_date_to_iso("next Friday"), "next Friday");
    }
}
