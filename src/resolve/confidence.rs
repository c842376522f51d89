// src/resolve/confidence.rs
//! Computed fact confidence and speaker authority.
//!
//! The model's self-reported confidence is kept for audit but superseded
//! here: confidence is recomputed from provenance (source scope), negotiation
//! status, who said it, agreement across the group, and contradiction by
//! later facts. This is the number the resolver sorts by.

use crate::fact::{clamp01, FactStatus, FactType, ImportFact, Section, SpeakerRole};

/// Per-fact-type weighting of which negotiating party to trust.
///
/// Deal terms come from the people negotiating them; logistics come from the
/// people executing them. The venue is authoritative about its own house,
/// nobody else's.
pub fn speaker_authority(role: SpeakerRole, fact_type: FactType) -> u8 {
    let section = fact_type.section();
    match section {
        Section::Deal => match role {
            SpeakerRole::ArtistAgent => 90,
            SpeakerRole::Promoter => 80,
            SpeakerRole::Artist => 70,
            SpeakerRole::Venue => 50,
            SpeakerRole::Production => 40,
            SpeakerRole::Unknown => 50,
        },
        Section::Technical => match role {
            SpeakerRole::Production => 90,
            SpeakerRole::Venue => 85,
            SpeakerRole::ArtistAgent => 60,
            SpeakerRole::Artist => 55,
            SpeakerRole::Promoter => 50,
            SpeakerRole::Unknown => 50,
        },
        Section::Flights | Section::Hotels => match role {
            SpeakerRole::Production => 85,
            SpeakerRole::ArtistAgent => 80,
            SpeakerRole::Promoter => 70,
            SpeakerRole::Artist => 60,
            SpeakerRole::Venue => 40,
            SpeakerRole::Unknown => 50,
        },
        _ => match role {
            SpeakerRole::ArtistAgent => 80,
            SpeakerRole::Promoter => 75,
            SpeakerRole::Production => 70,
            SpeakerRole::Venue => 65,
            SpeakerRole::Artist => 65,
            SpeakerRole::Unknown => 50,
        },
    }
}

const CONFIRMATION_PHRASES: [&str; 8] = [
    "agreed", "confirmed", "deal", "approved", "accepted", "signed", "final", "we accept",
];

fn position(f: &ImportFact) -> (usize, usize) {
    (f.fact.provenance.message_index, f.fact.provenance.chunk_index)
}

/// Compute the confidence of one fact in the context of its group.
///
/// Starts at 0.3 and accumulates:
/// - +0.1 × (source-scope priority / 100)
/// - status: +0.4 accepted/final, +0.2 info, +0.1 offer
/// - +0.15 × (speaker authority / 100)
/// - +0.05 per additional identical value in the group, capped at +0.15
/// - −0.2 when a later fact contradicts this one at equal-or-higher status
///   strength; −0.3 when a later fact is a rejection
/// - +0.15 when the snippet carries a confirmation phrase
///
/// Clamped to [0, 1].
pub fn compute_fact_confidence(fact: &ImportFact, group: &[ImportFact]) -> f32 {
    let mut score = 0.3f32;

    score += 0.1 * (fact.fact.source_scope.priority() as f32 / 100.0);

    score += match fact.fact.status {
        FactStatus::Accepted | FactStatus::Final => 0.4,
        FactStatus::Info => 0.2,
        FactStatus::Offer => 0.1,
        _ => 0.0,
    };

    score += 0.15 * (speaker_authority(fact.fact.speaker_role, fact.fact.fact_type) as f32 / 100.0);

    let own_value = fact.fact.value.to_display();
    let repeats = group
        .iter()
        .filter(|g| g.id != fact.id && g.fact.value.to_display() == own_value)
        .count();
    score += (0.05 * repeats as f32).min(0.15);

    let own_pos = position(fact);
    let own_strength = fact.fact.status.strength();
    for later in group.iter().filter(|g| position(g) > own_pos) {
        if matches!(later.fact.status, FactStatus::Rejected) {
            score -= 0.3;
        } else if later.fact.value.to_display() != own_value
            && later.fact.status.strength() >= own_strength
        {
            score -= 0.2;
        }
    }

    let snippet = fact.fact.provenance.raw_snippet.to_lowercase();
    if CONFIRMATION_PHRASES.iter().any(|p| snippet.contains(p)) {
        score += 0.15;
    }

    clamp01(score)
}
