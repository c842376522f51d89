// tests/resolver_invariants.rs
// Hard resolver invariants, swept over every status combination the
// extractor can produce. These hold for the rule-based machine and for
// anything the validator lets through.

use advance_import::fact::{
    ExtractedFact, FactResolution, FactStatus, FactType, FactValue, ImportFact, ResolutionState,
    SourceScope,
};
use advance_import::grouping::FactGroup;
use advance_import::resolve::{resolve_group, validate_resolution};
use uuid::Uuid;

const ALL_STATUSES: [FactStatus; 9] = [
    FactStatus::Offer,
    FactStatus::CounterOffer,
    FactStatus::Accepted,
    FactStatus::Rejected,
    FactStatus::Withdrawn,
    FactStatus::Info,
    FactStatus::Question,
    FactStatus::Final,
    FactStatus::Unknown,
];

fn fact_with(status: FactStatus, value: &str, msg: usize) -> ImportFact {
    let mut f = ExtractedFact::new(FactType::DealFee, FactValue::Text(value.to_string()));
    f.status = status;
    f.source_scope = SourceScope::GeneralInfo;
    f.provenance.message_index = msg;
    ImportFact::from_extracted(Uuid::new_v4(), f)
}

fn group_of(facts: Vec<ImportFact>) -> FactGroup {
    FactGroup {
        fact_type: FactType::DealFee,
        fact_domain: None,
        facts,
    }
}

fn assert_invariants(resolution: &FactResolution, group: &FactGroup) {
    // Rejected/withdrawn/question facts are never selected.
    if let Some(id) = resolution.selected_fact_id {
        let selected = group
            .facts
            .iter()
            .find(|f| f.id == id)
            .expect("selection references a fact in the group");
        assert!(
            selected.fact.status.is_selectable(),
            "selected a {:?} fact",
            selected.fact.status
        );
        // Resolved iff the selection is finalizable.
        match resolution.state {
            ResolutionState::Resolved => assert!(selected.fact.status.is_finalizable()),
            ResolutionState::Informational => assert!(!selected.fact.status.is_finalizable()),
            other => panic!("selection present in state {other:?}"),
        }
    } else {
        assert_ne!(resolution.state, ResolutionState::Resolved);
        assert_ne!(resolution.state, ResolutionState::Informational);
    }
    assert!((0.0..=1.0).contains(&resolution.confidence));
}

#[test]
fn invariants_hold_for_all_status_pairs() {
    for a in ALL_STATUSES {
        for b in ALL_STATUSES {
            let group = group_of(vec![fact_with(a, "5000", 0), fact_with(b, "4000", 1)]);
            let resolution = resolve_group(&group);
            assert_invariants(&resolution, &group);
        }
    }
}

#[test]
fn invariants_hold_for_all_status_triples() {
    for a in ALL_STATUSES {
        for b in ALL_STATUSES {
            for c in ALL_STATUSES {
                let group = group_of(vec![
                    fact_with(a, "5000", 0),
                    fact_with(b, "4000", 1),
                    fact_with(c, "5000", 2),
                ]);
                let resolution = resolve_group(&group);
                assert_invariants(&resolution, &group);
            }
        }
    }
}

#[test]
fn finalizable_presence_implies_resolved() {
    for a in ALL_STATUSES {
        let group = group_of(vec![
            fact_with(a, "4000", 0),
            fact_with(FactStatus::Accepted, "5000", 1),
        ]);
        let resolution = resolve_group(&group);
        assert_eq!(resolution.state, ResolutionState::Resolved);
        assert_invariants(&resolution, &group);
    }
}

#[test]
fn validator_never_lets_a_violation_through() {
    // Adversarial proposals: every (claimed state, selected fact) combination.
    let states = [
        ResolutionState::Resolved,
        ResolutionState::Unagreed,
        ResolutionState::Informational,
        ResolutionState::Missing,
    ];
    for fact_status in ALL_STATUSES {
        let fact = fact_with(fact_status, "5000", 0);
        let fact_id = fact.id;
        let group = group_of(vec![fact]);
        for claimed in states {
            for selection in [Some(fact_id), Some(Uuid::new_v4()), None] {
                let proposed = FactResolution {
                    fact_type: FactType::DealFee,
                    fact_domain: None,
                    selected_fact_id: selection,
                    state: claimed,
                    reason: "adversarial".to_string(),
                    final_value: None,
                    reasoning_trace: Vec::new(),
                    confidence: 0.0,
                };
                let (validated, _warnings) = validate_resolution(proposed, &group);
                assert_invariants(&validated, &group);
            }
        }
    }
}
