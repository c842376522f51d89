// src/resolve/mod.rs
//! # Stage 2: resolution
//!
//! For each `(fact_type, fact_domain)` group, determine the canonical value.
//! Two paths produce a verdict:
//!
//! - an LLM resolver, whose output is passed through a validator that
//!   force-corrects any violation of the hard selection rules, and
//! - a deterministic rule-based state machine, used whenever the LLM call
//!   fails, returns unparsable output, or is unavailable.
//!
//! The hard rules hold regardless of path: a rejected/withdrawn/question
//! fact never wins, and only accepted/final facts can produce `resolved`.

pub mod confidence;

use metrics::counter;
use serde::Deserialize;
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::fact::{
    clamp01, FactResolution, FactStatus, FactType, FactValue, ImportFact, ReasoningStep,
    ResolutionState,
};
use crate::grouping::{group_facts_for_resolution, FactGroup};
use crate::normalize;

pub use confidence::{compute_fact_confidence, speaker_authority};

/// Input to stage 2: every persisted fact of one job.
pub struct ResolveRequest {
    pub job_id: Uuid,
    pub facts: Vec<ImportFact>,
}

/// Stage-2 output: one resolution per group plus the ids to flag as selected.
pub struct ResolveOutcome {
    pub resolutions: Vec<FactResolution>,
    pub selected_fact_ids: Vec<Uuid>,
}

struct Trace {
    steps: Vec<ReasoningStep>,
}

impl Trace {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }
    fn push(&mut self, action: &str, observation: String, conclusion: Option<String>) {
        self.steps.push(ReasoningStep {
            step: self.steps.len() as u32 + 1,
            action: action.to_string(),
            observation,
            conclusion,
        });
    }
}

fn normalized_final_value(fact: &ImportFact) -> FactValue {
    if fact.fact.fact_type == FactType::GeneralDate {
        match &fact.fact.value {
            FactValue::Date(s) | FactValue::Text(s) => {
                FactValue::Date(normalize::normalize_date_to_iso(s))
            }
            v => v.clone(),
        }
    } else {
        fact.fact.value.clone()
    }
}

fn base_resolution(group: &FactGroup) -> FactResolution {
    FactResolution {
        fact_type: group.fact_type,
        fact_domain: group.fact_domain.clone(),
        selected_fact_id: None,
        state: ResolutionState::Missing,
        reason: String::new(),
        final_value: None,
        reasoning_trace: Vec::new(),
        confidence: 0.0,
    }
}

/// Deterministic rule-based resolution: a pure transition function from a
/// fact group to a verdict. This is the path conformance tests exercise.
pub fn resolve_group(group: &FactGroup) -> FactResolution {
    let mut trace = Trace::new();
    let mut resolution = base_resolution(group);

    if group.facts.is_empty() {
        resolution.state = ResolutionState::Missing;
        resolution.reason = "no facts were extracted for this field".to_string();
        resolution.confidence = 0.8;
        return resolution;
    }

    // Step 1: drop statuses that can never win.
    let selectable: Vec<&ImportFact> = group
        .facts
        .iter()
        .filter(|f| f.fact.status.is_selectable())
        .collect();
    trace.push(
        "filter_selectable",
        format!(
            "{} of {} facts remain after removing rejected/withdrawn/question",
            selectable.len(),
            group.facts.len()
        ),
        None,
    );

    // Step 2: everything was rejected or withdrawn.
    if selectable.is_empty() {
        trace.push(
            "all_unselectable",
            "every fact in the group is rejected, withdrawn, or a question".to_string(),
            Some("unagreed".to_string()),
        );
        resolution.state = ResolutionState::Unagreed;
        resolution.reason = "all facts were rejected/withdrawn/question".to_string();
        resolution.confidence = 0.8;
        resolution.reasoning_trace = trace.steps;
        return resolution;
    }

    // Step 3: accepted/final facts win outright.
    let mut finalizable: Vec<&ImportFact> = selectable
        .iter()
        .copied()
        .filter(|f| f.fact.status.is_finalizable())
        .collect();
    if !finalizable.is_empty() {
        finalizable.sort_by(|a, b| {
            let scope = b
                .fact
                .source_scope
                .priority()
                .cmp(&a.fact.source_scope.priority());
            let authority = speaker_authority(b.fact.speaker_role, b.fact.fact_type)
                .cmp(&speaker_authority(a.fact.speaker_role, a.fact.fact_type));
            let conf = compute_fact_confidence(b, &group.facts)
                .total_cmp(&compute_fact_confidence(a, &group.facts));
            let recency = b
                .fact
                .provenance
                .message_index
                .cmp(&a.fact.provenance.message_index);
            scope.then(authority).then(conf).then(recency)
        });
        let winner = finalizable[0];
        trace.push(
            "select_finalizable",
            format!(
                "{} accepted/final candidate(s); best is '{}' from {}",
                finalizable.len(),
                winner.fact.value.to_display(),
                winner.fact.provenance.source_file_name
            ),
            Some("resolved".to_string()),
        );
        resolution.state = ResolutionState::Resolved;
        resolution.selected_fact_id = Some(winner.id);
        resolution.final_value = Some(normalized_final_value(winner));
        resolution.reason = format!(
            "selected {} fact from {}",
            if winner.fact.status == FactStatus::Final {
                "final"
            } else {
                "accepted"
            },
            winner.fact.provenance.source_file_name
        );
        resolution.confidence = compute_fact_confidence(winner, &group.facts);
        resolution.reasoning_trace = trace.steps;
        return resolution;
    }

    // Step 4: active negotiation. Counter-offers, or rejections anywhere in
    // the original group, mean nothing is settled.
    let has_counter = selectable
        .iter()
        .any(|f| f.fact.status == FactStatus::CounterOffer);
    let has_dead = group
        .facts
        .iter()
        .any(|f| matches!(f.fact.status, FactStatus::Rejected | FactStatus::Withdrawn));
    if has_counter || has_dead {
        trace.push(
            "detect_negotiation",
            format!("counter_offers={has_counter}, rejected_or_withdrawn={has_dead}"),
            Some("unagreed".to_string()),
        );
        resolution.state = ResolutionState::Unagreed;
        resolution.reason = "negotiation is still open; no accepted or final value".to_string();
        resolution.confidence = 0.7;
        resolution.reasoning_trace = trace.steps;
        return resolution;
    }

    // Step 5: plain info/unknown/bare offers with no negotiation evidence are
    // treated as a single confirmed data record.
    let mut candidates: Vec<&ImportFact> = selectable
        .iter()
        .copied()
        .filter(|f| {
            matches!(
                f.fact.status,
                FactStatus::Info | FactStatus::Unknown | FactStatus::Offer
            )
        })
        .collect();
    if !candidates.is_empty() {
        candidates.sort_by(|a, b| {
            let scope = b
                .fact
                .source_scope
                .priority()
                .cmp(&a.fact.source_scope.priority());
            let conf = compute_fact_confidence(b, &group.facts)
                .total_cmp(&compute_fact_confidence(a, &group.facts));
            scope.then(conf)
        });
        let best = candidates[0];
        trace.push(
            "select_informational",
            format!(
                "no negotiation evidence; best-supported value is '{}'",
                best.fact.value.to_display()
            ),
            Some("informational".to_string()),
        );
        resolution.state = ResolutionState::Informational;
        resolution.selected_fact_id = Some(best.id);
        resolution.final_value = Some(normalized_final_value(best));
        resolution.reason = "informational value with no negotiation in the group".to_string();
        resolution.confidence = compute_fact_confidence(best, &group.facts);
        resolution.reasoning_trace = trace.steps;
        return resolution;
    }

    // Step 6: nothing usable.
    trace.push(
        "nothing_usable",
        "no candidate survived the selection rules".to_string(),
        Some("missing".to_string()),
    );
    resolution.state = ResolutionState::Missing;
    resolution.reason = "no usable fact for this field".to_string();
    resolution.confidence = 0.8;
    resolution.reasoning_trace = trace.steps;
    resolution
}

/// Re-derive/repair a proposed resolution so the hard invariants hold no
/// matter what the model said. Returns the repaired resolution plus warnings
/// describing every correction applied.
pub fn validate_resolution(
    mut proposed: FactResolution,
    group: &FactGroup,
) -> (FactResolution, Vec<String>) {
    let mut warnings = Vec::new();

    // Identity fields always come from the group, not the model.
    proposed.fact_type = group.fact_type;
    proposed.fact_domain = group.fact_domain.clone();

    if let Some(id) = proposed.selected_fact_id {
        match group.facts.iter().find(|f| f.id == id) {
            None => {
                warnings.push(format!("resolver selected unknown fact id {id}; cleared"));
                proposed.selected_fact_id = None;
                proposed.state = ResolutionState::Unagreed;
                proposed.final_value = None;
            }
            Some(fact) if !fact.fact.status.is_selectable() => {
                warnings.push(format!(
                    "resolver selected a {:?} fact; forced unagreed",
                    fact.fact.status
                ));
                proposed.selected_fact_id = None;
                proposed.state = ResolutionState::Unagreed;
                proposed.final_value = None;
            }
            Some(fact) if fact.fact.status.is_finalizable() => {
                if proposed.state != ResolutionState::Resolved {
                    warnings.push(format!(
                        "resolver chose a finalizable fact but claimed {:?}; forced resolved",
                        proposed.state
                    ));
                    proposed.state = ResolutionState::Resolved;
                }
                if proposed.final_value.is_none() {
                    proposed.final_value = Some(normalized_final_value(fact));
                }
            }
            Some(fact) => {
                // Selectable but not finalizable: at most informational.
                if proposed.state != ResolutionState::Informational {
                    warnings.push(format!(
                        "resolver claimed {:?} with a non-finalizable selection; forced informational",
                        proposed.state
                    ));
                    proposed.state = ResolutionState::Informational;
                }
                if proposed.final_value.is_none() {
                    proposed.final_value = Some(normalized_final_value(fact));
                }
            }
        }
    } else if proposed.state == ResolutionState::Resolved
        || proposed.state == ResolutionState::Informational
    {
        warnings.push(format!(
            "resolver claimed {:?} without a selection; forced unagreed",
            proposed.state
        ));
        proposed.state = ResolutionState::Unagreed;
        proposed.final_value = None;
    }

    if proposed.state == ResolutionState::Unagreed || proposed.state == ResolutionState::Missing {
        proposed.selected_fact_id = None;
    }

    if proposed.confidence <= 0.0 {
        proposed.confidence = match proposed.selected_fact_id {
            Some(id) => group
                .facts
                .iter()
                .find(|f| f.id == id)
                .map(|f| compute_fact_confidence(f, &group.facts))
                .unwrap_or(0.5),
            None => 0.7,
        };
    }
    proposed.confidence = clamp01(proposed.confidence);

    (proposed, warnings)
}

// ------------------------------------------------------------
// LLM resolver path
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawReasoningStep {
    step: Option<u32>,
    action: Option<String>,
    observation: Option<String>,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResolution {
    selected_fact_id: Option<String>,
    state: Option<String>,
    reason: Option<String>,
    final_value_text: Option<serde_json::Value>,
    #[serde(default)]
    reasoning_trace: Vec<RawReasoningStep>,
    confidence: Option<f64>,
}

fn parse_state(raw: &str) -> Option<ResolutionState> {
    match normalize::compact(raw).as_str() {
        "resolved" => Some(ResolutionState::Resolved),
        "unagreed" => Some(ResolutionState::Unagreed),
        "informational" => Some(ResolutionState::Informational),
        "missing" => Some(ResolutionState::Missing),
        _ => None,
    }
}

fn build_resolver_system_prompt() -> &'static str {
    r#"You adjudicate conflicting claims extracted from live-show booking documents.

You receive one group of facts asserting values for the same field of the same
entity. Decide the canonical outcome and answer with a strict JSON object:
{"selected_fact_id": "<uuid or null>",
 "state": "resolved|unagreed|informational|missing",
 "reason": "<one sentence>",
 "final_value_text": "<normalized value or null>",
 "reasoning_trace": [{"step": 1, "action": "...", "observation": "...", "conclusion": "..."}],
 "confidence": 0.0}

Hard rules (violations are corrected server-side):
- Never select a fact whose status is rejected, withdrawn, or question.
- "resolved" requires the selected fact's status to be accepted or final.
- If negotiation is still open (counter-offers, rejections), state is
  "unagreed" and selected_fact_id is null.
- Plain informational values with no negotiation are "informational"."#
}

async fn resolve_group_with_llm(
    client: &dyn CompletionClient,
    group: &FactGroup,
) -> Option<FactResolution> {
    let facts_json = serde_json::to_string_pretty(&group.facts).ok()?;
    let user = format!(
        "Field: {} (domain: {})\nFacts:\n{}",
        group.fact_type.as_str(),
        group.fact_domain.as_deref().unwrap_or("-"),
        facts_json
    );

    let completion = client.complete(build_resolver_system_prompt(), &user).await;
    let content = completion.content?;
    let raw: RawResolution = serde_json::from_str(&content)
        .ok()
        .or_else(|| {
            crate::extract::recover_json_block(&content)
                .and_then(|b| serde_json::from_str(b).ok())
        })?;

    let mut resolution = base_resolution(group);
    resolution.selected_fact_id = raw
        .selected_fact_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok());
    resolution.state = raw.state.as_deref().and_then(parse_state)?;
    resolution.reason = raw.reason.unwrap_or_else(|| "model resolution".to_string());
    resolution.final_value = raw.final_value_text.and_then(|v| match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(FactValue::Text(s)),
        serde_json::Value::Number(n) => n.as_f64().map(FactValue::Number),
        _ => None,
    });
    resolution.reasoning_trace = raw
        .reasoning_trace
        .into_iter()
        .enumerate()
        .map(|(i, s)| ReasoningStep {
            step: s.step.unwrap_or(i as u32 + 1),
            action: s.action.unwrap_or_default(),
            observation: s.observation.unwrap_or_default(),
            conclusion: s.conclusion,
        })
        .collect();
    resolution.confidence = clamp01(raw.confidence.unwrap_or(0.0) as f32);
    Some(resolution)
}

/// Resolve every group of a job's facts.
///
/// The LLM path is attempted per group and validated; any failure falls back
/// to the rule-based machine, which is independently correct.
pub async fn resolve_import_facts(
    client: &dyn CompletionClient,
    req: ResolveRequest,
) -> ResolveOutcome {
    let groups = group_facts_for_resolution(req.facts);
    let mut resolutions = Vec::with_capacity(groups.len());
    let mut selected_fact_ids = Vec::new();

    for group in &groups {
        let resolution = if client.provider_name() == "disabled" {
            resolve_group(group)
        } else {
            match resolve_group_with_llm(client, group).await {
                Some(proposed) => {
                    let (validated, warnings) = validate_resolution(proposed, group);
                    for w in &warnings {
                        tracing::warn!(
                            job_id = %req.job_id,
                            fact_type = group.fact_type.as_str(),
                            warning = %w,
                            "resolution repaired"
                        );
                    }
                    validated
                }
                None => {
                    counter!("import_resolver_fallback_total").increment(1);
                    tracing::debug!(
                        fact_type = group.fact_type.as_str(),
                        "LLM resolution unavailable; using rule-based resolver"
                    );
                    resolve_group(group)
                }
            }
        };

        if let Some(id) = resolution.selected_fact_id {
            selected_fact_ids.push(id);
        }
        resolutions.push(resolution);
    }

    ResolveOutcome {
        resolutions,
        selected_fact_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{ExtractedFact, SourceScope};

    fn fee_fact(status: FactStatus, value: f64, msg: usize, scope: SourceScope) -> ImportFact {
        let mut f = ExtractedFact::new(FactType::DealFee, FactValue::Number(value));
        f.status = status;
        f.source_scope = scope;
        f.provenance.message_index = msg;
        f.provenance.source_file_name = "contract.pdf".to_string();
        ImportFact::from_extracted(Uuid::new_v4(), f)
    }

    fn group_of(facts: Vec<ImportFact>) -> FactGroup {
        FactGroup {
            fact_type: FactType::DealFee,
            fact_domain: None,
            facts,
        }
    }

    #[test]
    fn accepted_fact_resolves() {
        let f = fee_fact(FactStatus::Accepted, 5000.0, 0, SourceScope::ContractMain);
        let id = f.id;
        let r = resolve_group(&group_of(vec![f]));
        assert_eq!(r.state, ResolutionState::Resolved);
        assert_eq!(r.selected_fact_id, Some(id));
        assert_eq!(r.final_value, Some(FactValue::Number(5000.0)));
    }

    #[test]
    fn stalemate_is_unagreed() {
        let offer = fee_fact(FactStatus::Offer, 5000.0, 0, SourceScope::GeneralInfo);
        let counter = fee_fact(FactStatus::CounterOffer, 4000.0, 1, SourceScope::GeneralInfo);
        let r = resolve_group(&group_of(vec![offer, counter]));
        assert_eq!(r.state, ResolutionState::Unagreed);
        assert_eq!(r.selected_fact_id, None);
        assert!((r.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn all_rejected_is_unagreed() {
        let r1 = fee_fact(FactStatus::Rejected, 5000.0, 0, SourceScope::GeneralInfo);
        let r2 = fee_fact(FactStatus::Withdrawn, 4000.0, 1, SourceScope::GeneralInfo);
        let r = resolve_group(&group_of(vec![r1, r2]));
        assert_eq!(r.state, ResolutionState::Unagreed);
        assert_eq!(r.selected_fact_id, None);
        assert!((r.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn lone_offer_is_informational() {
        let offer = fee_fact(FactStatus::Offer, 5000.0, 0, SourceScope::GeneralInfo);
        let id = offer.id;
        let r = resolve_group(&group_of(vec![offer]));
        assert_eq!(r.state, ResolutionState::Informational);
        assert_eq!(r.selected_fact_id, Some(id));
    }

    #[test]
    fn offer_plus_rejection_elsewhere_is_unagreed() {
        let offer = fee_fact(FactStatus::Offer, 5000.0, 0, SourceScope::GeneralInfo);
        let rejection = fee_fact(FactStatus::Rejected, 4500.0, 1, SourceScope::GeneralInfo);
        let r = resolve_group(&group_of(vec![offer, rejection]));
        assert_eq!(r.state, ResolutionState::Unagreed);
        assert_eq!(r.selected_fact_id, None);
    }

    #[test]
    fn contract_scope_beats_rider_for_finalizable() {
        let rider = fee_fact(FactStatus::Accepted, 1000.0, 5, SourceScope::RiderExample);
        let contract = fee_fact(FactStatus::Accepted, 5000.0, 0, SourceScope::ContractMain);
        let contract_id = contract.id;
        let r = resolve_group(&group_of(vec![rider, contract]));
        assert_eq!(r.selected_fact_id, Some(contract_id));
    }

    #[test]
    fn resolved_date_is_normalized_to_iso() {
        let mut f = ExtractedFact::new(FactType::GeneralDate, FactValue::Date("15.06.2025".into()));
        f.status = FactStatus::Final;
        let fact = ImportFact::from_extracted(Uuid::new_v4(), f);
        let group = FactGroup {
            fact_type: FactType::GeneralDate,
            fact_domain: None,
            facts: vec![fact],
        };
        let r = resolve_group(&group);
        assert_eq!(r.final_value, Some(FactValue::Date("2025-06-15".into())));
    }

    #[test]
    fn empty_group_is_missing() {
        let r = resolve_group(&group_of(vec![]));
        assert_eq!(r.state, ResolutionState::Missing);
        assert_eq!(r.selected_fact_id, None);
    }

    #[test]
    fn validator_rejects_unselectable_choice() {
        let rejected = fee_fact(FactStatus::Rejected, 5000.0, 0, SourceScope::ContractMain);
        let id = rejected.id;
        let group = group_of(vec![rejected]);
        let mut proposed = base_resolution(&group);
        proposed.selected_fact_id = Some(id);
        proposed.state = ResolutionState::Resolved;
        let (fixed, warnings) = validate_resolution(proposed, &group);
        assert_eq!(fixed.state, ResolutionState::Unagreed);
        assert_eq!(fixed.selected_fact_id, None);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn validator_forces_resolved_for_finalizable_choice() {
        let accepted = fee_fact(FactStatus::Accepted, 5000.0, 0, SourceScope::ContractMain);
        let id = accepted.id;
        let group = group_of(vec![accepted]);
        let mut proposed = base_resolution(&group);
        proposed.selected_fact_id = Some(id);
        proposed.state = ResolutionState::Informational;
        let (fixed, warnings) = validate_resolution(proposed, &group);
        assert_eq!(fixed.state, ResolutionState::Resolved);
        assert_eq!(fixed.selected_fact_id, Some(id));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn validator_downgrades_resolved_without_selection() {
        let group = group_of(vec![fee_fact(
            FactStatus::Offer,
            5000.0,
            0,
            SourceScope::GeneralInfo,
        )]);
        let mut proposed = base_resolution(&group);
        proposed.state = ResolutionState::Resolved;
        let (fixed, warnings) = validate_resolution(proposed, &group);
        assert_eq!(fixed.state, ResolutionState::Unagreed);
        assert!(!warnings.is_empty());
    }

    #[tokio::test]
    async fn llm_path_is_validated_and_falls_back() {
        use crate::completion::MockCompletion;

        let accepted = fee_fact(FactStatus::Accepted, 5000.0, 0, SourceScope::ContractMain);
        let id = accepted.id;

        // Model claims informational for a finalizable fact: validator fixes it.
        let mock = MockCompletion::fixed(&format!(
            r#"{{"selected_fact_id": "{id}", "state": "informational", "reason": "x", "confidence": 0.9}}"#
        ));
        let outcome = resolve_import_facts(
            &mock,
            ResolveRequest {
                job_id: Uuid::new_v4(),
                facts: vec![accepted.clone()],
            },
        )
        .await;
        assert_eq!(outcome.resolutions[0].state, ResolutionState::Resolved);
        assert_eq!(outcome.selected_fact_ids, vec![id]);

        // Unparsable model output falls back to the rule-based machine.
        let garbage = MockCompletion::fixed("no json here");
        let outcome = resolve_import_facts(
            &garbage,
            ResolveRequest {
                job_id: Uuid::new_v4(),
                facts: vec![accepted],
            },
        )
        .await;
        assert_eq!(outcome.resolutions[0].state, ResolutionState::Resolved);
    }
}
