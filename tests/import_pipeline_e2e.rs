// tests/import_pipeline_e2e.rs
// End-to-end pipeline runs over the in-memory store with a mocked
// completion interface: extraction -> resolution -> application -> dedup.

use advance_import::completion::MockCompletion;
use advance_import::config::PipelineConfig;
use advance_import::flights::{DisabledFlightData, FixtureFlightData, FlightInfo};
use advance_import::jobs::{InMemoryJobStore, JobStore};
use advance_import::orchestrator::run_import;
use advance_import::Source;
use std::collections::HashMap;

async fn job_for(
    store: &InMemoryJobStore,
    sources: Vec<Source>,
) -> advance_import::ImportJobRecord {
    let id = store.create_import_job("org-1", sources).await.unwrap();
    store.get_import_job_by_id(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn minimal_contract_resolves_deal_fee() {
    let store = InMemoryJobStore::new();
    let job = job_for(
        &store,
        vec![Source::new(
            "s1",
            "contract.pdf",
            "Artist fee: $5000 USD, accepted.",
        )],
    )
    .await;

    // The mock answers every completion call with the same extraction JSON;
    // the resolver cannot parse it as a resolution and falls back to the
    // rule-based machine, which is the path under test.
    let mock = MockCompletion::fixed(
        r#"{"facts": [{
            "fact_type": "deal_fee",
            "value_number": 5000,
            "currency": "USD",
            "status": "accepted",
            "speaker_role": "promoter",
            "source_scope": "contract_main",
            "confidence": 0.9,
            "raw_snippet": "Artist fee: $5000 USD, accepted."
        }]}"#,
    );

    let (data, confidence) = run_import(
        &mock,
        &DisabledFlightData,
        &store,
        &job,
        &PipelineConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(data.deal.fee, "5000");
    assert!(confidence.contains_key("deal.fee"));
    assert!(confidence["deal.fee"].score() > 0.5);

    // The documents section is mechanical: one entry per source.
    assert_eq!(data.documents.len(), 1);
    assert_eq!(data.documents[0].category, "contract");
    assert_eq!(data.documents[0].file_name, "contract.pdf");

    // Deal type was derived by enrichment.
    assert_eq!(data.deal.deal_type, "guarantee");
}

#[tokio::test]
async fn flight_leg_grouping_produces_one_flight() {
    let store = InMemoryJobStore::new();
    let job = job_for(
        &store,
        vec![Source::new(
            "s1",
            "Turkish_Airlines_Booking_Confirmation.pdf",
            "Flight TK67, seat 12A",
        )],
    )
    .await;

    // The flight number arrives as an `offer` from a confirmation-named file:
    // the filename safety net upgrades it to `final` so it can resolve. The
    // seat arrives as an `other` fact; the post-processor upgrades it and the
    // flight-domain normalizer anchors it to TK67's leg via the snippet.
    let mock = MockCompletion::fixed(
        r#"{"facts": [
            {"fact_type": "flight_number", "value_text": "TK67", "status": "offer",
             "raw_snippet": "Flight TK67"},
            {"fact_type": "other", "value_text": "12A", "status": "final",
             "raw_snippet": "TK67 seat 12A"}
        ]}"#,
    );

    let flight_api = FixtureFlightData {
        by_number: HashMap::from([(
            "TK67".to_string(),
            FlightInfo {
                from_airport: Some("BER".to_string()),
                to_airport: Some("IST".to_string()),
                departure_time: Some("10:40".to_string()),
                arrival_time: Some("14:55".to_string()),
                aircraft: None,
            },
        )]),
    };

    let (data, confidence) = run_import(
        &mock,
        &flight_api,
        &store,
        &job,
        &PipelineConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(data.flights.len(), 1);
    assert_eq!(data.flights[0].flight_number, "TK67");
    assert_eq!(data.flights[0].seat, "12A");
    // Enrichment filled the blanks from the flight API.
    assert_eq!(data.flights[0].from_airport, "BER");
    assert_eq!(data.flights[0].to_airport, "IST");
    assert!(confidence.contains_key("flights[0].flightNumber"));
    assert!(confidence.contains_key("flights[0].seat"));
}

#[tokio::test]
async fn negotiation_stalemate_leaves_fee_empty() {
    let store = InMemoryJobStore::new();
    let job = job_for(
        &store,
        vec![Source::new(
            "s1",
            "emails.txt",
            "Offer: 5000. Reply: we could do 4000.",
        )],
    )
    .await;

    let mock = MockCompletion::fixed(
        r#"{"facts": [
            {"fact_type": "deal_fee", "value_number": 5000, "status": "offer",
             "raw_snippet": "Offer: 5000", "message_index": 0},
            {"fact_type": "deal_fee", "value_number": 4000, "status": "counter_offer",
             "raw_snippet": "we could do 4000"}
        ]}"#,
    );

    let (data, confidence) = run_import(
        &mock,
        &DisabledFlightData,
        &store,
        &job,
        &PipelineConfig::default(),
    )
    .await
    .unwrap();

    // Unagreed groups contribute nothing; the review UI flags the gap.
    assert!(data.deal.fee.is_empty());
    assert!(!confidence.contains_key("deal.fee"));
}

#[tokio::test]
async fn disabled_completion_still_produces_valid_record() {
    let store = InMemoryJobStore::new();
    let job = job_for(
        &store,
        vec![Source::new(
            "s1",
            "contract.pdf",
            "Artist fee: $5000 USD, accepted.\nContact tm@example.com",
        )],
    )
    .await;

    let (data, _confidence) = run_import(
        &advance_import::completion::DisabledCompletion,
        &DisabledFlightData,
        &store,
        &job,
        &PipelineConfig::default(),
    )
    .await
    .unwrap();

    // The local pattern extractor keeps the offline path useful.
    assert_eq!(data.deal.fee, "5000");
    assert_eq!(data.contacts.len(), 1);
    assert_eq!(data.contacts[0].email, "tm@example.com");
    assert_eq!(data.documents.len(), 1);
}

#[tokio::test]
async fn progress_is_reported_through_the_store() {
    let store = InMemoryJobStore::new();
    let job = job_for(&store, vec![Source::new("s1", "notes.txt", "hello world")]).await;

    let mock = MockCompletion::fixed(r#"{"facts": []}"#);
    run_import(
        &mock,
        &DisabledFlightData,
        &store,
        &job,
        &PipelineConfig::default(),
    )
    .await
    .unwrap();

    let refreshed = store.get_import_job_by_id(job.id).await.unwrap().unwrap();
    let progress = refreshed.progress.expect("progress written");
    assert_eq!(progress.sections_completed, progress.total_sections);
    assert_eq!(progress.current_section, "done");
}
