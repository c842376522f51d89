// tests/extraction_context.rs
// Rolling fact context across chunk boundaries: facts from earlier chunks of
// a source are threaded into later chunk prompts so counter-offers spanning
// chunks stay detectable.

use std::sync::Mutex;

use advance_import::completion::{Completion, CompletionClient};
use advance_import::config::PipelineConfig;
use advance_import::extract::extract_facts_from_source;
use advance_import::Source;
use async_trait::async_trait;

/// Records every user prompt and plays a script of responses.
struct CapturingClient {
    prompts: Mutex<Vec<String>>,
    responses: Mutex<Vec<String>>,
}

#[async_trait]
impl CompletionClient for CapturingClient {
    async fn complete(&self, _system: &str, user: &str) -> Completion {
        self.prompts.lock().unwrap().push(user.to_string());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| r#"{"facts": []}"#.to_string());
        Completion {
            content: Some(next),
            error: None,
        }
    }
    fn provider_name(&self) -> &'static str {
        "capture"
    }
}

#[tokio::test]
async fn earlier_facts_flow_into_later_chunk_prompts() {
    // Two chunks: the first yields a fee offer, the second gets it as context.
    let words: Vec<String> = (0..12).map(|i| format!("word{i}")).collect();
    let source = Source::new("s1", "emails.txt", words.join(" "));

    let client = CapturingClient {
        prompts: Mutex::new(Vec::new()),
        responses: Mutex::new(vec![
            // Popped in reverse order: first response last.
            r#"{"facts": []}"#.to_string(),
            r#"{"facts": [{"fact_type": "deal_fee", "value_number": 5000,
                "status": "offer", "raw_snippet": "fee 5000"}]}"#
                .to_string(),
        ]),
    };

    let cfg = PipelineConfig {
        chunk_max_words: 6,
        chunk_min_words: 2,
        ..Default::default()
    };
    let out = extract_facts_from_source(&client, &source, 0, None, &cfg).await;
    assert_eq!(out.facts.len(), 1);

    let prompts = client.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    // The first prompt has no context block; the second carries the fee fact.
    assert!(!prompts[0].contains("deal_fee = 5000"));
    assert!(prompts[1].contains("deal_fee = 5000"));
    assert!(prompts[1].contains("[status: offer]"));
}

#[tokio::test]
async fn context_window_is_bounded() {
    let words: Vec<String> = (0..12).map(|i| format!("word{i}")).collect();
    let source = Source::new("s1", "emails.txt", words.join(" "));

    // 30 facts in chunk one; only the trailing window may appear in chunk two.
    let many_facts: Vec<String> = (0..30)
        .map(|i| {
            format!(
                r#"{{"fact_type": "other", "value_text": "item{i}", "raw_snippet": "x"}}"#
            )
        })
        .collect();
    let first_response = format!(r#"{{"facts": [{}]}}"#, many_facts.join(","));

    let client = CapturingClient {
        prompts: Mutex::new(Vec::new()),
        responses: Mutex::new(vec![r#"{"facts": []}"#.to_string(), first_response]),
    };

    let cfg = PipelineConfig {
        chunk_max_words: 6,
        chunk_min_words: 2,
        rolling_context_facts: 20,
        ..Default::default()
    };
    let out = extract_facts_from_source(&client, &source, 0, None, &cfg).await;
    assert_eq!(out.facts.len(), 30);

    let prompts = client.prompts.lock().unwrap();
    // Oldest facts fall out of the 20-fact window.
    assert!(!prompts[1].contains("item0"));
    assert!(!prompts[1].contains("item9 "));
    assert!(prompts[1].contains("item29"));
    assert!(prompts[1].contains("item10"));
}
