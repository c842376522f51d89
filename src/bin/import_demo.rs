//! Demo that runs booking documents through the import pipeline and prints
//! the resulting record. Without OPENAI_API_KEY the deterministic local
//! extractor takes over, so this works offline.
//!
//! Usage: import_demo <file1.txt> [file2.txt ...]

use std::sync::Arc;

use advance_import::flights::DisabledFlightData;
use advance_import::{
    build_completion_client, ImportWorker, InMemoryJobStore, JobStore, Source,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: import_demo <file1.txt> [file2.txt ...]");
        std::process::exit(2);
    }

    let mut sources = Vec::new();
    for (i, path) in paths.iter().enumerate() {
        let text = std::fs::read_to_string(path)?;
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        sources.push(Source::new(format!("source_{i}"), file_name, text));
    }

    let store = Arc::new(InMemoryJobStore::new());
    let job_id = store.create_import_job("demo-org", sources).await?;

    let worker = Arc::new(ImportWorker {
        store: store.clone(),
        completion: build_completion_client(),
        flight_api: Arc::new(DisabledFlightData),
        cfg: advance_import::config::PipelineConfig::load_default(),
    });
    worker.run_once().await;

    let job = store
        .get_import_job_by_id(job_id)
        .await?
        .expect("job exists");
    println!("status: {:?}", job.status);
    if let Some(error) = &job.error_message {
        println!("error: {error}");
    }
    if let Some(extracted) = &job.extracted {
        println!("{}", serde_json::to_string_pretty(extracted)?);
    }
    if let Some(confidence) = &job.confidence_map {
        println!("confidence: {}", serde_json::to_string_pretty(confidence)?);
    }
    Ok(())
}
