use anyhow::Result;
use clap::Parser;
use staysense::assistant::Assistant;
use staysense::config::RouterConfig;
use staysense::llm::OpenAiClassifier;
use staysense::store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "staysense")]
#[command(about = "Conversational query router for hotel data")]
struct Args {
    /// The user message to classify and route
    message: String,

    /// Thread id (context is tracked per thread)
    #[arg(short, long, default_value = "demo")]
    thread: String,

    /// Optional JSON config overlay
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable the LLM semantic classification layer (or set OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RouterConfig::from_file(path)?,
        None => RouterConfig::default(),
    };

    // Demo store with a handful of hotels; production wires a Postgres-backed
    // DataStore here instead.
    let store = MemoryStore::shared(&config.sandbox.fact_table, &config.sandbox.entity_column);
    store
        .set_entities(&[
            "Vier Jahreszeiten Hamburg",
            "Dolder Grand",
            "Adlon Kempinski Berlin",
            "Baur au Lac",
        ])
        .await;
    for (hotel, revenue, occupancy) in [
        ("vier jahreszeiten hamburg", 182_400.0, 0.91),
        ("dolder grand", 96_750.0, 0.78),
        ("adlon kempinski berlin", 154_300.0, 0.85),
        ("baur au lac", 88_200.0, 0.81),
    ] {
        let mut row = staysense::store::Row::new();
        row.insert("hotel_name".to_string(), serde_json::json!(hotel));
        row.insert("metric_date".to_string(), serde_json::json!("2026-08-24"));
        row.insert("revenue".to_string(), serde_json::json!(revenue));
        row.insert("occupancy".to_string(), serde_json::json!(occupancy));
        store.insert_row(row).await;
    }

    let mut assistant = Assistant::new(store, config);

    let api_key = args.api_key.or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if let Some(key) = api_key {
        info!("Semantic classification layer enabled");
        assistant = assistant.with_semantic(Arc::new(OpenAiClassifier::new(key)));
    }

    let outcome = assistant.handle_message(&args.thread, &args.message).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
