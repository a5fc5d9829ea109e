//! # Live Client
//!
//! Terminal consumer of a live session: posts a query with retrieval results,
//! follows the event stream, renders audio into a WAV file and logs the map
//! actions the model asks for.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use umkm_live_backend::audio::playback::{AudioClock, SystemClock};
use umkm_live_backend::audio::wav_sink::WavSink;
use umkm_live_backend::audio::AudioPipeline;
use umkm_live_backend::client::LiveClient;
use umkm_live_backend::dispatch::map::LoggingMap;
use umkm_live_backend::dispatch::FunctionDispatcher;
use umkm_live_backend::models::{CreateSessionRequest, RagResult, UserLocation};
use umkm_live_backend::sse::StreamEvent;

#[derive(Parser, Debug)]
#[command(name = "live-client", version, about = "Run one live session against the bridge")]
struct Args {
    /// Base URL of the bridge server
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Session id; a random one is generated if omitted
    #[arg(long)]
    session_id: Option<String>,

    #[arg(short, long, default_value = "")]
    query: String,

    /// JSON file with the ranked retrieval results
    #[arg(long, value_name = "FILE")]
    results: Option<PathBuf>,

    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Image to attach to the query
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Where to write the spoken answer
    #[arg(short, long, value_name = "FILE", default_value = "answer.wav")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "umkm_live_backend=info,live_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    let args = Args::parse();
    let session_id = args
        .session_id
        .clone()
        .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));

    let results = load_results(args.results.as_ref())?;
    let body = CreateSessionRequest {
        query: args.query.clone(),
        image_base64: load_image(args.image.as_ref())?,
        rag_results: Some(results.clone()),
        user_location: args.lat.zip(args.lon).map(|(lat, lon)| UserLocation { lat, lon }),
    };

    let client = LiveClient::new(&args.server);
    let created = client.create_session(&session_id, &body).await?;
    info!(session_id = %created.session_id, "{}", created.message);

    let mut events = client.open_stream(&session_id).await?;

    let clock: Arc<dyn AudioClock> = Arc::new(SystemClock::new());
    let mut audio = AudioPipeline::new(WavSink::new(clock.clone()), clock);
    let mut dispatcher = FunctionDispatcher::new(LoggingMap::new(&results), results);
    let mut transcript = String::new();
    let mut failure = None;

    while let Some(event) = events.next_event().await? {
        match event {
            StreamEvent::Connected => info!("Live session connected"),
            StreamEvent::Text { text } => {
                println!("{}", text);
                transcript.push_str(&text);
            }
            StreamEvent::AudioChunk { data, mime_type } => audio.push_chunk(&data, &mime_type),
            StreamEvent::FunctionCalls { function_calls } => {
                let report = dispatcher.dispatch_batch(&function_calls);
                info!(
                    handled = report.handled,
                    ignored = report.ignored,
                    failed = report.failed,
                    "Function calls dispatched"
                );
            }
            StreamEvent::Complete => {
                info!("Turn complete");
                break;
            }
            StreamEvent::Error { error } => {
                failure = Some(error);
                break;
            }
        }
    }

    let decoded = audio.decoded();
    let sink = audio.finish().await.context("Audio playback task failed")?;
    if decoded > 0 {
        sink.write_to(&args.output)
            .with_context(|| format!("Failed to write {}", args.output.display()))?;
        info!(
            path = %args.output.display(),
            seconds = sink.duration().as_secs_f32(),
            chunks = decoded,
            "Saved spoken answer"
        );
    }
    if let Some(selected) = dispatcher.map().selected() {
        info!(umkm_id = selected, "Last selected business");
    }

    match failure {
        Some(error) => {
            warn!(error = %error, "Session ended with an error");
            anyhow::bail!(error)
        }
        None => Ok(()),
    }
}

fn load_results(path: Option<&PathBuf>) -> Result<Vec<RagResult>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid results in {}", path.display()))
}

fn load_image(path: Option<&PathBuf>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(Some(format!("data:{};base64,{}", mime, STANDARD.encode(bytes))))
}
