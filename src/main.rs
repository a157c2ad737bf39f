//! Line-oriented driver for the LangLink core.
//!
//! Plain lines are treated as edits to the source text box. Commands:
//! `:online`, `:offline`, `:now <text>`, `:speak`, `:stop`, `:listen`,
//! `:history`, `:metrics`, `:clear-history`, `:eval`, `:rate <1-5>`,
//! `:dashboard`, `:reset-dashboard`, `:quit`.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use langlink::audio::arbiter::{PlaybackRequest, PlaybackSide};
use langlink::audio::{NoLocalSynthesis, NoRecognition, SilentOutput};
use langlink::clock::SystemClock;
use langlink::config::Config;
use langlink::evaluation::ItemRun;
use langlink::gemini::GeminiClient;
use langlink::network::{ConnectivityEvent, NetworkMode};
use langlink::provider::{SpeechSynthesisProvider, TranslationProvider, Unconfigured};
use langlink::storage::{RecordStore, SqliteStore};
use langlink::translate::{Language, TranslateError, TranslationRequest};
use langlink::{init_tracing, Collaborators, LangLink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(&PathBuf::from(path))?,
        None => Config::default(),
    }
    .with_env_overrides()?;
    init_tracing(config.log_json);
    info!(db = %config.db_path.display(), "langlink starting");

    let store: Arc<dyn RecordStore> = match SqliteStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "storage unavailable, running in memory");
            Arc::new(SqliteStore::in_memory()?)
        }
    };

    let (translator, synthesizer): (Arc<dyn TranslationProvider>, Arc<dyn SpeechSynthesisProvider>) =
        match GeminiClient::from_env(&config) {
            Ok(client) => {
                let client = Arc::new(client);
                (client.clone(), client)
            }
            Err(e) => {
                warn!(error = %e, "gemini client unavailable, remote calls disabled");
                let stub = Arc::new(Unconfigured::new(e.to_string()));
                (stub.clone(), stub)
            }
        };

    let app = Arc::new(LangLink::assemble(
        &config,
        store,
        Arc::new(SystemClock),
        NetworkMode::Online,
        Collaborators {
            translator,
            synthesizer,
            local_speech: Arc::new(NoLocalSynthesis),
            audio_output: Arc::new(SilentOutput),
            recognizer: Arc::new(NoRecognition),
        },
    ));

    let (connectivity_tx, connectivity_rx) = mpsc::channel(8);
    let _listener = app.network.spawn_listener(connectivity_rx);

    let source = Language::new("en-US", "English");
    let target = Language::new("hi-IN", "Hindi");
    let last_translation: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let mut awaiting_rating: Option<ItemRun> = None;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        match line {
            ":quit" => break,
            ":online" => {
                let _ = connectivity_tx.send(ConnectivityEvent::Online).await;
            }
            ":offline" => {
                let _ = connectivity_tx.send(ConnectivityEvent::Offline).await;
            }
            ":stop" => app.playback.stop(),
            ":history" => {
                for item in app.history.items() {
                    println!("{} | {} -> {}", item.id, item.source_text, item.translated_text);
                }
            }
            ":metrics" => {
                println!("{}", serde_json::to_string_pretty(&app.metrics.summary())?);
            }
            ":clear-history" => app.history.clear(),
            ":dashboard" => {
                println!("{}", serde_json::to_string_pretty(&app.dashboard())?);
            }
            ":reset-dashboard" => app.reset_dashboard(),
            ":listen" => match app.voice.listen_and_translate(&source, &target).await {
                Ok(run) => {
                    println!("{} -> {}", run.transcript.text, run.translation.text);
                    *last_translation.lock() = Some(run.translation.text);
                }
                Err(e) => println!("error: {e}"),
            },
            ":eval" => {
                let Some(item) = app.evaluation.next_unrated() else {
                    println!("every evaluation item is rated");
                    continue;
                };
                let run = app.evaluation.run_item(item).await;
                println!(
                    "[{}] {} -> {}: {} ({} ms)",
                    item.id, item.source_text, item.target_name, run.translation, run.latency_ms
                );
                println!("rate it with :rate <1-5>");
                awaiting_rating = Some(run);
            }
            ":speak" => {
                let Some(text) = last_translation.lock().clone() else {
                    println!("nothing translated yet");
                    continue;
                };
                let request = PlaybackRequest {
                    text,
                    language: target.clone(),
                    side: PlaybackSide::Target,
                };
                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    match app.playback.play(request).await {
                        Ok(report) => println!("playback {:?} via {:?}", report.outcome, report.path),
                        Err(e) => println!("playback refused: {e}"),
                    }
                });
            }
            _ => {
                if let Some(rating) = line.strip_prefix(":rate ") {
                    let Some(run) = awaiting_rating.take() else {
                        println!("run :eval first");
                        continue;
                    };
                    let rated = rating
                        .trim()
                        .parse::<u8>()
                        .map_err(|e| e.to_string())
                        .and_then(|rating| app.evaluation.rate(run.clone(), rating).map_err(|e| e.to_string()));
                    match rated {
                        Ok(result) => println!("rated {} as {}", result.item_id, result.rating),
                        Err(e) => {
                            println!("error: {e}");
                            awaiting_rating = Some(run);
                        }
                    }
                    continue;
                }
                if let Some(text) = line.strip_prefix(":now ") {
                    let request = TranslationRequest::new(text, source.clone(), target.clone());
                    match app.scheduler.translate_now(&request).await {
                        Ok(translation) => {
                            println!("{}", translation.text);
                            *last_translation.lock() = Some(translation.text);
                        }
                        Err(e) => println!("error: {e}"),
                    }
                    continue;
                }

                let request = TranslationRequest::new(line, source.clone(), target.clone());
                match app.scheduler.on_input(request) {
                    Ok(pending) => {
                        let last = Arc::clone(&last_translation);
                        tokio::spawn(async move {
                            match pending.outcome().await {
                                Ok(translation) => {
                                    println!("{}", translation.text);
                                    *last.lock() = Some(translation.text);
                                }
                                Err(TranslateError::Superseded) => {}
                                Err(e) => println!("error: {e}"),
                            }
                        });
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
        }
    }

    app.scheduler.cancel_pending();
    app.playback.stop();
    info!("langlink stopped");
    Ok(())
}
