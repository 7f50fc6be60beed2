use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use live_translator::audio::export_pcm16_payload;
use live_translator::history::{UtteranceIdGenerator, FAVORITES_STORE, HISTORY_STORE};
use live_translator::session::SessionDeps;
use live_translator::{
    create_router, spawn_session, AppState, Config, CpalMicrophone, CpalOutput, GenerateClient,
    JsonFileStore, LiveClient, SessionController, SessionHandle, SessionState, UtteranceStore,
    Voice,
};

/// Live Translator - realtime spoken translation
#[derive(Parser)]
#[command(name = "live-translator", version, about)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/live-translator")]
    config: String,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a realtime session and translate the microphone until Ctrl-C
    Live {
        /// Voice to speak with
        #[arg(long)]
        voice: Option<Voice>,
        /// Persona prompt, passed through verbatim
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Translate text once and speak the result
    Say {
        text: String,
        /// Voice to speak with
        #[arg(long)]
        voice: Option<Voice>,
    },
    /// Run the HTTP control API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Inspect persisted utterances
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List utterances, newest first
    List {
        #[arg(long, default_value = HISTORY_STORE)]
        store: String,
    },
    /// Delete one utterance
    Delete {
        id: u64,
        #[arg(long, default_value = HISTORY_STORE)]
        store: String,
    },
    /// Delete every utterance in a store
    Clear {
        #[arg(long, default_value = HISTORY_STORE)]
        store: String,
    },
    /// Copy one utterance to favorites
    Favorite { id: u64 },
    /// Write an utterance's audio to a WAV file
    Export {
        id: u64,
        path: PathBuf,
        #[arg(long, default_value = HISTORY_STORE)]
        store: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "info,live_translator=debug",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    let store = Arc::new(
        JsonFileStore::open(&cfg.storage.path)
            .await
            .context("Failed to open utterance store")?,
    );

    match cli.command {
        Command::Live { voice, prompt } => {
            if let Some(voice) = voice {
                cfg.persona.voice = voice;
            }
            if let Some(prompt) = prompt {
                cfg.persona.system_prompt = prompt;
            }
            let session = start_session(&cfg, store).await?;
            run_live(&cfg, &session).await
        }
        Command::Say { text, voice } => {
            if let Some(voice) = voice {
                cfg.persona.voice = voice;
            }
            let session = start_session(&cfg, store).await?;
            run_say(&session, text).await
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(cfg.service.http.port);
            let session = start_session(&cfg, Arc::clone(&store)).await?;
            let state = AppState::new(session, store)
                .with_persona(cfg.persona.voice, &cfg.persona.system_prompt);

            let addr = format!("{}:{}", cfg.service.http.bind, port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            info!("HTTP API listening on {}", addr);

            axum::serve(listener, create_router(state))
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .context("HTTP server failed")
        }
        Command::History { action } => run_history(store.as_ref(), action).await,
    }
}

async fn start_session(cfg: &Config, store: Arc<JsonFileStore>) -> Result<SessionHandle> {
    let output = CpalOutput::open()
        .await
        .context("Failed to open audio output")?;

    let translator = GenerateClient::new(
        cfg.text.base_url.as_str(),
        cfg.text_api_key(),
        cfg.text.text_model.as_str(),
        cfg.text.speech_model.as_str(),
        cfg.text.instruction.as_str(),
    )?;

    let ids = UtteranceIdGenerator::starting_after(store.max_id().await);
    let deps = SessionDeps {
        transport: Arc::new(LiveClient::new(cfg.live.url.as_str(), cfg.live.api_key.as_str())),
        microphone: Box::new(CpalMicrophone::new()),
        output: Arc::new(output),
        translator: Arc::new(translator),
        store,
    };

    let (controller, events) = SessionController::new(cfg.session_config(), cfg.capture_config(), deps);
    let (handle, _task) = spawn_session(controller.with_id_generator(ids), events, cfg.mood_cadence());
    Ok(handle)
}

async fn run_live(cfg: &Config, session: &SessionHandle) -> Result<()> {
    let mut state = session.subscribe_state();
    let mut mood = session.mood().subscribe();

    session
        .open(cfg.persona.voice, cfg.persona.system_prompt.as_str())
        .await
        .context("Failed to open session")?;
    state.borrow_and_update();
    info!("Listening with voice {} (Ctrl-C to stop)", cfg.persona.voice);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = mood.changed() => {
                if changed.is_err() {
                    break;
                }
                let sample = *mood.borrow_and_update();
                println!("mood: {:?}", sample.bucket);
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == SessionState::Idle {
                    warn!("Session ended");
                    break;
                }
            }
        }
    }

    session.disconnect().await?;
    let stats = session.status().await?;
    info!(
        "Session {} finished: {} chunks sent, {} dropped, {} buffers played",
        stats.session_id, stats.chunks_sent, stats.chunks_dropped, stats.buffers_scheduled
    );
    Ok(())
}

async fn run_say(session: &SessionHandle, text: String) -> Result<()> {
    let mut speaking = session.subscribe_speaking();
    let utterance = session.translate(text).await.context("Translation failed")?;
    println!("{}", utterance.translated_text);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = speaking.wait_for(|speaking| !*speaking) => {}
    }

    session.disconnect().await?;
    Ok(())
}

async fn run_history(store: &JsonFileStore, action: HistoryCommand) -> Result<()> {
    match action {
        HistoryCommand::List { store: name } => {
            for utterance in store.get_all(&name).await? {
                println!(
                    "{}  {}  {} -> {}",
                    utterance.id,
                    utterance.created_at.format("%Y-%m-%d %H:%M:%S"),
                    utterance.source_text,
                    utterance.translated_text
                );
            }
        }
        HistoryCommand::Delete { id, store: name } => {
            if store.delete(&name, id).await? {
                info!("Deleted utterance {} from {}", id, name);
            } else {
                anyhow::bail!("Utterance {id} not found in {name}");
            }
        }
        HistoryCommand::Clear { store: name } => {
            store.clear(&name).await?;
            info!("Cleared {}", name);
        }
        HistoryCommand::Favorite { id } => {
            let utterance = find(store, HISTORY_STORE, id).await?;
            store.add(FAVORITES_STORE, utterance).await?;
            info!("Added utterance {} to {}", id, FAVORITES_STORE);
        }
        HistoryCommand::Export {
            id,
            path,
            store: name,
        } => {
            let utterance = find(store, &name, id).await?;
            let samples = export_pcm16_payload(&utterance.audio_payload, &path)?;
            info!("Wrote {} samples to {}", samples, path.display());
        }
    }
    Ok(())
}

async fn find(
    store: &JsonFileStore,
    name: &str,
    id: u64,
) -> Result<live_translator::Utterance> {
    store
        .get_all(name)
        .await?
        .into_iter()
        .find(|u| u.id == id)
        .with_context(|| format!("Utterance {id} not found in {name}"))
}
