//! Ticketero - chat-to-GLPI ticket bridge.
//!
//! This binary reads normalized chat events as JSON lines on stdin and
//! writes outbound channel actions as JSON lines on stdout; the chat
//! transport process on the other side of the pipe owns delivery,
//! reconnection, and media download (staged to files).
//!
//! # Configuration
//!
//! Set the following environment variables (or use a `.env` file):
//!
//! - `GLPI_BASE_URL`: Base URL of the GLPI REST API
//! - `GLPI_APP_TOKEN`: GLPI application token
//! - `GLPI_USER_TOKEN`: GLPI user API token
//! - `TECHNICIANS_FILE`: JSON file mapping technician phones to names
//!
//! # Usage
//!
//! ```bash
//! transport-bridge | ./ticketero | transport-bridge --outbound
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, EnvFilter};

use ticketero::backend::TicketingBackend;
use ticketero::channel::{InboundMessage, MediaPayload, MessagingChannel, PollVote};
use ticketero::config::Config;
use ticketero::directory::TechnicianDirectory;
use ticketero::engine::TicketEngine;
use ticketero::error::TicketeroError;
use ticketero::glpi::GlpiClient;

/// One inbound event line from the transport.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundEvent {
    /// A chat message (text and/or media).
    Message(InboundMessage),
    /// A vote on a previously sent poll.
    PollVote(PollVote),
}

/// One outbound action line to the transport.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundAction<'a> {
    Reply {
        chat_id: &'a str,
        text: &'a str,
    },
    React {
        chat_id: &'a str,
        emoji: &'a str,
    },
    Poll {
        chat_id: &'a str,
        poll_id: &'a str,
        title: &'a str,
        options: &'a [String],
        allow_multiple: bool,
    },
}

/// Channel implementation over the stdout side of the pipe.
///
/// Poll ids are assigned on this side and echoed back by the transport in
/// poll-vote events. Media arrives staged as files named in
/// `InboundMessage::media_path`.
struct StdioChannel {
    stdout: Mutex<std::io::Stdout>,
    next_poll: AtomicU64,
}

impl StdioChannel {
    fn new() -> Self {
        Self {
            stdout: Mutex::new(std::io::stdout()),
            next_poll: AtomicU64::new(1),
        }
    }

    fn emit(&self, action: &OutboundAction<'_>) -> Result<(), TicketeroError> {
        let line = serde_json::to_string(action)?;
        let mut stdout = self
            .stdout
            .lock()
            .map_err(|_| TicketeroError::channel("stdout lock poisoned"))?;
        writeln!(stdout, "{line}")
            .and_then(|()| stdout.flush())
            .map_err(|e| TicketeroError::channel(format!("stdout write failed: {e}")))
    }
}

impl MessagingChannel for StdioChannel {
    async fn get_media(&self, message: &InboundMessage) -> Result<MediaPayload, TicketeroError> {
        let Some(path) = message.media_path.as_deref() else {
            return Err(TicketeroError::channel(
                "media message arrived without a staged file path",
            ));
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TicketeroError::channel(format!("failed to read staged media: {e}")))?;
        let filename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Ok(MediaPayload {
            bytes,
            mime_type: message
                .media_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            filename,
        })
    }

    async fn reply(&self, chat_id: &str, text: &str) -> Result<(), TicketeroError> {
        self.emit(&OutboundAction::Reply { chat_id, text })
    }

    async fn react(&self, chat_id: &str, emoji: &str) -> Result<(), TicketeroError> {
        self.emit(&OutboundAction::React { chat_id, emoji })
    }

    async fn send_poll(
        &self,
        chat_id: &str,
        title: &str,
        options: &[String],
        allow_multiple: bool,
    ) -> Result<Option<String>, TicketeroError> {
        let poll_id = format!("poll-{}", self.next_poll.fetch_add(1, Ordering::SeqCst));
        self.emit(&OutboundAction::Poll {
            chat_id,
            poll_id: &poll_id,
            title,
            options,
            allow_multiple,
        })?;
        Ok(Some(poll_id))
    }
}

/// Routing key for per-conversation event dispatch.
///
/// Events with the same key must be handled strictly in arrival order;
/// distinct keys proceed concurrently, so one conversation's slow backend
/// call never stalls another.
fn event_key(event: &InboundEvent) -> (String, String) {
    match event {
        InboundEvent::Message(message) => (
            message.chat_id.clone(),
            message.stable_sender().to_string(),
        ),
        InboundEvent::PollVote(vote) => {
            (vote.chat_id.clone(), vote.stable_sender().to_string())
        }
    }
}

/// Spawns the worker that drains one conversation's event queue in order.
fn spawn_session_worker<B, C>(
    engine: Arc<TicketEngine<B, C>>,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
) -> JoinHandle<()>
where
    B: TicketingBackend + Send + Sync + 'static,
    C: MessagingChannel + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                InboundEvent::Message(message) => {
                    if let Err(error) = engine.handle_message(&message).await {
                        tracing::error!(error = %error, chat_id = %message.chat_id, "Message handling failed");
                    }
                }
                InboundEvent::PollVote(vote) => {
                    if let Err(error) = engine.handle_poll_vote(&vote).await {
                        tracing::error!(error = %error, chat_id = %vote.chat_id, "Poll vote handling failed");
                    }
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore errors if not found)
    dotenvy::dotenv().ok();

    // Logging goes to stderr; stdout is reserved for outbound actions.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ticketero=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting ticketero v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Failed to load configuration")?;
    if !config.glpi_enabled() {
        tracing::warn!(
            "GLPI credentials not configured; tickets cannot be created until \
             GLPI_BASE_URL, GLPI_APP_TOKEN and GLPI_USER_TOKEN are set"
        );
    }

    let directory = match &config.technicians_file {
        Some(path) => TechnicianDirectory::load(path)
            .with_context(|| format!("Failed to load technician directory from {path}"))?,
        None => {
            tracing::warn!("TECHNICIANS_FILE not set; every sender will be rejected");
            TechnicianDirectory::empty()
        }
    };
    tracing::debug!(technicians = directory.len(), "Technician directory loaded");

    let backend = GlpiClient::new(config.glpi.clone()).context("Failed to create GLPI client")?;
    let engine = Arc::new(TicketEngine::new(
        backend,
        StdioChannel::new(),
        directory,
        &config,
    ));

    tracing::info!("Engine initialized, reading events from stdin");

    // One worker per conversation key: events for one key are enqueued in
    // arrival order and drained sequentially, while keys run concurrently.
    type WorkerMap = HashMap<(String, String), (mpsc::UnboundedSender<InboundEvent>, JoinHandle<()>)>;
    let mut workers: WorkerMap = HashMap::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("stdin read failed")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => {
                let key = event_key(&event);
                let (sender, _) = workers.entry(key).or_insert_with(|| {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    (sender, spawn_session_worker(engine.clone(), receiver))
                });
                if sender.send(event).is_err() {
                    tracing::error!("Session worker exited unexpectedly");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Skipping unparseable event line");
            }
        }
    }

    tracing::info!("Transport closed stdin, draining session workers");
    for ((chat_id, _), (sender, handle)) in workers {
        drop(sender);
        if let Err(error) = handle.await {
            tracing::error!(error = %error, chat_id = %chat_id, "Session worker panicked");
        }
    }
    Ok(())
}
