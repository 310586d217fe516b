//! The ticket flow engine: the orchestrating state machine.
//!
//! Inbound chat events (text, media, poll votes) arrive already normalized
//! by the transport. The engine classifies each one (start command, end
//! command, plain text, vote), consults the session store, and drives the
//! parser, the identity resolver, and the ticketing backend. All outbound
//! effects go through the [`MessagingChannel`].
//!
//! Events for one session key are processed strictly in arrival order: the
//! per-key slot mutex is held for the whole handler, awaited backend calls
//! included. Different keys proceed concurrently.
//!
//! Backend and resolver failures are converted into Spanish user-facing
//! replies here; only channel delivery errors propagate to the caller.

use crate::backend::{NewTicket, TicketingBackend};
use crate::channel::{InboundMessage, MessagingChannel, PollVote};
use crate::config::Config;
use crate::directory::TechnicianDirectory;
use crate::error::TicketeroError;
use crate::glpi::UserCandidate;
use crate::normalize::fold_key;
use crate::parser::{self, TicketDraft};
use crate::render;
use crate::resolver::{Resolution, Resolver, Role};
use crate::selection::{self, PendingSelection};
use crate::session::{Attachment, SessionKey, SessionStore, TicketSession};

/// Start-command variants, longest first so multi-word forms win.
const START_COMMANDS: &[&str] = &[
    "NUEVO TICKET",
    "CREAR TICKET",
    "GENERAR TICKET",
    "ABRIR TICKET",
    "TICKET",
    "TKT",
];

/// End-command variants, longest first.
const END_COMMANDS: &[&str] = &["CERRAR TICKET", "FINALIZAR", "TERMINAR", "LISTO", "FIN"];

const ACK_EMOJI: &str = "🎫";
const ATTACHMENT_EMOJI: &str = "📎";

const START_PROMPT: &str =
    "Sesión iniciada. Envía los datos del ticket (SOLICITANTE: ..., PROBLEMA: ...).";

const FORMAT_PROMPT: &str = "No reconocí datos del ticket. Usa el formato CAMPO: valor, \
     por ejemplo:\nSOLICITANTE: 73872028\nPROBLEMA: no enciende el equipo";

/// A recognized command at the start of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Start a fresh session; carries the text after the command word.
    Start(String),
    /// Finalize the session.
    End,
}

/// Outcome of one ticket-creation attempt.
enum CreateOutcome {
    /// The backend created the ticket just now.
    Created(u64),
    /// A ticket already existed; no backend call was made.
    AlreadyCreated(u64),
    /// A disambiguation was parked on the session; creation resumes once
    /// the user picks a candidate.
    SelectionPending,
    /// Creation failed; a user-facing reply was already sent and the
    /// session is unchanged so the user can retry.
    Failed,
}

/// The orchestrating state machine, generic over its two collaborator
/// boundaries so tests can drive it with in-memory fakes.
pub struct TicketEngine<B, C> {
    backend: B,
    channel: C,
    directory: TechnicianDirectory,
    store: SessionStore,
    entity_id: Option<u32>,
    default_requester: Option<String>,
    default_category_id: u32,
    default_category_name: String,
}

impl<B: TicketingBackend, C: MessagingChannel> TicketEngine<B, C> {
    /// Creates an engine over a backend, a channel, and the technician
    /// directory that gates authorization.
    pub fn new(backend: B, channel: C, directory: TechnicianDirectory, config: &Config) -> Self {
        Self {
            backend,
            channel,
            directory,
            store: SessionStore::new(),
            entity_id: config.glpi.as_ref().and_then(|g| g.entity_id),
            default_requester: config.default_requester.clone(),
            default_category_id: config.default_category_id,
            default_category_name: config.default_category_name.clone(),
        }
    }

    /// The ticketing backend, shared with callers that need direct access.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The messaging channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Handles one inbound chat message.
    ///
    /// # Errors
    ///
    /// Only channel delivery failures propagate; backend and resolution
    /// failures become user-facing replies.
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<(), TicketeroError> {
        let key = SessionKey::new(&message.chat_id, message.stable_sender());
        let slot = self.store.slot(&key);
        let mut guard = slot.lock().await;

        let command = classify(&message.body);

        let Some(technician) = self
            .directory
            .resolve_sender(&message.sender_number, &message.sender_label)
        else {
            if guard.take().is_some() {
                self.store.remove(&key);
                tracing::warn!(sender = %message.stable_sender(), "Session of unauthorized sender torn down");
            }
            if matches!(&command, Some(Command::Start(_))) {
                let known = best_known(message);
                self.channel
                    .reply(
                        &message.chat_id,
                        &format!("No estás autorizado para crear tickets ({known})."),
                    )
                    .await?;
            } else {
                tracing::debug!(sender = %message.stable_sender(), "Unauthorized message dropped");
            }
            return Ok(());
        };

        if let Some(Command::Start(trailing)) = command {
            tracing::info!(technician = %technician.name, chat_id = %message.chat_id, "Ticket session started");
            *guard = Some(TicketSession::new(technician));
            if let Err(error) = self.channel.react(&message.chat_id, ACK_EMOJI).await {
                tracing::warn!(error = %error, "Acknowledgment reaction failed");
            }
            let Some(session) = guard.as_mut() else {
                return Ok(());
            };
            let mut had_data = false;
            if !trailing.is_empty() {
                self.handle_text(&message.chat_id, session, &trailing, message.has_media)
                    .await?;
                had_data = true;
            }
            if message.has_media {
                self.handle_media(message, session).await?;
                had_data = true;
            }
            if !had_data {
                self.channel.reply(&message.chat_id, START_PROMPT).await?;
            }
            return Ok(());
        }

        {
            let Some(session) = guard.as_mut() else {
                tracing::debug!(chat_id = %message.chat_id, "Message without a session ignored");
                return Ok(());
            };

            if session.pending_selection.is_some() {
                // Attachments still buffer while a selection is open; all
                // other draft mutation is suspended.
                if message.has_media {
                    self.handle_media(message, session).await?;
                }
                if command == Some(Command::End) {
                    self.channel
                        .reply(
                            &message.chat_id,
                            "Hay una selección pendiente. Responde la encuesta o con el \
                             número antes de finalizar.",
                        )
                        .await?;
                    return Ok(());
                }
                // A caption on a buffered attachment is not a selection reply.
                if !message.has_media && !message.body.trim().is_empty() {
                    self.handle_selection_reply(&message.chat_id, session, &message.body)
                        .await?;
                }
                return Ok(());
            }
        }

        if command == Some(Command::End) {
            return self.handle_end(&key, &message.chat_id, &mut guard).await;
        }

        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        if !message.body.trim().is_empty() {
            self.handle_text(&message.chat_id, session, &message.body, message.has_media)
                .await?;
        }
        if message.has_media {
            self.handle_media(message, session).await?;
        }
        Ok(())
    }

    /// Handles a vote on a previously sent disambiguation poll.
    ///
    /// The authorization gate runs here too: a vote from a sender outside
    /// the technician directory is dropped and any session torn down, the
    /// same as for messages.
    pub async fn handle_poll_vote(&self, vote: &PollVote) -> Result<(), TicketeroError> {
        let key = SessionKey::new(&vote.chat_id, vote.stable_sender());
        let slot = self.store.slot(&key);
        let mut guard = slot.lock().await;

        if self
            .directory
            .resolve_sender(&vote.sender_number, "")
            .is_none()
        {
            if guard.take().is_some() {
                self.store.remove(&key);
                tracing::warn!(sender = %vote.stable_sender(), "Session of unauthorized sender torn down");
            }
            tracing::debug!(sender = %vote.stable_sender(), "Unauthorized poll vote dropped");
            return Ok(());
        }

        let Some(session) = guard.as_mut() else {
            tracing::debug!(chat_id = %vote.chat_id, "Poll vote without a session ignored");
            return Ok(());
        };
        let Some(pending) = session.pending_selection.as_ref() else {
            tracing::debug!(chat_id = %vote.chat_id, "Poll vote without an open selection ignored");
            return Ok(());
        };
        // A text-fallback selection sent no poll; votes cannot refer to it.
        let Some(expected) = pending.poll_id.as_deref() else {
            tracing::debug!(chat_id = %vote.chat_id, "Poll vote but no poll was sent, ignored");
            return Ok(());
        };
        if vote.poll_id.as_deref() != Some(expected) {
            tracing::debug!(poll_id = ?vote.poll_id, "Vote for a different poll ignored");
            return Ok(());
        }

        match pending.resolve_vote(vote) {
            Some(candidate) => {
                let candidate = candidate.clone();
                self.apply_selection(&vote.chat_id, session, candidate).await
            }
            None => {
                let prompt = reprompt_text(pending);
                self.channel.reply(&vote.chat_id, &prompt).await
            }
        }
    }

    /// Parses a text body into the draft and attempts creation when the
    /// draft becomes complete.
    ///
    /// `quiet` suppresses the format prompt for unrecognized text; media
    /// captions are parsed opportunistically, never scolded.
    async fn handle_text(
        &self,
        chat_id: &str,
        session: &mut TicketSession,
        body: &str,
        quiet: bool,
    ) -> Result<(), TicketeroError> {
        let Some(parsed) = parser::parse(body) else {
            if !quiet {
                self.channel.reply(chat_id, FORMAT_PROMPT).await?;
            }
            return Ok(());
        };
        session.awaiting_first_data = false;

        let draft = session.draft.get_or_insert_with(TicketDraft::default);
        let effect = draft.merge(&parsed);
        if effect.requester_changed {
            session.requester_id = None;
        }
        if effect.assignee_changed {
            session.assignee_id = None;
        }

        let complete = session.draft.as_ref().is_some_and(|d| d.is_complete());
        if !complete {
            let missing = missing_fields(session.draft.as_ref());
            self.channel
                .reply(chat_id, &format!("Faltan datos: {missing}."))
                .await?;
            return Ok(());
        }

        if !session.ticket_created() {
            self.try_create(chat_id, session).await?;
        }
        Ok(())
    }

    /// Downloads a media attachment; buffers it before ticket creation,
    /// uploads it immediately after.
    async fn handle_media(
        &self,
        message: &InboundMessage,
        session: &mut TicketSession,
    ) -> Result<(), TicketeroError> {
        let media = match self.channel.get_media(message).await {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(error = %error, "Media download failed");
                self.channel
                    .reply(&message.chat_id, "No pude descargar el archivo adjunto.")
                    .await?;
                return Ok(());
            }
        };
        let attachment = Attachment {
            bytes: media.bytes,
            mime_type: media.mime_type,
            filename: media.filename,
        };

        if let Some(ticket_id) = session.ticket_id {
            let seq = session.uploaded_count + 1;
            match self.upload_attachment(ticket_id, &attachment, seq).await {
                Ok(()) => session.uploaded_count += 1,
                Err(error) => {
                    tracing::warn!(error = %error, ticket_id, "Attachment upload failed");
                }
            }
        } else {
            session.pending_attachments.push(attachment);
        }
        if let Err(error) = self.channel.react(&message.chat_id, ATTACHMENT_EMOJI).await {
            tracing::warn!(error = %error, "Attachment reaction failed");
        }
        Ok(())
    }

    /// Resolves an open selection from a text reply; an unmatched reply
    /// leaves the selection open and re-prompts.
    async fn handle_selection_reply(
        &self,
        chat_id: &str,
        session: &mut TicketSession,
        body: &str,
    ) -> Result<(), TicketeroError> {
        let Some(pending) = session.pending_selection.as_ref() else {
            return Ok(());
        };
        match pending.resolve_reply(body) {
            Some(candidate) => {
                let candidate = candidate.clone();
                self.apply_selection(chat_id, session, candidate).await
            }
            None => {
                let prompt = reprompt_text(pending);
                self.channel.reply(chat_id, &prompt).await
            }
        }
    }

    /// Commits a chosen candidate: caches the id for the pending role,
    /// back-fills the draft, and resumes creation when possible.
    async fn apply_selection(
        &self,
        chat_id: &str,
        session: &mut TicketSession,
        candidate: UserCandidate,
    ) -> Result<(), TicketeroError> {
        let Some(pending) = session.pending_selection.take() else {
            return Ok(());
        };
        match pending.role {
            Role::Requester => session.requester_id = Some(candidate.id),
            Role::Assignee => session.assignee_id = Some(candidate.id),
        }
        if let Some(draft) = session.draft.as_mut() {
            selection::enrich_draft(draft, &candidate);
        }
        tracing::info!(role = pending.role.label(), user_id = candidate.id, "Candidate selected");
        self.channel
            .reply(
                chat_id,
                &format!("Seleccionado: {}.", candidate.display_name()),
            )
            .await?;

        let complete = session.draft.as_ref().is_some_and(|d| d.is_complete());
        if complete && !session.ticket_created() {
            self.try_create(chat_id, session).await?;
        }
        Ok(())
    }

    /// Finalizes the session: without a complete draft it is cancelled;
    /// otherwise the ticket is ensured, attachments flushed, and the
    /// outcome reported.
    async fn handle_end(
        &self,
        key: &SessionKey,
        chat_id: &str,
        session_opt: &mut Option<TicketSession>,
    ) -> Result<(), TicketeroError> {
        let Some(session) = session_opt.as_mut() else {
            return Ok(());
        };

        let complete = session.draft.as_ref().is_some_and(|d| d.is_complete());
        if !complete && !session.ticket_created() {
            self.channel
                .reply(
                    chat_id,
                    "No hay datos suficientes para crear el ticket. Sesión cancelada.",
                )
                .await?;
            *session_opt = None;
            self.store.remove(key);
            return Ok(());
        }

        match self.try_create(chat_id, session).await? {
            CreateOutcome::Created(id) | CreateOutcome::AlreadyCreated(id) => {
                self.flush_attachments(session).await;
                self.channel
                    .reply(
                        chat_id,
                        &format!(
                            "Ticket #{} finalizado. Adjuntos subidos: {}.",
                            id, session.uploaded_count
                        ),
                    )
                    .await?;
                *session_opt = None;
                self.store.remove(key);
            }
            CreateOutcome::SelectionPending | CreateOutcome::Failed => {
                // The session survives so the user can resolve the
                // selection or retry the end command.
            }
        }
        Ok(())
    }

    /// Attempts ticket creation, at most once per session.
    ///
    /// Resolves the requester (mandatory) and the assignee (explicit in the
    /// draft, else the sender's own technician name). An ambiguous role
    /// parks a selection and suspends creation; a failed resolution or
    /// backend error leaves the session unchanged for a later retry.
    async fn try_create(
        &self,
        chat_id: &str,
        session: &mut TicketSession,
    ) -> Result<CreateOutcome, TicketeroError> {
        if let Some(id) = session.ticket_id {
            return Ok(CreateOutcome::AlreadyCreated(id));
        }
        if !self.backend.is_enabled() {
            self.channel
                .reply(chat_id, "El backend de tickets no está configurado.")
                .await?;
            return Ok(CreateOutcome::Failed);
        }

        let resolver = Resolver::new(&self.backend, self.entity_id, self.default_requester.clone());

        if session.requester_id.is_none() {
            let value = session
                .draft
                .as_ref()
                .map(|d| d.requester_lookup_value().to_string())
                .unwrap_or_default();
            match resolver.resolve(Role::Requester, &value, true).await {
                Ok(Resolution::Single(candidate)) => {
                    session.requester_id = Some(candidate.id);
                    if let Some(draft) = session.draft.as_mut() {
                        selection::enrich_draft(draft, &candidate);
                    }
                }
                Ok(Resolution::Ambiguous(candidates)) => {
                    let pending =
                        selection::offer(&self.channel, chat_id, Role::Requester, candidates)
                            .await?;
                    session.pending_selection = Some(pending);
                    return Ok(CreateOutcome::SelectionPending);
                }
                Ok(Resolution::NotFound) | Ok(Resolution::NoValue) => {
                    self.channel
                        .reply(
                            chat_id,
                            &format!(
                                "No se encontró al solicitante \"{value}\". \
                                 Envía el DNI de 8 dígitos."
                            ),
                        )
                        .await?;
                    return Ok(CreateOutcome::Failed);
                }
                Err(error) if error.is_recoverable() => {
                    self.channel.reply(chat_id, &error.to_string()).await?;
                    return Ok(CreateOutcome::Failed);
                }
                Err(error) => {
                    tracing::error!(error = %error, "Requester resolution failed");
                    self.channel
                        .reply(chat_id, "No se pudo consultar el directorio de usuarios.")
                        .await?;
                    return Ok(CreateOutcome::Failed);
                }
            }
        }

        if session.assignee_id.is_none() {
            let value = match session.draft.as_ref() {
                Some(draft) if !draft.assignee.is_empty() => draft.assignee.clone(),
                _ => session.technician.name.clone(),
            };
            match resolver.resolve(Role::Assignee, &value, true).await {
                Ok(Resolution::Single(candidate)) => {
                    session.assignee_id = Some(candidate.id);
                }
                Ok(Resolution::Ambiguous(candidates)) => {
                    let pending =
                        selection::offer(&self.channel, chat_id, Role::Assignee, candidates)
                            .await?;
                    session.pending_selection = Some(pending);
                    return Ok(CreateOutcome::SelectionPending);
                }
                Ok(Resolution::NotFound) | Ok(Resolution::NoValue) => {
                    tracing::debug!(assignee = %value, "Assignee unresolved, creating without one");
                }
                Err(error) if error.is_recoverable() => {
                    tracing::debug!(error = %error, "Assignee lookup rejected, creating without one");
                }
                Err(error) => {
                    tracing::error!(error = %error, "Assignee resolution failed");
                    self.channel
                        .reply(chat_id, "No se pudo consultar el directorio de usuarios.")
                        .await?;
                    return Ok(CreateOutcome::Failed);
                }
            }
        }

        let Some(draft) = session.draft.as_ref() else {
            return Ok(CreateOutcome::Failed);
        };
        let Some(requester_id) = session.requester_id else {
            return Ok(CreateOutcome::Failed);
        };
        let category_name = if draft.category.is_empty() {
            &self.default_category_name
        } else {
            &draft.category
        };
        let ticket = NewTicket {
            title: render::ticket_title(draft),
            html_content: render::ticket_content(draft, category_name),
            category_id: self.default_category_id,
            requester_id,
            assignee_id: session.assignee_id,
        };

        match self.backend.create_ticket(&ticket).await {
            Ok(id) => {
                session.ticket_id = Some(id);
                tracing::info!(ticket_id = id, requester_id, "Ticket created");
                self.channel
                    .reply(chat_id, &format!("Ticket #{id} creado."))
                    .await?;
                self.flush_attachments(session).await;
                Ok(CreateOutcome::Created(id))
            }
            Err(error) => {
                tracing::error!(error = %error, "Ticket creation failed");
                self.channel
                    .reply(chat_id, &format!("No se pudo crear el ticket: {error}"))
                    .await?;
                Ok(CreateOutcome::Failed)
            }
        }
    }

    /// Uploads every buffered attachment in receipt order. Each upload is
    /// independent: a failure is logged and the rest proceed.
    async fn flush_attachments(&self, session: &mut TicketSession) {
        let Some(ticket_id) = session.ticket_id else {
            return;
        };
        let queued = std::mem::take(&mut session.pending_attachments);
        let base = session.uploaded_count;
        for (i, attachment) in queued.into_iter().enumerate() {
            match self.upload_attachment(ticket_id, &attachment, base + i + 1).await {
                Ok(()) => session.uploaded_count += 1,
                Err(error) => {
                    tracing::warn!(error = %error, ticket_id, "Attachment upload failed");
                }
            }
        }
    }

    /// Uploads one attachment and links it to the ticket. `seq` numbers the
    /// fallback filename when the transport preserved none.
    async fn upload_attachment(
        &self,
        ticket_id: u64,
        attachment: &Attachment,
        seq: usize,
    ) -> Result<(), TicketeroError> {
        let filename = attachment.filename.clone().unwrap_or_else(|| {
            format!("adjunto-{seq}.{}", extension_for(&attachment.mime_type))
        });
        let name = filename
            .rsplit_once('.')
            .map_or(filename.as_str(), |(stem, _)| stem)
            .to_string();
        let document_id = self
            .backend
            .create_document(&name, &filename, &attachment.mime_type, &attachment.bytes)
            .await?;
        self.backend.link_document(document_id, ticket_id).await?;
        tracing::debug!(document_id, ticket_id, filename = %filename, "Attachment uploaded");
        Ok(())
    }
}

/// Classifies a message body as a start command (with trailing text), an
/// end command, or neither. An end command with trailing text is plain
/// text, not a finalization.
fn classify(body: &str) -> Option<Command> {
    if let Some(trailing) = match_command(body, START_COMMANDS) {
        return Some(Command::Start(trailing));
    }
    if match_command(body, END_COMMANDS).is_some_and(|t| t.is_empty()) {
        return Some(Command::End);
    }
    None
}

/// Word-level prefix match of a body against command variants, comparing
/// words case/diacritic/punctuation-insensitively. Returns the unmodified
/// trailing text (newlines preserved for the parser) on a match.
fn match_command(body: &str, variants: &[&str]) -> Option<String> {
    for variant in variants {
        let mut rest = body;
        let mut matched = true;
        for expected in variant.split_whitespace() {
            rest = rest.trim_start();
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let (word, tail) = rest.split_at(end);
            if word.is_empty() || fold_key(word) != expected {
                matched = false;
                break;
            }
            rest = tail;
        }
        if matched {
            return Some(rest.trim_start().to_string());
        }
    }
    None
}

/// The sender identifier to name in a rejection reply.
fn best_known(message: &InboundMessage) -> &str {
    if !message.sender_number.is_empty() {
        &message.sender_number
    } else if !message.sender_label.is_empty() {
        &message.sender_label
    } else {
        &message.sender_id
    }
}

/// Spanish list of the mandatory fields a draft still lacks.
fn missing_fields(draft: Option<&TicketDraft>) -> String {
    let mut missing = Vec::new();
    let requester_set = draft.is_some_and(|d| !d.requester.is_empty());
    let problem_set = draft.is_some_and(|d| !d.problem.is_empty());
    if !requester_set {
        missing.push("solicitante");
    }
    if !problem_set {
        missing.push("problema");
    }
    missing.join(" y ")
}

/// Rebuilds the numbered option list for an unmatched selection reply.
fn reprompt_text(pending: &PendingSelection) -> String {
    let mut text = String::from("No entendí la respuesta. Responde con el número:\n");
    for (i, label) in pending.labels.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, label));
    }
    text.trim_end().to_string()
}

/// File extension for an upload fallback filename.
fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Config;
    use crate::directory::TechnicianDirectory;
    use crate::testutil::{FakeBackend, FakeChannel};

    const TECH_PHONE: &str = "51987654321";

    fn config() -> Config {
        Config {
            glpi: None,
            default_category_id: 5,
            default_category_name: "Incidente".to_string(),
            default_requester: None,
            technicians_file: None,
        }
    }

    fn directory() -> TechnicianDirectory {
        TechnicianDirectory::from_entries([(TECH_PHONE, "Carlos Rojas")])
    }

    fn user(id: u64, login: &str, first: &str, last: &str, dni: Option<&str>) -> UserCandidate {
        UserCandidate {
            id,
            login: login.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            national_id: dni.map(|d| d.to_string()),
            ..UserCandidate::default()
        }
    }

    fn users() -> Vec<UserCandidate> {
        vec![
            user(42, "jperez", "Juan", "Perez", Some("73872028")),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]
    }

    fn engine(backend: FakeBackend) -> TicketEngine<FakeBackend, FakeChannel> {
        engine_with(backend, FakeChannel::new())
    }

    fn engine_with(
        backend: FakeBackend,
        channel: FakeChannel,
    ) -> TicketEngine<FakeBackend, FakeChannel> {
        TicketEngine::new(backend, channel, directory(), &config())
    }

    fn msg(body: &str) -> InboundMessage {
        InboundMessage {
            body: body.to_string(),
            sender_id: "abc@transport".to_string(),
            sender_number: TECH_PHONE.to_string(),
            sender_label: "Carlos Rojas".to_string(),
            chat_id: "room".to_string(),
            ..InboundMessage::default()
        }
    }

    fn media_msg(body: &str, mime: &str) -> InboundMessage {
        InboundMessage {
            has_media: true,
            media_type: Some(mime.to_string()),
            ..msg(body)
        }
    }

    const COMPLETE_BODY: &str = "SOLICITANTE: 73872028\nPROBLEMA: no enciende";

    #[test]
    fn test_classify_commands() {
        assert_eq!(classify("ticket"), Some(Command::Start(String::new())));
        assert_eq!(
            classify("Nuevo Ticket SOLICITANTE: X"),
            Some(Command::Start("SOLICITANTE: X".to_string()))
        );
        assert_eq!(classify("FIN"), Some(Command::End));
        assert_eq!(classify("finalizar"), Some(Command::End));
        // An end word with trailing text is plain text.
        assert_eq!(classify("fin del problema"), None);
        assert_eq!(classify("SOLICITANTE: X"), None);
    }

    #[test]
    fn test_start_command_preserves_trailing_newlines() {
        let trailing = match_command("ticket SOLICITANTE: X\nPROBLEMA: Y", START_COMMANDS);
        assert_eq!(trailing, Some("SOLICITANTE: X\nPROBLEMA: Y".to_string()));
    }

    #[tokio::test]
    async fn test_unauthorized_start_is_rejected_without_session() {
        let engine = engine(FakeBackend::with_users(users()));
        let message = InboundMessage {
            sender_number: "51900000000".to_string(),
            sender_label: "Persona Desconocida".to_string(),
            ..msg("ticket")
        };
        engine.handle_message(&message).await.unwrap();

        let reply = engine.channel().last_reply().unwrap();
        assert!(reply.contains("No estás autorizado"));
        assert!(reply.contains("51900000000"));

        // A complete body from the same sender goes nowhere.
        let message = InboundMessage {
            sender_number: "51900000000".to_string(),
            sender_label: "Persona Desconocida".to_string(),
            ..msg(COMPLETE_BODY)
        };
        engine.handle_message(&message).await.unwrap();
        assert_eq!(engine.channel().replies().len(), 1);
        assert!(engine.backend().created_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_start_acknowledges_and_prompts() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();

        assert_eq!(engine.channel().reactions().len(), 1);
        assert_eq!(engine.channel().last_reply().unwrap(), START_PROMPT);
    }

    #[tokio::test]
    async fn test_start_with_trailing_text_creates_ticket() {
        let engine = engine(FakeBackend::with_users(users()));
        engine
            .handle_message(&msg(&format!("ticket {COMPLETE_BODY}")))
            .await
            .unwrap();

        let created = engine.backend().created_tickets();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "73872028: no enciende");
        assert_eq!(created[0].requester_id, 42);
        assert_eq!(created[0].assignee_id, Some(7));
        assert_eq!(created[0].category_id, 5);
        assert!(created[0].html_content.contains("no enciende"));
        assert!(engine
            .channel()
            .last_reply()
            .unwrap()
            .contains("Ticket #1000 creado"));
    }

    #[tokio::test]
    async fn test_ticket_created_at_most_once() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();

        assert_eq!(engine.backend().created_tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_draft_prompts_for_missing_fields() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("PROBLEMA: no imprime"))
            .await
            .unwrap();

        let reply = engine.channel().last_reply().unwrap();
        assert!(reply.contains("solicitante"));
        assert!(engine.backend().created_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_text_prompts_format() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg("hola buenos dias")).await.unwrap();

        assert_eq!(engine.channel().last_reply().unwrap(), FORMAT_PROMPT);
    }

    #[tokio::test]
    async fn test_ambiguous_requester_offers_poll_then_reply_resolves() {
        let engine = engine(FakeBackend::with_users(vec![
            user(1, "jperez1", "Juan", "Perez Rojas", None),
            user(2, "jperez2", "Juan", "Perez Silva", None),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Juan Perez\nPROBLEMA: sin red"))
            .await
            .unwrap();

        assert_eq!(engine.channel().polls().len(), 1);
        assert!(engine.backend().created_tickets().is_empty());

        engine.handle_message(&msg("2")).await.unwrap();

        let created = engine.backend().created_tickets();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].requester_id, 2);
    }

    #[tokio::test]
    async fn test_unmatched_selection_reply_reprompts_and_stays_open() {
        let engine = engine(FakeBackend::with_users(vec![
            user(1, "jperez1", "Juan", "Perez Rojas", None),
            user(2, "jperez2", "Juan", "Perez Silva", None),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Juan Perez\nPROBLEMA: sin red"))
            .await
            .unwrap();
        engine.handle_message(&msg("ninguno de esos")).await.unwrap();

        let reply = engine.channel().last_reply().unwrap();
        assert!(reply.contains("Responde con el número"));
        assert!(reply.contains("1. Juan Perez Rojas"));
        assert!(engine.backend().created_tickets().is_empty());

        engine.handle_message(&msg("1")).await.unwrap();
        assert_eq!(engine.backend().created_tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_vote_resolves_selection() {
        let engine = engine(FakeBackend::with_users(vec![
            user(1, "jperez1", "Juan", "Perez Rojas", None),
            user(2, "jperez2", "Juan", "Perez Silva", None),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Juan Perez\nPROBLEMA: sin red"))
            .await
            .unwrap();

        let vote = PollVote {
            chat_id: "room".to_string(),
            sender_id: "abc@transport".to_string(),
            sender_number: TECH_PHONE.to_string(),
            poll_id: Some("poll-1".to_string()),
            selected_indexes: vec![0],
            selected_labels: Vec::new(),
        };
        engine.handle_poll_vote(&vote).await.unwrap();

        let created = engine.backend().created_tickets();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].requester_id, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_poll_vote_is_ignored() {
        let engine = engine(FakeBackend::with_users(vec![
            user(1, "jperez1", "Juan", "Perez Rojas", None),
            user(2, "jperez2", "Juan", "Perez Silva", None),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Juan Perez\nPROBLEMA: sin red"))
            .await
            .unwrap();

        let stray = PollVote {
            chat_id: "room".to_string(),
            sender_id: "xyz@transport".to_string(),
            sender_number: "51900000000".to_string(),
            poll_id: Some("poll-1".to_string()),
            selected_indexes: vec![0],
            selected_labels: Vec::new(),
        };
        engine.handle_poll_vote(&stray).await.unwrap();
        assert!(engine.backend().created_tickets().is_empty());

        // The technician's own vote still resolves the selection.
        let vote = PollVote {
            sender_id: "abc@transport".to_string(),
            sender_number: TECH_PHONE.to_string(),
            ..stray
        };
        engine.handle_poll_vote(&vote).await.unwrap();
        assert_eq!(engine.backend().created_tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_vote_without_sent_poll_is_ignored() {
        let backend = FakeBackend::with_users(vec![
            user(1, "jperez1", "Juan", "Perez Rojas", None),
            user(2, "jperez2", "Juan", "Perez Silva", None),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]);
        let engine = engine_with(backend, FakeChannel::without_polls());
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Juan Perez\nPROBLEMA: sin red"))
            .await
            .unwrap();
        assert!(engine.channel().polls().is_empty());

        // The selection fell back to a numbered text prompt; a stray vote
        // cannot refer to it.
        let vote = PollVote {
            chat_id: "room".to_string(),
            sender_id: "abc@transport".to_string(),
            sender_number: TECH_PHONE.to_string(),
            poll_id: Some("poll-1".to_string()),
            selected_indexes: vec![0],
            selected_labels: Vec::new(),
        };
        engine.handle_poll_vote(&vote).await.unwrap();
        assert!(engine.backend().created_tickets().is_empty());

        engine.handle_message(&msg("1")).await.unwrap();
        assert_eq!(engine.backend().created_tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_session_retryable() {
        let mut backend = FakeBackend::with_users(users());
        backend.fail_create = true;
        let engine = engine(backend);

        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();

        let reply = engine.channel().last_reply().unwrap();
        assert!(reply.contains("No se pudo crear"));
        assert!(engine.backend().created_tickets().is_empty());

        // The session survives the failure: an end command re-attempts
        // creation instead of cancelling.
        engine.handle_message(&msg("fin")).await.unwrap();

        let replies = engine.channel().replies();
        let failures = replies
            .iter()
            .filter(|(_, t)| t.contains("No se pudo crear"))
            .count();
        assert_eq!(failures, 2);
        assert!(!replies.iter().any(|(_, t)| t.contains("Sesión cancelada")));
        assert!(!replies.iter().any(|(_, t)| t.contains("finalizado")));
    }

    #[tokio::test]
    async fn test_media_preserves_original_filename() {
        let mut channel = FakeChannel::new();
        channel.media_filename = Some("captura.png".to_string());
        let engine = engine_with(FakeBackend::with_users(users()), channel);
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();
        engine
            .handle_message(&media_msg("pantallazo", "image/png"))
            .await
            .unwrap();

        let uploaded = engine.backend().uploaded_documents();
        assert_eq!(uploaded, vec![("captura".to_string(), "captura.png".to_string())]);
    }

    #[tokio::test]
    async fn test_buffered_attachments_flush_in_order_after_creation() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&media_msg("uno", "application/pdf"))
            .await
            .unwrap();
        engine
            .handle_message(&media_msg("dos", "application/pdf"))
            .await
            .unwrap();
        assert!(engine.backend().uploaded_documents().is_empty());

        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();

        let uploaded = engine.backend().uploaded_documents();
        assert_eq!(
            uploaded,
            vec![
                ("adjunto-1".to_string(), "adjunto-1.pdf".to_string()),
                ("adjunto-2".to_string(), "adjunto-2.pdf".to_string()),
            ]
        );
        assert_eq!(engine.backend().document_links(), vec![(500, 1000), (501, 1000)]);
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_block_the_rest() {
        let mut backend = FakeBackend::with_users(users());
        backend.fail_upload_filenames = vec!["adjunto-1.pdf".to_string()];
        let engine = engine(backend);

        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&media_msg("uno", "application/pdf"))
            .await
            .unwrap();
        engine
            .handle_message(&media_msg("dos", "application/pdf"))
            .await
            .unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();
        engine.handle_message(&msg("fin")).await.unwrap();

        let uploaded = engine.backend().uploaded_documents();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].1, "adjunto-2.pdf");
        assert!(engine
            .channel()
            .last_reply()
            .unwrap()
            .contains("Adjuntos subidos: 1"));
    }

    #[tokio::test]
    async fn test_media_after_creation_uploads_immediately() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();
        engine
            .handle_message(&media_msg("pantallazo", "image/png"))
            .await
            .unwrap();

        let uploaded = engine.backend().uploaded_documents();
        assert_eq!(uploaded, vec![("adjunto-1".to_string(), "adjunto-1.png".to_string())]);

        engine.handle_message(&msg("fin")).await.unwrap();
        assert!(engine
            .channel()
            .last_reply()
            .unwrap()
            .contains("Adjuntos subidos: 1"));
    }

    #[tokio::test]
    async fn test_end_without_complete_draft_cancels_session() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg("fin")).await.unwrap();

        assert!(engine
            .channel()
            .last_reply()
            .unwrap()
            .contains("Sesión cancelada"));

        // The session is gone: later data goes nowhere.
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();
        assert!(engine.backend().created_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_end_reports_and_destroys() {
        let engine = engine(FakeBackend::with_users(users()));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();
        engine.handle_message(&msg("fin")).await.unwrap();

        let reply = engine.channel().last_reply().unwrap();
        assert!(reply.contains("Ticket #1000 finalizado"));
        assert!(reply.contains("Adjuntos subidos: 0"));

        let replies_before = engine.channel().replies().len();
        engine.handle_message(&msg("fin")).await.unwrap();
        assert_eq!(engine.channel().replies().len(), replies_before);
    }

    #[tokio::test]
    async fn test_end_while_selection_pending_defers() {
        let engine = engine(FakeBackend::with_users(vec![
            user(1, "jperez1", "Juan", "Perez Rojas", None),
            user(2, "jperez2", "Juan", "Perez Silva", None),
            user(7, "crojas", "Carlos", "Rojas", None),
        ]));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Juan Perez\nPROBLEMA: sin red"))
            .await
            .unwrap();
        engine.handle_message(&msg("fin")).await.unwrap();

        assert!(engine
            .channel()
            .last_reply()
            .unwrap()
            .contains("selección pendiente"));
        assert!(engine.backend().created_tickets().is_empty());

        // Resolving the selection still completes the flow.
        engine.handle_message(&msg("1")).await.unwrap();
        assert_eq!(engine.backend().created_tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_backend_short_circuits() {
        let mut backend = FakeBackend::with_users(users());
        backend.enabled = false;
        let engine = engine(backend);

        engine.handle_message(&msg("ticket")).await.unwrap();
        engine.handle_message(&msg(COMPLETE_BODY)).await.unwrap();

        assert!(engine
            .channel()
            .last_reply()
            .unwrap()
            .contains("no está configurado"));
        assert_eq!(engine.backend().search_count(), 0);
        assert!(engine.backend().created_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_requester_prompts_for_id() {
        let engine = engine(FakeBackend::with_users(vec![user(
            7, "crojas", "Carlos", "Rojas", None,
        )]));
        engine.handle_message(&msg("ticket")).await.unwrap();
        engine
            .handle_message(&msg("SOLICITANTE: Maria Quispe\nPROBLEMA: sin red"))
            .await
            .unwrap();

        assert!(engine.channel().last_reply().unwrap().contains("DNI"));
        assert!(engine.backend().created_tickets().is_empty());

        // The session survives; a resolvable value retries creation.
        engine
            .handle_message(&msg("SOLICITANTE: Carlos Rojas"))
            .await
            .unwrap();
        assert_eq!(engine.backend().created_tickets().len(), 1);
    }
}
