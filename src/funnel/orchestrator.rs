//! Funnel orchestrator: routes inbound events through the intake machine.
//!
//! Holds each user's session lock for the whole handling of an event, so a
//! user's events never interleave. Arrival order is the job of
//! [`Dispatcher`](crate::funnel::dispatch::Dispatcher), which feeds each
//! user's events to a single worker. Storage
//! writes happen before the new state is applied; a failed write leaves the
//! conversation exactly where it was.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::{Attachment, Keyboard, OutgoingMessage, Transport};
use crate::config::{FunnelConfig, IntakeRules, PractitionerInfo};
use crate::funnel::events::{ButtonTag, Command, EventKind, InboundEvent, MenuChoice};
use crate::funnel::lead_magnet::{Assets, LeadMagnet};
use crate::funnel::sessions::SessionMap;
use crate::funnel::templates::{self, EXCERPT_CHARS};
use crate::intake::{Effect, IntakeInput, IntakeState, Transition, transition};
use crate::reporting::{self, ExportOutcome};
use crate::store::{ContactInfo, ProblemSelection, RecordStore, UserIdentity};

/// Runtime settings the funnel needs from configuration.
#[derive(Debug, Clone)]
pub struct FunnelSettings {
    pub operator_id: Option<String>,
    pub rules: IntakeRules,
    pub practitioner: PractitionerInfo,
    pub guide_path: PathBuf,
    pub welcome_image_path: PathBuf,
    pub export_dir: PathBuf,
    pub recent_leads: usize,
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self {
            operator_id: None,
            rules: IntakeRules::default(),
            practitioner: PractitionerInfo::default(),
            guide_path: PathBuf::from("guide.pdf"),
            welcome_image_path: PathBuf::from("welcome.jpg"),
            export_dir: std::env::temp_dir(),
            recent_leads: 5,
        }
    }
}

impl From<&FunnelConfig> for FunnelSettings {
    fn from(config: &FunnelConfig) -> Self {
        Self {
            operator_id: config.operator_id.clone(),
            rules: config.rules.clone(),
            practitioner: config.practitioner.clone(),
            guide_path: config.guide_path.clone(),
            welcome_image_path: config.welcome_image_path.clone(),
            export_dir: config.export_dir.clone(),
            recent_leads: config.recent_leads,
        }
    }
}

/// The lead funnel: one instance serves every user.
pub struct Funnel {
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    sessions: SessionMap,
    assets: Assets,
    settings: FunnelSettings,
}

impl Funnel {
    pub fn new(
        settings: FunnelSettings,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let assets = Assets::new(&settings.guide_path, &settings.welcome_image_path);
        Self {
            store,
            transport,
            sessions: SessionMap::new(),
            assets,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn is_operator(&self, user_id: &str) -> bool {
        self.settings.operator_id.as_deref() == Some(user_id)
    }

    /// Handle one inbound event to completion.
    pub async fn handle(&self, event: InboundEvent) {
        let slot = self.sessions.slot(event.user_id()).await;
        {
            let mut state = slot.lock().await;
            self.route(&event, &mut state).await;
        }
        drop(slot);
        self.sessions.release(event.user_id()).await;
    }

    async fn route(&self, event: &InboundEvent, state: &mut IntakeState) {
        debug!(user_id = %event.user_id(), state = %*state, kind = ?event.kind, "Inbound event");

        match &event.kind {
            EventKind::Command(command) => self.on_command(event, *command, state).await,
            EventKind::MenuChoice(choice) => {
                self.ensure_record(&event.user).await;
                self.on_menu(event, *choice, state).await;
            }
            EventKind::ButtonPress(tag) => {
                self.ensure_record(&event.user).await;
                let input = match tag {
                    ButtonTag::Category(category) => IntakeInput::ChooseCategory(*category),
                    ButtonTag::CustomProblem => IntakeInput::ChooseCustom,
                    ButtonTag::Signup => IntakeInput::StartSignup,
                };
                self.advance(event, state, input).await;
            }
            EventKind::FreeText(text) => {
                self.ensure_record(&event.user).await;
                self.advance(event, state, IntakeInput::Text(text.clone()))
                    .await;
            }
        }
    }

    /// Tell the operator the bot is up. Best effort.
    pub async fn announce_startup(&self) {
        let Some(operator) = self.settings.operator_id.as_deref() else {
            return;
        };
        let notice = OutgoingMessage::text(templates::startup_notice(Utc::now()));
        match self.transport.send(operator, notice).await {
            Ok(()) => info!("Startup notice sent to operator"),
            Err(e) => warn!(error = %e, "Failed to send startup notice"),
        }
    }

    // ── Routing ─────────────────────────────────────────────────────

    async fn on_command(&self, event: &InboundEvent, command: Command, state: &mut IntakeState) {
        let chat = event.chat_id.as_str();

        if command.is_admin() && !self.is_operator(event.user_id()) {
            warn!(user_id = %event.user_id(), ?command, "Admin command refused");
            self.reply(chat, OutgoingMessage::text(templates::permission_denied()))
                .await;
            return;
        }

        match command {
            Command::Start => {
                info!(user_id = %event.user_id(), "Funnel started");
                self.ensure_record(&event.user).await;
                *state = IntakeState::Idle;
                self.send_welcome(event).await;
            }
            Command::Help => {
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::help(&self.settings.rules)),
                )
                .await;
            }
            Command::Test => {
                self.reply(chat, OutgoingMessage::text(templates::test_ok()))
                    .await;
            }
            Command::Stats => self.send_stats(chat).await,
            Command::Export => self.send_export(chat).await,
        }
    }

    async fn on_menu(&self, event: &InboundEvent, choice: MenuChoice, state: &mut IntakeState) {
        let chat = event.chat_id.as_str();
        match choice {
            MenuChoice::GetGuide => {
                info!(user_id = %event.user_id(), "Guide requested");
                self.send_guide(chat).await;
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::guide_question()).with_keyboard(Keyboard::Remove),
                )
                .await;
                self.advance(event, state, IntakeInput::OpenMenu).await;
            }
            MenuChoice::BookConsultation => {
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::consultation_intro())
                        .with_keyboard(Keyboard::Remove),
                )
                .await;
                self.advance(event, state, IntakeInput::OpenMenu).await;
            }
            MenuChoice::About => {
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::about(&self.settings.practitioner)),
                )
                .await;
            }
        }
    }

    // ── State machine ───────────────────────────────────────────────

    /// Feed one input to the intake machine and carry out its effect.
    async fn advance(&self, event: &InboundEvent, state: &mut IntakeState, input: IntakeInput) {
        let Transition { next, effect } = transition(state, input, &self.settings.rules);
        let user_id = event.user_id();

        let committed = match &effect {
            Effect::CommitProblem(selection) => self.store.set_problem(user_id, selection).await,
            Effect::CommitContact(contact) => self.store.set_contact_info(user_id, contact).await,
            _ => Ok(()),
        };
        if let Err(e) = committed {
            error!(user_id, state = %state, error = %e, "Commit failed; conversation unchanged");
            self.reply(&event.chat_id, OutgoingMessage::text(templates::store_failure()))
                .await;
            return;
        }

        if *state != next {
            debug!(user_id, from = %state, to = %next, "Intake transition");
        }
        *state = next;
        self.perform(event, effect).await;
    }

    async fn perform(&self, event: &InboundEvent, effect: Effect) {
        let chat = event.chat_id.as_str();
        match effect {
            Effect::ShowProblemMenu => {
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::choose_option())
                        .with_keyboard(Keyboard::ProblemChoices),
                )
                .await;
            }
            Effect::PromptCustomProblem => {
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::custom_problem_prompt())
                        .with_keyboard(Keyboard::Remove),
                )
                .await;
            }
            Effect::PromptName => {
                self.reply(chat, OutgoingMessage::text(templates::name_prompt()))
                    .await;
            }
            Effect::PromptAge { name } => {
                self.reply(chat, OutgoingMessage::text(templates::age_prompt(&name)))
                    .await;
            }
            Effect::PromptContact { age } => {
                self.reply(chat, OutgoingMessage::text(templates::contact_prompt(age)))
                    .await;
            }
            Effect::Reprompt(reason) => {
                self.reply(chat, OutgoingMessage::text(templates::reprompt(&reason)))
                    .await;
            }
            Effect::CommitProblem(selection) => {
                let text = match &selection {
                    ProblemSelection::Fixed(category) => format!(
                        "{}\n\n{}",
                        templates::category_response(*category),
                        templates::diagnostic_offer()
                    ),
                    ProblemSelection::Custom(text) => templates::custom_problem_ack(text),
                };
                self.reply(chat, OutgoingMessage::text(text)).await;
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::signup_prompt())
                        .with_keyboard(Keyboard::SignupOffer),
                )
                .await;
            }
            Effect::CommitContact(contact) => {
                info!(user_id = %event.user_id(), "Lead completed");
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::confirmation(&self.settings.practitioner))
                        .with_keyboard(Keyboard::Remove),
                )
                .await;
                self.notify_operator(event.user_id(), &contact).await;
            }
            Effect::Unhandled => {
                self.reply(
                    chat,
                    OutgoingMessage::text(templates::fallback_hint())
                        .with_keyboard(Keyboard::MainMenu),
                )
                .await;
            }
        }
    }

    // ── Side effects ────────────────────────────────────────────────

    async fn ensure_record(&self, user: &UserIdentity) {
        if let Err(e) = self.store.create_if_absent(user).await {
            error!(user_id = %user.user_id, error = %e, "Could not create lead record");
        }
    }

    /// Send and log failures. Sends are best effort.
    async fn reply(&self, chat_id: &str, message: OutgoingMessage) -> bool {
        let kind = message.kind();
        match self.transport.send(chat_id, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chat_id, kind, error = %e, "Send failed");
                false
            }
        }
    }

    async fn send_welcome(&self, event: &InboundEvent) {
        let text = templates::welcome(event.user.first_name());
        if let Some(image) = self.assets.welcome_image().await {
            let photo = OutgoingMessage::photo(image, text.clone()).with_keyboard(Keyboard::MainMenu);
            if self.reply(&event.chat_id, photo).await {
                return;
            }
        }
        self.reply(
            &event.chat_id,
            OutgoingMessage::text(text).with_keyboard(Keyboard::MainMenu),
        )
        .await;
    }

    async fn send_guide(&self, chat: &str) {
        let guide = self.assets.guide().await;
        if guide.is_fallback() {
            debug!("Sending generated stand-in guide");
        }
        let caption = match &guide {
            LeadMagnet::Document(_) => templates::guide_caption(),
            LeadMagnet::Fallback(_) => templates::fallback_guide_caption(),
        };
        let document = OutgoingMessage::document(guide.into_attachment(), Some(caption.to_string()));
        if !self.reply(chat, document).await {
            self.reply(chat, OutgoingMessage::text(templates::guide_unavailable()))
                .await;
        }
    }

    /// Best-effort notice to the operator about a completed lead.
    async fn notify_operator(&self, user_id: &str, contact: &ContactInfo) {
        let Some(operator) = self.settings.operator_id.as_deref() else {
            debug!(user_id, "No operator configured; skipping notification");
            return;
        };

        let problem = match self.store.get_problem(user_id).await {
            Ok(problem) => templates::problem_display(&problem, EXCERPT_CHARS),
            Err(e) => {
                warn!(user_id, error = %e, "Could not load problem for notification");
                "could not be determined".to_string()
            }
        };

        let text = templates::operator_notification(user_id, contact, &problem, Utc::now());
        match self.transport.send(operator, OutgoingMessage::text(text)).await {
            Ok(()) => info!(user_id, "Operator notified"),
            Err(e) => error!(user_id, error = %e, "Operator notification failed"),
        }
    }

    async fn send_stats(&self, chat: &str) {
        let text = match self.store.aggregate_stats(self.settings.recent_leads).await {
            Ok(stats) => reporting::render_stats(&stats, Utc::now()),
            Err(e) => {
                error!(error = %e, "Stats unavailable");
                templates::stats_unavailable().to_string()
            }
        };
        self.reply(chat, OutgoingMessage::text(text)).await;
    }

    async fn send_export(&self, chat: &str) {
        self.reply(chat, OutgoingMessage::text(templates::export_started()))
            .await;

        let now = Utc::now();
        let artifact =
            match reporting::export_leads(self.store.as_ref(), &self.settings.export_dir, now).await {
                Ok(ExportOutcome::Written(artifact)) => artifact,
                Ok(ExportOutcome::Empty) => {
                    self.reply(chat, OutgoingMessage::text(templates::export_empty()))
                        .await;
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Export failed");
                    self.reply(chat, OutgoingMessage::text(templates::export_failed(&e.to_string())))
                        .await;
                    return;
                }
            };

        let caption = match self.store.aggregate_stats(0).await {
            Ok(stats) => templates::export_caption(stats.total_users, stats.complete_records, now),
            Err(_) => templates::export_caption(artifact.rows as u64, 0, now),
        };

        match tokio::fs::read(&artifact.path).await {
            Ok(bytes) => {
                let file = Attachment::new(artifact.file_name(), bytes);
                self.reply(chat, OutgoingMessage::document(file, Some(caption)))
                    .await;
            }
            Err(e) => {
                error!(path = %artifact.path.display(), error = %e, "Export file unreadable");
                self.reply(chat, OutgoingMessage::text(templates::export_failed(&e.to_string())))
                    .await;
            }
        }

        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!(path = %artifact.path.display(), error = %e, "Could not delete export file");
        }
    }
}
