//! Inbound events: the tagged form of everything a user can send.

use crate::store::{ProblemCategory, UserIdentity};

/// One user action, already classified by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user: UserIdentity,
    /// Where replies go. Equal to the user id in private chats.
    pub chat_id: String,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(user: UserIdentity, chat_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            user,
            chat_id: chat_id.into(),
            kind,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Command(Command),
    MenuChoice(MenuChoice),
    FreeText(String),
    ButtonPress(ButtonTag),
}

impl EventKind {
    /// Classify a text message: known command, main-menu label, or free text.
    pub fn from_text(text: &str) -> Self {
        if let Some(command) = Command::parse(text) {
            return Self::Command(command);
        }
        if let Some(choice) = MenuChoice::from_label(text) {
            return Self::MenuChoice(choice);
        }
        Self::FreeText(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Test,
    Stats,
    Export,
}

impl Command {
    /// Parse `/name`, `/name@bot` or `/name args`. Unknown names yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "test" => Some(Self::Test),
            "stats" => Some(Self::Stats),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    /// Commands reserved for the operator.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Stats | Self::Export)
    }
}

/// Entries of the persistent main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    GetGuide,
    BookConsultation,
    About,
}

impl MenuChoice {
    pub const ALL: [MenuChoice; 3] = [Self::GetGuide, Self::BookConsultation, Self::About];

    pub fn label(&self) -> &'static str {
        match self {
            Self::GetGuide => "🎁 Get the free guide",
            Self::BookConsultation => "📞 Book a consultation",
            Self::About => "ℹ️ About the psychologist",
        }
    }

    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL.into_iter().find(|choice| choice.label() == text)
    }
}

/// Inline button payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonTag {
    /// One of the fixed categories. Never `Custom`.
    Category(ProblemCategory),
    CustomProblem,
    Signup,
}

impl ButtonTag {
    /// Buttons shown under the problem question, in display order.
    pub const PROBLEM_CHOICES: [ButtonTag; 4] = [
        Self::Category(ProblemCategory::Anxiety),
        Self::Category(ProblemCategory::Relationships),
        Self::Category(ProblemCategory::BurnoutSelfEsteem),
        Self::CustomProblem,
    ];

    /// Callback payload. These strings are what already-sent buttons carry,
    /// so they must not change.
    pub fn data(&self) -> &'static str {
        match self {
            Self::Category(ProblemCategory::Anxiety) => "btn_anxiety",
            Self::Category(ProblemCategory::Relationships) => "btn_relations",
            Self::Category(ProblemCategory::BurnoutSelfEsteem) => "btn_self",
            Self::Category(ProblemCategory::Custom) | Self::CustomProblem => "btn_custom",
            Self::Signup => "btn_signup",
        }
    }

    pub fn from_data(data: &str) -> Option<Self> {
        match data {
            "btn_anxiety" => Some(Self::Category(ProblemCategory::Anxiety)),
            "btn_relations" => Some(Self::Category(ProblemCategory::Relationships)),
            "btn_self" => Some(Self::Category(ProblemCategory::BurnoutSelfEsteem)),
            "btn_custom" => Some(Self::CustomProblem),
            "btn_signup" => Some(Self::Signup),
            _ => None,
        }
    }

    /// Button caption.
    pub fn caption(&self) -> &'static str {
        match self {
            Self::Category(ProblemCategory::Anxiety) => "😰 Anxiety and stress",
            Self::Category(ProblemCategory::Relationships) => "💑 Relationships and family",
            Self::Category(ProblemCategory::BurnoutSelfEsteem) => "😔 Burnout and self-esteem",
            Self::Category(ProblemCategory::Custom) | Self::CustomProblem => {
                "✏️ Describe my own problem"
            }
            Self::Signup => "✍️ Book a free consultation",
        }
    }
}
