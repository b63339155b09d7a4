//! Transport abstraction for the funnel's message I/O.
//!
//! A transport turns platform updates into `InboundEvent`s and delivers
//! `OutgoingMessage`s to a chat. Everything platform-specific (markup,
//! button encoding, callback acknowledgement) stays behind this trait.

pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::funnel::events::InboundEvent;

pub use telegram::TelegramTransport;

/// Stream of inbound events produced by a running transport.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Reply markup attached to an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    /// Persistent menu with the three main actions.
    MainMenu,
    /// Inline buttons for the problem categories plus "describe your own".
    ProblemChoices,
    /// Inline button that starts the signup dialog.
    SignupOffer,
    /// Hide any persistent menu.
    Remove,
}

/// An in-memory file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// A message to deliver. Text and captions use HTML markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text {
        text: String,
        keyboard: Option<Keyboard>,
    },
    Document {
        file: Attachment,
        caption: Option<String>,
    },
    Photo {
        file: Attachment,
        caption: Option<String>,
        keyboard: Option<Keyboard>,
    },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn document(file: Attachment, caption: Option<String>) -> Self {
        Self::Document { file, caption }
    }

    pub fn photo(file: Attachment, caption: impl Into<String>) -> Self {
        Self::Photo {
            file,
            caption: Some(caption.into()),
            keyboard: None,
        }
    }

    /// Attach reply markup. Documents carry no keyboard.
    pub fn with_keyboard(mut self, markup: Keyboard) -> Self {
        match &mut self {
            Self::Text { keyboard, .. } | Self::Photo { keyboard, .. } => *keyboard = Some(markup),
            Self::Document { .. } => {}
        }
        self
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Document { .. } => "document",
            Self::Photo { .. } => "photo",
        }
    }
}

/// A bidirectional messaging transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name, for logs.
    fn name(&self) -> &str;

    /// Begin receiving updates.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Deliver one message to `chat_id`.
    async fn send(&self, chat_id: &str, message: OutgoingMessage) -> Result<(), ChannelError>;
}

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
