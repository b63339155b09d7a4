//! The lead funnel: ordered dispatch, event routing, message texts, assets
//! and sessions.

pub mod dispatch;
pub mod events;
pub mod lead_magnet;
pub mod orchestrator;
pub mod sessions;
pub mod templates;

pub use dispatch::Dispatcher;
pub use events::{ButtonTag, Command, EventKind, InboundEvent, MenuChoice};
pub use orchestrator::{Funnel, FunnelSettings};
