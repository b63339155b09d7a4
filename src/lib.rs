//! Lead funnel: a Telegram bot that hands out a free guide and collects
//! consultation requests for a practising psychologist.

pub mod channels;
pub mod config;
pub mod error;
pub mod funnel;
pub mod health;
pub mod intake;
pub mod reporting;
pub mod store;
