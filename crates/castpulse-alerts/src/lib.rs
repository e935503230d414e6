//! `castpulse-alerts` — rule evaluation against aggregates, duplicate
//! suppression, and delivery to chat/email channels.

pub mod deliver;
pub mod error;
pub mod evaluate;

pub use deliver::{AlertDeliveryService, EmailNotifier, SlackNotifier};
pub use error::{AlertError, Result};
pub use evaluate::AlertEvaluationService;
