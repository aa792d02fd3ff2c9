//! Intent detection over free-text chat messages, the confirmation gate in
//! front of intent execution, and the chat text that goes with both.

pub mod catalog;
pub mod confirm;
pub mod detector;
pub mod error;
pub mod prompts;

pub use {
    catalog::{CATALOG, IntentEntry, IntentKind, entry_for},
    confirm::{ConfirmationAction, ConfirmationBroker, ConfirmationRecord, ConfirmationStatus},
    detector::{IntentDetector, IntentMatch, ServerRef},
    error::{Error, Result},
    prompts::parse_confirmation_command,
};
