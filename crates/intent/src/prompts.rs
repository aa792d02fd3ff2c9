//! Chat text shown verbatim by the calling application, plus parsing of the
//! `confirm <id>` / `cancel <id>` replies.

use std::fmt::Write as _;

use crate::{
    catalog::{IntentKind, entry_for},
    confirm::{ConfirmationAction, ConfirmationRecord},
    detector::{IntentMatch, ServerRef},
};

const MESSAGE_PREVIEW_CHARS: usize = 100;

/// Shown when an intent was detected but the user has no server for it.
#[must_use]
pub fn setup_guide(intent: &IntentMatch) -> String {
    let entry = entry_for(intent.kind);
    let required = intent.capabilities.join(", ");
    format!(
        "**{label} Setup Required**\n\n\
         {guide}\n\n\
         **To get started:**\n\
         1. Go to Settings, MCP Servers\n\
         2. Add one of the required servers: {required}\n\
         3. Configure your credentials\n\
         4. Try your request again",
        label = intent.kind.label(),
        guide = entry.setup_guide,
    )
}

#[must_use]
pub fn confirmation_request(record: &ConfirmationRecord) -> String {
    let id = &record.confirmation_id;
    let minutes = (record.expires_at - record.created_at).num_minutes().max(1);
    let mut text = format!(
        "**Action Confirmation Required**\n\n\
         {intro}\n\n\
         **Action:** {label}\n\
         **Message:** \"{preview}\"\n\
         **MCP Servers:** {servers}\n\n\
         **Confirmation ID:** `{id}`\n\n\
         **To proceed, reply with:**\n\
         - `confirm {id}` to execute the action\n\
         - `cancel {id}` to cancel it\n\n",
        intro = entry_for(record.intent_kind).confirmation_message,
        label = record.intent_kind.label(),
        preview = preview(&record.original_message),
        servers = server_names(&record.candidate_servers),
    );
    let _ = write!(
        text,
        "This confirmation expires in {minutes} minute{}.",
        if minutes == 1 { "" } else { "s" }
    );
    text
}

#[must_use]
pub fn execution_notice(record: &ConfirmationRecord) -> String {
    format!(
        "**Executing Action**\n\n\
         **Action:** {}\n\
         **MCP Servers:** {}\n\n\
         Processing your request. This may take a few moments.",
        record.intent_kind.label(),
        server_names(&record.candidate_servers),
    )
}

#[must_use]
pub fn cancellation_notice(record: &ConfirmationRecord) -> String {
    format!(
        "**Action Cancelled**\n\n\
         **Action:** {}\n\n\
         The action has been cancelled. You can try again anytime.",
        record.intent_kind.label(),
    )
}

/// The user must restate the request; nothing is retried with stale input.
#[must_use]
pub fn expired_notice(kind: Option<IntentKind>) -> String {
    let mut text = String::from("**Confirmation Expired**\n\n");
    if let Some(kind) = kind {
        let _ = writeln!(text, "**Action:** {}\n", kind.label());
    }
    text.push_str(
        "The confirmation has expired. Please make your request again to get a new confirmation.",
    );
    text
}

#[must_use]
pub fn reauth_prompt(provider: &str, authorize_link: &str) -> String {
    format!(
        "**Re-authentication Required**\n\n\
         Your {provider} authorization is missing or has expired. \
         Re-authenticate with {provider} to continue: {authorize_link}\n\n\
         Then send your request again."
    )
}

/// Recognise `confirm <id>` or `cancel <id>` (case-insensitive keyword,
/// surrounding whitespace and backticks ignored).
#[must_use]
pub fn parse_confirmation_command(text: &str) -> Option<(ConfirmationAction, String)> {
    let text = text.trim().trim_matches('`').trim();
    let mut words = text.split_whitespace();
    let action = match words.next()?.to_ascii_lowercase().as_str() {
        "confirm" => ConfirmationAction::Confirm,
        "cancel" => ConfirmationAction::Cancel,
        _ => return None,
    };
    let id = words.next()?.trim_matches('`');
    if id.is_empty() || words.next().is_some() {
        return None;
    }
    Some((action, id.to_string()))
}

fn preview(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(MESSAGE_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn server_names(servers: &[ServerRef]) -> String {
    servers
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
