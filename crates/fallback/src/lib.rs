//! Fallback execution for when the primary MCP tool path is unhealthy, times
//! out or fails at the transport level.

pub mod email;
pub mod error;
pub mod executor;
pub mod strategy;

pub use {
    email::{EmailArgs, LettreMailer, MailTransport, SmtpEmailFallback},
    error::{Error, Result},
    executor::FallbackExecutor,
    strategy::{ActionResult, FallbackStrategy},
};
