//! Direct SMTP submission for email intents.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::Utc,
    lettre::{
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        message::{Mailbox, header::ContentType},
        transport::smtp::authentication::Credentials,
    },
    secrecy::ExposeSecret,
    serde_json::{Value, json},
    toolgate_config::SmtpConfig,
    toolgate_intent::IntentKind,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    strategy::{ActionResult, FallbackStrategy},
};

const STRATEGY: &str = "smtp";
/// Implicit-TLS submission port; anything else negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Sends a fully built message. Swappable so tests can capture mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;
}

/// [`MailTransport`] backed by lettre's async SMTP client.
pub struct LettreMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl LettreMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let (Some(username), Some(password)) = (&config.username, &config.password) else {
            return Err(not_configured("SMTP username and password are required"));
        };
        let credentials = Credentials::new(username.clone(), password.expose_secret().clone());
        let builder = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        Ok(Self {
            transport: builder.port(config.port).credentials(credentials).build(),
        })
    }
}

#[async_trait]
impl MailTransport for LettreMailer {
    async fn send(&self, message: Message) -> Result<()> {
        self.transport.send(message).await?;
        Ok(())
    }
}

/// The recipient, subject and body pulled out of tool arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailArgs {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailArgs {
    /// Accepts the field names used by the common email tools.
    pub fn from_arguments(arguments: &Value) -> Result<Self> {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| arguments.get(*name).and_then(Value::as_str))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let to = field(&["to", "recipient", "email"])
            .ok_or_else(|| Error::InvalidArguments("a recipient ('to') is required".into()))?;
        let body = field(&["body", "text", "message", "content"])
            .ok_or_else(|| Error::InvalidArguments("a message body is required".into()))?;
        Ok(Self {
            to,
            subject: field(&["subject", "title"]).unwrap_or_default(),
            body,
        })
    }
}

pub struct SmtpEmailFallback {
    mailer: Option<Arc<dyn MailTransport>>,
    from: Option<String>,
}

impl SmtpEmailFallback {
    /// Build from operator config. An unconfigured SMTP section yields a
    /// strategy that reports itself unavailable and fails every execution.
    #[must_use]
    pub fn from_config(config: &SmtpConfig) -> Self {
        let from = config.from.clone().or_else(|| config.username.clone());
        if !config.is_configured() {
            return Self { mailer: None, from };
        }
        match LettreMailer::from_config(config) {
            Ok(mailer) => Self {
                mailer: Some(Arc::new(mailer)),
                from,
            },
            Err(e) => {
                warn!(host = %config.host, error = %e, "SMTP fallback disabled");
                Self { mailer: None, from }
            },
        }
    }

    #[must_use]
    pub fn with_transport(mailer: Arc<dyn MailTransport>, from: impl Into<String>) -> Self {
        Self {
            mailer: Some(mailer),
            from: Some(from.into()),
        }
    }
}

#[async_trait]
impl FallbackStrategy for SmtpEmailFallback {
    fn name(&self) -> &'static str {
        STRATEGY
    }

    fn is_available(&self) -> bool {
        self.mailer.is_some() && self.from.is_some()
    }

    async fn execute(&self, arguments: &Value) -> Result<ActionResult> {
        let (Some(mailer), Some(from)) = (&self.mailer, &self.from) else {
            return Err(not_configured("configure smtp.username and smtp.password"));
        };
        let args = EmailArgs::from_arguments(arguments)?;

        let message = Message::builder()
            .from(from.parse::<Mailbox>()?)
            .to(args.to.parse::<Mailbox>()?)
            .subject(args.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(args.body)?;
        mailer.send(message).await?;

        let message_id = format!("fallback_{}", Utc::now().timestamp_millis());
        info!(message_id, "email sent through SMTP fallback");
        Ok(ActionResult {
            intent: IntentKind::Email,
            strategy: STRATEGY,
            message: "Email sent successfully using the fallback SMTP service".into(),
            message_id: Some(message_id),
            data: json!({ "to": args.to, "subject": args.subject }),
        })
    }
}

fn not_configured(reason: &str) -> Error {
    Error::NotConfigured {
        strategy: STRATEGY,
        reason: reason.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use {
        super::*,
        std::sync::Mutex,
        toolgate_common::{Classify, ErrorKind},
    };

    /// Captures messages instead of delivering them.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub(crate) sent: Mutex<Vec<Message>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingMailer {
        async fn send(&self, message: Message) -> Result<()> {
            if self.fail {
                return Err(Error::message("relay rejected the message"));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sends_through_transport() {
        let mailer = Arc::new(RecordingMailer::default());
        let fallback = SmtpEmailFallback::with_transport(mailer.clone(), "bot@example.com");
        assert!(fallback.is_available());

        let result = fallback
            .execute(&json!({"to": "bob@example.com", "subject": "Lunch", "body": "Noon?"}))
            .await
            .unwrap();
        assert_eq!(result.strategy, "smtp");
        assert!(result.message_id.unwrap().starts_with("fallback_"));

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope().to()[0].to_string(), "bob@example.com");
        let raw = String::from_utf8(sent[0].formatted()).unwrap();
        assert!(raw.contains("Subject: Lunch"));
    }

    #[tokio::test]
    async fn unconfigured_smtp_fails_fast() {
        let fallback = SmtpEmailFallback::from_config(&SmtpConfig::default());
        assert!(!fallback.is_available());
        let err = fallback
            .execute(&json!({"to": "bob@example.com", "body": "hi"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured { .. }));
        assert_eq!(err.kind(), ErrorKind::FallbackFailed);
    }

    #[tokio::test]
    async fn rejects_bad_arguments() {
        let fallback =
            SmtpEmailFallback::with_transport(Arc::new(RecordingMailer::default()), "bot@example.com");

        let err = fallback.execute(&json!({"instruction": "mail bob"})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));

        let err = fallback
            .execute(&json!({"to": "not an address", "body": "hi"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Address(_)));
    }

    #[test]
    fn argument_aliases() {
        let args = EmailArgs::from_arguments(&json!({
            "recipient": " ana@example.com ",
            "text": "see you",
        }))
        .unwrap();
        assert_eq!(args, EmailArgs {
            to: "ana@example.com".into(),
            subject: String::new(),
            body: "see you".into(),
        });
    }
}
