//! Доставка билетов покупателю по email.
//!
//! Отправка идёт после фиксации выпуска билетов и никогда не откатывает его:
//! ошибки только логируются.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MailConfig;

#[derive(Debug, Clone)]
pub struct TicketEmail {
    pub recipient_email: String,
    pub recipient_name: String,
    pub event_title: String,
    pub ticket_numbers: Vec<String>,
    pub quantity: i32,
    pub total_price_cents: i64,
    /// PDF рендерит внешний сервис; прикладываем, если он передан.
    pub pdf_bytes: Option<Vec<u8>>,
}

impl TicketEmail {
    fn subject(&self) -> String {
        format!("Your tickets for {}", self.event_title)
    }

    fn text_body(&self) -> String {
        format!(
            "Hello {},\n\nThank you for your purchase of {} ticket(s) for {}.\n\
             Total paid: {}\n\nTicket numbers:\n{}\n\n\
             Present the QR code of each ticket at the entrance.\n",
            self.recipient_name,
            self.quantity,
            self.event_title,
            format_amount(self.total_price_cents),
            self.ticket_numbers
                .iter()
                .map(|n| format!("  - {}", n))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

pub fn format_amount(cents: i64) -> String {
    format!("KES {}.{:02}", cents / 100, (cents % 100).abs())
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    Address(String),
    #[error("failed to build email: {0}")]
    Build(String),
    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait TicketNotifier: Send + Sync {
    async fn send_ticket(&self, email: TicketEmail) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(host: &str, config: &MailConfig) -> Result<Self, NotifyError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Address(format!("{}: {}", config.from, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {}", e)))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &TicketEmail) -> Result<Message, NotifyError> {
        let to: Mailbox = format!("{} <{}>", email.recipient_name, email.recipient_email)
            .parse::<Mailbox>()
            .or_else(|_| email.recipient_email.parse::<Mailbox>())
            .map_err(|e| NotifyError::Address(format!("{}: {}", email.recipient_email, e)))?;

        let text = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(email.text_body());

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject());

        let message = match &email.pdf_bytes {
            Some(pdf) => {
                let content_type = ContentType::parse("application/pdf")
                    .map_err(|e| NotifyError::Build(e.to_string()))?;
                let attachment = Attachment::new("tickets.pdf".to_string()).body(pdf.clone(), content_type);
                builder.multipart(MultiPart::mixed().singlepart(text).singlepart(attachment))
            }
            None => builder.singlepart(text),
        };
        message.map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl TicketNotifier for SmtpNotifier {
    async fn send_ticket(&self, email: TicketEmail) -> Result<(), NotifyError> {
        let message = self.build_message(&email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        info!(recipient = %email.recipient_email, tickets = email.ticket_numbers.len(), "Ticket email sent");
        Ok(())
    }
}

/// Без SMTP письма только логируются (локальный запуск, тесты).
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl TicketNotifier for LogNotifier {
    async fn send_ticket(&self, email: TicketEmail) -> Result<(), NotifyError> {
        info!(
            recipient = %email.recipient_email,
            event = %email.event_title,
            tickets = ?email.ticket_numbers,
            "SMTP not configured, ticket email skipped"
        );
        Ok(())
    }
}

pub fn notifier_from_config(config: &MailConfig) -> Arc<dyn TicketNotifier> {
    let Some(host) = config.smtp_host.as_deref() else {
        info!("SMTP_HOST not set, ticket emails will only be logged");
        return Arc::new(LogNotifier);
    };
    match SmtpNotifier::new(host, config) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            warn!(error = %e, "SMTP notifier misconfigured, falling back to log notifier");
            Arc::new(LogNotifier)
        }
    }
}

/// Отправка в фоне: результат не влияет на вызывающую операцию.
pub fn dispatch(notifier: Arc<dyn TicketNotifier>, email: TicketEmail) {
    tokio::spawn(async move {
        let recipient = email.recipient_email.clone();
        if let Err(e) = notifier.send_ticket(email).await {
            warn!(recipient = %recipient, error = %e, "Failed to deliver ticket email");
        }
    });
}
