//! SMTP mailer via lettre.

use lettre::message::header::ContentType;
use lettre::message::{Mailbox as Address, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::AccountConfig;
use crate::error::MailerError;
use crate::mail::{Attachment, Mailer};

/// Sends mail through the account's SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &AccountConfig) -> Result<Self, MailerError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| MailerError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { transport })
    }
}

impl Mailer for SmtpMailer {
    fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), MailerError> {
        let email = build_message(from, to, subject, body, attachment)?;

        self.transport
            .send(&email)
            .map_err(|e| MailerError::SendFailed(e.to_string()))?;

        tracing::info!(recipients = to.len(), subject = %subject, "Email sent");
        Ok(())
    }
}

fn parse_address(address: &str) -> Result<Address, MailerError> {
    address.parse().map_err(|e| MailerError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

/// Assemble a lettre message; multipart/mixed only when there is an attachment.
pub fn build_message(
    from: &str,
    to: &[String],
    subject: &str,
    body: &str,
    attachment: Option<Attachment>,
) -> Result<lettre::Message, MailerError> {
    if to.is_empty() {
        return Err(MailerError::Build("no recipients".into()));
    }

    let mut builder = lettre::Message::builder()
        .from(parse_address(from)?)
        .subject(subject);
    for recipient in to {
        builder = builder.to(parse_address(recipient)?);
    }

    let result = match attachment {
        None => builder.body(body.to_string()),
        Some(att) => {
            let content_type = ContentType::parse(&att.content_type)
                .map_err(|e| MailerError::Build(format!("bad content type: {e}")))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(
                        lettre::message::Attachment::new(att.filename)
                            .body(att.content, content_type),
                    ),
            )
        }
    };

    result.map_err(|e| MailerError::Build(e.to_string()))
}
