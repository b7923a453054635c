use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::{LinkConfig, SmtpConfig};

use super::format::{display_rows, escape_html};
use super::intake::FileMap;
use super::pdf::RenderedPdf;
use super::schema::FormSchema;
use super::submissions::Submission;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid mailbox '{address}': {reason}")]
    Address { address: String, reason: String },
    #[error("unable to build message: {0}")]
    Build(String),
    #[error("smtp transport error: {0}")]
    Transport(String),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// One message addressed to a single recipient.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP delivery over lettre's tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let transport_err = |err: lettre::transport::smtp::Error| MailError::Transport(err.to_string());

        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host).map_err(transport_err)?
        } else {
            let tls = TlsParameters::new(config.host.clone()).map_err(transport_err)?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
                .tls(Tls::Opportunistic(tls))
        };

        let mut builder = builder.port(config.port).timeout(Some(config.timeout));
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(&config.from)?,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|err: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        reason: err.to_string(),
    })
}

fn content_type(raw: &str) -> ContentType {
    ContentType::parse(raw).unwrap_or(ContentType::TEXT_PLAIN)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.html));
        for attachment in email.attachments {
            body = body.singlepart(
                Attachment::new(attachment.file_name)
                    .body(attachment.bytes.to_vec(), content_type(&attachment.content_type)),
            );
        }

        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&email.to)?)
            .subject(email.subject)
            .multipart(body)
            .map_err(|err| MailError::Build(err.to_string()))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|err| MailError::Transport(err.to_string()))
    }
}

/// What the notifier needs to know about an accepted submission.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    pub form: &'a FormSchema,
    pub submission: &'a Submission,
    pub recipients: &'a [String],
    /// Attached when present; callers pass it only for forms that request the PDF.
    pub pdf: Option<&'a RenderedPdf>,
    pub uploads: &'a FileMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub delivered: Vec<String>,
    pub failed: Vec<FailedDelivery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    pub recipient: String,
    pub reason: String,
}

impl NotificationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    links: LinkConfig,
    timeout: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, links: LinkConfig, timeout: Duration) -> Self {
        Self {
            mailer,
            links,
            timeout,
        }
    }

    /// Sends one copy per recipient concurrently. Failures are collected in the report
    /// and logged; nothing is raised to the caller.
    pub async fn notify(&self, notification: Notification<'_>) -> NotificationReport {
        let recipients: Vec<&String> = notification
            .recipients
            .iter()
            .filter(|address| !address.trim().is_empty())
            .collect();
        if recipients.is_empty() {
            debug!(form = %notification.form.slug, "no notification recipients configured");
            return NotificationReport::default();
        }

        let subject = format!("New Form Submission: {}", notification.form.name);
        let html = self.render_html(&notification);
        let attachments = attachments_for(&notification);

        let sends = recipients.iter().map(|recipient| {
            let email = OutgoingEmail {
                to: recipient.to_string(),
                subject: subject.clone(),
                html: html.clone(),
                attachments: attachments.clone(),
            };
            async move {
                let outcome = match tokio::time::timeout(self.timeout, self.mailer.send(email)).await {
                    Ok(result) => result,
                    Err(_) => Err(MailError::Timeout(self.timeout)),
                };
                (recipient.to_string(), outcome)
            }
        });

        let mut report = NotificationReport::default();
        for (recipient, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => report.delivered.push(recipient),
                Err(err) => {
                    error!(submission = %notification.submission.id, recipient = %recipient, error = %err, "notification email failed");
                    report.failed.push(FailedDelivery {
                        recipient,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            submission = %notification.submission.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "notification emails processed"
        );
        report
    }

    fn render_html(&self, notification: &Notification<'_>) -> String {
        let submission = notification.submission;
        let rows = display_rows(notification.form, &submission.data);
        let fields = if rows.is_empty() {
            "<p>No data submitted.</p>".to_string()
        } else {
            rows.iter()
                .map(|(label, value)| {
                    format!(
                        "<div class=\"field\"><div class=\"field-label\">{}:</div><div class=\"field-value\">{}</div></div>",
                        escape_html(label),
                        escape_html(value).replace('\n', "<br>")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let admin_link = format!(
            "{}/admin/content-manager/collection-types/api::form-submission.form-submission/{}",
            self.links.admin_url, submission.id
        );
        let pdf_link = submission
            .pdf
            .as_ref()
            .map(|_| {
                format!(
                    "<p><a href=\"{}/api/form-submissions/{}/pdf\">Download PDF</a></p>",
                    self.links.server_url, submission.id
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body>
<h1>New Form Submission</h1>
<p><strong>Form:</strong> {form}</p>
<p><strong>Submitted At:</strong> {submitted_at}</p>
<p><strong>IP Address:</strong> {ip}</p>
<hr>
<h3>Submission Data:</h3>
{fields}
<hr>
<p><a href="{admin_link}">View in Admin Panel</a></p>
{pdf_link}
<p>This is an automated notification from {app_name}</p>
</body>
</html>"#,
            form = escape_html(&notification.form.name),
            submitted_at = submission.submitted_at.format("%d/%m/%Y %H:%M:%S UTC"),
            ip = escape_html(submission.ip.as_deref().unwrap_or("N/A")),
            app_name = escape_html(&self.links.app_name),
        )
    }
}

fn attachments_for(notification: &Notification<'_>) -> Vec<EmailAttachment> {
    let mut attachments = Vec::new();
    if let Some(pdf) = notification.pdf {
        let file_name = notification
            .submission
            .pdf
            .as_ref()
            .map(|file| file.name.clone())
            .unwrap_or_else(|| format!("submission-{}.pdf", notification.submission.id));
        attachments.push(EmailAttachment {
            file_name,
            content_type: mime::APPLICATION_PDF.to_string(),
            bytes: pdf.bytes.clone(),
        });
    }
    attachments.extend(notification.uploads.iter().map(|upload| EmailAttachment {
        file_name: upload.file_name.clone(),
        content_type: upload.content_type.clone(),
        bytes: upload.bytes.clone(),
    }));
    attachments
}
