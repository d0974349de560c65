//! Host notification over SMTP.
//!
//! Each recipient is handled independently: one bad address or one bounced
//! delivery never blocks the rest. A failed send gets exactly one immediate
//! resend, then the failure is reported upwards instead of retried forever.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Spin, Timeslot};
use crate::utils::email::is_valid_address;

/// Errors from the email transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {recipient} failed: {reason}")]
    DeliveryFailed { recipient: String, reason: String },
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
}

/// One email, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Transport seam so delivery logic is testable without an SMTP server.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingEmail) -> Result<(), NotifyError>;
}

/// Outcome of one recipient's delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub recipient: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Operational failure classes that warrant an email to the station admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// The schedule API could not be reached after exhausting retries.
    ScheduleFetch,
    /// A capture process failed to launch for a due show.
    CaptureLaunch,
    /// A recording could not be uploaded after exhausting retries.
    Upload,
}

impl AlertKind {
    fn subject(self) -> &'static str {
        match self {
            Self::ScheduleFetch => "Recording Bot Schedule API Error",
            Self::CaptureLaunch => "Recording Bot FFMPEG Error",
            Self::Upload => "Recording Bot AWS S3 Error",
        }
    }

    fn summary(self) -> &'static str {
        match self {
            Self::ScheduleFetch => {
                "The bot was unable to retrieve data from the schedule API after multiple attempts.\n\
                 Please check the API key in the configuration and ensure it is correct."
            }
            Self::CaptureLaunch => "The bot was unable to record a show due to an ffmpeg error.",
            Self::Upload => "The bot was unable to upload a recorded show to S3.",
        }
    }
}

/// SMTP transport via lettre, STARTTLS with credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        address: &str,
        password: &str,
    ) -> crate::Result<Self> {
        let from: Mailbox = address
            .parse()
            .map_err(|e| crate::Error::config(format!("invalid sender address {address}: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| crate::Error::config(format!("invalid smtp relay {host}: {e}")))?
            .port(port)
            .credentials(Credentials::new(address.to_string(), password.to_string()))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingEmail) -> Result<(), NotifyError> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|_| NotifyError::InvalidAddress(mail.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| NotifyError::DeliveryFailed {
                recipient: mail.to.clone(),
                reason: e.to_string(),
            })?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::DeliveryFailed {
                recipient: mail.to.clone(),
                reason: e.to_string(),
            })
    }
}

/// Builds and delivers the download emails for a finished show.
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    station_name: String,
    /// Where mail for hosts with a broken public address goes instead.
    fallback_address: Option<String>,
}

impl Notifier {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        station_name: impl Into<String>,
        fallback_address: Option<String>,
    ) -> Self {
        Self {
            mailer,
            station_name: station_name.into(),
            fallback_address,
        }
    }

    /// Send the download link for `slot` to every recipient.
    ///
    /// An empty recipient set is skipped with a log line, not an error.
    pub async fn notify(
        &self,
        slot: &Timeslot,
        remote_url: &str,
        spins: &[Spin],
    ) -> Vec<DeliveryReport> {
        if slot.recipients.is_empty() {
            info!(
                timeslot_id = slot.id,
                show = %slot.show_name,
                "no recipients on file, skipping notification"
            );
            return Vec::new();
        }

        let sends = slot
            .recipients
            .iter()
            .map(|recipient| self.deliver_one(slot, recipient, remote_url, spins));
        join_all(sends).await
    }

    async fn deliver_one(
        &self,
        slot: &Timeslot,
        recipient: &str,
        remote_url: &str,
        spins: &[Spin],
    ) -> DeliveryReport {
        let mail = if is_valid_address(recipient) {
            OutgoingEmail {
                to: recipient.to_string(),
                subject: self.download_subject(slot),
                body: self.download_body(slot, remote_url, spins),
            }
        } else if let Some(fallback) = &self.fallback_address {
            // The host's public address is unusable; route the link to the
            // station inbox with a note to fix it.
            warn!(
                timeslot_id = slot.id,
                %recipient,
                %fallback,
                "recipient address invalid, redirecting to fallback"
            );
            OutgoingEmail {
                to: fallback.clone(),
                subject: format!("Public email address needs updating - {}", slot.show_name),
                body: self.fallback_body(slot, recipient, remote_url),
            }
        } else {
            warn!(timeslot_id = slot.id, %recipient, "recipient address invalid, no fallback configured");
            return DeliveryReport {
                recipient: recipient.to_string(),
                delivered: false,
                error: Some(NotifyError::InvalidAddress(recipient.to_string()).to_string()),
            };
        };

        let mut result = self.mailer.send(&mail).await;
        if let Err(first) = &result {
            warn!(
                timeslot_id = slot.id,
                to = %mail.to,
                error = %first,
                "delivery failed, resending once"
            );
            result = self.mailer.send(&mail).await;
        }

        match result {
            Ok(()) => {
                info!(timeslot_id = slot.id, to = %mail.to, "notification sent");
                DeliveryReport {
                    recipient: recipient.to_string(),
                    delivered: true,
                    error: None,
                }
            }
            Err(e) => DeliveryReport {
                recipient: recipient.to_string(),
                delivered: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Email the station admin about an operational failure.
    ///
    /// Goes to the fallback address; dropped with a log line when none is
    /// configured. Delivery is best-effort, never retried.
    pub async fn alert_admin(&self, kind: AlertKind, detail: &str) {
        let Some(admin) = &self.fallback_address else {
            warn!(?kind, detail, "admin alert dropped, no fallback address configured");
            return;
        };

        let mail = OutgoingEmail {
            to: admin.clone(),
            subject: kind.subject().to_string(),
            body: format!(
                "This is an automated email from the {} recording bot.\n\n\
                 {}\n\n\
                 Details: {}\n\n\
                 Check the logs for more information.\n",
                self.station_name,
                kind.summary(),
                detail
            ),
        };

        match self.mailer.send(&mail).await {
            Ok(()) => info!(?kind, to = %mail.to, "admin alert sent"),
            Err(e) => warn!(?kind, error = %e, "admin alert could not be delivered"),
        }
    }

    fn download_subject(&self, slot: &Timeslot) -> String {
        format!(
            "{} Recording Link - {}",
            slot.show_name,
            slot.start.format("%m/%d/%Y")
        )
    }

    fn download_body(&self, slot: &Timeslot, remote_url: &str, spins: &[Spin]) -> String {
        let mut body = format!(
            "Hey!\n\n\
             This is an automated email from {}.\n\n\
             You can use the link below to download your show.\n\
             We only keep your recording for 90 days, so download it to keep it permanently.\n\n\
             Download here: {}\n",
            self.station_name, remote_url
        );

        if !spins.is_empty() {
            body.push_str("\nSpins during your show:\n");
            for spin in spins {
                body.push_str(&format!("{} - {}\n", spin.song, spin.artist));
            }
        }
        body
    }

    fn fallback_body(&self, slot: &Timeslot, recipient: &str, remote_url: &str) -> String {
        format!(
            "This is an automated email from the {} recording bot.\n\n\
             The public email address on file for {} ({}) is not deliverable.\n\
             Please update it with the schedule provider so future recordings reach the host.\n\n\
             The show was recorded and can be downloaded here: {}\n\n\
             Forward this email to the host so they can access the recording.\n",
            self.station_name, slot.show_name, recipient, remote_url
        )
    }
}
