use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::env;

const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone)]
struct SmtpSettings {
    host: String,
    port: u16,
    username: String,
    password: String,
    from: String,
    to: String,
}

impl SmtpSettings {
    fn from_env() -> Option<Self> {
        let host = non_empty_env("SMTP_HOST")?;
        let username = non_empty_env("SMTP_USERNAME")?;
        let password = non_empty_env("SMTP_PASSWORD")?;
        let to = non_empty_env("EMAIL_TO")?;
        let from = non_empty_env("EMAIL_FROM").unwrap_or_else(|| username.clone());
        let port = env::var("SMTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SMTP_PORT);
        Some(Self {
            host,
            port,
            username,
            password,
            from,
            to,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Plain-text mail over SMTP with STARTTLS. Unconfigured clients only log.
#[derive(Debug, Clone)]
pub struct EmailClient {
    smtp: Option<SmtpSettings>,
}

impl Default for EmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailClient {
    pub fn new() -> Self {
        Self {
            smtp: SmtpSettings::from_env(),
        }
    }

    pub fn disabled() -> Self {
        Self { smtp: None }
    }

    pub fn is_configured(&self) -> bool {
        self.smtp.is_some()
    }

    /// Fire-and-forget. Inside a tokio runtime delivery moves to the blocking pool.
    pub fn send(&self, subject: &str, body: &str) {
        let Some(smtp) = self.smtp.clone() else {
            log::debug!("[EMAIL] smtp not configured, skipping '{}'", subject);
            return;
        };
        let subject = subject.to_string();
        let body = body.to_string();
        let deliver = move || {
            if let Err(err) = deliver(&smtp, &subject, &body) {
                log::error!("[EMAIL] failed to send '{}': {:?}", subject, err);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(deliver);
            }
            Err(_) => deliver(),
        }
    }
}

fn deliver(smtp: &SmtpSettings, subject: &str, body: &str) -> Result<()> {
    let email = Message::builder()
        .from(smtp.from.parse().context("invalid EMAIL_FROM")?)
        .to(smtp.to.parse().context("invalid EMAIL_TO")?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .context("failed to build email")?;
    let transport = SmtpTransport::starttls_relay(&smtp.host)
        .with_context(|| format!("invalid smtp relay {}", smtp.host))?
        .port(smtp.port)
        .credentials(Credentials::new(
            smtp.username.clone(),
            smtp.password.clone(),
        ))
        .build();
    transport.send(&email).context("smtp send failed")?;
    Ok(())
}
