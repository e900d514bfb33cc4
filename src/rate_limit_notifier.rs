use crate::email_client::EmailClient;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const NOTIFY_COOLDOWN: Duration = Duration::from_secs(600);

static RATE_LIMIT_NOTIFIER: Lazy<RateLimitNotifier> = Lazy::new(RateLimitNotifier::new);

pub fn notify_rate_limit(context: &str, detail: &str) {
    RATE_LIMIT_NOTIFIER.notify(context, detail);
}

/// Rate-limit mail follows the same switch as trade notifications. Notices
/// are logged either way.
pub fn set_rate_limit_mail_enabled(enabled: bool) {
    RATE_LIMIT_NOTIFIER.mail_enabled.store(enabled, Ordering::SeqCst);
}

struct RateLimitNotifier {
    agent_name: String,
    cooldown: Duration,
    mail_enabled: AtomicBool,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl RateLimitNotifier {
    fn new() -> Self {
        let agent_name = std::env::var("AGENT_NAME").unwrap_or_default();
        Self {
            agent_name,
            cooldown: NOTIFY_COOLDOWN,
            mail_enabled: AtomicBool::new(false),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// True when `context` was not reported within the cool-down.
    fn should_send(&self, context: &str, now: Instant) -> bool {
        let Ok(mut last_sent) = self.last_sent.lock() else {
            return true;
        };
        match last_sent.get(context) {
            Some(previous) if now.duration_since(*previous) < self.cooldown => false,
            _ => {
                last_sent.insert(context.to_string(), now);
                true
            }
        }
    }

    /// Returns true when a mail was handed to the email client.
    fn notify(&self, context: &str, detail: &str) -> bool {
        if !self.should_send(context, Instant::now()) {
            log::debug!("[RateLimit] suppressed repeat notice for '{}'", context);
            return false;
        }
        log::warn!(
            "[RateLimit] notification raised for '{}' (detail: {})",
            context,
            detail
        );
        if !self.mail_enabled.load(Ordering::SeqCst) {
            return false;
        }
        let subject = if self.agent_name.is_empty() {
            format!("[RateLimit] {}", context)
        } else {
            format!("[{}] Rate limit - {}", self.agent_name, context)
        };
        let body = format!(
            "HTTP 429 Too Many Requests detected while {}.\nDetail: {}",
            context, detail
        );

        EmailClient::new().send(&subject, &body);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(mail_enabled: bool) -> RateLimitNotifier {
        RateLimitNotifier {
            agent_name: String::new(),
            cooldown: Duration::from_secs(60),
            mail_enabled: AtomicBool::new(mail_enabled),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn repeats_are_suppressed_within_cooldown() {
        let notifier = notifier(false);
        let start = Instant::now();
        assert!(notifier.should_send("fetch_candles (BTC)", start));
        assert!(!notifier.should_send("fetch_candles (BTC)", start + Duration::from_secs(30)));
        assert!(notifier.should_send("fetch_candles (ETH)", start + Duration::from_secs(30)));
        assert!(notifier.should_send("fetch_candles (BTC)", start + Duration::from_secs(61)));
    }

    #[test]
    fn mail_is_only_sent_when_enabled() {
        let quiet = notifier(false);
        assert!(!quiet.notify("last_price (BTC)", "HTTP 429"));
        // The notice still counts towards the cool-down.
        assert!(!quiet.should_send("last_price (BTC)", Instant::now()));

        let loud = notifier(true);
        assert!(loud.notify("last_price (BTC)", "HTTP 429"));
        assert!(!loud.notify("last_price (BTC)", "HTTP 429"));
    }
}
