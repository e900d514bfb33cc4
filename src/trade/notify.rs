use crate::email_client::EmailClient;
use crate::pair::Pair;

/// Trade-closed notices. Always logged; mailed when SMTP is configured.
#[derive(Debug, Clone)]
pub struct TradeNotifier {
    email: Option<EmailClient>,
    agent_name: Option<String>,
}

impl TradeNotifier {
    pub fn new(email: Option<EmailClient>, agent_name: Option<String>) -> Self {
        Self { email, agent_name }
    }

    pub fn log_only() -> Self {
        Self::new(None, None)
    }

    pub fn subject(&self, pair: &Pair) -> String {
        let reason = pair
            .exit_reason
            .map(|reason| reason.as_str())
            .unwrap_or("UNKNOWN");
        match &self.agent_name {
            Some(agent) => format!("[{}] {} closed ({})", agent, pair.name(), reason),
            None => format!("[StatArb] {} closed ({})", pair.name(), reason),
        }
    }

    pub fn body(pair: &Pair) -> String {
        format!(
            "Pair: {}\nId: {}\nExit reason: {}\nRealized P&L: {} ({}%)\nAveraging count: {}\nEntry z: {:?}\nExit z: {:?}\nPortfolio before/after: {:?} / {:?}",
            pair.name(),
            pair.id,
            pair.exit_reason.map(|r| r.as_str()).unwrap_or("-"),
            pair.pnl.realized_quote,
            pair.pnl.realized_percent,
            pair.averaging_count,
            pair.entry_z(),
            pair.current_z(),
            pair.portfolio_before,
            pair.portfolio_after,
        )
    }

    pub fn trade_closed(&self, pair: &Pair) {
        let subject = self.subject(pair);
        log::info!("[NOTIFY] {}", subject);
        if let Some(email) = &self.email {
            email.send(&subject, &Self::body(pair));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pair::{ExitReason, PairKind, TradeStatus};
    use chrono::Utc;

    #[test]
    fn subject_names_pair_and_reason() {
        let mut pair = Pair::new(
            "ADA-USDT-SWAP",
            "XRP-USDT-SWAP",
            PairKind::Trading,
            TradeStatus::Closed,
            Utc::now(),
        )
        .unwrap();
        pair.exit_reason = Some(ExitReason::StopLoss);
        let notifier = TradeNotifier::new(None, Some("bot-1".to_string()));
        assert_eq!(
            notifier.subject(&pair),
            "[bot-1] ADA-USDT-SWAP/XRP-USDT-SWAP closed (STOP_LOSS)"
        );
        assert!(TradeNotifier::body(&pair).contains("STOP_LOSS"));
    }
}
