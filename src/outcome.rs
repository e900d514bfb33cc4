use thiserror::Error;
use uuid::Uuid;

use crate::pair::{Pair, PairError, TradeStatus};

/// Why StartTrade moved a pair to ERROR.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StartTradeError {
    #[error("Z_SCORE_BELOW_MINIMUM: current z-score {current:.2} < minimum z-score {min:.2}")]
    ZScoreBelowMinimum { current: f64, min: f64 },
    #[error("Z_SCORE_DATA_EMPTY: no statistics returned for {0}")]
    ZScoreDataEmpty(String),
    #[error("TICKERS_SWITCHED: legs flipped to long {long} / short {short}")]
    TickersSwitched { long: String, short: String },
    #[error("AUTO_TRADING_DISABLED: auto-trading is switched off")]
    AutoTradingDisabled,
    #[error("ZSCORE_DECLINE_FILTER_FAILED: {0}")]
    ZScoreDeclineFilterFailed(String),
    #[error("INSUFFICIENT_FUNDS: {0}")]
    InsufficientFunds(String),
    #[error("TRADE_OPEN_FAILED: {0}")]
    TradeOpenFailed(String),
}

impl StartTradeError {
    pub fn code(&self) -> &'static str {
        match self {
            StartTradeError::ZScoreBelowMinimum { .. } => "Z_SCORE_BELOW_MINIMUM",
            StartTradeError::ZScoreDataEmpty(_) => "Z_SCORE_DATA_EMPTY",
            StartTradeError::TickersSwitched { .. } => "TICKERS_SWITCHED",
            StartTradeError::AutoTradingDisabled => "AUTO_TRADING_DISABLED",
            StartTradeError::ZScoreDeclineFilterFailed(_) => "ZSCORE_DECLINE_FILTER_FAILED",
            StartTradeError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            StartTradeError::TradeOpenFailed(_) => "TRADE_OPEN_FAILED",
        }
    }
}

/// Why UpdateTrade moved a pair to ERROR.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpdateTradeError {
    #[error("MANUALLY_CLOSED_NO_POSITIONS: positions closed on the exchange, pnl {pnl_quote} ({pnl_percent}%)")]
    ManuallyClosedNoPositions {
        pnl_quote: rust_decimal::Decimal,
        pnl_percent: rust_decimal::Decimal,
    },
    #[error("POSITIONS_NOT_FOUND: exchange positions missing and closure not confirmed")]
    PositionsNotFound,
    #[error("MANUAL_CLOSE_FAILED: {0}")]
    ManualCloseFailed(String),
    #[error("AUTO_CLOSE_FAILED: {0}")]
    AutoCloseFailed(String),
}

impl UpdateTradeError {
    pub fn code(&self) -> &'static str {
        match self {
            UpdateTradeError::ManuallyClosedNoPositions { .. } => "MANUALLY_CLOSED_NO_POSITIONS",
            UpdateTradeError::PositionsNotFound => "POSITIONS_NOT_FOUND",
            UpdateTradeError::ManualCloseFailed(_) => "MANUAL_CLOSE_FAILED",
            UpdateTradeError::AutoCloseFailed(_) => "AUTO_CLOSE_FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Start(StartTradeError),
    Update(UpdateTradeError),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Start(err) => err.code(),
            RejectReason::Update(err) => err.code(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            RejectReason::Start(err) => err.to_string(),
            RejectReason::Update(err) => err.to_string(),
        }
    }
}

impl From<StartTradeError> for RejectReason {
    fn from(err: StartTradeError) -> Self {
        RejectReason::Start(err)
    }
}

impl From<UpdateTradeError> for RejectReason {
    fn from(err: UpdateTradeError) -> Self {
        RejectReason::Update(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipCause {
    /// The pair no longer exists in the repository.
    NotFound,
    AlreadyClosed,
    /// The pair is in a state this processor does not act on.
    Inactive(TradeStatus),
    /// A collaborator call failed before anything was decided; retried next tick.
    Transient(String),
}

/// Result of one processor invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The pair was processed; its status may or may not have changed.
    Done(Pair),
    /// A business rule or the exchange refused; the pair is now ERROR.
    Rejected { pair: Pair, reason: RejectReason },
    /// Nothing was written.
    Skipped { pair: Option<Pair>, cause: SkipCause },
}

impl Outcome {
    pub fn pair(&self) -> Option<&Pair> {
        match self {
            Outcome::Done(pair) | Outcome::Rejected { pair, .. } => Some(pair),
            Outcome::Skipped { pair, .. } => pair.as_ref(),
        }
    }

    pub fn into_pair(self) -> Option<Pair> {
        match self {
            Outcome::Done(pair) | Outcome::Rejected { pair, .. } => Some(pair),
            Outcome::Skipped { pair, .. } => pair,
        }
    }

    pub fn status(&self) -> Option<TradeStatus> {
        self.pair().map(|pair| pair.status)
    }

    /// Rejections and transient skips count as failures in scheduler tallies.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Rejected { .. }
                | Outcome::Skipped {
                    cause: SkipCause::Transient(_),
                    ..
                }
        )
    }
}

/// Failures that escape a processor as real errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Pair(#[from] PairError),
    #[error("repository failure for pair {pair_id:?}: {source:#}")]
    Repository {
        pair_id: Option<Uuid>,
        #[source]
        source: anyhow::Error,
    },
}

impl OrchestratorError {
    pub fn repository(pair_id: Option<Uuid>, source: anyhow::Error) -> Self {
        OrchestratorError::Repository { pair_id, source }
    }
}
