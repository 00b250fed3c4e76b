use std::fmt;

/// Failures surfaced by wallet, remote and storage collaborators.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("no wallet provider is available")]
    ProviderUnavailable,
    #[error("the request was rejected in the wallet")]
    UserRejected,
    #[error("wallet is on chain {actual}, expected chain {expected}")]
    WrongChain { expected: u64, actual: u64 },
    #[error("switching the wallet to chain {0} failed")]
    ChainSwitchFailed(u64),
    #[error("remote store unreachable: {0}")]
    RemoteUnreachable(String),
    #[error("call reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    CallReverted { reason: Option<String> },
    #[error("optional field `{0}` is not exposed by this deployment")]
    OptionalFieldUnavailable(&'static str),
    #[error("an active game exists but its moves are not stored on this device")]
    CacheInconsistency,
    #[error("{0}")]
    InvalidInput(String),
    #[error("treasury cannot cover twice the bet")]
    TreasuryShortfall,
    #[error("another transaction is already in flight for this account")]
    Busy,
    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Info,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Error,
        }
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The user-facing flow an error escaped from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Connect,
    Refresh,
    Commit,
    Reveal,
    Withdraw,
}

pub const REFRESH_FAILED: &str = "Failed to refresh on-chain game state";
pub const SERVICES_UNAVAILABLE: &str =
    "Game services are temporarily unavailable. Please try again later.";
pub const SETTINGS_PARTIAL: &str =
    "Some game settings could not be loaded. You can still play.";

/// Converts a flow failure into the single status line shown to the user.
pub fn status_for(flow: Flow, err: &GameError, network: &str) -> StatusMessage {
    let switch_network = || {
        StatusMessage::error(format!(
            "Please switch your wallet network to {network}."
        ))
    };
    match (flow, err) {
        (_, GameError::WrongChain { .. } | GameError::ChainSwitchFailed(_)) => {
            switch_network()
        }
        (_, GameError::InvalidInput(reason)) => StatusMessage::error(reason.clone()),
        (_, GameError::Busy) => {
            StatusMessage::error("Another transaction is still being processed")
        }
        (_, GameError::ProviderUnavailable) => StatusMessage::error(
            "No wallet provider found. Unlock a keystore with --wallet <name>.",
        ),
        (Flow::Connect, _) => {
            StatusMessage::error("Wallet connection failed. Please try again.")
        }
        (Flow::Refresh, GameError::RemoteUnreachable(_)) => {
            StatusMessage::error(SERVICES_UNAVAILABLE)
        }
        (Flow::Refresh, GameError::OptionalFieldUnavailable(_)) => {
            StatusMessage::info(SETTINGS_PARTIAL)
        }
        (Flow::Refresh, GameError::CacheInconsistency) => StatusMessage::info(
            "Your moves for the active game are not stored on this device yet. Refresh again shortly.",
        ),
        (Flow::Refresh, _) => StatusMessage::error(REFRESH_FAILED),
        (Flow::Commit, GameError::TreasuryShortfall) => {
            StatusMessage::error("Treasury cannot cover 2x reward. Try smaller bet.")
        }
        (Flow::Commit, _) => transaction_failed("Start game transaction failed", err),
        (Flow::Reveal, _) => transaction_failed("Finish game transaction failed", err),
        (Flow::Withdraw, _) => transaction_failed("Withdraw failed", err),
    }
}

fn transaction_failed(prefix: &str, err: &GameError) -> StatusMessage {
    match err {
        GameError::CallReverted {
            reason: Some(reason),
        } => StatusMessage::error(format!("{prefix}: {reason}")),
        GameError::UserRejected => {
            StatusMessage::error(format!("{prefix}: rejected in wallet"))
        }
        _ => StatusMessage::error(prefix),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn status_for__wrong_chain_names_the_expected_network() {
        // given
        let err = GameError::WrongChain {
            expected: 11_155_111,
            actual: 1,
        };

        // when
        let status = status_for(Flow::Refresh, &err, "Sepolia");

        // then
        assert_eq!(
            status,
            StatusMessage::error("Please switch your wallet network to Sepolia.")
        );
    }

    #[test]
    fn status_for__refresh_failures_collapse_to_one_message() {
        for err in [
            GameError::CallReverted { reason: None },
            GameError::Storage("disk".into()),
        ] {
            assert_eq!(
                status_for(Flow::Refresh, &err, "Sepolia").text,
                REFRESH_FAILED
            );
        }
    }

    #[test]
    fn status_for__revert_reason_is_appended_to_transaction_failures() {
        // given
        let err = GameError::CallReverted {
            reason: Some("Bet below minimum".into()),
        };

        // when
        let status = status_for(Flow::Commit, &err, "Sepolia");

        // then
        assert_eq!(status.text, "Start game transaction failed: Bet below minimum");
        assert_eq!(status.severity, Severity::Error);
    }

    #[test]
    fn status_for__missing_fee_is_informational() {
        let status = status_for(
            Flow::Refresh,
            &GameError::OptionalFieldUnavailable("withdrawFee"),
            "Sepolia",
        );
        assert_eq!(status, StatusMessage::info(SETTINGS_PARTIAL));
    }
}
