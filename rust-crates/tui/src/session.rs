use crate::{
    error::GameError,
    provider::{
        Subscription,
        WalletProvider,
    },
};
use ethers::types::Address;
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletSession {
    pub account: Address,
    pub chain_id: u64,
}

/// Token captured when an async flow starts. A completion may only touch
/// shared view state while its guard is still current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionGuard {
    pub generation: u64,
    pub account: Address,
    pub chain_id: u64,
}

/// What a session transition means for the rest of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionChange {
    Established(WalletSession),
    Cleared,
}

#[derive(Debug, Default)]
struct SessionContext {
    session: Option<WalletSession>,
    generation: u64,
}

pub struct WalletSessionManager<P> {
    provider: Option<P>,
    expected_chain: u64,
    context: SessionContext,
}

impl<P: WalletProvider> WalletSessionManager<P> {
    pub fn new(provider: Option<P>, expected_chain: u64) -> Self {
        Self {
            provider,
            expected_chain,
            context: SessionContext::default(),
        }
    }

    pub fn provider(&self) -> Option<&P> {
        self.provider.as_ref()
    }

    pub fn expected_chain(&self) -> u64 {
        self.expected_chain
    }

    pub fn session(&self) -> Option<WalletSession> {
        self.context.session
    }

    pub fn generation(&self) -> u64 {
        self.context.generation
    }

    pub fn guard(&self) -> Option<SessionGuard> {
        self.context.session.map(|session| SessionGuard {
            generation: self.context.generation,
            account: session.account,
            chain_id: session.chain_id,
        })
    }

    pub fn is_current(&self, guard: &SessionGuard) -> bool {
        self.context.generation == guard.generation
            && self
                .context
                .session
                .is_some_and(|session| session.account == guard.account)
    }

    pub fn subscribe(&self) -> Option<Subscription> {
        self.provider.as_ref().map(WalletProvider::subscribe)
    }

    /// Prompts for account access and puts the wallet on the expected chain.
    pub async fn connect(&mut self) -> Result<WalletSession, GameError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(GameError::ProviderUnavailable)?;
        let accounts = provider.request_accounts().await?;
        let account = accounts.first().copied().ok_or(GameError::UserRejected)?;

        let chain_id = provider.chain_id().await?;
        if chain_id != self.expected_chain {
            info!(
                from = chain_id,
                to = self.expected_chain,
                "requesting wallet chain switch"
            );
            provider
                .switch_chain(self.expected_chain)
                .await
                .map_err(|err| {
                    warn!(?err, "chain switch failed");
                    match err {
                        GameError::UserRejected => GameError::UserRejected,
                        _ => GameError::ChainSwitchFailed(self.expected_chain),
                    }
                })?;
            let switched = provider.chain_id().await?;
            if switched != self.expected_chain {
                return Err(GameError::ChainSwitchFailed(self.expected_chain));
            }
        }

        let session = WalletSession {
            account,
            chain_id: self.expected_chain,
        };
        self.replace(Some(session));
        info!(account = %format!("{account:#x}"), "wallet connected");
        Ok(session)
    }

    /// Silent recovery on start-up. No provider or no authorized account is
    /// not an error.
    pub async fn hydrate(&mut self) -> Result<Option<WalletSession>, GameError> {
        let Some(provider) = self.provider.as_ref() else {
            debug!("no wallet provider to hydrate from");
            return Ok(None);
        };
        let accounts = provider.accounts().await?;
        let Some(account) = accounts.first().copied() else {
            self.replace(None);
            return Ok(None);
        };
        let chain_id = provider.chain_id().await?;
        let session = WalletSession { account, chain_id };
        self.replace(Some(session));
        info!(account = %format!("{account:#x}"), chain_id, "wallet session restored");
        Ok(Some(session))
    }

    /// Follows the wallet's account list. Without a prior session the chain
    /// is read from the wallet, since it may have moved while disconnected.
    pub async fn on_accounts_changed(
        &mut self,
        accounts: &[Address],
    ) -> Result<SessionChange, GameError> {
        let Some(account) = accounts.first().copied() else {
            self.replace(None);
            info!("wallet disconnected");
            return Ok(SessionChange::Cleared);
        };
        let chain_id = match self.context.session {
            Some(session) => session.chain_id,
            None => {
                self.provider
                    .as_ref()
                    .ok_or(GameError::ProviderUnavailable)?
                    .chain_id()
                    .await?
            }
        };
        let session = WalletSession { account, chain_id };
        self.replace(Some(session));
        info!(account = %format!("{account:#x}"), chain_id, "wallet account changed");
        Ok(SessionChange::Established(session))
    }

    /// Re-reads accounts after a chain change. The chain itself is checked by
    /// the next remote read.
    pub async fn on_chain_changed(&mut self, chain_id: u64) -> Result<SessionChange, GameError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(GameError::ProviderUnavailable)?;
        let accounts = provider.accounts().await?;
        let change = match accounts.first().copied() {
            None => {
                self.replace(None);
                SessionChange::Cleared
            }
            Some(account) => {
                let session = WalletSession { account, chain_id };
                self.replace(Some(session));
                SessionChange::Established(session)
            }
        };
        info!(chain_id, ?change, "wallet chain changed");
        Ok(change)
    }

    fn replace(&mut self, session: Option<WalletSession>) {
        self.context.generation += 1;
        self.context.session = session;
    }
}
