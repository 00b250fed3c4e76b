use crate::error::GameError;
use ethers::types::Address;
use std::{
    future::Future,
    sync::{
        Arc,
        Mutex,
        Weak,
    },
};
use tokio::sync::mpsc;

/// Notifications a wallet pushes when the user changes something outside the app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// Capability provider that owns the user's accounts.
pub trait WalletProvider {
    /// Asks the user to authorize account access.
    fn request_accounts(&self) -> impl Future<Output = Result<Vec<Address>, GameError>>;

    /// Accounts already authorized, without prompting.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>, GameError>>;

    fn chain_id(&self) -> impl Future<Output = Result<u64, GameError>>;

    fn switch_chain(&self, chain_id: u64) -> impl Future<Output = Result<(), GameError>>;

    fn subscribe(&self) -> Subscription;
}

type SubscriberList = Mutex<Vec<(u64, mpsc::UnboundedSender<ProviderEvent>)>>;

/// Fan-out registry used by provider implementations.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<SubscriberList>,
    next_id: Arc<Mutex<u64>>,
}

impl Subscribers {
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut next = self
                .next_id
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *next += 1;
            *next
        };
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, tx));
        Subscription {
            id,
            events: rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, event: ProviderEvent) {
        let mut subscribers = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live registration for provider events. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    registry: Weak<SubscriberList>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<ProviderEvent> {
        self.events.recv().await
    }

    pub fn try_next(&mut self) -> Option<ProviderEvent> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}
