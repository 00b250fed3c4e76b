use crate::{
    error::GameError,
    provider::{
        ProviderEvent,
        Subscribers,
        Subscription,
        WalletProvider,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use ethers::{
    signers::{
        LocalWallet,
        MnemonicBuilder,
        Signer,
        coins_bip39::English,
    },
    types::Address,
};
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};
use tracing::info;

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Keystore files in `dir`. Foundry keystores carry no extension, so every
/// regular file that is not hidden is listed.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read keystore directory")? {
        let entry = entry.wrap_err("Failed to read keystore entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.trim_end_matches(".json").to_owned())
        else {
            return Err(eyre!("Invalid keystore filename {:?}", path));
        };
        if name.starts_with('.') {
            continue;
        }
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    let wallets = list_wallets(dir)?;
    wallets
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Keystore '{name}' not found in {}", dir.to_string_lossy()))
}

pub fn unlock_wallet(descriptor: &WalletDescriptor) -> Result<LocalWallet> {
    let prompt = format!("Enter password for keystore '{}': ", descriptor.name);
    let password = prompt_password(prompt).wrap_err("Failed to read keystore password")?;

    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| eyre!("Invalid password for keystore '{}'", descriptor.name))?;
    wallet_from_secret(&descriptor.name, &secret)
}

fn wallet_from_secret(name: &str, secret: &[u8]) -> Result<LocalWallet> {
    if let Ok(wallet) = LocalWallet::from_bytes(secret) {
        return Ok(wallet);
    }

    if let Ok(mnemonic) = std::str::from_utf8(secret)
        && mnemonic.split_whitespace().count() >= 12
    {
        return MnemonicBuilder::<English>::default()
            .phrase(mnemonic)
            .build()
            .map_err(|err| eyre!("Keystore '{name}' holds an unusable mnemonic: {err}"));
    }

    Err(eyre!("Keystore '{name}' contained unsupported key material"))
}

struct KeystoreState {
    accounts: Vec<Address>,
    selected: usize,
    authorized: bool,
    chain_id: u64,
}

impl KeystoreState {
    /// Authorized accounts with the selected one first.
    fn ordered_accounts(&self) -> Vec<Address> {
        if !self.authorized || self.accounts.is_empty() {
            return Vec::new();
        }
        let mut ordered = self.accounts.clone();
        ordered.rotate_left(self.selected % self.accounts.len());
        ordered
    }
}

/// Wallet provider over keystores unlocked at start-up. Behaves like a browser
/// wallet: access must be requested, and account or network changes made from
/// the terminal are broadcast to subscribers.
#[derive(Clone)]
pub struct KeystoreProvider {
    state: Arc<Mutex<KeystoreState>>,
    known_chains: Arc<Vec<u64>>,
    subscribers: Subscribers,
}

impl KeystoreProvider {
    pub fn new(accounts: Vec<Address>, chain_id: u64, known_chains: Vec<u64>) -> Self {
        Self {
            state: Arc::new(Mutex::new(KeystoreState {
                accounts,
                selected: 0,
                authorized: false,
                chain_id,
            })),
            known_chains: Arc::new(known_chains),
            subscribers: Subscribers::default(),
        }
    }

    pub fn from_wallets(wallets: &[LocalWallet], chain_id: u64, known_chains: Vec<u64>) -> Self {
        Self::new(
            wallets.iter().map(Signer::address).collect(),
            chain_id,
            known_chains,
        )
    }

    fn lock(&self) -> MutexGuard<'_, KeystoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Selects the next unlocked account.
    pub fn next_account(&self) {
        let accounts = {
            let mut state = self.lock();
            if state.accounts.len() < 2 {
                return;
            }
            state.selected = (state.selected + 1) % state.accounts.len();
            if !state.authorized {
                return;
            }
            state.ordered_accounts()
        };
        self.subscribers
            .emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// Revokes access until the next `request_accounts`.
    pub fn disconnect(&self) {
        {
            let mut state = self.lock();
            if !state.authorized {
                return;
            }
            state.authorized = false;
        }
        info!("keystore access revoked");
        self.subscribers
            .emit(ProviderEvent::AccountsChanged(Vec::new()));
    }

    /// Moves the wallet to the next known network.
    pub fn cycle_network(&self) {
        let next = {
            let mut state = self.lock();
            let Some(position) = self
                .known_chains
                .iter()
                .position(|chain| *chain == state.chain_id)
            else {
                return;
            };
            let next = self.known_chains[(position + 1) % self.known_chains.len()];
            if next == state.chain_id {
                return;
            }
            state.chain_id = next;
            next
        };
        self.subscribers.emit(ProviderEvent::ChainChanged(next));
    }
}

impl WalletProvider for KeystoreProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, GameError> {
        let accounts = {
            let mut state = self.lock();
            if state.accounts.is_empty() {
                return Err(GameError::UserRejected);
            }
            state.authorized = true;
            state.ordered_accounts()
        };
        Ok(accounts)
    }

    async fn accounts(&self) -> Result<Vec<Address>, GameError> {
        Ok(self.lock().ordered_accounts())
    }

    async fn chain_id(&self) -> Result<u64, GameError> {
        Ok(self.lock().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), GameError> {
        if !self.known_chains.contains(&chain_id) {
            return Err(GameError::ChainSwitchFailed(chain_id));
        }
        let changed = {
            let mut state = self.lock();
            let changed = state.chain_id != chain_id;
            state.chain_id = chain_id;
            changed
        };
        if changed {
            self.subscribers.emit(ProviderEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    const SEPOLIA: u64 = 11_155_111;

    fn provider() -> KeystoreProvider {
        KeystoreProvider::new(
            vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            1,
            vec![1, SEPOLIA],
        )
    }

    #[tokio::test]
    async fn accounts__are_hidden_until_requested() {
        // given
        let provider = provider();

        // when
        let silent = provider.accounts().await.unwrap();
        let requested = provider.request_accounts().await.unwrap();

        // then
        assert!(silent.is_empty());
        assert_eq!(requested[0], Address::repeat_byte(1));
        assert_eq!(provider.accounts().await.unwrap(), requested);
    }

    #[tokio::test]
    async fn next_account__broadcasts_new_selection_first() {
        // given
        let provider = provider();
        provider.request_accounts().await.unwrap();
        let mut events = provider.subscribe();

        // when
        provider.next_account();

        // then
        assert_eq!(
            events.try_next(),
            Some(ProviderEvent::AccountsChanged(vec![
                Address::repeat_byte(2),
                Address::repeat_byte(1),
            ]))
        );
    }

    #[tokio::test]
    async fn disconnect__broadcasts_empty_account_list() {
        // given
        let provider = provider();
        provider.request_accounts().await.unwrap();
        let mut events = provider.subscribe();

        // when
        provider.disconnect();

        // then
        assert_eq!(events.try_next(), Some(ProviderEvent::AccountsChanged(vec![])));
        assert!(provider.accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn switch_chain__rejects_unknown_networks() {
        // given
        let provider = provider();
        let mut events = provider.subscribe();

        // when
        let unknown = provider.switch_chain(5).await;
        let known = provider.switch_chain(SEPOLIA).await;

        // then
        assert_eq!(unknown, Err(GameError::ChainSwitchFailed(5)));
        assert_eq!(known, Ok(()));
        assert_eq!(events.try_next(), Some(ProviderEvent::ChainChanged(SEPOLIA)));
        assert_eq!(provider.chain_id().await.unwrap(), SEPOLIA);
    }

    #[test]
    fn wallet_from_secret__accepts_raw_private_key() {
        // given
        let secret = [7u8; 32];

        // when
        let wallet = wallet_from_secret("dev", &secret).unwrap();

        // then
        assert_eq!(
            wallet.address(),
            LocalWallet::from_bytes(&secret).unwrap().address()
        );
    }

    #[test]
    fn list_wallets__skips_hidden_files_and_directories() {
        // given
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("player"), "{}").unwrap();
        fs::write(dir.path().join("backup.json"), "{}").unwrap();
        fs::write(dir.path().join(".DS_Store"), "").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        // when
        let names: Vec<_> = list_wallets(dir.path())
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();

        // then
        assert_eq!(names, vec!["backup".to_string(), "player".to_string()]);
    }
}
