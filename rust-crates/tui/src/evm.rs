use crate::{
    error::GameError,
    model::{
        ActiveGameRecord,
        Ether,
        RecentGameRecord,
    },
    remote::{
        RemoteGame,
        TxLogs,
    },
};
use ethers::{
    abi::{
        ParamType,
        Token,
        decode,
    },
    contract::{
        ContractCall,
        ContractError,
    },
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        Bytes,
        U64,
        U256,
    },
};
use game_abi::{
    Move,
    MovePair,
    Outcome,
    rps_types::RpsMinusOne,
};
use std::{
    collections::HashMap,
    sync::Arc,
};
use tracing::{
    info,
    warn,
};

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Selector of the standard `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// `RemoteGame` backed by a JSON-RPC node. Writes are signed by the unlocked
/// keystore wallet matching the acting account.
#[derive(Clone)]
pub struct EvmGameClient {
    provider: Arc<Provider<Http>>,
    reader: RpsMinusOne<Provider<Http>>,
    writers: Arc<HashMap<Address, RpsMinusOne<SignerClient>>>,
    address: Address,
    expected_chain: u64,
}

impl EvmGameClient {
    pub fn new(
        rpc_url: &str,
        address: Address,
        expected_chain: u64,
        wallets: Vec<LocalWallet>,
    ) -> Result<Self, GameError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|err| GameError::RemoteUnreachable(format!("invalid RPC URL: {err}")))?;
        let provider = Arc::new(provider);
        let reader = RpsMinusOne::new(address, provider.clone());
        let writers = wallets
            .into_iter()
            .map(|wallet| {
                let wallet = wallet.with_chain_id(expected_chain);
                let signer = wallet.address();
                let client = SignerMiddleware::new(provider.as_ref().clone(), wallet);
                (signer, RpsMinusOne::new(address, Arc::new(client)))
            })
            .collect();
        Ok(Self {
            provider,
            reader,
            writers: Arc::new(writers),
            address,
            expected_chain,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn runtime_code(&self) -> Result<Bytes, GameError> {
        self.provider
            .get_code(self.address, None)
            .await
            .map_err(|err| GameError::RemoteUnreachable(err.to_string()))
    }

    fn writer(&self, account: Address) -> Result<&RpsMinusOne<SignerClient>, GameError> {
        self.writers.get(&account).ok_or_else(|| {
            warn!(account = %format!("{account:#x}"), "no unlocked signer for account");
            GameError::UserRejected
        })
    }

    async fn ensure_chain(&self) -> Result<(), GameError> {
        let actual = self.chain_id().await?;
        if actual != self.expected_chain {
            return Err(GameError::WrongChain {
                expected: self.expected_chain,
                actual,
            });
        }
        Ok(())
    }

    async fn call<D>(&self, call: ContractCall<Provider<Http>, D>) -> Result<D, GameError>
    where
        D: ethers::abi::Detokenize,
    {
        call.call().await.map_err(contract_error)
    }

    async fn submit(
        &self,
        call: ContractCall<SignerClient, ()>,
        label: &'static str,
    ) -> Result<TxLogs, GameError> {
        self.ensure_chain().await?;
        let pending = call.send().await.map_err(contract_error)?;
        let tx_hash = pending.tx_hash();
        info!(label, tx_hash = %format!("{tx_hash:#x}"), "transaction submitted");
        let receipt = pending
            .await
            .map_err(|err| GameError::RemoteUnreachable(err.to_string()))?
            .ok_or_else(|| {
                GameError::RemoteUnreachable(format!("{label} transaction was dropped"))
            })?;
        if receipt.status == Some(U64::zero()) {
            warn!(label, tx_hash = %format!("{tx_hash:#x}"), "transaction reverted");
            return Err(GameError::CallReverted { reason: None });
        }
        info!(
            label,
            tx_hash = %format!("{tx_hash:#x}"),
            logs = receipt.logs.len(),
            "transaction confirmed"
        );
        Ok(receipt.logs)
    }
}

impl RemoteGame for EvmGameClient {
    async fn chain_id(&self) -> Result<u64, GameError> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|err| GameError::RemoteUnreachable(err.to_string()))
    }

    async fn is_deployed(&self) -> Result<bool, GameError> {
        Ok(!self.runtime_code().await?.is_empty())
    }

    async fn active_game(&self, account: Address) -> Result<ActiveGameRecord, GameError> {
        let (bet_amount, active) = self.call(self.reader.games(account)).await?;
        Ok(ActiveGameRecord {
            active,
            bet_amount: Ether::from_wei(bet_amount),
        })
    }

    async fn game_count(&self, account: Address) -> Result<u64, GameError> {
        let count = self.call(self.reader.game_counts(account)).await?;
        Ok(count.low_u64())
    }

    async fn recent_game(
        &self,
        account: Address,
        slot: u64,
    ) -> Result<RecentGameRecord, GameError> {
        let (player_move, opponent_move, result, bet_amount) = self
            .call(self.reader.recent_games(account, U256::from(slot)))
            .await?;
        let malformed =
            |err: game_abi::CodeError| GameError::RemoteUnreachable(format!("slot {slot}: {err}"));
        Ok(RecentGameRecord {
            player_move: Move::try_from(player_move).map_err(malformed)?,
            opponent_move: Move::try_from(opponent_move).map_err(malformed)?,
            outcome: Outcome::try_from(result).map_err(malformed)?,
            bet_amount: Ether::from_wei(bet_amount),
        })
    }

    async fn rewards(&self, account: Address) -> Result<Ether, GameError> {
        self.call(self.reader.rewards(account))
            .await
            .map(Ether::from_wei)
    }

    async fn native_balance(&self, account: Address) -> Result<Ether, GameError> {
        self.provider
            .get_balance(account, None)
            .await
            .map(Ether::from_wei)
            .map_err(|err| GameError::RemoteUnreachable(err.to_string()))
    }

    async fn treasury_balance(&self) -> Result<Ether, GameError> {
        self.native_balance(self.address).await
    }

    async fn minimum_bet(&self) -> Result<Ether, GameError> {
        self.call(self.reader.minimum_bet()).await.map(Ether::from_wei)
    }

    async fn withdraw_threshold(&self) -> Result<Ether, GameError> {
        self.call(self.reader.withdraw_threshold())
            .await
            .map(Ether::from_wei)
    }

    async fn withdraw_fee_percent(&self) -> Result<u64, GameError> {
        self.reader
            .withdraw_fee()
            .call()
            .await
            .map(|fee| fee.low_u64())
            .map_err(|err| optional_read_error("withdrawFee", err))
    }

    async fn start_game(
        &self,
        account: Address,
        moves: MovePair,
        bet: Ether,
    ) -> Result<TxLogs, GameError> {
        let call = self
            .writer(account)?
            .start_game(moves.first.code(), moves.second.code())
            .value(bet.wei());
        self.submit(call, "startGame").await
    }

    async fn finish_game(&self, account: Address, move_index: u8) -> Result<TxLogs, GameError> {
        let call = self.writer(account)?.finish_game(move_index);
        self.submit(call, "finishGame").await
    }

    async fn withdraw(&self, account: Address) -> Result<TxLogs, GameError> {
        let call = self.writer(account)?.withdraw();
        self.submit(call, "withdraw").await
    }
}

fn contract_error<M: Middleware>(err: ContractError<M>) -> GameError {
    if let Some(data) = err.as_revert() {
        return GameError::CallReverted {
            reason: revert_reason(data),
        };
    }
    if err.is_revert() {
        return GameError::CallReverted { reason: None };
    }
    GameError::RemoteUnreachable(err.to_string())
}

/// Reads of fields older deployments lack. A revert or an empty return means
/// the field is absent; anything else is a real failure.
fn optional_read_error<M: Middleware>(field: &'static str, err: ContractError<M>) -> GameError {
    let absent = err.is_revert()
        || matches!(
            err,
            ContractError::DecodingError(_) | ContractError::DetokenizationError(_)
        );
    if absent {
        warn!(%err, field, "field is not readable on this deployment");
        return GameError::OptionalFieldUnavailable(field);
    }
    contract_error(err)
}

fn revert_reason(data: &Bytes) -> Option<String> {
    let payload = data.as_ref().strip_prefix(&ERROR_STRING_SELECTOR)?;
    match decode(&[ParamType::String], payload).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use ethers::{
        abi::{
            InvalidOutputType,
            encode,
        },
        providers::ProviderError,
    };

    type ReadError = ContractError<Provider<Http>>;

    #[test]
    fn revert_reason__decodes_error_string_payload() {
        // given
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend(encode(&[Token::String("Bet below minimum".into())]));

        // when
        let reason = revert_reason(&Bytes::from(data));

        // then
        assert_eq!(reason.as_deref(), Some("Bet below minimum"));
    }

    #[test]
    fn revert_reason__ignores_custom_errors() {
        let data = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00]);
        assert_eq!(revert_reason(&data), None);
    }

    #[test]
    fn optional_read_error__revert_or_empty_return_marks_the_field_absent() {
        // given
        let reverted = ReadError::Revert(Bytes::new());
        let empty = ReadError::DetokenizationError(InvalidOutputType("empty data".into()));

        // when
        let reverted = optional_read_error("withdrawFee", reverted);
        let empty = optional_read_error("withdrawFee", empty);

        // then
        assert_eq!(reverted, GameError::OptionalFieldUnavailable("withdrawFee"));
        assert_eq!(empty, GameError::OptionalFieldUnavailable("withdrawFee"));
    }

    #[test]
    fn optional_read_error__transport_failure_stays_unreachable() {
        // given
        let err = ReadError::ProviderError {
            e: ProviderError::CustomError("connection refused".into()),
        };

        // when
        let mapped = optional_read_error("withdrawFee", err);

        // then
        assert!(matches!(
            mapped,
            GameError::RemoteUnreachable(reason) if reason.contains("connection refused")
        ));
    }

    #[test]
    fn new__rejects_malformed_rpc_url() {
        let result = EvmGameClient::new("not a url", Address::zero(), 1, Vec::new());
        assert!(matches!(result, Err(GameError::RemoteUnreachable(_))));
    }
}
