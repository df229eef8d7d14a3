//! Pair co-occurrence checks on fetched transaction detail

use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage, UiTransactionTokenBalance,
};

use super::types::MonitoredPair;

/// True when the asset shows up in the token balance records and the
/// account shows up as a balance owner or among the referenced addresses.
pub fn touches_pair(tx: &EncodedConfirmedTransactionWithStatusMeta, pair: &MonitoredPair) -> bool {
    let Some(meta) = tx.transaction.meta.as_ref() else {
        return false;
    };

    let balances: Vec<&UiTransactionTokenBalance> = token_balances(&meta.pre_token_balances)
        .chain(token_balances(&meta.post_token_balances))
        .collect();

    let asset_seen = balances.iter().any(|b| b.mint == pair.asset());
    if !asset_seen {
        return false;
    }

    let owner_seen = balances.iter().any(|b| match &b.owner {
        OptionSerializer::Some(owner) => owner == pair.account(),
        _ => false,
    });
    if owner_seen {
        return true;
    }

    if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
        if loaded
            .writable
            .iter()
            .chain(loaded.readonly.iter())
            .any(|k| k == pair.account())
        {
            return true;
        }
    }

    account_keys(&tx.transaction.transaction)
        .iter()
        .any(|k| k == pair.account())
}

/// Rendered transaction error from the status meta
pub fn transaction_error(tx: &EncodedConfirmedTransactionWithStatusMeta) -> Option<String> {
    tx.transaction
        .meta
        .as_ref()
        .and_then(|meta| meta.err.as_ref())
        .map(|err| err.to_string())
}

fn token_balances(
    balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>,
) -> impl Iterator<Item = &UiTransactionTokenBalance> {
    let slice: &[UiTransactionTokenBalance] = match balances {
        OptionSerializer::Some(list) => list.as_slice(),
        _ => &[],
    };
    slice.iter()
}

/// Static account keys in whichever encoding the node returned
fn account_keys(transaction: &EncodedTransaction) -> Vec<String> {
    match transaction {
        EncodedTransaction::Json(ui_tx) => match &ui_tx.message {
            UiMessage::Parsed(message) => message
                .account_keys
                .iter()
                .map(|account| account.pubkey.clone())
                .collect(),
            UiMessage::Raw(message) => message.account_keys.clone(),
        },
        other => other
            .decode()
            .map(|tx| {
                tx.message
                    .static_account_keys()
                    .iter()
                    .map(|k| k.to_string())
                    .collect()
            })
            .unwrap_or_default(),
    }
}
