//! Reporter key and EIP-155 legacy transaction signing.

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer_local::PrivateKeySigner;

use super::TransactionRequest;
use crate::error::ChainError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
}

/// Legacy transaction calling `request.to` with `request.data`.
pub fn legacy_transaction(
    request: &TransactionRequest,
    nonce: u64,
    gas_price: u128,
    chain_id: u64,
) -> TxLegacy {
    TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price,
        gas_limit: request.gas_limit,
        to: TxKind::Call(request.to),
        value: U256::ZERO,
        input: request.data.clone(),
    }
}

/// The reporter's signing key. Only one task owns a `Wallet`.
pub struct Wallet {
    signer: PrivateKeySigner,
}

impl Wallet {
    pub fn from_hex(private_key: &str) -> Result<Self, ChainError> {
        let signer = private_key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|err| ChainError::Decode(format!("reporter key: {err}")))?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn sign_transaction(&self, mut tx: TxLegacy) -> Result<SignedTransaction, ChainError> {
        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|err| ChainError::Decode(format!("signing failed: {err}")))?;
        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        Ok(SignedTransaction {
            raw: TxEnvelope::from(signed).encoded_2718().into(),
            hash,
        })
    }
}
