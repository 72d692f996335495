//! Chain facts stored by the metadata backend
//!
//! Each entity is modeled once; backends map it to their own storage.
//! Hashes, credentials and encoded payloads are opaque bytes. Integer
//! fields must fit in an `i64`; larger values are rejected with
//! `StoreError::InvalidInput`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub epoch_id: u64,
    pub era_id: u32,
    pub start_slot: u64,
    pub slot_length: u32,
    pub length_in_slots: u32,
    /// Randomness seed; finalized after the epoch starts
    pub nonce: Vec<u8>,
}

/// Protocol parameter snapshot active from `epoch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PParams {
    pub epoch: u64,
    pub added_slot: u64,
    pub era_id: u32,
    pub cbor: Vec<u8>,
}

/// Parameter update proposal submitted by a genesis key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PParamUpdate {
    pub genesis_hash: Vec<u8>,
    pub cbor: Vec<u8>,
    pub added_slot: u64,
    pub epoch: u64,
}

/// Reference to a transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoRef {
    pub tx_id: Vec<u8>,
    pub output_idx: u32,
}

impl UtxoRef {
    pub fn new(tx_id: impl Into<Vec<u8>>, output_idx: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            output_idx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: Vec<u8>,
    pub output_idx: u32,
    pub address: Vec<u8>,
    pub amount: u64,
    /// Encoded output as seen on chain
    pub cbor: Vec<u8>,
    pub added_slot: u64,
}

impl Utxo {
    pub fn reference(&self) -> UtxoRef {
        UtxoRef::new(self.tx_id.clone(), self.output_idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRegistration {
    pub stake_credential: Vec<u8>,
    pub added_slot: u64,
    pub deposit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeDeregistration {
    pub stake_credential: Vec<u8>,
    pub added_slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeDelegation {
    pub stake_credential: Vec<u8>,
    pub pool_key_hash: Vec<u8>,
    pub added_slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRegistration {
    pub pool_key_hash: Vec<u8>,
    pub vrf_key_hash: Vec<u8>,
    pub pledge: u64,
    pub cost: u64,
    pub margin_numerator: u64,
    pub margin_denominator: u64,
    pub reward_account: Vec<u8>,
    pub owners: Vec<Vec<u8>>,
    pub metadata_url: Option<String>,
    pub metadata_hash: Option<Vec<u8>>,
    pub added_slot: u64,
    pub deposit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRetirement {
    pub pool_key_hash: Vec<u8>,
    pub epoch: u64,
    pub added_slot: u64,
}

/// Current chain head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub hash: Vec<u8>,
    pub slot: u64,
    pub block_number: u64,
}
