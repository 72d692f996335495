//! Metadata Module
//!
//! The domain surface every metadata backend provides, plus the opaque
//! transaction context that lets callers compose several writes atomically.
//!
//! ## Transactions
//! Every read takes `Option<&MetadataTxn>` and every write takes
//! `Option<&mut MetadataTxn>`. With `None` the call runs in its own short
//! transaction; with `Some` it runs inside the caller's.

pub mod models;
pub mod sqlite;

use std::any::Any;

use crate::error::{Result, StoreError};

pub use models::{
    Epoch, PParamUpdate, PParams, PoolRegistration, PoolRetirement, StakeDelegation,
    StakeDeregistration, StakeRegistration, Tip, Utxo, UtxoRef,
};

use sqlite::SqliteTxn;

/// Opaque transaction context handed out by [`MetadataStore::begin`]
///
/// Dropping it without `commit` rolls the transaction back.
pub struct MetadataTxn {
    inner: TxnInner,
}

/// Backend-native transaction, tagged by backend
pub(crate) enum TxnInner {
    Sqlite(SqliteTxn),
}

impl MetadataTxn {
    pub(crate) fn new(inner: TxnInner) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &TxnInner {
        &self.inner
    }

    pub(crate) fn inner_mut(&mut self) -> &mut TxnInner {
        &mut self.inner
    }

    /// Native SQLite transaction, when this context belongs to the sqlite backend
    pub fn as_sqlite(&self) -> Option<&SqliteTxn> {
        match &self.inner {
            TxnInner::Sqlite(txn) => Some(txn),
        }
    }

    pub fn is_read_write(&self) -> bool {
        match &self.inner {
            TxnInner::Sqlite(txn) => txn.is_read_write(),
        }
    }

    pub fn commit(self) -> Result<()> {
        match self.inner {
            TxnInner::Sqlite(txn) => txn.commit(),
        }
    }

    pub fn rollback(self) -> Result<()> {
        match self.inner {
            TxnInner::Sqlite(txn) => txn.rollback(),
        }
    }
}

impl std::fmt::Debug for MetadataTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTxn")
            .field("read_write", &self.is_read_write())
            .finish()
    }
}

/// Capability every metadata backend implements
///
/// "Not found" is reported as [`StoreError::NotFound`], distinct from
/// backend failures ([`StoreError::Backend`]).
pub trait MetadataStore: Send + Sync {
    /// Registry name of this backend
    fn name(&self) -> &'static str;

    fn close(&self) -> Result<()>;

    /// Native handle, for callers that know the concrete backend
    fn as_any(&self) -> &dyn Any;

    /// Hook the backend's statement tracing into `tracing`
    fn install_instrumentation(&self) -> Result<()> {
        Ok(())
    }

    fn begin(&self, read_write: bool) -> Result<MetadataTxn>;

    // -------------------------------------------------------------------------
    // Commit timestamp (internal consistency marker)
    // -------------------------------------------------------------------------

    fn get_commit_timestamp(&self, txn: Option<&MetadataTxn>) -> Result<Option<i64>>;

    fn set_commit_timestamp(&self, timestamp: i64, txn: Option<&mut MetadataTxn>) -> Result<()>;

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    fn get_pool_registrations(
        &self,
        pool_key_hash: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<PoolRegistration>>;

    fn get_pool_retirements(
        &self,
        pool_key_hash: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<PoolRetirement>>;

    fn get_stake_registrations(
        &self,
        stake_credential: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<StakeRegistration>>;

    fn get_stake_delegations(
        &self,
        stake_credential: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<StakeDelegation>>;

    fn get_tip(&self, txn: Option<&MetadataTxn>) -> Result<Tip>;

    /// Most recently inserted first
    fn get_pparams(&self, epoch: u64, txn: Option<&MetadataTxn>) -> Result<Vec<PParams>>;

    fn get_pparam_updates(&self, epoch: u64, txn: Option<&MetadataTxn>)
        -> Result<Vec<PParamUpdate>>;

    fn get_utxo(&self, utxo: &UtxoRef, txn: Option<&MetadataTxn>) -> Result<Utxo>;

    fn get_utxos_by_address(&self, address: &[u8], txn: Option<&MetadataTxn>)
        -> Result<Vec<Utxo>>;

    /// Epoch with the greatest index
    fn get_epoch_latest(&self, txn: Option<&MetadataTxn>) -> Result<Epoch>;

    fn get_epochs_by_era(&self, era_id: u32, txn: Option<&MetadataTxn>) -> Result<Vec<Epoch>>;

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Record an epoch; an existing index only has its nonce updated
    fn set_epoch(&self, epoch: &Epoch, txn: Option<&mut MetadataTxn>) -> Result<()>;

    fn set_pool_registration(
        &self,
        registration: &PoolRegistration,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()>;

    fn set_pool_retirement(
        &self,
        retirement: &PoolRetirement,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()>;

    fn set_pparams(&self, pparams: &PParams, txn: Option<&mut MetadataTxn>) -> Result<()>;

    fn set_pparam_update(&self, update: &PParamUpdate, txn: Option<&mut MetadataTxn>)
        -> Result<()>;

    fn set_stake_registration(
        &self,
        registration: &StakeRegistration,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()>;

    fn set_stake_deregistration(
        &self,
        deregistration: &StakeDeregistration,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()>;

    fn set_stake_delegation(
        &self,
        delegation: &StakeDelegation,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()>;

    fn set_tip(&self, tip: &Tip, txn: Option<&mut MetadataTxn>) -> Result<()>;

    fn add_utxo(&self, utxo: &Utxo, txn: Option<&mut MetadataTxn>) -> Result<()>;

    /// `NotFound` when no such output is stored
    fn delete_utxo(&self, utxo: &UtxoRef, txn: Option<&mut MetadataTxn>) -> Result<()>;

    /// All or nothing; `NotFound` if any reference is missing
    fn delete_utxos(&self, utxos: &[UtxoRef], txn: Option<&mut MetadataTxn>) -> Result<()>;
}

impl std::fmt::Debug for dyn MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("name", &self.name())
            .finish()
    }
}

/// Helper for backends: reject writes through a read-only context
pub(crate) fn ensure_writable(txn: &MetadataTxn) -> Result<()> {
    if !txn.is_read_write() {
        return Err(StoreError::ReadOnly);
    }
    Ok(())
}
