//! Cross-backend transaction
//!
//! A [`Txn`] holds a native transaction per backend: a metadata transaction
//! opened up front, a buffered blob batch, and a graph transaction started
//! on first use. Dropping a `Txn` without committing rolls all of them back.

use crate::blob::BlobTxn;
use crate::error::{Backend, Result, StoreError};
use crate::graph::GraphTxn;
use crate::metadata::{
    Epoch, MetadataTxn, PParamUpdate, PParams, PoolRegistration, PoolRetirement,
    StakeDelegation, StakeDeregistration, StakeRegistration, Tip, Utxo, UtxoRef,
};

use super::{commit_marker, now_millis, Database};

/// One logical unit of work over any subset of backends
pub struct Txn<'db> {
    db: &'db Database,
    read_write: bool,
    metadata: MetadataTxn,
    blob: BlobTxn<'db>,
    graph: Option<GraphTxn<'db>>,
}

impl<'db> Txn<'db> {
    pub(super) fn new(
        db: &'db Database,
        read_write: bool,
        metadata: MetadataTxn,
        blob: BlobTxn<'db>,
    ) -> Self {
        Self {
            db,
            read_write,
            metadata,
            blob,
            graph: None,
        }
    }

    /// The owning database
    pub fn db(&self) -> &'db Database {
        self.db
    }

    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    /// Metadata transaction context, for direct `MetadataStore` calls
    pub fn metadata(&mut self) -> &mut MetadataTxn {
        &mut self.metadata
    }

    pub fn blob(&mut self) -> &mut BlobTxn<'db> {
        &mut self.blob
    }

    /// Graph transaction, started on first call
    pub fn graph(&mut self) -> Result<&mut GraphTxn<'db>> {
        if self.graph.is_none() {
            let client = self
                .db
                .graph()
                .ok_or(StoreError::NotConfigured(Backend::Graph))?;
            self.graph = Some(client.new_txn(self.read_write));
        }
        self.graph
            .as_mut()
            .ok_or(StoreError::NotConfigured(Backend::Graph))
    }

    /// Run `f`, then commit on `Ok` or roll back on `Err`
    ///
    /// The error from `f` is returned unchanged.
    pub fn run<T, F>(mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Txn<'db>) -> Result<T>,
    {
        match f(&mut self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!(
                        component = "database",
                        error = %rollback_err,
                        "txn: rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Commit every backend
    ///
    /// Read-write commits stamp both commit markers first, then commit
    /// graph, blob and finally metadata. The metadata write lock is held
    /// from the start, so its commit does not wait on other connections; if
    /// it still fails, the blob batch is reverted.
    pub fn commit(self) -> Result<()> {
        if !self.read_write {
            let Txn {
                metadata, graph, ..
            } = self;
            if let Some(graph) = graph {
                graph.commit()?;
            }
            return metadata.commit();
        }
        let timestamp = now_millis()?;
        self.commit_at(timestamp)
    }

    pub(super) fn commit_at(self, timestamp: i64) -> Result<()> {
        let Txn {
            db,
            mut metadata,
            mut blob,
            graph,
            ..
        } = self;

        db.metadata()
            .set_commit_timestamp(timestamp, Some(&mut metadata))?;
        let (key, value) = commit_marker(timestamp);
        blob.put(key, &value)?;

        // Nothing is applied yet; an error here drops blob and metadata
        if let Some(graph) = graph {
            graph.commit()?;
        }
        let undo = blob
            .commit_with_undo()
            .map_err(|e| e.in_backend(Backend::Blob, "commit"))?;

        if let Err(e) = metadata.commit() {
            if let Err(undo_err) = db.blob().apply(undo) {
                tracing::error!(
                    component = "database",
                    error = %undo_err,
                    "txn: reverting blob batch failed; commit markers now disagree"
                );
            }
            return Err(e.in_backend(Backend::Metadata, "commit"));
        }
        Ok(())
    }

    /// Discard every backend's pending work
    pub fn rollback(self) -> Result<()> {
        let Txn {
            metadata,
            blob,
            graph,
            ..
        } = self;
        blob.discard();
        let graph_result = match graph {
            Some(graph) => graph.discard(),
            None => Ok(()),
        };
        let metadata_result = metadata.rollback();
        StoreError::join(
            [graph_result, metadata_result]
                .into_iter()
                .filter_map(|r| r.err())
                .collect(),
        )
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.read_write {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_pool_registrations(&self, pool_key_hash: &[u8]) -> Result<Vec<PoolRegistration>> {
        self.db
            .metadata()
            .get_pool_registrations(pool_key_hash, Some(&self.metadata))
    }

    pub fn get_pool_retirements(&self, pool_key_hash: &[u8]) -> Result<Vec<PoolRetirement>> {
        self.db
            .metadata()
            .get_pool_retirements(pool_key_hash, Some(&self.metadata))
    }

    pub fn get_stake_registrations(&self, stake_credential: &[u8]) -> Result<Vec<StakeRegistration>> {
        self.db
            .metadata()
            .get_stake_registrations(stake_credential, Some(&self.metadata))
    }

    pub fn get_stake_delegations(&self, stake_credential: &[u8]) -> Result<Vec<StakeDelegation>> {
        self.db
            .metadata()
            .get_stake_delegations(stake_credential, Some(&self.metadata))
    }

    pub fn get_tip(&self) -> Result<Tip> {
        self.db.metadata().get_tip(Some(&self.metadata))
    }

    pub fn get_pparams(&self, epoch: u64) -> Result<Vec<PParams>> {
        self.db.metadata().get_pparams(epoch, Some(&self.metadata))
    }

    pub fn get_pparam_updates(&self, epoch: u64) -> Result<Vec<PParamUpdate>> {
        self.db
            .metadata()
            .get_pparam_updates(epoch, Some(&self.metadata))
    }

    pub fn get_utxo(&self, utxo: &UtxoRef) -> Result<Utxo> {
        self.db.metadata().get_utxo(utxo, Some(&self.metadata))
    }

    pub fn get_utxos_by_address(&self, address: &[u8]) -> Result<Vec<Utxo>> {
        self.db
            .metadata()
            .get_utxos_by_address(address, Some(&self.metadata))
    }

    pub fn get_epoch_latest(&self) -> Result<Epoch> {
        self.db.metadata().get_epoch_latest(Some(&self.metadata))
    }

    pub fn get_epochs_by_era(&self, era_id: u32) -> Result<Vec<Epoch>> {
        self.db
            .metadata()
            .get_epochs_by_era(era_id, Some(&self.metadata))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn set_epoch(&mut self, epoch: &Epoch) -> Result<()> {
        self.ensure_writable()?;
        self.db.metadata().set_epoch(epoch, Some(&mut self.metadata))
    }

    pub fn set_pool_registration(&mut self, registration: &PoolRegistration) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_pool_registration(registration, Some(&mut self.metadata))
    }

    pub fn set_pool_retirement(&mut self, retirement: &PoolRetirement) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_pool_retirement(retirement, Some(&mut self.metadata))
    }

    pub fn set_pparams(&mut self, pparams: &PParams) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_pparams(pparams, Some(&mut self.metadata))
    }

    pub fn set_pparam_update(&mut self, update: &PParamUpdate) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_pparam_update(update, Some(&mut self.metadata))
    }

    pub fn set_stake_registration(&mut self, registration: &StakeRegistration) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_stake_registration(registration, Some(&mut self.metadata))
    }

    pub fn set_stake_deregistration(&mut self, deregistration: &StakeDeregistration) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_stake_deregistration(deregistration, Some(&mut self.metadata))
    }

    pub fn set_stake_delegation(&mut self, delegation: &StakeDelegation) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .set_stake_delegation(delegation, Some(&mut self.metadata))
    }

    pub fn set_tip(&mut self, tip: &Tip) -> Result<()> {
        self.ensure_writable()?;
        self.db.metadata().set_tip(tip, Some(&mut self.metadata))
    }

    pub fn add_utxo(&mut self, utxo: &Utxo) -> Result<()> {
        self.ensure_writable()?;
        self.db.metadata().add_utxo(utxo, Some(&mut self.metadata))
    }

    pub fn delete_utxo(&mut self, utxo: &UtxoRef) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .delete_utxo(utxo, Some(&mut self.metadata))
    }

    pub fn delete_utxos(&mut self, utxos: &[UtxoRef]) -> Result<()> {
        self.ensure_writable()?;
        self.db
            .metadata()
            .delete_utxos(utxos, Some(&mut self.metadata))
    }
}

impl std::fmt::Debug for Txn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("read_write", &self.read_write)
            .field("blob_pending", &self.blob.pending_len())
            .field("graph_started", &self.graph.is_some())
            .finish()
    }
}
