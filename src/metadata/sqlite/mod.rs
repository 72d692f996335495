//! SQLite metadata backend
//!
//! Registered as `metadata/sqlite`. Persistent stores live in a single file
//! in WAL journal mode; in-memory stores share one `memdb` database across
//! the pool.

mod pool;

use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::{Backend, Result, StoreError};
use crate::metadata::{
    ensure_writable, Epoch, MetadataStore, MetadataTxn, PParamUpdate, PParams, PoolRegistration,
    PoolRetirement, StakeDelegation, StakeDeregistration, StakeRegistration, Tip, TxnInner, Utxo,
    UtxoRef,
};
use crate::registry::{PluginCategory, PluginContext, PluginEntry, PluginRegistry};

pub(crate) use pool::ConnectionPool;
pub use pool::SqliteTxn;

use pool::PoolSettings;

pub const PLUGIN_NAME: &str = "sqlite";
pub const DB_FILENAME: &str = "metadata.sqlite";

/// Register this backend under `metadata/sqlite`
pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(PluginEntry {
        category: PluginCategory::Metadata,
        name: PLUGIN_NAME.to_string(),
        description: "SQLite relational metadata store",
        factory: create,
    })
}

fn create(ctx: &PluginContext<'_>) -> Result<Box<dyn MetadataStore>> {
    Ok(Box::new(SqliteMetadataStore::from_context(ctx)?))
}

pub struct SqliteMetadataStore {
    pool: ConnectionPool,
    path: Option<PathBuf>,
}

impl SqliteMetadataStore {
    /// Open `<data_dir>/metadata.sqlite`, creating directory and file as needed
    pub fn open(data_dir: &Path, cache_kib: u32, busy_timeout: Duration) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Open {
            backend: Backend::Metadata,
            reason: e.to_string(),
        })?;
        let path = data_dir.join(DB_FILENAME);
        let pool = ConnectionPool::open_file(
            path.clone(),
            PoolSettings {
                cache_kib,
                busy_timeout,
            },
        )
        .map_err(open_error)?;
        tracing::debug!(path = %path.display(), "sqlite: opened metadata store");
        Ok(Self {
            pool,
            path: Some(path),
        })
    }

    pub fn in_memory(cache_kib: u32, busy_timeout: Duration) -> Result<Self> {
        let pool = ConnectionPool::open_memory(PoolSettings {
            cache_kib,
            busy_timeout,
        })
        .map_err(open_error)?;
        Ok(Self { pool, path: None })
    }

    fn from_context(ctx: &PluginContext<'_>) -> Result<Self> {
        let busy_timeout = Duration::from_millis(ctx.busy_timeout_ms);
        match ctx.data_dir {
            Some(dir) => Self::open(dir, ctx.cache_kib, busy_timeout),
            None => Self::in_memory(ctx.cache_kib, busy_timeout),
        }
    }

    /// Database file, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the caller's transaction or a pooled connection
    fn read<T, F>(&self, txn: Option<&MetadataTxn>, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        match txn {
            Some(txn) => {
                let TxnInner::Sqlite(native) = txn.inner();
                f(native.conn()).map_err(|e| sql_error(e, operation))
            }
            None => {
                let conn = self.pool.get()?;
                f(&conn).map_err(|e| sql_error(e, operation))
            }
        }
    }

    /// Run `f` inside the caller's transaction, or a short one of its own
    fn write<T, F>(&self, txn: Option<&mut MetadataTxn>, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        match txn {
            Some(txn) => {
                ensure_writable(txn)?;
                let TxnInner::Sqlite(native) = txn.inner_mut();
                f(native.conn()).map_err(|e| sql_error(e, operation))
            }
            None => {
                let native = SqliteTxn::begin(&self.pool, true)?;
                let value = f(native.conn()).map_err(|e| sql_error(e, operation))?;
                native.commit()?;
                Ok(value)
            }
        }
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn close(&self) -> Result<()> {
        self.pool.close();
        tracing::debug!("sqlite: metadata store closed");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn install_instrumentation(&self) -> Result<()> {
        self.pool.install_tracing();
        Ok(())
    }

    fn begin(&self, read_write: bool) -> Result<MetadataTxn> {
        let native = SqliteTxn::begin(&self.pool, read_write)?;
        Ok(MetadataTxn::new(TxnInner::Sqlite(native)))
    }

    fn get_commit_timestamp(&self, txn: Option<&MetadataTxn>) -> Result<Option<i64>> {
        self.read(txn, "get commit timestamp", |conn| {
            conn.query_row(
                "SELECT timestamp FROM commit_timestamp WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set_commit_timestamp(&self, timestamp: i64, txn: Option<&mut MetadataTxn>) -> Result<()> {
        self.write(txn, "set commit timestamp", |conn| {
            conn.execute(
                "INSERT INTO commit_timestamp (id, timestamp) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET timestamp = excluded.timestamp",
                params![timestamp],
            )
            .map(|_| ())
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn get_pool_registrations(
        &self,
        pool_key_hash: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<PoolRegistration>> {
        self.read(txn, "get pool registrations", |conn| {
            let mut stmt = conn.prepare(
                "SELECT pool_key_hash, vrf_key_hash, pledge, cost, margin_numerator,
                        margin_denominator, reward_account, owners, metadata_url,
                        metadata_hash, added_slot, deposit
                 FROM pool_registration WHERE pool_key_hash = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![pool_key_hash], pool_registration_from_row)?;
            rows.collect()
        })
    }

    fn get_pool_retirements(
        &self,
        pool_key_hash: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<PoolRetirement>> {
        self.read(txn, "get pool retirements", |conn| {
            let mut stmt = conn.prepare(
                "SELECT pool_key_hash, epoch, added_slot FROM pool_retirement
                 WHERE pool_key_hash = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![pool_key_hash], |row| {
                Ok(PoolRetirement {
                    pool_key_hash: row.get(0)?,
                    epoch: row.get(1)?,
                    added_slot: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    fn get_stake_registrations(
        &self,
        stake_credential: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<StakeRegistration>> {
        self.read(txn, "get stake registrations", |conn| {
            let mut stmt = conn.prepare(
                "SELECT stake_credential, added_slot, deposit FROM stake_registration
                 WHERE stake_credential = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![stake_credential], |row| {
                Ok(StakeRegistration {
                    stake_credential: row.get(0)?,
                    added_slot: row.get(1)?,
                    deposit: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    fn get_stake_delegations(
        &self,
        stake_credential: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<StakeDelegation>> {
        self.read(txn, "get stake delegations", |conn| {
            let mut stmt = conn.prepare(
                "SELECT stake_credential, pool_key_hash, added_slot FROM stake_delegation
                 WHERE stake_credential = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![stake_credential], |row| {
                Ok(StakeDelegation {
                    stake_credential: row.get(0)?,
                    pool_key_hash: row.get(1)?,
                    added_slot: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    fn get_tip(&self, txn: Option<&MetadataTxn>) -> Result<Tip> {
        self.read(txn, "get tip", |conn| {
            conn.query_row(
                "SELECT hash, slot, block_number FROM tip WHERE id = 1",
                [],
                |row| {
                    Ok(Tip {
                        hash: row.get(0)?,
                        slot: row.get(1)?,
                        block_number: row.get(2)?,
                    })
                },
            )
        })
    }

    fn get_pparams(&self, epoch: u64, txn: Option<&MetadataTxn>) -> Result<Vec<PParams>> {
        self.read(txn, "get pparams", |conn| {
            let mut stmt = conn.prepare(
                "SELECT epoch, added_slot, era_id, cbor FROM pparams
                 WHERE epoch = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![epoch], |row| {
                Ok(PParams {
                    epoch: row.get(0)?,
                    added_slot: row.get(1)?,
                    era_id: row.get(2)?,
                    cbor: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    fn get_pparam_updates(
        &self,
        epoch: u64,
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<PParamUpdate>> {
        self.read(txn, "get pparam updates", |conn| {
            let mut stmt = conn.prepare(
                "SELECT genesis_hash, cbor, added_slot, epoch FROM pparam_update
                 WHERE epoch = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![epoch], |row| {
                Ok(PParamUpdate {
                    genesis_hash: row.get(0)?,
                    cbor: row.get(1)?,
                    added_slot: row.get(2)?,
                    epoch: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    fn get_utxo(&self, utxo: &UtxoRef, txn: Option<&MetadataTxn>) -> Result<Utxo> {
        self.read(txn, "get utxo", |conn| {
            conn.query_row(
                "SELECT tx_id, output_idx, address, amount, cbor, added_slot FROM utxo
                 WHERE tx_id = ?1 AND output_idx = ?2",
                params![utxo.tx_id, utxo.output_idx],
                utxo_from_row,
            )
        })
    }

    fn get_utxos_by_address(
        &self,
        address: &[u8],
        txn: Option<&MetadataTxn>,
    ) -> Result<Vec<Utxo>> {
        self.read(txn, "get utxos by address", |conn| {
            let mut stmt = conn.prepare(
                "SELECT tx_id, output_idx, address, amount, cbor, added_slot FROM utxo
                 WHERE address = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![address], utxo_from_row)?;
            rows.collect()
        })
    }

    fn get_epoch_latest(&self, txn: Option<&MetadataTxn>) -> Result<Epoch> {
        self.read(txn, "get latest epoch", |conn| {
            conn.query_row(
                "SELECT epoch_id, era_id, start_slot, slot_length, length_in_slots, nonce
                 FROM epoch ORDER BY epoch_id DESC LIMIT 1",
                [],
                epoch_from_row,
            )
        })
    }

    fn get_epochs_by_era(&self, era_id: u32, txn: Option<&MetadataTxn>) -> Result<Vec<Epoch>> {
        self.read(txn, "get epochs by era", |conn| {
            let mut stmt = conn.prepare(
                "SELECT epoch_id, era_id, start_slot, slot_length, length_in_slots, nonce
                 FROM epoch WHERE era_id = ?1 ORDER BY epoch_id",
            )?;
            let rows = stmt.query_map(params![era_id], epoch_from_row)?;
            rows.collect()
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn set_epoch(&self, epoch: &Epoch, txn: Option<&mut MetadataTxn>) -> Result<()> {
        self.write(txn, "set epoch", |conn| {
            conn.execute(
                "INSERT INTO epoch (epoch_id, era_id, start_slot, slot_length, length_in_slots, nonce)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(epoch_id) DO UPDATE SET nonce = excluded.nonce",
                params![
                    epoch.epoch_id,
                    epoch.era_id,
                    epoch.start_slot,
                    epoch.slot_length,
                    epoch.length_in_slots,
                    epoch.nonce,
                ],
            )
            .map(|_| ())
        })
    }

    fn set_pool_registration(
        &self,
        registration: &PoolRegistration,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()> {
        let owners = bincode::serialize(&registration.owners)?;
        self.write(txn, "set pool registration", |conn| {
            conn.execute(
                "INSERT INTO pool_registration (pool_key_hash, vrf_key_hash, pledge, cost,
                    margin_numerator, margin_denominator, reward_account, owners,
                    metadata_url, metadata_hash, added_slot, deposit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    registration.pool_key_hash,
                    registration.vrf_key_hash,
                    registration.pledge,
                    registration.cost,
                    registration.margin_numerator,
                    registration.margin_denominator,
                    registration.reward_account,
                    owners,
                    registration.metadata_url,
                    registration.metadata_hash,
                    registration.added_slot,
                    registration.deposit,
                ],
            )
            .map(|_| ())
        })
    }

    fn set_pool_retirement(
        &self,
        retirement: &PoolRetirement,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()> {
        self.write(txn, "set pool retirement", |conn| {
            conn.execute(
                "INSERT INTO pool_retirement (pool_key_hash, epoch, added_slot)
                 VALUES (?1, ?2, ?3)",
                params![
                    retirement.pool_key_hash,
                    retirement.epoch,
                    retirement.added_slot
                ],
            )
            .map(|_| ())
        })
    }

    fn set_pparams(&self, pparams: &PParams, txn: Option<&mut MetadataTxn>) -> Result<()> {
        self.write(txn, "set pparams", |conn| {
            conn.execute(
                "INSERT INTO pparams (epoch, added_slot, era_id, cbor) VALUES (?1, ?2, ?3, ?4)",
                params![
                    pparams.epoch,
                    pparams.added_slot,
                    pparams.era_id,
                    pparams.cbor
                ],
            )
            .map(|_| ())
        })
    }

    fn set_pparam_update(
        &self,
        update: &PParamUpdate,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()> {
        self.write(txn, "set pparam update", |conn| {
            conn.execute(
                "INSERT INTO pparam_update (genesis_hash, cbor, added_slot, epoch)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    update.genesis_hash,
                    update.cbor,
                    update.added_slot,
                    update.epoch
                ],
            )
            .map(|_| ())
        })
    }

    fn set_stake_registration(
        &self,
        registration: &StakeRegistration,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()> {
        self.write(txn, "set stake registration", |conn| {
            conn.execute(
                "INSERT INTO stake_registration (stake_credential, added_slot, deposit)
                 VALUES (?1, ?2, ?3)",
                params![
                    registration.stake_credential,
                    registration.added_slot,
                    registration.deposit
                ],
            )
            .map(|_| ())
        })
    }

    fn set_stake_deregistration(
        &self,
        deregistration: &StakeDeregistration,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()> {
        self.write(txn, "set stake deregistration", |conn| {
            conn.execute(
                "INSERT INTO stake_deregistration (stake_credential, added_slot) VALUES (?1, ?2)",
                params![deregistration.stake_credential, deregistration.added_slot],
            )
            .map(|_| ())
        })
    }

    fn set_stake_delegation(
        &self,
        delegation: &StakeDelegation,
        txn: Option<&mut MetadataTxn>,
    ) -> Result<()> {
        self.write(txn, "set stake delegation", |conn| {
            conn.execute(
                "INSERT INTO stake_delegation (stake_credential, pool_key_hash, added_slot)
                 VALUES (?1, ?2, ?3)",
                params![
                    delegation.stake_credential,
                    delegation.pool_key_hash,
                    delegation.added_slot
                ],
            )
            .map(|_| ())
        })
    }

    fn set_tip(&self, tip: &Tip, txn: Option<&mut MetadataTxn>) -> Result<()> {
        self.write(txn, "set tip", |conn| {
            conn.execute(
                "INSERT INTO tip (id, hash, slot, block_number) VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    hash = excluded.hash,
                    slot = excluded.slot,
                    block_number = excluded.block_number",
                params![tip.hash, tip.slot, tip.block_number],
            )
            .map(|_| ())
        })
    }

    fn add_utxo(&self, utxo: &Utxo, txn: Option<&mut MetadataTxn>) -> Result<()> {
        self.write(txn, "add utxo", |conn| {
            conn.execute(
                "INSERT INTO utxo (tx_id, output_idx, address, amount, cbor, added_slot)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    utxo.tx_id,
                    utxo.output_idx,
                    utxo.address,
                    utxo.amount,
                    utxo.cbor,
                    utxo.added_slot,
                ],
            )
            .map(|_| ())
        })
    }

    fn delete_utxo(&self, utxo: &UtxoRef, txn: Option<&mut MetadataTxn>) -> Result<()> {
        self.write(txn, "delete utxo", |conn| delete_one_utxo(conn, utxo))
    }

    fn delete_utxos(&self, utxos: &[UtxoRef], txn: Option<&mut MetadataTxn>) -> Result<()> {
        // Savepoint keeps the batch atomic inside a caller's transaction too
        self.write(txn, "delete utxos", |conn| {
            conn.execute_batch("SAVEPOINT delete_utxos")?;
            let result = utxos
                .iter()
                .try_for_each(|utxo| delete_one_utxo(conn, utxo));
            match result {
                Ok(()) => conn.execute_batch("RELEASE delete_utxos"),
                Err(e) => {
                    conn.execute_batch("ROLLBACK TO delete_utxos; RELEASE delete_utxos")?;
                    Err(e)
                }
            }
        })
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn delete_one_utxo(conn: &Connection, utxo: &UtxoRef) -> rusqlite::Result<()> {
    let deleted = conn.execute(
        "DELETE FROM utxo WHERE tx_id = ?1 AND output_idx = ?2",
        params![utxo.tx_id, utxo.output_idx],
    )?;
    if deleted == 0 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }
    Ok(())
}

fn epoch_from_row(row: &Row<'_>) -> rusqlite::Result<Epoch> {
    Ok(Epoch {
        epoch_id: row.get(0)?,
        era_id: row.get(1)?,
        start_slot: row.get(2)?,
        slot_length: row.get(3)?,
        length_in_slots: row.get(4)?,
        nonce: row.get(5)?,
    })
}

fn utxo_from_row(row: &Row<'_>) -> rusqlite::Result<Utxo> {
    Ok(Utxo {
        tx_id: row.get(0)?,
        output_idx: row.get(1)?,
        address: row.get(2)?,
        amount: row.get(3)?,
        cbor: row.get(4)?,
        added_slot: row.get(5)?,
    })
}

fn pool_registration_from_row(row: &Row<'_>) -> rusqlite::Result<PoolRegistration> {
    let owners: Vec<u8> = row.get(7)?;
    let owners = bincode::deserialize(&owners)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Blob, e))?;
    Ok(PoolRegistration {
        pool_key_hash: row.get(0)?,
        vrf_key_hash: row.get(1)?,
        pledge: row.get(2)?,
        cost: row.get(3)?,
        margin_numerator: row.get(4)?,
        margin_denominator: row.get(5)?,
        reward_account: row.get(6)?,
        owners,
        metadata_url: row.get(8)?,
        metadata_hash: row.get(9)?,
        added_slot: row.get(10)?,
        deposit: row.get(11)?,
    })
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Map a rusqlite error onto the store taxonomy
pub(crate) fn sql_error(e: rusqlite::Error, operation: &'static str) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        // SQLite integers are signed; u64 values above i64::MAX do not fit
        rusqlite::Error::ToSqlConversionFailure(e) => {
            StoreError::InvalidInput(format!("{}: {}", operation, e))
        }
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == ErrorCode::ReadOnly =>
        {
            StoreError::ReadOnly
        }
        other => StoreError::Backend {
            backend: Backend::Metadata,
            operation,
            reason: other.to_string(),
        },
    }
}

fn open_error(e: StoreError) -> StoreError {
    match e {
        StoreError::Open { .. } => e,
        other => StoreError::Open {
            backend: Backend::Metadata,
            reason: other.to_string(),
        },
    }
}
