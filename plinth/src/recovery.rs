//! Redo-only recovery. Runs exactly once, when the engine opens a directory.
//!
//! Every table file is first truncated back to its schema header, wiping any
//! partial writes from the previous session. The whole WAL is then parsed
//! into per-transaction op lists, and the ops of every transaction that
//! committed (and did not roll back) are replayed, in the order each TxId
//! first appeared, into an in-memory view of each table. The views are
//! finally written back through the normal ReplaceAll path with the internal
//! TxId 0, which suppresses WAL logging.
//!
//! Transactions with no COMMIT record at all — a crash before commit — are
//! treated as rolled back. A WAL tail that ends mid-record aborts recovery
//! as corruption, as does an unknown record type or a WAL op that names a
//! table whose file has disappeared.

use bytes::Buf;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};

use crate::engine::{FileEngine, FileTx};
use crate::error::{Result, StorageError};
use crate::value::{decode_row, write_table_header, Column, Row};
use crate::wal::{
    REC_BEGIN, REC_COMMIT, REC_DELETE, REC_INSERT, REC_REPLACE_ALL, REC_ROLLBACK, REC_UPDATE,
    WAL_MAGIC,
};
use crate::{plinth_debug_log, TxId};

enum WalOp {
    Insert { table: String, rows: Vec<Row> },
    ReplaceAll { table: String, rows: Vec<Row> },
    Delete { table: String, rows: Vec<Row> },
    /// Pairs flattened as `[old1, new1, old2, new2, ...]`.
    Update { table: String, rows: Vec<Row> },
}

#[derive(Default)]
struct WalTxState {
    ops: Vec<WalOp>,
    committed: bool,
    rolled: bool,
}

impl FileEngine {
    pub(crate) fn recover_from_wal(&self) -> Result<()> {
        let wal_bytes = std::fs::read(self.wal.path())?;
        if wal_bytes.len() <= WAL_MAGIC.len() {
            return Ok(()); // magic only, nothing to replay
        }

        // 1) Schemas of every table currently on disk.
        let table_names = self.list_tables()?;
        let mut schemas: HashMap<String, Vec<Column>> = HashMap::new();
        for t in &table_names {
            schemas.insert(t.clone(), self.table_schema(t)?);
        }

        // 2) Truncate every table back to header only.
        for t in &table_names {
            let mut f = OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.table_path(t))?;
            f.set_len(0)?;
            f.seek(SeekFrom::Start(0))?;
            write_table_header(&mut f, &schemas[t])?;
        }

        // 3) Parse the WAL into per-transaction states, keeping the order in
        //    which TxIds first appear.
        let mut states: HashMap<TxId, WalTxState> = HashMap::new();
        let mut tx_order: Vec<TxId> = Vec::new();

        let mut cursor = &wal_bytes[WAL_MAGIC.len()..];
        while cursor.has_remaining() {
            let rec_type = cursor.get_u8();
            if cursor.remaining() < 8 {
                return Err(StorageError::corruption("WAL record truncated at txId"));
            }
            let tx_id = cursor.get_u64_le();

            if !states.contains_key(&tx_id) {
                states.insert(tx_id, WalTxState::default());
                tx_order.push(tx_id);
            }
            let state = states.get_mut(&tx_id).expect("state was just inserted");

            match rec_type {
                REC_BEGIN => {}
                REC_COMMIT => state.committed = true,
                REC_ROLLBACK => state.rolled = true,
                REC_INSERT | REC_REPLACE_ALL | REC_DELETE | REC_UPDATE => {
                    let (table, rows) = read_data_payload(&mut cursor, &schemas)?;
                    let op = match rec_type {
                        REC_INSERT => WalOp::Insert { table, rows },
                        REC_REPLACE_ALL => WalOp::ReplaceAll { table, rows },
                        REC_DELETE => WalOp::Delete { table, rows },
                        _ => {
                            if rows.len() % 2 != 0 {
                                return Err(StorageError::corruption(format!(
                                    "WAL UPDATE for {table:?} has odd row count {}",
                                    rows.len()
                                )));
                            }
                            WalOp::Update { table, rows }
                        }
                    };
                    state.ops.push(op);
                }
                other => {
                    return Err(StorageError::corruption(format!(
                        "unknown WAL record type {other}"
                    )));
                }
            }
        }

        // 4) Replay committed transactions into an in-memory view.
        let mut rows_by_table: HashMap<String, Vec<Row>> = HashMap::new();
        let mut replayed = 0usize;
        for tx_id in &tx_order {
            let state = &states[tx_id];
            if !state.committed || state.rolled {
                continue;
            }
            replayed += 1;

            for op in &state.ops {
                match op {
                    WalOp::Insert { table, rows } => {
                        rows_by_table
                            .entry(table.clone())
                            .or_default()
                            .extend(rows.iter().cloned());
                    }
                    WalOp::ReplaceAll { table, rows } => {
                        rows_by_table.insert(table.clone(), rows.clone());
                    }
                    WalOp::Delete { table, rows } => {
                        let cur = rows_by_table.entry(table.clone()).or_default();
                        for del in rows {
                            if let Some(pos) = cur.iter().position(|r| r == del) {
                                cur.remove(pos);
                            }
                        }
                    }
                    WalOp::Update { table, rows } => {
                        let cur = rows_by_table.entry(table.clone()).or_default();
                        for pair in rows.chunks_exact(2) {
                            let (old, new) = (&pair[0], &pair[1]);
                            if let Some(pos) = cur.iter().position(|r| r == old) {
                                cur[pos] = new.clone();
                            }
                        }
                    }
                }
            }
        }

        // 5) Write the rebuilt contents back through the page-based
        //    ReplaceAll path, without logging.
        for (table, rows) in &rows_by_table {
            let mut tx = FileTx::internal_rewrite(self);
            tx.replace_all(table, rows)?;
        }

        plinth_debug_log!(
            "[recovery] replayed {replayed} committed transaction(s) into {} table(s)",
            rows_by_table.len()
        );
        Ok(())
    }
}

/// Reads the common data-record payload: table name, row count, and that
/// many rows decoded against the table's on-disk schema.
fn read_data_payload(
    cursor: &mut &[u8],
    schemas: &HashMap<String, Vec<Column>>,
) -> Result<(String, Vec<Row>)> {
    if cursor.remaining() < 2 {
        return Err(StorageError::corruption("WAL record truncated at table name"));
    }
    let name_len = cursor.get_u16_le() as usize;
    if cursor.remaining() < name_len {
        return Err(StorageError::corruption("WAL record truncated at table name"));
    }
    let mut name = vec![0u8; name_len];
    cursor.copy_to_slice(&mut name);
    let table = String::from_utf8(name)
        .map_err(|_| StorageError::corruption("WAL table name is not valid UTF-8"))?;

    if cursor.remaining() < 4 {
        return Err(StorageError::corruption("WAL record truncated at row count"));
    }
    let row_count = cursor.get_u32_le();

    let cols = schemas.get(&table).ok_or_else(|| {
        StorageError::corruption(format!("WAL references table {table:?} with no file on disk"))
    })?;

    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        rows.push(decode_row(cursor, cols.len())?);
    }

    Ok((table, rows))
}
