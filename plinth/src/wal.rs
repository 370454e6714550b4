//! The append-only write-ahead log.
//!
//! File format (version 2): the 8-byte magic "GODBWAL2", then records packed
//! back to back with no separators. Every record starts with
//! `recType: u8, txId: u64 LE`; data records continue with the table name
//! (u16 length + bytes), a rowCount (u32), and that many encoded rows.
//!
//!   1 BEGIN       no payload
//!   2 COMMIT      no payload
//!   3 ROLLBACK    no payload
//!   4 INSERT      rowCount = 1, the inserted row
//!   5 REPLACEALL  rowCount rows, the table's new full contents
//!   6 DELETE      rowCount = 1, the deleted row's pre-image
//!   7 UPDATE      rowCount = 2, old row then new row
//!
//! The WAL is the redo log of truth: a transaction is durable iff its COMMIT
//! record is on stable storage. COMMIT and ROLLBACK fsync; data records do
//! not, because recovery rebuilds tables from the log rather than trusting
//! table-file tails.

use bytes::BufMut;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use crate::value::Row;
use crate::TxId;

pub const WAL_MAGIC: &[u8; 8] = b"GODBWAL2";
pub const WAL_FILE_NAME: &str = "wal.log";

pub const REC_BEGIN: u8 = 1;
pub const REC_COMMIT: u8 = 2;
pub const REC_ROLLBACK: u8 = 3;
pub const REC_INSERT: u8 = 4;
pub const REC_REPLACE_ALL: u8 = 5;
pub const REC_DELETE: u8 = 6;
pub const REC_UPDATE: u8 = 7;

/// Append-only WAL writer. All appends go through an internal lock; records
/// hit the file in exactly the order the callers issued them.
#[derive(Debug)]
pub struct WalLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl WalLogger {
    /// Opens (or creates) `wal.log` under `dir`. A fresh file gets the magic;
    /// an existing file must start with it. The write position is left at the
    /// end of the file.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(WAL_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(WAL_MAGIC)?;
        } else {
            let mut magic = [0u8; WAL_MAGIC.len()];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut magic)?;
            if &magic != WAL_MAGIC {
                return Err(StorageError::corruption("invalid WAL magic"));
            }
        }
        file.seek(SeekFrom::End(0))?;

        Ok(WalLogger {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_begin(&self, tx_id: TxId) -> Result<()> {
        self.append_no_payload(REC_BEGIN, tx_id)
    }

    pub fn append_commit(&self, tx_id: TxId) -> Result<()> {
        self.append_no_payload(REC_COMMIT, tx_id)
    }

    pub fn append_rollback(&self, tx_id: TxId) -> Result<()> {
        self.append_no_payload(REC_ROLLBACK, tx_id)
    }

    pub fn append_insert(&self, tx_id: TxId, table: &str, row: &Row) -> Result<()> {
        self.append_data_record(REC_INSERT, tx_id, table, std::slice::from_ref(row))
    }

    pub fn append_replace_all(&self, tx_id: TxId, table: &str, rows: &[Row]) -> Result<()> {
        self.append_data_record(REC_REPLACE_ALL, tx_id, table, rows)
    }

    /// Logs the pre-image of a deleted row.
    pub fn append_delete(&self, tx_id: TxId, table: &str, row: &Row) -> Result<()> {
        self.append_data_record(REC_DELETE, tx_id, table, std::slice::from_ref(row))
    }

    /// Logs an in-place update as `[old, new]`.
    pub fn append_update(&self, tx_id: TxId, table: &str, old: &Row, new: &Row) -> Result<()> {
        self.append_data_record(REC_UPDATE, tx_id, table, &[old.clone(), new.clone()])
    }

    /// Forces everything appended so far onto stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn append_no_payload(&self, rec_type: u8, tx_id: TxId) -> Result<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(9);
        buf.put_u8(rec_type);
        buf.put_u64_le(tx_id);
        self.file.lock().write_all(&buf)?;
        Ok(())
    }

    fn append_data_record(
        &self,
        rec_type: u8,
        tx_id: TxId,
        table: &str,
        rows: &[Row],
    ) -> Result<()> {
        if table.len() > usize::from(u16::MAX) {
            return Err(StorageError::corruption("table name too long for WAL"));
        }

        let mut buf: Vec<u8> = Vec::new();
        buf.put_u8(rec_type);
        buf.put_u64_le(tx_id);
        buf.put_u16_le(table.len() as u16);
        buf.put_slice(table.as_bytes());
        buf.put_u32_le(rows.len() as u32);
        for row in rows {
            for v in row {
                v.encode(&mut buf);
            }
        }

        self.file.lock().write_all(&buf)?;
        Ok(())
    }
}
