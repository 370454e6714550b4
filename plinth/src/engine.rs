//! The on-disk engine: directory layout, DDL, transaction lifecycle, and the
//! index registry.
//!
//! Layout inside the database directory:
//!
//!   <table>.godb        one file per table: header + heap pages
//!   <table>_<col>.idx   one file per B-tree index
//!   wal.log             the write-ahead log
//!
//! Opening a directory runs recovery exactly once, then transaction ids
//! start from 1 for this process. CREATE TABLE is not WAL-logged; a table
//! exists by being a filesystem object.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::btree::{FileIndex, IndexManager};
use crate::error::{Result, StorageError};
use crate::value::{read_table_header, write_table_header, Column, DataType, Value};
use crate::wal::WalLogger;
use crate::{plinth_debug_log, TxId};

pub const TABLE_FILE_EXT: &str = "godb";
pub const INDEX_FILE_EXT: &str = "idx";

#[derive(Default)]
#[derive(Debug)]
pub(crate) struct IndexRegistry {
    /// Index name -> (table, column); guards against duplicate names.
    pub(crate) names: HashMap<String, (String, String)>,
    /// table -> column -> open index handle.
    pub(crate) by_table: HashMap<String, HashMap<String, Arc<Mutex<FileIndex>>>>,
}

/// A database rooted at one directory. All methods take `&self`; the only
/// internal locks are the write-tx counter and the index registry.
#[derive(Debug)]
pub struct FileEngine {
    pub(crate) dir: PathBuf,
    pub(crate) wal: WalLogger,
    next_tx_id: Mutex<TxId>,
    pub(crate) index_manager: IndexManager,
    pub(crate) indexes: RwLock<IndexRegistry>,
}

impl FileEngine {
    /// Opens the database in `dir`, creating the directory and WAL if needed,
    /// re-opening every existing index, and replaying the WAL so all table
    /// files reflect exactly the committed transactions.
    pub fn open(dir: impl AsRef<Path>) -> Result<FileEngine> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let wal = WalLogger::open(&dir)?;
        let engine = FileEngine {
            index_manager: IndexManager::new(&dir),
            dir,
            wal,
            next_tx_id: Mutex::new(1),
            indexes: RwLock::default(),
        };

        engine.open_existing_indexes()?;
        engine.recover_from_wal()?;
        plinth_debug_log!("[FileEngine::open] open complete at {:?}", engine.dir);

        Ok(engine)
    }

    pub(crate) fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{TABLE_FILE_EXT}"))
    }

    /// Creates a new table file with the given schema. The schema is fixed at
    /// creation; there is no ALTER.
    pub fn create_table(&self, name: &str, cols: &[Column]) -> Result<()> {
        let path = self.table_path(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::TableExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = write_table_header(&mut file, cols) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        plinth_debug_log!("[FileEngine::create_table] created {:?}", path);
        Ok(())
    }

    /// All table names in the directory, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_FILE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tables.push(stem.to_string());
                }
            }
        }
        tables.sort();
        Ok(tables)
    }

    /// Reads a table's column sequence from its file header.
    pub fn table_schema(&self, name: &str) -> Result<Vec<Column>> {
        let file = self.open_table_for_read(name)?;
        read_table_header(&mut BufReader::new(file))
    }

    pub(crate) fn open_table_for_read(&self, name: &str) -> Result<File> {
        match File::open(self.table_path(name)) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::TableMissing(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn open_table_for_write(&self, name: &str) -> Result<File> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.table_path(name))
        {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::TableMissing(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Starts a transaction. Write transactions mint a TxId and log BEGIN;
    /// read-only transactions carry id 0 and never touch the WAL.
    pub fn begin(&self, read_only: bool) -> Result<FileTx<'_>> {
        let mut tx = FileTx {
            eng: self,
            read_only,
            closed: false,
            id: 0,
        };

        if !read_only {
            let id = {
                let mut counter = self.next_tx_id.lock();
                let id = *counter;
                *counter += 1;
                id
            };
            tx.id = id;
            self.wal.append_begin(id)?;
        }

        Ok(tx)
    }

    /// Logs COMMIT, fsyncs the WAL, and closes the transaction. For read-only
    /// transactions this only closes.
    pub fn commit(&self, tx: &mut FileTx<'_>) -> Result<()> {
        self.validate_tx(tx)?;

        if !tx.read_only && tx.id != 0 {
            self.wal.append_commit(tx.id)?;
            self.wal.sync()?;
        }

        tx.closed = true;
        Ok(())
    }

    /// Logs ROLLBACK, fsyncs the WAL, and closes the transaction.
    ///
    /// Rollback does NOT undo mutations already written to data pages; reads
    /// in this process keep seeing the dirty state. The next open discards it
    /// because recovery rebuilds every table from committed WAL records only.
    pub fn rollback(&self, tx: &mut FileTx<'_>) -> Result<()> {
        self.validate_tx(tx)?;

        if !tx.read_only && tx.id != 0 {
            self.wal.append_rollback(tx.id)?;
            self.wal.sync()?;
        }

        tx.closed = true;
        Ok(())
    }

    fn validate_tx(&self, tx: &FileTx<'_>) -> Result<()> {
        if !std::ptr::eq(tx.eng, self) {
            return Err(StorageError::TxTypeInvalid);
        }
        if tx.closed {
            return Err(StorageError::TxClosed);
        }
        Ok(())
    }

    /// Creates a B-tree index over a single integer column and populates it
    /// from the table's current contents. The column is matched
    /// case-insensitively; the stored name is the schema's spelling.
    pub fn create_index(&self, index_name: &str, table: &str, column: &str) -> Result<()> {
        if self.indexes.read().names.contains_key(index_name) {
            return Err(StorageError::IndexExists(index_name.to_string()));
        }

        let cols = self.table_schema(table)?;
        let (col_pos, col) = cols
            .iter()
            .enumerate()
            .find(|(_, c)| c.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| {
                StorageError::ColumnMissing(column.to_string(), table.to_string())
            })?;
        if col.ty != DataType::Int {
            return Err(StorageError::IndexTypeUnsupported(col.name.clone()));
        }

        let handle = self.index_manager.open_or_create(table, &col.name)?;
        {
            let mut idx = handle.lock();
            idx.reset()?;
            for (rid, row) in self.scan_rids(table)? {
                if let Value::Int(key) = &row[col_pos] {
                    idx.insert(*key, rid)?;
                }
            }
        }

        let mut reg = self.indexes.write();
        reg.names.insert(
            index_name.to_string(),
            (table.to_string(), col.name.clone()),
        );
        reg.by_table
            .entry(table.to_string())
            .or_default()
            .insert(col.name.clone(), handle);

        plinth_debug_log!(
            "[FileEngine::create_index] {index_name} on {table}({})",
            col.name
        );
        Ok(())
    }

    /// Runs an equality lookup through the named index.
    pub fn index_search(&self, index_name: &str, key: i64) -> Result<Vec<crate::Rid>> {
        let (table, column) = {
            let reg = self.indexes.read();
            reg.names
                .get(index_name)
                .cloned()
                .ok_or_else(|| StorageError::IndexMissing(index_name.to_string()))?
        };
        let handle = self.index_manager.open_or_create(&table, &column)?;
        let rids = handle.lock().search(key)?;
        Ok(rids)
    }

    /// Rids have no stability across rewriting mutations, so any operation
    /// that moves rows (ReplaceAll, DeleteWhere, UpdateWhere) rebuilds every
    /// open index on the table from its current pages.
    pub(crate) fn rebuild_indexes_for(&self, table: &str) -> Result<()> {
        let handles: Vec<(String, Arc<Mutex<FileIndex>>)> = {
            let reg = self.indexes.read();
            match reg.by_table.get(table) {
                Some(by_col) => by_col
                    .iter()
                    .map(|(col, handle)| (col.clone(), handle.clone()))
                    .collect(),
                None => return Ok(()),
            }
        };
        if handles.is_empty() {
            return Ok(());
        }

        let cols = self.table_schema(table)?;
        let rows = self.scan_rids(table)?;
        for (col_name, handle) in handles {
            let Some(pos) = cols.iter().position(|c| c.name == col_name) else {
                continue;
            };
            let mut idx = handle.lock();
            idx.reset()?;
            for (rid, row) in &rows {
                if let Value::Int(key) = &row[pos] {
                    idx.insert(*key, *rid)?;
                }
            }
        }
        plinth_debug_log!("[FileEngine::rebuild_indexes_for] rebuilt indexes on {table}");
        Ok(())
    }

    fn open_existing_indexes(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(INDEX_FILE_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // File naming convention is <table>_<column>.idx; the column
            // name cannot itself contain an underscore.
            let Some((table, column)) = stem.rsplit_once('_') else {
                continue;
            };

            let handle = self.index_manager.open_or_create(table, column)?;
            let mut reg = self.indexes.write();
            reg.names
                .insert(stem.to_string(), (table.to_string(), column.to_string()));
            reg.by_table
                .entry(table.to_string())
                .or_default()
                .insert(column.to_string(), handle);
            plinth_debug_log!("[FileEngine::open] re-opened index {stem}");
        }
        Ok(())
    }
}

/// One transaction against a `FileEngine`. Write transactions have exclusive
/// logical access to every table until they close; mutations go to the WAL
/// first and to table pages immediately after.
pub struct FileTx<'e> {
    pub(crate) eng: &'e FileEngine,
    pub(crate) read_only: bool,
    pub(crate) closed: bool,
    pub(crate) id: TxId,
}

impl FileTx<'_> {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::TxClosed);
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(StorageError::ReadOnlyViolation);
        }
        Ok(())
    }

    /// Used by recovery to rewrite tables without logging: id 0 means "do
    /// not log".
    pub(crate) fn internal_rewrite(eng: &FileEngine) -> FileTx<'_> {
        FileTx {
            eng,
            read_only: false,
            closed: false,
            id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;
    use tempfile::tempdir;

    fn cols() -> Vec<Column> {
        vec![Column::new("id", DataType::Int)]
    }

    #[test]
    fn create_table_twice_fails() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();
        eng.create_table("t", &cols()).unwrap();
        assert!(matches!(
            eng.create_table("t", &cols()),
            Err(StorageError::TableExists(_))
        ));
    }

    #[test]
    fn list_tables_is_sorted() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();
        eng.create_table("zebra", &cols()).unwrap();
        eng.create_table("apple", &cols()).unwrap();
        assert_eq!(eng.list_tables().unwrap(), vec!["apple", "zebra"]);
    }

    #[test]
    fn schema_of_missing_table_fails() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();
        assert!(matches!(
            eng.table_schema("nope"),
            Err(StorageError::TableMissing(_))
        ));
    }

    #[test]
    fn write_tx_ids_are_monotonic_and_read_only_is_zero() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();

        let mut tx1 = eng.begin(false).unwrap();
        assert_eq!(tx1.id(), 1);
        eng.commit(&mut tx1).unwrap();

        let ro = eng.begin(true).unwrap();
        assert_eq!(ro.id(), 0);

        let mut tx2 = eng.begin(false).unwrap();
        assert_eq!(tx2.id(), 2);
        eng.rollback(&mut tx2).unwrap();
    }

    #[test]
    fn closed_tx_cannot_be_committed_again() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();
        let mut tx = eng.begin(false).unwrap();
        eng.commit(&mut tx).unwrap();
        assert!(matches!(eng.commit(&mut tx), Err(StorageError::TxClosed)));
        assert!(matches!(eng.rollback(&mut tx), Err(StorageError::TxClosed)));
    }

    #[test]
    fn tx_from_another_engine_is_rejected() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let eng_a = FileEngine::open(dir_a.path()).unwrap();
        let eng_b = FileEngine::open(dir_b.path()).unwrap();

        let mut tx = eng_a.begin(false).unwrap();
        assert!(matches!(
            eng_b.commit(&mut tx),
            Err(StorageError::TxTypeInvalid)
        ));
        eng_a.rollback(&mut tx).unwrap();
    }

    #[test]
    fn index_on_non_integer_column_is_rejected() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();
        eng.create_table(
            "t",
            &[
                Column::new("id", DataType::Int),
                Column::new("name", DataType::String),
            ],
        )
        .unwrap();

        assert!(matches!(
            eng.create_index("idx_name", "t", "name"),
            Err(StorageError::IndexTypeUnsupported(_))
        ));
        assert!(matches!(
            eng.create_index("idx_missing", "t", "ghost"),
            Err(StorageError::ColumnMissing(..))
        ));
    }

    #[test]
    fn duplicate_index_name_is_rejected() {
        let dir = tempdir().unwrap();
        let eng = FileEngine::open(dir.path()).unwrap();
        eng.create_table("t", &cols()).unwrap();
        eng.create_index("idx_id", "t", "id").unwrap();
        assert!(matches!(
            eng.create_index("idx_id", "t", "id"),
            Err(StorageError::IndexExists(_))
        ));
    }
}
