//! The in-memory engine variant: same surface as the file engine, no
//! durability. A transaction clones the whole table map on begin and swaps
//! it back on commit, so readers may coexist with one writer and rollback is
//! simply dropping the clone. Indexes still live on disk through the shared
//! index manager.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::btree::{FileIndex, IndexManager};
use crate::error::{Result, StorageError};
use crate::value::{Column, DataType, Row, Value};
use crate::Rid;

#[derive(Clone)]
struct MemTable {
    cols: Vec<Column>,
    rows: Vec<Row>,
}

struct MemIndex {
    table: String,
    column: String,
    handle: Arc<Mutex<FileIndex>>,
}

pub struct MemEngine {
    tables: RwLock<HashMap<String, MemTable>>,
    indexes: RwLock<HashMap<String, MemIndex>>,
    index_manager: IndexManager,
}

impl MemEngine {
    /// `dir` only hosts index files; table data never leaves memory.
    pub fn new(dir: impl AsRef<Path>) -> MemEngine {
        MemEngine {
            tables: RwLock::default(),
            indexes: RwLock::default(),
            index_manager: IndexManager::new(dir.as_ref()),
        }
    }

    pub fn create_table(&self, name: &str, cols: &[Column]) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        tables.insert(
            name.to_string(),
            MemTable {
                cols: cols.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn table_schema(&self, name: &str) -> Result<Vec<Column>> {
        let tables = self.tables.read();
        let t = tables
            .get(name)
            .ok_or_else(|| StorageError::TableMissing(name.to_string()))?;
        Ok(t.cols.clone())
    }

    pub fn create_index(&self, index_name: &str, table: &str, column: &str) -> Result<()> {
        if self.indexes.read().contains_key(index_name) {
            return Err(StorageError::IndexExists(index_name.to_string()));
        }

        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableMissing(table.to_string()))?;

        let (col_pos, col) = t
            .cols
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
            for (i, row) in t.rows.iter().enumerate() {
                if let Value::Int(key) = &row[col_pos] {
                    idx.insert(
                        *key,
                        Rid {
                            page_id: 0,
                            slot_id: i as u16,
                        },
                    )?;
                }
            }
        }

        self.indexes.write().insert(
            index_name.to_string(),
            MemIndex {
                table: table.to_string(),
                column: col.name.clone(),
                handle,
            },
        );
        Ok(())
    }

    pub fn index_search(&self, index_name: &str, key: i64) -> Result<Vec<Rid>> {
        let indexes = self.indexes.read();
        let idx = indexes
            .get(index_name)
            .ok_or_else(|| StorageError::IndexMissing(index_name.to_string()))?;
        let rids = idx.handle.lock().search(key)?;
        Ok(rids)
    }

    /// Starts a transaction over a deep copy of the current tables.
    pub fn begin(&self, read_only: bool) -> Result<MemTx<'_>> {
        Ok(MemTx {
            eng: self,
            read_only,
            closed: false,
            tables: self.tables.read().clone(),
        })
    }

    /// Publishes the transaction's view; read-only transactions just close.
    pub fn commit(&self, tx: &mut MemTx<'_>) -> Result<()> {
        self.validate_tx(tx)?;
        if !tx.read_only {
            *self.tables.write() = std::mem::take(&mut tx.tables);
        }
        tx.closed = true;
        Ok(())
    }

    /// Discards the transaction's view.
    pub fn rollback(&self, tx: &mut MemTx<'_>) -> Result<()> {
        self.validate_tx(tx)?;
        tx.closed = true;
        Ok(())
    }

    fn validate_tx(&self, tx: &MemTx<'_>) -> Result<()> {
        if !std::ptr::eq(tx.eng, self) {
            return Err(StorageError::TxTypeInvalid);
        }
        if tx.closed {
            return Err(StorageError::TxClosed);
        }
        Ok(())
    }
}

pub struct MemTx<'e> {
    eng: &'e MemEngine,
    read_only: bool,
    closed: bool,
    tables: HashMap<String, MemTable>,
}

impl MemTx<'_> {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::TxClosed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(StorageError::ReadOnlyViolation);
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableMissing(name.to_string()))
    }

    pub fn insert(&mut self, table: &str, row: &Row) -> Result<()> {
        self.check_writable()?;
        let t = self.table_mut(table)?;
        validate_row(&t.cols, row)?;

        let new_row_index = t.rows.len();
        t.rows.push(row.clone());
        let cols = t.cols.clone();

        let indexes = self.eng.indexes.read();
        for idx in indexes.values() {
            if idx.table != table {
                continue;
            }
            let Some(pos) = cols
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(&idx.column))
            else {
                continue;
            };
            if let Value::Int(key) = &row[pos] {
                idx.handle.lock().insert(
                    *key,
                    Rid {
                        page_id: 0,
                        slot_id: new_row_index as u16,
                    },
                )?;
            }
        }

        Ok(())
    }

    /// Returns deep copies; callers may mutate them freely.
    pub fn scan(&self, table: &str) -> Result<(Vec<String>, Vec<Row>)> {
        self.check_open()?;
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| StorageError::TableMissing(table.to_string()))?;
        let names = t.cols.iter().map(|c| c.name.clone()).collect();
        Ok((names, t.rows.clone()))
    }

    pub fn replace_all(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        self.check_writable()?;
        let t = self.table_mut(table)?;
        for row in rows {
            validate_row(&t.cols, row)?;
        }
        t.rows = rows.to_vec();
        Ok(())
    }

    pub fn delete_where<P>(&mut self, table: &str, mut pred: P) -> Result<()>
    where
        P: FnMut(&Row) -> Result<bool>,
    {
        self.check_writable()?;
        let t = self.table_mut(table)?;

        let mut kept = Vec::with_capacity(t.rows.len());
        for row in t.rows.drain(..) {
            if pred(&row)? {
                continue;
            }
            kept.push(row);
        }
        t.rows = kept;
        Ok(())
    }

    pub fn update_where<P, U>(&mut self, table: &str, mut pred: P, mut updater: U) -> Result<()>
    where
        P: FnMut(&Row) -> Result<bool>,
        U: FnMut(Row) -> Result<Row>,
    {
        self.check_writable()?;
        let t = self.table_mut(table)?;
        let cols = t.cols.clone();

        for row in t.rows.iter_mut() {
            if !pred(row)? {
                continue;
            }
            let new_row = updater(row.clone())?;
            validate_row(&cols, &new_row)?;
            *row = new_row;
        }
        Ok(())
    }
}

fn validate_row(cols: &[Column], row: &Row) -> Result<()> {
    if row.len() != cols.len() {
        return Err(StorageError::SchemaMismatch(format!(
            "row has {} values, expected {}",
            row.len(),
            cols.len()
        )));
    }
    for (col, value) in cols.iter().zip(row) {
        if !value.is_null() && value.data_type() != col.ty {
            return Err(StorageError::SchemaMismatch(format!(
                "column {:?} expects {}, got {}",
                col.name,
                col.ty,
                value.data_type()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user_cols() -> Vec<Column> {
        vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::String),
        ]
    }

    fn row(id: i64, name: &str) -> Row {
        vec![Value::Int(id), Value::String(name.to_string())]
    }

    #[test]
    fn insert_is_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let eng = MemEngine::new(dir.path());
        eng.create_table("users", &user_cols()).unwrap();

        let mut tx = eng.begin(false).unwrap();
        tx.insert("users", &row(1, "Alice")).unwrap();

        let reader = eng.begin(true).unwrap();
        assert!(reader.scan("users").unwrap().1.is_empty());

        eng.commit(&mut tx).unwrap();
        let reader = eng.begin(true).unwrap();
        assert_eq!(reader.scan("users").unwrap().1, vec![row(1, "Alice")]);
    }

    #[test]
    fn rollback_discards_the_view() {
        let dir = tempdir().unwrap();
        let eng = MemEngine::new(dir.path());
        eng.create_table("users", &user_cols()).unwrap();

        let mut tx = eng.begin(false).unwrap();
        tx.insert("users", &row(1, "Alice")).unwrap();
        eng.rollback(&mut tx).unwrap();

        let reader = eng.begin(true).unwrap();
        assert!(reader.scan("users").unwrap().1.is_empty());
    }

    #[test]
    fn type_checking_matches_the_file_engine() {
        let dir = tempdir().unwrap();
        let eng = MemEngine::new(dir.path());
        eng.create_table("users", &user_cols()).unwrap();

        let mut tx = eng.begin(false).unwrap();
        let wrong = vec![Value::String("x".into()), Value::Int(1)];
        assert!(matches!(
            tx.insert("users", &wrong),
            Err(StorageError::SchemaMismatch(_))
        ));
        tx.insert("users", &vec![Value::Int(1), Value::Null]).unwrap();
        eng.commit(&mut tx).unwrap();
    }

    #[test]
    fn create_index_and_lookup() {
        let dir = tempdir().unwrap();
        let eng = MemEngine::new(dir.path());
        eng.create_table("users", &user_cols()).unwrap();

        let mut tx = eng.begin(false).unwrap();
        tx.insert("users", &row(10, "a")).unwrap();
        tx.insert("users", &row(20, "b")).unwrap();
        eng.commit(&mut tx).unwrap();

        eng.create_index("idx_id", "users", "id").unwrap();
        assert_eq!(
            eng.index_search("idx_id", 10).unwrap(),
            vec![Rid { page_id: 0, slot_id: 0 }]
        );
        assert_eq!(
            eng.index_search("idx_id", 20).unwrap(),
            vec![Rid { page_id: 0, slot_id: 1 }]
        );

        assert!(matches!(
            eng.create_index("idx_id", "users", "id"),
            Err(StorageError::IndexExists(_))
        ));
        assert!(matches!(
            eng.create_index("idx_name", "users", "name"),
            Err(StorageError::IndexTypeUnsupported(_))
        ));
    }

    #[test]
    fn update_and_delete_where() {
        let dir = tempdir().unwrap();
        let eng = MemEngine::new(dir.path());
        eng.create_table("users", &user_cols()).unwrap();

        let mut tx = eng.begin(false).unwrap();
        for i in 1..=3 {
            tx.insert("users", &row(i, "x")).unwrap();
        }
        tx.update_where(
            "users",
            |r| Ok(r[0] == Value::Int(2)),
            |mut r| {
                r[1] = Value::String("two".into());
                Ok(r)
            },
        )
        .unwrap();
        tx.delete_where("users", |r| Ok(r[0] == Value::Int(3))).unwrap();
        eng.commit(&mut tx).unwrap();

        let reader = eng.begin(true).unwrap();
        let (_, rows) = reader.scan("users").unwrap();
        assert_eq!(rows, vec![row(1, "x"), row(2, "two")]);
    }
}
