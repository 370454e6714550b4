//! Row operations for `FileTx`: Insert, Scan, ReplaceAll, DeleteWhere,
//! UpdateWhere. Table files are opened per operation, mutated, and closed;
//! every mutation logs its WAL record before touching a page.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use crate::engine::{FileEngine, FileTx};
use crate::error::{Result, StorageError};
use crate::page::HeapPage;
use crate::value::{
    decode_row, encode_row, read_table_header, table_header_len, write_table_header, Column, Row,
    Value,
};
use crate::{plinth_debug_log, PageId, Rid, SlotId, PAGE_SIZE};

/// One table file opened for a single operation: schema already read, page
/// region located and checked.
struct TableFile {
    file: File,
    cols: Vec<Column>,
    header_len: u64,
    num_pages: u32,
}

impl TableFile {
    fn open(eng: &FileEngine, table: &str, writable: bool) -> Result<TableFile> {
        let file = if writable {
            eng.open_table_for_write(table)?
        } else {
            eng.open_table_for_read(table)?
        };

        let cols = read_table_header(&mut BufReader::new(&file))?;
        let header_len = table_header_len(&cols);

        let size = file.metadata()?.len();
        if size < header_len {
            return Err(StorageError::corruption(format!(
                "table {table:?} is shorter than its header"
            )));
        }
        let data_bytes = size - header_len;
        if data_bytes % PAGE_SIZE as u64 != 0 {
            return Err(StorageError::corruption(format!(
                "table {table:?} data region is not a multiple of the page size"
            )));
        }

        Ok(TableFile {
            file,
            cols,
            header_len,
            num_pages: (data_bytes / PAGE_SIZE as u64) as u32,
        })
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        self.header_len + page_id as u64 * PAGE_SIZE as u64
    }

    fn read_page(&mut self, page_id: PageId) -> Result<HeapPage> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(self.page_offset(page_id)))?;
        self.file.read_exact(&mut buf)?;
        HeapPage::from_bytes(&buf)
    }

    fn write_page(&mut self, page: &HeapPage) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(self.page_offset(page.page_id())))?;
        self.file.write_all(page.as_bytes())?;
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

impl FileTx<'_> {
    /// Appends one row: WAL first, then into the last page of the table, or
    /// a fresh page when it does not fit. Open indexes on the table receive
    /// the new row's rid for every non-null indexed column.
    pub fn insert(&mut self, table: &str, row: &Row) -> Result<()> {
        self.check_writable()?;

        let mut tf = TableFile::open(self.eng, table, true)?;
        validate_row(&tf.cols, row)?;

        if self.id != 0 {
            self.eng.wal.append_insert(self.id, table, row)?;
        }

        let row_bytes = encode_row(row);
        let (page_id, slot_id) = place_row(&mut tf, &row_bytes)?;
        plinth_debug_log!(
            "[FileTx::insert] {table}: rid ({page_id}, {slot_id}), {} bytes",
            row_bytes.len()
        );

        let reg = self.eng.indexes.read();
        if let Some(by_col) = reg.by_table.get(table) {
            for (pos, col) in tf.cols.iter().enumerate() {
                let Some(handle) = by_col.get(&col.name) else {
                    continue;
                };
                if let Value::Int(key) = &row[pos] {
                    handle.lock().insert(*key, Rid { page_id, slot_id })?;
                }
            }
        }

        Ok(())
    }

    /// Reads every live row, in `(page_id ascending, slot_id ascending)`
    /// order. Returned rows are owned copies; mutating them does not touch
    /// storage. Allowed in read-only transactions.
    pub fn scan(&self, table: &str) -> Result<(Vec<String>, Vec<Row>)> {
        self.check_open()?;

        let mut tf = TableFile::open(self.eng, table, false)?;
        let names = tf.cols.iter().map(|c| c.name.clone()).collect();

        let mut rows = Vec::new();
        for page_id in 0..tf.num_pages {
            let page = tf.read_page(page_id)?;
            for (_, row) in page.rows(tf.cols.len())? {
                rows.push(row);
            }
        }

        Ok((names, rows))
    }

    /// Replaces the table's entire contents: one REPLACEALL record, then the
    /// file is truncated to its header and refilled greedily page by page.
    pub fn replace_all(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        self.check_writable()?;

        if self.id != 0 {
            self.eng.wal.append_replace_all(self.id, table, rows)?;
        }

        let mut tf = TableFile::open(self.eng, table, true)?;
        for row in rows {
            validate_row(&tf.cols, row)?;
        }

        tf.file.set_len(0)?;
        tf.file.seek(SeekFrom::Start(0))?;
        write_table_header(&mut tf.file, &tf.cols)?;
        tf.num_pages = 0;

        let mut page_id: PageId = 0;
        let mut page = HeapPage::new(page_id);
        for row in rows {
            let bytes = encode_row(row);
            match page.insert_row(&bytes) {
                Ok(_) => {}
                Err(StorageError::PageFull) => {
                    tf.write_page(&page)?;
                    page_id += 1;
                    page = HeapPage::new(page_id);
                    page.insert_row(&bytes)?;
                }
                Err(e) => return Err(e),
            }
        }
        if !rows.is_empty() {
            tf.write_page(&page)?;
        }
        drop(tf);

        self.eng.rebuild_indexes_for(table)?;
        Ok(())
    }

    /// Tombstones every row the predicate matches, logging each pre-image
    /// before the slot dies. Pages are written back one at a time.
    pub fn delete_where<P>(&mut self, table: &str, mut pred: P) -> Result<()>
    where
        P: FnMut(&Row) -> Result<bool>,
    {
        self.check_writable()?;

        let mut tf = TableFile::open(self.eng, table, true)?;
        if tf.num_pages == 0 {
            return Ok(());
        }

        for page_id in 0..tf.num_pages {
            let mut page = tf.read_page(page_id)?;
            let mut slot: SlotId = 0;
            // delete_slot may trim trailing tombstones, so re-check the
            // directory size on every step.
            while slot < page.num_slots() {
                let Some(bytes) = page.record_bytes(slot)?.map(<[u8]>::to_vec) else {
                    slot += 1;
                    continue;
                };
                let row = decode_row(&mut bytes.as_slice(), tf.cols.len())?;
                if pred(&row)? {
                    if self.id != 0 {
                        self.eng.wal.append_delete(self.id, table, &row)?;
                    }
                    page.delete_slot(slot);
                }
                slot += 1;
            }
            tf.write_page(&page)?;
        }
        drop(tf);

        self.eng.rebuild_indexes_for(table)?;
        Ok(())
    }

    /// Rewrites every matching row. When the new encoding fits the old slot
    /// the row is updated in place (one UPDATE record); otherwise the old
    /// slot is tombstoned (DELETE record) and the new row re-enters through
    /// the normal insert path, which logs its own INSERT.
    pub fn update_where<P, U>(&mut self, table: &str, mut pred: P, mut updater: U) -> Result<()>
    where
        P: FnMut(&Row) -> Result<bool>,
        U: FnMut(Row) -> Result<Row>,
    {
        self.check_writable()?;

        let mut tf = TableFile::open(self.eng, table, true)?;
        if tf.num_pages == 0 {
            return Ok(());
        }

        let mut deferred: Vec<Row> = Vec::new();
        for page_id in 0..tf.num_pages {
            let mut page = tf.read_page(page_id)?;
            let mut slot: SlotId = 0;
            while slot < page.num_slots() {
                let Some(bytes) = page.record_bytes(slot)?.map(<[u8]>::to_vec) else {
                    slot += 1;
                    continue;
                };
                let old_row = decode_row(&mut bytes.as_slice(), tf.cols.len())?;
                if !pred(&old_row)? {
                    slot += 1;
                    continue;
                }

                // The updater works on a copy so the WAL keeps the original.
                let new_row = updater(old_row.clone())?;
                validate_row(&tf.cols, &new_row)?;
                let new_bytes = encode_row(&new_row);

                if new_bytes.len() <= bytes.len() {
                    if self.id != 0 {
                        self.eng.wal.append_update(self.id, table, &old_row, &new_row)?;
                    }
                    page.overwrite_slot(slot, &new_bytes)?;
                } else {
                    if self.id != 0 {
                        self.eng.wal.append_delete(self.id, table, &old_row)?;
                    }
                    page.delete_slot(slot);
                    deferred.push(new_row);
                }
                slot += 1;
            }
            tf.write_page(&page)?;
        }
        drop(tf);

        for row in &deferred {
            self.insert(table, row)?;
        }

        self.eng.rebuild_indexes_for(table)?;
        Ok(())
    }
}

fn place_row(tf: &mut TableFile, row_bytes: &[u8]) -> Result<(PageId, SlotId)> {
    if tf.num_pages == 0 {
        let mut page = HeapPage::new(0);
        let slot = page.insert_row(row_bytes)?;
        tf.write_page(&page)?;
        tf.num_pages = 1;
        return Ok((0, slot));
    }

    let last = tf.num_pages - 1;
    let mut page = tf.read_page(last)?;
    match page.insert_row(row_bytes) {
        Ok(slot) => {
            tf.write_page(&page)?;
            Ok((last, slot))
        }
        Err(StorageError::PageFull) => {
            let fresh_id = tf.num_pages;
            let mut fresh = HeapPage::new(fresh_id);
            let slot = fresh.insert_row(row_bytes)?;
            tf.write_page(&fresh)?;
            tf.num_pages += 1;
            Ok((fresh_id, slot))
        }
        Err(e) => Err(e),
    }
}

impl FileEngine {
    /// Live rows with their physical positions, used to build and rebuild
    /// indexes.
    pub(crate) fn scan_rids(&self, table: &str) -> Result<Vec<(Rid, Row)>> {
        let mut tf = TableFile::open(self, table, false)?;
        let mut out = Vec::new();
        for page_id in 0..tf.num_pages {
            let page = tf.read_page(page_id)?;
            for (slot_id, row) in page.rows(tf.cols.len())? {
                out.push((Rid { page_id, slot_id }, row));
            }
        }
        Ok(out)
    }
}
