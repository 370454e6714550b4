//! The on-disk B-tree: open/create, sorted insert with leaf splits,
//! equality search. Deletes are not implemented; an internal node running
//! out of separator room fails with `IndexInternalFull`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, StorageError};
use crate::{plinth_debug_log, PageId, Rid, PAGE_SIZE};

use super::page::{
    internal_read_all, internal_write_all, leaf_key, leaf_read_all, leaf_rid, leaf_set_entry,
    leaf_write_all, read_page_header, write_page_header, BtreePageHeader, BTREE_MAGIC,
    FILE_HEADER_SIZE, LEAF_ENTRY_SIZE, MAX_INTERNAL_KEYS, MAX_LEAF_KEYS, PAGE_HEADER_SIZE,
    PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
};
use super::Key;

/// One open index file. File header: "BTREE1", rootPageId (u32), pageCount
/// (u32); pages follow at `FILE_HEADER_SIZE + id * PAGE_SIZE`.
#[derive(Debug)]
pub struct FileIndex {
    file: File,
    table: String,
    column: String,
    root_page_id: PageId,
    page_count: u32,
}

impl FileIndex {
    /// Opens an existing index file or creates a fresh one containing a
    /// single empty leaf root.
    pub fn open(path: impl AsRef<Path>, table: &str, column: &str) -> Result<FileIndex> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let mut idx = FileIndex {
            file,
            table: table.to_string(),
            column: column.to_string(),
            root_page_id: 0,
            page_count: 1,
        };

        if idx.file.metadata()?.len() == 0 {
            idx.init_empty()?;
            plinth_debug_log!(
                "[FileIndex::open] created {}.{} at {:?}",
                idx.table,
                idx.column,
                path.as_ref()
            );
        } else {
            idx.read_file_header()?;
        }

        Ok(idx)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Drops every entry: the file becomes a single empty leaf root again.
    /// Used when a table rewrite invalidates all rids.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.init_empty()
    }

    fn init_empty(&mut self) -> Result<()> {
        self.root_page_id = 0;
        self.page_count = 1;
        self.write_file_header()?;

        let mut root = vec![0u8; PAGE_SIZE];
        write_page_header(
            &mut root,
            &BtreePageHeader {
                page_type: PAGE_TYPE_LEAF,
                parent_page_id: 0,
                num_keys: 0,
            },
        );
        self.write_page(0, &root)
    }

    /// Adds a `key -> rid` mapping. Duplicate keys are permitted and keep
    /// insertion order.
    pub fn insert(&mut self, key: Key, rid: Rid) -> Result<()> {
        let (leaf_id, mut leaf, path) = self.find_leaf_with_path(key)?;
        let h = read_page_header(&leaf);
        let n = h.num_keys;

        if (n as usize) < MAX_LEAF_KEYS {
            // Room in the leaf: shift and insert after any equal keys so
            // duplicates stay stable.
            let mut pos = n;
            for i in 0..n {
                if key < leaf_key(&leaf, i) {
                    pos = i;
                    break;
                }
            }

            if pos < n {
                let start = PAGE_HEADER_SIZE + pos as usize * LEAF_ENTRY_SIZE;
                let len = (n - pos) as usize * LEAF_ENTRY_SIZE;
                leaf.copy_within(start..start + len, start + LEAF_ENTRY_SIZE);
            }
            leaf_set_entry(&mut leaf, pos, key, rid);
            write_page_header(
                &mut leaf,
                &BtreePageHeader {
                    page_type: PAGE_TYPE_LEAF,
                    parent_page_id: h.parent_page_id,
                    num_keys: n + 1,
                },
            );
            return self.write_page(leaf_id, &leaf);
        }

        // Leaf is full: merge the new entry into the sorted list, split at
        // the midpoint, and push the right half into a fresh leaf.
        let (mut keys, mut rids) = leaf_read_all(&leaf, n);
        let mut pos = keys.len();
        for (i, k) in keys.iter().enumerate() {
            if key < *k {
                pos = i;
                break;
            }
        }
        keys.insert(pos, key);
        rids.insert(pos, rid);

        let split = keys.len() / 2;
        leaf_write_all(&mut leaf, &keys[..split], &rids[..split]);
        self.write_page(leaf_id, &leaf)?;

        let (right_id, mut right) = self.alloc_page()?;
        leaf_write_all(&mut right, &keys[split..], &rids[split..]);
        self.write_page(right_id, &right)?;

        let separator = keys[split];
        plinth_debug_log!(
            "[FileIndex::insert] split leaf {leaf_id} -> ({leaf_id}, {right_id}), separator {separator}"
        );
        self.insert_into_parent(leaf_id, right_id, separator, &path)
    }

    /// Equality lookup: all rids stored under `key`, in insertion order.
    pub fn search(&mut self, key: Key) -> Result<Vec<Rid>> {
        let (_, leaf) = self.find_leaf(key)?;
        let h = read_page_header(&leaf);
        let n = h.num_keys;

        // Binary search for the first entry >= key.
        let (mut lo, mut hi) = (0u32, n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if key > leaf_key(&leaf, mid) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let mut rids = Vec::new();
        for i in lo..n {
            if leaf_key(&leaf, i) != key {
                break;
            }
            rids.push(leaf_rid(&leaf, i));
        }
        Ok(rids)
    }

    fn find_leaf(&mut self, key: Key) -> Result<(PageId, Vec<u8>)> {
        let (id, page, _) = self.find_leaf_with_path(key)?;
        Ok((id, page))
    }

    /// Walks from the root to the leaf `key` belongs to, recording the page
    /// ids along the way (the leaf is last).
    fn find_leaf_with_path(&mut self, key: Key) -> Result<(PageId, Vec<u8>, Vec<PageId>)> {
        let mut page_id = self.root_page_id;
        let mut path = Vec::new();

        loop {
            path.push(page_id);
            let page = self.read_page(page_id)?;
            let h = read_page_header(&page);

            match h.page_type {
                PAGE_TYPE_LEAF => return Ok((page_id, page, path)),
                PAGE_TYPE_INTERNAL => {
                    if h.num_keys == 0 {
                        return Err(StorageError::corruption(format!(
                            "empty internal index node at page {page_id}"
                        )));
                    }
                    let (children, keys) = internal_read_all(&page, h.num_keys)?;

                    // Smallest i with key < keys[i]; rightmost child when
                    // key is >= every separator.
                    let mut child_idx = keys.len();
                    for (i, k) in keys.iter().enumerate() {
                        if key < *k {
                            child_idx = i;
                            break;
                        }
                    }
                    page_id = children[child_idx];
                }
                other => {
                    return Err(StorageError::corruption(format!(
                        "unknown index page type {other} at page {page_id}"
                    )));
                }
            }
        }
    }

    /// Hooks a freshly split right sibling into the tree. If the split leaf
    /// was the root, a new internal root is allocated and the file header's
    /// root pointer moves to it.
    fn insert_into_parent(
        &mut self,
        left_id: PageId,
        right_id: PageId,
        separator: Key,
        path: &[PageId],
    ) -> Result<()> {
        if path.len() == 1 {
            let (root_id, mut root) = self.alloc_page()?;
            internal_write_all(&mut root, 0, &[left_id, right_id], &[separator])?;
            self.write_page(root_id, &root)?;

            self.root_page_id = root_id;
            return self.write_file_header();
        }

        let parent_id = path[path.len() - 2];
        let mut parent = self.read_page(parent_id)?;
        let hp = read_page_header(&parent);
        if hp.page_type != PAGE_TYPE_INTERNAL {
            return Err(StorageError::corruption(format!(
                "parent of a split leaf is not internal (page {parent_id})"
            )));
        }

        let (mut children, mut keys) = internal_read_all(&parent, hp.num_keys)?;
        let pos = children
            .iter()
            .position(|c| *c == left_id)
            .ok_or_else(|| {
                StorageError::corruption(format!(
                    "parent {parent_id} does not reference split child {left_id}"
                ))
            })?;

        if hp.num_keys as usize >= MAX_INTERNAL_KEYS {
            return Err(StorageError::IndexInternalFull);
        }

        children.insert(pos + 1, right_id);
        keys.insert(pos, separator);
        internal_write_all(&mut parent, hp.parent_page_id, &children, &keys)?;
        self.write_page(parent_id, &parent)
    }

    fn alloc_page(&mut self) -> Result<(PageId, Vec<u8>)> {
        let page_id = self.page_count;
        self.page_count += 1;

        let page = vec![0u8; PAGE_SIZE];
        self.write_page(page_id, &page)?;
        self.write_file_header()?;
        Ok((page_id, page))
    }

    fn page_offset(page_id: PageId) -> u64 {
        FILE_HEADER_SIZE as u64 + page_id as u64 * PAGE_SIZE as u64
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Vec<u8>> {
        let mut page = vec![0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        self.file.read_exact(&mut page)?;
        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &[u8]) -> Result<()> {
        if page.len() != PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "index page {page_id} has wrong size {}",
                page.len()
            )));
        }
        self.file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        self.file.write_all(page)?;
        Ok(())
    }

    fn write_file_header(&mut self) -> Result<()> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[..BTREE_MAGIC.len()].copy_from_slice(BTREE_MAGIC);
        buf[6..10].copy_from_slice(&self.root_page_id.to_le_bytes());
        buf[10..14].copy_from_slice(&self.page_count.to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn read_file_header(&mut self) -> Result<()> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        if &buf[..BTREE_MAGIC.len()] != BTREE_MAGIC {
            return Err(StorageError::corruption("invalid index file magic"));
        }
        self.root_page_id = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        self.page_count = u32::from_le_bytes(buf[10..14].try_into().unwrap());
        Ok(())
    }
}
