//! The slotted heap page.
//!
//! On-disk layout of one 4096-byte page:
//!
//!   offset 0..4    magic "GPG1"
//!   offset 4..8    pageID (u32)
//!   offset 8       pageType (1 = heap)
//!   offset 9       reserved
//!   offset 10..12  numSlots (u16)
//!   offset 12..14  freeStart (u16), next byte available for row data
//!   offset 14..16  reserved
//!   offset 16..freeStart   row area, growing upward
//!   offset PAGE_SIZE - 4*numSlots..PAGE_SIZE   slot directory, growing down
//!
//! Each slot is `(offset: u16, length: u16)`; slot i sits at
//! `PAGE_SIZE - 4*(i+1)`. A tombstone is `(0xFFFF, 0)`.

use crate::error::{Result, StorageError};
use crate::value::{decode_row, Row};
use crate::{PageId, SlotId, PAGE_SIZE};

pub const PAGE_MAGIC: &[u8; 4] = b"GPG1";
pub const PAGE_TYPE_HEAP: u8 = 1;
pub const PAGE_HEADER_SIZE: usize = 16;
pub const SLOT_SIZE: usize = 4;
pub const TOMBSTONE_OFFSET: u16 = 0xFFFF;

/// The most row bytes a single record may occupy: one slot on an otherwise
/// empty page.
pub const MAX_RECORD_LEN: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE;

#[derive(Debug)]
pub struct HeapPage {
    data: [u8; PAGE_SIZE],
}

impl HeapPage {
    pub fn new(page_id: PageId) -> Self {
        let mut page = HeapPage {
            data: [0; PAGE_SIZE],
        };
        page.data[0..4].copy_from_slice(PAGE_MAGIC);
        page.data[4..8].copy_from_slice(&page_id.to_le_bytes());
        page.data[8] = PAGE_TYPE_HEAP;
        page.set_num_slots(0);
        page.set_free_start(PAGE_HEADER_SIZE as u16);
        page
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "heap page has {} bytes, expected {PAGE_SIZE}",
                bytes.len()
            )));
        }
        if &bytes[0..4] != PAGE_MAGIC {
            return Err(StorageError::corruption("invalid heap page magic"));
        }
        if bytes[8] != PAGE_TYPE_HEAP {
            return Err(StorageError::corruption(format!(
                "unexpected page type {}",
                bytes[8]
            )));
        }

        let mut page = HeapPage {
            data: [0; PAGE_SIZE],
        };
        page.data.copy_from_slice(bytes);
        Ok(page)
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn page_id(&self) -> PageId {
        u32::from_le_bytes(self.data[4..8].try_into().unwrap())
    }

    pub fn num_slots(&self) -> u16 {
        u16::from_le_bytes(self.data[10..12].try_into().unwrap())
    }

    fn set_num_slots(&mut self, n: u16) {
        self.data[10..12].copy_from_slice(&n.to_le_bytes());
    }

    pub fn free_start(&self) -> u16 {
        u16::from_le_bytes(self.data[12..14].try_into().unwrap())
    }

    fn set_free_start(&mut self, off: u16) {
        self.data[12..14].copy_from_slice(&off.to_le_bytes());
    }

    fn slot_pos(slot: SlotId) -> usize {
        PAGE_SIZE - (slot as usize + 1) * SLOT_SIZE
    }

    /// Reads slot `slot` as `(offset, length)`.
    pub fn slot(&self, slot: SlotId) -> (u16, u16) {
        let pos = Self::slot_pos(slot);
        let off = u16::from_le_bytes(self.data[pos..pos + 2].try_into().unwrap());
        let len = u16::from_le_bytes(self.data[pos + 2..pos + 4].try_into().unwrap());
        (off, len)
    }

    fn set_slot(&mut self, slot: SlotId, off: u16, len: u16) {
        let pos = Self::slot_pos(slot);
        self.data[pos..pos + 2].copy_from_slice(&off.to_le_bytes());
        self.data[pos + 2..pos + 4].copy_from_slice(&len.to_le_bytes());
    }

    pub fn is_live(&self, slot: SlotId) -> bool {
        let (off, len) = self.slot(slot);
        off != TOMBSTONE_OFFSET && len != 0
    }

    /// The raw bytes of a live record, or `None` for tombstones and empty
    /// slots.
    pub fn record_bytes(&self, slot: SlotId) -> Result<Option<&[u8]>> {
        let (off, len) = self.slot(slot);
        if off == TOMBSTONE_OFFSET || len == 0 {
            return Ok(None);
        }
        let start = off as usize;
        let end = start + len as usize;
        if end > PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "slot {slot} points outside the page"
            )));
        }
        Ok(Some(&self.data[start..end]))
    }

    /// Places an encoded row on the page, reusing a tombstone slot when one
    /// exists. Returns the slot id, or `PageFull` when neither the row bytes
    /// nor (if needed) a fresh slot entry fit.
    pub fn insert_row(&mut self, row_bytes: &[u8]) -> Result<SlotId> {
        let n_slots = self.num_slots();
        let free_start = self.free_start() as usize;

        if row_bytes.len() > MAX_RECORD_LEN {
            return Err(StorageError::PageFull);
        }

        let mut reuse_slot = None;
        for i in 0..n_slots {
            let (off, len) = self.slot(i);
            if off == TOMBSTONE_OFFSET && len == 0 {
                reuse_slot = Some(i);
                break;
            }
        }

        let mut needed = row_bytes.len();
        if reuse_slot.is_none() {
            needed += SLOT_SIZE;
        }

        let free_end = PAGE_SIZE - n_slots as usize * SLOT_SIZE;
        if free_start + needed > free_end {
            return Err(StorageError::PageFull);
        }

        self.data[free_start..free_start + row_bytes.len()].copy_from_slice(row_bytes);

        let slot = match reuse_slot {
            Some(i) => i,
            None => {
                self.set_num_slots(n_slots + 1);
                n_slots
            }
        };
        self.set_slot(slot, free_start as u16, row_bytes.len() as u16);
        self.set_free_start((free_start + row_bytes.len()) as u16);

        Ok(slot)
    }

    /// Decodes every live record in slot order.
    pub fn rows(&self, num_cols: usize) -> Result<Vec<(SlotId, Row)>> {
        let mut out = Vec::new();
        for slot in 0..self.num_slots() {
            let Some(bytes) = self.record_bytes(slot)? else {
                continue;
            };
            let mut cursor = bytes;
            let row = decode_row(&mut cursor, num_cols).map_err(|e| {
                StorageError::corruption(format!("slot {slot}: {e}"))
            })?;
            out.push((slot, row));
        }
        Ok(out)
    }

    /// Replaces a live record in place. The new bytes must not be longer than
    /// the record they replace; growth goes through delete + reinsert.
    pub fn overwrite_slot(&mut self, slot: SlotId, bytes: &[u8]) -> Result<()> {
        let (off, len) = self.slot(slot);
        if off == TOMBSTONE_OFFSET || len == 0 {
            return Err(StorageError::corruption(format!(
                "overwrite of dead slot {slot}"
            )));
        }
        if bytes.len() > len as usize {
            return Err(StorageError::PageFull);
        }
        let start = off as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.set_slot(slot, off, bytes.len() as u16);
        Ok(())
    }

    /// Tombstones a slot. When the record's bytes sit at the tail of the row
    /// area, freeStart is rewound to reclaim them; bytes of live records are
    /// never reclaimed. Trailing tombstone slots are trimmed from the
    /// directory so their entries can be reclaimed too. Non-tail holes remain
    /// as internal fragmentation until the next full rewrite.
    pub fn delete_slot(&mut self, slot: SlotId) {
        let (off, len) = self.slot(slot);
        self.set_slot(slot, TOMBSTONE_OFFSET, 0);

        if off != TOMBSTONE_OFFSET && len != 0 && off + len == self.free_start() {
            self.set_free_start(off);
        }

        let mut n_slots = self.num_slots();
        while n_slots > 0 {
            let (off, len) = self.slot(n_slots - 1);
            if off == TOMBSTONE_OFFSET && len == 0 {
                n_slots -= 1;
                self.set_num_slots(n_slots);
            } else {
                break;
            }
        }
    }
}
