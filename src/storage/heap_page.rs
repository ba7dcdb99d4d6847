use anyhow::Result;

use crate::common::{FileId, PageNo, RecordId, SlotNo, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::error::DbError;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// In-memory form of one fixed-size heap page. The page holds same-sized
/// tuple images, so the slot capacity follows directly from the schema:
/// (page size - header) / tuple size.
///
/// Deleted slots are only marked in memory; the on-disk image is compacted
/// on serialization. Slot numbers may therefore change across a
/// serialize/deserialize cycle. That is safe because a dirty page is flushed
/// at commit and never evicted mid-transaction, so no record id elsewhere in
/// the system can outlive the compaction.
#[derive(Debug)]
pub struct HeapPage {
    schema: Schema,
    file_id: FileId,
    page_no: PageNo,
    tuples: Vec<Tuple>,
    deleted: Vec<bool>,
    capacity: usize,
    used: usize,
}

impl HeapPage {
    pub fn new(schema: Schema, file_id: FileId, page_no: PageNo) -> Self {
        let capacity = (PAGE_SIZE - PAGE_HEADER_SIZE) / schema.tuple_size();
        Self {
            schema,
            file_id,
            page_no,
            tuples: vec![],
            deleted: vec![],
            capacity,
            used: 0,
        }
    }

    /// Contents of a buffer frame that holds no page yet.
    pub fn unoccupied() -> Self {
        Self {
            schema: Schema::empty(),
            file_id: 0,
            page_no: 0,
            tuples: vec![],
            deleted: vec![],
            capacity: 0,
            used: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live (non-deleted) tuples.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn has_free_slot(&self) -> bool {
        self.used < self.capacity
    }

    /// Number of in-memory slots, deleted ones included.
    pub fn slot_count(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_deleted(&self, slot: usize) -> bool {
        self.deleted[slot]
    }

    /// Appends the tuple at the next in-memory slot and returns its record
    /// id. The caller dirties the page through the buffer pool.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if !self.has_free_slot() {
            return Err(DbError::PageFull(format!(
                "page {} already holds {} tuples",
                self.page_no, self.used
            ))
            .into());
        }
        let rid = (self.page_no, self.tuples.len() as SlotNo);
        tuple.set_rid(rid);
        self.tuples.push(tuple);
        self.deleted.push(false);
        self.used += 1;
        Ok(rid)
    }

    /// Marks the slot of the record id deleted.
    pub fn delete_tuple(&mut self, rid: RecordId) -> Result<()> {
        let (page_no, slot) = rid;
        let slot = slot as usize;
        if page_no != self.page_no || slot >= self.tuples.len() {
            return Err(DbError::TupleNotFound(format!(
                "record ({}, {}) is not on page {}",
                page_no, slot, self.page_no
            ))
            .into());
        }
        if self.deleted[slot] {
            return Err(DbError::TupleNotFound(format!(
                "record ({}, {}) was already deleted",
                page_no, slot
            ))
            .into());
        }
        self.deleted[slot] = true;
        self.used -= 1;
        Ok(())
    }

    pub fn fetch_tuple(&self, slot: SlotNo) -> Result<&Tuple> {
        let slot = slot as usize;
        if slot >= self.tuples.len() || self.deleted[slot] {
            return Err(DbError::TupleNotFound(format!(
                "no live tuple in slot {} of page {}",
                slot, self.page_no
            ))
            .into());
        }
        Ok(&self.tuples[slot])
    }

    /// Iterates the live tuples in slot order, record ids set.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.tuples
            .iter()
            .zip(self.deleted.iter())
            .filter_map(|(tuple, deleted)| (!deleted).then_some(tuple))
    }

    /// Serializes the page: header (total slots, used slots as i32 LE), then
    /// every live tuple image in slot order. Deleted slots are compacted
    /// away; the remainder of the page is zeroed.
    pub fn to_buffer(&self) -> [u8; PAGE_SIZE] {
        let mut buffer = [0u8; PAGE_SIZE];
        buffer[0..4].copy_from_slice(&(self.capacity as i32).to_le_bytes());
        buffer[4..8].copy_from_slice(&(self.used as i32).to_le_bytes());

        let tuple_size = self.schema.tuple_size();
        let mut offset = PAGE_HEADER_SIZE;
        for tuple in self.iter() {
            tuple.serialize(&self.schema, &mut buffer[offset..offset + tuple_size]);
            offset += tuple_size;
        }
        buffer
    }

    /// Inverse of `to_buffer`.
    pub fn from_buffer(
        schema: Schema,
        file_id: FileId,
        page_no: PageNo,
        buffer: &[u8],
    ) -> Result<Self> {
        let capacity = i32::from_le_bytes(buffer[0..4].try_into().unwrap()) as usize;
        let used = i32::from_le_bytes(buffer[4..8].try_into().unwrap()) as usize;

        let tuple_size = schema.tuple_size();
        if used > capacity || PAGE_HEADER_SIZE + used * tuple_size > PAGE_SIZE {
            return Err(DbError::MalformedData(format!(
                "page {} header claims {} of {} slots used",
                page_no, used, capacity
            ))
            .into());
        }

        let mut tuples = Vec::with_capacity(used);
        let mut offset = PAGE_HEADER_SIZE;
        for slot in 0..used {
            let mut tuple = Tuple::parse(&schema, &buffer[offset..offset + tuple_size])?;
            tuple.set_rid((page_no, slot as SlotNo));
            tuples.push(tuple);
            offset += tuple_size;
        }

        Ok(Self {
            schema,
            file_id,
            page_no,
            deleted: vec![false; used],
            tuples,
            capacity,
            used,
        })
    }
}
