//! Heap file of serialized records with a reusable free-slot list.
//!
//! ```text
//! header   magic "FDRS" | next_id: u32 | free_head: u64
//! slot     flag: u8 | id: u32 | capacity: u32 | len: u32 | payload[capacity]
//! ```
//!
//! A deleted slot keeps its capacity and stores the offset of the next free
//! slot in the first eight payload bytes, so the free list lives in the file.
//! The id to offset directory is rebuilt from a slot scan on open.

use crate::collection::Exists;
use crate::error::{Error, Result};
use crate::persist::{check_magic, end_offset, open_data_file, read_exact_at, write_all_at};
use crate::RecordId;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"FDRS";
const HEADER_SIZE: u64 = 16;
const SLOT_HEADER_SIZE: u64 = 13;
/// Room for the free-list link once the slot is deleted.
const MIN_CAPACITY: u32 = 8;

const LIVE: u8 = 1;
const DELETED: u8 = 0;

/// A value that can live in a [`RecordStore`]. The store assigns the id.
pub trait Record: Serialize + DeserializeOwned {
    fn id(&self) -> RecordId;
    fn set_id(&mut self, id: RecordId);
}

#[derive(Debug, Clone, Copy)]
struct SlotHeader {
    flag: u8,
    id: RecordId,
    capacity: u32,
    len: u32,
}

#[derive(Debug, Clone, Copy)]
struct FreeSlot {
    offset: u64,
    capacity: u32,
}

pub struct RecordStore<T> {
    path: PathBuf,
    file: File,
    next_id: RecordId,
    directory: HashMap<RecordId, u64>,
    /// Free slots in file chain order; index 0 is the head.
    free: Vec<FreeSlot>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> RecordStore<T> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_data_file(&path)?;
        let mut store = Self {
            path,
            file,
            next_id: 1,
            directory: HashMap::new(),
            free: Vec::new(),
            _record: PhantomData,
        };

        if end_offset(&store.file)? == 0 {
            store.write_header(0)?;
        } else {
            let free_head = store.read_header()?;
            store.scan_slots()?;
            store.load_free_list(free_head)?;
        }
        tracing::info!(path = %store.path.display(), records = store.directory.len(), free_slots = store.free.len(), "opened record store");
        Ok(store)
    }

    /// Stores `record` under a fresh identifier, which is also written back into it.
    pub fn create(&mut self, record: &mut T) -> Result<RecordId> {
        let id = self.next_id;
        record.set_id(id);
        let payload = encode(record)?;
        let (offset, capacity) = self.allocate(payload.len() as u32)?;
        self.write_slot(offset, id, capacity, &payload)?;
        self.directory.insert(id, offset);
        self.next_id += 1;
        self.write_header(self.free_head())?;
        Ok(id)
    }

    pub fn read(&self, id: RecordId) -> Result<T> {
        let offset = *self.directory.get(&id).ok_or_else(|| Error::record_not_found(id))?;
        let header = self.slot_header(offset)?;
        if header.flag != LIVE || header.id != id {
            return Err(Error::record_not_found(id));
        }
        let mut payload = vec![0u8; header.len as usize];
        read_exact_at(&self.file, offset + SLOT_HEADER_SIZE, &mut payload)?;
        Ok(bincode::deserialize(&payload)?)
    }

    /// Rewrites the record in place when it still fits its slot, otherwise
    /// moves it to another slot. The identifier never changes.
    pub fn update(&mut self, record: &T) -> Result<()> {
        let id = record.id();
        let offset = *self.directory.get(&id).ok_or_else(|| Error::record_not_found(id))?;
        let header = self.slot_header(offset)?;
        let payload = encode(record)?;
        let len = payload.len() as u32;

        if len <= header.capacity {
            return self.write_slot(offset, id, header.capacity, &payload);
        }

        let (new_offset, capacity) = self.allocate(len)?;
        self.write_slot(new_offset, id, capacity, &payload)?;
        self.release(offset, header.capacity)?;
        self.directory.insert(id, new_offset);
        tracing::debug!(id, from = offset, to = new_offset, "relocated record");
        Ok(())
    }

    pub fn delete(&mut self, id: RecordId) -> Result<()> {
        let offset = self.directory.remove(&id).ok_or_else(|| Error::record_not_found(id))?;
        let header = self.slot_header(offset)?;
        self.release(offset, header.capacity)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.directory.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    /// Live identifiers, ascending.
    pub fn ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.directory.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Live records in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = Result<T>> + '_ {
        self.ids().into_iter().map(move |id| self.read(id))
    }

    /// The identifier the next `create` will assign.
    pub fn next_id(&self) -> RecordId {
        self.next_id
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn free_head(&self) -> u64 {
        self.free.first().map_or(0, |slot| slot.offset)
    }

    /// First-fit over the free list, else append.
    fn allocate(&mut self, len: u32) -> Result<(u64, u32)> {
        if let Some(idx) = self.free.iter().position(|slot| slot.capacity >= len) {
            let slot = self.free.remove(idx);
            let next = self.free.get(idx).map_or(0, |s| s.offset);
            if idx == 0 {
                self.write_header(next)?;
            } else {
                self.write_link(self.free[idx - 1].offset, next)?;
            }
            tracing::debug!(offset = slot.offset, capacity = slot.capacity, len, "reusing free slot");
            return Ok((slot.offset, slot.capacity));
        }
        let offset = end_offset(&self.file)?;
        Ok((offset, len.max(MIN_CAPACITY)))
    }

    /// Flags a slot deleted and pushes it on the head of the free list.
    fn release(&mut self, offset: u64, capacity: u32) -> Result<()> {
        let next = self.free_head();
        let mut buf = Vec::with_capacity(SLOT_HEADER_SIZE as usize + 8);
        buf.write_u8(DELETED)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(capacity)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u64::<LittleEndian>(next)?;
        write_all_at(&self.file, offset, &buf)?;
        self.free.insert(0, FreeSlot { offset, capacity });
        self.write_header(offset)
    }

    fn write_slot(&self, offset: u64, id: RecordId, capacity: u32, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(SLOT_HEADER_SIZE as usize + capacity as usize);
        buf.write_u8(LIVE)?;
        buf.write_u32::<LittleEndian>(id)?;
        buf.write_u32::<LittleEndian>(capacity)?;
        buf.write_u32::<LittleEndian>(payload.len() as u32)?;
        buf.extend_from_slice(payload);
        buf.resize(SLOT_HEADER_SIZE as usize + capacity as usize, 0);
        write_all_at(&self.file, offset, &buf)
    }

    fn write_link(&self, slot_offset: u64, next: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, next);
        write_all_at(&self.file, slot_offset + SLOT_HEADER_SIZE, &buf)
    }

    fn slot_header(&self, offset: u64) -> Result<SlotHeader> {
        let mut buf = [0u8; SLOT_HEADER_SIZE as usize];
        read_exact_at(&self.file, offset, &mut buf)?;
        Ok(SlotHeader {
            flag: buf[0],
            id: LittleEndian::read_u32(&buf[1..5]),
            capacity: LittleEndian::read_u32(&buf[5..9]),
            len: LittleEndian::read_u32(&buf[9..13]),
        })
    }

    fn write_header(&self, free_head: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.extend_from_slice(MAGIC);
        buf.write_u32::<LittleEndian>(self.next_id)?;
        buf.write_u64::<LittleEndian>(free_head)?;
        write_all_at(&self.file, 0, &buf)
    }

    /// Returns the stored free-list head.
    fn read_header(&mut self) -> Result<u64> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        read_exact_at(&self.file, 0, &mut buf)?;
        check_magic(&buf[0..4], MAGIC, &self.path)?;
        self.next_id = LittleEndian::read_u32(&buf[4..8]);
        Ok(LittleEndian::read_u64(&buf[8..16]))
    }

    fn scan_slots(&mut self) -> Result<()> {
        let end = end_offset(&self.file)?;
        let mut offset = HEADER_SIZE;
        while offset + SLOT_HEADER_SIZE <= end {
            let header = self.slot_header(offset)?;
            if header.flag == LIVE {
                self.directory.insert(header.id, offset);
            }
            offset += SLOT_HEADER_SIZE + header.capacity as u64;
        }
        Ok(())
    }

    fn load_free_list(&mut self, head: u64) -> Result<()> {
        let mut offset = head;
        while offset != 0 {
            let header = self.slot_header(offset)?;
            if header.flag != DELETED {
                return Err(Error::Corrupt(format!("{}: free list reaches a live slot", self.path.display())));
            }
            self.free.push(FreeSlot { offset, capacity: header.capacity });
            let mut link = [0u8; 8];
            read_exact_at(&self.file, offset + SLOT_HEADER_SIZE, &mut link)?;
            offset = LittleEndian::read_u64(&link);
        }
        Ok(())
    }
}

impl<T: Record> Exists for RecordStore<T> {
    fn exists(&self, id: RecordId) -> bool {
        self.contains(id)
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    if payload.len() > u32::MAX as usize {
        return Err(Error::InvalidArgument(format!("record of {} bytes is too large", payload.len())));
    }
    Ok(payload)
}
