//! Inverted index: term → chain of fixed-capacity posting blocks.
//!
//! Two files back one index:
//!
//! ```text
//! dictionary  magic "FDDI" | documents: u32
//!             then appended entries, either
//!               term      tag: u8 (1 live, 0 pruned) | first_block: u64 | len: u16 | bytes
//!               document  tag: u8 (2) | id: u32
//! blocks      magic "FDBK" | capacity: u16 | pad: u16 | free_head: u64
//!             then blocks  count: u16 | next: u64 | capacity × (id: u32, frequency: f32)
//! ```
//!
//! The dictionary is resolved into memory on open. Document entries record
//! every identifier ever indexed; `documents` counts them and is the N used
//! for IDF. A term whose last posting is deleted is pruned: its entry is
//! flagged and it disappears from the dictionary. Indexing the term again
//! revives the flagged entry in place, so churn does not grow the file.

use crate::error::{Error, Result};
use crate::persist::{check_magic, end_offset, open_data_file, read_exact_at, write_all_at};
use crate::RecordId;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

const DICT_MAGIC: &[u8; 4] = b"FDDI";
const DICT_HEADER_SIZE: u64 = 8;
const BLOCKS_MAGIC: &[u8; 4] = b"FDBK";
const BLOCKS_HEADER_SIZE: u64 = 16;

const TAG_PRUNED: u8 = 0;
const TAG_TERM: u8 = 1;
const TAG_DOCUMENT: u8 = 2;

/// count: u16 | next: u64
const BLOCK_HEADER_SIZE: usize = 10;
const POSTING_SIZE: usize = 8;

/// One document's entry under a term: its identifier and the term's relative
/// frequency within the document, in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: RecordId,
    pub frequency: f32,
}

impl Posting {
    pub fn new(id: RecordId, frequency: f32) -> Self {
        Self { id, frequency }
    }
}

#[derive(Debug, Clone, Copy)]
struct DictEntry {
    offset: u64,
    first_block: u64,
}

#[derive(Debug, Clone)]
struct Block {
    postings: Vec<Posting>,
    next: u64,
}

pub struct InvertedIndex {
    dictionary_path: PathBuf,
    blocks_path: PathBuf,
    dictionary_file: File,
    blocks_file: File,
    capacity: usize,
    free_head: u64,
    documents: u32,
    dictionary: HashMap<String, DictEntry>,
    /// Offsets of flagged entries, by term, waiting to be revived.
    pruned: HashMap<String, u64>,
    seen: HashSet<RecordId>,
}

impl InvertedIndex {
    /// Opens (or creates) the dictionary/blocks pair. `capacity` is the number
    /// of postings per block for a new index; an existing one keeps its own.
    pub fn open<P: AsRef<Path>>(dictionary_path: P, blocks_path: P, capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > u16::MAX as usize {
            return Err(Error::InvalidArgument(format!("block capacity out of range: {capacity}")));
        }
        let dictionary_path = dictionary_path.as_ref().to_path_buf();
        let blocks_path = blocks_path.as_ref().to_path_buf();
        let mut index = Self {
            dictionary_file: open_data_file(&dictionary_path)?,
            blocks_file: open_data_file(&blocks_path)?,
            dictionary_path,
            blocks_path,
            capacity,
            free_head: 0,
            documents: 0,
            dictionary: HashMap::new(),
            pruned: HashMap::new(),
            seen: HashSet::new(),
        };

        if end_offset(&index.blocks_file)? == 0 {
            index.write_blocks_header()?;
        } else {
            index.read_blocks_header()?;
            if index.capacity != capacity {
                tracing::warn!(path = %index.blocks_path.display(), stored = index.capacity, requested = capacity, "keeping stored block capacity");
            }
        }
        if end_offset(&index.dictionary_file)? == 0 {
            index.write_dictionary_header()?;
        } else {
            index.load_dictionary()?;
        }
        tracing::info!(path = %index.dictionary_path.display(), terms = index.dictionary.len(), documents = index.documents, "opened inverted index");
        Ok(index)
    }

    /// Adds `posting` under `term`. Returns `false` when the identifier was
    /// already listed, in which case its frequency is overwritten.
    pub fn create(&mut self, term: &str, posting: Posting) -> Result<bool> {
        if term.is_empty() || term.len() > u16::MAX as usize {
            return Err(Error::InvalidArgument(format!("term length {} out of range", term.len())));
        }
        if !(posting.frequency > 0.0 && posting.frequency <= 1.0) {
            return Err(Error::InvalidArgument(format!("term frequency {} outside (0, 1]", posting.frequency)));
        }
        self.note_document(posting.id)?;

        let Some(entry) = self.dictionary.get(term).copied() else {
            let block = self.allocate_block()?;
            self.write_block(block, &Block { postings: vec![posting], next: 0 })?;
            match self.pruned.remove(term) {
                Some(offset) => self.revive_term(term, offset, block)?,
                None => self.append_term(term, block)?,
            }
            return Ok(true);
        };

        let mut with_room = None;
        let mut last = entry.first_block;
        let mut offset = entry.first_block;
        while offset != 0 {
            let mut block = self.read_block(offset)?;
            if let Some(existing) = block.postings.iter_mut().find(|p| p.id == posting.id) {
                existing.frequency = posting.frequency;
                self.write_block(offset, &block)?;
                return Ok(false);
            }
            if with_room.is_none() && block.postings.len() < self.capacity {
                with_room = Some((offset, block.clone()));
            }
            last = offset;
            offset = block.next;
        }

        match with_room {
            Some((offset, mut block)) => {
                block.postings.push(posting);
                self.write_block(offset, &block)?;
            }
            None => {
                let overflow = self.allocate_block()?;
                self.write_block(overflow, &Block { postings: vec![posting], next: 0 })?;
                let mut tail = self.read_block(last)?;
                tail.next = overflow;
                self.write_block(last, &tail)?;
                tracing::debug!(term, block = overflow, "chained overflow block");
            }
        }
        Ok(true)
    }

    /// Postings of `term` in block order. Unknown terms yield an empty list.
    pub fn read(&self, term: &str) -> Result<Vec<Posting>> {
        let Some(entry) = self.dictionary.get(term) else {
            return Ok(Vec::new());
        };
        let mut postings = Vec::new();
        let mut offset = entry.first_block;
        while offset != 0 {
            let block = self.read_block(offset)?;
            postings.extend_from_slice(&block.postings);
            offset = block.next;
        }
        Ok(postings)
    }

    /// Removes `id`'s posting from `term`. Returns whether one was removed.
    pub fn delete(&mut self, term: &str, id: RecordId) -> Result<bool> {
        let Some(entry) = self.dictionary.get(term).copied() else {
            return Ok(false);
        };

        let mut prev: Option<(u64, Block)> = None;
        let mut offset = entry.first_block;
        while offset != 0 {
            let mut block = self.read_block(offset)?;
            let Some(pos) = block.postings.iter().position(|p| p.id == id) else {
                let next = block.next;
                prev = Some((offset, block));
                offset = next;
                continue;
            };

            block.postings.remove(pos);
            if !block.postings.is_empty() {
                self.write_block(offset, &block)?;
                return Ok(true);
            }

            match prev {
                Some((prev_offset, mut prev_block)) => {
                    prev_block.next = block.next;
                    self.write_block(prev_offset, &prev_block)?;
                }
                None if block.next != 0 => self.set_first_block(term, entry, block.next)?,
                None => self.prune_term(term, entry)?,
            }
            self.free_block(offset)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Number of distinct identifiers ever indexed.
    pub fn count_distinct_documents(&self) -> u32 {
        self.documents
    }

    /// Live terms, sorted.
    pub fn terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self.dictionary.keys().cloned().collect();
        terms.sort();
        terms
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.dictionary.contains_key(term)
    }

    pub fn block_capacity(&self) -> usize {
        self.capacity
    }

    fn note_document(&mut self, id: RecordId) -> Result<()> {
        if !self.seen.insert(id) {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(5);
        buf.write_u8(TAG_DOCUMENT)?;
        buf.write_u32::<LittleEndian>(id)?;
        let offset = end_offset(&self.dictionary_file)?;
        write_all_at(&self.dictionary_file, offset, &buf)?;
        self.documents += 1;
        self.write_dictionary_header()
    }

    fn append_term(&mut self, term: &str, first_block: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(11 + term.len());
        buf.write_u8(TAG_TERM)?;
        buf.write_u64::<LittleEndian>(first_block)?;
        buf.write_u16::<LittleEndian>(term.len() as u16)?;
        buf.extend_from_slice(term.as_bytes());
        let offset = end_offset(&self.dictionary_file)?;
        write_all_at(&self.dictionary_file, offset, &buf)?;
        self.dictionary.insert(term.to_string(), DictEntry { offset, first_block });
        Ok(())
    }

    fn set_first_block(&mut self, term: &str, entry: DictEntry, first_block: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, first_block);
        write_all_at(&self.dictionary_file, entry.offset + 1, &buf)?;
        self.dictionary.insert(term.to_string(), DictEntry { first_block, ..entry });
        Ok(())
    }

    fn revive_term(&mut self, term: &str, offset: u64, first_block: u64) -> Result<()> {
        let mut buf = [0u8; 9];
        buf[0] = TAG_TERM;
        LittleEndian::write_u64(&mut buf[1..9], first_block);
        write_all_at(&self.dictionary_file, offset, &buf)?;
        self.dictionary.insert(term.to_string(), DictEntry { offset, first_block });
        Ok(())
    }

    fn prune_term(&mut self, term: &str, entry: DictEntry) -> Result<()> {
        write_all_at(&self.dictionary_file, entry.offset, &[TAG_PRUNED])?;
        self.dictionary.remove(term);
        self.pruned.insert(term.to_string(), entry.offset);
        tracing::debug!(term, "pruned term with no postings");
        Ok(())
    }

    fn load_dictionary(&mut self) -> Result<()> {
        let mut header = [0u8; DICT_HEADER_SIZE as usize];
        read_exact_at(&self.dictionary_file, 0, &mut header)?;
        check_magic(&header[0..4], DICT_MAGIC, &self.dictionary_path)?;
        self.documents = LittleEndian::read_u32(&header[4..8]);

        let end = end_offset(&self.dictionary_file)?;
        let mut offset = DICT_HEADER_SIZE;
        while offset < end {
            let mut tag = [0u8; 1];
            read_exact_at(&self.dictionary_file, offset, &mut tag)?;
            match tag[0] {
                TAG_DOCUMENT => {
                    let mut id = [0u8; 4];
                    read_exact_at(&self.dictionary_file, offset + 1, &mut id)?;
                    self.seen.insert(LittleEndian::read_u32(&id));
                    offset += 5;
                }
                TAG_TERM | TAG_PRUNED => {
                    let mut fixed = [0u8; 10];
                    read_exact_at(&self.dictionary_file, offset + 1, &mut fixed)?;
                    let first_block = LittleEndian::read_u64(&fixed[0..8]);
                    let len = LittleEndian::read_u16(&fixed[8..10]) as usize;
                    let mut bytes = vec![0u8; len];
                    read_exact_at(&self.dictionary_file, offset + 11, &mut bytes)?;
                    let term = String::from_utf8(bytes).map_err(|e| {
                        Error::Corrupt(format!("{}: term is not UTF-8: {e}", self.dictionary_path.display()))
                    })?;
                    if tag[0] == TAG_TERM {
                        self.pruned.remove(&term);
                        self.dictionary.insert(term, DictEntry { offset, first_block });
                    } else if !self.dictionary.contains_key(&term) {
                        self.pruned.insert(term, offset);
                    }
                    offset += 11 + len as u64;
                }
                other => {
                    return Err(Error::Corrupt(format!(
                        "{}: unknown dictionary tag {other} at {offset}",
                        self.dictionary_path.display()
                    )))
                }
            }
        }
        if self.seen.len() as u32 != self.documents {
            tracing::warn!(header = self.documents, entries = self.seen.len(), "document counter disagrees with dictionary entries");
        }
        Ok(())
    }

    fn write_dictionary_header(&self) -> Result<()> {
        let mut buf = [0u8; DICT_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(DICT_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.documents);
        write_all_at(&self.dictionary_file, 0, &buf)
    }

    fn write_blocks_header(&self) -> Result<()> {
        let mut buf = [0u8; BLOCKS_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(BLOCKS_MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], self.capacity as u16);
        LittleEndian::write_u64(&mut buf[8..16], self.free_head);
        write_all_at(&self.blocks_file, 0, &buf)
    }

    fn read_blocks_header(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCKS_HEADER_SIZE as usize];
        read_exact_at(&self.blocks_file, 0, &mut buf)?;
        check_magic(&buf[0..4], BLOCKS_MAGIC, &self.blocks_path)?;
        self.capacity = LittleEndian::read_u16(&buf[4..6]) as usize;
        if self.capacity == 0 {
            return Err(Error::Corrupt(format!("{}: zero block capacity", self.blocks_path.display())));
        }
        self.free_head = LittleEndian::read_u64(&buf[8..16]);
        Ok(())
    }

    fn block_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.capacity * POSTING_SIZE
    }

    fn allocate_block(&mut self) -> Result<u64> {
        if self.free_head == 0 {
            return end_offset(&self.blocks_file);
        }
        let offset = self.free_head;
        self.free_head = self.read_block(offset)?.next;
        self.write_blocks_header()?;
        Ok(offset)
    }

    /// Empties the block and threads it on the free list through `next`.
    fn free_block(&mut self, offset: u64) -> Result<()> {
        self.write_block(offset, &Block { postings: Vec::new(), next: self.free_head })?;
        self.free_head = offset;
        self.write_blocks_header()
    }

    fn read_block(&self, offset: u64) -> Result<Block> {
        let mut buf = vec![0u8; self.block_size()];
        read_exact_at(&self.blocks_file, offset, &mut buf)?;
        let count = LittleEndian::read_u16(&buf[0..2]) as usize;
        if count > self.capacity {
            return Err(Error::Corrupt(format!("{}: block at {offset} overfull", self.blocks_path.display())));
        }
        let next = LittleEndian::read_u64(&buf[2..10]);
        let postings = buf[BLOCK_HEADER_SIZE..]
            .chunks_exact(POSTING_SIZE)
            .take(count)
            .map(|chunk| Posting::new(LittleEndian::read_u32(&chunk[0..4]), LittleEndian::read_f32(&chunk[4..8])))
            .collect();
        Ok(Block { postings, next })
    }

    fn write_block(&self, offset: u64, block: &Block) -> Result<()> {
        let mut buf = vec![0u8; self.block_size()];
        LittleEndian::write_u16(&mut buf[0..2], block.postings.len() as u16);
        LittleEndian::write_u64(&mut buf[2..10], block.next);
        for (chunk, posting) in buf[BLOCK_HEADER_SIZE..].chunks_exact_mut(POSTING_SIZE).zip(&block.postings) {
            LittleEndian::write_u32(&mut chunk[0..4], posting.id);
            LittleEndian::write_f32(&mut chunk[4..8], posting.frequency);
        }
        write_all_at(&self.blocks_file, offset, &buf)
    }
}
