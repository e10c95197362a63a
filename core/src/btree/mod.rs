//! Persistent B+Tree used as an ordered multi-map of composite keys.
//!
//! ## File layout
//!
//! ```text
//! +------------------------------+
//! | Header (32B)                 |  magic "FDBT", order: u32, root: u64,
//! |                              |  height: u32, free_head: u64
//! +------------------------------+
//! | Node 0                       |  fixed size, see `node::node_size`
//! | Node 1                       |
//! | ...                          |
//! +------------------------------+
//! ```
//!
//! Keys carry their value (the record id), so leaves hold keys only. Leaves
//! are chained left to right for group scans. Every node except the root
//! keeps at least `(order - 1) / 2` keys; released nodes go on a free list
//! threaded through the file and are reused before the file grows.

mod key;
mod node;

pub use key::{IndexKey, NameKey, PairKey, NAME_CAPACITY};

use crate::error::{Error, Result};
use crate::persist::{check_magic, end_offset, open_data_file, read_exact_at, write_all_at};
use byteorder::{ByteOrder, LittleEndian};
use node::{decode_free, encode_free, node_size, Node};
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"FDBT";
const HEADER_SIZE: u64 = 32;

enum Insert<K> {
    Done,
    Duplicate,
    Split { separator: K, right: u64 },
}

pub struct OrderedIndex<K> {
    path: PathBuf,
    file: File,
    order: usize,
    root: u64,
    height: u32,
    free_head: u64,
    _key: PhantomData<fn() -> K>,
}

impl<K: IndexKey> OrderedIndex<K> {
    /// Opens the index at `path`, creating an empty tree of the given order
    /// if the file is new. An existing file keeps the order it was built with.
    pub fn open<P: AsRef<Path>>(path: P, order: usize) -> Result<Self> {
        if order < 3 {
            return Err(Error::InvalidArgument(format!("B+Tree order must be at least 3, got {order}")));
        }
        let path = path.as_ref().to_path_buf();
        let file = open_data_file(&path)?;
        let mut index = Self { path, file, order, root: 0, height: 1, free_head: 0, _key: PhantomData };

        if end_offset(&index.file)? == 0 {
            index.root = HEADER_SIZE;
            index.write_header()?;
            index.write_node(index.root, &Node::leaf(Vec::new(), 0))?;
        } else {
            index.read_header()?;
            if index.order != order {
                tracing::warn!(path = %index.path.display(), stored = index.order, requested = order, "keeping stored B+Tree order");
            }
        }
        tracing::info!(path = %index.path.display(), order = index.order, height = index.height, "opened ordered index");
        Ok(index)
    }

    /// Inserts `key`. Returns `false` when the exact key is already stored.
    pub fn create(&mut self, key: K) -> Result<bool> {
        match self.insert_into(self.root, &key)? {
            Insert::Duplicate => Ok(false),
            Insert::Done => Ok(true),
            Insert::Split { separator, right } => {
                let new_root = Node::internal(vec![separator], vec![self.root, right]);
                let offset = self.allocate_node()?;
                self.write_node(offset, &new_root)?;
                self.root = offset;
                self.height += 1;
                self.write_header()?;
                tracing::debug!(height = self.height, "B+Tree root split");
                Ok(true)
            }
        }
    }

    /// All stored keys in `probe`'s group, ascending.
    pub fn read(&self, probe: &K) -> Result<Vec<K>> {
        let start = probe.group_start();
        let mut node = self.read_node(self.root)?;
        while !node.leaf {
            let child = node.children[node.child_index(&start)];
            node = self.read_node(child)?;
        }

        let mut found = Vec::new();
        let mut pos = node.keys.partition_point(|k| *k < start);
        loop {
            for key in &node.keys[pos..] {
                if !probe.in_group(key) {
                    return Ok(found);
                }
                found.push(key.clone());
            }
            if node.next == 0 {
                return Ok(found);
            }
            node = self.read_node(node.next)?;
            pos = 0;
        }
    }

    /// Removes the exact key, rebalancing on the way back up.
    pub fn delete(&mut self, key: &K) -> Result<()> {
        if !self.remove_from(self.root, key)? {
            return Err(Error::NotFound(format!("index key {key:?}")));
        }
        let root = self.read_node(self.root)?;
        if !root.leaf && root.keys.is_empty() {
            let old_root = self.root;
            self.root = root.children[0];
            self.height -= 1;
            self.free_node(old_root)?;
            self.write_header()?;
            tracing::debug!(height = self.height, "B+Tree root collapsed");
        }
        Ok(())
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        let mut node = self.read_node(self.root)?;
        while !node.leaf {
            let child = node.children[node.child_index(key)];
            node = self.read_node(child)?;
        }
        Ok(node.keys.binary_search(key).is_ok())
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of levels; a lone leaf root has height 1.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Every stored key in order, walking the leaf chain.
    pub fn all_keys(&self) -> Result<Vec<K>> {
        let mut node = self.read_node(self.root)?;
        while !node.leaf {
            node = self.read_node(node.children[0])?;
        }
        let mut keys = Vec::new();
        loop {
            keys.extend(node.keys.iter().cloned());
            if node.next == 0 {
                return Ok(keys);
            }
            node = self.read_node(node.next)?;
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.all_keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read_node(self.root)?.keys.is_empty())
    }

    /// Verifies ordering, separator bounds, minimum fill, uniform leaf depth
    /// and the leaf chain. Reports the first violation as [`Error::Corrupt`].
    pub fn check_invariants(&self) -> Result<()> {
        self.check_subtree(self.root, 1, None, None)?;
        let keys = self.all_keys()?;
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Corrupt("leaf chain is not strictly ascending".into()));
        }
        Ok(())
    }

    fn max_keys(&self) -> usize {
        self.order - 1
    }

    fn min_keys(&self) -> usize {
        (self.order - 1) / 2
    }

    fn insert_into(&mut self, offset: u64, key: &K) -> Result<Insert<K>> {
        let mut node = self.read_node(offset)?;

        if node.leaf {
            match node.keys.binary_search(key) {
                Ok(_) => return Ok(Insert::Duplicate),
                Err(pos) => node.keys.insert(pos, key.clone()),
            }
            if node.keys.len() <= self.max_keys() {
                self.write_node(offset, &node)?;
                return Ok(Insert::Done);
            }
            return self.split_leaf(offset, node);
        }

        let idx = node.child_index(key);
        match self.insert_into(node.children[idx], key)? {
            Insert::Split { separator, right } => {
                node.keys.insert(idx, separator);
                node.children.insert(idx + 1, right);
                if node.keys.len() <= self.max_keys() {
                    self.write_node(offset, &node)?;
                    return Ok(Insert::Done);
                }
                self.split_internal(offset, node)
            }
            other => Ok(other),
        }
    }

    /// Moves the upper half of an overfull leaf into a new right sibling.
    fn split_leaf(&mut self, offset: u64, mut node: Node<K>) -> Result<Insert<K>> {
        let mid = node.keys.len() / 2;
        let right_keys = node.keys.split_off(mid);
        let separator = right_keys[0].clone();
        let right_offset = self.allocate_node()?;
        let right = Node::leaf(right_keys, node.next);
        node.next = right_offset;
        self.write_node(right_offset, &right)?;
        self.write_node(offset, &node)?;
        tracing::debug!(left = offset, right = right_offset, "leaf split");
        Ok(Insert::Split { separator, right: right_offset })
    }

    /// Promotes the median key of an overfull internal node.
    fn split_internal(&mut self, offset: u64, mut node: Node<K>) -> Result<Insert<K>> {
        let mid = node.keys.len() / 2;
        let right_keys = node.keys.split_off(mid + 1);
        let separator = node.keys.pop().ok_or_else(|| self.corrupt("empty internal node"))?;
        let right_children = node.children.split_off(mid + 1);
        let right_offset = self.allocate_node()?;
        self.write_node(right_offset, &Node::internal(right_keys, right_children))?;
        self.write_node(offset, &node)?;
        tracing::debug!(left = offset, right = right_offset, "internal split");
        Ok(Insert::Split { separator, right: right_offset })
    }

    fn remove_from(&mut self, offset: u64, key: &K) -> Result<bool> {
        let mut node = self.read_node(offset)?;

        if node.leaf {
            return match node.keys.binary_search(key) {
                Ok(pos) => {
                    node.keys.remove(pos);
                    self.write_node(offset, &node)?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            };
        }

        let idx = node.child_index(key);
        if !self.remove_from(node.children[idx], key)? {
            return Ok(false);
        }
        let child = self.read_node(node.children[idx])?;
        if child.keys.len() < self.min_keys() {
            self.rebalance(&mut node, idx, child)?;
            self.write_node(offset, &node)?;
        }
        Ok(true)
    }

    /// Restores minimum fill of `parent.children[idx]` by borrowing from a
    /// sibling with spare keys, or else merging with one.
    fn rebalance(&mut self, parent: &mut Node<K>, idx: usize, child: Node<K>) -> Result<()> {
        let left = if idx > 0 { Some(self.read_node(parent.children[idx - 1])?) } else { None };
        if let Some(left) = left {
            if left.keys.len() > self.min_keys() {
                return self.borrow_from_left(parent, idx, left, child);
            }
            return self.merge(parent, idx - 1, left, child);
        }

        let right = self.read_node(parent.children[idx + 1])?;
        if right.keys.len() > self.min_keys() {
            return self.borrow_from_right(parent, idx, child, right);
        }
        self.merge(parent, idx, child, right)
    }

    fn borrow_from_left(&mut self, parent: &mut Node<K>, idx: usize, mut left: Node<K>, mut child: Node<K>) -> Result<()> {
        let taken = left.keys.pop().ok_or_else(|| self.corrupt("empty left sibling"))?;
        if child.leaf {
            child.keys.insert(0, taken);
            parent.keys[idx - 1] = child.keys[0].clone();
        } else {
            let moved = left.children.pop().ok_or_else(|| self.corrupt("childless left sibling"))?;
            let separator = std::mem::replace(&mut parent.keys[idx - 1], taken);
            child.keys.insert(0, separator);
            child.children.insert(0, moved);
        }
        self.write_node(parent.children[idx - 1], &left)?;
        self.write_node(parent.children[idx], &child)?;
        tracing::debug!(node = parent.children[idx], "borrowed from left sibling");
        Ok(())
    }

    fn borrow_from_right(&mut self, parent: &mut Node<K>, idx: usize, mut child: Node<K>, mut right: Node<K>) -> Result<()> {
        let taken = right.keys.remove(0);
        if child.leaf {
            child.keys.push(taken);
            parent.keys[idx] = right.keys[0].clone();
        } else {
            let moved = right.children.remove(0);
            let separator = std::mem::replace(&mut parent.keys[idx], taken);
            child.keys.push(separator);
            child.children.push(moved);
        }
        self.write_node(parent.children[idx], &child)?;
        self.write_node(parent.children[idx + 1], &right)?;
        tracing::debug!(node = parent.children[idx], "borrowed from right sibling");
        Ok(())
    }

    /// Folds `parent.children[left_idx + 1]` into its left neighbour and drops
    /// the separator between them.
    fn merge(&mut self, parent: &mut Node<K>, left_idx: usize, mut left: Node<K>, right: Node<K>) -> Result<()> {
        let separator = parent.keys.remove(left_idx);
        let right_offset = parent.children.remove(left_idx + 1);
        if left.leaf {
            left.keys.extend(right.keys);
            left.next = right.next;
        } else {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }
        self.write_node(parent.children[left_idx], &left)?;
        self.free_node(right_offset)?;
        tracing::debug!(into = parent.children[left_idx], freed = right_offset, "merged siblings");
        Ok(())
    }

    /// Returns the depth of the leaves below `offset`.
    fn check_subtree(&self, offset: u64, depth: u32, lower: Option<&K>, upper: Option<&K>) -> Result<u32> {
        let node = self.read_node(offset)?;
        let is_root = offset == self.root;
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(self.corrupt(&format!("node {offset} keys out of order")));
        }
        if !is_root && node.keys.len() < self.min_keys() {
            return Err(self.corrupt(&format!("node {offset} underfull: {} keys", node.keys.len())));
        }
        if node.keys.len() > self.max_keys() {
            return Err(self.corrupt(&format!("node {offset} overfull")));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first < lo {
                return Err(self.corrupt(&format!("node {offset} below its separator")));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Err(self.corrupt(&format!("node {offset} above its separator")));
            }
        }

        if node.leaf {
            if depth != self.height {
                return Err(self.corrupt(&format!("leaf {offset} at depth {depth}, height {}", self.height)));
            }
            return Ok(depth);
        }
        if node.children.len() != node.keys.len() + 1 {
            return Err(self.corrupt(&format!("node {offset} child count mismatch")));
        }
        for (i, child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = node.keys.get(i).or(upper);
            self.check_subtree(*child, depth + 1, lo, hi)?;
        }
        Ok(depth)
    }

    fn allocate_node(&mut self) -> Result<u64> {
        if self.free_head == 0 {
            return end_offset(&self.file);
        }
        let offset = self.free_head;
        let mut buf = vec![0u8; node_size::<K>(self.order)];
        read_exact_at(&self.file, offset, &mut buf)?;
        self.free_head = decode_free(&buf)?;
        self.write_header()?;
        Ok(offset)
    }

    fn free_node(&mut self, offset: u64) -> Result<()> {
        write_all_at(&self.file, offset, &encode_free::<K>(self.order, self.free_head))?;
        self.free_head = offset;
        self.write_header()
    }

    fn read_node(&self, offset: u64) -> Result<Node<K>> {
        let mut buf = vec![0u8; node_size::<K>(self.order)];
        read_exact_at(&self.file, offset, &mut buf)?;
        Node::decode(&buf, self.order)
    }

    fn write_node(&self, offset: u64, node: &Node<K>) -> Result<()> {
        write_all_at(&self.file, offset, &node.encode(self.order))
    }

    fn write_header(&self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.order as u32);
        LittleEndian::write_u64(&mut buf[8..16], self.root);
        LittleEndian::write_u32(&mut buf[16..20], self.height);
        LittleEndian::write_u64(&mut buf[20..28], self.free_head);
        write_all_at(&self.file, 0, &buf)
    }

    fn read_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        read_exact_at(&self.file, 0, &mut buf)?;
        check_magic(&buf[0..4], MAGIC, &self.path)?;
        self.order = LittleEndian::read_u32(&buf[4..8]) as usize;
        if self.order < 3 {
            return Err(self.corrupt("stored order below 3"));
        }
        self.root = LittleEndian::read_u64(&buf[8..16]);
        self.height = LittleEndian::read_u32(&buf[16..20]);
        self.free_head = LittleEndian::read_u64(&buf[20..28]);
        Ok(())
    }

    fn corrupt(&self, what: &str) -> Error {
        Error::Corrupt(format!("{}: {what}", self.path.display()))
    }
}
