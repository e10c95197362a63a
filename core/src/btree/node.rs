use super::key::IndexKey;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

const LEAF: u8 = 1;
const INTERNAL: u8 = 2;
const FREE: u8 = 3;

/// kind: u8 | count: u16 | next: u64
const NODE_HEADER_SIZE: usize = 11;

/// On-disk width of a node for the given order: room for `order - 1` keys
/// and `order` child pointers regardless of kind.
pub(crate) fn node_size<K: IndexKey>(order: usize) -> usize {
    NODE_HEADER_SIZE + (order - 1) * K::SIZE + order * 8
}

/// Decoded B+Tree node. Leaves use `next` as the right-sibling pointer (0 at
/// the end of the chain) and have no children; internal nodes hold one more
/// child than keys.
#[derive(Debug, Clone)]
pub(crate) struct Node<K> {
    pub leaf: bool,
    pub keys: Vec<K>,
    pub children: Vec<u64>,
    pub next: u64,
}

impl<K: IndexKey> Node<K> {
    pub fn leaf(keys: Vec<K>, next: u64) -> Self {
        Self { leaf: true, keys, children: Vec::new(), next }
    }

    pub fn internal(keys: Vec<K>, children: Vec<u64>) -> Self {
        Self { leaf: false, keys, children, next: 0 }
    }

    /// Index of the child whose subtree may hold `key`. The separator at `i`
    /// is a lower bound for child `i + 1`.
    pub fn child_index(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    pub fn encode(&self, order: usize) -> Vec<u8> {
        let mut buf = vec![0u8; node_size::<K>(order)];
        buf[0] = if self.leaf { LEAF } else { INTERNAL };
        LittleEndian::write_u16(&mut buf[1..3], self.keys.len() as u16);
        LittleEndian::write_u64(&mut buf[3..11], self.next);
        let mut pos = NODE_HEADER_SIZE;
        for key in &self.keys {
            key.encode(&mut buf[pos..pos + K::SIZE]);
            pos += K::SIZE;
        }
        let mut pos = NODE_HEADER_SIZE + (order - 1) * K::SIZE;
        for child in &self.children {
            LittleEndian::write_u64(&mut buf[pos..pos + 8], *child);
            pos += 8;
        }
        buf
    }

    pub fn decode(buf: &[u8], order: usize) -> Result<Self> {
        let leaf = match buf[0] {
            LEAF => true,
            INTERNAL => false,
            kind => return Err(Error::Corrupt(format!("unexpected node kind {kind}"))),
        };
        let count = LittleEndian::read_u16(&buf[1..3]) as usize;
        if count > order - 1 {
            return Err(Error::Corrupt(format!("node holds {count} keys, order is {order}")));
        }
        let next = LittleEndian::read_u64(&buf[3..11]);
        let mut keys = Vec::with_capacity(count + 1);
        let mut pos = NODE_HEADER_SIZE;
        for _ in 0..count {
            keys.push(K::decode(&buf[pos..pos + K::SIZE])?);
            pos += K::SIZE;
        }
        let mut children = Vec::new();
        if !leaf {
            let mut pos = NODE_HEADER_SIZE + (order - 1) * K::SIZE;
            for _ in 0..=count {
                children.push(LittleEndian::read_u64(&buf[pos..pos + 8]));
                pos += 8;
            }
        }
        Ok(Self { leaf, keys, children, next })
    }
}

/// A released node: only the link to the next free node is meaningful.
pub(crate) fn encode_free<K: IndexKey>(order: usize, next_free: u64) -> Vec<u8> {
    let mut buf = vec![0u8; node_size::<K>(order)];
    buf[0] = FREE;
    LittleEndian::write_u64(&mut buf[3..11], next_free);
    buf
}

pub(crate) fn decode_free(buf: &[u8]) -> Result<u64> {
    if buf[0] != FREE {
        return Err(Error::Corrupt("free list reaches a live node".into()));
    }
    Ok(LittleEndian::read_u64(&buf[3..11]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::PairKey;

    #[test]
    fn internal_node_round_trip() {
        let node = Node::internal(vec![PairKey::new(1, 2), PairKey::new(3, 4)], vec![100, 200, 300]);
        let buf = node.encode(5);
        assert_eq!(buf.len(), node_size::<PairKey>(5));
        let back: Node<PairKey> = Node::decode(&buf, 5).unwrap();
        assert!(!back.leaf);
        assert_eq!(back.keys, node.keys);
        assert_eq!(back.children, node.children);
    }

    #[test]
    fn child_index_sends_equal_keys_right() {
        let node: Node<PairKey> = Node::internal(vec![PairKey::new(5, 0)], vec![1, 2]);
        assert_eq!(node.child_index(&PairKey::new(4, 9)), 0);
        assert_eq!(node.child_index(&PairKey::new(5, 0)), 1);
    }
}
