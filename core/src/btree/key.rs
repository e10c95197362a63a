use crate::error::{Error, Result};
use crate::RecordId;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// A fixed-width, totally ordered key stored in an [`super::OrderedIndex`].
///
/// Keys are grouped by a primary component. `group_start` gives the smallest
/// possible key of a group and `in_group` tells whether a stored key belongs
/// to the group a probe asks for; a group read scans forward from the former
/// while the latter holds, so every group must be a contiguous key range.
pub trait IndexKey: Ord + Clone + fmt::Debug {
    /// Encoded width in bytes.
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Result<Self>;
    fn group_start(&self) -> Self;
    fn in_group(&self, stored: &Self) -> bool;
}

/// Foreign-key pair, ordered by primary then dependent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub primary: RecordId,
    pub dependent: RecordId,
}

impl PairKey {
    pub fn new(primary: RecordId, dependent: RecordId) -> Self {
        Self { primary, dependent }
    }

    /// Probe for every pair whose primary id is `primary`.
    pub fn group(primary: RecordId) -> Self {
        Self { primary, dependent: 0 }
    }
}

impl IndexKey for PairKey {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.primary);
        LittleEndian::write_u32(&mut buf[4..8], self.dependent);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self { primary: LittleEndian::read_u32(&buf[0..4]), dependent: LittleEndian::read_u32(&buf[4..8]) })
    }

    fn group_start(&self) -> Self {
        Self::group(self.primary)
    }

    fn in_group(&self, stored: &Self) -> bool {
        stored.primary == self.primary
    }
}

/// Longest folded name a [`NameKey`] keeps, in bytes. Longer names are cut
/// at a character boundary.
pub const NAME_CAPACITY: usize = 60;

/// Name to id entry, ordered by folded name then id.
///
/// Names are folded (lowercased, diacritics removed) on construction so that
/// lookups ignore case and accents. A group read matches every stored name
/// that starts with the probe's name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameKey {
    name: String,
    pub id: RecordId,
}

impl NameKey {
    pub fn new(name: &str, id: RecordId) -> Self {
        Self { name: truncate(fold_name(name)), id }
    }

    /// Probe for every name starting with `prefix`. A prefix that folds to
    /// more than [`NAME_CAPACITY`] bytes cannot be matched exactly against
    /// the truncated stored names and is rejected.
    pub fn prefix(prefix: &str) -> Result<Self> {
        let name = fold_name(prefix);
        if name.len() > NAME_CAPACITY {
            return Err(Error::InvalidArgument(format!(
                "name prefix of {} bytes exceeds the {NAME_CAPACITY} byte key width",
                name.len()
            )));
        }
        Ok(Self { name, id: 0 })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn fold_name(name: &str) -> String {
    name.trim().to_lowercase().nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn truncate(folded: String) -> String {
    if folded.len() <= NAME_CAPACITY {
        return folded;
    }
    let mut end = NAME_CAPACITY;
    while !folded.is_char_boundary(end) {
        end -= 1;
    }
    folded[..end].to_string()
}

impl IndexKey for NameKey {
    const SIZE: usize = 2 + NAME_CAPACITY + 4;

    fn encode(&self, buf: &mut [u8]) {
        let bytes = self.name.as_bytes();
        LittleEndian::write_u16(&mut buf[0..2], bytes.len() as u16);
        buf[2..2 + bytes.len()].copy_from_slice(bytes);
        buf[2 + bytes.len()..2 + NAME_CAPACITY].fill(0);
        LittleEndian::write_u32(&mut buf[2 + NAME_CAPACITY..Self::SIZE], self.id);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let len = LittleEndian::read_u16(&buf[0..2]) as usize;
        if len > NAME_CAPACITY {
            return Err(Error::Corrupt(format!("name key length {len}")));
        }
        let name = std::str::from_utf8(&buf[2..2 + len])
            .map_err(|e| Error::Corrupt(format!("name key is not UTF-8: {e}")))?
            .to_string();
        let id = LittleEndian::read_u32(&buf[2 + NAME_CAPACITY..Self::SIZE]);
        Ok(Self { name, id })
    }

    fn group_start(&self) -> Self {
        Self { name: self.name.clone(), id: 0 }
    }

    fn in_group(&self, stored: &Self) -> bool {
        stored.name.starts_with(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_keys_order_by_primary_then_dependent() {
        let mut keys = vec![PairKey::new(2, 1), PairKey::new(1, 9), PairKey::new(1, 3)];
        keys.sort();
        assert_eq!(keys, vec![PairKey::new(1, 3), PairKey::new(1, 9), PairKey::new(2, 1)]);
        assert!(PairKey::group(1) < PairKey::new(1, 1));
    }

    #[test]
    fn name_keys_fold_case_and_accents() {
        let key = NameKey::new("  Ação Total ", 4);
        assert_eq!(key.name(), "acao total");
        assert!(NameKey::prefix("AÇÃ").unwrap().in_group(&key));
        assert!(!NameKey::prefix("total").unwrap().in_group(&key));
    }

    #[test]
    fn long_names_are_cut_on_a_char_boundary() {
        let long = "é".repeat(100);
        let key = NameKey::new(&long, 1);
        assert!(key.name().len() <= NAME_CAPACITY);
        let mut buf = vec![0u8; NameKey::SIZE];
        key.encode(&mut buf);
        assert_eq!(NameKey::decode(&buf).unwrap(), key);
    }

    #[test]
    fn overlong_prefixes_are_rejected() {
        let exact = "a".repeat(NAME_CAPACITY);
        assert!(NameKey::prefix(&exact).is_ok());
        let over = format!("{exact}b");
        assert!(matches!(NameKey::prefix(&over), Err(Error::InvalidArgument(_))));
        // each "Á" is two bytes raw but one once folded
        assert!(NameKey::prefix(&"Á".repeat(NAME_CAPACITY)).is_ok());
    }
}
