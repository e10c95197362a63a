//! A record store plus the secondary indexes kept in step with it.
//!
//! Each index is driven by an [`IndexMaintainer`]: the collection asks every
//! maintainer to validate a mutation, performs it on the store, then lets each
//! maintainer update its index. Indexes are shared handles so callers can
//! query them directly.

use crate::btree::{NameKey, OrderedIndex, PairKey};
use crate::error::{Error, Result};
use crate::search::SearchEngine;
use crate::store::{Record, RecordStore};
use crate::RecordId;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Existence check used to validate references between collections.
pub trait Exists {
    fn exists(&self, id: RecordId) -> bool;
}

impl<E: Exists> Exists for Mutex<E> {
    fn exists(&self, id: RecordId) -> bool {
        self.lock().exists(id)
    }
}

pub trait IndexMaintainer<T>: Send {
    fn validate_create(&self, _record: &T) -> Result<()> {
        Ok(())
    }

    fn validate_update(&self, _old: &T, new: &T) -> Result<()> {
        self.validate_create(new)
    }

    fn validate_delete(&self, _record: &T) -> Result<()> {
        Ok(())
    }

    fn on_create(&mut self, record: &T) -> Result<()>;
    fn on_update(&mut self, old: &T, new: &T) -> Result<()>;
    fn on_delete(&mut self, record: &T) -> Result<()>;
}

pub struct Collection<T> {
    store: RecordStore<T>,
    maintainers: Vec<Box<dyn IndexMaintainer<T>>>,
}

impl<T: Record> Collection<T> {
    pub fn new(store: RecordStore<T>) -> Self {
        Self { store, maintainers: Vec::new() }
    }

    pub fn with(mut self, maintainer: impl IndexMaintainer<T> + 'static) -> Self {
        self.maintainers.push(Box::new(maintainer));
        self
    }

    pub fn create(&mut self, record: &mut T) -> Result<RecordId> {
        for m in &self.maintainers {
            m.validate_create(record)?;
        }
        let id = self.store.create(record)?;
        for m in &mut self.maintainers {
            m.on_create(record)?;
        }
        Ok(id)
    }

    pub fn read(&self, id: RecordId) -> Result<T> {
        self.store.read(id)
    }

    pub fn update(&mut self, record: &T) -> Result<()> {
        let old = self.store.read(record.id())?;
        for m in &self.maintainers {
            m.validate_update(&old, record)?;
        }
        self.store.update(record)?;
        for m in &mut self.maintainers {
            m.on_update(&old, record)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, id: RecordId) -> Result<()> {
        let old = self.store.read(id)?;
        for m in &self.maintainers {
            m.validate_delete(&old)?;
        }
        self.store.delete(id)?;
        for m in &mut self.maintainers {
            m.on_delete(&old)?;
        }
        Ok(())
    }

    pub fn store(&self) -> &RecordStore<T> {
        &self.store
    }
}

impl<T: Record> Exists for Collection<T> {
    fn exists(&self, id: RecordId) -> bool {
        self.store.contains(id)
    }
}

type Field<T, V> = Box<dyn Fn(&T) -> V + Send>;

/// Keeps a name → id B+Tree in step with a string field.
pub struct NameIndex<T> {
    index: Shared<OrderedIndex<NameKey>>,
    name: Field<T, String>,
}

impl<T> NameIndex<T> {
    pub fn new(index: Shared<OrderedIndex<NameKey>>, name: impl Fn(&T) -> String + Send + 'static) -> Self {
        Self { index, name: Box::new(name) }
    }
}

impl<T: Record> IndexMaintainer<T> for NameIndex<T> {
    fn on_create(&mut self, record: &T) -> Result<()> {
        self.index.lock().create(NameKey::new(&(self.name)(record), record.id()))?;
        Ok(())
    }

    fn on_update(&mut self, old: &T, new: &T) -> Result<()> {
        let (before, after) = ((self.name)(old), (self.name)(new));
        if before != after {
            let mut index = self.index.lock();
            index.delete(&NameKey::new(&before, old.id()))?;
            index.create(NameKey::new(&after, new.id()))?;
        }
        Ok(())
    }

    fn on_delete(&mut self, record: &T) -> Result<()> {
        self.index.lock().delete(&NameKey::new(&(self.name)(record), record.id()))
    }
}

/// Keeps a (parent id, record id) B+Tree in step with a foreign-key field,
/// optionally refusing records whose parent does not exist.
pub struct ForeignKeyIndex<T> {
    index: Shared<OrderedIndex<PairKey>>,
    parent_of: Field<T, RecordId>,
    parents: Option<Arc<dyn Exists + Send + Sync>>,
}

impl<T> ForeignKeyIndex<T> {
    pub fn new(index: Shared<OrderedIndex<PairKey>>, parent_of: impl Fn(&T) -> RecordId + Send + 'static) -> Self {
        Self { index, parent_of: Box::new(parent_of), parents: None }
    }

    pub fn checked_against(mut self, parents: Arc<dyn Exists + Send + Sync>) -> Self {
        self.parents = Some(parents);
        self
    }
}

impl<T: Record> IndexMaintainer<T> for ForeignKeyIndex<T> {
    fn validate_create(&self, record: &T) -> Result<()> {
        let parent = (self.parent_of)(record);
        match &self.parents {
            Some(parents) if !parents.exists(parent) => {
                Err(Error::InvalidArgument(format!("referenced record {parent} does not exist")))
            }
            _ => Ok(()),
        }
    }

    fn on_create(&mut self, record: &T) -> Result<()> {
        self.index.lock().create(PairKey::new((self.parent_of)(record), record.id()))?;
        Ok(())
    }

    fn on_update(&mut self, old: &T, new: &T) -> Result<()> {
        let (before, after) = ((self.parent_of)(old), (self.parent_of)(new));
        if before != after {
            let mut index = self.index.lock();
            index.delete(&PairKey::new(before, old.id()))?;
            index.create(PairKey::new(after, new.id()))?;
        }
        Ok(())
    }

    fn on_delete(&mut self, record: &T) -> Result<()> {
        self.index.lock().delete(&PairKey::new((self.parent_of)(record), record.id()))
    }
}

/// Keeps a search engine in step with a text field.
pub struct TextIndex<T> {
    engine: Shared<SearchEngine>,
    text: Field<T, String>,
}

impl<T> TextIndex<T> {
    pub fn new(engine: Shared<SearchEngine>, text: impl Fn(&T) -> String + Send + 'static) -> Self {
        Self { engine, text: Box::new(text) }
    }
}

impl<T: Record> IndexMaintainer<T> for TextIndex<T> {
    fn on_create(&mut self, record: &T) -> Result<()> {
        self.engine.lock().index_document(record.id(), &(self.text)(record))
    }

    fn on_update(&mut self, old: &T, new: &T) -> Result<()> {
        let (before, after) = ((self.text)(old), (self.text)(new));
        if before != after {
            self.engine.lock().rename_document(new.id(), &before, &after)?;
        }
        Ok(())
    }

    fn on_delete(&mut self, record: &T) -> Result<()> {
        self.engine.lock().remove_document(record.id(), &(self.text)(record))
    }
}

/// Refuses to delete a record while a pair index still lists dependents of it.
pub struct RestrictDelete {
    dependents: Shared<OrderedIndex<PairKey>>,
}

impl RestrictDelete {
    pub fn new(dependents: Shared<OrderedIndex<PairKey>>) -> Self {
        Self { dependents }
    }
}

impl<T: Record> IndexMaintainer<T> for RestrictDelete {
    fn validate_delete(&self, record: &T) -> Result<()> {
        if self.dependents.lock().read(&PairKey::group(record.id()))?.is_empty() {
            Ok(())
        } else {
            Err(Error::ReferentialIntegrity(record.id()))
        }
    }

    fn on_create(&mut self, _record: &T) -> Result<()> {
        Ok(())
    }

    fn on_update(&mut self, _old: &T, _new: &T) -> Result<()> {
        Ok(())
    }

    fn on_delete(&mut self, _record: &T) -> Result<()> {
        Ok(())
    }
}
