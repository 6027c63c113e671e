use crate::entity::{Entity, EntityData, EntityPayload, Uid};
use crate::error::{DocFlowError, Result};
use std::collections::HashMap;

/// Arena of boxed entities addressed by uid.
///
/// Slots are never reused or compacted: removing an entity leaves a tombstone,
/// so the index behind every other uid (and the box it points at) is stable
/// for the life of the store.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    slots: Vec<Option<Box<Entity>>>,
    lookup: HashMap<Uid, usize>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Stores `entity`. An entity already stored under the same uid is
    /// overwritten inside its existing box, so its address does not change.
    pub fn insert(&mut self, entity: Entity) -> Uid {
        let uid = entity.uid();
        let existing = self.lookup.get(&uid).copied();
        if let Some(slot) = existing.and_then(|slot| self.slots.get_mut(slot)) {
            match slot.as_deref_mut() {
                Some(stored) => *stored = entity,
                None => *slot = Some(Box::new(entity)),
            }
            return uid;
        }
        self.lookup.insert(uid, self.slots.len());
        self.slots.push(Some(Box::new(entity)));
        uid
    }

    /// Builds an entity around `data` and stores it.
    pub fn insert_new(&mut self, data: impl Into<EntityData>) -> Uid {
        self.insert(Entity::new(data))
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.lookup.contains_key(&uid)
    }

    pub fn get(&self, uid: Uid) -> Option<&Entity> {
        let slot = *self.lookup.get(&uid)?;
        self.slots.get(slot)?.as_deref()
    }

    pub fn get_mut(&mut self, uid: Uid) -> Option<&mut Entity> {
        let slot = *self.lookup.get(&uid)?;
        self.slots.get_mut(slot)?.as_deref_mut()
    }

    pub fn lookup(&self, uid: Uid) -> Result<&Entity> {
        self.get(uid).ok_or(DocFlowError::EntityNotFound(uid))
    }

    pub fn lookup_mut(&mut self, uid: Uid) -> Result<&mut Entity> {
        self.get_mut(uid).ok_or(DocFlowError::EntityNotFound(uid))
    }

    pub fn lookup_as<T: EntityPayload>(&self, uid: Uid) -> Result<&T> {
        let entity = self.lookup(uid)?;
        let found = entity.kind();
        entity.payload::<T>().ok_or(DocFlowError::KindMismatch {
            uid,
            expected: T::KIND,
            found,
        })
    }

    pub fn lookup_as_mut<T: EntityPayload>(&mut self, uid: Uid) -> Result<&mut T> {
        let entity = self.lookup_mut(uid)?;
        let found = entity.kind();
        entity.payload_mut::<T>().ok_or(DocFlowError::KindMismatch {
            uid,
            expected: T::KIND,
            found,
        })
    }

    pub fn remove(&mut self, uid: Uid) -> Option<Entity> {
        let slot = self.lookup.remove(&uid)?;
        self.slots.get_mut(slot)?.take().map(|boxed| *boxed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.slots.iter_mut().filter_map(|slot| slot.as_deref_mut())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.lookup.clear();
    }
}
