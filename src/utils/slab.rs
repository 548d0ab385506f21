//! Generational slab backing task storage.
//!
//! Slots are recycled through a free list; every reuse bumps the slot's
//! generation so a stale [`Key`] never resolves to a newer occupant.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Slab<T> {
    items: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, item: T) -> Key {
        self.insert_with(|_| item)
    }

    /// Inserts a value that needs to know its own key.
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(Key) -> T) -> Key {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            self.items.push(Slot {
                generation: 0,
                value: None,
            });
            self.items.len() - 1
        };

        let slot = &mut self.items[index];
        slot.generation = slot.generation.wrapping_add(1);
        let key = Key {
            index: index as u32,
            generation: slot.generation,
        };
        slot.value = Some(make(key));
        self.len += 1;

        key
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.items.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }

        let item = slot.value.take()?;
        self.free.push(key.index as usize);
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        self.items
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.items
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_key_does_not_alias_reused_slot() {
        let mut slab = Slab::new();
        let first = slab.insert("first");
        assert_eq!(slab.remove(first), Some("first"));

        let second = slab.insert("second");
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
        assert!(slab.get(first).is_none());
        assert_eq!(slab.get(second), Some(&"second"));
        assert_eq!(slab.remove(first), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_insert_grows_and_tracks_len() {
        let mut slab = Slab::new();
        let keys: Vec<_> = (0..10).map(|i| slab.insert(i)).collect();
        assert_eq!(slab.len(), 10);

        for key in &keys[..5] {
            slab.remove(*key);
        }
        assert_eq!(slab.len(), 5);
        assert_eq!(slab.get(keys[7]), Some(&7));

        if let Some(v) = slab.get_mut(keys[9]) {
            *v = 90;
        }
        assert_eq!(slab.get(keys[9]), Some(&90));
    }

    #[test]
    fn test_insert_with_sees_its_own_key() {
        let mut slab = Slab::new();
        slab.insert(0u32);
        let key = slab.insert_with(|key| key.index);

        assert_eq!(slab.get(key), Some(&1));
    }
}
