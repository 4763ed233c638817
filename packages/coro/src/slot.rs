/// Stable handle into a [`Slots`] collection.
///
/// A key stays valid until the entry it points to is removed. After that,
/// the index may be reused, but the generation will not match, so a stale
/// key can never reach the new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Generation-indexed slot collection with O(1) insert and removal
pub(crate) struct Slots<T> {
    entries: Vec<Entry<T>>,
    free: Option<u32>,
    len: usize,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slots<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, value: T) -> Key {
        self.len += 1;
        if let Some(index) = self.free {
            let entry = &mut self.entries[index as usize];
            let Entry::Vacant { generation, next_free } = *entry else {
                // the free list only ever links vacant entries
                unreachable!("free list points to an occupied slot");
            };
            // a stale key could only match again after 2^32 reuses of one slot
            let generation = generation.wrapping_add(1);
            self.free = next_free;
            *entry = Entry::Occupied { generation, value };
            return Key { index, generation };
        }
        debug_assert!(
            self.entries.len() < u32::MAX as usize,
            "more than u32::MAX live slots"
        );
        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        Key {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: Key) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let vacant = Entry::Vacant {
            generation: key.generation,
            next_free: self.free,
        };
        let Entry::Occupied { value, .. } = std::mem::replace(entry, vacant) else {
            return None;
        };
        self.free = Some(key.index);
        self.len -= 1;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_key_does_not_reach_reused_slot() {
        let mut slots = Slots::new();
        let a = slots.insert("a");
        assert_eq!(slots.remove(a), Some("a"));
        let b = slots.insert("b");
        assert_eq!(a.index, b.index, "index should be reused");
        assert_eq!(slots.get(a), None);
        assert_eq!(slots.remove(a), None);
        assert_eq!(slots.get(b), Some(&"b"));
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut slots = Slots::new();
        let a = slots.insert(1);
        let b = slots.insert(2);
        assert_eq!(slots.remove(a), Some(1));
        assert_eq!(slots.remove(a), None);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.get(b), Some(&2));
    }

    #[test]
    fn every_reuse_gets_a_new_generation() {
        let mut slots = Slots::new();
        let first = slots.insert(0);
        let mut previous = first;
        for i in 1..1000 {
            slots.remove(previous);
            let key = slots.insert(i);
            assert_eq!(key.index, first.index);
            assert_eq!(key.generation, previous.generation.wrapping_add(1));
            assert_eq!(slots.get(previous), None);
            previous = key;
        }
        assert_eq!(slots.get(first), None);
        assert_eq!(slots.get(previous), Some(&999));
    }
}
