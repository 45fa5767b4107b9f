// File: src/table.rs
//
// Open-addressing hash table, keyed by interned strings. Linear probing,
// tombstones, max load factor 0.75. This is the same structure used for
// globals, class method tables, instance field tables, and the string
// intern table itself.

use crate::object::{fnv1a_hash, GcRef, Obj};
use crate::value::{values_equal, Value};

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<GcRef<Obj>>,
    value: Value,
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize, // live entries + tombstones
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Finds the entry this key belongs in: an existing match, the first
    /// tombstone seen along the probe sequence, or the first empty slot.
    fn find_entry(entries: &[Entry], capacity: usize, key: GcRef<Obj>) -> usize {
        let mut index = (string_hash(key) as usize) % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if matches!(entry.value, Value::Null) {
                        return tombstone.unwrap_or(index);
                    } else if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k.as_ptr() == key.as_ptr() => return index,
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry { key: None, value: Value::Null }; capacity];
        let mut new_count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let dest = Self::find_entry(&entries, capacity, key);
                entries[dest] = Entry { key: Some(key), value: entry.value };
                new_count += 1;
            }
        }
        self.entries = entries;
        self.count = new_count;
    }

    pub fn get(&self, key: GcRef<Obj>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        self.entries[index].key.map(|_| self.entries[index].value)
    }

    /// Inserts or overwrites. Returns `true` if this created a new key.
    pub fn set(&mut self, key: GcRef<Obj>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let new_cap = if self.capacity() < 8 { 8 } else { self.capacity() * 2 };
            self.adjust_capacity(new_cap);
        }

        let index = Self::find_entry(&self.entries, self.capacity(), key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        if is_new_key && matches!(entry.value, Value::Null) {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn delete(&mut self, key: GcRef<Obj>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry { key: None, value: Value::Bool(true) };
        true
    }

    pub fn add_all(&mut self, from: &Table) {
        for entry in &from.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Used for intern lookups: finds a key matching raw bytes without
    /// already holding a `GcRef` to compare against.
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<GcRef<Obj>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) % capacity;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if matches!(entry.value, Value::Null) {
                        return None;
                    }
                }
                Some(key) => {
                    let s = key.as_string().expect("intern table key is always a string");
                    if s.hash == hash && s.bytes.len() == bytes.len() && &*s.bytes == bytes {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Drops entries whose key object did not survive the last mark phase.
    /// Must run before `Heap::sweep` frees the unmarked keys.
    pub fn remove_white(&mut self) {
        let doomed: Vec<GcRef<Obj>> = self
            .entries
            .iter()
            .filter_map(|e| e.key)
            .filter(|k| !k.marked.get())
            .collect();
        for key in doomed {
            self.delete(key);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef<Obj>, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

fn string_hash(key: GcRef<Obj>) -> u32 {
    key.as_string().expect("table keys are always interned strings").hash
}

/// Exposed for anything that wants to hash raw bytes the same way strings
/// are hashed on construction (e.g. the heap's intern lookup).
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    fnv1a_hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn set_then_get_round_trips() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.copy_string(b"x");
        assert!(table.set(key, Value::Number(42.0)));
        assert_eq!(table.get(key).unwrap().as_number(), Some(42.0));
    }

    #[test]
    fn delete_leaves_a_tombstone_that_does_not_break_further_probes() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let a = heap.copy_string(b"a");
        let b = heap.copy_string(b"b");
        table.set(a, Value::Number(1.0));
        table.set(b, Value::Number(2.0));
        assert!(table.delete(a));
        assert!(table.get(b).is_some());
        assert!(table.get(a).is_none());
    }

    #[test]
    fn rehash_preserves_every_live_entry() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..64 {
            let k = heap.copy_string(format!("k{i}").as_bytes());
            table.set(k, Value::Number(i as f64));
            keys.push(k);
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(*k).unwrap().as_number(), Some(i as f64));
        }
    }
}
