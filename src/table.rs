//! The globals table: an open-addressing hash map from interned atom
//! to `Value` (spec.md §4.3).

use crate::object::Object;
use crate::objects::atom::ObjectAtom;
use crate::value::Value;

const LOAD_FACTOR: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: *mut ObjectAtom,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: std::ptr::null_mut(),
            value: Value::Nil,
        }
    }
}

/// "Empty, never used" is `(null key, Nil value)`; "deleted" is
/// `(null key, any non-Nil value)` — the tombstone.
fn is_tombstone(entry: &Entry) -> bool {
    entry.key.is_null() && !entry.value.is_nil()
}

pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones (mirrors the classic clox
    /// accounting so tombstone buildup still triggers a resize).
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Entry], capacity: usize, key: *mut ObjectAtom) -> usize {
        let hash = unsafe { (*key).hash };
        let mut index = (hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.key.is_null() {
                if entry.value.is_nil() {
                    return first_tombstone.unwrap_or(index);
                } else if first_tombstone.is_none() {
                    first_tombstone = Some(index);
                }
            } else if std::ptr::eq(entry.key, key) {
                return index;
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { 8 } else { self.entries.len() * 2 };
        let mut new_entries = vec![Entry::empty(); new_capacity];
        let mut live = 0;
        for entry in &self.entries {
            if entry.key.is_null() {
                continue;
            }
            let index = Self::find_entry(&new_entries, new_capacity, entry.key);
            new_entries[index] = *entry;
            live += 1;
        }
        self.entries = new_entries;
        self.count = live;
    }

    /// Binds `key` to `value`; returns whether this created a brand
    /// new key (not merely overwriting an existing one or reusing a
    /// tombstone).
    pub fn set(&mut self, key: *mut ObjectAtom, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * LOAD_FACTOR {
            self.grow();
        }

        let index = Self::find_entry(&self.entries, self.capacity(), key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_null();
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: *mut ObjectAtom) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        let entry = &self.entries[index];
        if entry.key.is_null() {
            None
        } else {
            Some(entry.value)
        }
    }

    pub fn delete(&mut self, key: *mut ObjectAtom) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }
        entry.key = std::ptr::null_mut();
        entry.value = Value::Num(0.0); // tombstone marker; payload unused.
        true
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.key.is_null()).count()
    }

    /// Traces every present key and value (spec.md §3 root list, item 4).
    pub fn mark(&self, mut mark_object: impl FnMut(*mut Object), mut mark_value: impl FnMut(&Value)) {
        for entry in &self.entries {
            if entry.key.is_null() || is_tombstone(entry) {
                continue;
            }
            mark_object(entry.key as *mut Object);
            mark_value(&entry.value);
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::atom::ObjectAtom;

    fn leak_atom(s: &str) -> *mut ObjectAtom {
        Box::into_raw(ObjectAtom::new(s.as_bytes(), crate::atoms::hash_bytes(s.as_bytes())))
    }

    #[test]
    fn set_reports_new_vs_existing_key() {
        let mut table = Table::new();
        let key = leak_atom("x");
        assert!(table.set(key, Value::Num(1.0)));
        assert!(!table.set(key, Value::Num(2.0)));
        assert_eq!(table.get(key), Some(Value::Num(2.0)));
    }

    #[test]
    fn delete_then_get_returns_none_but_key_stays_findable_empty() {
        let mut table = Table::new();
        let key = leak_atom("y");
        table.set(key, Value::Num(5.0));
        assert!(table.delete(key));
        assert_eq!(table.get(key), None);
        assert!(!table.delete(key));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = Table::new();
        for i in 0..20 {
            let key = leak_atom(&format!("k{i}"));
            table.set(key, Value::Num(i as f64));
        }
        assert_eq!(table.len(), 20);
    }
}
