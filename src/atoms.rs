//! The atom pool: an open-addressing weak-reference interner for
//! identifier/symbol byte strings (spec.md §4.2).

use once_cell::sync::OnceCell;

use crate::memory::Heap;
use crate::objects::atom::ObjectAtom;

const FNV_SEED: u64 = 0x3243_F6A8_885A_308D;
const FNV_MULTIPLIER: u64 = 0x0F0F_0F0F_0F0F_0F0F;

/// FNV-1a-64 with the seed/multiplier/finish spec.md §4.2 specifies.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV_SEED;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_MULTIPLIER);
    }
    hash ^ (hash >> 32)
}

struct GravestonePtr(*mut ObjectAtom);
unsafe impl Sync for GravestonePtr {}
unsafe impl Send for GravestonePtr {}

static GRAVESTONE: OnceCell<GravestonePtr> = OnceCell::new();

/// The single statically-allocated sentinel marking a deleted slot.
fn gravestone() -> *mut ObjectAtom {
    GRAVESTONE
        .get_or_init(|| {
            let mut atom = ObjectAtom::new(b"<deleted>", hash_bytes(b"<deleted>"));
            atom.object.marked = true;
            GravestonePtr(Box::into_raw(atom))
        })
        .0
}

fn is_gravestone(ptr: *mut ObjectAtom) -> bool {
    !ptr.is_null() && std::ptr::eq(ptr, gravestone())
}

/// Open-addressing hash set of `Atom` references, growing by +1 `exp`
/// each resize, triggered at 50% load (spec.md §4.2). Holds only weak
/// references: entries are never GC roots.
pub struct AtomPool {
    table: Vec<*mut ObjectAtom>,
    exp: u32,
    count: usize,
}

impl AtomPool {
    pub fn new() -> Self {
        AtomPool {
            table: Vec::new(),
            exp: 1,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        if self.table.is_empty() {
            0
        } else {
            1usize << self.exp
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn exp(&self) -> u32 {
        self.exp
    }

    fn probe(hash: u64, exp: u32, idx: u64) -> u64 {
        let mask = (1u64 << exp) - 1;
        let step = (hash >> (64 - exp)) | 1;
        idx.wrapping_add(step) & mask
    }

    fn grow(&mut self) {
        let new_exp = if self.exp < 3 { 3 } else { self.exp + 1 };
        let new_capacity = 1usize << new_exp;
        let mut new_table = vec![std::ptr::null_mut(); new_capacity];

        for &entry in &self.table {
            if entry.is_null() || is_gravestone(entry) {
                continue;
            }
            let hash = unsafe { (*entry).hash };
            let mut idx = hash;
            loop {
                idx = Self::probe(hash, new_exp, idx);
                if new_table[idx as usize].is_null() {
                    new_table[idx as usize] = entry;
                    break;
                }
            }
        }

        self.table = new_table;
        self.exp = new_exp;
    }

    /// Interns `bytes`, allocating a new `Atom` on the heap on first
    /// sight (so its size is tracked and it becomes eligible for
    /// collection). Returns the canonical atom pointer: byte-identical
    /// content always maps to the same identity.
    pub fn intern(&mut self, heap: &mut Heap, bytes: &[u8]) -> *mut ObjectAtom {
        if self.table.is_empty() || (self.count + 1) * 2 >= self.capacity() {
            self.grow();
        }

        let hash = hash_bytes(bytes);
        let mut idx = hash;
        let mut first_gravestone: Option<u64> = None;

        loop {
            idx = Self::probe(hash, self.exp, idx);
            let entry = self.table[idx as usize];

            if entry.is_null() {
                let slot = first_gravestone.unwrap_or(idx);
                let atom = heap.alloc_atom(bytes, hash);
                self.table[slot as usize] = atom;
                self.count += 1;
                return atom;
            }

            if is_gravestone(entry) {
                if first_gravestone.is_none() {
                    first_gravestone = Some(idx);
                }
                continue;
            }

            let candidate = unsafe { &*entry };
            if candidate.len() == bytes.len() && candidate.bytes.as_ref() == bytes {
                return entry;
            }
        }
    }

    /// Replaces every entry whose atom is not marked with the
    /// gravestone (spec.md §4.1 step 3). Called by the GC between
    /// trace and sweep.
    pub fn sweep_weak(&mut self) {
        for entry in self.table.iter_mut() {
            if entry.is_null() || is_gravestone(*entry) {
                continue;
            }
            let marked = unsafe { (**entry).object.marked };
            if !marked {
                *entry = gravestone();
            }
        }
    }

    #[cfg(test)]
    pub fn remove(&mut self, bytes: &[u8]) {
        let hash = hash_bytes(bytes);
        let mut idx = hash;
        loop {
            idx = Self::probe(hash, self.exp, idx);
            let entry = self.table[idx as usize];
            if entry.is_null() {
                return;
            }
            if is_gravestone(entry) {
                continue;
            }
            let candidate = unsafe { &*entry };
            if candidate.len() == bytes.len() && candidate.bytes.as_ref() == bytes {
                self.table[idx as usize] = gravestone();
                self.count -= 1;
                return;
            }
        }
    }

    #[cfg(test)]
    pub fn live_entries(&self) -> usize {
        self.table
            .iter()
            .filter(|&&p| !p.is_null() && !is_gravestone(p))
            .count()
    }
}

impl Default for AtomPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_canonical() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        let a = pool.intern(&mut heap, b"hello");
        let b = pool.intern(&mut heap, b"hello");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn distinct_content_has_distinct_identity() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        let a = pool.intern(&mut heap, b"foo");
        let b = pool.intern(&mut heap, b"bar");
        assert!(!std::ptr::eq(a, b));
    }

    #[test]
    fn count_tracks_distinct_strings() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        for s in ["a", "b", "c", "d", "e"] {
            pool.intern(&mut heap, s.as_bytes());
        }
        // re-intern shouldn't change count
        pool.intern(&mut heap, b"a");
        assert_eq!(pool.count(), 5);
        assert_eq!(pool.live_entries(), 5);
    }

    #[test]
    fn remove_then_reintern_preserves_identity_count() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        let names = ["alpha", "beta", "gamma", "delta"];
        for n in names {
            pool.intern(&mut heap, n.as_bytes());
        }
        for n in names {
            pool.remove(n.as_bytes());
        }
        assert_eq!(pool.count(), 0);
        let exp_before = pool.exp();
        for n in names {
            pool.intern(&mut heap, n.as_bytes());
        }
        assert_eq!(pool.count(), names.len());
        assert_eq!(pool.exp(), exp_before);
    }

    proptest::proptest! {
        #[test]
        fn interning_any_bytes_twice_is_canonical(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..64)) {
            let mut heap = Heap::new();
            let mut pool = AtomPool::new();
            let a = pool.intern(&mut heap, &bytes);
            let b = pool.intern(&mut heap, &bytes);
            proptest::prop_assert!(std::ptr::eq(a, b));
        }
    }
}
