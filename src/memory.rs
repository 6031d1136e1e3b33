//! The size-tracking allocator and intrusive object list (spec.md §4.1).

use log::debug;

use crate::object::{deep_size_of, drop_object, Object};
use crate::objects::atom::ObjectAtom;
use crate::objects::closure::ObjectClosure;
use crate::objects::lambda::ObjectLambda;
use crate::objects::pair::ObjectPair;
use crate::objects::upvalue::ObjectUpvalue;
use crate::value::Value;

/// Growth factor applied to `next_gc` after each collection
/// (spec.md §4.1 step 5).
const GROWTH_FACTOR: usize = 2;
/// Floor under which `next_gc` never shrinks, so a heap that just
/// collected down to near-zero bytes doesn't immediately re-trigger.
const MIN_NEXT_GC: usize = 1 << 10;
const INITIAL_NEXT_GC: usize = 1 << 14;

/// Owns every live heap object via a single intrusive list (threaded
/// through `Object::next`), plus the size accounting that drives the
/// collector's trigger policy.
pub struct Heap {
    head: *mut Object,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    /// Forces a collection on every allocation (the "build-time debug
    /// flag" spec.md §4.1 mentions); wired to the `gc_debug` feature
    /// but also toggleable at runtime for tests.
    pub stress: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            head: std::ptr::null_mut(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress: cfg!(feature = "gc_debug"),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    pub fn head(&self) -> *mut Object {
        self.head
    }

    /// Links `obj` into the runtime object list and records its size.
    /// Constructors call this immediately after allocating so a
    /// partially-initialized object is still reachable by the
    /// collector (spec.md §5).
    fn register(&mut self, obj: *mut Object, size: usize) {
        unsafe {
            (*obj).next = self.head;
        }
        self.head = obj;
        self.bytes_allocated += size;
    }

    pub fn alloc_atom(&mut self, bytes: &[u8], hash: u64) -> *mut ObjectAtom {
        let ptr = Box::into_raw(ObjectAtom::new(bytes, hash));
        let size = unsafe { deep_size_of(ptr as *mut Object) };
        self.register(ptr as *mut Object, size);
        ptr
    }

    pub fn alloc_lambda(&mut self) -> *mut ObjectLambda {
        let ptr = Box::into_raw(ObjectLambda::new());
        let size = unsafe { deep_size_of(ptr as *mut Object) };
        self.register(ptr as *mut Object, size);
        ptr
    }

    pub fn alloc_closure(&mut self, lambda: *mut ObjectLambda, upvalue_count: usize) -> *mut ObjectClosure {
        let ptr = Box::into_raw(ObjectClosure::new(lambda, upvalue_count));
        let size = unsafe { deep_size_of(ptr as *mut Object) };
        self.register(ptr as *mut Object, size);
        ptr
    }

    pub fn alloc_native_closure(&mut self, native: crate::objects::closure::NativeFn) -> *mut ObjectClosure {
        let ptr = Box::into_raw(ObjectClosure::new_native(native));
        let size = unsafe { deep_size_of(ptr as *mut Object) };
        self.register(ptr as *mut Object, size);
        ptr
    }

    pub fn alloc_upvalue(&mut self, location: *mut Value) -> *mut ObjectUpvalue {
        let ptr = Box::into_raw(ObjectUpvalue::new(location));
        let size = unsafe { deep_size_of(ptr as *mut Object) };
        self.register(ptr as *mut Object, size);
        ptr
    }

    pub fn alloc_pair(&mut self, car: Value, cdr: Value) -> *mut ObjectPair {
        let ptr = Box::into_raw(ObjectPair::new(car, cdr));
        let size = unsafe { deep_size_of(ptr as *mut Object) };
        self.register(ptr as *mut Object, size);
        ptr
    }

    /// Walks the intrusive list; unmarked objects are unlinked and
    /// freed (kind-specific destructor first), marked objects have
    /// their bit cleared (spec.md §4.1 step 4). Returns
    /// `(objects_freed, bytes_freed)`.
    pub fn sweep(&mut self) -> (usize, usize) {
        let mut prev: *mut Object = std::ptr::null_mut();
        let mut current = self.head;
        let mut freed_bytes = 0;
        let mut freed_count = 0;

        while !current.is_null() {
            unsafe {
                let next = (*current).next;
                if (*current).marked {
                    (*current).marked = false;
                    prev = current;
                } else {
                    let size = deep_size_of(current);
                    if prev.is_null() {
                        self.head = next;
                    } else {
                        (*prev).next = next;
                    }
                    drop_object(current);
                    freed_bytes += size;
                    freed_count += 1;
                }
                current = next;
            }
        }

        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed_bytes);
        self.next_gc = (self.bytes_allocated * GROWTH_FACTOR).max(MIN_NEXT_GC);
        debug!(
            "gc sweep: freed {freed_count} objects ({freed_bytes} bytes), {} bytes live, next_gc={}",
            self.bytes_allocated, self.next_gc
        );
        (freed_count, freed_bytes)
    }

    /// Frees every remaining object unconditionally; used at
    /// interpreter teardown (spec.md §5: GC runs once at shutdown to
    /// free every remaining object before tables/arrays are released).
    pub fn free_all(&mut self) {
        let mut current = self.head;
        while !current.is_null() {
            unsafe {
                let next = (*current).next;
                drop_object(current);
                current = next;
            }
        }
        self.head = std::ptr::null_mut();
        self.bytes_allocated = 0;
    }

    pub fn live_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while !current.is_null() {
            count += 1;
            current = unsafe { (*current).next };
        }
        count
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.free_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_tracks_bytes_and_registers_into_list() {
        let mut heap = Heap::new();
        heap.alloc_pair(Value::Nil, Value::Nil);
        assert!(heap.bytes_allocated > 0);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn sweep_frees_unmarked_and_keeps_marked() {
        let mut heap = Heap::new();
        let kept = heap.alloc_pair(Value::Nil, Value::Nil);
        heap.alloc_pair(Value::Nil, Value::Nil);
        unsafe {
            (*(kept as *mut Object)).marked = true;
        }
        let (freed, _) = heap.sweep();
        assert_eq!(freed, 1);
        assert_eq!(heap.live_count(), 1);
    }
}
