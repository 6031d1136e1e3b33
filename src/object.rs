//! Heap object header (spec.md §3 "Heap Object header").

use std::mem::size_of;

/// Discriminant for the five heap object kinds the core needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Atom,
    Closure,
    Lambda,
    Upvalue,
    Pair,
}

/// Every heap object starts with this header: its kind, the GC's
/// mark bit, and the intrusive forward link threading it into the
/// runtime's single object list.
#[repr(C)]
pub struct Object {
    pub obj_type: ObjectType,
    pub marked: bool,
    pub next: *mut Object,
}

impl Object {
    pub fn new(obj_type: ObjectType) -> Self {
        Object {
            obj_type,
            marked: false,
            next: std::ptr::null_mut(),
        }
    }

    pub fn shallow_size(&self) -> usize {
        size_of::<Object>()
    }
}

/// Heap usage accounting, mirrored per kind so the memory manager's
/// `bytes_allocated` reflects what the allocator would actually have
/// to account for (struct layout plus any owned heap buffers).
pub trait GcSize {
    fn deep_size(&self) -> usize;
}

/// Dispatches to the concrete object behind a header pointer. Safety:
/// caller guarantees `ptr` is a live object whose `obj_type` matches
/// its actual layout (true for every pointer the runtime hands out).
pub unsafe fn deep_size_of(ptr: *mut Object) -> usize {
    use crate::objects::{atom::ObjectAtom, closure::ObjectClosure, lambda::ObjectLambda, pair::ObjectPair, upvalue::ObjectUpvalue};
    match (*ptr).obj_type {
        ObjectType::Atom => (*(ptr as *const ObjectAtom)).deep_size(),
        ObjectType::Lambda => (*(ptr as *const ObjectLambda)).deep_size(),
        ObjectType::Closure => (*(ptr as *const ObjectClosure)).deep_size(),
        ObjectType::Upvalue => (*(ptr as *const ObjectUpvalue)).deep_size(),
        ObjectType::Pair => (*(ptr as *const ObjectPair)).deep_size(),
    }
}

/// Frees the concrete object behind a header pointer, running its
/// kind-specific destructor (releasing any kind-owned arrays first, as
/// spec.md §4.1 step 4 requires). Safety: `ptr` must have been
/// allocated by the matching `objects::*::new` constructor and not yet
/// freed.
pub unsafe fn drop_object(ptr: *mut Object) {
    use crate::objects::{atom::ObjectAtom, closure::ObjectClosure, lambda::ObjectLambda, pair::ObjectPair, upvalue::ObjectUpvalue};
    match (*ptr).obj_type {
        ObjectType::Atom => drop(Box::from_raw(ptr as *mut ObjectAtom)),
        ObjectType::Lambda => drop(Box::from_raw(ptr as *mut ObjectLambda)),
        ObjectType::Closure => drop(Box::from_raw(ptr as *mut ObjectClosure)),
        ObjectType::Upvalue => drop(Box::from_raw(ptr as *mut ObjectUpvalue)),
        ObjectType::Pair => drop(Box::from_raw(ptr as *mut ObjectPair)),
    }
}
