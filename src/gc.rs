//! Tracing mark phase shared by compile-time and run-time collections
//! (spec.md §3 "Garbage collector", §4.1).
//!
//! The mark bit on `Object` doubles as gray/black: pushing an unmarked
//! object onto the gray stack and setting its bit is "white → gray";
//! popping it and tracing its referents is "gray → black". Callers own
//! their own root enumeration (the compiler's in-progress frames look
//! nothing like the VM's stack+frames), so this module only provides
//! the primitives, not a fixed `mark_roots` entry point.

use log::trace;

use crate::atoms::AtomPool;
use crate::memory::Heap;
use crate::object::{Object, ObjectType};
use crate::objects::closure::ObjectClosure;
use crate::objects::lambda::ObjectLambda;
use crate::objects::pair::ObjectPair;
use crate::objects::upvalue::ObjectUpvalue;
use crate::value::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

/// One mark-phase session: a gray worklist plus the two entry points
/// callers use to seed roots.
pub struct Gc {
    gray: Vec<*mut Object>,
}

impl Gc {
    pub fn new() -> Self {
        Gc { gray: Vec::new() }
    }

    pub fn mark_object(&mut self, obj: *mut Object) {
        if obj.is_null() {
            return;
        }
        unsafe {
            if (*obj).marked {
                return;
            }
            (*obj).marked = true;
        }
        self.gray.push(obj);
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Obj(obj) = value {
            self.mark_object(*obj);
        }
    }

    /// Drains the gray stack, blackening each object by marking its
    /// own referents in turn.
    pub fn trace(&mut self) {
        while let Some(obj) = self.gray.pop() {
            unsafe { self.blacken(obj) };
        }
    }

    /// Safety: `obj` must be a live, fully-initialized heap object.
    unsafe fn blacken(&mut self, obj: *mut Object) {
        match (*obj).obj_type {
            ObjectType::Atom => {}
            ObjectType::Lambda => {
                let lambda = &*(obj as *const ObjectLambda);
                for constant in &lambda.chunk.constants {
                    self.mark_value(constant);
                }
            }
            ObjectType::Closure => {
                let closure = &*(obj as *const ObjectClosure);
                self.mark_object(closure.lambda as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::Upvalue => {
                let upvalue = &*(obj as *const ObjectUpvalue);
                if !upvalue.location.is_null() {
                    self.mark_value(&*upvalue.location);
                }
                self.mark_value(&upvalue.closed);
            }
            ObjectType::Pair => {
                let pair = &*(obj as *const ObjectPair);
                self.mark_value(&pair.car);
                self.mark_value(&pair.cdr);
            }
        }
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the weak-pool sweep and the heap sweep once every root has
/// already been marked and traced by the caller. Split out from `Gc`
/// itself since it needs mutable access to structures `Gc` doesn't own.
pub fn sweep(heap: &mut Heap, atom_pool: &mut AtomPool) -> GcStats {
    atom_pool.sweep_weak();
    let (objects_freed, bytes_freed) = heap.sweep();
    trace!("gc: {objects_freed} objects collected, {bytes_freed} bytes reclaimed, atom pool now {} live", atom_pool.count());
    GcStats { objects_freed, bytes_freed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::pair::ObjectPair;

    #[test]
    fn unreachable_pair_is_collected() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        heap.alloc_pair(Value::Nil, Value::Nil);

        let mut gc = Gc::new();
        gc.trace();
        let stats = sweep(&mut heap, &mut pool);
        assert_eq!(stats.objects_freed, 1);
    }

    #[test]
    fn reachable_pair_chain_survives() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        let inner = heap.alloc_pair(Value::Num(1.0), Value::Nil);
        let outer = heap.alloc_pair(Value::Obj(inner as *mut Object), Value::Nil);

        let mut gc = Gc::new();
        gc.mark_object(outer as *mut Object);
        gc.trace();
        let stats = sweep(&mut heap, &mut pool);
        assert_eq!(stats.objects_freed, 0);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn upvalue_traces_through_open_location() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        let pair = heap.alloc_pair(Value::Num(9.0), Value::Nil);
        let mut slot = Value::Obj(pair as *mut Object);
        let upvalue = heap.alloc_upvalue(&mut slot as *mut Value);

        let mut gc = Gc::new();
        gc.mark_object(upvalue as *mut Object);
        gc.trace();
        let stats = sweep(&mut heap, &mut pool);
        assert_eq!(stats.objects_freed, 0);
    }

    #[test]
    fn gc_marks_dead_atoms_as_gravestones() {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        pool.intern(&mut heap, b"dangling");

        // No roots marked, so the atom's backing object is unreachable
        // and the weak pool entry becomes a gravestone.
        sweep(&mut heap, &mut pool);
        assert_eq!(pool.live_entries(), 0);
    }
}
