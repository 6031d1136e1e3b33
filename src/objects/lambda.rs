use std::mem::size_of;

use crate::chunk::Chunk;
use crate::object::{GcSize, Object, ObjectType};

/// A compiled lambda: its arity/param-list shape and the bytecode
/// chunk the compiler produced for its body (spec.md §3 "Lambda").
/// Immutable once the compiler finishes with it.
#[repr(C)]
pub struct ObjectLambda {
    pub object: Object,
    pub arity: i32,
    pub upvalue_count: i32,
    pub has_param_list: bool,
    pub chunk: Chunk,
}

impl ObjectLambda {
    pub fn new() -> Box<Self> {
        Box::new(ObjectLambda {
            object: Object::new(ObjectType::Lambda),
            arity: 0,
            upvalue_count: 0,
            has_param_list: false,
            chunk: Chunk::new(),
        })
    }
}

impl GcSize for ObjectLambda {
    fn deep_size(&self) -> usize {
        self.object.shallow_size() + size_of::<Self>() + self.chunk.deep_size()
    }
}
