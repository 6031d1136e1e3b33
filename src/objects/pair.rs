use std::mem::size_of;

use crate::object::{GcSize, Object, ObjectType};
use crate::value::Value;

/// The sole list-construction primitive: a cons cell (spec.md §3
/// "Pair"). Created by `OP_CONS`, quoted-list expansion, and variadic
/// argument collection.
#[repr(C)]
pub struct ObjectPair {
    pub object: Object,
    pub car: Value,
    pub cdr: Value,
}

impl ObjectPair {
    pub fn new(car: Value, cdr: Value) -> Box<Self> {
        Box::new(ObjectPair {
            object: Object::new(ObjectType::Pair),
            car,
            cdr,
        })
    }
}

impl GcSize for ObjectPair {
    fn deep_size(&self) -> usize {
        self.object.shallow_size() + size_of::<Self>()
    }
}
