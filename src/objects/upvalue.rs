use std::mem::size_of;

use crate::object::{GcSize, Object, ObjectType};
use crate::value::Value;

/// Mediates access to a captured local. `location` points into the
/// live stack region while open; once the owning frame returns,
/// `close_upvalues` retargets `location` to `closed` (spec.md §3
/// "Upvalue", §4.6.4).
#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: *mut Value,
    pub closed: Value,
    /// Next node in the VM's stack-address-ordered open-upvalue list.
    pub next: *mut ObjectUpvalue,
}

impl ObjectUpvalue {
    pub fn new(location: *mut Value) -> Box<Self> {
        Box::new(ObjectUpvalue {
            object: Object::new(ObjectType::Upvalue),
            location,
            closed: Value::Nil,
            next: std::ptr::null_mut(),
        })
    }
}

impl GcSize for ObjectUpvalue {
    fn deep_size(&self) -> usize {
        self.object.shallow_size() + size_of::<Self>()
    }
}
