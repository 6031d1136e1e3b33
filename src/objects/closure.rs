use std::mem::size_of;

use crate::errors::RuntimeError;
use crate::object::{GcSize, Object, ObjectType};
use crate::objects::lambda::ObjectLambda;
use crate::objects::upvalue::ObjectUpvalue;
use crate::value::Value;

/// A built-in bound to a global name (SPEC_FULL.md §4.7); dispatched
/// by the VM without ever pushing a call frame.
pub type NativeFn = fn(&[Value]) -> Result<Value, RuntimeError>;

/// Pairs a `Lambda` with the upvalues it closed over at creation time
/// (spec.md §3 "Closure"). Created by `OP_CLOSURE`. `lambda` is null
/// exactly when `native` is set, for the handful of built-ins the VM
/// installs directly (SPEC_FULL.md §4.7) instead of compiling.
#[repr(C)]
pub struct ObjectClosure {
    pub object: Object,
    pub lambda: *mut ObjectLambda,
    pub upvalues: Vec<*mut ObjectUpvalue>,
    pub native: Option<NativeFn>,
}

impl ObjectClosure {
    pub fn new(lambda: *mut ObjectLambda, upvalue_count: usize) -> Box<Self> {
        Box::new(ObjectClosure {
            object: Object::new(ObjectType::Closure),
            lambda,
            upvalues: vec![std::ptr::null_mut(); upvalue_count],
            native: None,
        })
    }

    pub fn new_native(native: NativeFn) -> Box<Self> {
        Box::new(ObjectClosure {
            object: Object::new(ObjectType::Closure),
            lambda: std::ptr::null_mut(),
            upvalues: Vec::new(),
            native: Some(native),
        })
    }
}

impl GcSize for ObjectClosure {
    fn deep_size(&self) -> usize {
        self.object.shallow_size() + size_of::<Self>() + self.upvalues.capacity() * size_of::<*mut ObjectUpvalue>()
    }
}
