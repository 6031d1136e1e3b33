use std::mem::size_of;

use crate::object::{GcSize, Object, ObjectType};

/// An interned, immutable identifier/symbol. Only the atom pool
/// (`atoms.rs`) constructs these, upon first interning of a byte
/// sequence (spec.md §3 "Atom").
#[repr(C)]
pub struct ObjectAtom {
    pub object: Object,
    pub bytes: Box<[u8]>,
    pub hash: u64,
}

impl ObjectAtom {
    pub fn new(bytes: &[u8], hash: u64) -> Box<Self> {
        Box::new(ObjectAtom {
            object: Object::new(ObjectType::Atom),
            bytes: bytes.to_vec().into_boxed_slice(),
            hash,
        })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).expect("atom bytes are always identifier-valid UTF-8")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl GcSize for ObjectAtom {
    fn deep_size(&self) -> usize {
        self.object.shallow_size() + size_of::<Self>() + self.bytes.len()
    }
}
