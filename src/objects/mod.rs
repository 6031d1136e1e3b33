pub mod atom;
pub mod closure;
pub mod lambda;
pub mod pair;
pub mod upvalue;
