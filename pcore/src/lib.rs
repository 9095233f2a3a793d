//! Leaf primitives shared by the archive engine: the mode-parameterized
//! byte serializer, the bump arena that owns data reconstructed while
//! reading, content addressed byte buffers and the byte sources archives
//! are read from.

pub mod arena;
pub mod data;
pub mod hash;
pub mod serializer;
pub mod source;
