pub mod flushable;
pub mod shrink;
pub mod target;
