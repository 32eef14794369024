pub mod attribute_writer;
pub mod executor;
pub mod gate;
