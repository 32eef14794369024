pub mod enum_store;
pub mod posting;
