pub mod context;
pub mod iterator;
pub mod string_helper;
pub mod term;
