pub mod directory;
pub mod disk_layout;
pub mod file_lock;
pub mod meta_info;
pub mod save;
