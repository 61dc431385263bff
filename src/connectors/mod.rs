pub mod cache;
pub mod file;
pub mod messages;
pub mod traits;
