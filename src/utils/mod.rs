pub mod precision;
pub mod tz;
