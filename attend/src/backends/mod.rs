pub mod common;
pub mod trace;
