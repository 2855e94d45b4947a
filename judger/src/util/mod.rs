pub mod async_teardown;
pub mod serialize;

pub use async_teardown::*;
