//! Cursor persistence and in-process dedup state

pub mod cursor;
pub mod seen;

pub use cursor::*;
pub use seen::*;
