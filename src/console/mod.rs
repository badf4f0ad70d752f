//! Console redirection over store keys
//!
//! This module handles:
//! - Buffered output appended to the board's stdout key
//! - Cursor-based reads from the board's stdin key
//! - Clearing both keys between commands

mod stream;

pub use stream::ConsoleStream;
