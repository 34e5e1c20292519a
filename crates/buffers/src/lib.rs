//! Bounded byte and bit cursors over borrowed packet memory.
//!
//! A decoder for an adversarial bitstream needs several independent cursors
//! advancing in lockstep over regions of the same packet. Both cursor types
//! here borrow their region, check every read against its end, and leave the
//! cursor unmoved when a read would cross it.

mod bits;
mod error;
mod reader;

pub use bits::BitReader;
pub use error::CursorError;
pub use reader::Reader;
