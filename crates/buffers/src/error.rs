use thiserror::Error;

/// Error type for bounded cursor reads.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    #[error("read past end of cursor region")]
    EndOfRegion,
}
