//! Decoder for the Quram Qmage still/animated image format.
//!
//! Qmage packs each frame into one packet starting with the `QM` magic. Two
//! compression families share the container: A9LL block prediction (4x4
//! intra tiles and 16x16 motion-compensated macroblocks for animation) and
//! W2 run/index coding (direct, or nested behind a strip-coded second pass).
//! Decoded output is a packed RGB565 pixel buffer; transparent images carry
//! their alpha plane as a sibling bitstream inside the same packet.
//!
//! [`QmageDecoder`] drives whole packets and retains the reference frame
//! between animation frames. The `a9ll` and `w2` modules expose the family
//! decoders directly so a host can run the alpha sub-bitstream through the
//! same primitives.

pub mod a9ll;
mod decoder;
mod error;
pub mod framing;
mod header;
mod pixels;
mod tables;
pub mod w2;

pub use decoder::{Frame, QmageDecoder};
pub use error::QmageError;
pub use header::{ImageHeader, RawType, ENCODER_MODE_W2_PASS, QMAGE_MAGIC, QVERSION_LEGACY};
pub use pixels::PixelBuffer;
