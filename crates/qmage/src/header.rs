//! Image header parsing.
//!
//! The header layout is version-dependent: version 0xB (the last release of
//! the 1.43 line) stores a 32-bit alpha position, later versions a scaled
//! 16-bit one plus a separate alpha encoder mode byte. Animated packets
//! append an animation sub-header, index-color packets a color count.

use log::debug;
use qmage_buffers::{CursorError, Reader};

use crate::error::QmageError;

/// Magic number at the start of every packet (`QM`, big-endian).
pub const QMAGE_MAGIC: u16 = 0x514d;
/// Last version using the legacy (1.43 and below) header layout.
pub const QVERSION_LEGACY: u8 = 0xb;
/// Encoder mode of the W2 two-pass coder, the only supported still mode.
pub const ENCODER_MODE_W2_PASS: u8 = 1;

/// Raw pixel layout carried by the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawType {
    /// Packed 16-bit color, no alpha.
    Rgb565 = 0,
    /// Packed 16-bit color with a sibling 8-bit alpha bitstream.
    Rgba5658 = 3,
    /// Packed 16-bit color with a sibling paired-16-bit alpha bitstream.
    Rgba = 6,
}

/// Parsed Qmage packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub version: u8,
    pub raw_type: RawType,
    pub transparency: bool,

    pub qp: u8,
    pub not_comp: bool,
    pub use_chroma_key: bool,
    pub animated: bool,

    pub encoder_mode: u8,
    pub is_dynamic_table: bool,
    pub alpha_depth: u8,
    pub depth: u8,
    pub use_extra_exception: bool,

    pub width: u16,
    pub height: u16,

    pub near_lossless: bool,

    pub android_support: bool,
    pub is_gray_type: bool,
    pub use_index_color: bool,
    pub pre_multiplied: bool,
    pub not_alpha_comp: bool,
    pub is_opaque: bool,
    pub nine_patched: bool,

    pub alpha_position: u32,
    pub alpha_encoder_mode: u8,

    pub total_frame_number: u16,
    pub current_frame_number: u16,
    pub animation_delay_time: u16,
    pub animation_no_repeat: bool,

    pub header_size: usize,

    pub color_count: u32,
}

/// Wraps a byte cursor so short reads surface as `TruncatedHeader`.
struct HeaderCursor<'a>(Reader<'a>);

impl HeaderCursor<'_> {
    fn u8(&mut self) -> Result<u8, QmageError> {
        self.0.u8().map_err(Self::truncated)
    }

    fn le16(&mut self) -> Result<u16, QmageError> {
        self.0.le16().map_err(Self::truncated)
    }

    fn le32(&mut self) -> Result<u32, QmageError> {
        self.0.le32().map_err(Self::truncated)
    }

    fn skip(&mut self, n: usize) -> Result<(), QmageError> {
        self.0.skip(n).map_err(Self::truncated)
    }

    fn truncated(_: CursorError) -> QmageError {
        QmageError::TruncatedHeader
    }
}

impl ImageHeader {
    /// Parses the header at the start of `packet`.
    pub fn parse(packet: &[u8]) -> Result<Self, QmageError> {
        if packet.len() < 12 {
            return Err(QmageError::TruncatedHeader);
        }

        let mut gb = HeaderCursor(Reader::new(packet));

        if gb.0.be16().map_err(HeaderCursor::truncated)? != QMAGE_MAGIC {
            return Err(QmageError::BadMagic);
        }

        let version = gb.u8()?;
        if version < QVERSION_LEGACY {
            return Err(QmageError::UnsupportedVersion(version));
        }

        let (raw_type, transparency) = match gb.u8()? {
            0 => (RawType::Rgb565, false),
            3 => (RawType::Rgba5658, true),
            6 => (RawType::Rgba, true),
            other => return Err(QmageError::UnsupportedRawType(other)),
        };

        let flags4 = gb.u8()?;
        let qp = flags4 & 0x1f;
        let not_comp = flags4 & 0x20 != 0;
        let use_chroma_key = flags4 & 0x40 != 0;
        let animated = flags4 & 0x80 != 0;

        let flags5 = gb.u8()?;
        let encoder_mode = if version == QVERSION_LEGACY {
            flags5 & 0x7
        } else {
            flags5 & 0xf
        };
        let is_dynamic_table = version > QVERSION_LEGACY && flags5 & 0x10 != 0;
        let alpha_depth = if flags5 & 0x20 != 0 { 2 } else { 1 };
        let depth = if flags5 & 0x40 != 0 { 2 } else { 1 };
        let use_extra_exception = flags5 & 0x80 != 0;

        let width = gb.le16()?;
        let height = gb.le16()?;

        let flags10 = gb.u8()?;
        let near_lossless = flags10 & 0x40 != 0;

        let flags11 = gb.u8()?;
        // android_support and is_gray_type share bit 2 in the wire format
        let android_support = flags11 & 0x4 != 0;
        let is_gray_type = flags11 & 0x4 != 0;
        let use_index_color = flags11 & 0x8 != 0;
        let pre_multiplied = flags11 & 0x10 != 0;
        let is_opaque = flags11 & 0x20 != 0;
        let not_alpha_comp = flags11 & 0x40 != 0;
        let nine_patched = flags11 & 0x80 != 0;

        let mut alpha_position = 0u32;
        let mut alpha_encoder_mode = encoder_mode;
        if version == QVERSION_LEGACY {
            if transparency || animated {
                alpha_position = gb.le32()?;
            }
        } else {
            alpha_position = gb.le16()? as u32;
            let flags14 = gb.u8()?;
            alpha_encoder_mode = flags14 & 0xf;
            gb.skip(1)?;
        }

        let (total_frame_number, current_frame_number, animation_delay_time, animation_no_repeat);
        if animated {
            total_frame_number = gb.le16()?;
            current_frame_number = gb.le16()?;
            animation_delay_time = gb.le16()?;
            animation_no_repeat = gb.u8()? != 0;
            gb.skip(1)?;
        } else {
            total_frame_number = 1;
            current_frame_number = 1;
            animation_delay_time = 0;
            animation_no_repeat = false;
        }

        if version > QVERSION_LEGACY && (!animated || current_frame_number <= 1) {
            alpha_position = alpha_position.wrapping_mul(4);
        }

        let header_size = if animated {
            24
        } else if transparency {
            16
        } else {
            12
        };

        let mut color_count = 0;
        if use_index_color {
            if nine_patched {
                gb.skip(4)?;
            }
            color_count = gb.le32()?;
        }

        let header = Self {
            version,
            raw_type,
            transparency,
            qp,
            not_comp,
            use_chroma_key,
            animated,
            encoder_mode,
            is_dynamic_table,
            alpha_depth,
            depth,
            use_extra_exception,
            width,
            height,
            near_lossless,
            android_support,
            is_gray_type,
            use_index_color,
            pre_multiplied,
            not_alpha_comp,
            is_opaque,
            nine_patched,
            alpha_position,
            alpha_encoder_mode,
            total_frame_number,
            current_frame_number,
            animation_delay_time,
            animation_no_repeat,
            header_size,
            color_count,
        };
        debug!("parsed header: {header:?}");
        Ok(header)
    }

    /// Sub-slice of `packet` holding the sibling alpha bitstream, if any.
    ///
    /// The alpha plane is coded with the same A9LL/W2 primitives as the
    /// color plane; its encoder mode and depth are `alpha_encoder_mode` and
    /// `alpha_depth`.
    pub fn alpha_stream<'a>(&self, packet: &'a [u8]) -> Option<&'a [u8]> {
        if !self.transparency {
            return None;
        }
        let pos = self.alpha_position as usize;
        if pos <= self.header_size || pos > packet.len() {
            return None;
        }
        Some(&packet[pos..])
    }
}
