//! Packet framing: per-frame packet boundaries derived without decoding
//! pixels.
//!
//! A non-animated image occupies the whole remaining stream. An animated
//! frame ends at its alpha position; transparent frames additionally carry
//! an alpha plane whose length is either stored (non-first frames) or must
//! be recovered by scanning the alpha sub-bitstream's mode bits (first
//! frame, where the length was never written).

use qmage_buffers::{BitReader, Reader};

use crate::error::QmageError;
use crate::header::ImageHeader;

/// Returns true when the buffer plausibly starts a Qmage stream.
pub fn probe(data: &[u8]) -> bool {
    data.len() >= 10
        && u16::from_be_bytes([data[0], data[1]]) == crate::header::QMAGE_MAGIC
        && u16::from_le_bytes([data[6], data[7]]) != 0
        && u16::from_le_bytes([data[8], data[9]]) != 0
}

/// Byte length of the packet starting at the beginning of `stream`.
pub fn packet_size(stream: &[u8]) -> Result<usize, QmageError> {
    let h = ImageHeader::parse(stream)?;

    if !h.animated {
        return Ok(stream.len());
    }

    let alpha_position = h.alpha_position as usize;
    if alpha_position <= h.header_size {
        return Err(QmageError::Invalid("alpha position inside header"));
    }
    if alpha_position > stream.len() {
        return Err(QmageError::Invalid("alpha position outside stream"));
    }
    if !h.transparency {
        return Ok(alpha_position);
    }

    let size = if h.current_frame_number <= 1 {
        // the keyframe alpha length is never stored; scan the sub-bitstream
        // and round the end offset up to a word boundary
        let consumed = parse_alpha_plane_size(&stream[alpha_position..], h.width, h.height)?;
        (alpha_position + consumed + 3) & !3
    } else {
        let stored = Reader::new(&stream[alpha_position..]).le32()? as usize;
        if stored < 4 {
            return Err(QmageError::Invalid("bad stored alpha plane size"));
        }
        alpha_position + stored
    };
    if size > stream.len() {
        return Err(QmageError::Invalid("alpha plane outside stream"));
    }
    Ok(size)
}

/// Splits a byte stream into per-frame packets.
pub fn split_packets(stream: &[u8]) -> Result<Vec<&[u8]>, QmageError> {
    let mut packets = Vec::new();
    let mut pos = 0;
    while pos < stream.len() {
        let size = packet_size(&stream[pos..])?;
        packets.push(&stream[pos..pos + size]);
        pos += size;
    }
    Ok(packets)
}

/// Recovers the byte length of a keyframe alpha plane by walking its mode
/// bits; the length is not stored in the bitstream. Returns the raw
/// consumed length.
fn parse_alpha_plane_size(data: &[u8], width: u16, height: u16) -> Result<usize, QmageError> {
    if width % 8 != 0 || height % 4 != 0 {
        return Err(QmageError::Unsupported("unaligned alpha plane"));
    }

    let mut stream = Reader::new(data);
    let len1 = stream.le32()? as usize;
    let len2 = stream.le32()? as usize;
    if len1 < 8 || len2 < 8 || len1 > len2 {
        return Err(QmageError::Invalid("bad alpha sub-stream lengths"));
    }
    let len1 = len1 - 8;
    let len2 = len2 - 8;

    let bits = stream.bytes(len2)?;
    let mut gb1 = BitReader::new(&bits[..len1]);
    let mut gb2 = BitReader::new(&bits[len1..]);

    for _y in (0..height).step_by(4) {
        for _x in (0..width).step_by(8) {
            let mode = gb1.bits(2)?;
            if mode < 3 {
                let cbp = stream.le16()? as u32;
                for k in 0..16 {
                    if cbp & (1 << k) == 0 {
                        let class = gb2.bits(3)?;
                        if class == 7 {
                            stream.skip(2)?;
                        } else {
                            gb1.skip(class + 1)?;
                        }
                    }
                }
            }
        }
    }

    Ok(stream.position())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_accepts_plausible_header() {
        let data = [0x51, 0x4d, 0x0b, 0x00, 0x00, 0x01, 0x04, 0x00, 0x04, 0x00];
        assert!(probe(&data));
    }

    #[test]
    fn probe_rejects_bad_magic_and_zero_dims() {
        let bad_magic = [0x50, 0x4d, 0x0b, 0x00, 0x00, 0x01, 0x04, 0x00, 0x04, 0x00];
        assert!(!probe(&bad_magic));
        let zero_width = [0x51, 0x4d, 0x0b, 0x00, 0x00, 0x01, 0x00, 0x00, 0x04, 0x00];
        assert!(!probe(&zero_width));
        assert!(!probe(&[0x51]));
    }

    fn animated_opaque_packet(total: u16, current: u16, size: usize) -> Vec<u8> {
        let mut p = vec![
            0x51, 0x4d, 0x0b, 0x00, 0x80, 0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00,
        ];
        p.extend_from_slice(&(size as u32).to_le_bytes()); // alpha position = packet end
        p.extend_from_slice(&total.to_le_bytes());
        p.extend_from_slice(&current.to_le_bytes());
        p.extend_from_slice(&50u16.to_le_bytes());
        p.push(0);
        p.push(0);
        p.resize(size, 0);
        p
    }

    #[test]
    fn still_packet_spans_whole_stream() {
        let data = [
            0x51, 0x4d, 0x0b, 0x00, 0x00, 0x01, 0x04, 0x00, 0x04, 0x00, 0x00, 0x00, 0xaa, 0xbb,
        ];
        assert_eq!(packet_size(&data).unwrap(), data.len());
    }

    #[test]
    fn splits_animated_opaque_stream() {
        let mut stream = animated_opaque_packet(2, 1, 40);
        stream.extend_from_slice(&animated_opaque_packet(2, 2, 32));

        let packets = split_packets(&stream).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].len(), 40);
        assert_eq!(packets[1].len(), 32);
    }

    #[test]
    fn rejects_alpha_position_inside_header() {
        let p = animated_opaque_packet(2, 1, 40);
        let mut bad = p.clone();
        bad[12..16].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            packet_size(&bad),
            Err(QmageError::Invalid("alpha position inside header"))
        ));
    }

    #[test]
    fn alpha_scan_consumes_lengths_and_mode_bits() {
        // 8x4 plane, one macro-cell, mode 3 (no residuals): the scan
        // consumes the two length words plus one mode-bit byte
        let mut alpha = Vec::new();
        alpha.extend_from_slice(&9u32.to_le_bytes()); // len1: 8 + 1 mode byte
        alpha.extend_from_slice(&9u32.to_le_bytes()); // len2
        alpha.push(0b1100_0000); // mode 3

        assert_eq!(parse_alpha_plane_size(&alpha, 8, 4).unwrap(), 9);
    }

    #[test]
    fn alpha_scan_follows_presence_mask() {
        // mode 0 with an all-set mask: sixteen predicted samples, no
        // residual data, but the mask itself comes from the byte stream
        let mut alpha = Vec::new();
        alpha.extend_from_slice(&9u32.to_le_bytes());
        alpha.extend_from_slice(&9u32.to_le_bytes());
        alpha.push(0b0000_0000); // mode 0
        alpha.extend_from_slice(&0xffffu16.to_le_bytes()); // presence mask

        assert_eq!(parse_alpha_plane_size(&alpha, 8, 4).unwrap(), 11);
    }

    #[test]
    fn transparent_keyframe_rounds_packet_end_up() {
        let mut stream = vec![0x51, 0x4d, 0x0b, 0x03, 0x80, 0x00];
        stream.extend_from_slice(&8u16.to_le_bytes());
        stream.extend_from_slice(&4u16.to_le_bytes());
        stream.push(0);
        stream.push(0);
        stream.extend_from_slice(&26u32.to_le_bytes()); // alpha position
        stream.extend_from_slice(&2u16.to_le_bytes()); // total frames
        stream.extend_from_slice(&1u16.to_le_bytes()); // keyframe
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.push(0);
        stream.push(0);
        stream.resize(26, 0);
        stream.extend_from_slice(&9u32.to_le_bytes()); // alpha len1
        stream.extend_from_slice(&9u32.to_le_bytes()); // alpha len2
        stream.push(0b1100_0000); // single mode-3 cell
        stream.resize(40, 0);

        // alpha scan ends at 26 + 9 = 35, rounded up to 36
        assert_eq!(packet_size(&stream).unwrap(), 36);
    }

    #[test]
    fn alpha_scan_rejects_unaligned_plane() {
        assert_eq!(
            parse_alpha_plane_size(&[0u8; 16], 7, 4),
            Err(QmageError::Unsupported("unaligned alpha plane"))
        );
    }
}
