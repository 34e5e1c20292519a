//! Frame orchestration: per-packet dispatch and reference-frame carry-over.

use crate::a9ll;
use crate::error::QmageError;
use crate::header::{ImageHeader, ENCODER_MODE_W2_PASS};
use crate::pixels::PixelBuffer;
use crate::w2;

/// One decoded frame, borrowing the decoder's retained buffer.
#[derive(Debug, PartialEq)]
pub struct Frame<'a> {
    /// The packet header the frame was decoded from. For transparent images
    /// it locates the sibling alpha bitstream
    /// ([`ImageHeader::alpha_stream`]).
    pub header: ImageHeader,
    pub pixels: &'a PixelBuffer,
    pub keyframe: bool,
}

/// Stateful Qmage decoder.
///
/// The decoder retains the last fully decoded frame as the reference for
/// inter-coded animation frames and replaces it only after a successful
/// decode; a failed packet never leaves a partial reference behind. One
/// instance decodes one stream at a time — sharing an instance across
/// threads needs external synchronization.
#[derive(Debug, Default)]
pub struct QmageDecoder {
    last_frame: Option<PixelBuffer>,
}

impl QmageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The retained reference frame, if any frame decoded successfully.
    pub fn reference(&self) -> Option<&PixelBuffer> {
        self.last_frame.as_ref()
    }

    /// Decodes one packet with `stride == width`.
    pub fn decode(&mut self, packet: &[u8]) -> Result<Frame<'_>, QmageError> {
        self.decode_inner(packet, None)
    }

    /// Decodes one packet into rows of `stride` samples (`stride >= width`).
    pub fn decode_with_stride(
        &mut self,
        packet: &[u8],
        stride: usize,
    ) -> Result<Frame<'_>, QmageError> {
        self.decode_inner(packet, Some(stride))
    }

    fn decode_inner(
        &mut self,
        packet: &[u8],
        stride: Option<usize>,
    ) -> Result<Frame<'_>, QmageError> {
        let header = ImageHeader::parse(packet)?;

        let width = header.width as usize;
        let height = header.height as usize;
        if width == 0 || height == 0 {
            return Err(QmageError::Invalid("zero image dimension"));
        }
        let stride = stride.unwrap_or(width);
        if stride < width {
            return Err(QmageError::Invalid("stride smaller than width"));
        }
        if packet.len() < header.header_size {
            return Err(QmageError::TruncatedHeader);
        }

        let mut frame = PixelBuffer::with_stride(width, height, stride);
        let keyframe;
        if header.animated {
            if header.current_frame_number <= 1 {
                keyframe = true;
                a9ll::decode_intra(&header, packet, &mut frame)?;
            } else {
                keyframe = false;
                let reference = self
                    .last_frame
                    .as_ref()
                    .ok_or(QmageError::Invalid("missing reference frame"))?;
                a9ll::decode_inter(&header, packet, &mut frame, reference)?;
            }
        } else {
            keyframe = true;
            if header.encoder_mode != ENCODER_MODE_W2_PASS {
                return Err(QmageError::UnsupportedEncoderMode(header.encoder_mode));
            }
            let region = &packet[header.header_size..];
            match header.depth {
                1 => w2::decode_depth1(region, &mut frame)?,
                2 => w2::decode_depth2(region, &mut frame)?,
                _ => return Err(QmageError::Invalid("bad coding depth")),
            }
        }

        let pixels = &*self.last_frame.insert(frame);
        Ok(Frame {
            header,
            pixels,
            keyframe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_encoder_mode() {
        // non-animated, encoder mode 2
        let packet = [
            0x51, 0x4d, 0x0b, 0x00, 0x00, 0x02, 0x04, 0x00, 0x04, 0x00, 0x00, 0x00,
        ];
        let mut decoder = QmageDecoder::new();
        assert_eq!(
            decoder.decode(&packet),
            Err(QmageError::UnsupportedEncoderMode(2))
        );
        assert!(decoder.reference().is_none());
    }

    #[test]
    fn rejects_zero_dimensions() {
        let packet = [
            0x51, 0x4d, 0x0b, 0x00, 0x00, 0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
        ];
        let mut decoder = QmageDecoder::new();
        assert_eq!(
            decoder.decode(&packet),
            Err(QmageError::Invalid("zero image dimension"))
        );
    }

    #[test]
    fn rejects_inter_frame_without_reference() {
        let mut packet = vec![
            0x51, 0x4d, 0x0b, 0x00, 0x80, 0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00,
        ];
        packet.extend_from_slice(&0x40u32.to_le_bytes()); // alpha position
        packet.extend_from_slice(&2u16.to_le_bytes()); // total frames
        packet.extend_from_slice(&2u16.to_le_bytes()); // current frame: not first
        packet.extend_from_slice(&0u16.to_le_bytes());
        packet.push(0);
        packet.push(0);
        packet.extend_from_slice(&[0u8; 16]);

        let mut decoder = QmageDecoder::new();
        assert_eq!(
            decoder.decode(&packet),
            Err(QmageError::Invalid("missing reference frame"))
        );
    }

    #[test]
    fn failed_decode_keeps_previous_reference() {
        // a valid 1x1 depth-1 still: one literal pair fills the image
        let mut packet = vec![
            0x51, 0x4d, 0x0b, 0x00, 0x00, 0x01, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00,
        ];
        packet.extend_from_slice(&0u32.to_le_bytes()); // cnt_table
        packet.extend_from_slice(&1u32.to_le_bytes()); // size_idx
        packet.extend_from_slice(&0u32.to_le_bytes()); // size_run
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.push(0); // index 0: literal pair
        packet.extend_from_slice(&0xBBAAu16.to_le_bytes());
        packet.extend_from_slice(&0xDDCCu16.to_le_bytes());

        let mut decoder = QmageDecoder::new();
        let frame = decoder.decode(&packet).unwrap();
        assert!(frame.keyframe);
        assert_eq!(frame.pixels.get(0, 0), 0xBBAA);

        // now a corrupt packet: the reference must survive
        assert!(decoder.decode(&packet[..11]).is_err());
        assert_eq!(decoder.reference().unwrap().get(0, 0), 0xBBAA);
    }
}
