//! A9LL block-prediction decoding.
//!
//! Intra frames are coded in 4x4 tiles with directional prediction against
//! the already-decoded part of the same buffer. Animated delta frames are
//! coded in 16x16 macroblocks that can copy or motion-compensate against the
//! previous frame, falling back to the same 4x4 directional modes.
//!
//! The intra bitstream interleaves three cursors (mode/index bits, residual
//! class bits, literal bytes); the inter bitstream uses one bit cursor and
//! one byte cursor. Cursor start offsets are stored as 32-bit words right
//! after the image header.

use log::warn;
use qmage_buffers::{BitReader, Reader};

use crate::error::QmageError;
use crate::header::ImageHeader;
use crate::pixels::PixelBuffer;
use crate::tables::{self, DIRECTIONS};

/// Outcome of one macroblock: decoded, or skipped on an offscreen motion
/// vector. A skip is not an error; the rest of the frame still decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MbStatus {
    Done,
    Skipped,
}

fn le32_at(packet: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([
        packet[pos],
        packet[pos + 1],
        packet[pos + 2],
        packet[pos + 3],
    ])
}

/// Decodes an intra (key) frame into `dst`.
pub fn decode_intra(
    header: &ImageHeader,
    packet: &[u8],
    dst: &mut PixelBuffer,
) -> Result<(), QmageError> {
    let hs = header.header_size;
    if packet.len() < hs + 8 {
        return Err(QmageError::Invalid("packet too short for cursor offsets"));
    }
    let gb1_start = le32_at(packet, hs) as usize;
    let gb3_start = le32_at(packet, hs + 4) as usize;
    if gb1_start < hs + 8
        || gb1_start > packet.len()
        || gb3_start < hs + 8
        || gb3_start > packet.len()
    {
        return Err(QmageError::Invalid("cursor offset outside packet"));
    }
    let mut gb1 = BitReader::new(&packet[hs + 8..]);
    let mut gb2 = BitReader::new(&packet[gb1_start..]);
    let mut gb3 = Reader::new(&packet[gb3_start..]);

    let dynamic;
    let delta: &[u16] = if header.is_dynamic_table {
        dynamic = tables::parse_dynamic_table(&mut gb3)?;
        &dynamic[1..]
    } else {
        tables::builtin_delta(header.version)
    };

    if header.use_extra_exception {
        return Err(QmageError::Unsupported("extra exception coding"));
    }

    let width = header.width as i32;
    let height = header.height as i32;

    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            let mode = gb1.bits(2)? as usize;
            if mode < 3 {
                let cbp = gb3.le16()? as u32;
                let (dx, dy) = DIRECTIONS[mode];
                let mut k = 0;
                for j in 0..4 {
                    for i in 0..4 {
                        if x + i < width && y + j < height {
                            decode_pixel_intra(
                                &mut gb1,
                                &mut gb2,
                                &mut gb3,
                                delta,
                                cbp & (1 << k) != 0,
                                dst,
                                x + i,
                                y + j,
                                x + i + dx,
                                y + j + dy,
                            )?;
                            k += 1;
                        }
                    }
                }
            } else if x > 0 {
                copy_edge(dst, x, y, (width - x).min(4), (height - y).min(4));
            }
            x += 4;
        }
        y += 4;
    }
    Ok(())
}

/// Decodes an animated delta frame into `dst` against `reference`.
pub fn decode_inter(
    header: &ImageHeader,
    packet: &[u8],
    dst: &mut PixelBuffer,
    reference: &PixelBuffer,
) -> Result<(), QmageError> {
    let hs = header.header_size;
    if packet.len() < hs + 8 {
        return Err(QmageError::Invalid("packet too short for cursor offsets"));
    }
    let gb1_start = le32_at(packet, hs) as usize;
    if gb1_start < hs + 8 || gb1_start > packet.len() {
        return Err(QmageError::Invalid("cursor offset outside packet"));
    }
    let mut gb1 = BitReader::new(&packet[hs + 8..]);
    let mut gb2 = Reader::new(&packet[gb1_start..]);

    let delta = tables::builtin_delta(header.version);
    let width = header.width as i32;
    let height = header.height as i32;

    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            if width - x >= 16 && height - y >= 16 {
                decode_mb(header, &mut gb1, &mut gb2, x, y, dst, reference, delta)?;
            } else {
                decode_mb_edge(header, &mut gb1, &mut gb2, x, y, dst, delta)?;
            }
            x += 16;
        }
        y += 16;
    }
    Ok(())
}

/// Intra pixel primitive: the presence mask decides copy vs residual, the
/// residual class comes from the second bit cursor and its index from the
/// first.
#[allow(clippy::too_many_arguments)]
fn decode_pixel_intra(
    gb1: &mut BitReader,
    gb2: &mut BitReader,
    gb3: &mut Reader,
    delta: &[u16],
    copy: bool,
    dst: &mut PixelBuffer,
    x: i32,
    y: i32,
    ref_x: i32,
    ref_y: i32,
) -> Result<(), QmageError> {
    let v = if copy {
        dst.get(ref_x, ref_y)
    } else {
        let class = gb2.bits(3)?;
        if class == 7 {
            gb3.le16()?
        } else {
            let idx = gb1.bits(class + 1)? as usize;
            dst.get(ref_x, ref_y)
                .wrapping_add(delta[idx + (2usize << class) - 2])
        }
    };
    dst.set(x as usize, y as usize, v);
    Ok(())
}

/// Inter pixel primitive: skip bit, class and index all come from the one
/// bit cursor, literals from the byte cursor. `source` is the prediction
/// buffer; `None` predicts from `dst` itself.
#[allow(clippy::too_many_arguments)]
fn decode_pixel(
    gb1: &mut BitReader,
    gb2: &mut Reader,
    delta: &[u16],
    dst: &mut PixelBuffer,
    source: Option<&PixelBuffer>,
    x: i32,
    y: i32,
    ref_x: i32,
    ref_y: i32,
) -> Result<(), QmageError> {
    let pred = |dst: &PixelBuffer| match source {
        Some(buf) => buf.get(ref_x, ref_y),
        None => dst.get(ref_x, ref_y),
    };
    let v = if gb1.bit()? {
        pred(dst)
    } else {
        let class = gb1.bits(3)?;
        if class == 7 {
            gb2.le16()?
        } else {
            let idx = gb1.bits(class + 1)? as usize;
            pred(dst).wrapping_add(delta[idx + (2usize << class) - 2])
        }
    };
    dst.set(x as usize, y as usize, v);
    Ok(())
}

/// Replicates the column left of `(x, y)` across a `w`x`h` block. The caller
/// guarantees `x > 0` and an in-bounds block.
fn copy_edge(dst: &mut PixelBuffer, x: i32, y: i32, w: i32, h: i32) {
    for j in 0..h {
        let v = dst.get(x - 1, y + j);
        for i in 0..w {
            dst.set((x + i) as usize, (y + j) as usize, v);
        }
    }
}

/// Copies a `size`x`size` block from `src` at `(sx, sy)` to `dst` at
/// `(dx, dy)`. The caller guarantees in-bounds destination coordinates.
fn copy_block(dst: &mut PixelBuffer, dx: i32, dy: i32, src: &PixelBuffer, sx: i32, sy: i32, size: i32) {
    for j in 0..size {
        for i in 0..size {
            dst.set((dx + i) as usize, (dy + j) as usize, src.get(sx + i, sy + j));
        }
    }
}

/// One full 16x16 macroblock.
#[allow(clippy::too_many_arguments)]
fn decode_mb(
    header: &ImageHeader,
    gb1: &mut BitReader,
    gb2: &mut Reader,
    x: i32,
    y: i32,
    dst: &mut PixelBuffer,
    reference: &PixelBuffer,
    delta: &[u16],
) -> Result<MbStatus, QmageError> {
    let width = header.width as i32;
    let height = header.height as i32;

    if gb1.bit()? {
        if gb1.bit()? {
            copy_block(dst, x, y, reference, x, y, 16);
        } else {
            let mut mv_x = 0;
            let mut mv_y = 0;
            if !gb1.bit()? {
                mv_x = gb1.bits(8)? as i32 - 0x7f;
                mv_y = gb1.bits(7)? as i32 - 0x3f;
                if x + mv_x < 0
                    || x + mv_x + 16 > width
                    || y + mv_y < 0
                    || y + mv_y + 16 > height
                {
                    warn!("offscreen motion vector at ({x}, {y})");
                    return Ok(MbStatus::Skipped);
                }
                if gb1.bit()? {
                    copy_block(dst, x, y, reference, x + mv_x, y + mv_y, 16);
                    return Ok(MbStatus::Done);
                }
            }
            for j in (0..16).step_by(4) {
                for i in (0..16).step_by(4) {
                    decode_block3(
                        header, gb1, gb2, x + i, y + j, dst, reference, mv_x, mv_y, delta,
                    )?;
                }
            }
        }
    } else {
        for j in (0..16).step_by(4) {
            for i in (0..16).step_by(4) {
                decode_block2(header, gb1, gb2, x + i, y + j, dst, delta)?;
            }
        }
    }
    Ok(MbStatus::Done)
}

/// 4x4 sub-block with the 3-bit inter mode set.
#[allow(clippy::too_many_arguments)]
fn decode_block3(
    header: &ImageHeader,
    gb1: &mut BitReader,
    gb2: &mut Reader,
    x: i32,
    y: i32,
    dst: &mut PixelBuffer,
    reference: &PixelBuffer,
    mv_x: i32,
    mv_y: i32,
    delta: &[u16],
) -> Result<(), QmageError> {
    let mode = gb1.bits(3)?;
    if !(header.qp == 0 || gb1.bit()?) {
        return Err(QmageError::Unsupported("nonzero qp refinement"));
    }
    match mode {
        0..=2 => {
            let (dx, dy) = DIRECTIONS[mode as usize];
            for j in 0..4 {
                for i in 0..4 {
                    decode_pixel(
                        gb1,
                        gb2,
                        delta,
                        dst,
                        None,
                        x + i,
                        y + j,
                        x + i + dx,
                        y + j + dy,
                    )?;
                }
            }
        }
        3 => {
            if x > 0 {
                copy_edge(dst, x, y, 4, 4);
            }
        }
        4 => {
            for j in 0..4 {
                for i in 0..4 {
                    decode_pixel(gb1, gb2, delta, dst, Some(reference), x + i, y + j, x + i, y + j)?;
                }
            }
        }
        5 => copy_block(dst, x, y, reference, x, y, 4),
        6 => {
            for j in 0..4 {
                for i in 0..4 {
                    decode_pixel(
                        gb1,
                        gb2,
                        delta,
                        dst,
                        Some(reference),
                        x + i,
                        y + j,
                        x + i + mv_x,
                        y + j + mv_y,
                    )?;
                }
            }
        }
        _ => {
            if x + mv_x < 0
                || x + mv_x + 4 > header.width as i32
                || y + mv_y < 0
                || y + mv_y + 4 > header.height as i32
            {
                warn!("offscreen motion vector at sub-block ({x}, {y})");
                return Ok(());
            }
            copy_block(dst, x, y, reference, x + mv_x, y + mv_y, 4);
        }
    }
    Ok(())
}

/// 4x4 sub-block with the 2-bit inter mode set.
fn decode_block2(
    header: &ImageHeader,
    gb1: &mut BitReader,
    gb2: &mut Reader,
    x: i32,
    y: i32,
    dst: &mut PixelBuffer,
    delta: &[u16],
) -> Result<(), QmageError> {
    let mode = gb1.bits(2)?;
    if !(header.qp == 0 || gb1.bit()?) {
        return Err(QmageError::Unsupported("nonzero qp refinement"));
    }
    if mode < 3 {
        let (dx, dy) = DIRECTIONS[mode as usize];
        for j in 0..4 {
            for i in 0..4 {
                decode_pixel(
                    gb1,
                    gb2,
                    delta,
                    dst,
                    None,
                    x + i,
                    y + j,
                    x + i + dx,
                    y + j + dy,
                )?;
            }
        }
    } else if x > 0 {
        copy_edge(dst, x, y, 4, 4);
    }
    Ok(())
}

/// Partial macroblock at the right or bottom border. Cells that extend past
/// the image carry raw literals for each visible pixel.
fn decode_mb_edge(
    header: &ImageHeader,
    gb1: &mut BitReader,
    gb2: &mut Reader,
    xpos: i32,
    ypos: i32,
    dst: &mut PixelBuffer,
    delta: &[u16],
) -> Result<(), QmageError> {
    if gb1.bit()? {
        return Err(QmageError::Unsupported("skip edge macroblock"));
    }

    let width = header.width as i32;
    let height = header.height as i32;

    let mut y = ypos;
    while y < (ypos + 16).min(height) {
        let mut x = xpos;
        while x < (xpos + 16).min(width) {
            if x + 4 <= width && y + 4 <= height {
                let mode = gb1.bits(2)? as usize;
                if mode < 3 {
                    let (dx, dy) = DIRECTIONS[mode];
                    for j in 0..4 {
                        for i in 0..4 {
                            if x + i < width && y + j < height {
                                decode_pixel(
                                    gb1,
                                    gb2,
                                    delta,
                                    dst,
                                    None,
                                    x + i,
                                    y + j,
                                    x + i + dx,
                                    y + j + dy,
                                )?;
                            }
                        }
                    }
                } else if x > 0 {
                    copy_edge(dst, x, y, (width - x).min(4), (height - y).min(4));
                }
            } else {
                for j in 0..4 {
                    for i in 0..4 {
                        if x + i < width && y + j < height {
                            let v = gb2.le16()?;
                            dst.set((x + i) as usize, (y + j) as usize, v);
                        }
                    }
                }
            }
            x += 4;
        }
        y += 4;
    }
    Ok(())
}
