//! Tight encoding (type 7).
//!
//! # Wire format
//!
//! ```text
//! +------------------+
//! | compression_ctl  |  1 byte: low 4 bits reset streams 0-3, high 4 bits select the mode
//! +------------------+
//! | [mode data]      |
//! +------------------+
//! ```
//!
//! Modes (high nibble):
//! - `0x8` **Fill**: one TPIXEL, fills the rectangle.
//! - `0x9` **JPEG**: compact length, then a JPEG image of exactly the
//!   rectangle's size.
//! - `0x0-0x7` **Basic**: bits 0-1 pick zlib stream 0-3, bit 2 means an
//!   explicit filter byte follows (Copy 0, Palette 1, Gradient 2).
//!
//! Anything above `0x9` is a protocol error.
//!
//! # TPIXEL
//!
//! In the 32bpp truecolour format a TPIXEL is three bytes `R, G, B`. In the
//! 8bpp format it is the one-byte native pixel.
//!
//! # Basic payload
//!
//! The filtered data is `height * row_size` bytes. Under 12 bytes it is sent
//! raw. Otherwise it is a compact length followed by zlib data inflated on the
//! selected persistent stream. Streams are only reset by the control byte.

use crate::bit_cursor::BitCursor;
use crate::jpeg;
use crate::zlib_pool::{OutputSize, StreamId};
use crate::{
    dest_rect, read_pixel, Decoded, DecoderState, MutablePixelBuffer, PixelFormat, Rectangle,
    RfbInStream,
};
use anyhow::{bail, Context, Result};
use tokio::io::AsyncRead;

/// Widest rectangle a Tight encoder may produce.
pub const TIGHT_MAX_WIDTH: u16 = 2048;

/// Payloads shorter than this are sent uncompressed.
pub const TIGHT_MIN_TO_COMPRESS: usize = 12;

const MODE_FILL: u8 = 0x08;
const MODE_JPEG: u8 = 0x09;
const MODE_MAX: u8 = MODE_JPEG;
const EXPLICIT_FILTER: u8 = 0x04;

const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    state: &mut DecoderState,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<Decoded> {
    if rect.width > TIGHT_MAX_WIDTH {
        bail!(
            "Tight: rectangle too wide ({} > {} max)",
            rect.width,
            TIGHT_MAX_WIDTH
        );
    }

    let ctl = stream.read_u8().await.with_context(|| {
        format!(
            "Failed to read Tight compression control at ({}, {})",
            rect.x, rect.y
        )
    })?;

    for id in 0..4u8 {
        if ctl & (1 << id) != 0 {
            state.zlib.reset(StreamId::Tight(id));
        }
    }

    let mode = ctl >> 4;
    let format = *buffer.pixel_format();
    match mode {
        MODE_FILL => {
            let pixel = read_tpixel(stream, &format)
                .await
                .context("Tight: failed to read fill colour")?;
            buffer.fill_rect(dest_rect(rect), &pixel)?;
            Ok(Decoded::Plain)
        }
        MODE_JPEG => {
            decode_jpeg(stream, rect, state, &format, buffer).await?;
            Ok(Decoded::TightJpeg)
        }
        m if m > MODE_MAX => bail!("Tight: illegal compression type 0x{:02x}", ctl),
        m => {
            decode_basic(stream, rect, state, &format, buffer, m).await?;
            Ok(Decoded::Plain)
        }
    }
}

fn tpixel_is_rgb(format: &PixelFormat) -> bool {
    format.true_color && format.bits_per_pixel == 32 && format.depth == 24
}

async fn read_tpixel<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    format: &PixelFormat,
) -> Result<Vec<u8>> {
    if tpixel_is_rgb(format) {
        let r = stream.read_u8().await?;
        let g = stream.read_u8().await?;
        let b = stream.read_u8().await?;
        Ok(format.pixel_from_rgb(r, g, b))
    } else {
        Ok(read_pixel(stream, format.bytes_per_pixel() as usize).await?)
    }
}

async fn decode_jpeg<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    state: &mut DecoderState,
    format: &PixelFormat,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let len = stream
        .read_compact_length()
        .await
        .context("Tight JPEG: failed to read length")?;
    let data = stream
        .read_vec(len)
        .await
        .context("Tight JPEG: failed to read image data")?;

    let timeout = state.settings.jpeg_timeout;
    let image = jpeg::decode(data, timeout, &mut state.cancel).await?;
    if image.width != rect.width || image.height != rect.height {
        bail!(
            "Tight JPEG: image is {}x{}, rectangle is {}x{}",
            image.width,
            image.height,
            rect.width,
            rect.height
        );
    }

    let pixels: Vec<u8> = image
        .rgb
        .chunks_exact(3)
        .flat_map(|c| format.pixel_from_rgb(c[0], c[1], c[2]))
        .collect();
    buffer
        .image_rect(dest_rect(rect), &pixels, 0)
        .context("Tight JPEG: failed to write image")
}

async fn decode_basic<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    state: &mut DecoderState,
    format: &PixelFormat,
    buffer: &mut dyn MutablePixelBuffer,
    mode: u8,
) -> Result<()> {
    let stream_id = mode & 0x03;
    let filter = if mode & EXPLICIT_FILTER != 0 {
        stream
            .read_u8()
            .await
            .context("Tight: failed to read filter id")?
    } else {
        FILTER_COPY
    };

    let w = usize::from(rect.width);
    let h = usize::from(rect.height);
    let rgb_pixels = tpixel_is_rgb(format);

    let pixels = match filter {
        FILTER_COPY => {
            if rgb_pixels {
                let data = read_data(stream, state, stream_id, w * h * 3).await?;
                rgb_to_native(format, &data)
            } else {
                let bpp = format.bytes_per_pixel() as usize;
                read_data(stream, state, stream_id, w * h * bpp).await?
            }
        }
        FILTER_PALETTE => {
            let num_colors = usize::from(stream.read_u8().await?) + 1;
            if !rgb_pixels && num_colors != 2 {
                bail!(
                    "Tight: palette of {} colours in 8bpp mode, only 2 allowed",
                    num_colors
                );
            }
            let mut palette = Vec::with_capacity(num_colors);
            for _ in 0..num_colors {
                palette.push(
                    read_tpixel(stream, format)
                        .await
                        .context("Tight: failed to read palette")?,
                );
            }

            let row_size = if num_colors == 2 { (w + 7) / 8 } else { w };
            let data = read_data(stream, state, stream_id, h * row_size).await?;
            expand_palette(&data, &palette, w, h)?
        }
        FILTER_GRADIENT => {
            if !rgb_pixels {
                bail!("Tight: gradient filter requires 32bpp truecolour");
            }
            let data = read_data(stream, state, stream_id, w * h * 3).await?;
            rgb_to_native(format, &undo_gradient(&data, w, h))
        }
        other => bail!("Tight: invalid filter type {}", other),
    };

    buffer
        .image_rect(dest_rect(rect), &pixels, 0)
        .context("Tight: failed to write pixels")
}

/// Read `size` filtered bytes, inflating through the selected stream when the
/// payload is large enough to have been compressed.
async fn read_data<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    state: &mut DecoderState,
    stream_id: u8,
    size: usize,
) -> Result<Vec<u8>> {
    if size < TIGHT_MIN_TO_COMPRESS {
        return stream
            .read_vec(size)
            .await
            .context("Tight: failed to read uncompressed data");
    }
    let len = stream
        .read_compact_length()
        .await
        .context("Tight: failed to read compressed length")?;
    let compressed = stream
        .read_vec(len)
        .await
        .context("Tight: failed to read compressed data")?;
    state
        .zlib
        .inflate(StreamId::Tight(stream_id), &compressed, OutputSize::Exact(size))
}

fn rgb_to_native(format: &PixelFormat, rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .flat_map(|c| format.pixel_from_rgb(c[0], c[1], c[2]))
        .collect()
}

fn expand_palette(data: &[u8], palette: &[Vec<u8>], w: usize, h: usize) -> Result<Vec<u8>> {
    let bits = if palette.len() == 2 { 1 } else { 8 };
    let mut indices = BitCursor::new(data, bits)?;
    let mut out = Vec::with_capacity(w * h * palette[0].len());
    for _ in 0..h {
        for _ in 0..w {
            let idx = usize::from(indices.read()?);
            let entry = palette.get(idx).with_context(|| {
                format!(
                    "Tight: palette index {} out of range ({} colours)",
                    idx,
                    palette.len()
                )
            })?;
            out.extend_from_slice(entry);
        }
        indices.end_row();
    }
    Ok(out)
}

/// Reverse the gradient predictor over `w*h` RGB triples.
///
/// A pixel is predicted as `above + left - above_left` clamped to 0..=255;
/// the first pixel of a row is predicted by the pixel above it. The row above
/// the first row is black.
fn undo_gradient(deltas: &[u8], w: usize, h: usize) -> Vec<u8> {
    let row_len = w * 3;
    let mut out = vec![0u8; row_len * h];
    let zeros = vec![0u8; row_len];

    for y in 0..h {
        let (done, rest) = out.split_at_mut(y * row_len);
        let above: &[u8] = if y == 0 { &zeros } else { &done[(y - 1) * row_len..] };
        let row = &mut rest[..row_len];
        let delta = &deltas[y * row_len..(y + 1) * row_len];

        for c in 0..3 {
            row[c] = above[c].wrapping_add(delta[c]);
        }
        for x in 1..w {
            for c in 0..3 {
                let i = x * 3 + c;
                let est = i32::from(above[i]) + i32::from(row[i - 3]) - i32::from(above[i - 3]);
                row[i] = (est.clamp(0, 255) as u8).wrapping_add(delta[i]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::jpeg::test_support::solid_jpeg;
    use crate::test_support::{fb32, fb8, rect, stream};
    use crate::zlib_pool::test_support::SyncDeflater;
    use crate::ENCODING_TIGHT;
    use pretty_assertions::assert_eq;
    use rfb_pixelbuffer::FramebufferStore;

    fn compact(len: usize) -> Vec<u8> {
        let mut out = vec![(len & 0x7F) as u8];
        if len > 0x7F {
            out[0] |= 0x80;
            out.push(((len >> 7) & 0x7F) as u8);
            if len > 0x3FFF {
                out[1] |= 0x80;
                out.push((len >> 14) as u8);
            }
        }
        out
    }

    fn compressed(deflater: &mut SyncDeflater, data: &[u8]) -> Vec<u8> {
        let z = deflater.compress(data);
        let mut out = compact(z.len());
        out.extend(z);
        out
    }

    async fn run(
        fb: &mut FramebufferStore,
        state: &mut DecoderState,
        r: Rectangle,
        bytes: Vec<u8>,
    ) -> Result<Decoded> {
        let mut s = stream(bytes);
        decode(&mut s, &r, state, fb).await
    }

    #[tokio::test]
    async fn test_fill_consumes_only_one_tpixel() {
        let mut fb = fb32(10, 10);
        let mut s = stream(vec![0x80, 0x11, 0x22, 0x33, 0xAA]);
        let mut state = DecoderState::default();
        let decoded = decode(&mut s, &rect(2, 3, 4, 4, ENCODING_TIGHT), &mut state, &mut fb)
            .await
            .unwrap();
        assert_eq!(decoded, Decoded::Plain);
        assert_eq!(s.bytes_read(), 4);
        for y in 3..7 {
            for x in 2..6 {
                assert_eq!(fb.to_argb()[(y * 10 + x) as usize], 0xFF11_2233);
            }
        }
        assert_eq!(fb.pixel(1, 3).unwrap(), &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_fill_8bpp_reads_native_byte() {
        let mut fb = fb8(2, 2);
        let mut state = DecoderState::default();
        run(&mut fb, &mut state, rect(0, 0, 2, 2, ENCODING_TIGHT), vec![0x80, 0x5A])
            .await
            .unwrap();
        assert_eq!(fb.data(), &[0x5A; 4]);
    }

    #[tokio::test]
    async fn test_copy_filter_uncompressed() {
        // 3 bytes per pixel, 2x1 = 6 bytes, below the compression threshold
        let mut fb = fb32(2, 1);
        let mut state = DecoderState::default();
        run(
            &mut fb,
            &mut state,
            rect(0, 0, 2, 1, ENCODING_TIGHT),
            vec![0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF],
        )
        .await
        .unwrap();
        assert_eq!(fb.to_argb(), vec![0xFFFF_0000, 0xFF00_00FF]);
    }

    #[tokio::test]
    async fn test_stream_persists_across_rectangles() {
        let mut server = SyncDeflater::new();
        let first: Vec<u8> = (0..16 * 3).map(|i| i as u8).collect();
        let second: Vec<u8> = (0..16 * 3).map(|i| (i * 7) as u8).collect();
        let mut b1 = vec![0x00];
        b1.extend(compressed(&mut server, &first));
        let mut b2 = vec![0x00];
        b2.extend(compressed(&mut server, &second));

        let r = rect(0, 0, 4, 4, ENCODING_TIGHT);
        let mut fb = fb32(4, 4);
        let mut state = DecoderState::default();
        run(&mut fb, &mut state, r, b1).await.unwrap();
        run(&mut fb, &mut state, r, b2.clone()).await.unwrap();
        assert_eq!(fb.to_argb()[1], 0xFF00_0000 | (21 << 16) | (28 << 8) | 35);

        // The second chunk is meaningless to a fresh stream.
        let mut fresh = DecoderState::default();
        let err = run(&mut fb, &mut fresh, r, b2).await.unwrap_err();
        assert!(matches!(
            DecodeError::find(&err),
            Some(DecodeError::Decompression { .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_bit_restarts_stream() {
        let data: Vec<u8> = (0..16 * 3).map(|i| i as u8).collect();
        let r = rect(0, 0, 4, 4, ENCODING_TIGHT);
        let mut fb = fb32(4, 4);
        let mut state = DecoderState::default();

        let mut first = vec![0x00];
        first.extend(compressed(&mut SyncDeflater::new(), &data));
        run(&mut fb, &mut state, r, first).await.unwrap();

        // New server-side stream; the reset bit tells us to follow.
        let mut second = vec![0x01];
        second.extend(compressed(&mut SyncDeflater::new(), &data));
        run(&mut fb, &mut state, r, second).await.unwrap();
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let data: Vec<u8> = (0..16 * 3).map(|i| i as u8).collect();
        let r = rect(0, 0, 4, 4, ENCODING_TIGHT);
        let mut fb = fb32(4, 4);
        let mut state = DecoderState::default();

        let mut on_zero = vec![0x00];
        on_zero.extend(compressed(&mut SyncDeflater::new(), &data));
        run(&mut fb, &mut state, r, on_zero).await.unwrap();

        let mut on_two = vec![0x20];
        on_two.extend(compressed(&mut SyncDeflater::new(), &data));
        run(&mut fb, &mut state, r, on_two).await.unwrap();
        assert!(state.zlib.is_active(StreamId::Tight(0)));
        assert!(state.zlib.is_active(StreamId::Tight(2)));
        assert!(!state.zlib.is_active(StreamId::Tight(1)));
    }

    #[tokio::test]
    async fn test_two_colour_palette() {
        // explicit filter on stream 0, palette filter, 2 colours
        let mut bytes = vec![0x40, FILTER_PALETTE, 1, 0xFF, 0, 0, 0, 0, 0xFF];
        bytes.extend([0b1010_0000, 0b0100_0000]);
        let mut fb = fb32(3, 2);
        let mut state = DecoderState::default();
        run(&mut fb, &mut state, rect(0, 0, 3, 2, ENCODING_TIGHT), bytes)
            .await
            .unwrap();
        let red = 0xFFFF_0000;
        let blue = 0xFF00_00FF;
        assert_eq!(fb.to_argb(), vec![blue, red, blue, red, blue, red]);
    }

    #[tokio::test]
    async fn test_palette_8bpp_two_colours() {
        let bytes = vec![0x40, FILTER_PALETTE, 1, 0x07, 0xC0, 0b0100_0000];
        let mut fb = fb8(2, 1);
        let mut state = DecoderState::default();
        run(&mut fb, &mut state, rect(0, 0, 2, 1, ENCODING_TIGHT), bytes)
            .await
            .unwrap();
        assert_eq!(fb.data(), &[0x07, 0xC0]);
    }

    #[tokio::test]
    async fn test_palette_index_out_of_range() {
        // 3 colours, 8-bit indices, index 3 is invalid
        let bytes = vec![
            0x40,
            FILTER_PALETTE,
            2,
            1, 1, 1,
            2, 2, 2,
            3, 3, 3,
            0, 3,
        ];
        let mut fb = fb32(2, 1);
        let mut state = DecoderState::default();
        let err = run(&mut fb, &mut state, rect(0, 0, 2, 1, ENCODING_TIGHT), bytes)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("out of range"));
    }

    #[tokio::test]
    async fn test_gradient_filter() {
        let deltas = [
            10, 20, 30, 5, 5, 5, //
            1, 1, 1, 0, 0, 0,
        ];
        let mut bytes = vec![0x40, FILTER_GRADIENT];
        bytes.extend(compressed(&mut SyncDeflater::new(), &deltas));
        let mut fb = fb32(2, 2);
        let mut state = DecoderState::default();
        run(&mut fb, &mut state, rect(0, 0, 2, 2, ENCODING_TIGHT), bytes)
            .await
            .unwrap();
        assert_eq!(
            fb.to_argb(),
            vec![0xFF0A_141E, 0xFF0F_1923, 0xFF0B_151F, 0xFF10_1A24]
        );
    }

    #[test]
    fn test_gradient_clamps_prediction() {
        // bottom-right: above 200 + left 200 - above-left 0 clamps to 255
        let out = undo_gradient(&[0, 0, 0, 200, 0, 0, 200, 0, 0, 0, 0, 0], 2, 2);
        assert_eq!(out, vec![0, 0, 0, 200, 0, 0, 200, 0, 0, 255, 0, 0]);
        let out = undo_gradient(&[0, 0, 0, 200, 0, 0, 200, 0, 0, 10, 0, 0], 2, 2);
        assert_eq!(out[9], 9);
    }

    #[tokio::test]
    async fn test_gradient_rejected_in_8bpp() {
        let mut fb = fb8(2, 2);
        let mut state = DecoderState::default();
        let err = run(
            &mut fb,
            &mut state,
            rect(0, 0, 2, 2, ENCODING_TIGHT),
            vec![0x40, FILTER_GRADIENT],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("gradient"));
    }

    #[tokio::test]
    async fn test_invalid_filter() {
        let mut fb = fb32(2, 2);
        let mut state = DecoderState::default();
        let err = run(&mut fb, &mut state, rect(0, 0, 2, 2, ENCODING_TIGHT), vec![0x40, 3])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid filter"));
    }

    #[tokio::test]
    async fn test_invalid_compression_type() {
        let mut fb = fb32(2, 2);
        let mut state = DecoderState::default();
        let err = run(&mut fb, &mut state, rect(0, 0, 2, 2, ENCODING_TIGHT), vec![0xA0])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("illegal compression type"));
    }

    #[tokio::test]
    async fn test_rectangle_too_wide() {
        let mut fb = fb32(1, 1);
        let mut state = DecoderState::default();
        let err = run(&mut fb, &mut state, rect(0, 0, 2049, 1, ENCODING_TIGHT), vec![0x80])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too wide"));
    }

    #[tokio::test]
    async fn test_jpeg_rectangle() {
        let jpeg = solid_jpeg(8, 8, [0, 0, 250]);
        let mut bytes = vec![0x90];
        bytes.extend(compact(jpeg.len()));
        bytes.extend(jpeg);
        let mut fb = fb32(16, 16);
        let mut state = DecoderState::default();
        let decoded = run(&mut fb, &mut state, rect(4, 4, 8, 8, ENCODING_TIGHT), bytes)
            .await
            .unwrap();
        assert_eq!(decoded, Decoded::TightJpeg);
        let px = fb.pixel(7, 7).unwrap();
        assert!(px[0] >= 240 && px[1] <= 8 && px[2] <= 8);
        assert_eq!(fb.pixel(0, 0).unwrap(), &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_jpeg_size_mismatch() {
        let jpeg = solid_jpeg(4, 4, [10, 10, 10]);
        let mut bytes = vec![0x90];
        bytes.extend(compact(jpeg.len()));
        bytes.extend(jpeg);
        let mut fb = fb32(16, 16);
        let mut state = DecoderState::default();
        let err = run(&mut fb, &mut state, rect(0, 0, 8, 8, ENCODING_TIGHT), bytes)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image is 4x4"));
    }

    #[tokio::test]
    async fn test_jpeg_cancelled() {
        let jpeg = solid_jpeg(8, 8, [1, 2, 3]);
        let mut bytes = vec![0x90];
        bytes.extend(compact(jpeg.len()));
        bytes.extend(jpeg);
        let (tx, cancel) = crate::CancelSignal::pair();
        tx.send(true).unwrap();
        let mut state = DecoderState::new(Default::default(), cancel);
        let mut fb = fb32(8, 8);
        let err = run(&mut fb, &mut state, rect(0, 0, 8, 8, ENCODING_TIGHT), bytes)
            .await
            .unwrap_err();
        assert!(matches!(DecodeError::find(&err), Some(DecodeError::Cancelled)));
    }
}
