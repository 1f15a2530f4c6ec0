//! RRE (type 2) and CoRRE (type 4) encodings.
//!
//! ```text
//! subrect_count: u32
//! background:    pixel
//! subrect_count x { pixel, x, y, w, h }   u16 coordinates (RRE) or u8 (CoRRE)
//! ```
//!
//! The rectangle is filled with the background, then every subrect is painted
//! in wire order; later subrects may overwrite earlier ones.

use crate::{dest_rect, read_pixel, MutablePixelBuffer, Rectangle, RfbInStream};
use anyhow::{bail, Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Rre,
    CoRre,
}

impl Variant {
    fn name(self) -> &'static str {
        match self {
            Variant::Rre => "RRE",
            Variant::CoRre => "CoRRE",
        }
    }
}

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    variant: Variant,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let name = variant.name();
    let bpp = buffer.pixel_format().bytes_per_pixel() as usize;

    let num_subrects = stream
        .read_u32()
        .await
        .with_context(|| format!("Failed to read {} num_subrects", name))?;
    let bg = read_pixel(stream, bpp)
        .await
        .with_context(|| format!("Failed to read {} background pixel", name))?;

    buffer
        .fill_rect(dest_rect(rect), &bg)
        .with_context(|| format!("Failed to fill background in {} decode", name))?;

    for i in 0..num_subrects {
        let pixel = read_pixel(stream, bpp)
            .await
            .with_context(|| format!("Failed to read pixel for {} subrect {}", name, i))?;
        let (x, y, w, h) = read_geometry(stream, variant)
            .await
            .with_context(|| format!("Failed to read geometry for {} subrect {}", name, i))?;

        if u32::from(x) + u32::from(w) > u32::from(rect.width)
            || u32::from(y) + u32::from(h) > u32::from(rect.height)
        {
            bail!(
                "{} subrect {} [{},{} {}x{}] extends beyond rectangle {}x{}",
                name,
                i,
                x,
                y,
                w,
                h,
                rect.width,
                rect.height
            );
        }

        let sub = Rect::new(
            i32::from(rect.x) + i32::from(x),
            i32::from(rect.y) + i32::from(y),
            u32::from(w),
            u32::from(h),
        );
        buffer
            .fill_rect(sub, &pixel)
            .with_context(|| format!("Failed to fill {} subrect {} at {:?}", name, i, sub))?;
    }

    Ok(())
}

async fn read_geometry<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    variant: Variant,
) -> std::io::Result<(u16, u16, u16, u16)> {
    match variant {
        Variant::Rre => Ok((
            stream.read_u16().await?,
            stream.read_u16().await?,
            stream.read_u16().await?,
            stream.read_u16().await?,
        )),
        Variant::CoRre => Ok((
            u16::from(stream.read_u8().await?),
            u16::from(stream.read_u8().await?),
            u16::from(stream.read_u8().await?),
            u16::from(stream.read_u8().await?),
        )),
    }
}
