use rayon::prelude::*;

use crate::decode::separation::{DecodeOptions, SeparationTable};
use crate::format::display_format::{
    ColorModel, Depth, DisplayFormat, PixelLayout, SEPARATION_COMPONENTS,
};
use crate::foundation::error::{InkError, InkResult};
use crate::foundation::math::{cmyk_to_rgb, expand5, expand6, scale_by_ink};

/// Bytes per pixel in the decoded layout.
pub const DECODED_BYTES_PER_PIXEL: usize = 4;

/// Borrowed view of a raster as the interpreter laid it out.
#[derive(Clone, Copy, Debug)]
pub struct RawRaster<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes between the starts of consecutive rows; may exceed the packed row size.
    pub row_stride: usize,
    /// Layout of `pixels`.
    pub format: DisplayFormat,
    /// Row data, `row_stride * height` bytes (the last row may omit its padding).
    pub pixels: &'a [u8],
}

/// Raster in the canonical layout: B, G, R, X per pixel (X = 0xFF), rows tightly packed,
/// top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedRaster {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Always `width * 4`.
    pub row_stride: usize,
    /// Pixel bytes.
    pub pixels: Vec<u8>,
}

impl DecodedRaster {
    /// The B, G, R, X bytes of pixel `(x, y)`.
    pub fn bgrx_at(&self, x: u32, y: u32) -> [u8; 4] {
        let i = y as usize * self.row_stride + x as usize * DECODED_BYTES_PER_PIXEL;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// The R, G, B values of pixel `(x, y)`.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let [b, g, r, _] = self.bgrx_at(x, y);
        [r, g, b]
    }

    /// Convert to an opaque RGBA image for encoding.
    pub fn to_rgba_image(&self) -> InkResult<image::RgbaImage> {
        let mut rgba = Vec::with_capacity(self.pixels.len());
        for px in self.pixels.chunks_exact(DECODED_BYTES_PER_PIXEL) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], 255]);
        }
        image::RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| InkError::validation("decoded raster size does not match its pixels"))
    }
}

/// Normalize a raw raster into the canonical layout.
///
/// `separations` supplies ink equivalents for separation rasters; when absent, components 0..4
/// decode as the process inks and the rest are ignored.
#[tracing::instrument(level = "debug", skip(raw, separations), fields(
    width = raw.width,
    height = raw.height,
    format = raw.format.bits(),
))]
pub fn decode_raster(
    raw: &RawRaster<'_>,
    separations: Option<&SeparationTable>,
    opts: &DecodeOptions,
) -> InkResult<DecodedRaster> {
    let layout = raw
        .format
        .layout()
        .map_err(|fault| InkError::validation(fault.to_string()))?;

    let width = raw.width as usize;
    let height = raw.height as usize;
    let row_bytes = layout.row_bytes(width);
    if raw.row_stride < row_bytes {
        return Err(InkError::validation(format!(
            "row stride {} is smaller than the {} bytes a {}-pixel row needs",
            raw.row_stride, row_bytes, width
        )));
    }
    let needed = if height == 0 {
        0
    } else {
        raw.row_stride * (height - 1) + row_bytes
    };
    if raw.pixels.len() < needed {
        return Err(InkError::validation(format!(
            "raster buffer holds {} bytes, {} required",
            raw.pixels.len(),
            needed
        )));
    }

    let converter = RowConverter::new(layout, separations, opts);
    let out_stride = width * DECODED_BYTES_PER_PIXEL;
    let mut pixels = vec![0u8; out_stride * height];
    if out_stride > 0 {
        pixels
            .par_chunks_mut(out_stride)
            .enumerate()
            .for_each(|(y, dst)| {
                let sy = if layout.bottom_first { height - 1 - y } else { y };
                let start = sy * raw.row_stride;
                converter.convert_row(&raw.pixels[start..start + row_bytes], dst);
            });
    }

    Ok(DecodedRaster {
        width: raw.width,
        height: raw.height,
        row_stride: out_stride,
        pixels,
    })
}

/// Per-raster conversion state, shared read-only across row workers.
struct RowConverter {
    layout: PixelLayout,
    /// Ink equivalents of visible, used components; `None` contributes nothing.
    inks: [Option<[u16; 4]>; SEPARATION_COMPONENTS],
    visible: [bool; SEPARATION_COMPONENTS],
    /// Component shown as gray when solo preview is active.
    solo: Option<usize>,
}

impl RowConverter {
    fn new(layout: PixelLayout, separations: Option<&SeparationTable>, opts: &DecodeOptions) -> Self {
        let channels = layout.ink_channels();
        let fallback = SeparationTable::new();
        let table = separations.unwrap_or(&fallback);

        let mut inks = [None; SEPARATION_COMPONENTS];
        let mut visible = [false; SEPARATION_COMPONENTS];
        for i in 0..channels {
            visible[i] = opts.visibility.is_visible(i);
            if visible[i] {
                inks[i] = table.ink_for(i);
            }
        }
        let solo = if opts.gray_solo {
            opts.visibility.only_visible(channels)
        } else {
            None
        };

        Self {
            layout,
            inks,
            visible,
            solo,
        }
    }

    fn convert_row(&self, src: &[u8], dst: &mut [u8]) {
        let l = &self.layout;
        match (l.model, l.depth) {
            (ColorModel::Native, Depth::One) => {
                self.each_pixel(dst, |x| gray(if bit_at(src, x) { 0 } else { 255 }))
            }
            (ColorModel::Gray, Depth::One) => {
                self.each_pixel(dst, |x| gray(if bit_at(src, x) { 255 } else { 0 }))
            }
            (ColorModel::Native, Depth::Eight) => self.each_pixel(dst, |x| native8(src[x])),
            (ColorModel::Native, Depth::Sixteen) => self.each_pixel(dst, |x| {
                let b = [src[2 * x], src[2 * x + 1]];
                let word = if l.little_endian {
                    u16::from_le_bytes(b)
                } else {
                    u16::from_be_bytes(b)
                };
                native16(word, l.native_565)
            }),
            (ColorModel::Gray, _) => self.each_pixel(dst, |x| gray(src[x])),
            (ColorModel::Rgb, depth) => {
                let bpc = depth.bits() / 8;
                let offset = usize::from(l.alpha.is_first());
                let px_bytes = l.bits_per_pixel() / 8;
                self.each_pixel(dst, |x| {
                    let px = pixel_bytes(&src[x * px_bytes..(x + 1) * px_bytes], l.little_endian);
                    [
                        px[offset * bpc],
                        px[(offset + 1) * bpc],
                        px[(offset + 2) * bpc],
                    ]
                })
            }
            (ColorModel::Cmyk, Depth::One) => self.each_pixel(dst, |x| {
                let byte = src[x / 2];
                let nibble = if x % 2 == 0 { byte >> 4 } else { byte & 0x0f };
                let on = |bit: u8| if nibble & bit != 0 { 255 } else { 0 };
                self.cmyk_pixel([on(8), on(4), on(2), on(1)])
            }),
            (ColorModel::Cmyk, depth) => {
                let bpc = depth.bits() / 8;
                self.each_pixel(dst, |x| {
                    let px = pixel_bytes(&src[x * 4 * bpc..(x + 1) * 4 * bpc], l.little_endian);
                    self.cmyk_pixel([px[0], px[bpc], px[2 * bpc], px[3 * bpc]])
                })
            }
            (ColorModel::Separation, depth) => {
                let bpc = depth.bits() / 8;
                let px_bytes = SEPARATION_COMPONENTS * bpc;
                self.each_pixel(dst, |x| {
                    let px = pixel_bytes(&src[x * px_bytes..(x + 1) * px_bytes], l.little_endian);
                    let mut raw = [0u8; SEPARATION_COMPONENTS];
                    for (i, v) in raw.iter_mut().enumerate() {
                        *v = px[i * bpc];
                    }
                    self.separation_pixel(raw)
                })
            }
        }
    }

    fn each_pixel(&self, dst: &mut [u8], mut rgb: impl FnMut(usize) -> [u8; 3]) {
        for (x, out) in dst.chunks_exact_mut(4).enumerate() {
            let [r, g, b] = rgb(x);
            out.copy_from_slice(&[b, g, r, 0xff]);
        }
    }

    fn cmyk_pixel(&self, inks: [u8; 4]) -> [u8; 3] {
        if let Some(i) = self.solo {
            return cmyk_to_rgb(0, 0, 0, u32::from(inks[i]));
        }
        let v = |i: usize| if self.visible[i] { u32::from(inks[i]) } else { 0 };
        cmyk_to_rgb(v(0), v(1), v(2), v(3))
    }

    fn separation_pixel(&self, raw: [u8; SEPARATION_COMPONENTS]) -> [u8; 3] {
        if let Some(i) = self.solo {
            return cmyk_to_rgb(0, 0, 0, u32::from(raw[i]));
        }
        let mut acc = [0u32; 4];
        for (i, ink) in self.inks.iter().enumerate() {
            let Some(ink) = ink else {
                continue;
            };
            for (a, &equiv) in acc.iter_mut().zip(ink) {
                *a += scale_by_ink(raw[i], equiv);
            }
        }
        cmyk_to_rgb(acc[0], acc[1], acc[2], acc[3])
    }
}

/// Copy one pixel into big-endian component order.
fn pixel_bytes(src: &[u8], little_endian: bool) -> [u8; 16] {
    let mut px = [0u8; 16];
    px[..src.len()].copy_from_slice(src);
    if little_endian {
        px[..src.len()].reverse();
    }
    px
}

fn bit_at(src: &[u8], x: usize) -> bool {
    (src[x / 8] >> (7 - x % 8)) & 1 == 1
}

fn gray(v: u8) -> [u8; 3] {
    [v, v, v]
}

/// Native 8-bit palette: a 4x4x4 color cube, then a 64-step gray ramp.
fn native8(index: u8) -> [u8; 3] {
    match index {
        0..=0x3f => {
            let level = |shift: u8| ((index >> shift) & 3) * 85;
            [level(4), level(2), level(0)]
        }
        0x40..=0x7f => {
            let v = ((u16::from(index - 0x40) * 255) / 63) as u8;
            [v, v, v]
        }
        _ => [0, 0, 0],
    }
}

fn native16(word: u16, is_565: bool) -> [u8; 3] {
    if is_565 {
        [expand5(word >> 11), expand6(word >> 5), expand5(word)]
    } else {
        [expand5(word >> 10), expand5(word >> 5), expand5(word)]
    }
}

#[cfg(test)]
#[path = "../../tests/unit/decode/pixel.rs"]
mod tests;
