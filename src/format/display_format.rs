use crate::foundation::error::RenderFault;

bitflags::bitflags! {
    /// Pixel format requested from, and reported by, the display device.
    ///
    /// Bit values follow the Ghostscript display device ABI (`gdevdsp.h`). Zero-valued options
    /// (big-endian, top-first, no alpha, RGB 555, default row alignment) have no flag of their
    /// own; they are the absence of the corresponding bits.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
    )]
    pub struct DisplayFormat: u32 {
        /// Device-native colors.
        const COLORS_NATIVE = 1 << 1;
        /// Gray levels.
        const COLORS_GRAY = 1 << 2;
        /// RGB components.
        const COLORS_RGB = 1 << 3;
        /// CMYK process inks.
        const COLORS_CMYK = 1 << 4;
        /// Named separations, up to eight per pixel.
        const COLORS_SEPARATION = 1 << 19;

        /// Alpha byte before the components.
        const ALPHA_FIRST = 1 << 5;
        /// Alpha byte after the components.
        const ALPHA_LAST = 1 << 6;
        /// Filler byte before the components.
        const UNUSED_FIRST = 1 << 7;
        /// Filler byte after the components.
        const UNUSED_LAST = 1 << 8;

        /// 1 bit.
        const DEPTH_1 = 1 << 9;
        /// 2 bits.
        const DEPTH_2 = 1 << 10;
        /// 4 bits.
        const DEPTH_4 = 1 << 11;
        /// 8 bits.
        const DEPTH_8 = 1 << 12;
        /// 12 bits.
        const DEPTH_12 = 1 << 13;
        /// 16 bits.
        const DEPTH_16 = 1 << 14;

        /// Multi-byte pixels stored least significant byte first.
        const LITTLE_ENDIAN = 1 << 16;
        /// Bottom row stored first.
        const BOTTOM_FIRST = 1 << 17;
        /// Native 16-bit pixels are 5-6-5 rather than 5-5-5.
        const NATIVE_565 = 1 << 18;

        /// Rows aligned to 4 bytes.
        const ROW_ALIGN_4 = 3 << 20;
        /// Rows aligned to 8 bytes.
        const ROW_ALIGN_8 = 4 << 20;
        /// Rows aligned to 16 bytes.
        const ROW_ALIGN_16 = 5 << 20;
        /// Rows aligned to 32 bytes.
        const ROW_ALIGN_32 = 6 << 20;
        /// Rows aligned to 64 bytes.
        const ROW_ALIGN_64 = 7 << 20;
    }
}

const COLORS_MASK: u32 = 0x0008_001e;
const ALPHA_MASK: u32 = 0x0000_01e0;
const DEPTH_MASK: u32 = 0x0000_7e00;
const ROW_ALIGN_SHIFT: u32 = 20;
const ROW_ALIGN_MASK: u32 = 0x0070_0000;

/// Number of components carried by a separation pixel.
pub const SEPARATION_COMPONENTS: usize = 8;

impl DisplayFormat {
    /// 32-bit B,G,R,X: identical to the decoded layout, so decode is a row copy.
    pub const BGRX: Self = Self::COLORS_RGB
        .union(Self::UNUSED_FIRST)
        .union(Self::DEPTH_8)
        .union(Self::LITTLE_ENDIAN);
    /// Packed 24-bit R,G,B.
    pub const RGB24: Self = Self::COLORS_RGB.union(Self::DEPTH_8);
    /// 8-bit gray.
    pub const GRAY8: Self = Self::COLORS_GRAY.union(Self::DEPTH_8);
    /// 8 bits per process ink.
    pub const CMYK8: Self = Self::COLORS_CMYK.union(Self::DEPTH_8);
    /// 1 bit per process ink, two pixels per byte.
    pub const CMYK1: Self = Self::COLORS_CMYK.union(Self::DEPTH_1);
    /// Up to eight inks, 8 bits each.
    pub const SEPARATION8: Self = Self::COLORS_SEPARATION.union(Self::DEPTH_8);

    /// Build a format from raw ABI bits, keeping unknown bits so validation can reject them.
    pub fn from_raw(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }

    /// Validate the format and describe its pixel layout.
    ///
    /// This is the presize check: any combination the decoder cannot handle is refused here.
    pub fn layout(self) -> Result<PixelLayout, RenderFault> {
        let bits = self.bits();
        let reject = |detail: &str| RenderFault::FormatUnsupported {
            format: bits,
            detail: detail.to_string(),
        };

        let model = match bits & COLORS_MASK {
            b if b == Self::COLORS_NATIVE.bits() => ColorModel::Native,
            b if b == Self::COLORS_GRAY.bits() => ColorModel::Gray,
            b if b == Self::COLORS_RGB.bits() => ColorModel::Rgb,
            b if b == Self::COLORS_CMYK.bits() => ColorModel::Cmyk,
            b if b == Self::COLORS_SEPARATION.bits() => ColorModel::Separation,
            0 => return Err(reject("no color model selected")),
            _ => return Err(reject("more than one color model selected")),
        };

        let depth = match bits & DEPTH_MASK {
            b if b == Self::DEPTH_1.bits() => Depth::One,
            b if b == Self::DEPTH_8.bits() => Depth::Eight,
            b if b == Self::DEPTH_16.bits() => Depth::Sixteen,
            0 => return Err(reject("no bit depth selected")),
            b if b == Self::DEPTH_2.bits()
                || b == Self::DEPTH_4.bits()
                || b == Self::DEPTH_12.bits() =>
            {
                return Err(reject("2, 4 and 12 bit depths are not supported"));
            }
            _ => return Err(reject("more than one bit depth selected")),
        };

        let alpha = match bits & ALPHA_MASK {
            0 => AlphaPlacement::None,
            b if b == Self::ALPHA_FIRST.bits() => AlphaPlacement::AlphaFirst,
            b if b == Self::ALPHA_LAST.bits() => AlphaPlacement::AlphaLast,
            b if b == Self::UNUSED_FIRST.bits() => AlphaPlacement::UnusedFirst,
            b if b == Self::UNUSED_LAST.bits() => AlphaPlacement::UnusedLast,
            _ => return Err(reject("more than one alpha placement selected")),
        };
        if alpha != AlphaPlacement::None && model != ColorModel::Rgb {
            return Err(reject("alpha or filler bytes are only supported for RGB"));
        }

        let supported = matches!(
            (model, depth),
            (ColorModel::Native, _)
                | (ColorModel::Gray, Depth::One | Depth::Eight)
                | (ColorModel::Rgb, Depth::Eight | Depth::Sixteen)
                | (ColorModel::Cmyk, _)
                | (ColorModel::Separation, Depth::Eight | Depth::Sixteen)
        );
        if !supported {
            return Err(reject(&format!(
                "{model:?} at {} bits is not supported",
                depth.bits()
            )));
        }

        let row_align = match (bits & ROW_ALIGN_MASK) >> ROW_ALIGN_SHIFT {
            0 => None,
            n @ 3..=7 => Some(1usize << (n - 1)),
            _ => return Err(reject("invalid row alignment")),
        };

        let known = Self::all().bits();
        if bits & !known != 0 {
            return Err(reject("unknown format bits set"));
        }

        Ok(PixelLayout {
            model,
            depth,
            alpha,
            little_endian: self.contains(Self::LITTLE_ENDIAN),
            bottom_first: self.contains(Self::BOTTOM_FIRST),
            native_565: self.contains(Self::NATIVE_565),
            row_align,
        })
    }
}

/// Color model selected by a [`DisplayFormat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorModel {
    /// Device-native: 1-bit mono, 8-bit palette or 16-bit 555/565.
    Native,
    /// Gray levels.
    Gray,
    /// Additive RGB.
    Rgb,
    /// Four process inks.
    Cmyk,
    /// Up to eight named inks.
    Separation,
}

/// Bits per component (or per pixel for native/gray 1-bit and native 16-bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Depth {
    /// 1 bit.
    One,
    /// 8 bits.
    Eight,
    /// 16 bits.
    Sixteen,
}

impl Depth {
    /// Number of bits.
    pub fn bits(self) -> usize {
        match self {
            Self::One => 1,
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }
}

/// Where an RGB pixel carries its extra byte, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlphaPlacement {
    /// Three components only.
    None,
    /// Alpha before the color components.
    AlphaFirst,
    /// Alpha after the color components.
    AlphaLast,
    /// Filler before the color components.
    UnusedFirst,
    /// Filler after the color components.
    UnusedLast,
}

impl AlphaPlacement {
    fn extra_components(self) -> usize {
        usize::from(self != Self::None)
    }

    /// `true` when the extra component precedes the color components (big-endian order).
    pub fn is_first(self) -> bool {
        matches!(self, Self::AlphaFirst | Self::UnusedFirst)
    }
}

/// Validated description of how pixels are laid out in a raw raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    /// Color model.
    pub model: ColorModel,
    /// Component depth.
    pub depth: Depth,
    /// Extra component placement (RGB only).
    pub alpha: AlphaPlacement,
    /// Multi-byte pixels are stored byte-reversed.
    pub little_endian: bool,
    /// Rows are stored bottom row first.
    pub bottom_first: bool,
    /// Native 16-bit pixels use 5-6-5 instead of 5-5-5.
    pub native_565: bool,
    /// Explicit row alignment in bytes; `None` is the platform pointer size.
    pub row_align: Option<usize>,
}

impl PixelLayout {
    /// Bits used by one pixel.
    pub fn bits_per_pixel(&self) -> usize {
        let d = self.depth.bits();
        match self.model {
            ColorModel::Native | ColorModel::Gray => d,
            ColorModel::Rgb => d * (3 + self.alpha.extra_components()),
            ColorModel::Cmyk => d * 4,
            ColorModel::Separation => d * SEPARATION_COMPONENTS,
        }
    }

    /// Bytes needed for one row of `width` pixels, without padding.
    pub fn row_bytes(&self, width: usize) -> usize {
        (width * self.bits_per_pixel()).div_ceil(8)
    }

    /// Row stride the interpreter uses for `width` pixels under this layout's alignment.
    pub fn aligned_row_stride(&self, width: usize) -> usize {
        let align = self.row_align.unwrap_or(std::mem::size_of::<usize>());
        self.row_bytes(width).next_multiple_of(align)
    }

    /// Number of ink channels visibility applies to (0 for additive models).
    pub fn ink_channels(&self) -> usize {
        match self.model {
            ColorModel::Cmyk => 4,
            ColorModel::Separation => SEPARATION_COMPONENTS,
            _ => 0,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/format/display_format.rs"]
mod tests;
