/// `x * y / 255`, truncating, for 8-bit channel products.
pub(crate) fn mul_div255(x: u32, y: u32) -> u32 {
    (x * y) / 255
}

/// Expand a 5-bit field to 8 bits by left-shift-replicate.
pub(crate) fn expand5(v: u16) -> u8 {
    let v = (v & 0x1f) as u8;
    (v << 3) | (v >> 2)
}

/// Expand a 6-bit field to 8 bits by left-shift-replicate.
pub(crate) fn expand6(v: u16) -> u8 {
    let v = (v & 0x3f) as u8;
    (v << 2) | (v >> 4)
}

/// Subtractive CMYK to RGB: `r = (255 - c) * (255 - k) / 255`, likewise for g/m and b/y.
///
/// Inputs are clamped to `[0, 255]` first so accumulated separations can be passed directly.
pub(crate) fn cmyk_to_rgb(c: u32, m: u32, y: u32, k: u32) -> [u8; 3] {
    let inv_k = 255 - k.min(255);
    [
        mul_div255(255 - c.min(255), inv_k) as u8,
        mul_div255(255 - m.min(255), inv_k) as u8,
        mul_div255(255 - y.min(255), inv_k) as u8,
    ]
}

/// Scale an 8-bit ink coverage by a 16-bit ink equivalent: `raw * cmyk / 65535`.
pub(crate) fn scale_by_ink(raw: u8, ink: u16) -> u32 {
    (u32::from(raw) * u32::from(ink)) / 65535
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
