use super::*;

#[test]
fn expand_replicates_high_bits() {
    assert_eq!(expand5(0), 0);
    assert_eq!(expand5(31), 255);
    assert_eq!(expand5(16), 0x84);
    assert_eq!(expand6(0), 0);
    assert_eq!(expand6(63), 255);
    assert_eq!(expand6(32), 0x82);
}

#[test]
fn cmyk_extremes() {
    assert_eq!(cmyk_to_rgb(0, 0, 0, 0), [255, 255, 255]);
    assert_eq!(cmyk_to_rgb(0, 0, 0, 255), [0, 0, 0]);
    assert_eq!(cmyk_to_rgb(255, 0, 0, 0), [0, 255, 255]);
}

#[test]
fn cmyk_clamps_overflowing_accumulators() {
    assert_eq!(cmyk_to_rgb(400, 0, 0, 0), [0, 255, 255]);
    assert_eq!(cmyk_to_rgb(0, 0, 0, 1000), [0, 0, 0]);
}

#[test]
fn ink_scaling_is_proportional() {
    assert_eq!(scale_by_ink(255, 65535), 255);
    assert_eq!(scale_by_ink(255, 0), 0);
    assert_eq!(scale_by_ink(128, 65535), 128);
    assert_eq!(scale_by_ink(255, 32768), 127);
}
