use super::*;

#[test]
fn presets_validate() {
    for fmt in [
        DisplayFormat::BGRX,
        DisplayFormat::RGB24,
        DisplayFormat::GRAY8,
        DisplayFormat::CMYK8,
        DisplayFormat::CMYK1,
        DisplayFormat::SEPARATION8,
    ] {
        assert!(fmt.layout().is_ok(), "{fmt:?} should be supported");
    }
}

#[test]
fn bgrx_layout_is_four_bytes_little_endian() {
    let layout = DisplayFormat::BGRX.layout().unwrap();
    assert_eq!(layout.model, ColorModel::Rgb);
    assert_eq!(layout.alpha, AlphaPlacement::UnusedFirst);
    assert!(layout.little_endian);
    assert_eq!(layout.bits_per_pixel(), 32);
    assert_eq!(layout.row_bytes(3), 12);
}

#[test]
fn bits_per_pixel_across_models() {
    let bpp = |f: DisplayFormat| f.layout().unwrap().bits_per_pixel();
    assert_eq!(bpp(DisplayFormat::COLORS_NATIVE | DisplayFormat::DEPTH_1), 1);
    assert_eq!(bpp(DisplayFormat::COLORS_NATIVE | DisplayFormat::DEPTH_16), 16);
    assert_eq!(bpp(DisplayFormat::RGB24), 24);
    assert_eq!(bpp(DisplayFormat::COLORS_RGB | DisplayFormat::DEPTH_16), 48);
    assert_eq!(
        bpp(DisplayFormat::COLORS_RGB | DisplayFormat::DEPTH_16 | DisplayFormat::ALPHA_FIRST),
        64
    );
    assert_eq!(bpp(DisplayFormat::CMYK1), 4);
    assert_eq!(bpp(DisplayFormat::CMYK8), 32);
    assert_eq!(bpp(DisplayFormat::SEPARATION8), 64);
    assert_eq!(
        bpp(DisplayFormat::COLORS_SEPARATION | DisplayFormat::DEPTH_16),
        128
    );
}

#[test]
fn packed_rows_round_up_to_whole_bytes() {
    let cmyk1 = DisplayFormat::CMYK1.layout().unwrap();
    assert_eq!(cmyk1.row_bytes(3), 2);
    let mono = (DisplayFormat::COLORS_GRAY | DisplayFormat::DEPTH_1)
        .layout()
        .unwrap();
    assert_eq!(mono.row_bytes(9), 2);
}

#[test]
fn row_alignment_field_decodes() {
    let fmt = DisplayFormat::RGB24 | DisplayFormat::ROW_ALIGN_16;
    let layout = fmt.layout().unwrap();
    assert_eq!(layout.row_align, Some(16));
    assert_eq!(layout.aligned_row_stride(5), 16);
    assert_eq!(layout.aligned_row_stride(6), 32);

    let layout = (DisplayFormat::RGB24 | DisplayFormat::ROW_ALIGN_64)
        .layout()
        .unwrap();
    assert_eq!(layout.row_align, Some(64));

    let default = DisplayFormat::RGB24.layout().unwrap();
    assert_eq!(default.row_align, None);
    assert_eq!(
        default.aligned_row_stride(1) % std::mem::size_of::<usize>(),
        0
    );
}

fn rejected(fmt: DisplayFormat) -> bool {
    matches!(fmt.layout(), Err(RenderFault::FormatUnsupported { .. }))
}

#[test]
fn unsupported_combinations_are_rejected() {
    assert!(rejected(DisplayFormat::COLORS_RGB | DisplayFormat::DEPTH_1));
    assert!(rejected(DisplayFormat::COLORS_GRAY | DisplayFormat::DEPTH_16));
    assert!(rejected(DisplayFormat::COLORS_SEPARATION | DisplayFormat::DEPTH_1));
    assert!(rejected(DisplayFormat::COLORS_CMYK | DisplayFormat::DEPTH_4));
    assert!(rejected(DisplayFormat::COLORS_RGB | DisplayFormat::DEPTH_12));
    assert!(rejected(DisplayFormat::CMYK8 | DisplayFormat::ALPHA_LAST));
    assert!(rejected(DisplayFormat::DEPTH_8));
    assert!(rejected(DisplayFormat::COLORS_RGB));
    assert!(rejected(
        DisplayFormat::COLORS_RGB | DisplayFormat::COLORS_CMYK | DisplayFormat::DEPTH_8
    ));
    assert!(rejected(
        DisplayFormat::RGB24 | DisplayFormat::ALPHA_FIRST | DisplayFormat::UNUSED_LAST
    ));
    assert!(rejected(DisplayFormat::RGB24 | DisplayFormat::DEPTH_16));
}

#[test]
fn invalid_row_alignment_and_unknown_bits_are_rejected() {
    assert!(rejected(DisplayFormat::from_raw(
        DisplayFormat::RGB24.bits() | (1 << 20)
    )));
    assert!(rejected(DisplayFormat::from_raw(
        DisplayFormat::RGB24.bits() | (1 << 30)
    )));
}

#[test]
fn rejection_carries_raw_bits() {
    let fmt = DisplayFormat::COLORS_RGB | DisplayFormat::DEPTH_1;
    match fmt.layout() {
        Err(RenderFault::FormatUnsupported { format, .. }) => assert_eq!(format, fmt.bits()),
        other => panic!("unexpected {other:?}"),
    }
}
