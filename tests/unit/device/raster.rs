use super::*;
use crate::foundation::error::RenderFault;

fn memory(buf: &[u8]) -> RasterMemory {
    // SAFETY: every test keeps `buf` alive for the whole device lifetime.
    unsafe { RasterMemory::new(buf.as_ptr(), buf.len()) }.unwrap()
}

fn sized(device: &mut RasterDevice, buf: &[u8], w: u32, h: u32, stride: usize, f: DisplayFormat) {
    device.open().unwrap();
    device.presize(w, h, stride, f).unwrap();
    device.size(w, h, stride, f, memory(buf)).unwrap();
}

#[test]
fn full_cycle_captures_the_page() {
    let buf = vec![10u8, 20, 30, 0, 40, 50, 60, 0];
    let mut device = RasterDevice::new();
    sized(&mut device, &buf, 2, 1, 8, DisplayFormat::BGRX);
    device.sync().unwrap();
    device.page(1, true).unwrap();
    device.preclose().unwrap();
    device.close().unwrap();
    assert_eq!(device.state(), DeviceState::Closed);

    let page = device.finish().unwrap();
    assert_eq!((page.width, page.height, page.row_stride), (2, 1, 8));
    assert_eq!(page.pixels, buf);
    let decoded = page.decode(&DecodeOptions::default()).unwrap();
    assert_eq!(decoded.rgb_at(0, 0), [30, 20, 10]);
    assert_eq!(decoded.rgb_at(1, 0), [60, 50, 40]);
}

#[test]
fn page_implies_sync() {
    let buf = vec![0u8; 4];
    let mut device = RasterDevice::new();
    sized(&mut device, &buf, 1, 1, 4, DisplayFormat::BGRX);
    assert_eq!(device.syncs(), 0);
    device.page(1, false).unwrap();
    assert_eq!(device.syncs(), 1);
    assert!(device.has_page());
}

#[test]
fn unsupported_format_is_rejected_at_presize() {
    let mut device = RasterDevice::new();
    device.open().unwrap();
    let bad = DisplayFormat::COLORS_GRAY | DisplayFormat::DEPTH_4;
    let err = device.presize(4, 4, 4, bad).unwrap_err();
    assert!(matches!(err, CallbackError::FormatRejected(_)));
    assert_ne!(err.code(), 0);
    assert_eq!(device.state(), DeviceState::Open);
    assert!(matches!(
        device.rejection(),
        Some(RenderFault::FormatUnsupported { .. })
    ));
    device.close().unwrap();
    assert!(matches!(
        device.finish(),
        Err(RenderFault::FormatUnsupported { .. })
    ));
}

#[test]
fn callbacks_out_of_order_are_refused() {
    let buf = vec![0u8; 4];
    let mut device = RasterDevice::new();
    assert!(matches!(
        device.presize(1, 1, 4, DisplayFormat::BGRX),
        Err(CallbackError::OutOfOrder {
            callback: "presize",
            state: DeviceState::Closed
        })
    ));
    device.open().unwrap();
    assert!(device.open().is_err());
    assert!(
        device
            .size(1, 1, 4, DisplayFormat::BGRX, memory(&buf))
            .is_err()
    );
    assert!(device.page(1, false).is_err());
}

#[test]
fn size_validates_geometry() {
    let buf = vec![0u8; 8];
    let mut device = RasterDevice::new();
    device.open().unwrap();
    device.presize(4, 1, 8, DisplayFormat::BGRX).unwrap();
    let err = device
        .size(4, 1, 8, DisplayFormat::BGRX, memory(&buf))
        .unwrap_err();
    assert!(matches!(err, CallbackError::Geometry(_)));

    device.presize(1, 4, 4, DisplayFormat::BGRX).unwrap();
    assert!(
        device
            .size(1, 4, 4, DisplayFormat::BGRX, memory(&buf))
            .is_err()
    );
}

#[test]
fn resize_replaces_the_buffer_and_last_page_wins() {
    let first = vec![1u8, 1, 1, 0];
    let second = vec![2u8, 2, 2, 0, 3, 3, 3, 0];
    let mut device = RasterDevice::new();
    sized(&mut device, &first, 1, 1, 4, DisplayFormat::BGRX);
    device.page(1, true).unwrap();

    device.presize(2, 1, 8, DisplayFormat::BGRX).unwrap();
    assert_eq!(device.state(), DeviceState::Presizing);
    device
        .size(2, 1, 8, DisplayFormat::BGRX, memory(&second))
        .unwrap();
    device.page(1, true).unwrap();
    device.close().unwrap();

    let page = device.finish().unwrap();
    assert_eq!(page.width, 2);
    assert_eq!(page.pixels, second);
}

#[test]
fn separations_are_recorded_for_ink_formats() {
    let buf = vec![0u8; 8];
    let mut device = RasterDevice::new();
    device.open().unwrap();
    device
        .presize(1, 1, 8, DisplayFormat::SEPARATION8)
        .unwrap();
    device
        .separation(4, "PANTONE 186 C", [0, 65535, 52428, 3276])
        .unwrap();
    device.separation(9, "Overflow", [0, 0, 0, 0]).unwrap();
    device
        .size(1, 1, 8, DisplayFormat::SEPARATION8, memory(&buf))
        .unwrap();
    device.page(1, true).unwrap();
    device.close().unwrap();

    let page = device.finish().unwrap();
    assert_eq!(page.separations.len(), 1);
    assert_eq!(
        page.separations.get(4).map(|s| s.name.as_str()),
        Some("PANTONE 186 C")
    );
}

#[test]
fn separations_are_ignored_for_rgb() {
    let buf = vec![0u8; 4];
    let mut device = RasterDevice::new();
    sized(&mut device, &buf, 1, 1, 4, DisplayFormat::BGRX);
    device.separation(0, "Cyan", [65535, 0, 0, 0]).unwrap();
    device.page(1, true).unwrap();
    device.close().unwrap();
    assert!(device.finish().unwrap().separations.is_empty());
}

#[test]
fn finishing_without_a_page_reports_no_page() {
    let buf = vec![0u8; 4];
    let mut device = RasterDevice::new();
    sized(&mut device, &buf, 1, 1, 4, DisplayFormat::BGRX);
    device.sync().unwrap();
    assert_eq!(device.finish(), Err(RenderFault::NoPage));
}

#[test]
fn force_close_recovers_from_any_state() {
    let buf = vec![0u8; 4];
    let mut device = RasterDevice::new();
    sized(&mut device, &buf, 1, 1, 4, DisplayFormat::BGRX);
    device.force_close();
    assert_eq!(device.state(), DeviceState::Closed);
    device.open().unwrap();
}
