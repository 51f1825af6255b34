use super::*;

fn write_png(dir: &Path, name: &str, w: u32, h: u32, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(w, h, image::Rgb(rgb))
        .save(&path)
        .unwrap();
    path
}

#[test]
fn decode_yields_packed_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 2, 3, [1, 2, 3]);
    let asset = ImageAsset::load(&path).unwrap();
    assert_eq!((asset.width, asset.height), (2, 3));
    assert_eq!(asset.rgb8.len(), 18);
    assert_eq!(&asset.rgb8[..3], &[1, 2, 3]);
}

#[test]
fn prelude_defines_the_asset_in_userdict() {
    let asset = ImageAsset {
        width: 1,
        height: 1,
        rgb8: vec![0xab, 0x01, 0xff],
    };
    let ps = String::from_utf8(asset.prelude()).unwrap();
    assert!(ps.starts_with("userdict begin\n"));
    assert!(ps.contains("/InkAssetWidth 1 def"));
    assert!(ps.contains("/InkAssetHeight 1 def"));
    assert!(ps.contains("/InkAssetData <\nab01ff\n> def"));
    assert!(ps.ends_with("end\n"));
}

#[test]
fn cache_hits_for_the_same_client_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 1, 1, [9, 9, 9]);
    let mut cache = AssetCache::new();

    let first = cache.prelude_for(ClientKey(1), &path).unwrap();
    let again = cache.prelude_for(ClientKey(1), &path).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(cache.loads(), 1);

    cache.prelude_for(ClientKey(2), &path).unwrap();
    assert_eq!(cache.loads(), 2);
    assert_eq!(cache.cached_key(), Some(ClientKey(2)));
}

#[test]
fn forget_only_drops_the_owning_client() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 1, 1, [0, 0, 0]);
    let mut cache = AssetCache::new();
    cache.prelude_for(ClientKey(1), &path).unwrap();

    cache.forget(ClientKey(2));
    assert_eq!(cache.cached_key(), Some(ClientKey(1)));
    cache.forget(ClientKey(1));
    assert_eq!(cache.cached_key(), None);
}

#[test]
fn unreadable_asset_is_an_asset_fault() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.png");
    let fault = AssetCache::new()
        .prelude_for(ClientKey(1), &missing)
        .unwrap_err();
    assert!(matches!(fault, RenderFault::AssetIo { .. }));

    let garbage = dir.path().join("garbage.png");
    std::fs::write(&garbage, b"not an image").unwrap();
    let fault = AssetCache::new()
        .prelude_for(ClientKey(1), &garbage)
        .unwrap_err();
    assert_eq!(fault.summary(), "image asset unreadable");
}
