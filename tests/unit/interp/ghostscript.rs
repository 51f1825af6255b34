use super::*;

#[test]
fn render_args_select_the_display_device() {
    let args = render_args(&RenderConfig::default(), DisplayFormat::BGRX);
    assert!(args.contains(&"-dSAFER".to_string()));
    assert!(args.contains(&"-sDEVICE=display".to_string()));
    assert!(args.contains(&"-dEPSCrop".to_string()));
    assert!(args.contains(&format!("-dDisplayFormat={}", DisplayFormat::BGRX.bits())));
    assert!(args.contains(&"-r72".to_string()));
    assert!(args.contains(&"-dTextAlphaBits=4".to_string()));
}

#[test]
fn render_args_follow_config() {
    let cfg = RenderConfig {
        resolution_dpi: 150,
        crop_to_content: false,
        extra_args: vec!["-dNOINTERPOLATE".to_string()],
        ..RenderConfig::default()
    };
    let args = render_args(&cfg, DisplayFormat::CMYK8);
    assert!(!args.contains(&"-dEPSCrop".to_string()));
    assert!(args.contains(&"-r150".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("-dNOINTERPOLATE"));
}

#[test]
fn argv_ends_with_handle_and_stdin() {
    let handle = 0x1234usize as *mut c_void;
    let argv = build_argv(&["-dBATCH".to_string()], handle).unwrap();
    let argv: Vec<_> = argv.iter().map(|a| a.to_str().unwrap().to_string()).collect();
    assert_eq!(
        argv,
        ["inkraster", "-dBATCH", "-sDisplayHandle=16#1234", "-"]
    );
}

#[test]
fn argv_rejects_interior_nul() {
    assert!(build_argv(&["-s\0x".to_string()], std::ptr::null_mut()).is_err());
}

#[test]
fn only_one_instance_guard_at_a_time() {
    let first = InstanceGuard::acquire().expect("guard free");
    assert!(InstanceGuard::acquire().is_none());
    drop(first);
    assert!(InstanceGuard::acquire().is_some());
}

#[test]
fn missing_library_is_an_interpreter_error() {
    let err = GhostscriptLibrary::open(Path::new("/nonexistent/libgs.so")).unwrap_err();
    assert!(err.to_string().starts_with("interpreter error:"));
}
