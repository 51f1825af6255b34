//! Binding to the Ghostscript shared library and its display device.
//!
//! The library is loaded at runtime with `libloading`; every render creates a fresh `gsapi`
//! instance, wires the display device callbacks to a [`DisplayCallbacks`] implementation and
//! streams the program through the stdin callback.
#![allow(unsafe_code)]

use std::any::Any;
use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_ushort, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::protocol::{CallbackError, CallbackResult, DisplayCallbacks, RasterMemory};
use crate::format::display_format::DisplayFormat;
use crate::foundation::config::RenderConfig;
use crate::foundation::error::{InkError, InkResult};
use crate::interp::session::{
    FATAL_CODE_LIMIT, Interpreter, InterpreterExit, InterpreterFactory, InterpreterIo,
};

#[cfg(target_os = "windows")]
const LIBRARY_NAMES: &[&str] = &["gsdll64.dll", "gsdll32.dll"];
#[cfg(target_os = "macos")]
const LIBRARY_NAMES: &[&str] = &["libgs.dylib", "libgs.10.dylib", "libgs.9.dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const LIBRARY_NAMES: &[&str] = &["libgs.so.10", "libgs.so.9", "libgs.so"];

const DISPLAY_VERSION_MAJOR: c_int = 2;
const DISPLAY_VERSION_MINOR: c_int = 0;
const GS_ARG_ENCODING_UTF8: c_int = 1;
const ARGV0: &str = "inkraster";

/// Set while a `gsapi` instance exists in this process.
static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

type StdinFn = unsafe extern "C" fn(*mut c_void, *mut c_char, c_int) -> c_int;
type StdoutFn = unsafe extern "C" fn(*mut c_void, *const c_char, c_int) -> c_int;

type NewInstanceFn = unsafe extern "C" fn(*mut *mut c_void, *mut c_void) -> c_int;
type DeleteInstanceFn = unsafe extern "C" fn(*mut c_void);
type SetStdioFn =
    unsafe extern "C" fn(*mut c_void, Option<StdinFn>, Option<StdoutFn>, Option<StdoutFn>) -> c_int;
type SetDisplayCallbackFn = unsafe extern "C" fn(*mut c_void, *mut DisplayCallbackTable) -> c_int;
type SetArgEncodingFn = unsafe extern "C" fn(*mut c_void, c_int) -> c_int;
type InitWithArgsFn = unsafe extern "C" fn(*mut c_void, c_int, *mut *mut c_char) -> c_int;
type ExitFn = unsafe extern "C" fn(*mut c_void) -> c_int;

/// `display_callback` from `gdevdsp.h`, version 2.
#[repr(C)]
struct DisplayCallbackTable {
    size: c_int,
    version_major: c_int,
    version_minor: c_int,
    display_open: unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int,
    display_preclose: unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int,
    display_close: unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int,
    display_presize:
        unsafe extern "C" fn(*mut c_void, *mut c_void, c_int, c_int, c_int, c_uint) -> c_int,
    display_size: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        c_int,
        c_int,
        c_int,
        c_uint,
        *mut u8,
    ) -> c_int,
    display_sync: unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int,
    display_page: unsafe extern "C" fn(*mut c_void, *mut c_void, c_int, c_int) -> c_int,
    display_update:
        unsafe extern "C" fn(*mut c_void, *mut c_void, c_int, c_int, c_int, c_int) -> c_int,
    display_memalloc: Option<unsafe extern "C" fn(*mut c_void, *mut c_void, usize) -> *mut c_void>,
    display_memfree: Option<unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void) -> c_int>,
    display_separation: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        c_int,
        *const c_char,
        c_ushort,
        c_ushort,
        c_ushort,
        c_ushort,
    ) -> c_int,
}

/// Entry points resolved from the shared library. The library stays loaded for as long as any
/// clone of the owning `Arc` is alive.
struct GsApi {
    new_instance: NewInstanceFn,
    delete_instance: DeleteInstanceFn,
    set_stdio: SetStdioFn,
    set_display_callback: SetDisplayCallbackFn,
    set_arg_encoding: SetArgEncodingFn,
    init_with_args: InitWithArgsFn,
    exit: ExitFn,
    _library: libloading::Library,
}

impl GsApi {
    fn load(path: &Path) -> InkResult<Self> {
        // SAFETY: loading Ghostscript runs no initialization code with preconditions of ours.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            InkError::interpreter(format!("load '{}': {e}", path.display()))
        })?;

        macro_rules! resolve {
            ($name:literal, $ty:ty) => {{
                // SAFETY: the symbol type matches the `gsapi` prototype in `iapi.h`.
                let symbol = unsafe { library.get::<$ty>($name) }.map_err(|e| {
                    InkError::interpreter(format!(
                        "'{}' lacks {}: {e}",
                        path.display(),
                        String::from_utf8_lossy(&$name[..$name.len() - 1])
                    ))
                })?;
                *symbol
            }};
        }

        Ok(Self {
            new_instance: resolve!(b"gsapi_new_instance\0", NewInstanceFn),
            delete_instance: resolve!(b"gsapi_delete_instance\0", DeleteInstanceFn),
            set_stdio: resolve!(b"gsapi_set_stdio\0", SetStdioFn),
            set_display_callback: resolve!(b"gsapi_set_display_callback\0", SetDisplayCallbackFn),
            set_arg_encoding: resolve!(b"gsapi_set_arg_encoding\0", SetArgEncodingFn),
            init_with_args: resolve!(b"gsapi_init_with_args\0", InitWithArgsFn),
            exit: resolve!(b"gsapi_exit\0", ExitFn),
            _library: library,
        })
    }
}

/// A loaded Ghostscript library. Cheap to clone.
#[derive(Clone)]
pub struct GhostscriptLibrary {
    api: Arc<GsApi>,
    path: PathBuf,
}

impl std::fmt::Debug for GhostscriptLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostscriptLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl GhostscriptLibrary {
    /// Load the library at `path`.
    pub fn open(path: &Path) -> InkResult<Self> {
        let api = GsApi::load(path)?;
        tracing::info!(path = %path.display(), "loaded Ghostscript");
        Ok(Self {
            api: Arc::new(api),
            path: path.to_path_buf(),
        })
    }

    /// Load from `path` when given, otherwise try the platform's usual library names.
    pub fn locate(path: Option<&Path>) -> InkResult<Self> {
        if let Some(path) = path {
            return Self::open(path);
        }
        let mut failures = Vec::new();
        for name in LIBRARY_NAMES {
            match Self::open(Path::new(name)) {
                Ok(lib) => return Ok(lib),
                Err(e) => failures.push(e.to_string()),
            }
        }
        Err(InkError::interpreter(format!(
            "Ghostscript library not found ({})",
            failures.join("; ")
        )))
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A new interpreter using this library.
    pub fn interpreter(&self) -> Ghostscript {
        Ghostscript { lib: self.clone() }
    }
}

/// Factory producing [`Ghostscript`] interpreters; the library is loaded on first use.
#[derive(Debug, Default)]
pub struct GhostscriptFactory {
    library_path: Option<PathBuf>,
    library: Option<GhostscriptLibrary>,
}

impl GhostscriptFactory {
    /// Factory for the library named in `config`, or the platform default.
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            library_path: config.library_path.clone(),
            library: None,
        }
    }
}

impl InterpreterFactory for GhostscriptFactory {
    fn create(&mut self) -> InkResult<Box<dyn Interpreter>> {
        let lib = match &self.library {
            Some(lib) => lib.clone(),
            None => {
                let lib = GhostscriptLibrary::locate(self.library_path.as_deref())?;
                self.library = Some(lib.clone());
                lib
            }
        };
        Ok(Box::new(lib.interpreter()))
    }
}

/// The Ghostscript interpreter.
///
/// Each `execute` creates and deletes its own `gsapi` instance. Only one instance may exist per
/// process; a concurrent `execute` on another thread fails with a fatal code instead of
/// corrupting the library's global state.
#[derive(Debug)]
pub struct Ghostscript {
    lib: GhostscriptLibrary,
}

struct InstanceGuard;

impl InstanceGuard {
    fn acquire() -> Option<Self> {
        INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        INSTANCE_LIVE.store(false, Ordering::Release);
    }
}

/// State reachable from the foreign callbacks through the caller handle.
struct CallbackContext<'a> {
    io: &'a mut dyn InterpreterIo,
    display: &'a mut dyn DisplayCallbacks,
    first_error: Option<CallbackError>,
    panic: Option<Box<dyn Any + Send>>,
}

impl Interpreter for Ghostscript {
    fn execute(
        &mut self,
        args: &[String],
        io: &mut dyn InterpreterIo,
        display: &mut dyn DisplayCallbacks,
    ) -> Result<(), InterpreterExit> {
        let Some(_guard) = InstanceGuard::acquire() else {
            tracing::error!("a Ghostscript instance is already live in this process");
            return Err(InterpreterExit {
                code: FATAL_CODE_LIMIT,
                detail: Some("a Ghostscript instance is already live in this process".into()),
            });
        };

        let mut cx = CallbackContext {
            io,
            display,
            first_error: None,
            panic: None,
        };
        let handle = (&mut cx as *mut CallbackContext<'_>).cast::<c_void>();
        let argv = build_argv(args, handle).map_err(|detail| InterpreterExit {
            code: FATAL_CODE_LIMIT,
            detail: Some(detail),
        })?;

        let api = &self.lib.api;
        let mut instance: *mut c_void = std::ptr::null_mut();
        // SAFETY: `instance` is a valid out-pointer; `handle` outlives the instance below.
        let code = unsafe { (api.new_instance)(&mut instance, handle) };
        if code < 0 || instance.is_null() {
            return Err(InterpreterExit::code(code.min(-1)));
        }

        // SAFETY: `instance` is live until `delete_instance`; the callback table is static and
        // `handle` points at `cx`, which outlives the instance.
        let code = unsafe { run_instance(api, instance, &argv) };

        if let Some(payload) = cx.panic.take() {
            panic::resume_unwind(payload);
        }
        match code {
            0 => Ok(()),
            code => Err(InterpreterExit {
                code,
                detail: cx.first_error.map(|e| e.to_string()),
            }),
        }
    }
}

/// Configure, run and tear down one instance. Returns the first nonzero code.
///
/// # Safety
///
/// `instance` must be a fresh instance created with a handle pointing at a live
/// `CallbackContext`, and `argv` must be that same handle's argument list.
unsafe fn run_instance(api: &GsApi, instance: *mut c_void, argv: &[CString]) -> c_int {
    let mut ptrs: Vec<*mut c_char> = argv.iter().map(|a| a.as_ptr().cast_mut()).collect();

    // SAFETY: per the function contract.
    unsafe {
        let mut code = (api.set_arg_encoding)(instance, GS_ARG_ENCODING_UTF8);
        if code == 0 {
            code = (api.set_stdio)(
                instance,
                Some(gs_stdin),
                Some(gs_stdout),
                Some(gs_stderr),
            );
        }
        if code == 0 {
            let table = std::ptr::addr_of!(DISPLAY_CALLBACKS).cast_mut();
            code = (api.set_display_callback)(instance, table);
        }
        if code == 0 {
            code = (api.init_with_args)(instance, ptrs.len() as c_int, ptrs.as_mut_ptr());
        }
        let exit_code = (api.exit)(instance);
        (api.delete_instance)(instance);
        if code == 0 { exit_code } else { code }
    }
}

/// `argv` for `gsapi_init_with_args`: program name, switches, display handle, then `-` so the
/// program is read from the stdin callback.
fn build_argv(args: &[String], handle: *mut c_void) -> Result<Vec<CString>, String> {
    let mut argv = Vec::with_capacity(args.len() + 3);
    argv.push(ARGV0.to_string());
    argv.extend(args.iter().cloned());
    argv.push(format!("-sDisplayHandle=16#{:x}", handle as usize));
    argv.push("-".to_string());
    argv.into_iter()
        .map(|a| CString::new(a).map_err(|e| format!("argument contains NUL: {e}")))
        .collect()
}

static DISPLAY_CALLBACKS: DisplayCallbackTable = DisplayCallbackTable {
    size: std::mem::size_of::<DisplayCallbackTable>() as c_int,
    version_major: DISPLAY_VERSION_MAJOR,
    version_minor: DISPLAY_VERSION_MINOR,
    display_open,
    display_preclose,
    display_close,
    display_presize,
    display_size,
    display_sync,
    display_page,
    display_update,
    display_memalloc: None,
    display_memfree: None,
    display_separation,
};

/// Run `f` against the context behind `handle`, converting refusals and panics to a nonzero
/// code. A panic is parked in the context and resumed once the instance is gone.
///
/// # Safety
///
/// `handle` must be the pointer passed to `gsapi_new_instance`, and no other reference to the
/// context may be live.
unsafe fn with_context(
    handle: *mut c_void,
    callback: &'static str,
    f: impl FnOnce(&mut CallbackContext<'_>) -> CallbackResult,
) -> c_int {
    if handle.is_null() {
        return -1;
    }
    // SAFETY: per the function contract.
    let cx = unsafe { &mut *handle.cast::<CallbackContext<'_>>() };
    if cx.panic.is_some() {
        return -1;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| f(cx))) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            tracing::debug!(callback, error = %err, "display callback refused");
            let code = err.code();
            cx.first_error.get_or_insert(err);
            code
        }
        Err(payload) => {
            tracing::error!(callback, "display callback panicked");
            cx.panic = Some(payload);
            -1
        }
    }
}

fn dimension(v: c_int) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

unsafe extern "C" fn display_open(handle: *mut c_void, _device: *mut c_void) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe { with_context(handle, "open", |cx| cx.display.open()) }
}

unsafe extern "C" fn display_preclose(handle: *mut c_void, _device: *mut c_void) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe { with_context(handle, "preclose", |cx| cx.display.preclose()) }
}

unsafe extern "C" fn display_close(handle: *mut c_void, _device: *mut c_void) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe { with_context(handle, "close", |cx| cx.display.close()) }
}

unsafe extern "C" fn display_presize(
    handle: *mut c_void,
    _device: *mut c_void,
    width: c_int,
    height: c_int,
    raster: c_int,
    format: c_uint,
) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe {
        with_context(handle, "presize", |cx| {
            cx.display.presize(
                dimension(width),
                dimension(height),
                dimension(raster) as usize,
                DisplayFormat::from_raw(format),
            )
        })
    }
}

unsafe extern "C" fn display_size(
    handle: *mut c_void,
    _device: *mut c_void,
    width: c_int,
    height: c_int,
    raster: c_int,
    format: c_uint,
    pimage: *mut u8,
) -> c_int {
    let (width, height, stride) = (dimension(width), dimension(height), dimension(raster));
    // SAFETY: called by Ghostscript with our handle.
    unsafe {
        with_context(handle, "size", |cx| {
            let len = stride as usize * height as usize;
            // SAFETY: Ghostscript allocated `raster * height` bytes at `pimage` and keeps them
            // until the next presize, preclose or close.
            let memory = unsafe { RasterMemory::new(pimage, len) }
                .ok_or_else(|| CallbackError::Geometry("null raster pointer".to_string()))?;
            cx.display.size(
                width,
                height,
                stride as usize,
                DisplayFormat::from_raw(format),
                memory,
            )
        })
    }
}

unsafe extern "C" fn display_sync(handle: *mut c_void, _device: *mut c_void) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe { with_context(handle, "sync", |cx| cx.display.sync()) }
}

unsafe extern "C" fn display_page(
    handle: *mut c_void,
    _device: *mut c_void,
    copies: c_int,
    flush: c_int,
) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe { with_context(handle, "page", |cx| cx.display.page(copies, flush != 0)) }
}

unsafe extern "C" fn display_update(
    handle: *mut c_void,
    _device: *mut c_void,
    x: c_int,
    y: c_int,
    w: c_int,
    h: c_int,
) -> c_int {
    // SAFETY: called by Ghostscript with our handle.
    unsafe { with_context(handle, "update", |cx| cx.display.update(x, y, w, h)) }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn display_separation(
    handle: *mut c_void,
    _device: *mut c_void,
    component: c_int,
    name: *const c_char,
    c: c_ushort,
    m: c_ushort,
    y: c_ushort,
    k: c_ushort,
) -> c_int {
    let name = if name.is_null() {
        String::new()
    } else {
        // SAFETY: Ghostscript passes a NUL-terminated component name.
        unsafe { CStr::from_ptr(name) }
            .to_string_lossy()
            .into_owned()
    };
    let Ok(index) = usize::try_from(component) else {
        return 0;
    };
    // SAFETY: called by Ghostscript with our handle.
    unsafe {
        with_context(handle, "separation", |cx| {
            cx.display.separation(index, &name, [c, m, y, k])
        })
    }
}

unsafe extern "C" fn gs_stdin(handle: *mut c_void, buf: *mut c_char, len: c_int) -> c_int {
    if buf.is_null() || len <= 0 {
        return 0;
    }
    // SAFETY: Ghostscript hands us a writable buffer of `len` bytes.
    let buf = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len as usize) };
    let mut read = 0;
    // SAFETY: called by Ghostscript with our handle.
    let code = unsafe {
        with_context(handle, "stdin", |cx| {
            read = cx.io.read_input(buf);
            Ok(())
        })
    };
    if code != 0 { -1 } else { read }
}

unsafe extern "C" fn gs_stdout(handle: *mut c_void, text: *const c_char, len: c_int) -> c_int {
    // SAFETY: Ghostscript passes `len` readable bytes; called with our handle.
    unsafe { forward_output(handle, text, len, false) }
}

unsafe extern "C" fn gs_stderr(handle: *mut c_void, text: *const c_char, len: c_int) -> c_int {
    // SAFETY: Ghostscript passes `len` readable bytes; called with our handle.
    unsafe { forward_output(handle, text, len, true) }
}

unsafe fn forward_output(handle: *mut c_void, text: *const c_char, len: c_int, err: bool) -> c_int {
    if text.is_null() || len <= 0 {
        return len.max(0);
    }
    // SAFETY: per the callers.
    let bytes = unsafe { std::slice::from_raw_parts(text.cast::<u8>(), len as usize) };
    // SAFETY: per the callers.
    unsafe {
        with_context(handle, if err { "stderr" } else { "stdout" }, |cx| {
            if err {
                cx.io.write_stderr(bytes);
            } else {
                cx.io.write_stdout(bytes);
            }
            Ok(())
        })
    };
    len
}

/// Interpreter switches for one render at `format`.
pub fn render_args(config: &RenderConfig, format: DisplayFormat) -> Vec<String> {
    let mut args = vec![
        "-dSAFER".to_string(),
        "-dBATCH".to_string(),
        "-dNOPAUSE".to_string(),
        "-dQUIET".to_string(),
    ];
    if config.crop_to_content {
        args.push("-dEPSCrop".to_string());
    }
    args.extend([
        "-sDEVICE=display".to_string(),
        format!("-dDisplayFormat={}", format.bits()),
        format!("-r{}", config.resolution_dpi),
        format!("-dTextAlphaBits={}", config.text_alpha_bits),
        format!("-dGraphicsAlphaBits={}", config.graphics_alpha_bits),
    ]);
    args.extend(config.extra_args.iter().cloned());
    args
}

#[cfg(test)]
#[path = "../../tests/unit/interp/ghostscript.rs"]
mod tests;
