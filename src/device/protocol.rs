use std::ptr::NonNull;

use crate::format::display_format::DisplayFormat;

/// Lifecycle state of a display device.
///
/// `Closed → Open → (Presizing → Sized)* → Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// No device is open.
    Closed,
    /// Opened, no raster allocated yet.
    Open,
    /// A new raster geometry was announced; the old buffer is gone and the new one is not yet
    /// known.
    Presizing,
    /// A raster buffer is attached.
    Sized,
}

/// A callback refusal. Every variant is reported to the interpreter as a nonzero code, which
/// aborts the render.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum CallbackError {
    /// The interpreter called back in an order the protocol does not allow.
    #[error("{callback} is not valid while the device is {state:?}")]
    OutOfOrder {
        /// Callback name.
        callback: &'static str,
        /// State the device was in.
        state: DeviceState,
    },

    /// The pixel format was refused at presize.
    #[error("display format rejected: {0}")]
    FormatRejected(String),

    /// Raster geometry does not fit the announced format or buffer.
    #[error("invalid raster geometry: {0}")]
    Geometry(String),
}

impl CallbackError {
    /// Code handed back through the foreign callback (`gs_error_unknownerror`).
    pub fn code(&self) -> i32 {
        -1
    }
}

/// Result of one device callback.
pub type CallbackResult = Result<(), CallbackError>;

/// The display device callback protocol.
///
/// An interpreter binding calls these in protocol order while it renders; the implementation
/// tracks state and captures the page. `update` and `separation` are optional channels.
pub trait DisplayCallbacks {
    /// Device opened.
    fn open(&mut self) -> CallbackResult;

    /// A raster of the given geometry is about to be allocated. Rejecting here aborts the render
    /// before any buffer exists.
    fn presize(
        &mut self,
        width: u32,
        height: u32,
        row_stride: usize,
        format: DisplayFormat,
    ) -> CallbackResult;

    /// The raster was allocated. Its contents are not valid until the next `sync`.
    fn size(
        &mut self,
        width: u32,
        height: u32,
        row_stride: usize,
        format: DisplayFormat,
        memory: RasterMemory,
    ) -> CallbackResult;

    /// The raster is readable.
    fn sync(&mut self) -> CallbackResult;

    /// A page is complete.
    fn page(&mut self, copies: i32, flush: bool) -> CallbackResult;

    /// Part of the raster changed.
    fn update(&mut self, _x: i32, _y: i32, _w: i32, _h: i32) -> CallbackResult {
        Ok(())
    }

    /// An ink was registered for pixel component `index`.
    fn separation(
        &mut self,
        _index: usize,
        _name: &str,
        _cmyk: [u16; 4],
    ) -> CallbackResult {
        Ok(())
    }

    /// The device is about to close; the raster must not be read from here on.
    fn preclose(&mut self) -> CallbackResult;

    /// The device closed.
    fn close(&mut self) -> CallbackResult;
}

/// Raster memory owned by the interpreter.
///
/// Valid from the `size` callback that delivered it until the next `presize`, `preclose` or
/// `close`; the device drops it at each of those points.
#[derive(Debug)]
pub struct RasterMemory {
    ptr: NonNull<u8>,
    len: usize,
}

#[allow(unsafe_code)]
impl RasterMemory {
    /// Wrap interpreter-owned memory. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for as long as the protocol says the buffer
    /// is alive (until the next presize, preclose or close callback), and must not be written
    /// concurrently with a read by the device.
    pub unsafe fn new(ptr: *const u8, len: usize) -> Option<Self> {
        NonNull::new(ptr.cast_mut()).map(|ptr| Self { ptr, len })
    }

    /// Size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the buffer out.
    ///
    /// Only called by the device while the protocol guarantees the memory is alive.
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        // SAFETY: `new` requires the pointer to be readable for `len` bytes until the device is
        // told otherwise, and the device drops `self` at every such point.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }.to_vec()
    }
}
