use crate::decode::pixel::{DecodedRaster, RawRaster, decode_raster};
use crate::decode::separation::{DecodeOptions, Separation, SeparationTable};
use crate::device::protocol::{
    CallbackError, CallbackResult, DeviceState, DisplayCallbacks, RasterMemory,
};
use crate::format::display_format::{ColorModel, DisplayFormat};
use crate::foundation::error::{InkResult, RenderFault};

/// Owned copy of the page raster, taken while the interpreter's buffer was still valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedPage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row stride of `pixels`, as the interpreter laid them out.
    pub row_stride: usize,
    /// Layout of `pixels`.
    pub format: DisplayFormat,
    /// Raw raster bytes.
    pub pixels: Vec<u8>,
    /// Inks registered during the render.
    pub separations: SeparationTable,
}

impl CapturedPage {
    /// Borrow as a raw raster.
    pub fn raw(&self) -> RawRaster<'_> {
        RawRaster {
            width: self.width,
            height: self.height,
            row_stride: self.row_stride,
            format: self.format,
            pixels: &self.pixels,
        }
    }

    /// Decode with the given channel visibility. Can be repeated without re-rendering.
    pub fn decode(&self, opts: &DecodeOptions) -> InkResult<DecodedRaster> {
        decode_raster(&self.raw(), Some(&self.separations), opts)
    }
}

#[derive(Clone, Copy, Debug)]
struct Geometry {
    width: u32,
    height: u32,
    row_stride: usize,
    format: DisplayFormat,
}

/// Display device that captures one page per render.
///
/// Implements the callback state machine and keeps the interpreter's buffer only for as long
/// as the protocol allows; the page is copied out at `page`.
#[derive(Debug)]
pub struct RasterDevice {
    state: DeviceState,
    geometry: Option<Geometry>,
    memory: Option<RasterMemory>,
    readable: bool,
    separations: SeparationTable,
    page: Option<CapturedPage>,
    rejection: Option<RenderFault>,
    syncs: u32,
}

impl Default for RasterDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterDevice {
    /// A closed device with nothing captured.
    pub fn new() -> Self {
        Self {
            state: DeviceState::Closed,
            geometry: None,
            memory: None,
            readable: false,
            separations: SeparationTable::new(),
            page: None,
            rejection: None,
            syncs: 0,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The presize rejection, if the format was refused.
    pub fn rejection(&self) -> Option<&RenderFault> {
        self.rejection.as_ref()
    }

    /// `true` once a page has been captured.
    pub fn has_page(&self) -> bool {
        self.page.is_some()
    }

    /// Number of sync notifications seen since the last size.
    pub fn syncs(&self) -> u32 {
        self.syncs
    }

    /// Drop any interpreter memory and return to `Closed`, whatever state the render stopped in.
    pub fn force_close(&mut self) {
        if self.state != DeviceState::Closed {
            tracing::debug!(state = ?self.state, "closing device after aborted render");
        }
        self.release_buffer();
        self.geometry = None;
        self.state = DeviceState::Closed;
    }

    /// The render's result: the captured page, the presize rejection, or [`RenderFault::NoPage`].
    pub fn finish(mut self) -> Result<CapturedPage, RenderFault> {
        self.force_close();
        if let Some(fault) = self.rejection.take() {
            return Err(fault);
        }
        self.page.take().ok_or(RenderFault::NoPage)
    }

    fn expect_state(&self, callback: &'static str, allowed: &[DeviceState]) -> CallbackResult {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CallbackError::OutOfOrder {
                callback,
                state: self.state,
            })
        }
    }

    fn release_buffer(&mut self) {
        self.memory = None;
        self.readable = false;
    }
}

impl DisplayCallbacks for RasterDevice {
    fn open(&mut self) -> CallbackResult {
        self.expect_state("open", &[DeviceState::Closed])?;
        self.separations = SeparationTable::new();
        self.state = DeviceState::Open;
        Ok(())
    }

    fn presize(
        &mut self,
        width: u32,
        height: u32,
        row_stride: usize,
        format: DisplayFormat,
    ) -> CallbackResult {
        self.expect_state(
            "presize",
            &[DeviceState::Open, DeviceState::Presizing, DeviceState::Sized],
        )?;
        self.release_buffer();

        if let Err(fault) = format.layout() {
            tracing::warn!(format = format.bits(), %fault, "rejecting display format");
            let detail = fault.to_string();
            self.rejection = Some(fault);
            return Err(CallbackError::FormatRejected(detail));
        }

        tracing::debug!(width, height, row_stride, format = format.bits(), "presize");
        self.geometry = Some(Geometry {
            width,
            height,
            row_stride,
            format,
        });
        self.state = DeviceState::Presizing;
        Ok(())
    }

    fn size(
        &mut self,
        width: u32,
        height: u32,
        row_stride: usize,
        format: DisplayFormat,
        memory: RasterMemory,
    ) -> CallbackResult {
        self.expect_state("size", &[DeviceState::Presizing])?;
        let layout = format
            .layout()
            .map_err(|fault| CallbackError::FormatRejected(fault.to_string()))?;

        let row_bytes = layout.row_bytes(width as usize);
        if row_stride < row_bytes {
            return Err(CallbackError::Geometry(format!(
                "stride {row_stride} < row size {row_bytes}"
            )));
        }
        let needed = row_stride * height as usize;
        if memory.len() < needed {
            return Err(CallbackError::Geometry(format!(
                "buffer of {} bytes cannot hold {height} rows of {row_stride}",
                memory.len()
            )));
        }

        self.geometry = Some(Geometry {
            width,
            height,
            row_stride,
            format,
        });
        self.memory = Some(memory);
        self.readable = false;
        self.syncs = 0;
        self.state = DeviceState::Sized;
        Ok(())
    }

    fn sync(&mut self) -> CallbackResult {
        if self.state == DeviceState::Sized {
            self.readable = true;
            self.syncs += 1;
        }
        Ok(())
    }

    fn page(&mut self, copies: i32, flush: bool) -> CallbackResult {
        self.expect_state("page", &[DeviceState::Sized])?;
        self.sync()?;

        let (Some(geometry), Some(memory)) = (self.geometry, self.memory.as_ref()) else {
            return Err(CallbackError::Geometry("page without a raster".to_string()));
        };
        if self.page.is_some() {
            tracing::debug!("replacing previously captured page");
        }
        tracing::debug!(copies, flush, "capturing page");

        self.page = Some(CapturedPage {
            width: geometry.width,
            height: geometry.height,
            row_stride: geometry.row_stride,
            format: geometry.format,
            pixels: memory.to_vec(),
            separations: self.separations.clone(),
        });
        Ok(())
    }

    fn separation(&mut self, index: usize, name: &str, cmyk: [u16; 4]) -> CallbackResult {
        self.expect_state("separation", &[DeviceState::Presizing, DeviceState::Sized])?;
        let model = self
            .geometry
            .and_then(|g| g.format.layout().ok())
            .map(|l| l.model);
        if !matches!(model, Some(ColorModel::Cmyk | ColorModel::Separation)) {
            tracing::debug!(index, name, "ignoring separation for a non-ink format");
            return Ok(());
        }
        let [c, m, y, k] = cmyk;
        if !self
            .separations
            .register(index, Separation::new(name, c, m, y, k))
        {
            tracing::debug!(index, name, "separation beyond pixel components, dropped");
        }
        Ok(())
    }

    fn preclose(&mut self) -> CallbackResult {
        self.release_buffer();
        Ok(())
    }

    fn close(&mut self) -> CallbackResult {
        self.expect_state(
            "close",
            &[DeviceState::Open, DeviceState::Presizing, DeviceState::Sized],
        )?;
        self.release_buffer();
        self.geometry = None;
        self.state = DeviceState::Closed;
        Ok(())
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
#[path = "../../tests/unit/device/raster.rs"]
mod tests;
