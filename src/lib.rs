//! Inkraster renders PostScript and EPS previews through Ghostscript's display device.
//!
//! The crate is layered bottom-up:
//!
//! - [`DisplayFormat`] describes raw device pixels and [`decode_raster`] turns any supported
//!   layout (gray, RGB, CMYK, up to eight named separations) into canonical BGRX, with per-ink
//!   visibility and solo viewing.
//! - [`RasterDevice`] implements the display-device callback protocol ([`DisplayCallbacks`]) and
//!   captures the page the interpreter draws.
//! - [`Renderer`] drives an [`Interpreter`] (normally [`Ghostscript`], loaded at runtime) over a
//!   program and hands back the captured page or a [`RenderFault`].
//! - [`WorkerProcess`] is one worker; [`WorkerPool`] runs several of them, in child processes or
//!   threads, and isolates crashes and hangs.
//! - [`JobScheduler`] debounces and coalesces requests per client in front of the pool.
#![deny(unsafe_code)]
#![deny(missing_docs)]

pub(crate) mod decode;
pub(crate) mod device;
pub(crate) mod format;
pub(crate) mod foundation;
pub(crate) mod interp;
pub(crate) mod schedule;
pub(crate) mod worker;

pub use crate::foundation::config::{InkConfig, PoolConfig, RenderConfig, SchedulerConfig};
pub use crate::foundation::error::{InkError, InkResult, RenderFault};

pub use crate::format::display_format::{
    AlphaPlacement, ColorModel, Depth, DisplayFormat, PixelLayout, SEPARATION_COMPONENTS,
};

pub use crate::decode::pixel::{DECODED_BYTES_PER_PIXEL, DecodedRaster, RawRaster, decode_raster};
pub use crate::decode::separation::{
    ChannelVisibility, DecodeOptions, Separation, SeparationTable,
};

pub use crate::device::protocol::{
    CallbackError, CallbackResult, DeviceState, DisplayCallbacks, RasterMemory,
};
pub use crate::device::raster::{CapturedPage, RasterDevice};

pub use crate::interp::ghostscript::{
    Ghostscript, GhostscriptFactory, GhostscriptLibrary, render_args,
};
pub use crate::interp::renderer::{InterpreterSlot, Renderer};
pub use crate::interp::session::{
    FATAL_CODE_LIMIT, Interpreter, InterpreterExit, InterpreterFactory, InterpreterIo, ProgramIo,
    QUIT_CODE,
};

pub use crate::worker::asset::{AssetCache, ImageAsset};
pub use crate::worker::launch::{
    InProcessLauncher, LinkError, ProcessLauncher, WorkerLauncher, WorkerLink,
};
pub use crate::worker::pool::{Completion, Ticket, WorkerPool};
pub use crate::worker::process::WorkerProcess;
pub use crate::worker::protocol::{
    ClientKey, JobOutcome, RenderJob, RenderOptions, RenderOutput, Request, read_outcome,
    read_request, write_outcome, write_request,
};

pub use crate::schedule::scheduler::{JobScheduler, JobSink, KeyPhase};
pub use crate::schedule::timer::{Clock, DebounceTimer, ManualClock, SystemClock};
