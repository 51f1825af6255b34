//! Job and result types, and their framing on a worker's byte stream.
//!
//! A frame is a little-endian `u32` header length, a JSON header, then the raw byte blobs whose
//! lengths the header lists. Pixel data never goes through JSON.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use crate::decode::pixel::DecodedRaster;
use crate::decode::separation::{DecodeOptions, SeparationTable};
use crate::device::raster::CapturedPage;
use crate::format::display_format::DisplayFormat;
use crate::foundation::error::{InkError, InkResult, RenderFault};

const MAX_HEADER_BYTES: usize = 1 << 20;
const MAX_BLOB_BYTES: u64 = 1 << 30;

/// Identifies the client (document element, preview widget, ...) a render belongs to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ClientKey(pub u64);

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Per-job options beyond the program and format.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Channel visibility applied when decoding.
    pub decode: DecodeOptions,
    /// Also return the undecoded page, so the caller can re-decode with other visibility.
    pub keep_raw: bool,
    /// External image made available to the program through the asset prelude.
    pub asset: Option<PathBuf>,
}

/// One render request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderJob {
    /// Owner of the render; the unit of debouncing and asset caching.
    pub key: ClientKey,
    /// PostScript program text.
    pub input: Vec<u8>,
    /// Pixel layout requested from the display device.
    pub format: DisplayFormat,
    /// Decode and asset options.
    pub options: RenderOptions,
}

impl RenderJob {
    /// Job with default options.
    pub fn new(key: ClientKey, input: impl Into<Vec<u8>>, format: DisplayFormat) -> Self {
        Self {
            key,
            input: input.into(),
            format,
            options: RenderOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }
}

/// Successful render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderOutput {
    /// The page in the canonical layout.
    pub decoded: DecodedRaster,
    /// The page as the interpreter produced it, when requested.
    pub raw: Option<CapturedPage>,
}

/// Tagged result of one job. Faults are data; nothing unwinds across a worker boundary.
pub type JobOutcome = Result<RenderOutput, RenderFault>;

/// Message from the pool to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Run a job and reply with its outcome.
    Render(RenderJob),
    /// Drop anything cached for a client. No reply.
    ForgetClient(ClientKey),
    /// Exit the serve loop. No reply.
    Shutdown,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestHeader {
    Render {
        key: ClientKey,
        format: u32,
        options: RenderOptions,
        input_len: u64,
    },
    ForgetClient {
        key: ClientKey,
    },
    Shutdown,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RawHeader {
    width: u32,
    height: u32,
    row_stride: usize,
    format: u32,
    separations: SeparationTable,
    pixels_len: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ReplyHeader {
    Ok {
        width: u32,
        height: u32,
        row_stride: usize,
        pixels_len: u64,
        raw: Option<RawHeader>,
    },
    Error {
        summary: String,
        detail: String,
        fault: RenderFault,
    },
}

/// Write one request frame.
pub fn write_request<W: Write + ?Sized>(w: &mut W, request: &Request) -> InkResult<()> {
    match request {
        Request::Render(job) => {
            let header = RequestHeader::Render {
                key: job.key,
                format: job.format.bits(),
                options: job.options.clone(),
                input_len: job.input.len() as u64,
            };
            write_frame(w, &header, &[job.input.as_slice()])
        }
        Request::ForgetClient(key) => {
            write_frame(w, &RequestHeader::ForgetClient { key: *key }, &[])
        }
        Request::Shutdown => write_frame(w, &RequestHeader::Shutdown, &[]),
    }
}

/// Read one request frame. `None` at a clean end of stream.
pub fn read_request<R: Read + ?Sized>(r: &mut R) -> InkResult<Option<Request>> {
    let Some(header) = read_header::<R, RequestHeader>(r)? else {
        return Ok(None);
    };
    let request = match header {
        RequestHeader::Render {
            key,
            format,
            options,
            input_len,
        } => Request::Render(RenderJob {
            key,
            input: read_blob(r, input_len)?,
            format: DisplayFormat::from_raw(format),
            options,
        }),
        RequestHeader::ForgetClient { key } => Request::ForgetClient(key),
        RequestHeader::Shutdown => Request::Shutdown,
    };
    Ok(Some(request))
}

/// Write one outcome frame.
pub fn write_outcome<W: Write + ?Sized>(w: &mut W, outcome: &JobOutcome) -> InkResult<()> {
    match outcome {
        Ok(out) => {
            let d = &out.decoded;
            let raw = out.raw.as_ref().map(|page| RawHeader {
                width: page.width,
                height: page.height,
                row_stride: page.row_stride,
                format: page.format.bits(),
                separations: page.separations.clone(),
                pixels_len: page.pixels.len() as u64,
            });
            let header = ReplyHeader::Ok {
                width: d.width,
                height: d.height,
                row_stride: d.row_stride,
                pixels_len: d.pixels.len() as u64,
                raw,
            };
            let mut blobs: Vec<&[u8]> = vec![d.pixels.as_slice()];
            if let Some(page) = &out.raw {
                blobs.push(page.pixels.as_slice());
            }
            write_frame(w, &header, &blobs)
        }
        Err(fault) => {
            let header = ReplyHeader::Error {
                summary: fault.summary().to_string(),
                detail: fault.detail(),
                fault: fault.clone(),
            };
            write_frame(w, &header, &[])
        }
    }
}

/// Read one outcome frame. `None` at a clean end of stream.
pub fn read_outcome<R: Read + ?Sized>(r: &mut R) -> InkResult<Option<JobOutcome>> {
    let Some(header) = read_header::<R, ReplyHeader>(r)? else {
        return Ok(None);
    };
    let outcome = match header {
        ReplyHeader::Ok {
            width,
            height,
            row_stride,
            pixels_len,
            raw,
        } => {
            let pixels = read_blob(r, pixels_len)?;
            if pixels.len() != row_stride * height as usize {
                return Err(InkError::protocol(format!(
                    "decoded raster of {width}x{height} carries {} bytes",
                    pixels.len()
                )));
            }
            let decoded = DecodedRaster {
                width,
                height,
                row_stride,
                pixels,
            };
            let raw = match raw {
                Some(h) => Some(CapturedPage {
                    width: h.width,
                    height: h.height,
                    row_stride: h.row_stride,
                    format: DisplayFormat::from_raw(h.format),
                    pixels: read_blob(r, h.pixels_len)?,
                    separations: h.separations,
                }),
                None => None,
            };
            Ok(RenderOutput { decoded, raw })
        }
        ReplyHeader::Error { fault, .. } => Err(fault),
    };
    Ok(Some(outcome))
}

fn write_frame<W: Write + ?Sized>(
    w: &mut W,
    header: &impl serde::Serialize,
    blobs: &[&[u8]],
) -> InkResult<()> {
    let json = serde_json::to_vec(header)
        .map_err(|e| InkError::protocol(format!("encode frame header: {e}")))?;
    let len = u32::try_from(json.len())
        .map_err(|_| InkError::protocol("frame header too large"))?;
    w.write_all(&len.to_le_bytes())
        .and_then(|()| w.write_all(&json))
        .map_err(|e| InkError::io("write frame header", e))?;
    for blob in blobs {
        w.write_all(blob)
            .map_err(|e| InkError::io("write frame payload", e))?;
    }
    w.flush().map_err(|e| InkError::io("flush frame", e))
}

fn read_header<R: Read + ?Sized, H: serde::de::DeserializeOwned>(
    r: &mut R,
) -> InkResult<Option<H>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match r.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(InkError::protocol("stream ended inside a frame length")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(InkError::io("read frame length", e)),
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_HEADER_BYTES {
        return Err(InkError::protocol(format!(
            "frame header of {len} bytes exceeds the {MAX_HEADER_BYTES} byte limit"
        )));
    }
    let mut json = vec![0u8; len];
    r.read_exact(&mut json)
        .map_err(|e| InkError::io("read frame header", e))?;
    let header = serde_json::from_slice(&json)
        .map_err(|e| InkError::protocol(format!("decode frame header: {e}")))?;
    Ok(Some(header))
}

fn read_blob<R: Read + ?Sized>(r: &mut R, len: u64) -> InkResult<Vec<u8>> {
    if len > MAX_BLOB_BYTES {
        return Err(InkError::protocol(format!(
            "frame payload of {len} bytes exceeds the {MAX_BLOB_BYTES} byte limit"
        )));
    }
    let mut blob = vec![0u8; len as usize];
    r.read_exact(&mut blob)
        .map_err(|e| InkError::io("read frame payload", e))?;
    Ok(blob)
}

#[cfg(test)]
#[path = "../../tests/unit/worker/protocol.rs"]
mod tests;
