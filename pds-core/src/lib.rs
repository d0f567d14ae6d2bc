//! PixeLINK Data Stream (PDS) reader library.
//!
//! PDS files are written by PixeLINK scientific cameras: a short header, then
//! one frame descriptor (camera settings at capture time) followed by the raw
//! pixels for every recorded frame. This crate validates the header, decodes
//! descriptors of any firmware generation, and hands frames out one at a time
//! or as a single in-memory stack.
//!
//! # Example
//!
//! ```no_run
//! use pds_core::PdsReader;
//!
//! let mut reader = PdsReader::open("recording.pds").unwrap();
//! println!("{} frames of {}", reader.frames(), reader.image_size());
//!
//! for item in reader.iter() {
//!     let (timestamp, payload) = item.unwrap();
//!     println!("{:.3}s {:?}", timestamp, payload.shape);
//! }
//! ```
//!
//! # Features
//!
//! - Self-describing descriptor sizes, including short descriptors from older firmware
//! - 8/16-bit mono, Bayer, YUV422 and RGB payloads; raw bytes for everything else
//! - Sequential and random access by frame index
//! - NumPy, multipage TIFF and CSV exporters behind an explicit registry

pub mod descriptor;
pub mod output;
pub mod reader;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use descriptor::{DecodeError, FrameDescriptor};
pub use output::{ExporterRegistry, OutputError};
pub use reader::{read, Frame, Frames, PdsReader, ReaderState};
pub use types::{
    ElementType, FileHeader, FramePayload, FrameStack, ImageSize, PixelData, PixelFormat,
    PDS_MAGIC_NUMBER,
};
pub use writer::StreamWriter;
