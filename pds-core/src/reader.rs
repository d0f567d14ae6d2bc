//! Stream reader for PDS files.
//!
//! A file is an 8-byte header followed by `frames` records, each one a frame
//! descriptor immediately followed by the pixel payload:
//!
//! ```text
//! u32  magic number (0x04040404)
//! u32  number of frames
//! [frames times]
//!      frame descriptor (self-describing size)
//!      payload (height * width * bytes per pixel)
//! ```
//!
//! The first descriptor fixes the geometry, pixel format and stride for the
//! whole file; the format has no way to change resolution mid-stream.

use crate::descriptor::{read_exact_or_truncated, DecodeError, FrameDescriptor};
use crate::types::{
    ElementType, FileHeader, FramePayload, FrameStack, ImageSize, PixelData, PixelFormat,
    PDS_MAGIC_NUMBER,
};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::iter::FusedIterator;
use std::path::Path;
use tracing::{debug, warn};

/// A decoded frame: its descriptor and its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub descriptor: FrameDescriptor,
    pub payload: FramePayload,
}

/// Where the reader is in its lifecycle.
///
/// Header validation and geometry establishment happen during construction,
/// so a constructed reader starts in `GeometryEstablished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    GeometryEstablished,
    /// The cursor points at the descriptor of the given frame
    Iterating(u64),
    Closed,
}

/// Per-frame layout derived from the first descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameLayout {
    element: ElementType,
    read_shape: (usize, usize),
    payload_len: usize,
    descriptor_len: usize,
    stride: u64,
}

/// Reader over a seekable PDS byte source.
///
/// Only sources opened by the reader itself (see [`PdsReader::open`]) are
/// released by [`PdsReader::close`]; a source handed to [`PdsReader::new`]
/// stays with the caller.
#[derive(Debug)]
pub struct PdsReader<R> {
    source: Option<R>,
    owned: bool,
    state: ReaderState,
    frames: u32,
    anchor: u64,
    first: FrameDescriptor,
    pixel_format: PixelFormat,
    image_size: ImageSize,
    layout: FrameLayout,
}

impl PdsReader<BufReader<File>> {
    /// Opens a PDS file from disk. The reader owns the file handle.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened PDS file");
        Self::from_source(BufReader::new(file), true)
    }
}

impl<R: Read + Seek> PdsReader<R> {
    /// Creates a reader over a caller-owned source positioned at the header.
    pub fn new(source: R) -> Result<Self, DecodeError> {
        Self::from_source(source, false)
    }

    fn from_source(mut source: R, owned: bool) -> Result<Self, DecodeError> {
        let header = read_header(&mut source)?;
        let anchor = source.stream_position()?;
        debug!(frames = header.frame_count, anchor, "validated PDS header");

        let first = FrameDescriptor::read_from(&mut source, None)?;
        let pixel_format = first.get_pixel_format();
        let image_size = first.get_image_size()?;
        let pixels = match image_size.pixels() {
            Some(0) => {
                return Err(DecodeError::InvalidGeometry(format!(
                    "empty image {} (ROI {}x{}, decimation {})",
                    image_size, first.roi.height, first.roi.width, first.decimation
                )))
            }
            Some(pixels) => pixels,
            None => return Err(too_large(image_size)),
        };

        let (element, read_shape, payload_len) = match first.get_element_type() {
            Ok(element) => (
                element,
                (image_size.height, image_size.width),
                pixels
                    .checked_mul(element.bytes_per_pixel())
                    .ok_or_else(|| too_large(image_size))?,
            ),
            Err(DecodeError::UnsupportedPixelFormat(fmt)) => {
                let len = fmt
                    .raw_payload_len(pixels)
                    .ok_or_else(|| too_large(image_size))?;
                warn!(
                    pixel_format = %fmt,
                    bytes = len,
                    "pixel format is not supported by the reader, raw data will be returned"
                );
                (ElementType::Raw, (len, 1), len)
            }
            Err(e) => return Err(e),
        };

        let descriptor_len = first.size as usize;
        let stride = descriptor_len
            .checked_add(payload_len)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| too_large(image_size))?;
        let layout = FrameLayout {
            element,
            read_shape,
            payload_len,
            descriptor_len,
            stride,
        };
        debug!(
            size = %image_size,
            pixel_format = %pixel_format,
            descriptor_len,
            stride = layout.stride,
            "established frame geometry"
        );

        source.seek(SeekFrom::Start(anchor))?;

        Ok(Self {
            source: Some(source),
            owned,
            state: ReaderState::GeometryEstablished,
            frames: header.frame_count,
            anchor,
            first,
            pixel_format,
            image_size,
            layout,
        })
    }

    fn source(&mut self) -> Result<&mut R, DecodeError> {
        match self.state {
            ReaderState::Closed => Err(DecodeError::Closed),
            _ => self.source.as_mut().ok_or(DecodeError::Closed),
        }
    }

    /// Moves the cursor to the start of the `n`-th frame descriptor.
    ///
    /// `n` is not checked against the frame count; reading past the end
    /// fails with [`DecodeError::TruncatedInput`]. An offset beyond any
    /// addressable position fails the same way right away.
    pub fn seek(&mut self, n: u64) -> Result<(), DecodeError> {
        let offset = n
            .checked_mul(self.layout.stride)
            .and_then(|o| o.checked_add(self.anchor))
            .filter(|&o| o <= i64::MAX as u64)
            .ok_or(DecodeError::TruncatedInput("frame descriptor"))?;
        self.source()?.seek(SeekFrom::Start(offset))?;
        self.state = ReaderState::Iterating(n);
        Ok(())
    }

    /// Moves the cursor to the first frame descriptor.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        self.seek(0)
    }

    /// Reads the descriptor and payload at the cursor and advances by one
    /// frame.
    pub fn next_frame(&mut self) -> Result<Frame, DecodeError> {
        let layout = self.layout;
        let position = match self.state {
            ReaderState::Iterating(n) => n,
            _ => 0,
        };
        let source = self.source()?;

        let descriptor = FrameDescriptor::read_from(source, Some(layout.descriptor_len))?;
        let buf = read_payload(source, layout.payload_len)?;

        self.state = ReaderState::Iterating(position + 1);
        Ok(Frame {
            descriptor,
            payload: FramePayload {
                shape: layout.read_shape,
                data: PixelData::from_le_bytes(layout.element, &buf),
            },
        })
    }

    /// Iterates over `(frame_time, payload)` for every declared frame.
    ///
    /// The cursor is reset on the first call to `next`, so each new iterator
    /// starts from frame 0.
    pub fn iter(&mut self) -> Frames<'_, R> {
        Frames {
            reader: self,
            index: 0,
            started: false,
            done: false,
        }
    }

    /// Reads the stack into memory.
    ///
    /// `count` is capped to the frames available after `offset`. The frames
    /// returned are the first ones of the file: `offset` only shortens the
    /// result and does not skip frames. Use [`PdsReader::read_range`] to
    /// start at a given frame.
    pub fn read_stack(
        &mut self,
        offset: usize,
        count: Option<usize>,
    ) -> Result<FrameStack, DecodeError> {
        let available = (self.frames as usize).saturating_sub(offset);
        let n = count.map_or(available, |c| c.min(available));

        let mut stack = self.empty_stack(n)?;
        for item in self.iter().take(n) {
            let (timestamp, payload) = item?;
            push_frame(&mut stack, timestamp, &payload)?;
        }
        Ok(stack)
    }

    /// Reads up to `count` frames starting at frame `start`.
    pub fn read_range(&mut self, start: usize, count: usize) -> Result<FrameStack, DecodeError> {
        let end = start.saturating_add(count).min(self.frames as usize);
        let n = end.saturating_sub(start);

        let mut stack = self.empty_stack(n)?;
        if n > 0 {
            self.seek(start as u64)?;
        }
        for _ in 0..n {
            let frame = self.next_frame()?;
            push_frame(&mut stack, frame.descriptor.frame_time, &frame.payload)?;
        }
        Ok(stack)
    }

    /// Number of complete frames the source holds after the anchor.
    ///
    /// The header count is not trusted here; this looks at the source length.
    /// The cursor is left where it was.
    pub fn stored_frames(&mut self) -> Result<u64, DecodeError> {
        let (anchor, stride) = (self.anchor, self.layout.stride);
        let source = self.source()?;
        let here = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(here))?;
        Ok(end.saturating_sub(anchor) / stride)
    }

    /// Allocates a stack for `n` frames, reserving only what the source can
    /// actually fill.
    fn empty_stack(&mut self, n: usize) -> Result<FrameStack, DecodeError> {
        let stored = usize::try_from(self.stored_frames()?).unwrap_or(usize::MAX);
        let reserve = n.min(stored);
        let (rows, cols) = self.layout.read_shape;
        let samples = [rows, cols, self.layout.element.channels()]
            .iter()
            .try_fold(reserve, |acc, &k| acc.checked_mul(k))
            .unwrap_or(0);
        Ok(FrameStack {
            timestamps: Vec::with_capacity(reserve),
            shape: (0, rows, cols),
            data: PixelData::with_capacity(self.layout.element, samples),
        })
    }
}

impl<R> PdsReader<R> {
    /// Number of frames declared in the header.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Image size `(height, width)` of the first frame.
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    /// Pixel format of the first frame.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Descriptor of the first frame.
    pub fn first_descriptor(&self) -> &FrameDescriptor {
        &self.first
    }

    /// Element class of the decoded payloads.
    pub fn element_type(&self) -> ElementType {
        self.layout.element
    }

    /// Shape of every payload returned by [`PdsReader::next_frame`].
    pub fn read_shape(&self) -> (usize, usize) {
        self.layout.read_shape
    }

    /// Whether payloads are returned as raw bytes.
    pub fn is_passthrough(&self) -> bool {
        self.layout.element == ElementType::Raw
    }

    /// Bytes of every frame descriptor in the file.
    pub fn descriptor_len(&self) -> usize {
        self.layout.descriptor_len
    }

    /// Bytes between the starts of consecutive frames.
    pub fn stride(&self) -> u64 {
        self.layout.stride
    }

    /// Offset of the first frame descriptor.
    pub fn anchor(&self) -> u64 {
        self.anchor
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Frame index the cursor points at, if iteration has started.
    pub fn position(&self) -> Option<u64> {
        match self.state {
            ReaderState::Iterating(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != ReaderState::Closed
    }

    /// Releases the source if the reader opened it; otherwise does nothing.
    pub fn close(&mut self) {
        if self.owned && self.source.take().is_some() {
            debug!("closed PDS source");
            self.state = ReaderState::Closed;
        }
    }

    /// Returns the underlying source, if it is still held.
    pub fn into_inner(self) -> Option<R> {
        self.source
    }
}

impl<'a, R: Read + Seek> IntoIterator for &'a mut PdsReader<R> {
    type Item = Result<(f32, FramePayload), DecodeError>;
    type IntoIter = Frames<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the frames of a [`PdsReader`].
///
/// Stops after the declared number of frames or at the first error.
pub struct Frames<'a, R> {
    reader: &'a mut PdsReader<R>,
    index: u32,
    started: bool,
    done: bool,
}

impl<R: Read + Seek> Iterator for Frames<'_, R> {
    type Item = Result<(f32, FramePayload), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.reader.frames {
            return None;
        }

        if !self.started {
            self.started = true;
            if let Err(e) = self.reader.reset() {
                self.done = true;
                return Some(Err(e));
            }
        }

        match self.reader.next_frame() {
            Ok(frame) => {
                self.index += 1;
                Some(Ok((frame.descriptor.frame_time, frame.payload)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let remaining = (self.reader.frames - self.index) as usize;
        (0, Some(remaining))
    }
}

impl<R: Read + Seek> FusedIterator for Frames<'_, R> {}

/// Reads a whole PDS file into memory.
pub fn read<P: AsRef<Path>>(path: P) -> Result<FrameStack, DecodeError> {
    let mut reader = PdsReader::open(path)?;
    reader.read_stack(0, None)
}

fn read_header<R: Read>(source: &mut R) -> Result<FileHeader, DecodeError> {
    let mut buf = [0u8; FileHeader::LEN];
    read_exact_or_truncated(source, &mut buf, "file header")?;

    let magic = LittleEndian::read_u32(&buf[0..4]);
    if magic != PDS_MAGIC_NUMBER {
        return Err(DecodeError::BadMagicNumber(magic));
    }

    Ok(FileHeader {
        magic,
        frame_count: LittleEndian::read_u32(&buf[4..8]),
    })
}

/// Reads a payload of `len` bytes, growing the buffer as data arrives so a
/// bogus length cannot force a huge allocation up front.
fn read_payload<R: Read>(source: &mut R, len: usize) -> Result<Vec<u8>, DecodeError> {
    const INITIAL_CAPACITY: usize = 64 * 1024 * 1024;

    let mut buf = Vec::with_capacity(len.min(INITIAL_CAPACITY));
    source.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(DecodeError::TruncatedInput("frame payload"));
    }
    Ok(buf)
}

fn too_large(size: ImageSize) -> DecodeError {
    DecodeError::InvalidGeometry(format!("image {} is too large to address", size))
}

fn push_frame(
    stack: &mut FrameStack,
    timestamp: f32,
    payload: &FramePayload,
) -> Result<(), DecodeError> {
    if !stack.data.append(&payload.data) {
        return Err(DecodeError::InvalidGeometry(
            "frame payload does not match the stack element type".to_string(),
        ));
    }
    stack.timestamps.push(timestamp as f64);
    stack.shape.0 += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Roi;
    use crate::writer::StreamWriter;
    use std::io::Cursor;

    fn descriptor(i: u32, pixel_format: f32) -> FrameDescriptor {
        FrameDescriptor {
            frame_time: i as f32 * 0.5,
            frame_number: i,
            roi: Roi {
                left: 0.0,
                top: 0.0,
                width: 4.0,
                height: 2.0,
            },
            decimation: 1.0,
            pixel_format,
            ..FrameDescriptor::new_full()
        }
    }

    fn stream(frames: u32, pixel_format: f32, bytes_per_frame: usize) -> Vec<u8> {
        let mut w = StreamWriter::new(Vec::new(), frames).unwrap();
        for i in 0..frames {
            let payload = vec![i as u8; bytes_per_frame];
            w.write_frame(&descriptor(i, pixel_format), &payload).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn test_establish_geometry() {
        let reader = PdsReader::new(Cursor::new(stream(3, 1.0, 16))).unwrap();
        assert_eq!(reader.frames(), 3);
        assert_eq!(reader.image_size(), ImageSize::new(2, 4));
        assert_eq!(reader.pixel_format(), PixelFormat::Mono16);
        assert_eq!(reader.anchor(), 8);
        assert_eq!(reader.descriptor_len(), FrameDescriptor::LEN);
        assert_eq!(reader.stride(), (FrameDescriptor::LEN + 16) as u64);
        assert_eq!(reader.state(), ReaderState::GeometryEstablished);
        assert!(!reader.is_passthrough());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = stream(1, 0.0, 8);
        bytes[0] = 0x05;
        assert!(matches!(
            PdsReader::new(Cursor::new(bytes)),
            Err(DecodeError::BadMagicNumber(0x0404_0405))
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            PdsReader::new(Cursor::new(vec![4, 4, 4, 4, 1])),
            Err(DecodeError::TruncatedInput("file header"))
        ));
    }

    #[test]
    fn test_next_frame_advances_cursor() {
        let mut reader = PdsReader::new(Cursor::new(stream(3, 0.0, 8))).unwrap();
        reader.reset().unwrap();
        let f0 = reader.next_frame().unwrap();
        let f1 = reader.next_frame().unwrap();
        assert_eq!(f0.descriptor.frame_number, 0);
        assert_eq!(f1.descriptor.frame_number, 1);
        assert_eq!(f1.payload.shape, (2, 4));
        assert_eq!(f1.payload.data, PixelData::U8(vec![1; 8]));
        assert_eq!(reader.position(), Some(2));
    }

    #[test]
    fn test_passthrough_for_unmapped_format() {
        // MONO12_PACKED: 8 pixels in 12 bytes
        let mut reader = PdsReader::new(Cursor::new(stream(2, 13.0, 12))).unwrap();
        assert!(reader.is_passthrough());
        assert_eq!(reader.read_shape(), (12, 1));

        let frame = reader.next_frame().unwrap();
        assert_eq!(frame.payload.data, PixelData::Raw(vec![0; 12]));
    }

    #[test]
    fn test_zero_decimation_is_invalid() {
        let mut d = descriptor(0, 0.0);
        d.decimation = 0.0;
        let mut w = StreamWriter::new(Vec::new(), 1).unwrap();
        w.write_frame(&d, &[]).unwrap();
        let bytes = w.finish().unwrap();
        assert!(matches!(
            PdsReader::new(Cursor::new(bytes)),
            Err(DecodeError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_empty_roi_is_invalid() {
        let mut d = descriptor(0, 0.0);
        d.roi.height = 0.0;
        let mut w = StreamWriter::new(Vec::new(), 1).unwrap();
        w.write_frame(&d, &[]).unwrap();
        let bytes = w.finish().unwrap();
        assert!(matches!(
            PdsReader::new(Cursor::new(bytes)),
            Err(DecodeError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_close_only_releases_owned_source() {
        let mut reader = PdsReader::new(Cursor::new(stream(1, 0.0, 8))).unwrap();
        reader.close();
        assert!(reader.is_open());
        assert!(reader.next_frame().is_ok());
        assert!(reader.into_inner().is_some());
    }
}
