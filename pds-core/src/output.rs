//! Exporters for decoded PDS stacks.
//!
//! Supports NumPy `.npy` arrays, multipage TIFF and a per-frame CSV table.
//! Formats are looked up by file extension in an [`ExporterRegistry`] built by
//! the caller, so the set of formats is never global state.

use crate::descriptor::DecodeError;
use crate::reader::PdsReader;
use crate::types::{FrameStack, PixelData};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tiff::encoder::{colortype, TiffEncoder};
use tracing::debug;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read input: {0}")]
    Decode(#[from] DecodeError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("{0} is an unknown extension. Supported: {1}")]
    UnknownFormat(String, String),
}

/// Signature shared by every exporter.
pub type ExportFn<R> = fn(&mut PdsReader<R>, &Path) -> Result<(), OutputError>;

/// A registered output format.
pub struct Exporter<R> {
    pub extension: &'static str,
    pub description: &'static str,
    pub export: ExportFn<R>,
}

/// Maps lower-case file extensions (with the leading dot) to exporters.
pub struct ExporterRegistry<R> {
    exporters: BTreeMap<&'static str, Exporter<R>>,
}

impl<R: Read + Seek> Default for ExporterRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read + Seek> ExporterRegistry<R> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            exporters: BTreeMap::new(),
        }
    }

    /// Creates a registry with the built-in formats.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(".npy", "Uncompressed NumPy array", write_npy::<R>);
        registry.register(".tif", "Multipage TIFF", write_tif::<R>);
        registry.register(".tiff", "Multipage TIFF", write_tif::<R>);
        registry.register(".csv", "Per-frame metadata table", write_csv::<R>);
        registry
    }

    /// Adds or replaces the exporter for `extension`.
    pub fn register(&mut self, extension: &'static str, description: &'static str, export: ExportFn<R>) {
        self.exporters.insert(
            extension,
            Exporter {
                extension,
                description,
                export,
            },
        );
    }

    pub fn get(&self, extension: &str) -> Option<&Exporter<R>> {
        self.exporters.get(extension.to_lowercase().as_str())
    }

    /// Finds the exporter for the extension of `path`.
    pub fn for_path(&self, path: &Path) -> Result<&Exporter<R>, OutputError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        self.get(&ext).ok_or_else(|| {
            let supported: Vec<&str> = self.exporters.keys().copied().collect();
            OutputError::UnknownFormat(
                if ext.is_empty() { "<none>".to_string() } else { ext },
                supported.join(", "),
            )
        })
    }

    /// Lists `(extension, description)` for every registered format.
    pub fn formats(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.exporters
            .values()
            .map(|exporter| (exporter.extension, exporter.description))
    }

    /// Writes the content of `reader` to `output` in the format implied by
    /// its extension.
    pub fn convert(&self, reader: &mut PdsReader<R>, output: &Path) -> Result<(), OutputError> {
        let exporter = self.for_path(output)?;
        debug!(format = exporter.extension, output = %output.display(), "exporting");
        (exporter.export)(reader, output)
    }
}

/// Writes one timestamp per line with microsecond precision.
pub fn write_timestamps<P: AsRef<Path>>(path: P, timestamps: &[f64]) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for t in timestamps {
        writeln!(writer, "{:.6}", t)?;
    }
    writer.flush()?;
    Ok(())
}

/// Path of the timestamp file written next to `output`.
pub fn timestamps_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".txt");
    PathBuf::from(name)
}

/// NumPy `.npy` (format version 1.0) writer.
pub struct NpyWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> NpyWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the magic string and the array description for `stack`.
    pub fn write_header(&mut self, stack: &FrameStack) -> Result<(), OutputError> {
        let (frames, rows, cols) = stack.shape;
        let (descr, shape) = match stack.data {
            PixelData::U8(_) | PixelData::Raw(_) => ("|u1", format!("({}, {}, {})", frames, rows, cols)),
            PixelData::U16(_) => ("<u2", format!("({}, {}, {})", frames, rows, cols)),
            PixelData::Rgb8(_) => ("|u1", format!("({}, {}, {}, 3)", frames, rows, cols)),
            PixelData::Rgb16(_) => ("<u2", format!("({}, {}, {}, 3)", frames, rows, cols)),
        };

        let mut dict = format!(
            "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
            descr, shape
        );
        // magic (6) + version (2) + length (2) + dict, padded to 64 bytes
        let unpadded = 10 + dict.len() + 1;
        dict.push_str(&" ".repeat((64 - unpadded % 64) % 64));
        dict.push('\n');

        self.writer.write_all(b"\x93NUMPY")?;
        self.writer.write_all(&[1, 0])?;
        self.writer.write_u16::<LittleEndian>(dict.len() as u16)?;
        self.writer.write_all(dict.as_bytes())?;
        Ok(())
    }

    /// Writes the samples in little-endian order.
    pub fn write_data(&mut self, data: &PixelData) -> Result<(), OutputError> {
        match data {
            PixelData::U8(v) | PixelData::Rgb8(v) | PixelData::Raw(v) => self.writer.write_all(v)?,
            PixelData::U16(v) | PixelData::Rgb16(v) => {
                for &sample in v {
                    self.writer.write_u16::<LittleEndian>(sample)?;
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the whole stack as `.npy` plus a timestamp file.
pub fn write_npy<R: Read + Seek>(reader: &mut PdsReader<R>, path: &Path) -> Result<(), OutputError> {
    let stack = reader.read_stack(0, None)?;

    let mut writer = NpyWriter::new(File::create(path)?);
    writer.write_header(&stack)?;
    writer.write_data(&stack.data)?;
    writer.flush()?;

    write_timestamps(timestamps_path(path), &stack.timestamps)
}

/// Writes every frame as one page of a TIFF file plus a timestamp file.
///
/// Raw passthrough frames are stored as single-column 8-bit pages.
pub fn write_tif<R: Read + Seek>(reader: &mut PdsReader<R>, path: &Path) -> Result<(), OutputError> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut timestamps = Vec::new();
    {
        let mut encoder = TiffEncoder::new(&mut out)?;
        for item in reader.iter() {
            let (timestamp, payload) = item?;
            let (rows, cols) = payload.shape;
            let (width, height) = (cols as u32, rows as u32);
            match &payload.data {
                PixelData::U8(v) | PixelData::Raw(v) => {
                    encoder.write_image::<colortype::Gray8>(width, height, v)?
                }
                PixelData::U16(v) => encoder.write_image::<colortype::Gray16>(width, height, v)?,
                PixelData::Rgb8(v) => encoder.write_image::<colortype::RGB8>(width, height, v)?,
                PixelData::Rgb16(v) => encoder.write_image::<colortype::RGB16>(width, height, v)?,
            }
            timestamps.push(timestamp as f64);
        }
    }
    out.flush()?;

    write_timestamps(timestamps_path(path), &timestamps)
}

/// Writes one CSV row of descriptor fields per frame.
pub fn write_csv<R: Read + Seek>(reader: &mut PdsReader<R>, path: &Path) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(
        writer,
        "frame,frame_time,frame_number,frame_time_hr,frame_number_hr,shutter,gain,temperature"
    )?;

    reader.reset()?;
    for n in 0..reader.frames() {
        let d = reader.next_frame()?.descriptor;
        writeln!(
            writer,
            "{},{:.6},{},{:.9},{},{},{},{}",
            n,
            d.frame_time,
            d.frame_number,
            d.frame_time_hr,
            d.frame_number_hr,
            d.shutter,
            d.gain,
            d.temperature
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FrameDescriptor;
    use crate::types::Roi;
    use crate::writer::StreamWriter;
    use std::io::Cursor;

    fn mono16_reader(frames: u32) -> PdsReader<Cursor<Vec<u8>>> {
        let mut w = StreamWriter::new(Vec::new(), frames).unwrap();
        for i in 0..frames {
            let d = FrameDescriptor {
                frame_time: i as f32,
                frame_number: i,
                gain: 2.0,
                roi: Roi {
                    left: 0.0,
                    top: 0.0,
                    width: 3.0,
                    height: 2.0,
                },
                decimation: 1.0,
                pixel_format: 1.0,
                ..FrameDescriptor::new_full()
            };
            w.write_frame(&d, &[i as u8; 12]).unwrap();
        }
        PdsReader::new(Cursor::new(w.finish().unwrap())).unwrap()
    }

    #[test]
    fn test_npy_header_is_aligned() {
        let stack = FrameStack {
            timestamps: vec![0.0],
            shape: (1, 2, 3),
            data: PixelData::U16(vec![0; 6]),
        };
        let mut output = Vec::new();
        {
            let mut writer = NpyWriter::new(&mut output);
            writer.write_header(&stack).unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(output.len() % 64, 0);
        assert_eq!(&output[..6], b"\x93NUMPY");
        let header = String::from_utf8_lossy(&output[10..]);
        assert!(header.contains("'descr': '<u2'"));
        assert!(header.contains("'shape': (1, 2, 3)"));
        assert!(header.ends_with('\n'));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExporterRegistry::<Cursor<Vec<u8>>>::with_defaults();
        assert!(registry.for_path(Path::new("out.NPY")).is_ok());
        assert!(registry.for_path(Path::new("out.tif")).is_ok());
        assert!(matches!(
            registry.for_path(Path::new("out.avi")),
            Err(OutputError::UnknownFormat(ext, _)) if ext == ".avi"
        ));
        assert!(matches!(
            registry.for_path(Path::new("out")),
            Err(OutputError::UnknownFormat(..))
        ));
        assert_eq!(registry.formats().count(), 4);
    }

    #[test]
    fn test_convert_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.npy");
        let mut reader = mono16_reader(2);

        ExporterRegistry::with_defaults()
            .convert(&mut reader, &path)
            .unwrap();

        let data = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
        assert_eq!(data.len(), 10 + header_len + 2 * 6 * 2);
        assert_eq!(&data[10 + header_len + 12..10 + header_len + 14], &[1, 1]);

        let ts = std::fs::read_to_string(timestamps_path(&path)).unwrap();
        assert_eq!(ts, "0.000000\n1.000000\n");
    }

    #[test]
    fn test_convert_tif() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let mut reader = mono16_reader(3);

        write_tif(&mut reader, &path).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..4], b"II*\0");
        let ts = std::fs::read_to_string(timestamps_path(&path)).unwrap();
        assert_eq!(ts.lines().count(), 3);
    }

    #[test]
    fn test_convert_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        let mut reader = mono16_reader(2);

        write_csv(&mut reader, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("frame,frame_time"));
        assert!(lines[2].starts_with("1,1.000000,1,"));
        assert!(lines[2].contains(",2,"));
    }
}
