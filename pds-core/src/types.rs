//! Core types for PixeLINK Data Stream files.
//!
//! This module defines the file header, the pixel format enumeration, the
//! sub-records nested inside a frame descriptor, and the containers used to
//! hand decoded pixels to callers.

use std::fmt;

/// Magic number stored in the first four bytes of every PDS file.
pub const PDS_MAGIC_NUMBER: u32 = 0x0404_0404;

/// Number of strobe outputs described by the GPIO sub-record.
pub const MAX_STROBES: usize = 16;

/// Number of knee points in the extended shutter sub-record.
pub const MAX_KNEE_POINTS: usize = 4;

/// Fixed 8-byte file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Always [`PDS_MAGIC_NUMBER`] for a valid file
    pub magic: u32,
    /// Number of frames declared by the writer
    pub frame_count: u32,
}

impl FileHeader {
    /// Size of the header in bytes.
    pub const LEN: usize = 8;

    /// Creates a header with the PDS magic number.
    pub fn new(frame_count: u32) -> Self {
        Self {
            magic: PDS_MAGIC_NUMBER,
            frame_count,
        }
    }
}

/// Pixel formats a PixeLINK camera can record.
///
/// The descriptor stores the code as a float. Codes outside the closed set
/// are kept as [`PixelFormat::Unsupported`] so the reader can still fall back
/// to raw passthrough instead of rejecting the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Yuv422,
    Bayer8Grbg,
    Bayer16Grbg,
    Rgb24,
    Rgb48,
    Bayer8Rggb,
    Bayer8Gbrg,
    Bayer8Bggr,
    Bayer16Rggb,
    Bayer16Gbrg,
    Bayer16Bggr,
    Mono12Packed,
    Bayer12GrbgPacked,
    Bayer12RggbPacked,
    Bayer12GbrgPacked,
    Bayer12BggrPacked,
    Rgb24NonDib,
    Rgb48Dib,
    Mono12PackedMsFirst,
    Bayer12GrbgPackedMsFirst,
    Bayer12RggbPackedMsFirst,
    Bayer12GbrgPackedMsFirst,
    Bayer12BggrPackedMsFirst,
    /// Code outside the known range
    Unsupported(i32),
}

impl PixelFormat {
    /// Maps an integer code to a pixel format.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Mono8,
            1 => Self::Mono16,
            2 => Self::Yuv422,
            3 => Self::Bayer8Grbg,
            4 => Self::Bayer16Grbg,
            5 => Self::Rgb24,
            6 => Self::Rgb48,
            7 => Self::Bayer8Rggb,
            8 => Self::Bayer8Gbrg,
            9 => Self::Bayer8Bggr,
            10 => Self::Bayer16Rggb,
            11 => Self::Bayer16Gbrg,
            12 => Self::Bayer16Bggr,
            13 => Self::Mono12Packed,
            14 => Self::Bayer12GrbgPacked,
            15 => Self::Bayer12RggbPacked,
            16 => Self::Bayer12GbrgPacked,
            17 => Self::Bayer12BggrPacked,
            18 => Self::Rgb24NonDib,
            19 => Self::Rgb48Dib,
            20 => Self::Mono12PackedMsFirst,
            21 => Self::Bayer12GrbgPackedMsFirst,
            22 => Self::Bayer12RggbPackedMsFirst,
            23 => Self::Bayer12GbrgPackedMsFirst,
            24 => Self::Bayer12BggrPackedMsFirst,
            other => Self::Unsupported(other),
        }
    }

    /// Interprets the float stored in a frame descriptor.
    ///
    /// Non-integral and non-finite values cannot name a format and map to
    /// `Unsupported`.
    pub fn from_raw(value: f32) -> Self {
        if !value.is_finite() || value.fract() != 0.0 {
            return Self::Unsupported(value as i32);
        }
        Self::from_code(value as i32)
    }

    /// Returns the integer code of this format.
    pub fn code(&self) -> i32 {
        match self {
            Self::Mono8 => 0,
            Self::Mono16 => 1,
            Self::Yuv422 => 2,
            Self::Bayer8Grbg => 3,
            Self::Bayer16Grbg => 4,
            Self::Rgb24 => 5,
            Self::Rgb48 => 6,
            Self::Bayer8Rggb => 7,
            Self::Bayer8Gbrg => 8,
            Self::Bayer8Bggr => 9,
            Self::Bayer16Rggb => 10,
            Self::Bayer16Gbrg => 11,
            Self::Bayer16Bggr => 12,
            Self::Mono12Packed => 13,
            Self::Bayer12GrbgPacked => 14,
            Self::Bayer12RggbPacked => 15,
            Self::Bayer12GbrgPacked => 16,
            Self::Bayer12BggrPacked => 17,
            Self::Rgb24NonDib => 18,
            Self::Rgb48Dib => 19,
            Self::Mono12PackedMsFirst => 20,
            Self::Bayer12GrbgPackedMsFirst => 21,
            Self::Bayer12RggbPackedMsFirst => 22,
            Self::Bayer12GbrgPackedMsFirst => 23,
            Self::Bayer12BggrPackedMsFirst => 24,
            Self::Unsupported(code) => *code,
        }
    }

    /// Returns the element class for formats with a known pixel width.
    ///
    /// `None` means the format is known (or not) but has no mapping and has
    /// to be read as raw bytes.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            Self::Mono8 | Self::Bayer8Grbg | Self::Bayer8Rggb | Self::Bayer8Gbrg | Self::Bayer8Bggr => {
                Some(ElementType::U8)
            }
            Self::Mono16
            | Self::Yuv422
            | Self::Bayer16Grbg
            | Self::Bayer16Rggb
            | Self::Bayer16Gbrg
            | Self::Bayer16Bggr => Some(ElementType::U16),
            Self::Rgb24 => Some(ElementType::Rgb8),
            Self::Rgb48 => Some(ElementType::Rgb16),
            Self::Mono12Packed
            | Self::Bayer12GrbgPacked
            | Self::Bayer12RggbPacked
            | Self::Bayer12GbrgPacked
            | Self::Bayer12BggrPacked
            | Self::Rgb24NonDib
            | Self::Rgb48Dib
            | Self::Mono12PackedMsFirst
            | Self::Bayer12GrbgPackedMsFirst
            | Self::Bayer12RggbPackedMsFirst
            | Self::Bayer12GbrgPackedMsFirst
            | Self::Bayer12BggrPackedMsFirst
            | Self::Unsupported(_) => None,
        }
    }

    /// Best-effort payload size in bytes for formats without a mapping, or
    /// `None` if it does not fit in `usize`.
    ///
    /// 12-bit packed formats store two pixels in three bytes, RGB24_NON_DIB
    /// uses 3 bytes and RGB48_DIB 6 bytes per pixel. These widths differ
    /// from the legacy `pixels * code` sizing, which gives a different frame
    /// stride for those formats. For codes outside the enumeration the code
    /// itself is used as the byte width, which is the only hint the file
    /// carries.
    pub fn raw_payload_len(&self, pixels: usize) -> Option<usize> {
        match self {
            Self::Mono12Packed
            | Self::Bayer12GrbgPacked
            | Self::Bayer12RggbPacked
            | Self::Bayer12GbrgPacked
            | Self::Bayer12BggrPacked
            | Self::Mono12PackedMsFirst
            | Self::Bayer12GrbgPackedMsFirst
            | Self::Bayer12RggbPackedMsFirst
            | Self::Bayer12GbrgPackedMsFirst
            | Self::Bayer12BggrPackedMsFirst => pixels.checked_mul(3).map(|n| n.div_ceil(2)),
            Self::Rgb24NonDib => pixels.checked_mul(3),
            Self::Rgb48Dib => pixels.checked_mul(6),
            Self::Unsupported(code) => pixels.checked_mul((*code).max(1) as usize),
            mapped => mapped
                .element_type()
                .map_or(Some(pixels), |element| {
                    pixels.checked_mul(element.bytes_per_pixel())
                }),
        }
    }

    /// Upper-case name as used by the PixeLINK SDK.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mono8 => "MONO8",
            Self::Mono16 => "MONO16",
            Self::Yuv422 => "YUV422",
            Self::Bayer8Grbg => "BAYER8_GRBG",
            Self::Bayer16Grbg => "BAYER16_GRBG",
            Self::Rgb24 => "RGB24",
            Self::Rgb48 => "RGB48",
            Self::Bayer8Rggb => "BAYER8_RGGB",
            Self::Bayer8Gbrg => "BAYER8_GBRG",
            Self::Bayer8Bggr => "BAYER8_BGGR",
            Self::Bayer16Rggb => "BAYER16_RGGB",
            Self::Bayer16Gbrg => "BAYER16_GBRG",
            Self::Bayer16Bggr => "BAYER16_BGGR",
            Self::Mono12Packed => "MONO12_PACKED",
            Self::Bayer12GrbgPacked => "BAYER12_GRBG_PACKED",
            Self::Bayer12RggbPacked => "BAYER12_RGGB_PACKED",
            Self::Bayer12GbrgPacked => "BAYER12_GBRG_PACKED",
            Self::Bayer12BggrPacked => "BAYER12_BGGR_PACKED",
            Self::Rgb24NonDib => "RGB24_NON_DIB",
            Self::Rgb48Dib => "RGB48_DIB",
            Self::Mono12PackedMsFirst => "MONO12_PACKED_MSFIRST",
            Self::Bayer12GrbgPackedMsFirst => "BAYER12_GRBG_PACKED_MSFIRST",
            Self::Bayer12RggbPackedMsFirst => "BAYER12_RGGB_PACKED_MSFIRST",
            Self::Bayer12GbrgPackedMsFirst => "BAYER12_GBRG_PACKED_MSFIRST",
            Self::Bayer12BggrPackedMsFirst => "BAYER12_BGGR_PACKED_MSFIRST",
            Self::Unsupported(_) => "UNSUPPORTED",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(code) => write!(f, "UNSUPPORTED({})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Element classes a frame payload can be decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// One byte per pixel (mono and Bayer 8-bit)
    U8,
    /// Two little-endian bytes per pixel (mono/Bayer 16-bit, YUV422)
    U16,
    /// Three interleaved 8-bit channels
    Rgb8,
    /// Three interleaved 16-bit channels
    Rgb16,
    /// Undifferentiated bytes for unmapped formats
    Raw,
}

impl ElementType {
    /// Bytes occupied by a single element.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::U8 | Self::Raw => 1,
            Self::U16 => 2,
            Self::Rgb8 => 3,
            Self::Rgb16 => 6,
        }
    }

    /// Number of samples per element.
    pub fn channels(&self) -> usize {
        match self {
            Self::Rgb8 | Self::Rgb16 => 3,
            Self::U8 | Self::U16 | Self::Raw => 1,
        }
    }
}

/// Image size as `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

impl ImageSize {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of pixels in one image, or `None` on overflow.
    pub fn pixels(&self) -> Option<usize> {
        self.height.checked_mul(self.width)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Trigger configuration at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Trigger {
    pub mode: f32,
    pub kind: f32,
    pub polarity: f32,
    pub delay: f32,
    pub parameter: f32,
}

/// Strobe output configuration, one entry per strobe.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gpio {
    pub mode: [f32; MAX_STROBES],
    pub polarity: [f32; MAX_STROBES],
    pub parameter1: [f32; MAX_STROBES],
    pub parameter2: [f32; MAX_STROBES],
    pub parameter3: [f32; MAX_STROBES],
}

/// Region of interest on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Roi {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// A horizontal/vertical pair (flip, pixel addressing).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HorizontalVertical {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Per-channel white shading gains.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WhiteShading {
    pub red_gain: f32,
    pub green_gain: f32,
    pub blue_gain: f32,
}

/// Window and ceiling used to compute the sharpness score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SharpnessScoreParams {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub max_value: f32,
}

/// Decoded pixel samples, one variant per element class.
///
/// RGB variants hold interleaved channels, so their length is three times the
/// element count.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    Rgb8(Vec<u8>),
    Rgb16(Vec<u16>),
    Raw(Vec<u8>),
}

impl PixelData {
    /// Creates an empty buffer of the given class with room for `samples`.
    pub fn with_capacity(element: ElementType, samples: usize) -> Self {
        match element {
            ElementType::U8 => Self::U8(Vec::with_capacity(samples)),
            ElementType::U16 => Self::U16(Vec::with_capacity(samples)),
            ElementType::Rgb8 => Self::Rgb8(Vec::with_capacity(samples)),
            ElementType::Rgb16 => Self::Rgb16(Vec::with_capacity(samples)),
            ElementType::Raw => Self::Raw(Vec::with_capacity(samples)),
        }
    }

    /// Decodes little-endian bytes into samples of the given class.
    pub fn from_le_bytes(element: ElementType, bytes: &[u8]) -> Self {
        let words = || {
            bytes
                .chunks_exact(2)
                .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
                .collect::<Vec<u16>>()
        };
        match element {
            ElementType::U8 => Self::U8(bytes.to_vec()),
            ElementType::U16 => Self::U16(words()),
            ElementType::Rgb8 => Self::Rgb8(bytes.to_vec()),
            ElementType::Rgb16 => Self::Rgb16(words()),
            ElementType::Raw => Self::Raw(bytes.to_vec()),
        }
    }

    /// Returns the element class of this buffer.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::U16(_) => ElementType::U16,
            Self::Rgb8(_) => ElementType::Rgb8,
            Self::Rgb16(_) => ElementType::Rgb16,
            Self::Raw(_) => ElementType::Raw,
        }
    }

    /// Number of samples (channels included).
    pub fn samples(&self) -> usize {
        match self {
            Self::U8(v) | Self::Rgb8(v) | Self::Raw(v) => v.len(),
            Self::U16(v) | Self::Rgb16(v) => v.len(),
        }
    }

    /// Number of elements (pixels, or bytes in raw mode).
    pub fn len(&self) -> usize {
        self.samples() / self.element_type().channels()
    }

    pub fn is_empty(&self) -> bool {
        self.samples() == 0
    }

    /// Appends another buffer of the same class.
    ///
    /// Returns `false` and leaves `self` untouched when the classes differ.
    pub fn append(&mut self, other: &PixelData) -> bool {
        match (self, other) {
            (Self::U8(a), Self::U8(b))
            | (Self::Rgb8(a), Self::Rgb8(b))
            | (Self::Raw(a), Self::Raw(b)) => a.extend_from_slice(b),
            (Self::U16(a), Self::U16(b)) | (Self::Rgb16(a), Self::Rgb16(b)) => {
                a.extend_from_slice(b)
            }
            _ => return false,
        }
        true
    }
}

/// Pixels of a single frame together with their logical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePayload {
    /// `(height, width)` for mapped formats, `(elements, 1)` in raw mode
    pub shape: (usize, usize),
    pub data: PixelData,
}

/// A whole stack of frames materialized in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    /// Low-resolution `frame_time` of every frame, in seconds
    pub timestamps: Vec<f64>,
    /// `(frames, height, width)`, or `(frames, elements, 1)` in raw mode
    pub shape: (usize, usize, usize),
    /// Frames concatenated in row-major order
    pub data: PixelData,
}

impl FrameStack {
    /// Number of frames in the stack.
    pub fn len(&self) -> usize {
        self.shape.0
    }

    pub fn is_empty(&self) -> bool {
        self.shape.0 == 0
    }
}
