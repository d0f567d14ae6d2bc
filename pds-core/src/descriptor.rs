//! Frame descriptor codec.
//!
//! Every frame in a PDS file is preceded by a frame descriptor: a fixed
//! record of camera settings whose first field declares how many bytes of the
//! record are actually stored. Older firmware writes shorter descriptors, so
//! decoding maps the stored prefix onto the full layout and leaves the
//! remaining fields zeroed.
//!
//! The layout follows the camera SDK structure with natural alignment. Two
//! 4-byte gaps precede the 8-byte fields `frame_time_hr` and
//! `actual_frame_rate`, giving a total of [`FrameDescriptor::LEN`] bytes.

use crate::types::{
    ElementType, Gpio, HorizontalVertical, ImageSize, PixelFormat, Roi, SharpnessScoreParams,
    Trigger, WhiteShading, MAX_KNEE_POINTS,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Errors that can occur while decoding a PDS stream.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a PixeLINK Data Stream file (magic number 0x{0:08x})")]
    BadMagicNumber(u32),

    #[error("Unexpected end of file while reading {0}")]
    TruncatedInput(&'static str),

    #[error("Descriptor declares {declared} bytes but the layout holds only {max}")]
    OversizedDescriptor { declared: usize, max: usize },

    #[error("No pixel width is known for format {0}")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Reader is closed")]
    Closed,
}

/// Reads exactly `buf.len()` bytes, reporting a short read as truncation.
pub(crate) fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), DecodeError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DecodeError::TruncatedInput(what),
        _ => DecodeError::Io(e),
    })
}

// Alignment gaps of the SDK structure.
const PAD_BEFORE_FRAME_TIME_HR: usize = 4;
const PAD_BEFORE_ACTUAL_FRAME_RATE: usize = 4;

/// Camera state recorded alongside a single frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameDescriptor {
    /// Number of bytes of this record stored in the file
    pub size: u32,
    /// Low-resolution timestamp in seconds
    pub frame_time: f32,
    /// Low-resolution frame counter
    pub frame_number: u32,

    pub brightness: f32,
    pub autoexposure: f32,
    pub sharpness: f32,
    pub white_balance: f32,
    pub hue: f32,
    pub saturation: f32,
    pub gamma: f32,
    pub shutter: f32,
    pub gain: f32,
    pub iris: f32,
    pub focus: f32,
    pub temperature: f32,

    pub trigger: Trigger,

    pub zoom: f32,
    pub pan: f32,
    pub tilt: f32,
    pub optical_filter: f32,

    pub gpio: Gpio,

    pub frame_rate: f32,

    pub roi: Roi,
    pub flip: HorizontalVertical,

    pub decimation: f32,
    /// Pixel format code stored as a float
    pub pixel_format: f32,

    pub extended_shutter: [f32; MAX_KNEE_POINTS],

    pub auto_roi: Roi,

    pub decimation_mode: f32,

    pub white_shading: WhiteShading,

    pub rotate: f32,
    pub image_clock_divisor: f32,
    pub trigger_with_controlled_light: f32,
    pub max_pixel_size: f32,

    pub trigger_number: f32,
    pub image_processing_umask: f32,

    pub pixel_addressing_value: HorizontalVertical,

    /// High-resolution timestamp, only present in full-size descriptors
    pub frame_time_hr: f64,
    /// High-resolution frame counter, only present in full-size descriptors
    pub frame_number_hr: u64,

    pub bandwidth_limit: f32,
    pub actual_frame_rate: f64,

    pub sharpness_score_roi: SharpnessScoreParams,
    pub sharpness_score: f32,
}

impl FrameDescriptor {
    /// Size in bytes of the full known layout.
    pub const LEN: usize = 592;

    /// Creates a zeroed descriptor declaring the full layout size.
    pub fn new_full() -> Self {
        Self {
            size: Self::LEN as u32,
            ..Self::default()
        }
    }

    /// Decodes a descriptor from the bytes stored in the file.
    ///
    /// `bytes.len()` is taken as the declared size. Fields past the end of
    /// `bytes` keep their zero value; a field cut in half keeps the bytes
    /// that were stored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > Self::LEN {
            return Err(DecodeError::OversizedDescriptor {
                declared: bytes.len(),
                max: Self::LEN,
            });
        }

        let mut full = [0u8; Self::LEN];
        full[..bytes.len()].copy_from_slice(bytes);
        let mut rdr = Cursor::new(&full[..]);

        let d = Self::read_layout(&mut rdr)?;
        debug_assert_eq!(rdr.position() as usize, Self::LEN);
        Ok(d)
    }

    /// Reads a descriptor from the current position of a stream.
    ///
    /// Without `declared_size` the size is peeked from the first four bytes
    /// and then re-read as part of the record. Exactly the declared number of
    /// bytes is consumed.
    pub fn read_from<R: Read + Seek>(
        reader: &mut R,
        declared_size: Option<usize>,
    ) -> Result<Self, DecodeError> {
        let size = match declared_size {
            Some(size) => size,
            None => {
                let mut peek = [0u8; 4];
                read_exact_or_truncated(reader, &mut peek, "descriptor size")?;
                reader.seek(SeekFrom::Current(-4))?;
                u32::from_le_bytes(peek) as usize
            }
        };

        if size > Self::LEN {
            return Err(DecodeError::OversizedDescriptor {
                declared: size,
                max: Self::LEN,
            });
        }

        let mut buf = vec![0u8; size];
        read_exact_or_truncated(reader, &mut buf, "frame descriptor")?;
        Self::decode(&buf)
    }

    /// Encodes the descriptor as stored in a file: the first `size` bytes of
    /// the full layout.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let declared = self.size as usize;
        if declared > Self::LEN {
            return Err(DecodeError::OversizedDescriptor {
                declared,
                max: Self::LEN,
            });
        }

        let mut buf = Vec::with_capacity(Self::LEN);
        self.write_layout(&mut buf)?;
        debug_assert_eq!(buf.len(), Self::LEN);
        buf.truncate(declared);
        Ok(buf)
    }

    /// Returns the pixel format as an enum.
    pub fn get_pixel_format(&self) -> PixelFormat {
        PixelFormat::from_raw(self.pixel_format)
    }

    /// Returns the number of bytes used by each pixel.
    ///
    /// Fails with [`DecodeError::UnsupportedPixelFormat`] for formats with no
    /// known width.
    pub fn get_bytes_per_pixel(&self) -> Result<usize, DecodeError> {
        let fmt = self.get_pixel_format();
        fmt.element_type()
            .map(|element| element.bytes_per_pixel())
            .ok_or(DecodeError::UnsupportedPixelFormat(fmt))
    }

    /// Returns the element class used to decode payloads of this frame.
    pub fn get_element_type(&self) -> Result<ElementType, DecodeError> {
        let fmt = self.get_pixel_format();
        fmt.element_type()
            .ok_or(DecodeError::UnsupportedPixelFormat(fmt))
    }

    /// Returns the image size `(height, width)` after decimation.
    pub fn get_image_size(&self) -> Result<ImageSize, DecodeError> {
        let decimation = self.decimation;
        if !decimation.is_finite() || decimation <= 0.0 {
            return Err(DecodeError::InvalidGeometry(format!(
                "decimation must be positive, got {}",
                decimation
            )));
        }

        let (height, width) = (self.roi.height, self.roi.width);
        if !height.is_finite() || !width.is_finite() || height < 0.0 || width < 0.0 {
            return Err(DecodeError::InvalidGeometry(format!(
                "ROI {}x{} is not a valid size",
                height, width
            )));
        }

        Ok(ImageSize::new(
            (height / decimation).floor() as usize,
            (width / decimation).floor() as usize,
        ))
    }

    fn read_layout<R: Read>(rdr: &mut R) -> io::Result<Self> {
        let mut d = Self {
            size: rdr.read_u32::<LittleEndian>()?,
            frame_time: rdr.read_f32::<LittleEndian>()?,
            frame_number: rdr.read_u32::<LittleEndian>()?,
            ..Self::default()
        };

        d.brightness = rdr.read_f32::<LittleEndian>()?;
        d.autoexposure = rdr.read_f32::<LittleEndian>()?;
        d.sharpness = rdr.read_f32::<LittleEndian>()?;
        d.white_balance = rdr.read_f32::<LittleEndian>()?;
        d.hue = rdr.read_f32::<LittleEndian>()?;
        d.saturation = rdr.read_f32::<LittleEndian>()?;
        d.gamma = rdr.read_f32::<LittleEndian>()?;
        d.shutter = rdr.read_f32::<LittleEndian>()?;
        d.gain = rdr.read_f32::<LittleEndian>()?;
        d.iris = rdr.read_f32::<LittleEndian>()?;
        d.focus = rdr.read_f32::<LittleEndian>()?;
        d.temperature = rdr.read_f32::<LittleEndian>()?;

        d.trigger = Trigger {
            mode: rdr.read_f32::<LittleEndian>()?,
            kind: rdr.read_f32::<LittleEndian>()?,
            polarity: rdr.read_f32::<LittleEndian>()?,
            delay: rdr.read_f32::<LittleEndian>()?,
            parameter: rdr.read_f32::<LittleEndian>()?,
        };

        d.zoom = rdr.read_f32::<LittleEndian>()?;
        d.pan = rdr.read_f32::<LittleEndian>()?;
        d.tilt = rdr.read_f32::<LittleEndian>()?;
        d.optical_filter = rdr.read_f32::<LittleEndian>()?;

        rdr.read_f32_into::<LittleEndian>(&mut d.gpio.mode)?;
        rdr.read_f32_into::<LittleEndian>(&mut d.gpio.polarity)?;
        rdr.read_f32_into::<LittleEndian>(&mut d.gpio.parameter1)?;
        rdr.read_f32_into::<LittleEndian>(&mut d.gpio.parameter2)?;
        rdr.read_f32_into::<LittleEndian>(&mut d.gpio.parameter3)?;

        d.frame_rate = rdr.read_f32::<LittleEndian>()?;

        d.roi = read_roi(rdr)?;
        d.flip = read_hv(rdr)?;

        d.decimation = rdr.read_f32::<LittleEndian>()?;
        d.pixel_format = rdr.read_f32::<LittleEndian>()?;

        rdr.read_f32_into::<LittleEndian>(&mut d.extended_shutter)?;

        d.auto_roi = read_roi(rdr)?;

        d.decimation_mode = rdr.read_f32::<LittleEndian>()?;

        d.white_shading = WhiteShading {
            red_gain: rdr.read_f32::<LittleEndian>()?,
            green_gain: rdr.read_f32::<LittleEndian>()?,
            blue_gain: rdr.read_f32::<LittleEndian>()?,
        };

        d.rotate = rdr.read_f32::<LittleEndian>()?;
        d.image_clock_divisor = rdr.read_f32::<LittleEndian>()?;
        d.trigger_with_controlled_light = rdr.read_f32::<LittleEndian>()?;
        d.max_pixel_size = rdr.read_f32::<LittleEndian>()?;

        d.trigger_number = rdr.read_f32::<LittleEndian>()?;
        d.image_processing_umask = rdr.read_f32::<LittleEndian>()?;

        d.pixel_addressing_value = read_hv(rdr)?;

        skip(rdr, PAD_BEFORE_FRAME_TIME_HR)?;
        d.frame_time_hr = rdr.read_f64::<LittleEndian>()?;
        d.frame_number_hr = rdr.read_u64::<LittleEndian>()?;

        d.bandwidth_limit = rdr.read_f32::<LittleEndian>()?;
        skip(rdr, PAD_BEFORE_ACTUAL_FRAME_RATE)?;
        d.actual_frame_rate = rdr.read_f64::<LittleEndian>()?;

        d.sharpness_score_roi = SharpnessScoreParams {
            left: rdr.read_f32::<LittleEndian>()?,
            top: rdr.read_f32::<LittleEndian>()?,
            width: rdr.read_f32::<LittleEndian>()?,
            height: rdr.read_f32::<LittleEndian>()?,
            max_value: rdr.read_f32::<LittleEndian>()?,
        };
        d.sharpness_score = rdr.read_f32::<LittleEndian>()?;

        Ok(d)
    }

    fn write_layout<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_f32::<LittleEndian>(self.frame_time)?;
        w.write_u32::<LittleEndian>(self.frame_number)?;

        for v in [
            self.brightness,
            self.autoexposure,
            self.sharpness,
            self.white_balance,
            self.hue,
            self.saturation,
            self.gamma,
            self.shutter,
            self.gain,
            self.iris,
            self.focus,
            self.temperature,
            self.trigger.mode,
            self.trigger.kind,
            self.trigger.polarity,
            self.trigger.delay,
            self.trigger.parameter,
            self.zoom,
            self.pan,
            self.tilt,
            self.optical_filter,
        ] {
            w.write_f32::<LittleEndian>(v)?;
        }

        for strobes in [
            &self.gpio.mode,
            &self.gpio.polarity,
            &self.gpio.parameter1,
            &self.gpio.parameter2,
            &self.gpio.parameter3,
        ] {
            write_f32s(w, strobes)?;
        }

        w.write_f32::<LittleEndian>(self.frame_rate)?;
        write_roi(w, &self.roi)?;
        write_hv(w, &self.flip)?;
        w.write_f32::<LittleEndian>(self.decimation)?;
        w.write_f32::<LittleEndian>(self.pixel_format)?;
        write_f32s(w, &self.extended_shutter)?;
        write_roi(w, &self.auto_roi)?;

        for v in [
            self.decimation_mode,
            self.white_shading.red_gain,
            self.white_shading.green_gain,
            self.white_shading.blue_gain,
            self.rotate,
            self.image_clock_divisor,
            self.trigger_with_controlled_light,
            self.max_pixel_size,
            self.trigger_number,
            self.image_processing_umask,
        ] {
            w.write_f32::<LittleEndian>(v)?;
        }
        write_hv(w, &self.pixel_addressing_value)?;

        w.write_all(&[0u8; PAD_BEFORE_FRAME_TIME_HR])?;
        w.write_f64::<LittleEndian>(self.frame_time_hr)?;
        w.write_u64::<LittleEndian>(self.frame_number_hr)?;

        w.write_f32::<LittleEndian>(self.bandwidth_limit)?;
        w.write_all(&[0u8; PAD_BEFORE_ACTUAL_FRAME_RATE])?;
        w.write_f64::<LittleEndian>(self.actual_frame_rate)?;

        let s = &self.sharpness_score_roi;
        for v in [s.left, s.top, s.width, s.height, s.max_value, self.sharpness_score] {
            w.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

fn read_roi<R: Read>(rdr: &mut R) -> io::Result<Roi> {
    Ok(Roi {
        left: rdr.read_f32::<LittleEndian>()?,
        top: rdr.read_f32::<LittleEndian>()?,
        width: rdr.read_f32::<LittleEndian>()?,
        height: rdr.read_f32::<LittleEndian>()?,
    })
}

fn read_hv<R: Read>(rdr: &mut R) -> io::Result<HorizontalVertical> {
    Ok(HorizontalVertical {
        horizontal: rdr.read_f32::<LittleEndian>()?,
        vertical: rdr.read_f32::<LittleEndian>()?,
    })
}

fn skip<R: Read>(rdr: &mut R, n: usize) -> io::Result<()> {
    let mut pad = [0u8; 8];
    rdr.read_exact(&mut pad[..n])
}

fn write_roi<W: Write>(w: &mut W, roi: &Roi) -> io::Result<()> {
    write_f32s(w, &[roi.left, roi.top, roi.width, roi.height])
}

fn write_hv<W: Write>(w: &mut W, hv: &HorizontalVertical) -> io::Result<()> {
    write_f32s(w, &[hv.horizontal, hv.vertical])
}

fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> io::Result<()> {
    for &v in values {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameDescriptor {
        FrameDescriptor {
            frame_time: 1.25,
            frame_number: 7,
            shutter: 0.01,
            gain: 3.0,
            roi: Roi {
                left: 0.0,
                top: 0.0,
                width: 640.0,
                height: 480.0,
            },
            decimation: 1.0,
            pixel_format: 1.0,
            frame_time_hr: 1.250_000_5,
            frame_number_hr: 0x1_0000_0007,
            actual_frame_rate: 29.97,
            sharpness_score: 0.5,
            ..FrameDescriptor::new_full()
        }
    }

    #[test]
    fn test_encoded_layout_offsets() {
        let mut d = sample();
        d.gpio.mode[0] = 2.0;
        let bytes = d.encode().unwrap();
        assert_eq!(bytes.len(), FrameDescriptor::LEN);

        let f32_at = |off: usize| f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 592);
        assert_eq!(f32_at(4), 1.25);
        assert_eq!(f32_at(96), 2.0); // gpio.mode[0]
        assert_eq!(f32_at(432), 480.0); // roi.height
        assert_eq!(f32_at(444), 1.0); // decimation
        assert_eq!(f32_at(448), 1.0); // pixel_format
        assert_eq!(
            f64::from_le_bytes(bytes[536..544].try_into().unwrap()),
            1.250_000_5
        );
        assert_eq!(
            u64::from_le_bytes(bytes[544..552].try_into().unwrap()),
            0x1_0000_0007
        );
        assert_eq!(
            f64::from_le_bytes(bytes[560..568].try_into().unwrap()),
            29.97
        );
        assert_eq!(f32_at(588), 0.5);
    }

    #[test]
    fn test_decode_full_size_is_idempotent() {
        let bytes = sample().encode().unwrap();
        let first = FrameDescriptor::decode(&bytes).unwrap();
        let second = FrameDescriptor::decode(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, sample());
    }

    #[test]
    fn test_decode_short_descriptor_zeroes_tail() {
        let mut d = sample();
        d.size = 532;
        let bytes = d.encode().unwrap();
        assert_eq!(bytes.len(), 532);

        let decoded = FrameDescriptor::decode(&bytes).unwrap();
        assert_eq!(decoded.size, 532);
        assert_eq!(decoded.roi.height, 480.0);
        assert_eq!(decoded.frame_time_hr, 0.0);
        assert_eq!(decoded.frame_number_hr, 0);
        assert_eq!(decoded.actual_frame_rate, 0.0);
        assert_eq!(decoded.sharpness_score, 0.0);
    }

    #[test]
    fn test_decode_oversized() {
        let bytes = vec![0u8; FrameDescriptor::LEN + 1];
        assert!(matches!(
            FrameDescriptor::decode(&bytes),
            Err(DecodeError::OversizedDescriptor { declared: 593, max: 592 })
        ));

        let mut d = sample();
        d.size = 600;
        assert!(matches!(
            d.encode(),
            Err(DecodeError::OversizedDescriptor { .. })
        ));
    }

    #[test]
    fn test_read_from_peeks_size() {
        let mut bytes = sample().encode().unwrap();
        bytes.extend_from_slice(&[0xAA; 3]);
        let mut cursor = Cursor::new(bytes);

        let d = FrameDescriptor::read_from(&mut cursor, None).unwrap();
        assert_eq!(d.size, 592);
        assert_eq!(cursor.position(), 592);
    }

    #[test]
    fn test_read_from_declared_size_overrides_peek() {
        let mut d = sample();
        d.size = 100;
        let mut bytes = d.encode().unwrap();
        bytes.extend_from_slice(&[0u8; 50]);
        let mut cursor = Cursor::new(bytes);

        let decoded = FrameDescriptor::read_from(&mut cursor, Some(60)).unwrap();
        assert_eq!(cursor.position(), 60);
        assert_eq!(decoded.frame_time, 1.25);
        assert_eq!(decoded.gain, 3.0);
        assert_eq!(decoded.roi.height, 0.0);
    }

    #[test]
    fn test_read_from_truncated() {
        let mut cursor = Cursor::new(vec![0x10, 0x00]);
        assert!(matches!(
            FrameDescriptor::read_from(&mut cursor, None),
            Err(DecodeError::TruncatedInput(_))
        ));

        let mut bytes = sample().encode().unwrap();
        bytes.truncate(300);
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            FrameDescriptor::read_from(&mut cursor, None),
            Err(DecodeError::TruncatedInput(_))
        ));
    }

    #[test]
    fn test_read_from_oversized_peek() {
        let mut cursor = Cursor::new(1000u32.to_le_bytes().to_vec());
        assert!(matches!(
            FrameDescriptor::read_from(&mut cursor, None),
            Err(DecodeError::OversizedDescriptor { declared: 1000, .. })
        ));
    }

    #[test]
    fn test_image_size() {
        let mut d = sample();
        assert_eq!(d.get_image_size().unwrap(), ImageSize::new(480, 640));

        d.decimation = 2.0;
        assert_eq!(d.get_image_size().unwrap(), ImageSize::new(240, 320));

        d.decimation = 3.0;
        d.roi.height = 100.0;
        assert_eq!(d.get_image_size().unwrap().height, 33);

        d.decimation = 0.0;
        assert!(matches!(
            d.get_image_size(),
            Err(DecodeError::InvalidGeometry(_))
        ));

        d.decimation = 1.0;
        d.roi.width = -4.0;
        assert!(matches!(
            d.get_image_size(),
            Err(DecodeError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_bytes_per_pixel() {
        let mut d = sample();
        for (code, bpp) in [(0.0, 1), (1.0, 2), (2.0, 2), (5.0, 3), (6.0, 6), (9.0, 1), (12.0, 2)] {
            d.pixel_format = code;
            assert_eq!(d.get_bytes_per_pixel().unwrap(), bpp, "code {}", code);
        }

        d.pixel_format = 13.0;
        assert!(matches!(
            d.get_bytes_per_pixel(),
            Err(DecodeError::UnsupportedPixelFormat(PixelFormat::Mono12Packed))
        ));

        d.pixel_format = 99.0;
        assert!(matches!(
            d.get_bytes_per_pixel(),
            Err(DecodeError::UnsupportedPixelFormat(PixelFormat::Unsupported(99)))
        ));
    }
}
