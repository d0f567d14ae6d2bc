//! Writing PDS streams.
//!
//! Produces files in the same layout the cameras record: the 8-byte header
//! followed by descriptor + payload pairs. Mostly useful for fixtures.

use crate::descriptor::{DecodeError, FrameDescriptor};
use crate::types::FileHeader;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// Sequential writer for PDS streams.
pub struct StreamWriter<W: Write> {
    writer: W,
    declared: u32,
    written: u32,
}

impl<W: Write> StreamWriter<W> {
    /// Writes the file header declaring `frame_count` frames.
    pub fn new(mut writer: W, frame_count: u32) -> Result<Self, DecodeError> {
        let header = FileHeader::new(frame_count);
        writer.write_u32::<LittleEndian>(header.magic)?;
        writer.write_u32::<LittleEndian>(header.frame_count)?;
        Ok(Self {
            writer,
            declared: frame_count,
            written: 0,
        })
    }

    /// Writes one frame: the descriptor's stored prefix, then the payload.
    pub fn write_frame(
        &mut self,
        descriptor: &FrameDescriptor,
        payload: &[u8],
    ) -> Result<(), DecodeError> {
        let bytes = descriptor.encode()?;
        self.writer.write_all(&bytes)?;
        self.writer.write_all(payload)?;
        self.written += 1;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u32 {
        self.written
    }

    /// Number of frames declared in the header.
    pub fn frames_declared(&self) -> u32 {
        self.declared
    }

    /// Flushes and returns the inner writer.
    pub fn finish(mut self) -> Result<W, DecodeError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
