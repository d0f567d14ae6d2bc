//! Python bindings for the PDS reader with numpy support.
//!
//! This module provides Python bindings using PyO3 that expose the reader,
//! whole-stack reads as numpy arrays, and the file converters.

use numpy::ndarray::{ArrayD, IxDyn};
use numpy::{Element, IntoPyArray};
use pds_core::output::OutputError;
use pds_core::{DecodeError, ExporterRegistry, FrameStack, PdsReader, PixelData};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

type FileReader = PdsReader<BufReader<File>>;

fn decode_err(e: DecodeError) -> PyErr {
    match e {
        DecodeError::Io(io) => PyIOError::new_err(io.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn output_err(e: OutputError) -> PyErr {
    match e {
        OutputError::Io(io) => PyIOError::new_err(io.to_string()),
        OutputError::Decode(decode) => decode_err(decode),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn to_array<T: Element>(py: Python<'_>, data: Vec<T>, shape: &[usize]) -> PyResult<PyObject> {
    let array = ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| PyValueError::new_err(format!("Invalid stack shape: {}", e)))?;
    Ok(array.into_pyarray(py).into_py(py))
}

/// Converts a stack into `(timestamps, stack)` numpy arrays.
///
/// RGB stacks get a trailing channel axis of length 3.
fn stack_to_numpy(py: Python<'_>, stack: FrameStack) -> PyResult<(PyObject, PyObject)> {
    let (frames, rows, cols) = stack.shape;
    let timestamps = stack.timestamps.into_pyarray(py).into_py(py);

    let data = match stack.data {
        PixelData::U8(v) | PixelData::Raw(v) => to_array(py, v, &[frames, rows, cols])?,
        PixelData::U16(v) => to_array(py, v, &[frames, rows, cols])?,
        PixelData::Rgb8(v) => to_array(py, v, &[frames, rows, cols, 3])?,
        PixelData::Rgb16(v) => to_array(py, v, &[frames, rows, cols, 3])?,
    };

    Ok((timestamps, data))
}

/// Reader for a PixeLINK Data Stream file.
///
/// Can be used as a context manager; the file is closed on exit.
#[pyclass(name = "Reader")]
pub struct Reader {
    inner: FileReader,
    path: PathBuf,
}

#[pymethods]
impl Reader {
    #[new]
    fn new(path: PathBuf) -> PyResult<Self> {
        let inner = PdsReader::open(&path).map_err(decode_err)?;
        Ok(Self { inner, path })
    }

    /// Returns the number of frames declared in the file.
    fn __len__(&self) -> usize {
        self.inner.frames() as usize
    }

    fn __repr__(&self) -> String {
        format!(
            "Reader(path={:?}, frames={}, image_size={}, pixel_format={})",
            self.path,
            self.inner.frames(),
            self.inner.image_size(),
            self.inner.pixel_format()
        )
    }

    /// The number of frames in the file.
    #[getter]
    fn frames(&self) -> u32 {
        self.inner.frames()
    }

    /// The image size (height, width) of the first frame.
    #[getter]
    fn image_size(&self) -> (usize, usize) {
        let size = self.inner.image_size();
        (size.height, size.width)
    }

    /// The pixel format name of the first frame.
    #[getter]
    fn pixel_format(&self) -> String {
        self.inner.pixel_format().to_string()
    }

    #[getter]
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Reads the stack into numpy arrays.
    ///
    /// Args:
    ///     offset: Number of frames subtracted from the result length
    ///     count: Maximum number of frames to return
    ///
    /// Returns:
    ///     tuple: (timestamps, stack) with shapes (frames,) and
    ///     (frames, height, width)
    #[pyo3(signature = (offset=0, count=None))]
    fn read_stack(
        &mut self,
        py: Python<'_>,
        offset: usize,
        count: Option<usize>,
    ) -> PyResult<(PyObject, PyObject)> {
        let stack = self.inner.read_stack(offset, count).map_err(decode_err)?;
        stack_to_numpy(py, stack)
    }

    /// Reads `count` frames starting at frame `start`.
    fn read_range(
        &mut self,
        py: Python<'_>,
        start: usize,
        count: usize,
    ) -> PyResult<(PyObject, PyObject)> {
        let stack = self.inner.read_range(start, count).map_err(decode_err)?;
        stack_to_numpy(py, stack)
    }

    /// Closes the file.
    fn close(&mut self) {
        self.inner.close();
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __exit__(
        &mut self,
        _exc_type: &PyAny,
        _exc_value: &PyAny,
        _traceback: &PyAny,
    ) -> bool {
        self.inner.close();
        false
    }
}

/// Reads a PDS file and returns the timestamps and the stack.
///
/// Example:
///     >>> import pds
///     >>> timestamps, stack = pds.read("recording.pds")
///     >>> stack.shape
///     (100, 480, 640)
#[pyfunction]
fn read(py: Python<'_>, path: PathBuf) -> PyResult<(PyObject, PyObject)> {
    let stack = pds_core::read(&path).map_err(decode_err)?;
    stack_to_numpy(py, stack)
}

/// Reads a PDS file and writes its content in another format.
///
/// The format is taken from the extension of `output`; see `formats()`.
#[pyfunction]
fn convert(input: PathBuf, output: PathBuf) -> PyResult<()> {
    let registry = ExporterRegistry::<BufReader<File>>::with_defaults();
    // Check the extension before opening the input
    registry.for_path(&output).map_err(output_err)?;

    let mut reader = PdsReader::open(&input).map_err(decode_err)?;
    registry.convert(&mut reader, &output).map_err(output_err)
}

/// Lists the supported output formats as (extension, description) pairs.
#[pyfunction]
fn formats() -> Vec<(&'static str, &'static str)> {
    ExporterRegistry::<BufReader<File>>::with_defaults()
        .formats()
        .collect()
}

/// PixeLINK Data Stream module for Python.
#[pymodule]
fn _pds(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(read, m)?)?;
    m.add_function(wrap_pyfunction!(convert, m)?)?;
    m.add_function(wrap_pyfunction!(formats, m)?)?;
    m.add_class::<Reader>()?;
    Ok(())
}
