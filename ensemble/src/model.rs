//! Inference runtime interface.
//!
//! The network runtime is opaque to the board code. It owns the model and
//! keeps its tensors in the arena handed over at initialization. It does not
//! own the NPU: jobs are submitted by the runtime and completed through the
//! board's [`crate::npu::AcceleratorContext`].

use core::fmt;

use crate::npu;

/// Model error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The runtime could not load the model into the arena.
    InitFailed,

    /// The model is not initialized.
    NotInitialized,

    /// The inference did not complete.
    InferenceFailed,

    /// The NPU failed while running the inference.
    Accelerator(npu::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InitFailed => write!(f, "failed to initialize model"),
            Error::NotInitialized => write!(f, "model not initialized"),
            Error::InferenceFailed => write!(f, "inference failed"),
            Error::Accelerator(err) => write!(f, "inference failed: {err}"),
        }
    }
}

/// Read-only view of a tensor.
#[derive(Debug)]
pub struct Tensor<'a> {
    /// Dimensions, outermost first.
    pub dims: &'a [usize],

    /// Raw contents.
    pub data: &'a [u8],
}

impl Tensor<'_> {
    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the size of the tensor in bytes.
    pub fn bytes(&self) -> usize {
        self.data.len()
    }
}

/// Writable view of a tensor.
#[derive(Debug)]
pub struct TensorMut<'a> {
    /// Dimensions, outermost first.
    pub dims: &'a [usize],

    /// Raw contents.
    pub data: &'a mut [u8],
}

impl TensorMut<'_> {
    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the size of the tensor in bytes.
    pub fn bytes(&self) -> usize {
        self.data.len()
    }
}

/// Neural network model running on the accelerator.
pub trait Model<'a> {
    /// Loads `model` using `arena` as working memory.
    fn init(&mut self, arena: &'a mut [u8], model: &'a [u8]) -> Result<(), Error>;

    /// Returns input tensor `index`, if any.
    fn input_tensor(&mut self, index: usize) -> Option<TensorMut<'_>>;

    /// Returns output tensor `index`, if any.
    fn output_tensor(&self, index: usize) -> Option<Tensor<'_>>;

    /// Returns the number of output tensors.
    fn output_count(&self) -> usize;

    /// Runs the model over the current inputs. Blocks until the inference
    /// completes.
    fn run_inference(&mut self) -> Result<(), Error>;
}
