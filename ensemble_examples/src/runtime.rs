//! Binding to the network runtime.
//!
//! The runtime (TensorFlow Lite Micro with the Ethos-U delegate) is linked as
//! a static library exporting a small C interface. It also embeds the model.
//!
//! The runtime does not own the NPU. The board's [`AcceleratorContext`] owns
//! its registers and its interrupt line. An inference is split in two calls:
//! `ethosu_model_submit` runs the operators up to the NPU command stream and
//! starts it, and `ethosu_model_complete` runs the remaining operators once
//! the context has seen the completion interrupt.

use core::ptr::{self, addr_of_mut};
use core::slice;
use core::sync::atomic::{AtomicBool, Ordering};

use ensemble::cancel::Never;
use ensemble::mmio::Volatile;
use ensemble::model::{Error, Model, Tensor, TensorMut};
use ensemble::npu::AcceleratorContext;

/// Size of the tensor arena.
pub const ARENA_SIZE: usize = 0x0010_0000;

/// Tensor arena. It lives in SRAM0, whose attribute is write-through.
#[link_section = ".bss.activation_buf_sram"]
static mut TENSOR_ARENA: [u8; ARENA_SIZE] = [0; ARENA_SIZE];

static ARENA_TAKEN: AtomicBool = AtomicBool::new(false);

/// Tensor as exported by the runtime.
#[repr(C)]
struct RawTensor {
    dims: *const usize,
    ndims: usize,
    data: *mut u8,
    bytes: usize,
}

impl RawTensor {
    const fn empty() -> RawTensor {
        RawTensor {
            dims: ptr::null(),
            ndims: 0,
            data: ptr::null_mut(),
            bytes: 0,
        }
    }
}

extern "C" {
    fn ethosu_model_data(len: *mut usize) -> *const u8;
    fn ethosu_model_init(arena: *mut u8, arena_len: usize, model: *const u8, model_len: usize) -> bool;
    fn ethosu_model_tensor(input: bool, index: usize, tensor: *mut RawTensor) -> bool;
    fn ethosu_model_output_count() -> usize;
    fn ethosu_model_submit() -> bool;
    fn ethosu_model_complete() -> bool;
}

/// Returns the tensor arena. Only the first call gets it.
pub fn take_arena() -> Option<&'static mut [u8]> {
    if ARENA_TAKEN.swap(true, Ordering::AcqRel) {
        return None;
    }
    // SAFETY: The flag above hands the arena out once.
    Some(unsafe { &mut *addr_of_mut!(TENSOR_ARENA) })
}

/// Returns the model embedded in the runtime.
pub fn model_data() -> &'static [u8] {
    let mut len = 0;
    // SAFETY: The runtime returns a pointer to a static buffer of `len`
    // bytes.
    unsafe {
        let data = ethosu_model_data(&mut len);
        if data.is_null() {
            return &[];
        }
        slice::from_raw_parts(data, len)
    }
}

/// The network runtime.
pub struct NetworkRuntime {
    accelerator: &'static AcceleratorContext<Volatile>,
    initialized: bool,
}

impl NetworkRuntime {
    /// Returns an uninitialized runtime completing its jobs through
    /// `accelerator`.
    pub const fn new(accelerator: &'static AcceleratorContext<Volatile>) -> NetworkRuntime {
        NetworkRuntime {
            accelerator,
            initialized: false,
        }
    }

    fn raw_tensor(&self, input: bool, index: usize) -> Option<RawTensor> {
        if !self.initialized {
            return None;
        }
        let mut raw = RawTensor::empty();
        // SAFETY: `raw` is a valid out pointer.
        if !unsafe { ethosu_model_tensor(input, index, &mut raw) } || raw.data.is_null() {
            return None;
        }
        if raw.dims.is_null() {
            raw.dims = ptr::NonNull::dangling().as_ptr();
            raw.ndims = 0;
        }
        Some(raw)
    }
}

impl Model<'static> for NetworkRuntime {
    fn init(&mut self, arena: &'static mut [u8], model: &'static [u8]) -> Result<(), Error> {
        // SAFETY: Both buffers live for the rest of the program and the arena
        // is not used by anything else.
        let ok = unsafe {
            ethosu_model_init(arena.as_mut_ptr(), arena.len(), model.as_ptr(), model.len())
        };
        if !ok {
            return Err(Error::InitFailed);
        }
        self.initialized = true;
        Ok(())
    }

    fn input_tensor(&mut self, index: usize) -> Option<TensorMut<'_>> {
        let raw = self.raw_tensor(true, index)?;
        // SAFETY: The tensor lives in the arena, which the runtime owns, and
        // the borrow of `self` keeps inference from running meanwhile.
        unsafe {
            Some(TensorMut {
                dims: slice::from_raw_parts(raw.dims, raw.ndims),
                data: slice::from_raw_parts_mut(raw.data, raw.bytes),
            })
        }
    }

    fn output_tensor(&self, index: usize) -> Option<Tensor<'_>> {
        let raw = self.raw_tensor(false, index)?;
        // SAFETY: Same as for the input tensors.
        unsafe {
            Some(Tensor {
                dims: slice::from_raw_parts(raw.dims, raw.ndims),
                data: slice::from_raw_parts(raw.data, raw.bytes),
            })
        }
    }

    fn output_count(&self) -> usize {
        if !self.initialized {
            return 0;
        }
        unsafe { ethosu_model_output_count() }
    }

    fn run_inference(&mut self) -> Result<(), Error> {
        if !self.initialized || !self.accelerator.is_initialized() {
            return Err(Error::NotInitialized);
        }
        // SAFETY: The model is initialized.
        if !unsafe { ethosu_model_submit() } {
            return Err(Error::InferenceFailed);
        }
        self.accelerator
            .wait_for_completion(&Never)
            .map_err(Error::Accelerator)?;
        // SAFETY: The command stream submitted above has completed.
        if !unsafe { ethosu_model_complete() } {
            return Err(Error::InferenceFailed);
        }
        Ok(())
    }
}
