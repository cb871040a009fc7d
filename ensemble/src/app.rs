//! Inference benchmark application.
//!
//! [`run_once`] runs one inference over a random input while marking the
//! inference window on a GPIO line, so an external logic analyzer can time it
//! against the reference line.

use core::fmt;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::gpio::{self, Direction, GpioDriver, GpioTriggerSignal, SignalLine};
use crate::model::{self, Model};

/// Minimum number of dimensions of the input tensor.
const MIN_INPUT_RANK: usize = 3;

/// Application error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The model could not be initialized.
    ModelInit(model::Error),

    /// The model has no input tensor.
    MissingInput,

    /// The input tensor has too few dimensions.
    InputRank(usize),

    /// The inference failed.
    Inference(model::Error),

    /// A signal line failed.
    Signal(gpio::Error),
}

impl AppError {
    /// Returns the exit code reported by `main`.
    pub fn code(&self) -> i32 {
        match self {
            AppError::ModelInit(_) | AppError::MissingInput | AppError::InputRank(_) => 1,
            AppError::Inference(_) => 2,
            AppError::Signal(_) => 3,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::ModelInit(err) => write!(f, "{err}"),
            AppError::MissingInput => write!(f, "model has no input tensor"),
            AppError::InputRank(rank) => {
                write!(f, "input tensor dimension should be >= {MIN_INPUT_RANK}, got {rank}")
            }
            AppError::Inference(err) => write!(f, "{err}"),
            AppError::Signal(err) => write!(f, "signal error: {err}"),
        }
    }
}

impl From<gpio::Error> for AppError {
    fn from(err: gpio::Error) -> AppError {
        AppError::Signal(err)
    }
}

/// Logic analyzer lines.
pub struct AnalyzerSignals<D: GpioDriver> {
    reference: GpioTriggerSignal<D>,
    window: GpioTriggerSignal<D>,
}

impl<D: GpioDriver> AnalyzerSignals<D> {
    /// Configures both lines as released outputs.
    pub fn new(reference: D, window: D) -> Result<AnalyzerSignals<D>, gpio::Error> {
        Ok(AnalyzerSignals {
            reference: GpioTriggerSignal::new(
                reference,
                SignalLine::AnalyzerReference,
                Direction::Output,
            )?,
            window: GpioTriggerSignal::new(window, SignalLine::AnalyzerWindow, Direction::Output)?,
        })
    }
}

/// Loads `network` and runs one inference over a random input seeded with
/// `seed`.
///
/// The reference line is held high from the start. The window line is high
/// only while the inference runs.
pub fn run_once<'a, M, D>(
    model: &mut M,
    arena: &'a mut [u8],
    network: &'a [u8],
    signals: &mut AnalyzerSignals<D>,
    seed: u64,
) -> Result<(), AppError>
where
    M: Model<'a>,
    D: GpioDriver,
{
    signals.reference.send(true)?;

    model.init(arena, network).map_err(AppError::ModelInit)?;

    let input = model.input_tensor(0).ok_or(AppError::MissingInput)?;
    if input.rank() < MIN_INPUT_RANK {
        return Err(AppError::InputRank(input.rank()));
    }
    SmallRng::seed_from_u64(seed).fill_bytes(input.data);

    log::info!("app: running inference on random tensor");
    signals.window.send(true)?;
    let result = model.run_inference();
    signals.window.send(false)?;
    result.map_err(AppError::Inference)?;

    for i in 0..model.output_count() {
        if let Some(output) = model.output_tensor(i) {
            log::debug!("app: output tensor {i}: {} bytes", output.bytes());
        }
    }

    log::info!("app: inference completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Level;
    use crate::model::{Tensor, TensorMut};

    use std::sync::{Arc, Mutex};

    /// Records every level driven on a line, in order.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Level>>>);

    impl Recorder {
        fn levels(&self) -> Vec<Level> {
            self.0.lock().unwrap().clone()
        }
    }

    impl GpioDriver for Recorder {
        fn port(&self) -> u8 {
            5
        }

        fn initialize(&mut self, _pin: u8) -> Result<(), gpio::Error> {
            Ok(())
        }

        fn power_control(&mut self, _pin: u8, _on: bool) -> Result<(), gpio::Error> {
            Ok(())
        }

        fn set_direction(&mut self, _pin: u8, _dir: Direction) -> Result<(), gpio::Error> {
            Ok(())
        }

        fn set_value(&mut self, _pin: u8, level: Level) -> Result<(), gpio::Error> {
            self.0.lock().unwrap().push(level);
            Ok(())
        }

        fn get_value(&self, _pin: u8) -> Result<Level, gpio::Error> {
            Ok(self.0.lock().unwrap().last().copied().unwrap_or(Level::Low))
        }
    }

    struct FakeModel {
        dims: Vec<usize>,
        input: Vec<u8>,
        output: Vec<u8>,
        init_ok: bool,
        run_ok: bool,
        window: Recorder,
        window_during_run: Option<Level>,
    }

    impl FakeModel {
        fn new(window: &Recorder) -> FakeModel {
            FakeModel {
                dims: vec![1, 4, 4],
                input: vec![0; 16],
                output: vec![0; 4],
                init_ok: true,
                run_ok: true,
                window: window.clone(),
                window_during_run: None,
            }
        }
    }

    impl<'a> Model<'a> for FakeModel {
        fn init(&mut self, arena: &'a mut [u8], model: &'a [u8]) -> Result<(), model::Error> {
            if !self.init_ok || arena.is_empty() || model.is_empty() {
                return Err(model::Error::InitFailed);
            }
            Ok(())
        }

        fn input_tensor(&mut self, index: usize) -> Option<TensorMut<'_>> {
            (index == 0).then(|| TensorMut {
                dims: &self.dims,
                data: &mut self.input,
            })
        }

        fn output_tensor(&self, index: usize) -> Option<Tensor<'_>> {
            (index == 0).then(|| Tensor {
                dims: &self.dims[..1],
                data: &self.output,
            })
        }

        fn output_count(&self) -> usize {
            1
        }

        fn run_inference(&mut self) -> Result<(), model::Error> {
            self.window_during_run = self.window.levels().last().copied();
            if !self.run_ok {
                return Err(model::Error::InferenceFailed);
            }
            Ok(())
        }
    }

    fn signals() -> (AnalyzerSignals<Recorder>, Recorder, Recorder) {
        let (reference, window) = (Recorder::default(), Recorder::default());
        let signals = AnalyzerSignals::new(reference.clone(), window.clone()).unwrap();
        (signals, reference, window)
    }

    #[test]
    fn inference_window() {
        let (mut signals, reference, window) = signals();
        let mut model = FakeModel::new(&window);
        let mut arena = [0u8; 64];

        run_once(&mut model, &mut arena, b"tflite", &mut signals, 7).unwrap();

        assert_eq!(reference.levels(), [Level::Low, Level::High]);
        assert_eq!(window.levels(), [Level::Low, Level::High, Level::Low]);
        assert_eq!(model.window_during_run, Some(Level::High));
        assert!(model.input.iter().any(|&b| b != 0));
    }

    #[test]
    fn seeded_input() {
        let mut inputs = Vec::new();
        for _ in 0..2 {
            let (mut signals, _, window) = signals();
            let mut model = FakeModel::new(&window);
            let mut arena = [0u8; 64];
            run_once(&mut model, &mut arena, b"tflite", &mut signals, 42).unwrap();
            inputs.push(model.input);
        }
        assert_eq!(inputs[0], inputs[1]);
    }

    #[test]
    fn exit_codes() {
        let (mut signals, _, window) = signals();
        let mut arena = [0u8; 64];

        let mut model = FakeModel {
            init_ok: false,
            ..FakeModel::new(&window)
        };
        let err = run_once(&mut model, &mut arena, b"tflite", &mut signals, 0).unwrap_err();
        assert_eq!(err, AppError::ModelInit(model::Error::InitFailed));
        assert_eq!(err.code(), 1);

        let mut model = FakeModel {
            dims: vec![1, 16],
            ..FakeModel::new(&window)
        };
        let err = run_once(&mut model, &mut arena, b"tflite", &mut signals, 0).unwrap_err();
        assert_eq!(err, AppError::InputRank(2));
        assert_eq!(err.code(), 1);
        assert!(window.levels().iter().all(|&l| l == Level::Low));

        let mut model = FakeModel {
            run_ok: false,
            ..FakeModel::new(&window)
        };
        let err = run_once(&mut model, &mut arena, b"tflite", &mut signals, 0).unwrap_err();
        assert_eq!(err.code(), 2);
        assert_eq!(window.levels().last(), Some(&Level::Low));
    }
}
