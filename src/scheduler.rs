//! Policies choosing the search parameters of every engine pass
//!
//! The engine asks its [`Scheduler`] before each pass. Whatever comes back is
//! clamped into a usable range, so a policy can never stall or break a search.

use crate::{
    config::SearchParams, error::EngineError, heuristic::HeuristicWeights, CELLS, HEIGHT, WIDTH,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

pub const INPUT_DIM: usize = 16;
pub const HIDDEN_DIM: usize = 64;
pub const OUTPUT_DIM: usize = 8;

/// Leading word of every weight file
pub const WEIGHT_MAGIC: u32 = 0xE210_B0A1;

// time left is scaled against this before being fed to a policy
const TIME_SCALE_SECS: f32 = 60.0;

/// What a policy gets to see about the search so far
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Features {
    pub move_count: u8,
    pub heights: [u8; WIDTH],
    pub heuristic_depth: u8,
    pub exact_depth: u8,
    /// Time left until the deadline, `None` when evaluating without one
    pub time_remaining: Option<Duration>,
    pub side_to_play: u8,
}

impl Features {
    /// Normalised network input, unused slots left at zero
    pub fn to_input(&self) -> [f32; INPUT_DIM] {
        let mut input = [0.0; INPUT_DIM];
        input[0] = self.move_count as f32 / CELLS as f32;
        for (slot, &height) in input[1..=WIDTH].iter_mut().zip(self.heights.iter()) {
            *slot = height as f32 / HEIGHT as f32;
        }
        input[WIDTH + 1] = self.heuristic_depth as f32 / CELLS as f32;
        input[WIDTH + 2] = self.exact_depth as f32 / CELLS as f32;
        input[WIDTH + 3] = self.time_remaining.map_or(1.0, |time| {
            (time.as_secs_f32() / TIME_SCALE_SECS).min(1.0)
        });
        input[WIDTH + 4] = self.side_to_play as f32;
        input
    }
}

/// Raw parameters proposed by a policy, see [`Schedule::clamped`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Schedule {
    pub weights: [f32; 4],
    pub exact_tail: i32,
    pub ordering_depth: i32,
    pub min_heuristic_depth: i32,
    pub min_exact_depth: i32,
}

impl From<SearchParams> for Schedule {
    fn from(params: SearchParams) -> Self {
        Self {
            weights: params.weights.to_array(),
            exact_tail: params.exact_tail as i32,
            ordering_depth: params.ordering_depth as i32,
            min_heuristic_depth: params.min_heuristic_depth as i32,
            min_exact_depth: params.min_exact_depth as i32,
        }
    }
}

impl Schedule {
    /// Forces the schedule into a usable range for a position with
    /// `move_count` pieces searched at `heuristic_depth`.
    ///
    /// The exact tail is cut so that the heuristic depth, the tail and the
    /// pieces already played never exceed the board. Weights that are not
    /// finite fall back to the defaults.
    pub fn clamped(&self, move_count: u8, heuristic_depth: u8) -> SearchParams {
        let remaining = (CELLS as i32 - move_count as i32).max(0);
        let defaults = HeuristicWeights::default().to_array();

        let mut weights = [0.0; 4];
        for (i, weight) in weights.iter_mut().enumerate() {
            *weight = if self.weights[i].is_finite() {
                self.weights[i].max(-1.0).min(1.0)
            } else {
                defaults[i]
            };
        }

        let tail_room = (remaining - heuristic_depth as i32).max(0);
        let clamp = |value: i32, low: i32, high: i32| value.max(low).min(high.max(low)) as u8;

        SearchParams {
            weights: HeuristicWeights::from(weights),
            exact_tail: clamp(self.exact_tail, 0, tail_room),
            ordering_depth: clamp(self.ordering_depth, 0, CELLS as i32),
            min_heuristic_depth: clamp(self.min_heuristic_depth, 1, remaining),
            min_exact_depth: clamp(self.min_exact_depth, 1, remaining),
        }
    }
}

pub trait Scheduler: Send + Sync {
    fn schedule(&self, features: &Features) -> Schedule;
}

/// Always proposes the same parameters
#[derive(Copy, Clone, Debug, Default)]
pub struct FixedScheduler {
    params: SearchParams,
}

impl FixedScheduler {
    pub fn new(params: SearchParams) -> Self {
        Self { params }
    }
}

impl Scheduler for FixedScheduler {
    fn schedule(&self, _features: &Features) -> Schedule {
        Schedule::from(self.params)
    }
}

/// A single hidden layer perceptron mapping [`Features`] to a [`Schedule`]
///
/// Outputs are the four heuristic weights followed by the exact tail, the
/// ordering depth and the two minimum depths.
#[derive(Clone, Debug)]
pub struct NeuralScheduler {
    // each row holds one neuron's weights with its bias last
    input_weights: Vec<[f32; INPUT_DIM + 1]>,
    hidden_weights: Vec<[f32; HIDDEN_DIM + 1]>,
}

impl NeuralScheduler {
    /// A network with every weight at zero
    pub fn zeroed() -> Self {
        Self {
            input_weights: vec![[0.0; INPUT_DIM + 1]; HIDDEN_DIM],
            hidden_weights: vec![[0.0; HIDDEN_DIM + 1]; OUTPUT_DIM],
        }
    }

    /// Builds a network from its two weight matrices
    pub fn from_weights(
        input_weights: Vec<[f32; INPUT_DIM + 1]>,
        hidden_weights: Vec<[f32; HIDDEN_DIM + 1]>,
    ) -> Result<Self, EngineError> {
        if input_weights.len() != HIDDEN_DIM || hidden_weights.len() != OUTPUT_DIM {
            return Err(EngineError::WeightFormat(format!(
                "expected {}x{} and {}x{} matrices, got {} and {} rows",
                HIDDEN_DIM,
                INPUT_DIM + 1,
                OUTPUT_DIM,
                HIDDEN_DIM + 1,
                input_weights.len(),
                hidden_weights.len()
            )));
        }
        Ok(Self {
            input_weights,
            hidden_weights,
        })
    }

    /// Loads a weight file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        Self::load_from(BufReader::new(File::open(path)?))
    }

    /// Reads the little-endian header and both matrices
    pub fn load_from<R: Read>(mut reader: R) -> Result<Self, EngineError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != WEIGHT_MAGIC {
            return Err(EngineError::WeightFormat(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let dims = [
            reader.read_u32::<LittleEndian>()?,
            reader.read_u32::<LittleEndian>()?,
            reader.read_u32::<LittleEndian>()?,
        ];
        if dims != [INPUT_DIM as u32, HIDDEN_DIM as u32, OUTPUT_DIM as u32] {
            return Err(EngineError::WeightFormat(format!(
                "dimensions {:?} do not match {}x{}x{}",
                dims, INPUT_DIM, HIDDEN_DIM, OUTPUT_DIM
            )));
        }

        let mut network = Self::zeroed();
        for row in network.input_weights.iter_mut() {
            reader.read_f32_into::<LittleEndian>(row)?;
        }
        for row in network.hidden_weights.iter_mut() {
            reader.read_f32_into::<LittleEndian>(row)?;
        }
        Ok(network)
    }

    /// Falls back to a [`FixedScheduler`] with `params` if the file is
    /// missing or malformed
    pub fn load_or_default<P: AsRef<Path>>(path: P, params: SearchParams) -> Box<dyn Scheduler> {
        match Self::load(path.as_ref()) {
            Ok(network) => Box::new(network),
            Err(err) => {
                warn!(
                    "could not load scheduler weights from {}: {}, using fixed parameters",
                    path.as_ref().display(),
                    err
                );
                Box::new(FixedScheduler::new(params))
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let mut file = BufWriter::new(File::create(path)?);
        self.write_to(&mut file)?;
        file.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), EngineError> {
        writer.write_u32::<LittleEndian>(WEIGHT_MAGIC)?;
        writer.write_u32::<LittleEndian>(INPUT_DIM as u32)?;
        writer.write_u32::<LittleEndian>(HIDDEN_DIM as u32)?;
        writer.write_u32::<LittleEndian>(OUTPUT_DIM as u32)?;
        for row in self.input_weights.iter() {
            for &weight in row.iter() {
                writer.write_f32::<LittleEndian>(weight)?;
            }
        }
        for row in self.hidden_weights.iter() {
            for &weight in row.iter() {
                writer.write_f32::<LittleEndian>(weight)?;
            }
        }
        Ok(())
    }

    /// Runs the network: ReLU hidden layer, linear output
    pub fn forward(&self, input: &[f32; INPUT_DIM]) -> [f32; OUTPUT_DIM] {
        let mut hidden = [0.0f32; HIDDEN_DIM];
        for (node, row) in hidden.iter_mut().zip(self.input_weights.iter()) {
            let sum = row[INPUT_DIM]
                + row[..INPUT_DIM]
                    .iter()
                    .zip(input.iter())
                    .map(|(w, x)| w * x)
                    .sum::<f32>();
            *node = sum.max(0.0);
        }

        let mut output = [0.0f32; OUTPUT_DIM];
        for (node, row) in output.iter_mut().zip(self.hidden_weights.iter()) {
            *node = row[HIDDEN_DIM]
                + row[..HIDDEN_DIM]
                    .iter()
                    .zip(hidden.iter())
                    .map(|(w, x)| w * x)
                    .sum::<f32>();
        }
        output
    }
}

impl Scheduler for NeuralScheduler {
    fn schedule(&self, features: &Features) -> Schedule {
        let output = self.forward(&features.to_input());
        // `as` saturates and maps NaN to 0, clamping does the rest
        Schedule {
            weights: [output[0], output[1], output[2], output[3]],
            exact_tail: output[4].round() as i32,
            ordering_depth: output[5].round() as i32,
            min_heuristic_depth: output[6].round() as i32,
            min_exact_depth: output[7].round() as i32,
        }
    }
}
