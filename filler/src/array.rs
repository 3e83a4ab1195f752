// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Array configurations. A new generation starts whenever the antenna
//! positions change.

use crate::error::{FillerError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayGeneration {
    pub n_antennas: usize,

    /// Antenna positions in nanoseconds, in the local equatorial frame.
    pub positions: Vec<[f64; 3]>,

    /// The highest 1-based antenna number seen in a baseline while this
    /// generation was current.
    pub max_antenna: usize,

    /// The MIRIAD mount code, if known.
    pub mount: Option<i64>,
}

impl ArrayGeneration {
    /// Build a generation from the `antpos` variable, which stores all of
    /// the X coordinates, then all of the Y, then all of the Z.
    pub fn from_antpos(antpos: &[f64], n_antennas: usize, mount: Option<i64>) -> Result<Self> {
        if antpos.len() < 3 * n_antennas {
            return Err(FillerError::malformed(
                "antpos",
                format!("{} values for {n_antennas} antennas", antpos.len()),
            ));
        }

        let positions = (0..n_antennas)
            .map(|i| [antpos[i], antpos[i + n_antennas], antpos[i + 2 * n_antennas]])
            .collect();

        Ok(ArrayGeneration {
            n_antennas,
            positions,
            max_antenna: 0,
            mount,
        })
    }

    /// A stand-in for data sets that never say where their antennas are.
    pub fn unknown(n_antennas: usize) -> Self {
        ArrayGeneration {
            n_antennas,
            positions: vec![[0.; 3]; n_antennas],
            max_antenna: n_antennas,
            mount: None,
        }
    }

    /// The number of ANTENNA and FEED rows this generation needs.
    pub fn n_rows(&self) -> usize {
        self.n_antennas.max(self.max_antenna)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayConfig {
    generations: Vec<ArrayGeneration>,
    max_antennas: usize,
}

impl ArrayConfig {
    pub fn new(max_antennas: usize) -> Self {
        ArrayConfig {
            generations: Vec::new(),
            max_antennas,
        }
    }

    /// Start a new generation; returns its id.
    pub fn add_generation(&mut self, gen: ArrayGeneration) -> Result<usize> {
        if gen.n_antennas > self.max_antennas {
            return Err(FillerError::CapacityExceeded {
                what: "antennas",
                limit: self.max_antennas,
            });
        }

        self.generations.push(gen);
        Ok(self.generations.len() - 1)
    }

    /// The id of the current generation, which is 0 before any has been
    /// defined.
    pub fn current_id(&self) -> usize {
        self.generations.len().saturating_sub(1)
    }

    /// Record that a baseline used these antennas.
    pub fn note_antennas(&mut self, ant1: usize, ant2: usize) -> Result<()> {
        let biggest = ant1.max(ant2);

        if biggest > self.max_antennas {
            return Err(FillerError::CapacityExceeded {
                what: "antennas",
                limit: self.max_antennas,
            });
        }

        if self.generations.is_empty() {
            self.generations.push(ArrayGeneration::unknown(0));
        }

        if let Some(gen) = self.generations.last_mut() {
            gen.max_antenna = gen.max_antenna.max(biggest);
        }

        Ok(())
    }

    pub fn last_generation_mut(&mut self) -> Option<&mut ArrayGeneration> {
        self.generations.last_mut()
    }

    pub fn generations(&self) -> &[ArrayGeneration] {
        &self.generations
    }
}
