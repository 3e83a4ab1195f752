// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! An in-memory archive for unit tests.

use mirfill_core::Complex;
use mirfill_miriad::AnyMiriadValue;
use std::collections::HashMap;

use crate::archive::{VisibilityArchive, VisibilityRecord};
use crate::error::Result;

/// A scripted uv stream. Each record carries the variable updates that
/// precede it; `set` updates a variable immediately.
#[derive(Clone, Debug, Default)]
pub struct ScriptedArchive {
    vars: HashMap<String, (u64, AnyMiriadValue)>,
    script: Vec<(Vec<(String, AnyMiriadValue)>, VisibilityRecord)>,
    cursor: usize,
    items: Vec<String>,
    history: Vec<String>,
}

impl ScriptedArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: AnyMiriadValue) {
        let entry = self
            .vars
            .entry(name.to_owned())
            .or_insert((0, AnyMiriadValue::Binary(Vec::new())));
        entry.0 += 1;
        entry.1 = value;
    }

    pub fn push_record(&mut self, updates: Vec<(&str, AnyMiriadValue)>, record: VisibilityRecord) {
        let updates = updates
            .into_iter()
            .map(|(n, v)| (n.to_owned(), v))
            .collect();
        self.script.push((updates, record));
    }

    pub fn add_item(&mut self, name: &str) {
        self.items.push(name.to_owned());
    }

    pub fn add_history(&mut self, line: &str) {
        self.history.push(line.to_owned());
    }
}

impl VisibilityArchive for ScriptedArchive {
    fn rewind(&mut self) -> Result<()> {
        self.vars.clear();
        self.cursor = 0;
        Ok(())
    }

    fn read_record(&mut self, record: &mut VisibilityRecord) -> Result<bool> {
        let (updates, rec) = match self.script.get(self.cursor) {
            Some(s) => s.clone(),
            None => return Ok(false),
        };

        for (name, value) in updates {
            self.set(&name, value);
        }

        *record = rec;
        self.cursor += 1;
        Ok(true)
    }

    fn variable_version(&self, name: &str) -> Option<u64> {
        self.vars.get(name).map(|(v, _)| *v)
    }

    fn variable(&self, name: &str) -> Option<AnyMiriadValue> {
        self.vars.get(name).map(|(_, v)| v.clone())
    }

    fn has_item(&mut self, name: &str) -> Result<bool> {
        Ok(self.items.iter().any(|i| i == name))
    }

    fn history(&mut self) -> Result<Vec<String>> {
        Ok(self.history.clone())
    }
}

/// A record whose samples are all good, with values `re = channel`,
/// `im = pol code`.
pub fn record(ant1: usize, ant2: usize, time: f64, pol: i32, n_fine: usize, n_wide: usize) -> VisibilityRecord {
    let samples = |n: usize, offset: usize| -> Vec<Complex<f32>> {
        (0..n)
            .map(|i| Complex::new((i + offset) as f32, pol as f32))
            .collect()
    };

    VisibilityRecord {
        uvw: [10., -20., 30.],
        time,
        ant1,
        ant2,
        pol,
        corr: samples(n_fine, 0),
        flags: vec![true; n_fine],
        wcorr: samples(n_wide, n_fine),
        wflags: vec![true; n_wide],
    }
}

/// The variables of a simple layout: one spectral window of *n_fine*
/// channels at 100 GHz and *n_wide* wideband channels.
pub fn layout_updates(n_fine: usize, n_wide: usize) -> Vec<(&'static str, AnyMiriadValue)> {
    let mut v = vec![
        ("nwide", AnyMiriadValue::Int32(vec![n_wide as i32])),
        ("wfreq", AnyMiriadValue::Float32(vec![100.; n_wide])),
        ("wwidth", AnyMiriadValue::Float32(vec![0.5; n_wide])),
    ];

    if n_fine > 0 {
        v.extend([
            ("nspect", AnyMiriadValue::Int32(vec![1])),
            ("nschan", AnyMiriadValue::Int32(vec![n_fine as i32])),
            ("ischan", AnyMiriadValue::Int32(vec![1])),
            ("restfreq", AnyMiriadValue::Float64(vec![100.])),
            ("sfreq", AnyMiriadValue::Float64(vec![100.])),
            ("sdf", AnyMiriadValue::Float64(vec![0.001])),
        ]);
    } else {
        v.push(("nspect", AnyMiriadValue::Int32(vec![0])));
    }

    v
}
