// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Error types for the filler.

use mirfill_miriad::MiriadFormatError;
use thiserror::Error;

use crate::sink::SinkError;

#[derive(Error, Debug)]
pub enum FillerError {
    #[error("the input data set contains no visibility data")]
    NoVisibilityData,

    #[error("the spectral layout needs the uv variable \"{0}\", but it is missing")]
    MissingLayoutVariable(&'static str),

    #[error("unsupported polarization code {0}; only XX, XY, YX, and YY are handled")]
    UnknownPolarization(i32),

    #[error("too many {what}: the limit is {limit}")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("record {record} has {found} channels, but the stream started with {expected}")]
    ChannelCountChanged {
        record: u64,
        expected: usize,
        found: usize,
    },

    #[error("the spectral window layout changed at record {record}")]
    LayoutChanged { record: u64 },

    #[error("uv variable \"{name}\" is malformed: {reason}")]
    MalformedVariable { name: String, reason: String },

    #[error(transparent)]
    Archive(#[from] MiriadFormatError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl FillerError {
    pub(crate) fn malformed<S: Into<String>>(name: &str, reason: S) -> Self {
        FillerError::MalformedVariable {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    /// Stream-integrity failures stop the main pass, but the rows written
    /// up to that point are kept and the subtables are still filled in.
    pub fn is_stream_integrity(&self) -> bool {
        matches!(
            self,
            FillerError::ChannelCountChanged { .. } | FillerError::LayoutChanged { .. }
        )
    }
}

impl From<std::io::Error> for FillerError {
    fn from(e: std::io::Error) -> Self {
        FillerError::Archive(e.into())
    }
}

pub type Result<T> = std::result::Result<T, FillerError>;
