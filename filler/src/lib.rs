// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Convert MIRIAD uv data sets into CASA MeasurementSets.

The conversion streams through the uv records once. A `VariableTracker`
follows the metadata variables as they change, a `RowEmitter` assembles
polarization groups into main-table rows, and the subtables are written at
the end from what was learned along the way. Output goes through the
`OutputSink` trait; `MemorySink` keeps everything in memory, and the `casa`
feature adds a sink that writes real MeasurementSets.

```rust,ignore
use mirfill::{Filler, FillerConfig, MemorySink, MiriadArchive};

let config = FillerConfig::default();
let archive = MiriadArchive::open("vis.uv", config.max_channels)?;
let mut sink = MemorySink::new();
let summary = Filler::new(archive, config).run(&mut sink, &mut nb)?;
```

 */

pub mod archive;
pub mod array;
#[cfg(feature = "casa")]
pub mod casa;
pub mod config;
pub mod directory;
pub mod emitter;
pub mod error;
pub mod filler;
pub mod polarization;
pub mod sink;
pub mod site;
pub mod tables;
pub mod tracker;
pub mod window;

#[cfg(test)]
mod test_common;

pub use archive::{MiriadArchive, VisibilityArchive, VisibilityRecord};
pub use config::FillerConfig;
pub use error::{FillerError, Result};
pub use filler::{FillSummary, Filler};
pub use sink::{CellValue, MemorySink, MsTable, OutputSink, SinkError};
pub use tables::ObservationInfo;
