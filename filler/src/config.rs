// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Settings that control a conversion.

/// Default limit on the number of distinct fields (pointings).
pub const DEFAULT_MAX_FIELDS: usize = 256;

/// Knobs for one filler run. The limits bound the tracked directories;
/// running into one aborts the run with `FillerError::CapacityExceeded`.
#[derive(Clone, Debug, PartialEq)]
pub struct FillerConfig {
    /// Weight rows by 1/sqrt(Tsys1 * Tsys2) instead of uniformly.
    pub apply_tsys: bool,

    /// The scan number of the first scan.
    pub scan_number_base: i32,

    pub max_fields: usize,
    pub max_sources: usize,
    pub max_antennas: usize,
    pub max_channels: usize,
    pub max_windows: usize,

    /// Emit rows for the wideband (channel-averaged) pseudo-windows.
    pub keep_wide_windows: bool,

    /// Append `_C` to the names of fields that define their source's
    /// nominal position.
    pub suffix_central_fields: bool,

    /// The time system recorded in the MEASURE_REFERENCE keywords.
    pub time_system: String,
}

impl Default for FillerConfig {
    fn default() -> Self {
        FillerConfig {
            apply_tsys: false,
            scan_number_base: 0,
            max_fields: DEFAULT_MAX_FIELDS,
            max_sources: 256,
            max_antennas: 256,
            max_channels: 65536,
            max_windows: 64,
            keep_wide_windows: true,
            suffix_central_fields: true,
            time_system: "TAI".to_owned(),
        }
    }
}

impl FillerConfig {
    /// The time system to record, if it is one that we understand. "IAT"
    /// is MIRIAD's name for TAI.
    pub fn time_reference(&self) -> Option<&'static str> {
        match self.time_system.to_ascii_uppercase().as_str() {
            "TAI" | "IAT" => Some("TAI"),
            "UTC" => Some("UTC"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_system_aliases() {
        let mut cfg = FillerConfig::default();
        assert_eq!(cfg.time_reference(), Some("TAI"));
        cfg.time_system = "iat".to_owned();
        assert_eq!(cfg.time_reference(), Some("TAI"));
        cfg.time_system = "LAST".to_owned();
        assert_eq!(cfg.time_reference(), None);
    }

    #[test]
    fn scans_count_from_zero() {
        assert_eq!(FillerConfig::default().scan_number_base, 0);
    }
}
