// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Mapping MIRIAD polarization codes onto output correlation slots.

use mirfill_visdata::VisPol;

use crate::error::{FillerError, Result};

/// The correlations of every output row, in order.
pub const CANONICAL_ORDER: [VisPol; 4] = [VisPol::XX, VisPol::XY, VisPol::YX, VisPol::YY];

/// MIRIAD linear-polarization codes run from -5 to -8; adding this bias
/// turns them into table indices.
const CODE_BIAS: i32 = 8;

/// Indexed by `code + CODE_BIAS`: -8 (YX), -7 (XY), -6 (YY), -5 (XX).
const SLOT_BY_BIASED_CODE: [usize; 4] = [2, 1, 3, 0];

/// Map a MIRIAD `pol` value to its index in `CANONICAL_ORDER`.
pub fn canonical_index(code: i32) -> Result<usize> {
    let biased = code + CODE_BIAS;

    if !(0..SLOT_BY_BIASED_CODE.len() as i32).contains(&biased) {
        return Err(FillerError::UnknownPolarization(code));
    }

    Ok(SLOT_BY_BIASED_CODE[biased as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_codes_map_bijectively() {
        let mut seen = [false; 4];

        for pol in CANONICAL_ORDER {
            let idx = canonical_index(pol.miriad_code()).unwrap();
            assert_eq!(CANONICAL_ORDER[idx], pol);
            assert!(!seen[idx]);
            seen[idx] = true;
        }

        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn other_codes_are_rejected() {
        for code in [-9, -4, -1, 0, 1, 4, 100] {
            assert!(matches!(
                canonical_index(code),
                Err(FillerError::UnknownPolarization(c)) if c == code
            ));
        }
    }
}
