// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Working with interferometric visibility polarizations.
//!
//! MIRIAD and CASA number polarizations differently. The conversions between
//! the two conventions live here.

/// A "feed pol(arization)" is the polarization component sampled by a
/// particular receptor on an radio antenna.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FeedPol {
    X,
    Y,
    R,
    L,
}

impl FeedPol {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedPol::X => "X",
            FeedPol::Y => "Y",
            FeedPol::R => "R",
            FeedPol::L => "L",
        }
    }
}

/// A "vis(ibility) pol(arization)" is the polarization sampled by the
/// cross-correlation of the voltages of two radio receptors.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum VisPol {
    XX,
    XY,
    YX,
    YY,
    RR,
    RL,
    LR,
    LL,
    I,
    Q,
    U,
    V,
}

impl VisPol {
    /// Decode a MIRIAD `pol` uv-variable value.
    pub fn from_miriad_code(code: i32) -> Option<VisPol> {
        Some(match code {
            1 => VisPol::I,
            2 => VisPol::Q,
            3 => VisPol::U,
            4 => VisPol::V,
            -1 => VisPol::RR,
            -2 => VisPol::LL,
            -3 => VisPol::RL,
            -4 => VisPol::LR,
            -5 => VisPol::XX,
            -6 => VisPol::YY,
            -7 => VisPol::XY,
            -8 => VisPol::YX,
            _ => return None,
        })
    }

    pub fn miriad_code(self) -> i32 {
        match self {
            VisPol::I => 1,
            VisPol::Q => 2,
            VisPol::U => 3,
            VisPol::V => 4,
            VisPol::RR => -1,
            VisPol::LL => -2,
            VisPol::RL => -3,
            VisPol::LR => -4,
            VisPol::XX => -5,
            VisPol::YY => -6,
            VisPol::XY => -7,
            VisPol::YX => -8,
        }
    }

    /// The value of this polarization in the casacore `Stokes` enumeration,
    /// as used in the POLARIZATION table's CORR_TYPE column.
    pub fn casa_stokes_code(self) -> i32 {
        match self {
            VisPol::I => 1,
            VisPol::Q => 2,
            VisPol::U => 3,
            VisPol::V => 4,
            VisPol::RR => 5,
            VisPol::RL => 6,
            VisPol::LR => 7,
            VisPol::LL => 8,
            VisPol::XX => 9,
            VisPol::XY => 10,
            VisPol::YX => 11,
            VisPol::YY => 12,
        }
    }

    /// The feed sampled by the first antenna, or `None` for Stokes
    /// parameters.
    pub fn feedpol1(self) -> Option<FeedPol> {
        match self {
            VisPol::XX | VisPol::XY => Some(FeedPol::X),
            VisPol::YX | VisPol::YY => Some(FeedPol::Y),
            VisPol::RR | VisPol::RL => Some(FeedPol::R),
            VisPol::LR | VisPol::LL => Some(FeedPol::L),
            VisPol::I | VisPol::Q | VisPol::U | VisPol::V => None,
        }
    }

    /// The feed sampled by the second antenna, or `None` for Stokes
    /// parameters.
    pub fn feedpol2(self) -> Option<FeedPol> {
        match self {
            VisPol::XX | VisPol::YX => Some(FeedPol::X),
            VisPol::XY | VisPol::YY => Some(FeedPol::Y),
            VisPol::RR | VisPol::LR => Some(FeedPol::R),
            VisPol::RL | VisPol::LL => Some(FeedPol::L),
            VisPol::I | VisPol::Q | VisPol::U | VisPol::V => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miriad_codes_round_trip() {
        for code in -8..=4 {
            if code == 0 {
                assert!(VisPol::from_miriad_code(code).is_none());
                continue;
            }

            let p = VisPol::from_miriad_code(code).unwrap();
            assert_eq!(p.miriad_code(), code);
        }

        assert!(VisPol::from_miriad_code(-9).is_none());
    }

    #[test]
    fn feeds_of_linear_pols() {
        assert_eq!(VisPol::XY.feedpol1(), Some(FeedPol::X));
        assert_eq!(VisPol::XY.feedpol2(), Some(FeedPol::Y));
        assert_eq!(VisPol::I.feedpol1(), None);
        assert_eq!(VisPol::YX.casa_stokes_code(), 11);
    }
}
