//! Game modes and gameplay modifier flags.
//!
//! Eight modes total: the four vanilla modes plus the relax variants of
//! standard/taiko/catch and autopilot standard. Modifier flags only matter
//! here for deriving the effective mode from a vanilla mode id.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Gameplay modifier flags supplied by the client with a score.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mods: u32 {
        const NO_FAIL   = 1 << 0;
        const EASY      = 1 << 1;
        const HIDDEN    = 1 << 3;
        const HARD_ROCK = 1 << 4;
        const DOUBLE_TIME = 1 << 6;
        const RELAX     = 1 << 7;
        const AUTOPILOT = 1 << 13;
    }
}

/// Effective game mode, combining the vanilla mode with the relax and
/// autopilot modifier families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameMode {
    VanillaStd = 0,
    VanillaTaiko = 1,
    VanillaCatch = 2,
    VanillaMania = 3,

    RelaxStd = 4,
    RelaxTaiko = 5,
    RelaxCatch = 6,

    AutopilotStd = 7,
}

impl GameMode {
    const ALL: [GameMode; 8] = [
        GameMode::VanillaStd,
        GameMode::VanillaTaiko,
        GameMode::VanillaCatch,
        GameMode::VanillaMania,
        GameMode::RelaxStd,
        GameMode::RelaxTaiko,
        GameMode::RelaxCatch,
        GameMode::AutopilotStd,
    ];

    /// Derives the effective mode from a vanilla mode id and modifier flags.
    ///
    /// Combinations that do not exist (relax mania, autopilot anything but
    /// standard) fall back to the plain vanilla mode rather than applying
    /// the modifier.
    pub fn from_params(mode_vn: u8, mods: Mods) -> Self {
        let mode_vn = mode_vn & 3;

        // Relax has no mania variant and autopilot only exists for standard;
        // those combinations stay vanilla.
        let shifted = if mods.contains(Mods::RELAX) && mode_vn < 3 {
            mode_vn as usize + 4
        } else if mods.contains(Mods::AUTOPILOT) && mode_vn == 0 {
            7
        } else {
            mode_vn as usize
        };

        Self::ALL[shifted]
    }

    /// The vanilla mode id this mode is played under.
    pub fn as_vanilla(self) -> u8 {
        match self {
            GameMode::AutopilotStd => 0,
            other => other as u8 % 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relax_shifts_mode() {
        assert_eq!(GameMode::from_params(0, Mods::RELAX), GameMode::RelaxStd);
        assert_eq!(GameMode::from_params(2, Mods::RELAX), GameMode::RelaxCatch);
    }

    #[test]
    fn relax_mania_falls_back_to_vanilla() {
        assert_eq!(GameMode::from_params(3, Mods::RELAX), GameMode::VanillaMania);
    }

    #[test]
    fn autopilot_only_applies_to_standard() {
        assert_eq!(
            GameMode::from_params(0, Mods::AUTOPILOT),
            GameMode::AutopilotStd
        );
        assert_eq!(
            GameMode::from_params(1, Mods::AUTOPILOT),
            GameMode::VanillaTaiko
        );
    }

    #[test]
    fn as_vanilla_round_trip() {
        assert_eq!(GameMode::RelaxTaiko.as_vanilla(), 1);
        assert_eq!(GameMode::AutopilotStd.as_vanilla(), 0);
        assert_eq!(GameMode::VanillaMania.as_vanilla(), 3);
    }
}
