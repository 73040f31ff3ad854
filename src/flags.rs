//! Bit flags selecting what a context records.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Which region kinds are recorded and whether hardware counters are sampled.
    ///
    /// The bit values are part of the call-site ABI.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ProfileFlags: u32 {
        /// Uniform and varying conditionals
        const IF = 0x2;
        const LOOP = 0x4;
        const FOREACH = 0x8;
        const SWITCH = 0x10;
        const FUNCTION = 0x20;
        /// Sample hardware counters on region entry and exit
        const COUNTERS = 0x40;

        const ALL_NO_COUNTERS = Self::IF.bits()
            | Self::LOOP.bits()
            | Self::FOREACH.bits()
            | Self::SWITCH.bits()
            | Self::FUNCTION.bits();
        const ALL = Self::ALL_NO_COUNTERS.bits() | Self::COUNTERS.bits();
    }
}

impl ProfileFlags {
    /// Build from a raw ABI value, dropping unknown bits.
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_truncate(raw)
    }

    #[inline]
    pub fn samples_counters(self) -> bool {
        self.contains(ProfileFlags::COUNTERS)
    }
}

impl Default for ProfileFlags {
    fn default() -> Self {
        ProfileFlags::ALL
    }
}
