//! LNB local-oscillator configuration and frequency translation.

use serde::Deserialize;

/// Frequencies above this are assumed to still contain the LNB's local
/// oscillator offset and get downconverted (kHz).
pub const LO_THRESHOLD_KHZ: u32 = 2_200_000;

/// Local oscillator offsets of the LNB attached to one frontend, in kHz.
///
/// Defaults describe a universal Ku-band LNB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LnbConfig {
    /// Low-band local oscillator frequency.
    #[serde(default = "default_lof1")]
    pub lof1: u32,
    /// High-band local oscillator frequency.
    #[serde(default = "default_lof2")]
    pub lof2: u32,
    /// Band-switch frequency: at or above this, `lof2` applies and the
    /// 22 kHz tone is enabled.
    #[serde(default = "default_slof")]
    pub slof: u32,
}

fn default_lof1() -> u32 {
    9_750_000
}

fn default_lof2() -> u32 {
    10_600_000
}

fn default_slof() -> u32 {
    11_700_000
}

impl Default for LnbConfig {
    fn default() -> Self {
        Self {
            lof1: default_lof1(),
            lof2: default_lof2(),
            slof: default_slof(),
        }
    }
}

impl LnbConfig {
    /// Compute the tuner-facing frequency for a transponder frequency (kHz).
    ///
    /// Frequencies at or below [`LO_THRESHOLD_KHZ`] are already
    /// intermediate frequencies and pass through unchanged.
    pub fn tuner_frequency(&self, frequency: u32) -> u32 {
        if frequency > LO_THRESHOLD_KHZ {
            if frequency < self.slof {
                frequency - self.lof1
            } else {
                frequency - self.lof2
            }
        } else {
            frequency
        }
    }

    /// Whether the 22 kHz band-switch tone must be enabled for a frequency.
    pub fn high_band(&self, frequency: u32) -> bool {
        frequency > LO_THRESHOLD_KHZ && frequency >= self.slof
    }
}
