//! OFDM airtime model for the transmit stage.
//!
//! One OFDM symbol lasts `(64 + cp) / fs` seconds and carries 48 data
//! subcarriers of `bits_per_subcarrier` bits. A packet is its payload plus
//! a 4-byte CRC, preceded by three preamble/header symbols.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::calibration::{StageModel, ThroughputScaling};

const FFT_SIZE: u32 = 64;
const DATA_SUBCARRIERS: u32 = 48;
const CRC_BYTES: u32 = 4;
const HEADER_SYMBOLS: u32 = 3;

/// Subcarrier modulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    /// One bit per subcarrier.
    Bpsk,
    /// Two bits per subcarrier.
    #[default]
    Qpsk,
    /// Four bits per subcarrier.
    Qam16,
}

impl Modulation {
    /// Bits carried by one subcarrier.
    #[must_use]
    pub fn bits_per_subcarrier(self) -> u32 {
        match self {
            Self::Bpsk => 1,
            Self::Qpsk => 2,
            Self::Qam16 => 4,
        }
    }
}

/// Transmit duration model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirtimeModel {
    /// Baseband sample rate, Hz.
    pub sample_rate_hz: f64,
    /// Payload bytes per packet.
    pub packet_bytes: u32,
    /// Subcarrier modulation.
    pub modulation: Modulation,
    /// Cyclic prefix, samples.
    pub cyclic_prefix: u32,
    /// Fractional slack on the pure airtime.
    pub slack: f64,
    /// Delay before the first packet.
    pub start_delay: Duration,
}

impl AirtimeModel {
    /// Duration of one OFDM symbol, seconds.
    #[must_use]
    pub fn symbol_seconds(&self) -> f64 {
        f64::from(FFT_SIZE + self.cyclic_prefix) / self.sample_rate_hz.max(1.0)
    }

    /// Symbols needed for one packet including header symbols.
    #[must_use]
    pub fn symbols_per_packet(&self) -> u32 {
        let bits_per_symbol = DATA_SUBCARRIERS * self.modulation.bits_per_subcarrier();
        let payload_bits = (self.packet_bytes + CRC_BYTES) * 8;
        HEADER_SYMBOLS + payload_bits.div_ceil(bits_per_symbol)
    }

    /// Airtime of one packet, seconds.
    #[must_use]
    pub fn packet_seconds(&self) -> f64 {
        f64::from(self.symbols_per_packet()) * self.symbol_seconds()
    }

    /// Predicted transmit duration for `total_bytes`, including slack and
    /// start delay.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate(&self, total_bytes: u64) -> Duration {
        let packets = total_bytes.div_ceil(u64::from(self.packet_bytes.max(1)));
        let airtime = packets as f64 * self.packet_seconds() * (1.0 + self.slack);
        Duration::from_secs_f64(airtime.max(0.0)) + self.start_delay
    }

    /// Effective payload throughput including slack, bytes/s.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        f64::from(self.packet_bytes) / (self.packet_seconds() * (1.0 + self.slack))
    }

    /// Stage model seeding the transmit stage's calibration.
    #[must_use]
    pub fn stage_model(&self) -> StageModel {
        StageModel {
            base_throughput: self.throughput(),
            overhead: self.start_delay,
            scaling: ThroughputScaling::Linear,
        }
    }
}
