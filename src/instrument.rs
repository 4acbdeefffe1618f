//! Oscilloscope configuration model shared by both ends of a session.
//!
//! The server keeps the authoritative [`InstrumentConfig`] inside the instrument
//! actor; the client keeps a mirror of it that is refreshed from `[INFO]`
//! acknowledgements. In both places a field only ever holds the value the
//! instrument reported back after a setter, never the raw requested value.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Rejected enumerated value (channel, coupling, slope or trigger mode).
///
/// The display strings are the operator-facing texts carried in `[ERROR]`
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("Invalid Channel Number")]
    Channel(String),

    #[error("Invalid Coupling type")]
    Coupling(String),

    #[error("Invalid Slope type")]
    Slope(String),

    #[error("Invalid Trigger Mode")]
    Mode(String),
}

/// Input channel of the oscilloscope. Only the first two inputs are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    C1,
    C2,
}

impl Channel {
    /// One-based channel number as used in tags and file names.
    pub fn number(self) -> u8 {
        match self {
            Channel::C1 => 1,
            Channel::C2 => 2,
        }
    }
}

impl TryFrom<i64> for Channel {
    type Error = ValueError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Channel::C1),
            2 => Ok(Channel::C2),
            other => Err(ValueError::Channel(other.to_string())),
        }
    }
}

impl FromStr for Channel {
    type Err = ValueError;

    /// Accepts `1`, `2`, `C1`, `C2` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('C')
            .or_else(|| trimmed.strip_prefix('c'))
            .unwrap_or(trimmed);
        digits
            .parse::<i64>()
            .map_err(|_| ValueError::Channel(s.to_string()))
            .and_then(Channel::try_from)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.number())
    }
}

/// Trigger input coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCoupling {
    Ac,
    Dc,
}

impl FromStr for TriggerCoupling {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ac" => Ok(TriggerCoupling::Ac),
            "dc" => Ok(TriggerCoupling::Dc),
            _ => Err(ValueError::Coupling(s.to_string())),
        }
    }
}

impl fmt::Display for TriggerCoupling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerCoupling::Ac => "ac",
            TriggerCoupling::Dc => "dc",
        })
    }
}

/// Trigger edge slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSlope {
    Positive,
    Negative,
    Either,
}

impl FromStr for TriggerSlope {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(TriggerSlope::Positive),
            "negative" => Ok(TriggerSlope::Negative),
            "either" => Ok(TriggerSlope::Either),
            _ => Err(ValueError::Slope(s.to_string())),
        }
    }
}

impl fmt::Display for TriggerSlope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerSlope::Positive => "positive",
            TriggerSlope::Negative => "negative",
            TriggerSlope::Either => "either",
        })
    }
}

/// Acquisition mode governing whether the instrument waits for a trigger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Auto,
    Single,
    Normal,
    Stopped,
}

impl FromStr for TriggerMode {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TriggerMode::Auto),
            "single" => Ok(TriggerMode::Single),
            "normal" => Ok(TriggerMode::Normal),
            "stopped" => Ok(TriggerMode::Stopped),
            _ => Err(ValueError::Mode(s.to_string())),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerMode::Auto => "auto",
            TriggerMode::Single => "single",
            TriggerMode::Normal => "normal",
            TriggerMode::Stopped => "stopped",
        })
    }
}

/// Instrument settings as last reported by the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    pub time_scale: f64,
    pub horizontal_offset: f64,
    pub c1_vertical_scale: f64,
    pub c2_vertical_scale: f64,
    pub samples: u32,
    /// Hz
    pub sampling_rate: u64,
    pub trigger_source: Channel,
    pub trigger_level: f64,
    pub trigger_coupling: TriggerCoupling,
    pub trigger_slope: TriggerSlope,
    pub trigger_mode: TriggerMode,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            horizontal_offset: 0.0,
            c1_vertical_scale: 1.0,
            c2_vertical_scale: 1.0,
            samples: 20_000,
            sampling_rate: 1_000_000,
            trigger_source: Channel::C1,
            trigger_level: 1.0,
            trigger_coupling: TriggerCoupling::Ac,
            trigger_slope: TriggerSlope::Positive,
            trigger_mode: TriggerMode::Auto,
        }
    }
}

impl InstrumentConfig {
    pub fn vertical_scale(&self, channel: Channel) -> f64 {
        match channel {
            Channel::C1 => self.c1_vertical_scale,
            Channel::C2 => self.c2_vertical_scale,
        }
    }

    pub fn set_vertical_scale(&mut self, channel: Channel, scale: f64) {
        match channel {
            Channel::C1 => self.c1_vertical_scale = scale,
            Channel::C2 => self.c2_vertical_scale = scale,
        }
    }
}

/// One acquisition's samples for a single channel.
///
/// An empty capture is the sentinel returned for both channels when a
/// triggered read times out.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformCapture {
    pub channel: Channel,
    pub samples: Arc<[f64]>,
}

impl WaveformCapture {
    pub fn new(channel: Channel, samples: Vec<f64>) -> Self {
        Self {
            channel,
            samples: samples.into(),
        }
    }

    pub fn empty(channel: Channel) -> Self {
        Self::new(channel, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Comma-separated rendering used on the wire and in channel files.
    pub fn render_samples(&self) -> String {
        let mut out = String::with_capacity(self.samples.len() * 8);
        for (i, sample) in self.samples.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&sample.to_string());
        }
        out
    }

    /// Inverse of [`render_samples`](Self::render_samples).
    pub fn parse_samples(channel: Channel, text: &str) -> Result<Self, std::num::ParseFloatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::empty(channel));
        }
        let samples = text
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(channel, samples))
    }
}
