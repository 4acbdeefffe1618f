//! Text protocol spoken inside each frame.
//!
//! Requests are colon-delimited command phrases (`change vertical scale:1:2.5`).
//! Responses are tagged lines:
//!
//! ```text
//! [INFO][Time Scale]:0.5      configuration acknowledgement
//! [INFO]:Auto Setup Done      plain notice
//! [ERROR]: Invalid Command    command or instrument fault
//! [C-1]:0.1,0.2,0.3           one channel's samples
//! ```

use crate::instrument::{
    Channel, InstrumentConfig, TriggerCoupling, TriggerMode, TriggerSlope, ValueError,
    WaveformCapture,
};
use std::fmt;
use std::str::FromStr;

const INFO_TAG: &str = "[INFO]";
const ERROR_TAG: &str = "[ERROR]";
const DATA_TAG_PREFIX: &str = "[C-";

/// Configuration field named by an `[INFO][<Field>]` acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoField {
    TimeScale,
    HorizontalOffset,
    VerticalScale(Channel),
    Samples,
    SamplingRate,
    TriggerSource,
    TriggerLevel,
    TriggerCoupling,
    TriggerSlope,
    TriggerMode,
}

/// An `[INFO]` value that does not parse as its field's type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid value '{value}' for [{field}]")]
pub struct FieldValueError {
    pub field: String,
    pub value: String,
}

impl InfoField {
    /// Tag text as emitted by the server.
    pub fn tag(self) -> String {
        match self {
            InfoField::TimeScale => "Time Scale".to_string(),
            InfoField::HorizontalOffset => "Horizontal Offset".to_string(),
            InfoField::VerticalScale(channel) => format!("C{} Vertical Scale", channel.number()),
            InfoField::Samples => "Samples".to_string(),
            InfoField::SamplingRate => "Sampling Rate".to_string(),
            InfoField::TriggerSource => "Trigger Source".to_string(),
            InfoField::TriggerLevel => "Trigger Level".to_string(),
            InfoField::TriggerCoupling => "Trigger Coupling".to_string(),
            InfoField::TriggerSlope => "Trigger Slope".to_string(),
            InfoField::TriggerMode => "Trigger Mode".to_string(),
        }
    }

    /// Recognise a tag. Vertical scale is accepted as both `C1 Vertical Scale`
    /// and `C1-Vertical Scale`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let field = match tag.trim() {
            "Time Scale" => InfoField::TimeScale,
            "Horizontal Offset" => InfoField::HorizontalOffset,
            "C1 Vertical Scale" | "C1-Vertical Scale" => InfoField::VerticalScale(Channel::C1),
            "C2 Vertical Scale" | "C2-Vertical Scale" => InfoField::VerticalScale(Channel::C2),
            "Samples" => InfoField::Samples,
            "Sampling Rate" => InfoField::SamplingRate,
            "Trigger Source" => InfoField::TriggerSource,
            "Trigger Level" => InfoField::TriggerLevel,
            "Trigger Coupling" => InfoField::TriggerCoupling,
            "Trigger Slope" => InfoField::TriggerSlope,
            "Trigger Mode" => InfoField::TriggerMode,
            _ => return None,
        };
        Some(field)
    }

    /// Parse `value` with this field's type and write it into `config`.
    ///
    /// `config` is left untouched when the value does not parse.
    pub fn apply(self, config: &mut InstrumentConfig, value: &str) -> Result<(), FieldValueError> {
        let invalid = || FieldValueError {
            field: self.tag(),
            value: value.to_string(),
        };
        let value = value.trim();

        match self {
            InfoField::TimeScale => config.time_scale = value.parse().map_err(|_| invalid())?,
            InfoField::HorizontalOffset => {
                config.horizontal_offset = value.parse().map_err(|_| invalid())?
            }
            InfoField::VerticalScale(channel) => {
                let scale = value.parse().map_err(|_| invalid())?;
                config.set_vertical_scale(channel, scale);
            }
            InfoField::Samples => config.samples = value.parse().map_err(|_| invalid())?,
            InfoField::SamplingRate => config.sampling_rate = value.parse().map_err(|_| invalid())?,
            InfoField::TriggerSource => config.trigger_source = value.parse().map_err(|_| invalid())?,
            InfoField::TriggerLevel => config.trigger_level = value.parse().map_err(|_| invalid())?,
            InfoField::TriggerCoupling => {
                config.trigger_coupling = value.parse().map_err(|_| invalid())?
            }
            InfoField::TriggerSlope => config.trigger_slope = value.parse().map_err(|_| invalid())?,
            InfoField::TriggerMode => config.trigger_mode = value.parse().map_err(|_| invalid())?,
        }
        Ok(())
    }
}

/// One server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Acknowledgement or notice. `field` is set for known configuration tags.
    Info {
        field: Option<InfoField>,
        value: String,
    },
    Error(String),
    Data(WaveformCapture),
}

impl Message {
    pub fn info(field: InfoField, value: impl fmt::Display) -> Self {
        Message::Info {
            field: Some(field),
            value: value.to_string(),
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Message::Info {
            field: None,
            value: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Message::Error(text.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    /// Classify a server response line. Anything that is not a recognised
    /// response is returned as the error so the caller can report it.
    pub fn parse_response(text: &str) -> Result<Message, ProtocolError> {
        let invalid = || ProtocolError::InvalidMessage(text.to_string());

        if let Some(rest) = text.strip_prefix(DATA_TAG_PREFIX) {
            let (number, payload) = rest.split_once("]:").ok_or_else(invalid)?;
            let channel = number.parse::<Channel>().map_err(|_| invalid())?;
            let capture = WaveformCapture::parse_samples(channel, payload).map_err(|_| invalid())?;
            return Ok(Message::Data(capture));
        }

        if let Some(rest) = text.strip_prefix(ERROR_TAG) {
            let message = rest.strip_prefix(':').unwrap_or(rest).trim();
            return Ok(Message::Error(message.to_string()));
        }

        if let Some(rest) = text.strip_prefix(INFO_TAG) {
            if let Some(tagged) = rest.strip_prefix('[') {
                if let Some((tag, value)) = tagged.split_once(']') {
                    if let Some(field) = InfoField::from_tag(tag) {
                        let value = value.strip_prefix(':').unwrap_or(value).trim();
                        return Ok(Message::info(field, value));
                    }
                }
            }
            let value = rest.strip_prefix(':').unwrap_or(rest).trim();
            return Ok(Message::notice(value));
        }

        Err(invalid())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Info {
                field: Some(field),
                value,
            } => write!(f, "{}[{}]:{}", INFO_TAG, field.tag(), value),
            Message::Info { field: None, value } => write!(f, "{}:{}", INFO_TAG, value),
            Message::Error(text) => write!(f, "{}: {}", ERROR_TAG, text),
            Message::Data(capture) => write!(
                f,
                "{}{}]:{}",
                DATA_TAG_PREFIX,
                capture.channel.number(),
                capture.render_samples()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid return message: {0}")]
    InvalidMessage(String),
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ChangeTimeScale(f64),
    ChangeTimeOffset(f64),
    ChangeVerticalScale(Channel, f64),
    ChangeSamplesPerRead(u32),
    ChangeSamplingRate(u64),
    AutoSetup,
    Exit,
    SetTriggerSource(Channel),
    SetTriggerLevel(f64),
    SetTriggerCoupling(TriggerCoupling),
    SetTriggerSlope(TriggerSlope),
    ChangeTriggerMode(TriggerMode),
    ReadOnce(Channel),
    ReadTrigger,
}

/// Why a command line was rejected before reaching the instrument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid Command")]
    Unknown(String),

    #[error("Missing argument for {0}")]
    MissingArgument(String),

    #[error("Too many arguments for {0}")]
    TooManyArguments(String),

    #[error("Invalid argument for {command}: '{value}'")]
    InvalidArgument { command: String, value: String },

    #[error(transparent)]
    InvalidValue(#[from] ValueError),
}

impl Command {
    /// Command phrase, the first colon-delimited token on the wire.
    pub fn phrase(&self) -> &'static str {
        match self {
            Command::ChangeTimeScale(_) => "change time scale",
            Command::ChangeTimeOffset(_) => "change time offset",
            Command::ChangeVerticalScale(..) => "change vertical scale",
            Command::ChangeSamplesPerRead(_) => "change samples per read",
            Command::ChangeSamplingRate(_) => "change sampling rate",
            Command::AutoSetup => "auto setup",
            Command::Exit => "exit",
            Command::SetTriggerSource(_) => "set trigger source",
            Command::SetTriggerLevel(_) => "set trigger level",
            Command::SetTriggerCoupling(_) => "set trigger coupling",
            Command::SetTriggerSlope(_) => "set trigger slope",
            Command::ChangeTriggerMode(_) => "change trigger mode",
            Command::ReadOnce(_) => "read once",
            Command::ReadTrigger => "read trigger",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phrase = self.phrase();
        match self {
            Command::ChangeTimeScale(v)
            | Command::ChangeTimeOffset(v)
            | Command::SetTriggerLevel(v) => write!(f, "{}:{}", phrase, v),
            Command::ChangeVerticalScale(channel, scale) => {
                write!(f, "{}:{}:{}", phrase, channel.number(), scale)
            }
            Command::ChangeSamplesPerRead(n) => write!(f, "{}:{}", phrase, n),
            Command::ChangeSamplingRate(rate) => write!(f, "{}:{}", phrase, rate),
            Command::SetTriggerSource(channel) | Command::ReadOnce(channel) => {
                write!(f, "{}:{}", phrase, channel.number())
            }
            Command::SetTriggerCoupling(coupling) => write!(f, "{}:{}", phrase, coupling),
            Command::SetTriggerSlope(slope) => write!(f, "{}:{}", phrase, slope),
            Command::ChangeTriggerMode(mode) => write!(f, "{}:{}", phrase, mode),
            Command::AutoSetup | Command::Exit | Command::ReadTrigger => f.write_str(phrase),
        }
    }
}

/// Cursor over the arguments following a command phrase.
struct Args<'a> {
    command: String,
    tokens: std::slice::Iter<'a, &'a str>,
}

impl<'a> Args<'a> {
    fn next_token(&mut self) -> Result<&'a str, CommandError> {
        self.tokens
            .next()
            .copied()
            .ok_or_else(|| CommandError::MissingArgument(self.command.clone()))
    }

    fn invalid(&self, value: &str) -> CommandError {
        CommandError::InvalidArgument {
            command: self.command.clone(),
            value: value.to_string(),
        }
    }

    fn float(&mut self) -> Result<f64, CommandError> {
        let token = self.next_token()?;
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(self.invalid(token)),
        }
    }

    fn integer<T: FromStr>(&mut self) -> Result<T, CommandError> {
        let token = self.next_token()?;
        token.parse::<T>().map_err(|_| self.invalid(token))
    }

    fn value<T: FromStr<Err = ValueError>>(&mut self) -> Result<T, CommandError> {
        Ok(self.next_token()?.parse::<T>()?)
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.tokens.next() {
            Some(_) => Err(CommandError::TooManyArguments(self.command)),
            None => Ok(()),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.trim().split(':').map(str::trim).collect();
        let (head, rest) = tokens
            .split_first()
            .ok_or_else(|| CommandError::Unknown(s.to_string()))?;
        let phrase = head.to_ascii_lowercase();

        let mut args = Args {
            command: phrase.clone(),
            tokens: rest.iter(),
        };

        let command = match phrase.as_str() {
            "change time scale" => Command::ChangeTimeScale(args.float()?),
            "change time offset" => Command::ChangeTimeOffset(args.float()?),
            "change vertical scale" => {
                let channel = args.value::<Channel>()?;
                Command::ChangeVerticalScale(channel, args.float()?)
            }
            "change samples per read" => Command::ChangeSamplesPerRead(args.integer()?),
            "change sampling rate" => Command::ChangeSamplingRate(args.integer()?),
            "auto setup" => Command::AutoSetup,
            "exit" => Command::Exit,
            "set trigger source" => Command::SetTriggerSource(args.value()?),
            "set trigger level" => Command::SetTriggerLevel(args.float()?),
            "set trigger coupling" => Command::SetTriggerCoupling(args.value()?),
            "set trigger slope" => Command::SetTriggerSlope(args.value()?),
            "change trigger mode" => Command::ChangeTriggerMode(args.value()?),
            "read once" => Command::ReadOnce(args.value()?),
            "read trigger" => Command::ReadTrigger,
            _ => return Err(CommandError::Unknown(s.to_string())),
        };

        args.finish()?;
        Ok(command)
    }
}
