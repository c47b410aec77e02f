//! This is the module that contains the error types used across the
//! crate.
//!
//! There are five main types:
//! * [`MsgError`] - an arbitrary message carrier used by the other
//!   error types.
//! * [`SerError`] - error while serializing a frame layer.
//! * [`DeError`] - error while deserializing a frame layer.
//! * [`ConfigError`] - a malformed or inconsistent parameter record
//!   encountered at load time.
//! * [`SimError`] - the engine level umbrella covering configuration,
//!   missing resources, I/O, and runtime invariant violations.
//!
//! # Design decisions
//! All errors implement [`std::error::Error`] in an attempt to allow
//! them to be used in conjunction with [`Result`] for easier error
//! management even at the level of per-event failures. Loader errors
//! name the offending record so that the run aborts with a message a
//! user can act on.

use std::{
    error::Error,
    fmt::{self, Debug, Display},
    io,
};

/// An arbitrary error message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgError(String);

impl MsgError {
    /// Create a new arbitrary error message.
    pub fn new<D>(msg: D) -> Self
    where
        D: Display,
    {
        MsgError(msg.to_string())
    }
}

impl Display for MsgError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for MsgError {}

/// Serialization error.
#[derive(Debug)]
pub enum SerError {
    /// Abitrary error message.
    Msg(MsgError),
    /// The end of the buffer was reached before serialization finished.
    UnexpectedEob,
    /// An underlying I/O error while writing to the buffer.
    Io(io::Error),
}

impl SerError {
    /// Create a new serialization error with an arbitrary message.
    pub fn new<D>(msg: D) -> Self
    where
        D: Display,
    {
        SerError::Msg(MsgError::new(msg))
    }
}

impl Display for SerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SerError::Msg(m) => write!(f, "{m}"),
            SerError::UnexpectedEob => {
                write!(f, "The buffer was too small for the requested serialization")
            }
            SerError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for SerError {}

impl From<io::Error> for SerError {
    fn from(e: io::Error) -> Self {
        SerError::Io(e)
    }
}

/// Deserialization error.
#[derive(Debug)]
pub enum DeError {
    /// Abitrary error message.
    Msg(MsgError),
    /// The buffer ended before the named type was fully parsed.
    IncompleteType(&'static str),
    /// Data remained in the buffer after the named type was parsed.
    DataLeftInBuffer(&'static str),
    /// A parsed value was outside of the range valid for its field.
    InvalidValue(MsgError),
}

impl DeError {
    /// Create a new deserialization error with an arbitrary message.
    pub fn new<D>(msg: D) -> Self
    where
        D: Display,
    {
        DeError::Msg(MsgError::new(msg))
    }

    /// Create an error reporting a truncated buffer for the named
    /// type.
    pub fn incomplete_type(name: &'static str) -> Self {
        DeError::IncompleteType(name)
    }

    /// Create an error reporting a value outside of the valid range
    /// for its field.
    pub fn invalid_value<D>(msg: D) -> Self
    where
        D: Display,
    {
        DeError::InvalidValue(MsgError::new(msg))
    }
}

impl Display for DeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeError::Msg(m) => write!(f, "{m}"),
            DeError::IncompleteType(name) => {
                write!(f, "The buffer ended before {name} was fully parsed")
            }
            DeError::DataLeftInBuffer(name) => {
                write!(f, "Data was left in the buffer after parsing {name}")
            }
            DeError::InvalidValue(m) => write!(f, "{m}"),
        }
    }
}

impl Error for DeError {}

/// A malformed or inconsistent parameter record encountered while
/// loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A record could not be parsed; carries the file label, the line
    /// number, and a description of what went wrong.
    MalformedRecord {
        /// Label of the file the record came from.
        file: String,
        /// 1-indexed line number of the offending record.
        line: usize,
        /// What was wrong with it.
        detail: String,
    },
    /// A distribution had no entries.
    EmptyDistribution(MsgError),
    /// A distribution's probabilities could not be normalized.
    BadProbability(MsgError),
    /// A MAC policy value outside of 0..=3.
    BadMacPolicy(u8),
    /// A model referenced by the scenario has no hardware record.
    UnknownModel(String),
    /// A vendor referenced by the scenario has no OUI entry.
    UnknownVendor(String),
    /// A model has no behavior row for one of the three phases.
    MissingBehavior {
        /// The model missing a row.
        model: String,
        /// The phase with no behavior record.
        phase: u8,
    },
    /// A channel outside of 1..=14.
    BadChannel(u8),
}

impl ConfigError {
    /// Create an error naming an offending record.
    pub fn record<F, D>(file: F, line: usize, detail: D) -> Self
    where
        F: Display,
        D: Display,
    {
        ConfigError::MalformedRecord {
            file: file.to_string(),
            line,
            detail: detail.to_string(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::MalformedRecord { file, line, detail } => {
                write!(f, "{file}:{line}: malformed record: {detail}")
            }
            ConfigError::EmptyDistribution(m) => {
                write!(f, "Distribution has no entries: {m}")
            }
            ConfigError::BadProbability(m) => {
                write!(f, "Distribution cannot be normalized: {m}")
            }
            ConfigError::BadMacPolicy(v) => {
                write!(f, "MAC policy {v} is outside of the valid range 0..=3")
            }
            ConfigError::UnknownModel(m) => write!(f, "No hardware record for model {m}"),
            ConfigError::UnknownVendor(v) => write!(f, "No OUI entry for vendor {v}"),
            ConfigError::MissingBehavior { model, phase } => {
                write!(f, "Model {model} has no behavior record for phase {phase}")
            }
            ConfigError::BadChannel(c) => {
                write!(f, "Channel {c} is outside of the valid range 1..=14")
            }
        }
    }
}

impl Error for ConfigError {}

/// The engine level error covering everything that can end a run.
#[derive(Debug)]
pub enum SimError {
    /// A configuration record was invalid.
    Config(ConfigError),
    /// A required input file was absent.
    MissingResource(MsgError),
    /// The capture or log writer rejected a write.
    Io(io::Error),
    /// A runtime invariant was violated; this is a bug in the caller
    /// or in the engine itself.
    Invariant(MsgError),
    /// A frame layer failed to serialize.
    Ser(SerError),
    /// A frame layer failed to reparse during a QA sample.
    De(DeError),
}

impl SimError {
    /// Create an error for an absent input file.
    pub fn missing_resource<D>(msg: D) -> Self
    where
        D: Display,
    {
        SimError::MissingResource(MsgError::new(msg))
    }

    /// Create an error for a violated runtime invariant.
    pub fn invariant<D>(msg: D) -> Self
    where
        D: Display,
    {
        SimError::Invariant(MsgError::new(msg))
    }
}

impl Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::Config(e) => write!(f, "{e}"),
            SimError::MissingResource(m) => write!(f, "Missing resource: {m}"),
            SimError::Io(e) => write!(f, "{e}"),
            SimError::Invariant(m) => write!(f, "Invariant violated: {m}"),
            SimError::Ser(e) => write!(f, "{e}"),
            SimError::De(e) => write!(f, "{e}"),
        }
    }
}

impl Error for SimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SimError::Config(e) => Some(e),
            SimError::Io(e) => Some(e),
            SimError::Ser(e) => Some(e),
            SimError::De(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        SimError::Config(e)
    }
}

impl From<io::Error> for SimError {
    fn from(e: io::Error) -> Self {
        SimError::Io(e)
    }
}

impl From<SerError> for SimError {
    fn from(e: SerError) -> Self {
        SimError::Ser(e)
    }
}

impl From<DeError> for SimError {
    fn from(e: DeError) -> Self {
        SimError::De(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_error_names_the_line() {
        let e = ConfigError::record("hardware.txt", 12, "expected 9 fields, found 4");
        assert_eq!(
            e.to_string(),
            "hardware.txt:12: malformed record: expected 9 fields, found 4"
        );
    }

    #[test]
    fn test_sim_error_from_config() {
        let e = SimError::from(ConfigError::BadMacPolicy(7));
        assert!(matches!(e, SimError::Config(ConfigError::BadMacPolicy(7))));
    }
}
