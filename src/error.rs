//! Error types for the MIDI I/O engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A queued short message whose length disagrees with its status byte,
    /// or an empty message.
    #[error("invalid MIDI (or meta) message")]
    InvalidMessage,

    /// `queue_message` addressed a device that is not opened.
    #[error("device {0} is not opened")]
    DeviceNotOpened(i32),

    #[error("device open failed: {0}")]
    DeviceOpenFailed(String),

    #[error("MIDI backend error: {0}")]
    Backend(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

#[cfg(feature = "midir-backend")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::Backend(e.to_string())
    }
}

#[cfg(feature = "midir-backend")]
impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::DeviceOpenFailed(e.to_string())
    }
}

#[cfg(feature = "midir-backend")]
impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::DeviceOpenFailed(e.to_string())
    }
}

#[cfg(feature = "midir-backend")]
impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        Error::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
