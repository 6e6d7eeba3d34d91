// SPDX-License-Identifier: Apache-2.0

//! Structured status carried across the gate

use crate::message::{Error, Reader, Writer};

use alloc::string::{String, ToString};
use core::fmt;

/// Canonical status codes
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl From<i32> for Code {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }
}

/// A status code with a human readable message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    /// The status code
    pub code: Code,

    /// Details, empty for [`Code::Ok`]
    pub message: String,
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl Status {
    /// The OK status
    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
        }
    }

    /// Creates a status with the given code and message.
    pub fn new(code: Code, message: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    /// Whether this is [`Code::Ok`]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Appends the status to a message as `code: i32, message: str`.
    pub fn encode(&self, writer: &mut Writer) {
        writer.push(self.code as i32);
        writer.push_str(&self.message);
    }

    /// Reads a status previously written with [`Status::encode`].
    pub fn decode(reader: &mut Reader) -> Result<Self, Error> {
        let code = Code::from(reader.next::<i32>()?);
        let message = reader.next_string()?;
        Ok(Self { code, message })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message.is_empty() {
            true => write!(f, "{:?}", self.code),
            false => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        let status = Status::new(Code::FailedPrecondition, "fork is disabled");

        let mut writer = Writer::new();
        status.encode(&mut writer);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(Status::decode(&mut reader), Ok(status));
    }

    #[test]
    fn unknown_code() {
        assert_eq!(Code::from(99), Code::Unknown);
        assert_eq!(Code::from(-1), Code::Unknown);
        assert_eq!(Code::from(13), Code::Internal);
    }

    #[test]
    fn display() {
        assert_eq!(Status::ok().to_string(), "Ok");
        assert_eq!(
            Status::new(Code::NotFound, "no such selector").to_string(),
            "NotFound: no such selector"
        );
    }
}
