// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::io;

use thiserror::Error;

/// The result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for archive operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The magic string or dialect was not recognized. Callers may try
    /// another format.
    #[error("file format not recognized")]
    WrongFormat,

    /// The format was recognized but the archive is internally inconsistent.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The end of the member chain was reached in the middle of a header.
    #[error("no more archived files")]
    NoMoreArchivedFiles,

    /// An operating system I/O failure.
    #[error("system call error: {0}")]
    SystemCall(#[from] io::Error),

    /// A recognized dialect that this crate does not implement.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(&'static str),

    /// The requested operation is not valid for the given members.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A value does not fit the fixed-width field it must be written to.
    #[error("archive member {0} is too big")]
    MemberTooBig(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Error {
        Error::MalformedArchive(msg.into())
    }

    /// Returns true for errors caused by the archive's contents rather than
    /// by the operating system.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedArchive(_))
    }
}
