use std::path::PathBuf;

use nom::error::{VerboseError, VerboseErrorKind};
use thiserror::Error;

/// All errors that this library can emit
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A structure in the file did not decode; the message is a context trace.
    #[error("malformed HDF5 file: {0}")]
    Parse(String),

    #[error("address {0:#x} points outside the file")]
    OutOfBounds(u64),

    #[error("no group named {0:?} in file")]
    MissingGroup(String),

    #[error("unsupported HDF5 feature: {0}")]
    Unsupported(String),

    #[error("cannot read the header of {}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
}

impl From<nom::Err<VerboseError<&[u8]>>> for Error {
    fn from(e: nom::Err<VerboseError<&[u8]>>) -> Self {
        match e {
            nom::Err::Incomplete(_) => Error::Parse(String::from("unexpected end of data")),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let trace = e
                    .errors
                    .iter()
                    .map(|(_, reason)| match reason {
                        VerboseErrorKind::Context(context) => context.to_string(),
                        VerboseErrorKind::Char(c) => format!("expected {:?}", c),
                        VerboseErrorKind::Nom(kind) => kind.description().to_string(),
                    })
                    .collect::<Vec<_>>();
                Error::Parse(trace.join(" in "))
            }
        }
    }
}
