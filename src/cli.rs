//! Command-line arguments

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing::warn;

use crate::query::{Filter, Mode};

/// Print, compare and filter the headers of HDF5 data files.
#[derive(Debug, Parser)]
#[command(name = "hdf-header", version)]
pub struct Cli {
    /// Directory the filename pattern is relative to. Defaults to the working directory.
    #[arg(
        short = 'd',
        long = "data_directory",
        alias = "data-directory",
        env = "HDF_HEADER_DATA_DIRECTORY",
        value_name = "DIR"
    )]
    pub data_directory: Option<PathBuf>,

    /// Filename or glob pattern of the files to read.
    #[arg(short, long, value_name = "PATTERN")]
    pub filename: String,

    /// Header keywords to compare across files. Matches any key containing a keyword.
    #[arg(
        short = 'k',
        long = "header_keywords",
        alias = "header-keywords",
        num_args = 0..,
        value_name = "KEYWORD"
    )]
    pub header_keywords: Vec<String>,

    /// Only list files with a matching KEY=VALUE entry.
    #[arg(short = 'F', long, value_name = "KEY=VALUE", conflicts_with = "header_keywords")]
    pub filter: Option<Filter>,

    /// Write the files matched by --filter to this file.
    #[arg(short, long, value_name = "FILE", requires = "filter")]
    pub outfile: Option<PathBuf>,

    /// Log more; repeat for more detail.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The data directory joined with the filename pattern
    pub fn pattern(&self) -> String {
        match &self.data_directory {
            Some(directory) => directory.join(&self.filename).to_string_lossy().into_owned(),
            None => self.filename.clone(),
        }
    }

    /// Expand the filename pattern
    pub fn files(&self) -> Result<Vec<PathBuf>, glob::PatternError> {
        Ok(expand(&self.pattern())?.collect())
    }

    pub fn mode(&self) -> Mode {
        match &self.filter {
            Some(filter) => Mode::Filter(filter.clone()),
            None if !self.header_keywords.is_empty() => Mode::Compare(self.header_keywords.clone()),
            None => Mode::FullHeader,
        }
    }
}

fn expand(pattern: &str) -> Result<impl Iterator<Item = PathBuf>, glob::PatternError> {
    Ok(glob::glob(pattern)?.filter_map(|entry| match entry {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(path = %e.path().display(), error = %e.error(), "skipping unreadable path");
            None
        }
    }))
}
