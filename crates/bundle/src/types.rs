//! Bundle layout types

use std::path::PathBuf;

/// File extension of an episode archive (deflated zip)
pub const ARCHIVE_EXTENSION: &str = "zip";

const STEP_PREFIX: &str = "step_";
const STEP_SUFFIX: &str = ".json";

/// Result of materializing one episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeBundle {
    /// Experiment directory name
    pub experiment: String,
    /// Episode directory name
    pub episode: String,
    /// Number of `step_*.json` files written
    pub step_count: usize,
    /// `{run_root}/{experiment}/{episode}`
    pub directory: PathBuf,
    /// `{run_root}/{experiment}/{episode}.zip`
    pub archive: PathBuf,
}

/// File name of the step at `rank`.
pub fn step_file_name(rank: usize) -> String {
    format!("{}{}{}", STEP_PREFIX, rank, STEP_SUFFIX)
}

/// Inverse of [`step_file_name`].
pub fn parse_step_rank(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(STEP_PREFIX)?
        .strip_suffix(STEP_SUFFIX)?
        .parse()
        .ok()
}
