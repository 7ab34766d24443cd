//! Episode bundles
//!
//! Turns one completed episode span plus the flat span log into a
//! self-contained export:
//!
//! ```text
//! {run_root}/{experiment}/
//! ├── {episode}/
//! │   ├── step_0.json
//! │   ├── step_1.json
//! │   └── ...
//! └── {episode}.zip     # rooted at {episode}/
//! ```
//!
//! Step files are ranked by ascending `start_time`; spans with no start time
//! sort first. Re-materializing the same (experiment, episode) pair
//! overwrites the files in place, and the archive is written
//! deterministically so an unchanged log yields identical bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod archive;
mod index;
mod materializer;
mod reader;
mod types;

pub use archive::{archive_path_for, write_dir_archive, DEFAULT_DEFLATE_LEVEL};
pub use index::SpanIndex;
pub use materializer::{EpisodeBundler, Materializer};
pub use reader::EpisodeArchiveReader;
pub use types::{parse_step_rank, step_file_name, EpisodeBundle, ARCHIVE_EXTENSION};
