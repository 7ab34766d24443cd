//! Episode materialization
//!
//! Given one completed episode span, rebuild its descendant step spans from
//! the span log and write the episode bundle.
//!
//! ```text
//! materialize(episode):
//!   1. episode / experiment names from the span's attributes
//!   2. scan_all() and index by (trace_id, span_id)
//!   3. keep Step spans whose parent chain reaches the episode
//!   4. stable sort by start_time (None first)
//!   5. write {run_root}/{experiment}/{episode}/step_{rank}.json
//!   6. archive the directory into {episode}.zip
//! ```

use crate::archive::{write_dir_archive, DEFAULT_DEFLATE_LEVEL};
use crate::index::SpanIndex;
use crate::types::{step_file_name, EpisodeBundle};
use agenttrace_core::{Error, Result, ScopeKind, SpanRecord};
use agenttrace_durability::SpanStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Something that can turn a completed episode span into a bundle.
///
/// The export sink runs implementations on its background worker.
pub trait Materializer: Send + Sync {
    /// Materialize `episode` and describe what was written.
    fn materialize(&self, episode: &SpanRecord) -> Result<EpisodeBundle>;
}

impl<F> Materializer for F
where
    F: Fn(&SpanRecord) -> Result<EpisodeBundle> + Send + Sync,
{
    fn materialize(&self, episode: &SpanRecord) -> Result<EpisodeBundle> {
        self(episode)
    }
}

/// Writes episode bundles under a run root from a [`SpanStore`]
pub struct EpisodeBundler {
    run_root: PathBuf,
    store: Arc<SpanStore>,
    compression_level: i64,
}

impl EpisodeBundler {
    /// Bundle episodes from `store` under the store's run directory.
    pub fn new(store: Arc<SpanStore>) -> Self {
        let run_root = store.run_dir().to_path_buf();
        Self::with_run_root(store, run_root)
    }

    /// Bundle episodes from `store` under an explicit root.
    pub fn with_run_root(store: Arc<SpanStore>, run_root: impl Into<PathBuf>) -> Self {
        EpisodeBundler {
            run_root: run_root.into(),
            store,
            compression_level: DEFAULT_DEFLATE_LEVEL,
        }
    }

    /// Override the deflate level used for archives.
    pub fn compression_level(mut self, level: i64) -> Self {
        self.compression_level = level;
        self
    }

    /// Root directory bundles are written under.
    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// Descendant step spans of `episode`, in bundle order.
    ///
    /// Ties on `start_time` keep log order.
    pub fn collect_steps(&self, episode: &SpanRecord) -> Result<Vec<SpanRecord>> {
        let records = self.store.scan_all()?;
        let index = SpanIndex::new(&records);

        let mut steps = Vec::new();
        for record in &records {
            if record.is_scope(ScopeKind::Step)
                && index.is_descendant(record, episode.trace_id, episode.span_id)?
            {
                steps.push(record.clone());
            }
        }
        steps.sort_by_key(|step| step.start_time);
        Ok(steps)
    }
}

impl Materializer for EpisodeBundler {
    fn materialize(&self, episode: &SpanRecord) -> Result<EpisodeBundle> {
        let episode_name = episode.scope_name().to_string();
        let experiment_name = episode.experiment_name().to_string();
        check_component(&episode_name, &episode_name)?;
        check_component(&experiment_name, &episode_name)?;

        let steps = self.collect_steps(episode)?;

        let directory = self.run_root.join(&experiment_name).join(&episode_name);
        fs::create_dir_all(&directory)?;
        for (rank, step) in steps.iter().enumerate() {
            let json = serde_json::to_vec_pretty(step)?;
            fs::write(directory.join(step_file_name(rank)), json)?;
        }
        debug!(
            "Wrote {} step files to {}",
            steps.len(),
            directory.display()
        );

        let archive = write_dir_archive(&directory, self.compression_level)?;
        info!(
            experiment = %experiment_name,
            episode = %episode_name,
            steps = steps.len(),
            "Materialized episode bundle {}",
            archive.display()
        );

        Ok(EpisodeBundle {
            experiment: experiment_name,
            episode: episode_name,
            step_count: steps.len(),
            directory,
            archive,
        })
    }
}

/// Names become directory components; refuse anything that would leave the
/// run root or collapse into its parent.
fn check_component(name: &str, episode: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(Error::Materialization {
            episode: episode.to_string(),
            reason: format!("'{}' is not a usable directory name", name),
        });
    }
    Ok(())
}
