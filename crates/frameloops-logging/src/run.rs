use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Each line type in the run JSONL file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunLine {
    RunStart {
        timestamp: DateTime<Utc>,
        frame_ids: Vec<String>,
        target_score: f64,
        max_iterations: usize,
        max_attempts_per_unit: usize,
        generator: String,
        evaluator: String,
    },
    Iteration {
        iteration: usize,
        avg_score: f64,
        avg_continuity: f64,
        min_score: f64,
        units_above_threshold: usize,
        units_evaluated: usize,
        units_failed: usize,
        continuity_breaks: usize,
        timestamp: DateTime<Utc>,
    },
    RunEnd {
        stop_reason: String,
        iterations: usize,
        duration_secs: f64,
        /// Per-frame summaries, as produced by the engine
        frames: Vec<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
}

/// Writes a run record as JSONL, by default under
/// `<data_dir>/frameloops/runs/`.
pub struct RunWriter {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RunWriter {
    /// Create a writer in the default runs directory. The file name is the
    /// current UTC timestamp plus a short hash of the frame ids, with a
    /// counter suffix when that name is already taken.
    pub fn new(frame_ids: &[String]) -> io::Result<Self> {
        Self::in_dir(&Self::runs_dir()?, frame_ids)
    }

    pub fn in_dir(dir: &Path, frame_ids: &[String]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let timestamp_str = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();

        let mut hasher = Sha256::new();
        for id in frame_ids {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        let hash = hex::encode(hasher.finalize());
        let short_hash = &hash[..6];

        let mut suffix = 0;
        loop {
            let name = if suffix == 0 {
                format!("{}_{}.jsonl", timestamp_str, short_hash)
            } else {
                format!("{}_{}_{}.jsonl", timestamp_str, short_hash, suffix)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        file: Mutex::new(BufWriter::new(file)),
                        path,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_start(
        &self,
        frame_ids: &[String],
        target_score: f64,
        max_iterations: usize,
        max_attempts_per_unit: usize,
        generator: &str,
        evaluator: &str,
    ) {
        self.write_line(&RunLine::RunStart {
            timestamp: Utc::now(),
            frame_ids: frame_ids.to_vec(),
            target_score,
            max_iterations,
            max_attempts_per_unit,
            generator: generator.to_string(),
            evaluator: evaluator.to_string(),
        });
    }

    /// Write one iteration's batch metrics. Takes plain fields so this crate
    /// stays independent of the engine's types.
    #[allow(clippy::too_many_arguments)]
    pub fn write_iteration(
        &self,
        iteration: usize,
        avg_score: f64,
        avg_continuity: f64,
        min_score: f64,
        units_above_threshold: usize,
        units_evaluated: usize,
        units_failed: usize,
        continuity_breaks: usize,
    ) {
        self.write_line(&RunLine::Iteration {
            iteration,
            avg_score,
            avg_continuity,
            min_score,
            units_above_threshold,
            units_evaluated,
            units_failed,
            continuity_breaks,
            timestamp: Utc::now(),
        });
    }

    pub fn write_end<T: Serialize>(
        &self,
        stop_reason: &str,
        iterations: usize,
        duration_secs: f64,
        frames: &[T],
    ) {
        let frames = frames
            .iter()
            .filter_map(|frame| serde_json::to_value(frame).ok())
            .collect();
        self.write_line(&RunLine::RunEnd {
            stop_reason: stop_reason.to_string(),
            iterations,
            duration_secs,
            frames,
            timestamp: Utc::now(),
        });
    }

    fn write_line(&self, line: &RunLine) {
        if let Ok(json) = serde_json::to_string(line) {
            if let Ok(mut writer) = self.file.lock() {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }

    fn runs_dir() -> io::Result<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine data directory",
            )
        })?;
        Ok(data_dir.join("frameloops").join("runs"))
    }
}
