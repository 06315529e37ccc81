use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::{CommandConfig, GeneratorError, ProcessOutput};

/// Utility for spawning adapter processes
pub struct ProcessSpawner;

impl ProcessSpawner {
    /// Spawn a process and capture its output, honouring the configured timeout
    pub async fn spawn(
        binary: &Path,
        args: &[String],
        config: &CommandConfig,
    ) -> Result<ProcessOutput, GeneratorError> {
        let start = Instant::now();

        debug!(
            binary = %binary.display(),
            arg_count = args.len(),
            working_dir = %config.working_dir.display(),
            "Spawning adapter process"
        );

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .current_dir(&config.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdout_handle = child
            .stdout
            .take()
            .ok_or_else(|| GeneratorError::ExecutionFailed("stdout not captured".into()))?;
        let stderr_handle = child
            .stderr
            .take()
            .ok_or_else(|| GeneratorError::ExecutionFailed("stderr not captured".into()))?;

        let run = async {
            let (stdout, stderr) = tokio::try_join!(
                read_lines(stdout_handle, "stdout"),
                read_lines(stderr_handle, "stderr"),
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout, stderr, status))
        };

        let (stdout, stderr, status) = match config.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => return Err(GeneratorError::Timeout(limit)),
            },
            None => run.await?,
        };

        let duration = start.elapsed();
        let exit_code = status.code().unwrap_or(-1);

        debug!(
            exit_code,
            duration_ms = duration.as_millis(),
            "Adapter process completed"
        );

        Ok(ProcessOutput::new(stdout, stderr, exit_code, duration))
    }
}

async fn read_lines<R>(reader: R, stream: &'static str) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    while let Some(line) = lines.next_line().await? {
        trace!(stream, line = %line, "adapter output");
        if !collected.is_empty() {
            collected.push('\n');
        }
        collected.push_str(&line);
    }
    Ok(collected)
}
