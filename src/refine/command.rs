use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::RefinerConfig;
use crate::error::{Result, RefineError};
use crate::glossary::Glossary;
use crate::pairs::SubtitlePair;
use super::{RefineRequest, Refinement, Refiner, response};

/// An external program invocation that exchanges text over stdin/stdout
#[derive(Debug, Clone)]
pub struct RefinerCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    pub timeout: Duration,
}

impl RefinerCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command with `input` on stdin and return its stdout
    pub async fn execute_with_input(&self, input: &str) -> Result<String> {
        debug!("Executing refiner command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let mut child = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RefineError::Refiner(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        // feed stdin from a separate task so a chatty child cannot fill its
        // stdout pipe while we are still writing
        let stdin = child.stdin.take();
        let input = input.to_owned();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                RefineError::Refiner(format!(
                    "{} timed out after {}s",
                    self.description,
                    self.timeout.as_secs()
                ))
            })??;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Refiner closed stdin early: {}", e),
            Err(e) => debug!("Stdin writer task failed: {}", e),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RefineError::Refiner(format!(
                "{} failed ({}): {}",
                self.description,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| RefineError::Refiner(format!("{} wrote invalid UTF-8: {}", self.description, e)))
    }
}

/// Refiner backed by an external program, one invocation per batch
pub struct CommandRefiner {
    config: RefinerConfig,
}

impl CommandRefiner {
    pub fn new(config: RefinerConfig) -> Self {
        Self { config }
    }

    fn command(&self, batch_len: usize) -> RefinerCommand {
        RefinerCommand::new(
            self.config.command.clone(),
            format!("Refine batch of {} pairs", batch_len),
        )
        .args(self.config.args.iter().cloned())
        .timeout(Duration::from_secs(self.config.timeout_secs))
    }
}

#[async_trait]
impl Refiner for CommandRefiner {
    async fn refine_batch(&self, batch: &[SubtitlePair], glossary: &Glossary) -> Result<Refinement> {
        let request = RefineRequest::new(self.config.format, batch, glossary)?;
        let payload = serde_json::to_string(&request)?;

        let raw = self.command(batch.len()).execute_with_input(&payload).await?;
        debug!("Raw refiner response ({} bytes)", raw.len());

        response::parse_response(&raw, self.config.format, batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_returned() {
        let output = RefinerCommand::new("cat", "echo stdin")
            .execute_with_input("hello")
            .await
            .unwrap();
        assert_eq!(output, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_refiner_error() {
        let err = RefinerCommand::new("sh", "failing refiner")
            .args(["-c", "echo broken >&2; exit 3"])
            .execute_with_input("")
            .await
            .unwrap_err();

        match err {
            RefineError::Refiner(message) => assert!(message.contains("broken")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_refiner_error() {
        let err = RefinerCommand::new("subrefine-no-such-binary", "missing")
            .execute_with_input("{}")
            .await
            .unwrap_err();
        assert!(matches!(err, RefineError::Refiner(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_refiner_parses_reply() {
        let reply = r#"[{"id": 7, "eng": "Fixed.", "chinese": "修好了。"}]"#;
        let config = RefinerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), format!("cat > /dev/null; echo '{}'", reply)],
            ..RefinerConfig::default()
        };

        let refiner = CommandRefiner::new(config);
        let batch = vec![SubtitlePair::new(7, "Fixd.", "修好了。")];
        let refinement = refiner.refine_batch(&batch, &Glossary::new()).await.unwrap();
        assert_eq!(refinement.pairs, vec![SubtitlePair::new(7, "Fixed.", "修好了。")]);
    }
}
