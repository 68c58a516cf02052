//! Shell command template transport.
//!
//! The template is a single command line with `[ApiKey]`, `[NetworkType]` and
//! `[NetworkAddress]` filled in when the destination is loaded and
//! `[FilePath]` filled in per delivery. Any output on stderr counts as failure.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::deliverable::DeliverableFile;
use crate::destination::DestinationIdentity;
use crate::error::{DispatchError, Result};
use crate::transport::Transport;

/// Pause after each command run. Back-to-back connections upset some devices.
pub const COMMAND_SETTLE_DELAY: Duration = Duration::from_millis(500);

const SILENT_FLAG: &str = "-sS";
const TRANSFER_TOOL: &str = "curl";

/// Runs a templated upload command as a child process.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    command: Option<String>,
    settle: Duration,
    dry_run: bool,
}

impl CommandTransport {
    /// Fill the load-time placeholders of `template` for `identity`.
    ///
    /// A missing template yields a transport whose every transfer fails.
    pub fn from_template(template: Option<&str>, identity: &DestinationIdentity) -> Self {
        let command = template.map(|t| {
            ensure_silent_flag(
                &t.trim()
                    .replace("[ApiKey]", &identity.credential)
                    .replace("[NetworkType]", &identity.protocol)
                    .replace("[NetworkAddress]", &identity.address),
            )
        });

        Self {
            command,
            settle: COMMAND_SETTLE_DELAY,
            dry_run: false,
        }
    }

    /// Override the settle delay.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Log the command instead of running it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Command with load-time placeholders filled, if a template was found.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Command line for one file.
    pub fn command_for(&self, file: &DeliverableFile) -> Option<String> {
        self.command
            .as_ref()
            .map(|c| c.replace("[FilePath]", &file.path().to_string_lossy()))
    }
}

/// Append the transfer tool's silent flag if the command invokes it without one.
/// Applying this twice yields the same command.
pub fn ensure_silent_flag(command: &str) -> String {
    if command.to_ascii_lowercase().contains(TRANSFER_TOOL) && !command.contains(SILENT_FLAG) {
        format!("{} {}", command, SILENT_FLAG)
    } else {
        command.to_string()
    }
}

fn shell_command(line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/C").arg(line);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
}

#[async_trait]
impl Transport for CommandTransport {
    fn kind(&self) -> &'static str {
        "command"
    }

    fn settle_delay(&self) -> Duration {
        self.settle
    }

    async fn transfer(&self, target: &DestinationIdentity, file: &DeliverableFile) -> Result<()> {
        let Some(line) = self.command_for(file) else {
            return Err(DispatchError::TransferFailed {
                address: target.address.clone(),
                reason: format!("no upload command template for {}", target.protocol),
            });
        };

        tracing::info!("Sending to: {} Using:\n{}", target.address, line);

        if self.dry_run {
            tracing::info!("DEBUG send disabled for {}", target.address);
            return Ok(());
        }

        let output = shell_command(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        tracing::info!("{} STDOUT: {}", target.address, stdout.trim_end());
        if !stderr.trim().is_empty() {
            tracing::warn!("{} STDERR: {}", target.address, stderr.trim_end());
            return Err(DispatchError::TransferFailed {
                address: target.address.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DestinationIdentity {
        DestinationIdentity {
            class: "Ender3".to_string(),
            address: "printer.lan".to_string(),
            credential: "12345abc".to_string(),
            protocol: "octoprint".to_string(),
        }
    }

    #[test]
    fn test_silent_flag_appended_once() {
        let cmd = "curl -F \"file=@[FilePath]\" \"http://host/api/files/local\"";
        let once = ensure_silent_flag(cmd);
        assert!(once.ends_with(" -sS"));
        assert_eq!(once.matches("-sS").count(), 1);

        let twice = ensure_silent_flag(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_silent_flag_case_insensitive_tool_match() {
        let cmd = "CURL.EXE -F \"file=@x\" http://host";
        assert!(ensure_silent_flag(cmd).ends_with("-sS"));
    }

    #[test]
    fn test_silent_flag_left_alone_for_other_tools() {
        let cmd = "scp [FilePath] printer:/gcodes/";
        assert_eq!(ensure_silent_flag(cmd), cmd);
    }

    #[test]
    fn test_silent_flag_already_present() {
        let cmd = "curl -sS -F \"file=@x\" http://host";
        assert_eq!(ensure_silent_flag(cmd), cmd);
    }

    #[test]
    fn test_load_time_placeholders() {
        let template = "curl -k -H \"X-Api-Key: [ApiKey]\" -F \"file=@[FilePath]\" \"http://[NetworkAddress]/api/files/local\" # [NetworkType]";
        let transport = CommandTransport::from_template(Some(template), &identity());
        let command = transport.command().unwrap();

        assert!(command.contains("X-Api-Key: 12345abc"));
        assert!(command.contains("http://printer.lan/api/files/local"));
        assert!(command.contains("# octoprint"));
        assert!(command.contains("[FilePath]"));
        assert!(command.ends_with(" -sS"));
    }

    #[tokio::test]
    async fn test_file_path_substituted_per_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        std::fs::write(&path, b"G28\n").unwrap();
        let file = DeliverableFile::open(&path).unwrap();

        let transport = CommandTransport::from_template(Some("echo [FilePath]"), &identity());
        let line = transport.command_for(&file).unwrap();
        assert_eq!(line, format!("echo {}", path.display()));
    }

    #[tokio::test]
    async fn test_missing_template_fails_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        std::fs::write(&path, b"G28\n").unwrap();
        let file = DeliverableFile::open(&path).unwrap();

        let transport = CommandTransport::from_template(None, &identity());
        let err = transport.transfer(&identity(), &file).await.unwrap_err();
        assert!(matches!(err, DispatchError::TransferFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_only_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        std::fs::write(&path, b"G28\n").unwrap();
        let file = DeliverableFile::open(&path).unwrap();

        let transport = CommandTransport::from_template(Some("echo uploaded [FilePath]"), &identity());
        transport.transfer(&identity(), &file).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        std::fs::write(&path, b"G28\n").unwrap();
        let file = DeliverableFile::open(&path).unwrap();

        let transport =
            CommandTransport::from_template(Some("echo refused 1>&2"), &identity());
        let err = transport.transfer(&identity(), &file).await.unwrap_err();
        match err {
            DispatchError::TransferFailed { address, reason } => {
                assert_eq!(address, "printer.lan");
                assert_eq!(reason, "refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_skips_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        std::fs::write(&path, b"G28\n").unwrap();
        let file = DeliverableFile::open(&path).unwrap();

        let transport = CommandTransport::from_template(Some("false 1>&2; echo x 1>&2"), &identity())
            .dry_run(true);
        transport.transfer(&identity(), &file).await.unwrap();
    }
}
