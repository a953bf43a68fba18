use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::engine::CancelToken;
use crate::error::ToolError;
use crate::tool::{ExternalTool, Isolation, ToolInput, ToolReport};

/// How often a running child is checked for completion and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Command line of an external tool.
///
/// Arguments may contain placeholders which are filled in from the
/// [`ToolInput`]:
///
/// * `{input}` - the first input path,
/// * `{inputs}` - as a whole argument, expands to one argument per input,
/// * `{output}` - the output path,
/// * `{key}` - any extra value, such as `{banner}` or `{symbols}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn expand(&self, input: &ToolInput) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len());

        for arg in &self.args {
            if arg == "{inputs}" {
                args.extend(input.inputs.iter().map(ToString::to_string));
                continue;
            }

            let mut arg = arg.clone();
            if let Some(first) = input.inputs.first() {
                arg = arg.replace("{input}", first.as_str());
            }
            arg = arg.replace("{output}", input.output.as_str());
            for (key, value) in &input.extra {
                arg = arg.replace(&format!("{{{key}}}"), value);
            }
            args.push(arg);
        }

        args
    }
}

/// Runs a [`ToolCommand`] in a child process.
///
/// Lines the tool prints to stderr starting with `warning` are reported as
/// warnings. When the tool exits with a failure status, the remaining
/// stderr lines become its errors.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    command: ToolCommand,
    cwd: Utf8PathBuf,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, command: ToolCommand, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            command,
            cwd: cwd.into(),
        }
    }

    fn wait(&self, child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus, ToolError> {
        loop {
            if cancel.is_cancelled() {
                tracing::warn!("terminating {}", self.name);
                terminate(child);
                return Err(ToolError::new(&self.name).with_error("Cancelled"));
            }

            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    terminate(child);
                    return Err(ToolError::new(&self.name).with_error(e.to_string()));
                }
            }
        }
    }
}

impl ExternalTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn isolation(&self) -> Isolation {
        Isolation::Subprocess
    }

    fn run(&self, input: &ToolInput, cancel: &CancelToken) -> Result<ToolReport, ToolError> {
        let args = self.command.expand(input);
        tracing::debug!("{} {}", self.command.program, args.join(" "));

        let mut command = Command::new(&self.command.program);
        command
            .args(&args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Launchers like `npx` leave the real tool as a grandchild, a group
        // of its own lets cancellation reach all of them.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command
            .spawn()
            .map_err(|e| {
                ToolError::new(&self.name)
                    .with_error(format!("Couldn't start '{}': {e}", self.command.program))
            })?;

        // Drain both pipes so a chatty tool can't block on a full buffer.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        // On error the drains are left behind: a straggler still holding
        // the pipes must not keep the run waiting.
        let status = self.wait(&mut child, cancel)?;

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            tracing::debug!("{}: {}", self.name, line);
        }

        let mut warnings = Vec::new();
        let mut other = Vec::new();
        for line in stderr.lines().map(str::trim_end).filter(|line| !line.trim().is_empty()) {
            if line.trim_start().to_ascii_lowercase().starts_with("warning") {
                warnings.push(line.to_string());
            } else {
                other.push(line.to_string());
            }
        }

        if !status.success() {
            if other.is_empty() {
                other.push(format!("'{}' exited with {status}", self.command.program));
            }
            return Err(ToolError {
                tool: self.name.clone(),
                errors: other,
                warnings,
            });
        }

        for line in &other {
            tracing::debug!("{}: {}", self.name, line);
        }

        Ok(ToolReport {
            artifacts: vec![input.output.clone()],
            warnings,
        })
    }
}

/// Kills the child together with its process group, then reaps it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let signalled = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !signalled.is_ok_and(|status| status.success()) {
            tracing::debug!("couldn't signal process group {}", group);
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
