//! Python code execution and dependency management via `uv`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{required_str, truncate, Tool, ToolContext};

const SCRIPT_NAME: &str = "runner.py";
const MAX_STREAM_LEN: usize = 10_000;

/// Strip a surrounding Markdown code fence, if any.
pub(crate) fn strip_code_fences(source: &str) -> String {
    let mut code = source.trim();
    if code.starts_with("```") {
        code = code.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }
    if code.ends_with("```") {
        code = code.rsplit_once('\n').map(|(body, _)| body).unwrap_or("");
    }
    code.trim().to_string()
}

/// Output of a finished subprocess.
struct ProcessOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

async fn run_process(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> anyhow::Result<ProcessOutput> {
    tokio::fs::create_dir_all(cwd).await?;

    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Command timed out after {} seconds", timeout.as_secs()))?
    .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", program, e))?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Run a Python script in the workspace.
pub struct RunCode;

#[async_trait]
impl Tool for RunCode {
    fn name(&self) -> &str {
        "run_code"
    }

    fn description(&self) -> &str {
        "Execute Python code in the workspace directory (files downloaded earlier are available there). Returns JSON with stdout, stderr and return_code. Print whatever you need to see."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Complete Python source to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let code = strip_code_fences(required_str(&args, "code")?);

        tokio::fs::create_dir_all(&ctx.workspace).await?;
        tokio::fs::write(ctx.workspace.join(SCRIPT_NAME), &code).await?;

        tracing::info!(bytes = code.len(), "Running code");
        let output = run_process("uv", &["run", SCRIPT_NAME], &ctx.workspace, ctx.code_timeout).await?;

        Ok(json!({
            "stdout": truncate(&output.stdout, MAX_STREAM_LEN),
            "stderr": truncate(&output.stderr, MAX_STREAM_LEN),
            "return_code": output.exit_code,
        })
        .to_string())
    }
}

/// Install Python packages for later `run_code` calls.
pub struct AddDependencies;

#[async_trait]
impl Tool for AddDependencies {
    fn name(&self) -> &str {
        "add_dependencies"
    }

    fn description(&self) -> &str {
        "Install Python packages so that later run_code calls can import them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dependencies": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Package names, optionally with version specifiers"
                }
            },
            "required": ["dependencies"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let deps: Vec<&str> = args["dependencies"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Missing 'dependencies' argument"))?
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if deps.is_empty() {
            anyhow::bail!("No dependencies given");
        }
        if let Some(bad) = deps.iter().find(|d| d.starts_with('-')) {
            anyhow::bail!("Invalid package name: {}", bad);
        }

        let mut cmd_args = vec!["pip", "install"];
        cmd_args.extend(deps.iter().copied());

        tracing::info!(packages = ?deps, "Installing dependencies");
        let output = run_process("uv", &cmd_args, &ctx.workspace, ctx.code_timeout).await?;

        let mut result = format!("Exit code: {}\n", output.exit_code);
        if !output.stdout.is_empty() {
            result.push_str("\n--- stdout ---\n");
            result.push_str(&output.stdout);
        }
        if !output.stderr.is_empty() {
            result.push_str("\n--- stderr ---\n");
            result.push_str(&output.stderr);
        }
        Ok(truncate(&result, MAX_STREAM_LEN))
    }
}
