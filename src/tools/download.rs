//! File download into the workspace.

use std::path::{Component, Path};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use super::{required_str, Tool, ToolContext};

/// Reject names that would land outside the workspace.
fn validate_filename(name: &str) -> anyhow::Result<()> {
    let path = Path::new(name);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.trim().is_empty() || escapes {
        anyhow::bail!("Invalid filename: {}", name);
    }
    Ok(())
}

/// Download a URL to a file in the workspace.
pub struct DownloadFile;

#[async_trait]
impl Tool for DownloadFile {
    fn name(&self) -> &str {
        "download_file"
    }

    fn description(&self) -> &str {
        "Download a file from a URL and save it in the workspace under the given filename. Returns the filename, which run_code and the media tools can then open."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Direct URL to the file"
                },
                "filename": {
                    "type": "string",
                    "description": "Name to save the file as, relative to the workspace"
                }
            },
            "required": ["url", "filename"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = required_str(&args, "url")?;
        let filename = required_str(&args, "filename")?;
        validate_filename(filename)?;

        let response = ctx.http.get(url).send().await?.error_for_status()?;

        let target = ctx.workspace.join(filename);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        tracing::info!(url = %url, path = %target.display(), bytes = written, "Downloaded file");
        Ok(filename.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_router, tool_context, ScriptedClient};
    use axum::{routing::get, Router};

    #[test]
    fn filenames_cannot_escape_workspace() {
        assert!(validate_filename("data.csv").is_ok());
        assert!(validate_filename("sub/data.csv").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("/etc/passwd").is_err());
        assert!(validate_filename("  ").is_err());
    }

    #[tokio::test]
    async fn downloads_into_workspace() {
        let base = serve_router(Router::new().route("/data.csv", get(|| async { "a,b\n1,2\n" }))).await;
        let ctx = tool_context(ScriptedClient::new(vec![])).await;

        let out = DownloadFile
            .execute(
                json!({"url": format!("{}/data.csv", base), "filename": "data.csv"}),
                &ctx.ctx,
            )
            .await
            .unwrap();

        assert_eq!(out, "data.csv");
        let saved = std::fs::read_to_string(ctx.ctx.workspace.join("data.csv")).unwrap();
        assert_eq!(saved, "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn http_errors_are_reported() {
        let base = serve_router(Router::new()).await;
        let ctx = tool_context(ScriptedClient::new(vec![])).await;
        let result = DownloadFile
            .execute(
                json!({"url": format!("{}/missing", base), "filename": "x.bin"}),
                &ctx.ctx,
            )
            .await;
        assert!(result.is_err());
    }
}
