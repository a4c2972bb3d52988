//! Image and audio helpers.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{required_str, resolve_path, Tool, ToolContext};
use crate::llm::{ContentPart, InputAudio, Message, MessageContent};

const TRANSCRIBE_PROMPT: &str =
    "Transcribe this audio verbatim. Reply with the transcription only, no commentary.";

/// Audio container format from the file extension, as the model API names it.
fn audio_format(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => Ok("mp3"),
        "wav" => Ok("wav"),
        "ogg" | "opus" => Ok("ogg"),
        "flac" => Ok("flac"),
        "m4a" | "aac" => Ok("aac"),
        other => anyhow::bail!("Unsupported audio format: '{}'", other),
    }
}

/// Extract text from an image with the `tesseract` CLI.
pub struct OcrImage;

#[async_trait]
impl Tool for OcrImage {
    fn name(&self) -> &str {
        "ocr_image_tool"
    }

    fn description(&self) -> &str {
        "Extract the text visible in an image file (OCR). Takes a path relative to the workspace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "Path to the image, relative to the workspace"
                }
            },
            "required": ["image_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = resolve_path(required_str(&args, "image_path")?, &ctx.workspace);
        if !path.is_file() {
            anyhow::bail!("Image not found: {}", path.display());
        }

        let output = Command::new("tesseract")
            .arg(&path)
            .arg("stdout")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run tesseract: {}", e))?;

        if !output.status.success() {
            anyhow::bail!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Transcribe an audio file by handing it to the model.
pub struct TranscribeAudio;

#[async_trait]
impl Tool for TranscribeAudio {
    fn name(&self) -> &str {
        "transcribe_audio"
    }

    fn description(&self) -> &str {
        "Transcribe speech in an audio file (mp3, wav, ogg, flac, m4a) to text. Takes a path relative to the workspace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the audio file, relative to the workspace"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = resolve_path(required_str(&args, "file_path")?, &ctx.workspace);
        let format = audio_format(&path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

        let request = vec![Message::User {
            content: MessageContent::Parts(vec![
                ContentPart::text(TRANSCRIBE_PROMPT),
                ContentPart::InputAudio {
                    input_audio: InputAudio {
                        data: B64.encode(&bytes),
                        format: format.to_string(),
                    },
                },
            ]),
        }];

        tracing::info!(path = %path.display(), bytes = bytes.len(), "Transcribing audio");
        ctx.limiter.acquire().await;
        let turn = ctx.llm.chat_completion(&ctx.model, &request, None).await?;
        let text = turn.flatten_text();
        if text.trim().is_empty() {
            anyhow::bail!("Transcription came back empty");
        }
        Ok(text.trim().to_string())
    }
}

/// Base64-encode an image, keeping the payload out of the conversation.
pub struct EncodeImageToBase64;

#[async_trait]
impl Tool for EncodeImageToBase64 {
    fn name(&self) -> &str {
        "encode_image_to_base64"
    }

    fn description(&self) -> &str {
        "Base64-encode an image file. Returns a placeholder of the form BASE64_KEY:<id>; put the placeholder in a post_request payload and it is replaced with the real base64 data when sent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "Path to the image, relative to the workspace"
                }
            },
            "required": ["image_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = resolve_path(required_str(&args, "image_path")?, &ctx.workspace);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

        let key = ctx.run.base64().insert(B64.encode(&bytes)).await;
        tracing::debug!(path = %path.display(), key = %key, "Stored base64 image");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::AssistantMessage;
    use crate::test_support::{tool_context, ScriptedClient};

    #[test]
    fn audio_formats_follow_extension() {
        assert_eq!(audio_format(Path::new("a.MP3")).unwrap(), "mp3");
        assert_eq!(audio_format(Path::new("dir/b.opus")).unwrap(), "ogg");
        assert!(audio_format(Path::new("c.txt")).is_err());
        assert!(audio_format(Path::new("noext")).is_err());
    }

    #[tokio::test]
    async fn encoded_image_is_stored_behind_placeholder() {
        let ctx = tool_context(ScriptedClient::new(vec![])).await;
        std::fs::write(ctx.ctx.workspace.join("img.png"), b"PNGDATA").unwrap();

        let key = EncodeImageToBase64
            .execute(json!({"image_path": "img.png"}), &ctx.ctx)
            .await
            .unwrap();

        assert!(key.starts_with("BASE64_KEY:"));
        assert_eq!(
            ctx.ctx.run.base64().get(&key).await.as_deref(),
            Some(B64.encode(b"PNGDATA").as_str())
        );
    }

    #[tokio::test]
    async fn transcription_sends_audio_part_to_model() {
        let client = ScriptedClient::new(vec![AssistantMessage::text("  the secret is 42  ")]);
        let ctx = tool_context(client.clone()).await;
        std::fs::write(ctx.ctx.workspace.join("clip.mp3"), b"ID3").unwrap();

        let text = TranscribeAudio
            .execute(json!({"file_path": "clip.mp3"}), &ctx.ctx)
            .await
            .unwrap();

        assert_eq!(text, "the secret is 42");
        let requests = client.requests();
        match &requests[0][0] {
            Message::User {
                content: MessageContent::Parts(parts),
            } => assert!(matches!(
                &parts[1],
                ContentPart::InputAudio { input_audio } if input_audio.format == "mp3"
            )),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_image_is_an_error() {
        let ctx = tool_context(ScriptedClient::new(vec![])).await;
        let result = OcrImage
            .execute(json!({"image_path": "nope.png"}), &ctx.ctx)
            .await;
        assert!(result.unwrap_err().to_string().contains("Image not found"));
    }
}
