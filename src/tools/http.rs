//! Answer submission over HTTP POST.
//!
//! The submission response also drives the run forward: a returned `url`
//! moves the run to the next task page, and a rejected answer without one
//! opens the retry window on the current page.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

use super::{required_str, truncate, Tool, ToolContext};
use crate::agent::RunContext;

const MAX_RESPONSE_LEN: usize = 10_000;

fn build_headers(raw: &Value) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(map) = raw.as_object() {
        for (name, value) in map {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }
    }
    Ok(headers)
}

/// Update the run according to what the answer endpoint said.
pub(crate) async fn apply_submission_outcome(run: &RunContext, response: &Value) {
    let next_url = response
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty());

    let current = run.current_url().await;
    match next_url {
        Some(url) if url != current => run.advance_to(url).await,
        _ => {
            if response.get("correct").and_then(Value::as_bool) == Some(false) {
                tracing::info!(run_id = %run.run_id, url = %current, "Answer rejected, retry window opened");
                run.mark_retry().await;
            }
        }
    }
}

/// POST a JSON payload to an answer endpoint.
pub struct PostRequest;

#[async_trait]
impl Tool for PostRequest {
    fn name(&self) -> &str {
        "post_request"
    }

    fn description(&self) -> &str {
        "Send an HTTP POST with a JSON body, typically to submit an answer. Returns the status code and the server response. BASE64_KEY placeholders in the payload are replaced with the stored image data."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Endpoint to POST to, exactly as given by the task page"
                },
                "payload": {
                    "type": "object",
                    "description": "JSON body to send"
                },
                "headers": {
                    "type": "object",
                    "description": "Optional extra request headers"
                }
            },
            "required": ["url", "payload"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = required_str(&args, "url")?;
        let payload = match &args["payload"] {
            Value::Null => anyhow::bail!("Missing 'payload' argument"),
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            other => other.clone(),
        };
        let payload = ctx.run.base64().substitute(&payload).await;
        let headers = build_headers(&args["headers"])?;

        tracing::info!(url = %url, "Submitting answer");
        let response = ctx
            .http
            .post(url)
            .headers(headers)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        if let Some(value) = &parsed {
            apply_submission_outcome(&ctx.run, value).await;
        }

        tracing::info!(status = %status, response = %truncate(&body, 500), "Submission response");

        let response_field = parsed.unwrap_or(Value::String(body));
        let rendered = json!({
            "status": status.as_u16(),
            "response": response_field,
        })
        .to_string();
        Ok(truncate(&rendered, MAX_RESPONSE_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_router, tool_context, ScriptedClient};
    use axum::{routing::post, Json, Router};

    #[tokio::test]
    async fn next_url_advances_the_run() {
        let run = RunContext::start("http://x/q1").await;
        apply_submission_outcome(&run, &json!({"correct": true, "url": "http://x/q2"})).await;
        assert_eq!(run.current_url().await, "http://x/q2");
        assert!(run.timing().get("http://x/q2").await.is_some());
    }

    #[tokio::test]
    async fn rejection_without_url_opens_retry_window() {
        let run = RunContext::start("http://x/q1").await;
        apply_submission_outcome(&run, &json!({"correct": false, "reason": "nope"})).await;
        assert_eq!(run.current_url().await, "http://x/q1");
        assert!(run.offset().await.is_some());
    }

    #[tokio::test]
    async fn final_response_leaves_run_unchanged() {
        let run = RunContext::start("http://x/q1").await;
        apply_submission_outcome(&run, &json!({"correct": true, "url": null})).await;
        assert_eq!(run.current_url().await, "http://x/q1");
        assert_eq!(run.offset().await, None);
    }

    #[tokio::test]
    async fn posts_payload_with_substituted_placeholders() {
        let base = serve_router(Router::new().route(
            "/submit",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"echo": body, "correct": true, "url": "http://x/next"}))
            }),
        ))
        .await;
        let ctx = tool_context(ScriptedClient::new(vec![])).await;
        let key = ctx.ctx.run.base64().insert("SU1BR0U=".to_string()).await;

        let out = PostRequest
            .execute(
                json!({
                    "url": format!("{}/submit", base),
                    "payload": {"answer": key, "email": "a@b.c"}
                }),
                &ctx.ctx,
            )
            .await
            .unwrap();

        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["status"], 200);
        assert_eq!(parsed["response"]["echo"]["answer"], "SU1BR0U=");
        assert_eq!(ctx.ctx.run.current_url().await, "http://x/next");
    }

    #[test]
    fn headers_accept_non_string_values() {
        let headers = build_headers(&json!({"X-Attempt": 2, "X-Name": "a"})).unwrap();
        assert_eq!(headers["x-attempt"], "2");
        assert_eq!(headers["x-name"], "a");
    }
}
