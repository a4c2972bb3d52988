//! Headless page rendering.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use regex::Regex;
use serde_json::{json, Value};
use url::Url;

use super::{required_str, Tool, ToolContext};

const MAX_HTML_LEN: usize = 300_000;
const SETTLE_DELAY: Duration = Duration::from_millis(400);

/// Absolute URLs of every `<img src>` in `html`, resolved against `base`.
pub(crate) fn extract_image_urls(html: &str, base: &str) -> Vec<String> {
    let pattern = match Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#) {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };
    let base = Url::parse(base).ok();

    pattern
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().trim())
        .filter(|src| !src.is_empty())
        .map(|src| match &base {
            Some(base) => base
                .join(src)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| src.to_string()),
            None => src.to_string(),
        })
        .collect()
}

fn truncate_html(html: String) -> String {
    if html.len() <= MAX_HTML_LEN {
        return html;
    }
    tracing::warn!(len = html.len(), "HTML too large, truncating");
    let mut end = MAX_HTML_LEN;
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [TRUNCATED DUE TO SIZE]", &html[..end])
}

/// Load `url` in a fresh headless Chromium and return the rendered DOM.
async fn render(url: &str) -> anyhow::Result<String> {
    // Separate profile per launch so concurrent renders don't fight over the lock.
    let mut profile_dir: PathBuf = std::env::temp_dir();
    profile_dir.push(format!(
        "taskchain-chromium-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    let config = BrowserConfig::builder()
        .user_data_dir(profile_dir.clone())
        .arg("--no-sandbox")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .build()
        .map_err(|e| anyhow::anyhow!(e))?;

    let (mut browser, mut handler) = Browser::launch(config).await?;
    let handler_task = tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });

    let result = async {
        let page = browser.new_page(url).await?;
        page.wait_for_navigation().await?;
        tokio::time::sleep(SETTLE_DELAY).await;
        let html = page.content().await?;
        anyhow::Ok(html)
    }
    .await;

    let _ = browser.close().await;
    let _ = browser.wait().await;
    handler_task.abort();
    let _ = tokio::fs::remove_dir_all(&profile_dir).await;

    result
}

/// Render a page with JavaScript executed.
pub struct RenderPage;

#[async_trait]
impl Tool for RenderPage {
    fn name(&self) -> &str {
        "get_rendered_html"
    }

    fn description(&self) -> &str {
        "Load a web page in a headless browser (JavaScript executed) and return JSON with the rendered HTML, the absolute URLs of its images, and the page URL."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The page to render"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        let url = required_str(&args, "url")?;
        tracing::info!(url = %url, "Fetching and rendering page");

        let html = render(url)
            .await
            .map_err(|e| anyhow::anyhow!("Error fetching/rendering page: {}", e))?;
        let images = extract_image_urls(&html, url);

        Ok(json!({
            "html": truncate_html(html),
            "images": images,
            "url": url,
        })
        .to_string())
    }
}
