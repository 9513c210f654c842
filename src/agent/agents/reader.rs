//! URL-grounded agent: scrapes a page at construction and answers questions about it.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use tracing::info;

use crate::agent::agents::History;
use crate::agent::builder::{Agent, AgentFactory};
use crate::agent::session::{SessionId, SessionParams, URL_PARAM};
use crate::llm;

/// Max chars of page text kept as context.
const MAX_PAGE_CHARS: usize = 12_000;
const MAX_TOKENS: u32 = 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

static HIDDEN_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->")
        .expect("valid regex")
});
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Accept only absolute http(s) URLs with a host.
pub fn validate_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("invalid URL {:?}: {e}", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported URL scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("URL {:?} has no host", raw));
    }
    Ok(url)
}

/// Reduce an HTML document to its readable text.
pub fn extract_text(html: &str) -> String {
    let text = HIDDEN_BLOCKS.replace_all(html, " ");
    let text = TAGS.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().chars().take(MAX_PAGE_CHARS).collect()
}

async fn fetch_page_text(http: &reqwest::Client, url: &Url) -> Result<String, String> {
    if url.path().to_ascii_lowercase().ends_with(".pdf") {
        return Err("PDF documents are not supported".to_string());
    }

    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| format!("Failed to fetch {url}: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("Fetching {url} returned {status}"));
    }

    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_none_or(|ct| ct.contains("html"));

    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read {url}: {e}"))?;

    let text = if is_html {
        extract_text(&body)
    } else {
        body.chars().take(MAX_PAGE_CHARS).collect()
    };

    if text.trim().is_empty() {
        return Err(format!("No readable text at {url}"));
    }
    Ok(text)
}

pub struct ReaderAgent {
    llm: Arc<llm::Client>,
    url: Url,
    page: String,
    history: History,
}

impl ReaderAgent {
    fn system_prompt(&self) -> String {
        format!(
            "You answer questions about the web page at {}. Use only the page content below. \
             If the answer is not in the page, say so.\n\n<page>\n{}\n</page>",
            self.url, self.page
        )
    }
}

#[async_trait]
impl Agent for ReaderAgent {
    async fn process(&self, text: &str, session_id: &SessionId) -> Result<String, String> {
        let prompt = self.history.prompt(&self.system_prompt(), text);
        let reply = self
            .llm
            .complete(&prompt, MAX_TOKENS)
            .await
            .map_err(|e| e.to_string())?;
        info!("📖 [{}] reader replied ({} chars)", session_id, reply.len());
        self.history.record(text, &reply);
        Ok(reply)
    }
}

pub struct ReaderFactory {
    llm: Arc<llm::Client>,
    http: reqwest::Client,
}

impl ReaderFactory {
    pub fn new(llm: Arc<llm::Client>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("botify/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { llm, http }
    }
}

#[async_trait]
impl AgentFactory for ReaderFactory {
    async fn create(&self, params: &SessionParams) -> Result<Arc<dyn Agent>, String> {
        let raw = params
            .get(URL_PARAM)
            .ok_or_else(|| "missing url".to_string())?;
        let url = validate_url(raw)?;

        info!("🌐 Scraping {}", url);
        let page = fetch_page_text(&self.http, &url).await?;
        info!("🌐 Scraped {} chars from {}", page.len(), url);

        Ok(Arc::new(ReaderAgent {
            llm: self.llm.clone(),
            url,
            page,
            history: History::default(),
        }))
    }
}
