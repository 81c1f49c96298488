//! Web search tool backed by DuckDuckGo's HTML endpoint.

use crate::llm::schema::ToolDefinition;
use crate::tools::Tool;

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const SEARCH_USER_AGENT: &str = "Mozilla/5.0 (compatible; grokbot/0.3)";
const MAX_RESULTS: usize = 10;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a[^>]*class="[^"]*result__a[^"]*"[^>]*href="([^"]+)"[^>]*>([\s\S]*?)</a>"#)
        .expect("hardcoded regex is valid")
});

static SNIPPET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a class="result__snippet[^"]*"[^>]*>([\s\S]*?)</a>"#)
        .expect("hardcoded regex is valid")
});

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("hardcoded regex is valid"));

/// Searches the web for current information.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    endpoint: String,
    max_results: usize,
    timeout: Duration,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::with_endpoint(DUCKDUCKGO_HTML_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_results: MAX_RESULTS,
            timeout: SEARCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebSearchArgs {
    pub query: String,
}

/// A search failure. Its message is what the model sees.
#[derive(Debug, thiserror::Error)]
#[error("Error performing search for '{query}': {message}")]
pub struct WebSearchError {
    pub query: String,
    pub message: String,
}

/// One parsed search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl Tool for WebSearchTool {
    const NAME: &'static str = "web_search";

    type Args = WebSearchArgs;
    type Error = WebSearchError;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Perform a web search to get current information".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<String, Self::Error> {
        let query = args.query;
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let max_results = self.max_results;

        // The search client blocks, so keep it off the async workers.
        let blocking_query = query.clone();
        let results = tokio::task::spawn_blocking(move || {
            search_blocking(&endpoint, &blocking_query, timeout, max_results)
        })
        .await
        .map_err(|error| WebSearchError {
            query: query.clone(),
            message: error.to_string(),
        })?
        .map_err(|error| WebSearchError {
            query: query.clone(),
            message: error.to_string(),
        })?;

        tracing::debug!(%query, result_count = results.len(), "web search finished");
        Ok(format_results(&query, &results))
    }
}

fn search_blocking(
    endpoint: &str,
    query: &str,
    timeout: Duration,
    max_results: usize,
) -> anyhow::Result<Vec<SearchResult>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(SEARCH_USER_AGENT)
        .build()?;

    let url = format!("{endpoint}?q={}", urlencoding::encode(query));
    let response = client.get(&url).send()?;
    if !response.status().is_success() {
        anyhow::bail!("search failed with status {}", response.status());
    }

    let html = response.text()?;
    Ok(parse_results(&html, max_results))
}

/// Extract up to `max_results` hits from a DuckDuckGo HTML results page.
///
/// Each hit owns the markup between its title link and the next one, so a
/// snippet is only ever attached to the result it appears under.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let links: Vec<_> = LINK_PATTERN.captures_iter(html).collect();

    links
        .iter()
        .enumerate()
        .take(max_results)
        .map(|(index, captures)| {
            let block_start = captures.get(0).map_or(0, |whole| whole.end());
            let block_end = links
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map_or(html.len(), |next| next.start());
            let snippet = SNIPPET_PATTERN
                .captures(&html[block_start..block_end])
                .map(|snippet| clean_text(&snippet[1]))
                .unwrap_or_default();

            SearchResult {
                title: clean_text(&captures[2]),
                url: decode_redirect_url(&captures[1]),
                snippet,
            }
        })
        .collect()
}

/// Render results the way the model receives them.
pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results found for '{query}'");
    }

    let mut summary = format!("Here are some search results for '{query}':\n");
    for (index, result) in results.iter().enumerate() {
        summary.push_str(&format!(
            "{}. {}\n   {}\n\n",
            index + 1,
            result.title,
            result.snippet
        ));
    }
    summary.trim().to_string()
}

/// DuckDuckGo wraps result links as `/l/?uddg=<encoded target>`.
fn decode_redirect_url(raw_url: &str) -> String {
    if let Some(index) = raw_url.find("uddg=") {
        let encoded = &raw_url[index + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    raw_url.to_string()
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(fragment, "");
    stripped
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const SAMPLE_PAGE: &str = r#"
        <div class="result">
          <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Programming Language</a>
          <a class="result__snippet" href="x">A language empowering everyone to build <b>reliable</b> &amp; efficient software.</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://tokio.rs/">Tokio</a>
          <a class="result__snippet" href="y">An asynchronous runtime.</a>
        </div>
    "#;

    #[test]
    fn parses_titles_urls_and_snippets() {
        let results = parse_results(SAMPLE_PAGE, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "The Rust Programming Language");
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            results[0].snippet,
            "A language empowering everyone to build reliable & efficient software."
        );
        assert_eq!(results[1].url, "https://tokio.rs/");
    }

    #[test]
    fn missing_snippet_does_not_shift_later_ones() {
        let page = r#"
            <div class="result">
              <a class="result__a" href="https://one.example/">One</a>
              <a class="result__snippet" href="a">First snippet.</a>
            </div>
            <div class="result">
              <a class="result__a" href="https://two.example/">Two</a>
            </div>
            <div class="result">
              <a class="result__a" href="https://three.example/">Three</a>
              <a class="result__snippet" href="c">Third snippet.</a>
            </div>
        "#;

        let results = parse_results(page, 10);
        let pairs: Vec<(&str, &str)> = results
            .iter()
            .map(|result| (result.title.as_str(), result.snippet.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("One", "First snippet."),
                ("Two", ""),
                ("Three", "Third snippet."),
            ]
        );
        assert_eq!(parse_results(page, 2)[1].snippet, "");
    }

    #[test]
    fn result_count_is_capped() {
        assert_eq!(parse_results(SAMPLE_PAGE, 1).len(), 1);
    }

    #[test]
    fn formats_results_and_empty_case() {
        let results = parse_results(SAMPLE_PAGE, 10);
        let formatted = format_results("rust", &results);
        assert!(formatted.starts_with("Here are some search results for 'rust':\n1. The Rust"));
        assert!(formatted.ends_with("2. Tokio\n   An asynchronous runtime."));

        assert_eq!(format_results("zzz", &[]), "No results found for 'zzz'");
    }

    #[test]
    fn error_message_names_query() {
        let error = WebSearchError {
            query: "rust".into(),
            message: "timed out".into(),
        };
        assert_eq!(error.to_string(), "Error performing search for 'rust': timed out");
    }

    #[tokio::test]
    async fn call_queries_endpoint_off_the_runtime() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/html/").query_param("q", "rust lang");
                then.status(200).body(SAMPLE_PAGE);
            })
            .await;

        let tool = WebSearchTool::with_endpoint(server.url("/html/"));
        let output = tool
            .call(WebSearchArgs {
                query: "rust lang".into(),
            })
            .await
            .unwrap();

        assert!(output.contains("1. The Rust Programming Language"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_failure_becomes_search_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/html/");
                then.status(503);
            })
            .await;

        let tool = WebSearchTool::with_endpoint(server.url("/html/"));
        let error = tool
            .call(WebSearchArgs {
                query: "rust".into(),
            })
            .await
            .unwrap_err();

        assert!(error.to_string().starts_with("Error performing search for 'rust':"));
    }
}
