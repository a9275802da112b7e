//! Client for the slide parsing collaborator
//!
//! PPTX files are not parsed in-process. The worker posts the file to
//! `POST {base_url}/parse-pptx` and gets back one entry per slide.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::ImportMode;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for the startup reachability check
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Slide parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Base URL of the parsing collaborator
    pub base_url: String,
    /// Upper bound for one parse (also used for PDF text extraction)
    pub timeout_secs: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 120,
        }
    }
}

impl ParserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One parsed slide
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slide {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Image references (URLs or data URIs), in slide order
    #[serde(default)]
    pub images: Vec<String>,
}

impl Slide {
    pub fn new(title: Option<&str>, text: Option<&str>) -> Self {
        Self {
            title: title.map(str::to_string),
            text: text.map(str::to_string),
            images: Vec::new(),
        }
    }

    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = images.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    slides: Vec<Slide>,
}

/// Turns a presentation file into slides
#[async_trait]
pub trait SlideParser: Send + Sync {
    async fn parse_slides(&self, file: &Path, filename: &str, mode: ImportMode) -> Result<Vec<Slide>>;
}

/// [`SlideParser`] backed by the HTTP parsing collaborator
pub struct HttpSlideParser {
    client: Client,
    base_url: String,
    endpoint: String,
}

impl HttpSlideParser {
    /// The overall parse deadline is enforced by the caller; the client only
    /// bounds connection setup.
    pub fn new(config: &ParserConfig) -> Result<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let endpoint = format!("{}/parse-pptx", base_url);

        Ok(Self {
            client,
            base_url,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check that the collaborator answers at its base URL within `limit`.
    /// Any HTTP status counts as an answer.
    pub async fn health_check(&self, limit: Duration) -> Result<()> {
        self.client
            .get(&self.base_url)
            .timeout(limit)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SlideParser for HttpSlideParser {
    async fn parse_slides(&self, file: &Path, filename: &str, mode: ImportMode) -> Result<Vec<Slide>> {
        let data = tokio::fs::read(file).await?;
        let size = data.len();

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(filename.to_string()),
            )
            .text("mode", mode.as_str());

        tracing::debug!("[{}] Posting {} bytes to {}", filename, size, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::file_parse(filename, format!("parser request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::file_parse(
                filename,
                format!("parser error: {} - {}", status, body),
            ));
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| Error::file_parse(filename, format!("invalid parser response: {}", e)))?;

        tracing::info!("[{}] Parser returned {} slides", filename, parsed.slides.len());
        Ok(parsed.slides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let parser = HttpSlideParser::new(&ParserConfig {
            base_url: "http://parser:8000/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(parser.endpoint(), "http://parser:8000/parse-pptx");
    }

    #[tokio::test]
    async fn test_health_check_gives_up_on_silent_parser() {
        // accepts the connection, never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let parser = HttpSlideParser::new(&ParserConfig {
            base_url: format!("http://{}", addr),
            timeout_secs: 5,
        })
        .unwrap();

        let started = std::time::Instant::now();
        let err = parser
            .health_check(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5), "{}", err);
        silent.abort();
    }

    #[test]
    fn test_slides_tolerate_missing_fields() {
        let parsed: ParseResponse = serde_json::from_str(
            r#"{"slides":[{"title":"Intro","text":"hello","images":["a.png"]},{"images":[]},{}]}"#,
        )
        .unwrap();

        assert_eq!(parsed.slides.len(), 3);
        assert_eq!(
            parsed.slides[0],
            Slide::new(Some("Intro"), Some("hello")).with_images(["a.png"])
        );
        assert_eq!(parsed.slides[2], Slide::default());

        let empty: ParseResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.slides.is_empty());
    }
}
