use crate::core::config::{BackendConfig, Config};
use crate::core::state::{Catalog, Character, Hook, Outline, Suggestion};
use crate::services::requests::{HookRequest, OutlineRequest, SuggestionRequest, WriteRequest};
use crate::services::stream::ByteStream;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait StoryBackend: Send + Sync + Debug {
    async fn load_catalog(&self) -> Result<Catalog>;
    async fn suggest(&self, request: &SuggestionRequest<'_>) -> Result<Suggestion>;
    async fn generate_hooks(&self, request: &HookRequest<'_>) -> Result<Vec<Hook>>;
    async fn generate_outline(&self, request: &OutlineRequest<'_>) -> Result<Outline>;
    async fn write_story(&self, request: &WriteRequest<'_>) -> Result<ByteStream>;
}

pub fn create_backend(config: &Config) -> Result<Box<dyn StoryBackend>> {
    Ok(Box::new(HttpBackend::new(&config.backend)?))
}

#[derive(Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    characters: Option<Vec<Character>>,
}

#[derive(Deserialize)]
struct HooksResponse {
    hooks: Vec<Hook>,
}

#[derive(Debug)]
pub struct HttpBackend {
    base_url: Url,
    retry_count: usize,
    retry_delay: Duration,
    timeout: Duration,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("Invalid backend URL: {}", base))?;

        Ok(Self {
            base_url,
            retry_count: config.retry_count,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            timeout: Duration::from_secs(config.request_timeout_seconds),
            client: Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    async fn call<R, F>(&self, path: &str, build: F) -> Result<R>
    where
        R: DeserializeOwned,
        F: Fn(&Client, Url) -> RequestBuilder + Send + Sync,
    {
        let url = self.endpoint(path)?;
        let attempts = self.retry_count + 1;
        let mut last_error = anyhow!("No attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!("Retrying {} (attempt {}/{})", path, attempt + 1, attempts);
                tokio::time::sleep(self.retry_delay).await;
            }

            let request = build(&self.client, url.clone()).timeout(self.timeout);
            match Self::try_call(path, request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("{} failed: {:#}", path, e);
                    last_error = e;
                }
            }
        }

        Err(last_error.context(format!("{} failed after {} attempt(s)", path, attempts)))
    }

    async fn try_call<R: DeserializeOwned>(path: &str, request: RequestBuilder) -> Result<R> {
        let resp = request.send().await.context("Request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            bail!("Backend returned {}: {}", status, error_text);
        }

        let body = resp.text().await.context("Failed to read response body")?;
        debug!("{} responded with {} bytes", path, body.len());
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse {} response. Body: {}", path, body))
    }
}

#[async_trait]
impl StoryBackend for HttpBackend {
    async fn load_catalog(&self) -> Result<Catalog> {
        let response: CatalogResponse = self
            .call("api/load_data", |client, url| client.get(url))
            .await?;
        let characters = response.characters.unwrap_or_else(|| {
            warn!("Backend returned no character list");
            Vec::new()
        });
        info!("Loaded {} characters", characters.len());
        Ok(Catalog::new(characters))
    }

    async fn suggest(&self, request: &SuggestionRequest<'_>) -> Result<Suggestion> {
        self.call("api/suggest", |client, url| client.post(url).json(request))
            .await
    }

    async fn generate_hooks(&self, request: &HookRequest<'_>) -> Result<Vec<Hook>> {
        let response: HooksResponse = self
            .call("api/generate-hooks", |client, url| client.post(url).json(request))
            .await?;
        Ok(response.hooks)
    }

    async fn generate_outline(&self, request: &OutlineRequest<'_>) -> Result<Outline> {
        self.call("api/generate-outline", |client, url| client.post(url).json(request))
            .await
    }

    async fn write_story(&self, request: &WriteRequest<'_>) -> Result<ByteStream> {
        let url = self.endpoint("api/write-story")?;
        // No timeout: the job runs for as long as the writer needs.
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .context("Failed to open writing stream")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            bail!("Writing request rejected with {}: {}", status, error_text);
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| anyhow!("Stream error: {}", e))
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let plain = backend("http://127.0.0.1:5001");
        assert_eq!(
            plain.endpoint("api/suggest").unwrap().as_str(),
            "http://127.0.0.1:5001/api/suggest"
        );

        let prefixed = backend("http://example.com/storyforge");
        assert_eq!(
            prefixed.endpoint("api/write-story").unwrap().as_str(),
            "http://example.com/storyforge/api/write-story"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpBackend::new(&BackendConfig {
            base_url: "::nope".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_catalog_response_parsing() {
        let json = r#"{ "characters": [ { "full_name": "Ava" }, { "name": "Bo" } ] }"#;
        let response: CatalogResponse = serde_json::from_str(json).unwrap();
        let characters = response.characters.unwrap();
        assert_eq!(characters[1].full_name, "Bo");

        let empty: CatalogResponse = serde_json::from_str(r#"{ "characters": null }"#).unwrap();
        assert!(empty.characters.is_none());
    }

    #[test]
    fn test_suggestion_response_parsing() {
        let json = r#"{
            "suggested_main_character": "Ava",
            "reason": "Strong arc potential."
        }"#;
        let suggestion: Suggestion = serde_json::from_str(json).unwrap();
        assert_eq!(suggestion.suggested_name, "Ava");
        assert_eq!(suggestion.sample_hook, None);
    }

    #[test]
    fn test_hooks_response_requires_hooks() {
        let json = r#"{ "hooks": [ { "title": "A", "tone": "Dark", "idea": "..." } ] }"#;
        let response: HooksResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.hooks.len(), 1);

        assert!(serde_json::from_str::<HooksResponse>("{}").is_err());
    }

    fn retrying_backend(addr: std::net::SocketAddr) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: format!("http://{}", addr),
            retry_count: 1,
            retry_delay_seconds: 0,
            request_timeout_seconds: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_dropped_connections_fail_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });

        let err = retrying_backend(addr).load_catalog().await.unwrap_err();
        assert!(format!("{:#}", err).contains("2 attempt(s)"));
        assert!(accepted.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_catalog_loaded_from_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            assert!(request.starts_with(b"GET /api/load_data"));

            let body = r#"{"characters":[{"full_name":"Ava"},{"name":"Bo"}]}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let catalog = retrying_backend(addr).load_catalog().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.find("Bo").is_some());
    }
}
