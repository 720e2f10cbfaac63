use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{Error, ExternalService, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Data { data: Vec<EmbeddingData> },
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Data { mut data } => {
                if data.iter().all(|d| d.index.is_some()) {
                    data.sort_by_key(|d| d.index);
                }
                data.into_iter().map(|d| d.embedding).collect()
            }
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
        }
    }
}

/// Embedder backed by an OpenAI-compatible `/v1/embeddings` endpoint
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model_id: String,
    dimension: usize,
    retries: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)?;
        let endpoint = base_url
            .join("/v1/embeddings")
            .map_err(|e| Error::Config(format!("Invalid embedding URL: {}", e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key(),
            model_id: config.model.clone(),
            dimension: config.dimension,
            retries: config.retries,
        })
    }

    fn validate_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        if let Some(mismatch) = embeddings.iter().find(|vec| vec.len() != self.dimension) {
            return Err(Error::external(
                ExternalService::Embedding,
                format!(
                    "Embedding dimension mismatch for model '{}': expected {}, got {}",
                    self.model_id,
                    self.dimension,
                    mismatch.len()
                ),
            ));
        }
        Ok(())
    }

    /// Retries connection failures, 429 and 5xx with linear backoff; other statuses fail fast
    async fn send_with_retry(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        let body = EmbedRequest {
            model: &self.model_id,
            input: texts,
        };

        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            let mut request = self.client.post(self.endpoint.clone()).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<EmbeddingResponse>().await.map_err(|e| {
                        Error::external(
                            ExternalService::Embedding,
                            format!("unexpected response body: {}", e),
                        )
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let err = Error::external(
                        ExternalService::Embedding,
                        format!("backend returned {}", status),
                    );
                    if !is_retryable(status) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    last_err = Some(Error::external(ExternalService::Embedding, e.to_string()))
                }
            }

            if attempt < self.retries {
                warn!(attempt = attempt + 1, "Embedding request failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::external(ExternalService::Embedding, "embedding request failed")
        }))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(model = %self.model_id, count = texts.len(), "Embedding batch");
        let embeddings = self.send_with_retry(&texts).await?.into_embeddings();
        if embeddings.len() != texts.len() {
            return Err(Error::external(
                ExternalService::Embedding,
                format!(
                    "requested {} embeddings, received {}",
                    texts.len(),
                    embeddings.len()
                ),
            ));
        }
        self.validate_dimensions(&embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            url: url.to_string(),
            model: "test-embed".to_string(),
            dimension: 3,
            api_key_env: "DOCCHAT_TEST_UNSET_KEY".to_string(),
            retries: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_openai_shape_sorted_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"model": "test-embed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri())).unwrap();
        let vectors = embedder
            .embed(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_alternate_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"embeddings": [[0.5, 0.5, 0.0]]})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri())).unwrap();
        let vectors = embedder.embed(vec!["a".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5, 0.0]]);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"vectors": [[1.0, 0.0, 0.0]]})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri())).unwrap();
        assert!(embedder.embed(vec!["a".to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri())).unwrap();
        let err = embedder.embed(vec!["a".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ExternalService {
                service: ExternalService::Embedding,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0]]})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri())).unwrap();
        let err = embedder.embed(vec!["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
