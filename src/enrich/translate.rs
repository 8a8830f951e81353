use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::{EnrichmentError, EnrichmentErrorKind, Stage};

const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, EnrichmentError>;
}

#[derive(Debug, Error)]
pub enum TranslatorSetupError {
    #[error("Invalid translation endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("Insecure translation endpoint {0}: HTTPS required (except localhost for testing)")]
    InsecureEndpoint(String),
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    target_lang: String,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

/// Client for a DeepL-compatible `/v2/translate` endpoint.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
    timeout: Duration,
}

impl HttpTranslator {
    /// `api_url` is the service root (e.g. `https://api-free.deepl.com`).
    ///
    /// Plain HTTP is accepted only for localhost so the key never crosses the
    /// network unencrypted.
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, TranslatorSetupError> {
        let base = Url::parse(api_url)?;
        if base.scheme() != "https" {
            let local = matches!(base.host_str(), Some("localhost") | Some("127.0.0.1"));
            if !(base.scheme() == "http" && local) {
                return Err(TranslatorSetupError::InsecureEndpoint(api_url.to_string()));
            }
            tracing::warn!(api_url, "Using non-HTTPS translation endpoint (localhost only)");
        }

        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("v2/translate")?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
        })
    }

    fn error(kind: EnrichmentErrorKind, message: impl Into<String>) -> EnrichmentError {
        EnrichmentError::new(Stage::Translation, kind, message)
    }

    fn classify_status(status: reqwest::StatusCode) -> EnrichmentError {
        let code = status.as_u16();
        let kind = match code {
            // 456: DeepL "quota exceeded"; 401/403: key revoked or out of credit
            456 | 401 | 403 => EnrichmentErrorKind::QuotaExceeded,
            429 => EnrichmentErrorKind::Transient,
            _ if status.is_server_error() => EnrichmentErrorKind::Transient,
            _ => EnrichmentErrorKind::Unsupported,
        };
        Self::error(kind, format!("HTTP {code}"))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, EnrichmentError> {
        let body = TranslateRequest {
            text: [text],
            target_lang: target_language.to_uppercase(),
        };

        let request = self
            .client
            .post(self.endpoint.clone())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Self::error(EnrichmentErrorKind::Transient, "request timed out"))?
            .map_err(|e| Self::error(EnrichmentErrorKind::Transient, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify_status(response.status()));
        }

        if response.content_length().is_some_and(|len| len as usize > MAX_RESPONSE_SIZE) {
            return Err(Self::error(
                EnrichmentErrorKind::Unsupported,
                "translation response too large",
            ));
        }

        let parsed: TranslateResponse = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| Self::error(EnrichmentErrorKind::Transient, "response body timed out"))?
            .map_err(|e| {
                Self::error(
                    EnrichmentErrorKind::Transient,
                    format!("unreadable translation response: {e}"),
                )
            })?;

        parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| Self::error(EnrichmentErrorKind::Transient, "empty translations array"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn translator(server: &MockServer) -> HttpTranslator {
        HttpTranslator::new(
            reqwest::Client::new(),
            &server.uri(),
            SecretString::from("test-key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_translate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .and(header("Authorization", "DeepL-Auth-Key test-key"))
            .and(body_json(serde_json::json!({"text": ["Hello"], "target_lang": "DE"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "translations": [{"detected_source_language": "EN", "text": "Hallo"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = translator(&server).translate("Hello", "de").await.unwrap();
        assert_eq!(out, "Hallo");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            (456, EnrichmentErrorKind::QuotaExceeded),
            (403, EnrichmentErrorKind::QuotaExceeded),
            (429, EnrichmentErrorKind::Transient),
            (503, EnrichmentErrorKind::Transient),
            (400, EnrichmentErrorKind::Unsupported),
        ];
        for (code, kind) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let err = translator(&server).translate("x", "de").await.unwrap_err();
            assert_eq!(err.kind, kind, "status {code}");
            assert_eq!(err.stage, Stage::Translation);
        }
    }

    #[tokio::test]
    async fn test_garbage_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = translator(&server).translate("x", "de").await.unwrap_err();
        assert_eq!(err.kind, EnrichmentErrorKind::Transient);
    }

    #[test]
    fn test_rejects_plain_http_remote() {
        let result = HttpTranslator::new(
            reqwest::Client::new(),
            "http://api.example.com",
            SecretString::from("k".to_string()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(TranslatorSetupError::InsecureEndpoint(_))));
    }

    #[test]
    fn test_endpoint_appends_v2_path() {
        let t = HttpTranslator::new(
            reqwest::Client::new(),
            "https://api-free.deepl.com",
            SecretString::from("k".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(t.endpoint.as_str(), "https://api-free.deepl.com/v2/translate");
    }
}
