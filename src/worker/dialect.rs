//! Wire dialects — the three upstream protocol families relaypool speaks.
//!
//! Each dialect is a tagged variant dispatched by match, not by inheritance,
//! per the explicit guidance on dialect polymorphism: a small capability set
//! (`request_path`, `health_path`, `build_request_body`, `extract_text`)
//! implemented once per dialect.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

/// A worker's wire protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    OpenAiStyle,
    NativeStyle,
    ClusterStyle,
}

impl FromStr for Dialect {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai-style" => Ok(Dialect::OpenAiStyle),
            "native-style" => Ok(Dialect::NativeStyle),
            "cluster-style" => Ok(Dialect::ClusterStyle),
            other => Err(DispatchError::InvalidConfig(format!(
                "unknown dialect '{other}'"
            ))),
        }
    }
}

/// Sampling / generation parameters a caller may supply for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub frequency_penalty: Option<f32>,
}

/// Resolved parameters after defaults and clamping have been applied.
/// See §4.6: max_tokens >= 1, temperature/top_p in [0,1], frequency_penalty >= 0.
#[derive(Debug, Clone)]
pub struct ResolvedParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Option<Vec<String>>,
    pub frequency_penalty: f32,
}

impl From<RequestParams> for ResolvedParams {
    fn from(p: RequestParams) -> Self {
        Self {
            max_tokens: p.max_tokens.unwrap_or(500).max(1),
            temperature: p.temperature.unwrap_or(0.7).clamp(0.0, 1.0),
            top_p: p.top_p.unwrap_or(0.9).clamp(0.0, 1.0),
            stop: p.stop,
            frequency_penalty: p.frequency_penalty.unwrap_or(0.0).max(0.0),
        }
    }
}

impl Dialect {
    /// Path appended to `http://{host}:{port}` for completion requests.
    pub fn request_path(self) -> &'static str {
        match self {
            Dialect::OpenAiStyle => "/v1/completions",
            Dialect::NativeStyle => "/api/generate",
            Dialect::ClusterStyle => "/v1/chat/completions",
        }
    }

    /// Path appended to `http://{host}:{port}` for the health/listing probe.
    pub fn health_path(self) -> &'static str {
        match self {
            Dialect::OpenAiStyle | Dialect::ClusterStyle => "/v1/models",
            Dialect::NativeStyle => "/api/tags",
        }
    }

    /// Build the dialect-specific JSON request body.
    pub fn build_request_body(self, model: &str, prompt: &str, params: &ResolvedParams) -> Value {
        match self {
            Dialect::OpenAiStyle => {
                let mut body = json!({
                    "model": model,
                    "prompt": prompt,
                    "max_tokens": params.max_tokens,
                    "temperature": params.temperature,
                    "top_p": params.top_p,
                    "frequency_penalty": params.frequency_penalty,
                    "stream": false,
                });
                if let Some(stop) = &params.stop {
                    body["stop"] = json!(stop);
                }
                body
            }
            Dialect::NativeStyle => {
                let mut body = json!({
                    "model": model,
                    "prompt": prompt,
                    "stream": false,
                    "options": {
                        "num_predict": params.max_tokens,
                        "temperature": params.temperature,
                        "top_p": params.top_p,
                    },
                });
                if let Some(stop) = &params.stop {
                    body["stop"] = json!(stop);
                }
                body
            }
            Dialect::ClusterStyle => {
                json!({
                    "model": model,
                    "messages": [{"role": "user", "content": prompt}],
                    "max_tokens": params.max_tokens,
                    "temperature": params.temperature,
                    "top_p": params.top_p,
                    "stream": false,
                })
            }
        }
    }

    /// Extract `{model, response_text}` from the dialect-specific response body.
    pub fn normalize_response(self, worker_id: &str, body: &Value) -> Result<(String, String), DispatchError> {
        let malformed = |message: String| DispatchError::MalformedResponse {
            worker_id: worker_id.to_string(),
            message,
        };

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let text = match self {
            Dialect::OpenAiStyle => body
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("text"))
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing choices[0].text".to_string()))?,
            Dialect::NativeStyle => body
                .get("response")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing response field".to_string()))?,
            Dialect::ClusterStyle => body
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing choices[0].message.content".to_string()))?,
        };

        Ok((model, text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_wire_contract() {
        assert_eq!(Dialect::OpenAiStyle.request_path(), "/v1/completions");
        assert_eq!(Dialect::OpenAiStyle.health_path(), "/v1/models");
        assert_eq!(Dialect::NativeStyle.request_path(), "/api/generate");
        assert_eq!(Dialect::NativeStyle.health_path(), "/api/tags");
        assert_eq!(Dialect::ClusterStyle.request_path(), "/v1/chat/completions");
        assert_eq!(Dialect::ClusterStyle.health_path(), "/v1/models");
    }

    #[test]
    fn resolves_defaults() {
        let resolved: ResolvedParams = RequestParams::default().into();
        assert_eq!(resolved.max_tokens, 500);
        assert!((resolved.temperature - 0.7).abs() < f32::EPSILON);
        assert!((resolved.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(resolved.frequency_penalty, 0.0);
    }

    #[test]
    fn clamps_out_of_range_params() {
        let params = RequestParams {
            max_tokens: Some(0),
            temperature: Some(5.0),
            top_p: Some(-1.0),
            stop: None,
            frequency_penalty: Some(-3.0),
        };
        let resolved: ResolvedParams = params.into();
        assert_eq!(resolved.max_tokens, 1);
        assert_eq!(resolved.temperature, 1.0);
        assert_eq!(resolved.top_p, 0.0);
        assert_eq!(resolved.frequency_penalty, 0.0);
    }

    #[test]
    fn extracts_openai_style_text() {
        let body = json!({"choices": [{"text": "hello"}], "model": "m"});
        let (model, text) = Dialect::OpenAiStyle.normalize_response("w0", &body).unwrap();
        assert_eq!(model, "m");
        assert_eq!(text, "hello");
    }

    #[test]
    fn extracts_native_style_text() {
        let body = json!({"response": "hi there", "model": "m"});
        let (_, text) = Dialect::NativeStyle.normalize_response("w0", &body).unwrap();
        assert_eq!(text, "hi there");
    }

    #[test]
    fn extracts_cluster_style_text() {
        let body = json!({"choices": [{"message": {"content": "yo"}}], "model": "m"});
        let (_, text) = Dialect::ClusterStyle.normalize_response("w0", &body).unwrap();
        assert_eq!(text, "yo");
    }

    #[test]
    fn missing_field_is_malformed_response() {
        let body = json!({"unexpected": true});
        let err = Dialect::OpenAiStyle.normalize_response("w0", &body).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedResponse { .. }));
    }
}
