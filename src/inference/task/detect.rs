use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::inference::client::{ImagePayload, StylistClient};
use crate::inference::retry::{self, Judgment, RetryError, RetryPolicy};
use crate::inference::style::{detect_prompt, StyleLabel, DETECT_SYSTEM};

#[derive(Serialize, Debug)]
pub struct DetectResponse {
    pub style: StyleLabel,
    pub fallback_applied: bool,
    pub inference_time: f64,
}

impl StylistClient {
    /// Classifies the outfit photo against the closed style set. An
    /// exhausted budget of off-set answers resolves to `fallback`; only a
    /// persistently failing service surfaces as an error.
    pub async fn run_detect(
        &self,
        policy: &RetryPolicy,
        image: &ImagePayload,
        fallback: StyleLabel,
    ) -> Result<DetectResponse, RetryError> {
        let prompt = detect_prompt();
        let prompt = prompt.as_str();
        let start = Instant::now();

        let outcome = retry::run_validated(policy, "style detection", move || async move {
            let raw = self
                .chat_completion(DETECT_SYSTEM, prompt, image, 10, 0.0)
                .await?;
            Ok(match StyleLabel::from_model_output(&raw) {
                Some(label) => Judgment::Accept(label),
                None => Judgment::Reject(raw),
            })
        })
        .await;

        let inference_time = start.elapsed().as_secs_f64();
        match outcome {
            Ok(style) => Ok(DetectResponse {
                style,
                fallback_applied: false,
                inference_time,
            }),
            Err(RetryError::Rejected { attempts }) => {
                info!(attempts, %fallback, "No usable label, applying the fallback style");
                Ok(DetectResponse {
                    style: fallback,
                    fallback_applied: true,
                    inference_time,
                })
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> StylistClient {
        StylistClient::new(
            &format!("{}/v1", server.uri()),
            "test-key",
            "gpt-4o",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
        }
    }

    fn photo() -> ImagePayload {
        ImagePayload {
            bytes: vec![0xFF, 0xD8, 0xFF].into_boxed_slice(),
            mime: "image/jpeg".to_string(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"content": content}}]})
    }

    #[tokio::test]
    async fn accepts_a_known_label_on_the_first_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(" Western.\n")))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .run_detect(&fast_policy(), &photo(), StyleLabel::Casual)
            .await
            .unwrap();

        assert_eq!(response.style, StyleLabel::Western);
        assert!(!response.fallback_applied);
    }

    #[tokio::test]
    async fn falls_back_when_no_answer_is_ever_on_the_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("unknown fabric")))
            .expect(3)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .run_detect(&fast_policy(), &photo(), StyleLabel::Western)
            .await
            .unwrap();

        assert_eq!(response.style, StyleLabel::Western);
        assert!(response.fallback_applied);
    }

    #[tokio::test]
    async fn survives_transient_service_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("western")))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .run_detect(&fast_policy(), &photo(), StyleLabel::Casual)
            .await
            .unwrap();

        assert_eq!(response.style, StyleLabel::Western);
        assert!(!response.fallback_applied);
    }

    #[tokio::test]
    async fn reports_unavailable_once_the_budget_is_spent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .run_detect(&fast_policy(), &photo(), StyleLabel::Western)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RetryError::Unavailable { attempts: 3, .. }
        ));
    }
}
