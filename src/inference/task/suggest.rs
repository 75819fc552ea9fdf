use std::time::Instant;

use serde::Serialize;

use crate::inference::client::{ImagePayload, StylistClient};
use crate::inference::retry::{self, Judgment, RetryError, RetryPolicy};
use crate::inference::style::{suggest_prompt, StyleParams, SUGGEST_SYSTEM};

#[derive(Serialize, Debug)]
pub struct SuggestResponse {
    pub suggestion: String,
    pub meta: StyleParams,
    pub inference_time: f64,
}

impl StylistClient {
    /// Generates one styling suggestion for the photo and client profile.
    /// A suggestion is only accepted above `min_chars` characters; there
    /// is no fallback text, an exhausted budget of short answers is the
    /// caller's "incomplete result".
    pub async fn run_suggest(
        &self,
        policy: &RetryPolicy,
        image: &ImagePayload,
        params: &StyleParams,
        min_chars: usize,
    ) -> Result<SuggestResponse, RetryError> {
        let prompt = suggest_prompt(params);
        let prompt = prompt.as_str();
        let start = Instant::now();

        let suggestion = retry::run_validated(policy, "outfit suggestion", move || async move {
            let raw = self
                .chat_completion(SUGGEST_SYSTEM, prompt, image, 1100, 0.7)
                .await?;
            let length = raw.chars().count();
            Ok(if length > min_chars {
                Judgment::Accept(raw)
            } else {
                Judgment::Reject(format!("suggestion too short: {length} chars"))
            })
        })
        .await?;

        Ok(SuggestResponse {
            suggestion,
            meta: params.clone(),
            inference_time: start.elapsed().as_secs_f64(),
        })
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
            mime: "image/png".to_string(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"content": content}}]})
    }

    #[tokio::test]
    async fn accepts_a_suggestion_above_the_length_threshold() {
        let server = MockServer::start().await;
        let text = "Signature look: relaxed linen set with woven sandals, a straw tote and \
                    delicate gold layering for warm evenings.";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(text)))
            .expect(1)
            .mount(&server)
            .await;

        let params = StyleParams::default();
        let response = client_for(&server)
            .run_suggest(&fast_policy(), &photo(), &params, 80)
            .await
            .unwrap();

        assert!(response.suggestion.chars().count() > 80);
        assert_eq!(response.meta.occasion, "Casual");
    }

    #[tokio::test]
    async fn keeps_rejecting_short_answers_until_the_budget_is_spent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("wear a hat")))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .run_suggest(&fast_policy(), &photo(), &StyleParams::default(), 80)
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Rejected { attempts: 3 }));
    }

    #[tokio::test]
    async fn recovers_when_the_service_comes_back_with_a_full_answer() {
        let server = MockServer::start().await;
        let text = "Boho bloom: flowing midi dress in terracotta, suede ankle boots, a fringe \
                    bag and brass jewelry; add a denim jacket once the sun goes down.";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(text)))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .run_suggest(&fast_policy(), &photo(), &StyleParams::default(), 80)
            .await
            .unwrap();

        assert!(response.suggestion.starts_with("Boho bloom"));
    }
}
