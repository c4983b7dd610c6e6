//! Plain HTTP calls to third-party systems.

use serde_json::Value;
use tracing::info;

use crate::context::RunContext;
use crate::error::StepError;
use crate::step::StepControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Fire one HTTP request; any response counts as success, only transport
/// errors fail. No retry.
///
/// Used for integrations that sit outside the fleet (hospital IT systems,
/// smart fixtures with REST endpoints). The response body is logged, not
/// interpreted.
pub struct ApiCall {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

impl ApiCall {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body: Some(body),
        }
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        _control: &StepControl,
    ) -> Result<(), StepError> {
        let request = match self.method {
            HttpMethod::Get => ctx.http.get(&self.url),
            HttpMethod::Post => {
                let builder = ctx.http.post(&self.url);
                match &self.body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        info!(url = %self.url, %status, body = %body, "api call completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_external_call_error() {
        let harness = TestHarness::new();
        let (_tx, control) = StepControl::channel();

        // Discard port; nothing listens there.
        let step = ApiCall::get("http://127.0.0.1:9/unreachable");
        let err = step.run(&harness.ctx, &control).await.unwrap_err();
        assert!(matches!(err, StepError::ExternalCall(_)));
    }

    #[test]
    fn test_builders() {
        let get = ApiCall::get("http://fixture/buckle");
        assert_eq!(get.method, HttpMethod::Get);
        assert!(get.body.is_none());

        let post = ApiCall::post("http://his/records", serde_json::json!({"id": 1}));
        assert_eq!(post.method, HttpMethod::Post);
        assert!(post.body.is_some());
    }
}
