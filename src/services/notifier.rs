use std::time::Duration;

use reqwest::Client;

use crate::models::job::CallbackTarget;
use crate::models::verification::CallbackPayload;

/// Best-effort delivery of the terminal result to the caller's callback URL.
///
/// One POST, bearer-authenticated with the job's callback token, guarded by
/// a short timeout. Delivery failure is logged and dropped: the job has
/// already reached its terminal state, and there is no retry or dead-letter
/// path (known reliability gap, kept deliberately).
pub struct CallbackNotifier {
    http: Client,
    timeout: Duration,
}

impl CallbackNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            timeout,
        }
    }

    pub async fn deliver(&self, target: &CallbackTarget, payload: &CallbackPayload) {
        let result = self
            .http
            .post(&target.url)
            .bearer_auth(&target.token)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(callback_url = %target.url, status = %response.status(),
                    "callback delivered");
            }
            Ok(response) => {
                tracing::warn!(callback_url = %target.url, status = %response.status(),
                    "callback receiver rejected delivery");
            }
            Err(e) => {
                tracing::warn!(callback_url = %target.url, error = %e, "callback delivery failed");
            }
        }
    }
}
