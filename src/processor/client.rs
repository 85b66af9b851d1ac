use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use super::{
    ProcessorAck, ProcessorError, ProcessorTransferStatus, TransferProcessor, TransferRequest,
};

#[derive(Debug, Deserialize)]
struct TransferResponse {
    id: String,
    status: ProcessorTransferStatus,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    /// Minor units.
    available: i64,
}

/// HTTP client for the funds-transfer processor.
#[derive(Clone)]
pub struct ProcessorClient {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl ProcessorClient {
    pub fn new(base_url: String) -> Self {
        Self::with_circuit_breaker(base_url, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ProcessorClient {
            client,
            base_url,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn classify(err: reqwest::Error) -> ProcessorError {
    if err.is_timeout() {
        return ProcessorError::Timeout;
    }
    ProcessorError::Transient(err.to_string())
}

fn classify_status(status: reqwest::StatusCode, body: String) -> ProcessorError {
    if status.is_server_error() {
        ProcessorError::Transient(format!("{}: {}", status, body))
    } else {
        ProcessorError::Terminal(format!("{}: {}", status, body))
    }
}

#[async_trait]
impl TransferProcessor for ProcessorClient {
    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ProcessorAck, ProcessorError> {
        let client = self.client.clone();
        let url = self.url("/transfers");
        let body = serde_json::json!({
            "source": request.source_account_id,
            "destination": request.destination_account_id,
            "amount": request.amount,
        });
        let token = request.idempotency_token.to_string();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .header("Idempotency-Key", &token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(classify)?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, body));
                }

                let payload = response
                    .json::<TransferResponse>()
                    .await
                    .map_err(|e| ProcessorError::Transient(e.to_string()))?;
                Ok(ProcessorAck {
                    processor_transfer_id: payload.id,
                    status: payload.status,
                })
            })
            .await;

        match result {
            Ok(ack) => Ok(ack),
            Err(FailsafeError::Rejected) => Err(ProcessorError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn get_transfer_status(
        &self,
        processor_transfer_id: &str,
    ) -> Result<ProcessorTransferStatus, ProcessorError> {
        let response = self
            .client
            .get(self.url(&format!("/transfers/{}", processor_transfer_id)))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let payload = response
            .json::<TransferResponse>()
            .await
            .map_err(|e| ProcessorError::Transient(e.to_string()))?;
        Ok(payload.status)
    }

    async fn cancel_transfer(&self, processor_transfer_id: &str) -> Result<(), ProcessorError> {
        let response = self
            .client
            .post(self.url(&format!("/transfers/{}/cancel", processor_transfer_id)))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        Ok(())
    }

    async fn get_available_balance(&self, account_id: Uuid) -> Result<i64, ProcessorError> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{}/balance", account_id)))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let payload = response
            .json::<BalanceResponse>()
            .await
            .map_err(|e| ProcessorError::Transient(e.to_string()))?;
        Ok(payload.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_starts_with_closed_circuit() {
        let client = ProcessorClient::new("https://processor.example.com".to_string());
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn create_transfer_sends_idempotency_key() {
        let mut server = mockito::Server::new_async().await;

        let token = Uuid::new_v4();
        let _mock = server
            .mock("POST", "/transfers")
            .match_header("Idempotency-Key", token.to_string().as_str())
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"proc-1","status":"pending"}"#)
            .create_async()
            .await;

        let client = ProcessorClient::new(server.url());
        let ack = client
            .create_transfer(&TransferRequest {
                source_account_id: Uuid::new_v4(),
                destination_account_id: Uuid::new_v4(),
                amount: 2_500,
                idempotency_token: token,
            })
            .await
            .unwrap();

        assert_eq!(ack.processor_transfer_id, "proc-1");
        assert_eq!(ack.status, ProcessorTransferStatus::Pending);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/transfers")
            .with_status(503)
            .create_async()
            .await;

        let client = ProcessorClient::new(server.url());
        let result = client
            .create_transfer(&TransferRequest {
                source_account_id: Uuid::new_v4(),
                destination_account_id: Uuid::new_v4(),
                amount: 100,
                idempotency_token: Uuid::new_v4(),
            })
            .await;

        assert!(matches!(result, Err(ProcessorError::Transient(_))));
    }

    #[tokio::test]
    async fn client_errors_are_terminal() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/transfers")
            .with_status(403)
            .with_body("account closed")
            .create_async()
            .await;

        let client = ProcessorClient::new(server.url());
        let result = client
            .create_transfer(&TransferRequest {
                source_account_id: Uuid::new_v4(),
                destination_account_id: Uuid::new_v4(),
                amount: 100,
                idempotency_token: Uuid::new_v4(),
            })
            .await;

        assert!(matches!(result, Err(ProcessorError::Terminal(_))));
    }

    #[tokio::test]
    async fn balance_lookup_parses_minor_units() {
        let mut server = mockito::Server::new_async().await;

        let account = Uuid::new_v4();
        let _mock = server
            .mock("GET", format!("/accounts/{}/balance", account).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"available":123456}"#)
            .create_async()
            .await;

        let client = ProcessorClient::new(server.url());
        let balance = client.get_available_balance(account).await.unwrap();
        assert_eq!(balance, 123_456);
    }

    #[tokio::test]
    #[ignore]
    async fn circuit_breaker_opens_after_consecutive_failures() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/transfers")
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = ProcessorClient::with_circuit_breaker(server.url(), 3, 1);
        let request = TransferRequest {
            source_account_id: Uuid::new_v4(),
            destination_account_id: Uuid::new_v4(),
            amount: 100,
            idempotency_token: Uuid::new_v4(),
        };

        for _ in 0..3 {
            let _ = client.create_transfer(&request).await;
        }

        let result = client.create_transfer(&request).await;
        assert!(matches!(result, Err(ProcessorError::CircuitOpen)));
    }
}
