//! Bank-data provider interface and HTTP client. Transaction ingestion
//! transport (webhook delivery, link flows) is the provider's concern; this
//! client only covers the pull and routing lookups the core consumes.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::BankTransaction;
use crate::ports::RoutingInfo;

#[derive(Error, Debug)]
pub enum BankDataError {
    #[error("bank provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("invalid response from bank provider: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait BankDataProvider: Send + Sync {
    async fn pull_transactions(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<BankTransaction>, BankDataError>;

    async fn get_routing_info(&self, account_id: Uuid) -> Result<RoutingInfo, BankDataError>;
}

/// HTTP client for the bank-data provider.
#[derive(Clone)]
pub struct BankDataClient {
    client: Client,
    base_url: String,
}

impl BankDataClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        BankDataClient { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl BankDataProvider for BankDataClient {
    async fn pull_transactions(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<BankTransaction>, BankDataError> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{}/transactions", account_id)))
            .send()
            .await?;

        if response.status() == 404 {
            return Err(BankDataError::AccountNotFound(account_id));
        }

        let transactions = response
            .json::<Vec<BankTransaction>>()
            .await
            .map_err(|e| BankDataError::InvalidResponse(e.to_string()))?;
        Ok(transactions)
    }

    async fn get_routing_info(&self, account_id: Uuid) -> Result<RoutingInfo, BankDataError> {
        #[derive(serde::Deserialize)]
        struct RoutingResponse {
            account_number: String,
            routing_number: String,
        }

        let response = self
            .client
            .get(self.url(&format!("/accounts/{}/routing", account_id)))
            .send()
            .await?;

        if response.status() == 404 {
            return Err(BankDataError::AccountNotFound(account_id));
        }

        let payload = response
            .json::<RoutingResponse>()
            .await
            .map_err(|e| BankDataError::InvalidResponse(e.to_string()))?;
        Ok(RoutingInfo {
            account_number: payload.account_number,
            routing_number: payload.routing_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pulls_transactions_for_an_account() {
        let mut server = mockito::Server::new_async().await;

        let account = Uuid::new_v4();
        let user = Uuid::new_v4();
        let body = serde_json::json!([{
            "transaction_id": "txn-1",
            "account_id": account,
            "user_id": user,
            "amount": 12500,
            "merchant_name": "COMCAST CABLE COMM",
            "ppd_id": "1234567890",
            "posted_at": "2026-08-01T12:00:00Z"
        }]);

        let _mock = server
            .mock(
                "GET",
                format!("/accounts/{}/transactions", account).as_str(),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = BankDataClient::new(server.url());
        let transactions = client.pull_transactions(account).await.unwrap();

        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction_id, "txn-1");
        assert_eq!(transactions[0].amount, 12_500);
    }

    #[tokio::test]
    async fn fetches_routing_info() {
        let mut server = mockito::Server::new_async().await;

        let account = Uuid::new_v4();
        let _mock = server
            .mock("GET", format!("/accounts/{}/routing", account).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"account_number":"000123456789","routing_number":"110000000"}"#)
            .create_async()
            .await;

        let client = BankDataClient::new(server.url());
        let info = client.get_routing_info(account).await.unwrap();

        assert_eq!(info.account_number, "000123456789");
        assert_eq!(info.routing_number, "110000000");
    }

    #[tokio::test]
    async fn missing_account_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;

        let account = Uuid::new_v4();
        let _mock = server
            .mock(
                "GET",
                format!("/accounts/{}/transactions", account).as_str(),
            )
            .with_status(404)
            .create_async()
            .await;

        let client = BankDataClient::new(server.url());
        let result = client.pull_transactions(account).await;
        assert!(matches!(result, Err(BankDataError::AccountNotFound(_))));
    }
}
