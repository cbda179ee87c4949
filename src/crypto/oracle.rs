//! Signature oracle client
//!
//! Transaction signatures are ECDSA secp256k1 but this node never touches
//! key material: it asks a validation server for a verdict instead. The
//! exchange is the only network dependency of validation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::consensus::Transaction;
use crate::constants::ORACLE_TIMEOUT_SECONDS;

/// Oracle errors
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A source of signature verdicts for transactions.
#[async_trait]
pub trait SignatureOracle: Send + Sync {
    /// Returns whether the transaction's signature is valid for its
    /// sender key and signing pre-image.
    async fn verify(&self, transaction: &Transaction) -> Result<bool, OracleError>;
}

#[derive(Serialize)]
struct ValidationRequest<'a> {
    signature: &'a str,
    #[serde(rename = "transactionRepresentation")]
    transaction_representation: String,
    #[serde(rename = "publicKey")]
    public_key: &'a str,
}

#[derive(Deserialize)]
struct ValidationResponse {
    valid_signature: bool,
}

/// Oracle backed by an HTTP validation server.
pub struct HttpSignatureOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpSignatureOracle {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ORACLE_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();

        Self { client, url }
    }
}

#[async_trait]
impl SignatureOracle for HttpSignatureOracle {
    async fn verify(&self, transaction: &Transaction) -> Result<bool, OracleError> {
        let request = ValidationRequest {
            signature: &transaction.signature,
            transaction_representation: transaction.signing_payload(),
            public_key: &transaction.sender,
        };

        let response: ValidationResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        Ok(response.valid_signature)
    }
}

/// Oracle that returns a fixed verdict. Used for offline validation
/// and throughout the test suite.
pub struct StaticOracle {
    verdict: bool,
}

impl StaticOracle {
    pub fn accepting() -> Self {
        Self { verdict: true }
    }

    pub fn rejecting() -> Self {
        Self { verdict: false }
    }
}

#[async_trait]
impl SignatureOracle for StaticOracle {
    async fn verify(&self, _transaction: &Transaction) -> Result<bool, OracleError> {
        Ok(self.verdict)
    }
}

/// Startup reachability probe. The node refuses to start without a
/// responding validation server.
pub async fn probe(url: &str) -> Result<(), OracleError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()?;

    client.get(url).send().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            sender: "a1".to_string(),
            recipient: "b2".to_string(),
            amount: 42,
            timestamp: 1585852961,
            signature: "cafe".to_string(),
        }
    }

    #[tokio::test]
    async fn test_static_oracle_verdicts() {
        let tx = sample_transaction();

        assert!(StaticOracle::accepting().verify(&tx).await.unwrap());
        assert!(!StaticOracle::rejecting().verify(&tx).await.unwrap());
    }

    #[test]
    fn test_request_wire_shape() {
        let tx = sample_transaction();
        let request = ValidationRequest {
            signature: &tx.signature,
            transaction_representation: tx.signing_payload(),
            public_key: &tx.sender,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["signature"], "cafe");
        assert_eq!(json["publicKey"], "a1");
        assert_eq!(json["transactionRepresentation"], "a1 -42-> b2 (1585852961)");
    }

    #[test]
    fn test_response_parses() {
        let response: ValidationResponse =
            serde_json::from_str(r#"{"valid_signature":true}"#).unwrap();
        assert!(response.valid_signature);
    }
}
