use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use common::utils::Currency;

#[derive(Serialize)]
pub struct CollectionRequest {
    /// Amount to collect from the player's mobile money account, FCFA.
    pub amount: i64,
    pub currency: String,
    /// Our idempotency key; the gateway echoes it back on the webhook.
    pub reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct PayoutRequest {
    pub amount: i64,
    pub currency: String,
    pub reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl GatewayClient {
    pub fn new(api_url: String, api_key: String) -> Self {
        let client = Client::new();
        GatewayClient {
            client,
            api_url,
            api_key,
        }
    }

    pub async fn create_collection(
        &self,
        amount: i64,
        reference: &str,
    ) -> Result<CollectionResponse, reqwest::Error> {
        let request = CollectionRequest {
            amount,
            currency: Currency::FCFA.to_string(),
            reference: reference.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/collections", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        response.json().await
    }

    pub async fn initiate_payout(
        &self,
        amount: i64,
        reference: &str,
    ) -> Result<PayoutResponse, reqwest::Error> {
        let request = PayoutRequest {
            amount,
            currency: Currency::FCFA.to_string(),
            reference: reference.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/payouts", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        response.json().await
    }
}

/// Webhook authenticity check: hex HMAC-SHA256 of the raw body must match
/// the `X-Gateway-Signature` header.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMac can take key of any size");

    mac.update(payload);

    let expected = hex::encode(mac.finalize().into_bytes());

    expected == signature
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMac can take key of any size");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let body = br#"{"reference":"dep:abc","status":"SUCCESS"}"#;
        let signature = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &signature));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let body = br#"{"reference":"dep:abc","status":"SUCCESS"}"#;
        let signature = sign("topsecret", body);
        let tampered = br#"{"reference":"dep:abc","status":"FAILED"}"#;
        assert!(!verify_signature("topsecret", tampered, &signature));
    }

    #[test]
    fn rejects_a_signature_under_the_wrong_secret() {
        let body = br#"{"reference":"wd:42","status":"SUCCESS"}"#;
        let signature = sign("other-secret", body);
        assert!(!verify_signature("topsecret", body, &signature));
    }
}
