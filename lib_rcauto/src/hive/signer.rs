//! # Transaction Signing
//!
//! Signing is delegated to an external service that holds the posting and
//! active keys. This process only ever sees the returned signatures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hive::transaction::Transaction;
use crate::retrieve::ky_http::ApiClient;

/// Which key of the signing account must sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    /// Posting key (custom_json with posting auths).
    Posting,
    /// Active key (feed_publish, active custom_json).
    Active,
}

/// Errors from the signing seam.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The service could not be reached.
    #[error("signer unreachable: {0}")]
    Unavailable(String),

    /// The service refused to sign.
    #[error("signer rejected the transaction (HTTP {status}): {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The service answered without usable signatures.
    #[error("signer returned no signatures")]
    NoSignatures,

    /// No signer is configured.
    #[error("no signer configured")]
    NotConfigured,
}

/// Produces signatures for a transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Returns the hex signatures for `trx` on chain `chain_id` using the
    /// `role` key of the accounts named in its operations.
    async fn sign(&self, trx: &Transaction, chain_id: &str, role: KeyRole) -> Result<Vec<String>, SignerError>;
}

#[derive(Serialize)]
struct SignRequest<'a> {
    transaction: &'a Transaction,
    chain_id: &'a str,
    key_role: KeyRole,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(default)]
    signatures: Vec<String>,
}

/// HTTP client for the signing service: `POST {signer_url}/sign`.
#[derive(Clone)]
pub struct RemoteSigner {
    api: ApiClient,
}

impl RemoteSigner {
    /// Connects to the service at `base_url` with an optional bearer token.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, SignerError> {
        // `join` drops the last path segment unless the base ends with a slash.
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let api = ApiClient::new(&base, token, timeout).map_err(|e| SignerError::Unavailable(e.to_string()))?;
        Ok(Self { api })
    }
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    async fn sign(&self, trx: &Transaction, chain_id: &str, role: KeyRole) -> Result<Vec<String>, SignerError> {
        let body = SignRequest {
            transaction: trx,
            chain_id,
            key_role: role,
        };
        let response = self
            .api
            .request::<SignResponse, _>(Method::POST, "sign", None, Some(body))
            .await
            .map_err(|e| SignerError::Unavailable(format!("{}: {e:#}", self.api.base_url())))?;

        if !response.success {
            return Err(SignerError::Rejected {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }

        match response.data {
            Some(SignResponse { signatures }) if !signatures.is_empty() => Ok(signatures),
            _ => Err(SignerError::NoSignatures),
        }
    }
}

/// Stand-in used when no signing service is configured. Monitoring keeps
/// working; every broadcast fails with `SignerError::NotConfigured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSigner;

#[async_trait]
impl TransactionSigner for NoSigner {
    async fn sign(&self, _trx: &Transaction, _chain_id: &str, _role: KeyRole) -> Result<Vec<String>, SignerError> {
        Err(SignerError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn unsigned() -> Transaction {
        Transaction {
            ref_block_num: 1,
            ref_block_prefix: 2,
            expiration: "2024-05-01T10:01:00".into(),
            operations: vec![],
            extensions: vec![],
            signatures: vec![],
        }
    }

    fn serve_once(body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            // The request body is small; read until the JSON object closes.
            while !String::from_utf8_lossy(&data).trim_end().ends_with('}') {
                let n = stream.read(&mut buf).expect("read");
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write");
            String::from_utf8_lossy(&data).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn test_remote_signer_posts_chain_id_and_role() {
        let (url, server) = serve_once(r#"{"signatures":["1f00ab"]}"#);
        let signer = RemoteSigner::new(&url, Some("tkn".into()), Duration::from_secs(5)).expect("signer");

        let sigs = signer
            .sign(&unsigned(), "beeab0de", KeyRole::Posting)
            .await
            .expect("signed");

        assert_eq!(sigs, vec!["1f00ab".to_string()]);
        let raw = server.join().expect("server");
        assert!(raw.starts_with("POST /sign"));
        assert!(raw.contains(r#""chain_id":"beeab0de""#));
        assert!(raw.contains(r#""key_role":"posting""#));
    }

    #[tokio::test]
    async fn test_empty_signature_list_is_an_error() {
        let (url, server) = serve_once(r#"{"signatures":[]}"#);
        let signer = RemoteSigner::new(&url, None, Duration::from_secs(5)).expect("signer");
        let err = signer.sign(&unsigned(), "x", KeyRole::Active).await.expect_err("no sigs");
        assert!(matches!(err, SignerError::NoSignatures));
        server.join().expect("server");
    }

    #[tokio::test]
    async fn test_no_signer_refuses() {
        let err = NoSigner.sign(&unsigned(), "x", KeyRole::Posting).await.expect_err("refused");
        assert!(matches!(err, SignerError::NotConfigured));
    }
}
