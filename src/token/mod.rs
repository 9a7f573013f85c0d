//! Short-lived access tokens for anonymous retrieval
//!
//! A browser `<img>` or PDF-viewer tag cannot carry bearer-auth headers, so
//! an authenticated actor mints a capability token for one file and the
//! preview surface presents it on an anonymous endpoint. Validity is purely
//! time-based: a token within its window may be redeemed any number of
//! times (a single preview session fetches the same resource repeatedly,
//! e.g. for range requests). The `used` column is persisted but never
//! consulted.

use crate::error::{Error, Result};
use crate::{MetadataRepository, TokenRepository};

use chrono::{DateTime, Duration, Utc};
use log::info;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A persisted access token row
///
/// The id is the bearer credential itself: a v4 uuid, 122 random bits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub id: Uuid,
    #[serde(rename = "fileId")]
    pub file_id: Uuid,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Token and expiry returned to the issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    #[serde(rename = "accessToken")]
    pub token: Uuid,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// Issues and redeems access tokens
#[derive(Debug)]
pub struct AccessTokenBroker {
    tokens: Arc<dyn TokenRepository>,
    metadata: Arc<dyn MetadataRepository>,
}

impl AccessTokenBroker {
    /// Creates a new AccessTokenBroker
    pub fn new(tokens: Arc<dyn TokenRepository>, metadata: Arc<dyn MetadataRepository>) -> Self {
        Self { tokens, metadata }
    }

    /// Mints a token for one file with a bounded lifetime
    ///
    /// The file must resolve to existing metadata. Zero or negative minutes
    /// produce a token that is already expired at issue time; issuing it is
    /// not an error, redeeming it is.
    pub async fn issue(
        &self,
        file_id: Uuid,
        expiration_minutes: i64,
        issuer: &str,
    ) -> Result<IssuedToken> {
        if self.metadata.find_by_id(file_id).await?.is_none() {
            return Err(Error::NotFound(format!("file {} does not exist", file_id)));
        }

        let now = Utc::now();
        let token = AccessToken {
            id: Uuid::new_v4(),
            file_id,
            created_by: issuer.to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(expiration_minutes),
            used: false,
        };
        self.tokens.insert(&token).await?;

        counter!("vault.token.issued", 1);
        info!(
            "issued access token for file {} expiring {}",
            file_id, token.expires_at
        );

        Ok(IssuedToken {
            token: token.id,
            expires_at: token.expires_at,
        })
    }

    /// Validates a presented token and returns the file id it grants
    ///
    /// Unparseable and unknown ids are both invalid-token failures; an
    /// expired token is reported distinctly. The row is not mutated.
    pub async fn redeem(&self, presented: &str) -> Result<Uuid> {
        counter!("vault.token.redeemed", 1);

        let id = Uuid::parse_str(presented)
            .map_err(|_| Error::InvalidToken("token id is malformed".to_string()))?;

        let token = self
            .tokens
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::InvalidToken("token does not exist".to_string()))?;

        if Utc::now() >= token.expires_at {
            return Err(Error::TokenExpired(format!(
                "token for file {} expired at {}",
                token.file_id, token.expires_at
            )));
        }

        Ok(token.file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileMetadata;
    use crate::repository::{InMemoryMetadataRepository, InMemoryTokenRepository};

    async fn broker_with_file() -> (AccessTokenBroker, Uuid) {
        let metadata = Arc::new(InMemoryMetadataRepository::new());
        let file_id = Uuid::new_v4();
        metadata
            .insert(&FileMetadata {
                id: file_id,
                file_name: "f.pdf".to_string(),
                display_name: "f".to_string(),
                storage_path: "/tmp/f".to_string(),
                size: 1,
                key_id: Uuid::new_v4(),
                tenant_area: "civil".to_string(),
                case_id: "case-1".to_string(),
                uploaded_by: "user-1".to_string(),
                uploaded_at: Utc::now(),
            })
            .await
            .expect("insert metadata");

        let broker = AccessTokenBroker::new(Arc::new(InMemoryTokenRepository::new()), metadata);
        (broker, file_id)
    }

    #[tokio::test]
    async fn test_issue_and_redeem() {
        let (broker, file_id) = broker_with_file().await;

        let issued = broker.issue(file_id, 60, "user-1").await.expect("issue");
        assert!(issued.expires_at > Utc::now());

        let redeemed = broker
            .redeem(&issued.token.to_string())
            .await
            .expect("redeem");
        assert_eq!(redeemed, file_id);

        // Validity is time-based; redemption does not consume the token
        let again = broker
            .redeem(&issued.token.to_string())
            .await
            .expect("redeem again");
        assert_eq!(again, file_id);
    }

    #[tokio::test]
    async fn test_issue_for_unknown_file() {
        let (broker, _) = broker_with_file().await;

        let err = broker
            .issue(Uuid::new_v4(), 60, "user-1")
            .await
            .expect_err("unknown file");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_minute_token_already_expired() {
        let (broker, file_id) = broker_with_file().await;

        let issued = broker.issue(file_id, 0, "user-1").await.expect("issue");
        let err = broker
            .redeem(&issued.token.to_string())
            .await
            .expect_err("expired at issue");
        assert!(matches!(err, Error::TokenExpired(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (broker, file_id) = broker_with_file().await;

        let issued = broker.issue(file_id, -1, "user-1").await.expect("issue");
        let err = broker
            .redeem(&issued.token.to_string())
            .await
            .expect_err("past expiry");
        assert!(matches!(err, Error::TokenExpired(_)));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tokens() {
        let (broker, _) = broker_with_file().await;

        let err = broker.redeem("not-a-uuid").await.expect_err("malformed");
        assert!(matches!(err, Error::InvalidToken(_)));

        let err = broker
            .redeem(&Uuid::new_v4().to_string())
            .await
            .expect_err("unknown");
        assert!(matches!(err, Error::InvalidToken(_)));
    }
}
