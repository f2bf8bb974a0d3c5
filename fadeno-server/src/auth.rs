use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use fadeno_api::TokenClaims;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

/// Validates signed access/refresh credentials against the identity
/// service's public key. Stateless; revocation is handled separately by
/// [`RevocationRegistry`].
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(public_key_pem: &str) -> anyhow::Result<TokenVerifier> {
        let key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .context("parsing ES256 public key")?;
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_required_spec_claims(&["exp"]);
        Ok(TokenVerifier { key, validation })
    }

    /// Returns the claims iff the signature checks out, the token is not
    /// expired and the payload has the required shape.
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        jsonwebtoken::decode::<TokenClaims>(token, &self.key, &self.validation)
            .ok()
            .map(|data| data.claims)
    }

    pub fn is_valid(&self, token: &str) -> bool {
        self.verify(token).is_some()
    }
}

/// Process-wide map of sessions whose refresh credential has been
/// invalidated out-of-band: session id to the fingerprint of the refresh
/// token that must no longer authenticate.
///
/// Exactly one writer (the poller) replaces the map wholesale; request
/// paths only clone the current snapshot, so reads never wait on a
/// refresh in progress.
pub struct RevocationRegistry {
    map: parking_lot::RwLock<Arc<HashMap<String, String>>>,
}

impl RevocationRegistry {
    pub fn new() -> RevocationRegistry {
        RevocationRegistry {
            map: parking_lot::RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        self.map.read().clone()
    }

    pub fn replace(&self, map: HashMap<String, String>) {
        *self.map.write() = Arc::new(map);
    }

    /// A session is revoked iff the registry's entry for it equals the
    /// presented refresh fingerprint. No entry means the session is fine.
    pub fn is_revoked(&self, session_id: &str, refresh_fingerprint: &str) -> bool {
        self.snapshot()
            .get(session_id)
            .map_or(false, |fp| fp == refresh_fingerprint)
    }
}

/// Source of the full revocation map, normally the identity authority.
#[async_trait::async_trait]
pub trait RevocationFeed: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<HashMap<String, String>>;
}

pub struct HttpRevocationFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpRevocationFeed {
    pub fn new(url: String) -> HttpRevocationFeed {
        HttpRevocationFeed {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait::async_trait]
impl RevocationFeed for HttpRevocationFeed {
    async fn fetch(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self
            .client
            .get(&self.url)
            .send()
            .await
            .context("requesting revocation list")?
            .error_for_status()
            .context("revocation list request rejected")?
            .json()
            .await
            .context("decoding revocation list")?)
    }
}

pub async fn poll_once(
    registry: &RevocationRegistry,
    feed: &impl RevocationFeed,
) -> anyhow::Result<()> {
    registry.replace(feed.fetch().await.context("fetching revocation list")?);
    Ok(())
}

/// Wholesale-refreshes `registry` from `feed` every `period`. A failed
/// fetch keeps the previous snapshot.
pub async fn run_revocation_poller(
    registry: Arc<RevocationRegistry>,
    feed: impl RevocationFeed,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = poll_once(&registry, &feed).await {
            tracing::warn!(?err, "failed refreshing revocation registry");
        }
    }
}
