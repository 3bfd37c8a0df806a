// Scryfall card image lookup.
//
// Display-only enrichment for API responses: reservation logic never depends
// on it, and any failure degrades to a card without an image rather than a
// failed request. Successful lookups are cached in memory since card art
// never changes mid-draft.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ScryfallConfig;

const SCRYFALL_API_BASE: &str = "https://api.scryfall.com";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Subset of Scryfall's card object: just the image URIs, which for
/// double-faced cards live on the first face instead of the top level.
#[derive(Debug, Deserialize)]
struct ScryfallCard {
    #[serde(default)]
    image_uris: Option<ImageUris>,
    #[serde(default)]
    card_faces: Vec<CardFace>,
}

#[derive(Debug, Deserialize)]
struct CardFace {
    #[serde(default)]
    image_uris: Option<ImageUris>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageUris {
    normal: Option<String>,
    large: Option<String>,
    small: Option<String>,
}

impl ScryfallCard {
    /// Best available image URL: normal, then large, then small, checking
    /// the first card face when the top level has none.
    fn image_url(self) -> Option<String> {
        let uris = self
            .image_uris
            .or_else(|| self.card_faces.into_iter().next().and_then(|f| f.image_uris))?;
        uris.normal.or(uris.large).or(uris.small)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ScryfallClient {
    http: reqwest::Client,
    base_url: String,
    attempts: u32,
    backoff: Duration,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl ScryfallClient {
    pub fn new(config: &ScryfallConfig) -> Self {
        Self::with_base_url(config, SCRYFALL_API_BASE)
    }

    /// Constructor with an overridable API base URL; tests point this at a
    /// local stub server.
    pub fn with_base_url(config: &ScryfallConfig, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            attempts: config.attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the image URL for a card by exact name. Returns `None` on any
    /// failure; negative results are cached too so a missing card does not
    /// hammer the API on every roll.
    pub async fn image_url(&self, card_name: &str) -> Option<String> {
        if let Some(cached) = self.cache.lock().await.get(card_name) {
            return cached.clone();
        }

        let result = self.fetch_image_url(card_name).await;
        self.cache
            .lock()
            .await
            .insert(card_name.to_string(), result.clone());
        result
    }

    async fn fetch_image_url(&self, card_name: &str) -> Option<String> {
        let url = format!("{}/cards/named", self.base_url);
        let mut delay = self.backoff;

        for attempt in 1..=self.attempts {
            match self
                .http
                .get(&url)
                .query(&[("exact", card_name)])
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<ScryfallCard>().await {
                            Ok(card) => return card.image_url(),
                            Err(e) => {
                                warn!(card = card_name, "malformed scryfall response: {e}");
                                return None;
                            }
                        }
                    }
                    // 404 means no such card; only rate limits and server
                    // errors are worth another attempt.
                    if status.as_u16() != 429 && !status.is_server_error() {
                        debug!(card = card_name, %status, "scryfall lookup failed");
                        return None;
                    }
                    warn!(card = card_name, %status, attempt, "scryfall lookup failed, retrying");
                }
                Err(e) => {
                    warn!(card = card_name, attempt, "scryfall request error: {e}");
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        None
    }
}
