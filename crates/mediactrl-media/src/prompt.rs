//! Prompt cache and fetcher.
//!
//! At most one HTTP fetch is ever in flight per URI: the first caller to
//! ask for a URI installs a `Loading` placeholder and performs the fetch;
//! every concurrent caller for the same URI waits on that placeholder's
//! completion notification instead of issuing its own request. Fetching
//! prompt media over HTTP(S) is this stack's one external-collaborator
//! surface that still needs an HTTP client (SIP/SDP and RTP transport are
//! out of scope, but prompt audio genuinely arrives over HTTP).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::codec::codec_for_payload_type;
use crate::error::{Error, Result};
use crate::types::{payload_types, AudioFrame, FrameOwner, SAMPLES_PER_FRAME};

/// A fully fetched and decoded prompt clip, indexed into fixed-size frames
/// so the playback loop can advance through it one 20 ms tick at a time.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub uri: String,
    pub frames: Arc<Vec<AudioFrame>>,
}

impl Prompt {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&AudioFrame> {
        self.frames.get(index)
    }
}

enum CacheEntry {
    Loading(Arc<Notify>),
    Ready(Arc<Prompt>),
    Failed(String),
}

/// Shared across every IVR dialog; one instance per server process.
pub struct PromptCache {
    client: reqwest::Client,
    entries: DashMap<String, CacheEntry>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client with static config never fails to build"),
            entries: DashMap::new(),
        }
    }

    /// Fetch (or return the already-cached decoding of) the prompt at
    /// `uri`. Concurrent callers for the same `uri` coalesce onto the
    /// single in-flight fetch.
    pub async fn fetch(&self, uri: &str) -> Result<Arc<Prompt>> {
        loop {
            enum Lookup {
                Ready(Arc<Prompt>),
                Failed(Error),
                Loading(Arc<Notify>),
                Absent,
            }

            let lookup = match self.entries.get(uri) {
                Some(entry) => match entry.value() {
                    CacheEntry::Ready(prompt) => Lookup::Ready(prompt.clone()),
                    CacheEntry::Failed(reason) => Lookup::Failed(Error::PromptFetch {
                        uri: uri.to_string(),
                        reason: reason.clone(),
                    }),
                    CacheEntry::Loading(notify) => Lookup::Loading(notify.clone()),
                },
                None => Lookup::Absent,
            };

            match lookup {
                Lookup::Ready(prompt) => return Ok(prompt),
                Lookup::Failed(e) => return Err(e),
                Lookup::Loading(notify) => {
                    notify.notified().await;
                    continue;
                }
                Lookup::Absent => {}
            }

            // Nobody is fetching this URI yet (or the previous attempt
            // failed and we're retrying): try to become the fetcher.
            let my_notify = Arc::new(Notify::new());
            let inserted = self
                .entries
                .entry(uri.to_string())
                .or_insert_with(|| CacheEntry::Loading(my_notify.clone()));

            let am_fetcher = matches!(inserted.value(), CacheEntry::Loading(n) if Arc::ptr_eq(n, &my_notify));
            drop(inserted);

            if !am_fetcher {
                continue;
            }

            let result = self.do_fetch(uri).await;
            match &result {
                Ok(prompt) => {
                    self.entries
                        .insert(uri.to_string(), CacheEntry::Ready(prompt.clone()));
                }
                Err(e) => {
                    warn!(%uri, error = %e, "prompt fetch failed");
                    self.entries
                        .insert(uri.to_string(), CacheEntry::Failed(e.to_string()));
                }
            }
            my_notify.notify_waiters();
            return result;
        }
    }

    async fn do_fetch(&self, uri: &str) -> Result<Arc<Prompt>> {
        debug!(%uri, "fetching prompt");
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| Error::PromptFetch {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::PromptFetch {
                uri: uri.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body = response.bytes().await.map_err(|e| Error::PromptFetch {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        // Prompt media is fetched as PCMU-encoded bytes; decode and slice
        // into fixed 160-sample frames for the playback loop.
        let codec = codec_for_payload_type(payload_types::PCMU)?;
        let samples = codec.decode(&body)?;

        let frames = samples
            .chunks(SAMPLES_PER_FRAME)
            .map(|chunk| AudioFrame::new(chunk.to_vec(), 8000, FrameOwner::Prompt))
            .collect();

        Ok(Arc::new(Prompt {
            uri: uri.to_string(),
            frames: Arc::new(frames),
        }))
    }

    /// Number of URIs currently tracked (ready, loading or failed), for
    /// diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetching_an_unreachable_host_fails_and_caches_the_failure() {
        let cache = PromptCache::new();
        let err = cache.fetch("http://127.0.0.1:1/missing.ulaw").await;
        assert!(err.is_err());
        assert_eq!(cache.len(), 1);
    }
}
