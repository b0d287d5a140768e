use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use concierge_core::domain::conversation::ConversationId;
use concierge_core::domain::response::ResponseResult;

/// Hex digits of the message digest kept in the key (128 bits).
const DIGEST_HEX_CHARS: usize = 32;

/// Conversation id plus a truncated BLAKE3 digest of the exact message text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(conversation_id: &ConversationId, message: &str) -> Self {
        let digest = blake3::hash(message.as_bytes()).to_hex();
        Self(format!("{}:{}", conversation_id, &digest.as_str()[..DIGEST_HEX_CHARS]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type SharedResult = Shared<BoxFuture<'static, ResponseResult>>;
type InFlightMap = Arc<Mutex<HashMap<DedupKey, InFlight>>>;

struct InFlight {
    id: u64,
    result: SharedResult,
}

/// Collapses concurrent identical requests onto one pipeline run.
///
/// The first caller for a key starts the work on its own task so it finishes even if that
/// caller goes away; later callers await the same shared result. The entry is removed as
/// soon as the work completes, whatever its outcome.
#[derive(Default)]
pub struct RequestDeduplicator {
    in_flight: InFlightMap,
    next_id: AtomicU64,
}

/// Removes its entry on drop, but only if the slot still belongs to the same run.
struct EntryGuard {
    in_flight: InFlightMap,
    key: DedupKey,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&self.key).map(|entry| entry.id) == Some(self.id) {
            in_flight.remove(&self.key);
        }
    }
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn run<F>(&self, key: DedupKey, work: F) -> ResponseResult
    where
        F: Future<Output = ResponseResult> + Send + 'static,
    {
        let (result, leader) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&key) {
                Some(entry) => (entry.result.clone(), false),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let guard = EntryGuard { in_flight: self.in_flight.clone(), key: key.clone(), id };
                    let shared = async move {
                        let _guard = guard;
                        work.await
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), InFlight { id, result: shared.clone() });
                    (shared, true)
                }
            }
        };

        if leader {
            tokio::spawn(result.clone());
        } else {
            debug!(event_name = "dedup.joined", dedup_key = %key, "joined in-flight request");
        }

        result.await
    }
}
