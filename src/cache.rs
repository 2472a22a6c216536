use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use hickory_proto::op::Message;
use tracing::debug;

/// Key for the process-wide response cache: the canonical textual form of the request's
/// question list, paired with the authority IP the request was sent to (spec §3, §4.2).
pub type CacheKey = (String, IpAddr);

/// Builds the canonical question-string half of a [`CacheKey`]: the space-joined textual
/// form of every question in the request (spec §4.2). There is only ever one question in
/// this resolver's requests, but the join keeps the contract general.
pub fn canonical_question_string(request: &Message) -> String {
    request
        .queries()
        .iter()
        .map(|q| format!("{} {:?} {:?}", q.name(), q.query_type(), q.query_class()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Process-wide, append-only cache of (question, authority) → response. Unbounded by
/// design (spec §9 open question: this is a known long-running-process leak, not a bug to
/// fix here). Shared across every UDP handler task behind an `Arc`, serialized by a mutex
/// around read-check-insert, mirroring the teacher's `Mutex<LruCache<..>>` pattern in
/// `cache.rs` without the LRU eviction this cache deliberately doesn't have.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, Message>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        ResponseCache { entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Message> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Last writer wins on a racing insert for the same key; spec §5 calls this acceptable
    /// because responses for a given key are interchangeable.
    pub fn insert(&self, key: CacheKey, response: Message) {
        debug!(question = %key.0, authority = %key.1, "caching response");
        self.entries.lock().unwrap().insert(key, response);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Per-query scratch cache of name → IP, learned from glue records observed while walking
/// delegations for one top-level `Resolve` call (spec §3, §4.1.3, §9). Created fresh per
/// call, discarded when the call returns; never shared across concurrent resolutions.
#[derive(Debug, Default)]
pub struct MicroCache {
    entries: HashMap<String, IpAddr>,
}

impl MicroCache {
    pub fn new() -> Self {
        MicroCache { entries: HashMap::new() }
    }

    pub fn insert(&mut self, normalized_name: String, ip: IpAddr) {
        self.entries.insert(normalized_name, ip);
    }

    pub fn get(&self, normalized_name: &str) -> Option<IpAddr> {
        self.entries.get(normalized_name).copied()
    }
}
