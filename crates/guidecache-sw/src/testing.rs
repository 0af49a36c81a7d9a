//! In-memory network for tests and dry runs.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};

use crate::fetch::{cache_key, FetchRequest, FetchResponse, Fetcher};
use crate::FetchError;

#[derive(Debug)]
struct Script {
    routes: HashMap<String, FetchResponse>,
    failing: HashSet<String>,
    online: bool,
    calls: Vec<String>,
}

/// A [`Fetcher`] answering from a fixed routing table.
///
/// Unknown URLs answer `404 Not Found`. While offline, or for URLs marked
/// with [`ScriptedFetcher::fail`], every fetch errors.
#[derive(Debug)]
pub struct ScriptedFetcher {
    script: Mutex<Script>,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script {
                routes: HashMap::new(),
                failing: HashSet::new(),
                online: true,
                calls: Vec::new(),
            }),
        }
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`, replacing any previous route.
    pub fn route(&self, url: &str, response: FetchResponse) {
        self.lock().routes.insert(url.to_string(), response);
    }

    /// Answer `url` with a `200 OK` text body.
    pub fn route_text(&self, url: &str, body: &str) {
        self.route(url, FetchResponse::ok(body));
    }

    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Make fetches of `url` error even while online.
    pub fn fail(&self, url: &str) {
        self.lock().failing.insert(url.to_string());
    }

    /// Every URL fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == url).count()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let key = cache_key(&request.url);
        let mut script = self.lock();
        script.calls.push(key.clone());

        if !script.online || script.failing.contains(&key) {
            return Err(FetchError::Network(format!("{key}: connection refused")));
        }
        Ok(script
            .routes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| FetchResponse::new(404, "Not Found", "")))
    }
}
