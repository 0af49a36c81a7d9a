//! A fetcher that can be cut off, to exercise the offline paths against a
//! live origin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use guidecache_sw::{FetchError, FetchRequest, FetchResponse, Fetcher};

pub struct Switchable {
    inner: Arc<dyn Fetcher>,
    online: AtomicBool,
}

impl Switchable {
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self {
            inner,
            online: AtomicBool::new(true),
        }
    }

    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for Switchable {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Network("offline".to_string()));
        }
        self.inner.fetch(request).await
    }
}
