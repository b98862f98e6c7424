use super::{
    ByteStream, GetOutput, ObjectStore, ObjectStoreError, ObjectStoreResult, PutOutput,
    collect_limited,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// `FakeObjectStore` is an in-memory implementation of `ObjectStore` for tests.
/// Each operation can be switched to fail, and every call is counted so tests
/// can assert which tiers were touched.
#[derive(Clone)]
pub struct FakeObjectStore {
    objects: Arc<Mutex<HashMap<String, (Bytes, String)>>>,
    fail_put: Arc<AtomicBool>,
    fail_get: Arc<AtomicBool>,
    fail_presign: Arc<AtomicBool>,
    put_delay: Arc<Mutex<Option<Duration>>>,
    puts: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
    presigns: Arc<AtomicUsize>,
    max_bytes: u64,
}

impl FakeObjectStore {
    pub fn new(max_bytes: u64) -> Self {
        FakeObjectStore {
            objects: Arc::new(Mutex::new(HashMap::new())),
            fail_put: Arc::new(AtomicBool::new(false)),
            fail_get: Arc::new(AtomicBool::new(false)),
            fail_presign: Arc::new(AtomicBool::new(false)),
            put_delay: Arc::new(Mutex::new(None)),
            puts: Arc::new(AtomicUsize::new(0)),
            gets: Arc::new(AtomicUsize::new(0)),
            presigns: Arc::new(AtomicUsize::new(0)),
            max_bytes,
        }
    }

    /// Seed an object directly, bypassing `put` and its counter.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, content_type: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.into(), content_type.to_string()));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(data, _)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn fake_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fake_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fake_fail_presign(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `put` sleep before storing.
    pub fn fake_delay_put(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn presign_calls(&self) -> usize {
        self.presigns.load(Ordering::SeqCst)
    }

    /// Total calls across all operations.
    pub fn calls(&self) -> usize {
        self.put_calls() + self.get_calls() + self.presign_calls()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        content_type: &str,
    ) -> ObjectStoreResult<PutOutput> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend(format!(
                "Simulated put failure for {}",
                key
            )));
        }

        let data = collect_limited(body, self.max_bytes).await?;
        let size = data.len() as u64;
        self.insert(key, data, content_type);
        Ok(PutOutput {
            url: format!("https://cdn.test/{key}"),
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<GetOutput> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend(format!(
                "Simulated get failure for {}",
                key
            )));
        }

        let (data, content_type) = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        let length = data.len() as u64;
        Ok(GetOutput {
            body: futures::stream::once(async move { Ok(data) }).boxed(),
            content_type: Some(content_type),
            length: Some(length),
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> ObjectStoreResult<String> {
        self.presigns.fetch_add(1, Ordering::SeqCst);
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend(format!(
                "Simulated presign failure for {}",
                key
            )));
        }
        Ok(format!("https://store.test/{}?expires={}", key, ttl.as_secs()))
    }

    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}
