//! Process-wide content-addressed cache of decoded, resized RGBA buffers.
//!
//! The store is process-wide by convention but injected explicitly, so tests
//! construct their own instances. Records are immutable after creation and
//! shared out as `Arc`s; an outstanding `Arc` pins its record against LRU
//! eviction.

use crate::codec::{DecodedImage, ImageCodec};
use crate::error::{BlueprintError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of cached records before LRU eviction kicks in.
    pub capacity: usize,
    /// Absolute dimension cap; decoded images beyond it are rejected
    /// before any resize.
    pub hard_max_dim: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            hard_max_dim: 8192,
        }
    }
}

/// A decoded working image. Never mutated after creation.
#[derive(Debug)]
pub struct ImageRecord {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub created_at: SystemTime,
}

struct StoreEntry {
    record: Arc<ImageRecord>,
    last_used: u64,
}

struct StoreInner {
    entries: HashMap<String, StoreEntry>,
    tick: u64,
}

pub struct ImageStore {
    codec: Arc<dyn ImageCodec>,
    config: StoreConfig,
    inner: Mutex<StoreInner>,
}

impl ImageStore {
    pub fn new(codec: Arc<dyn ImageCodec>, config: StoreConfig) -> Self {
        Self {
            codec,
            config,
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Register raw container bytes, decoding and resizing on first sight.
    ///
    /// The id is a content hash over `(bytes, max_dim)`, so re-registering
    /// identical input returns the existing record without decoding again.
    pub fn register(&self, bytes: &[u8], max_dim: u32) -> Result<String> {
        if max_dim == 0 {
            return Err(BlueprintError::invalid_parameter(
                "max_dim",
                "must be at least 1",
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.update(max_dim.to_le_bytes());
        let id = format!("{:x}", hasher.finalize());

        if self.touch(&id) {
            return Ok(id);
        }

        let decoded = self.codec.decode(bytes)?;
        self.admit(id, decoded, max_dim)
    }

    /// Register an already-decoded RGBA buffer.
    pub fn register_decoded(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        max_dim: u32,
    ) -> Result<String> {
        if max_dim == 0 {
            return Err(BlueprintError::invalid_parameter(
                "max_dim",
                "must be at least 1",
            ));
        }
        if rgba.len() != width as usize * height as usize * 4 || width == 0 || height == 0 {
            return Err(BlueprintError::InvalidImage(format!(
                "RGBA buffer of {} bytes does not match {}x{}",
                rgba.len(),
                width,
                height
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(rgba);
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());
        hasher.update(max_dim.to_le_bytes());
        let id = format!("{:x}", hasher.finalize());

        if self.touch(&id) {
            return Ok(id);
        }

        let decoded = DecodedImage {
            rgba: rgba.to_vec(),
            width,
            height,
        };
        self.admit(id, decoded, max_dim)
    }

    /// Fetch a record, pinning it for the caller's lifetime of use.
    pub fn get(&self, id: &str) -> Result<Arc<ImageRecord>> {
        let mut inner = self.inner.lock().expect("image store poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| BlueprintError::UnknownImage(id.to_string()))?;
        entry.last_used = tick;
        Ok(Arc::clone(&entry.record))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("image store poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bump LRU state if the id is present.
    fn touch(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("image store poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        match inner.entries.get_mut(id) {
            Some(entry) => {
                entry.last_used = tick;
                true
            }
            None => false,
        }
    }

    fn admit(&self, id: String, decoded: DecodedImage, max_dim: u32) -> Result<String> {
        let cap = self.config.hard_max_dim;
        if decoded.width.max(decoded.height) > cap {
            return Err(BlueprintError::ImageTooLarge {
                width: decoded.width,
                height: decoded.height,
                cap,
            });
        }

        let working = self
            .codec
            .resize(&decoded.rgba, decoded.width, decoded.height, max_dim)?;
        log::debug!(
            "image store: admitting {} as {}x{} (decoded {}x{}, max_dim {})",
            &id[..12.min(id.len())],
            working.width,
            working.height,
            decoded.width,
            decoded.height,
            max_dim
        );

        let record = Arc::new(ImageRecord {
            id: id.clone(),
            width: working.width,
            height: working.height,
            rgba: working.rgba,
            created_at: SystemTime::now(),
        });

        let mut inner = self.inner.lock().expect("image store poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        // A racing registration may have admitted the same content already.
        inner
            .entries
            .entry(id.clone())
            .and_modify(|e| e.last_used = tick)
            .or_insert(StoreEntry { record, last_used: tick });
        Self::evict_lru(&mut inner, self.config.capacity);
        Ok(id)
    }

    /// Drop least-recently-used unpinned entries until within capacity.
    fn evict_lru(inner: &mut StoreInner, capacity: usize) {
        while inner.entries.len() > capacity {
            let victim = inner
                .entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.record) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => {
                    inner.entries.remove(&id);
                }
                // Everything is pinned by in-flight computations.
                None => break,
            }
        }
    }
}
