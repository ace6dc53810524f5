//! In-memory backend for tests.
//!
//! This provides an [`S3Backend`] backed by a `HashMap`, so workloads can be exercised without a
//! live endpoint. The backend is [`Clone`] so tests can hold a handle for direct inspection while
//! the workload owns another copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail, ensure};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use sha2::{Digest, Sha256};

use super::{
    BackendStream, ListedObject, ListedPart, ObjectHead, PendingUpload, ReadRange, S3Backend,
    UploadedPart,
};

#[derive(Debug, Default)]
struct Upload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct Bucket {
    objects: HashMap<String, (String, Bytes)>,
    uploads: HashMap<String, Upload>,
}

type Store = HashMap<String, Bucket>;

/// An [`S3Backend`] that keeps buckets, objects and uploads in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    corrupt_downloads: Arc<AtomicBool>,
    reject_bucket_deletes: Arc<AtomicBool>,
}

fn etag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips a byte in every downloaded object, simulating data corruption in the store.
    pub fn corrupt_downloads(&self, corrupt: bool) {
        self.corrupt_downloads.store(corrupt, Ordering::Relaxed);
    }

    /// Makes every `DeleteBucket` request fail, simulating a store that refuses teardown.
    pub fn reject_bucket_deletes(&self, reject: bool) {
        self.reject_bucket_deletes.store(reject, Ordering::Relaxed);
    }

    /// Returns the names of all existing buckets.
    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.store.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of objects stored in a bucket, or `None` if it does not exist.
    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        let store = self.store.lock().unwrap();
        store.get(bucket).map(|bucket| bucket.objects.len())
    }

    fn with_bucket<T>(&self, bucket: &str, f: impl FnOnce(&mut Bucket) -> Result<T>) -> Result<T> {
        let mut store = self.store.lock().unwrap();
        let entry = store
            .get_mut(bucket)
            .with_context(|| format!("NoSuchBucket: {bucket}"))?;
        f(entry)
    }
}

#[async_trait::async_trait]
impl S3Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        ensure!(
            !store.contains_key(bucket),
            "BucketAlreadyExists: {bucket}"
        );
        store.insert(bucket.to_owned(), Bucket::default());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<()> {
        ensure!(
            !self.reject_bucket_deletes.load(Ordering::Relaxed),
            "InternalError: cannot delete {bucket}"
        );
        let mut store = self.store.lock().unwrap();
        let entry = store
            .get(bucket)
            .with_context(|| format!("NoSuchBucket: {bucket}"))?;
        ensure!(
            force || (entry.objects.is_empty() && entry.uploads.is_empty()),
            "BucketNotEmpty: {bucket}"
        );
        store.remove(bucket);
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.with_bucket(bucket, |_| Ok(()))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(self.bucket_names())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ListedObject>> {
        self.with_bucket(bucket, |entry| {
            let mut objects: Vec<_> = entry
                .objects
                .iter()
                .map(|(key, (_, body))| ListedObject {
                    key: key.clone(),
                    size: body.len() as u64,
                })
                .collect();
            objects.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(objects)
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<String> {
        self.with_bucket(bucket, |entry| {
            let etag = etag(&body);
            entry.objects.insert(key.to_owned(), (etag.clone(), body));
            Ok(etag)
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ReadRange>,
    ) -> Result<BackendStream> {
        let mut body = self.with_bucket(bucket, |entry| {
            let (_, body) = entry
                .objects
                .get(key)
                .with_context(|| format!("NoSuchKey: {key}"))?;
            Ok(body.clone())
        })?;

        if let Some(ReadRange { start, end }) = range {
            let len = body.len() as u64;
            ensure!(start < len && start <= end, "InvalidRange: {start}-{end}");
            let end = end.min(len - 1);
            body = body.slice(start as usize..=end as usize);
        }

        if self.corrupt_downloads.load(Ordering::Relaxed) && !body.is_empty() {
            let mut corrupted = BytesMut::from(&body[..]);
            corrupted[0] ^= 0xff;
            body = corrupted.freeze();
        }

        Ok(futures::stream::once(async move { Ok(body) }).boxed())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        self.with_bucket(bucket, |entry| {
            let (etag, body) = entry
                .objects
                .get(key)
                .with_context(|| format!("NoSuchKey: {key}"))?;
            Ok(ObjectHead {
                content_length: body.len() as u64,
                etag: Some(etag.clone()),
            })
        })
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        self.with_bucket(bucket, |entry| {
            let upload_id = uuid::Uuid::new_v4().simple().to_string();
            let upload = Upload {
                key: key.to_owned(),
                parts: BTreeMap::new(),
            };
            entry.uploads.insert(upload_id.clone(), upload);
            Ok(upload_id)
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String> {
        self.with_bucket(bucket, |entry| {
            let upload = entry
                .uploads
                .get_mut(upload_id)
                .with_context(|| format!("NoSuchUpload: {upload_id}"))?;
            let etag = etag(&body);
            upload.parts.insert(part_number, (etag.clone(), body));
            Ok(etag)
        })
    }

    async fn upload_part_copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String> {
        let body = self.with_bucket(source_bucket, |entry| {
            let (_, body) = entry
                .objects
                .get(source_key)
                .with_context(|| format!("NoSuchKey: {source_key}"))?;
            Ok(body.clone())
        })?;

        self.upload_part(bucket, key, upload_id, part_number, body)
            .await
    }

    async fn list_parts(
        &self,
        bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>> {
        self.with_bucket(bucket, |entry| {
            let upload = entry
                .uploads
                .get(upload_id)
                .with_context(|| format!("NoSuchUpload: {upload_id}"))?;
            Ok(upload
                .parts
                .iter()
                .map(|(part_number, (etag, body))| ListedPart {
                    part_number: *part_number,
                    etag: etag.clone(),
                    size: body.len() as u64,
                })
                .collect())
        })
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<PendingUpload>> {
        self.with_bucket(bucket, |entry| {
            Ok(entry
                .uploads
                .iter()
                .map(|(upload_id, upload)| PendingUpload {
                    key: upload.key.clone(),
                    upload_id: upload_id.clone(),
                })
                .collect())
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        self.with_bucket(bucket, |entry| {
            let upload = entry
                .uploads
                .remove(upload_id)
                .with_context(|| format!("NoSuchUpload: {upload_id}"))?;
            ensure!(upload.key == key, "upload {upload_id} belongs to {}", upload.key);

            let mut body = BytesMut::new();
            let mut previous = 0;
            for part in parts {
                ensure!(part.part_number > previous, "InvalidPartOrder");
                previous = part.part_number;

                let Some((etag, bytes)) = upload.parts.get(&part.part_number) else {
                    bail!("InvalidPart: {}", part.part_number);
                };
                ensure!(*etag == part.etag, "InvalidPart: ETag mismatch");
                body.extend_from_slice(bytes);
            }

            let body = body.freeze();
            let etag = format!("\"{}-{}\"", etag(&body).trim_matches('"'), parts.len());
            entry.objects.insert(key.to_owned(), (etag, body));
            Ok(())
        })
    }
}
