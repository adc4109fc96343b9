use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

const IMAGES_PREFIX: &str = "images/";
const DEFAULT_STORAGE_ENDPOINT: &str = "https://firebasestorage.googleapis.com/v0/";

/// Object key for a capture file: `images/<filename>`.
pub fn blob_key(filename: &str) -> String {
    format!("{}{}", IMAGES_PREFIX, filename)
}

/// Key-addressed object storage.
pub trait BlobStore: Send + Sync {
    /// Create or overwrite the object at `key` with the contents of `local`.
    fn put(&self, key: &str, local: &Path) -> Result<()>;

    /// Retrievable URL for an uploaded object.
    fn url(&self, key: &str) -> Result<String>;
}

fn content_type(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
        Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
            "image/jpeg"
        }
        _ => "application/octet-stream",
    }
}

// ----------------------------------------------------------------------------
// Filesystem
// ----------------------------------------------------------------------------

/// Blob store rooted in a local directory, e.g. a mounted share.
#[derive(Clone, Debug)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("create blob root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(anyhow!("invalid blob key '{}'", key));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, key: &str, local: &Path) -> Result<()> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create blob dir {}", parent.display()))?;
        }
        fs::copy(local, &dest).with_context(|| {
            format!("copy {} to {}", local.display(), dest.display())
        })?;
        Ok(())
    }

    fn url(&self, key: &str) -> Result<String> {
        let path = self.object_path(key)?;
        let path = path
            .canonicalize()
            .with_context(|| format!("blob {} not found", key))?;
        let url = Url::from_file_path(&path)
            .map_err(|_| anyhow!("cannot express {} as a url", path.display()))?;
        Ok(url.to_string())
    }
}

// ----------------------------------------------------------------------------
// Firebase Storage
// ----------------------------------------------------------------------------

/// Firebase Storage (Google Cloud Storage) REST blob store.
///
/// Upload: `POST <endpoint>/b/<bucket>/o?uploadType=media&name=<key>`.
/// The download URL is built from the object metadata's first download
/// token.
pub struct FirebaseBlobStore {
    agent: ureq::Agent,
    endpoint: Url,
    bucket: String,
    auth: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    #[serde(default)]
    download_tokens: Option<String>,
}

impl FirebaseBlobStore {
    pub fn new(bucket: &str, endpoint: Option<&str>, timeout: Duration) -> Result<Self> {
        if bucket.is_empty() {
            return Err(anyhow!("blob bucket must not be empty"));
        }
        let mut endpoint = endpoint.unwrap_or(DEFAULT_STORAGE_ENDPOINT).to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid blob endpoint {}", endpoint))?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            endpoint,
            bucket: bucket.to_string(),
            auth: None,
        })
    }

    /// Bearer token sent with every request.
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }

    fn objects_url(&self) -> Result<Url> {
        self.endpoint
            .join(&format!("b/{}/o", self.bucket))
            .context("build blob objects url")
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        let mut url = self.objects_url()?;
        // A single segment, so '/' in the key is percent-encoded.
        url.path_segments_mut()
            .map_err(|_| anyhow!("blob endpoint cannot be a base url"))?
            .push(key);
        Ok(url)
    }

    fn upload_url(&self, key: &str) -> Result<Url> {
        let mut url = self.objects_url()?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        match &self.auth {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    fn download_url(&self, key: &str, metadata: ObjectMetadata) -> Result<String> {
        let token = metadata
            .download_tokens
            .as_deref()
            .and_then(|t| t.split(',').next())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("object {} has no download token", key))?;
        let mut url = self.object_url(key)?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", token);
        Ok(url.to_string())
    }
}

impl BlobStore for FirebaseBlobStore {
    fn put(&self, key: &str, local: &Path) -> Result<()> {
        let bytes = fs::read(local).with_context(|| format!("read {}", local.display()))?;
        let url = self.upload_url(key)?;
        self.authorized(self.agent.post(url.as_str()))
            .set("Content-Type", content_type(key))
            .send_bytes(&bytes)
            .with_context(|| format!("upload {} to bucket {}", key, self.bucket))?;
        Ok(())
    }

    fn url(&self, key: &str) -> Result<String> {
        let url = self.object_url(key)?;
        let metadata: ObjectMetadata = self
            .authorized(self.agent.get(url.as_str()))
            .call()
            .with_context(|| format!("fetch metadata for {}", key))?
            .into_json()
            .context("decode object metadata")?;
        self.download_url(key, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(blob_key("1700000000000.png"), "images/1700000000000.png");
        assert_eq!(content_type("images/a.png"), "image/png");
        assert_eq!(content_type("images/a"), "application/octet-stream");
    }

    #[test]
    fn filesystem_put_then_url() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("local.png");
        fs::write(&local, b"png bytes")?;
        let store = FilesystemBlobStore::new(dir.path().join("blobs"))?;

        assert!(store.url("images/local.png").is_err());
        store.put("images/local.png", &local)?;
        let url = store.url("images/local.png")?;
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/blobs/images/local.png"));
        assert_eq!(fs::read(store.root().join("images/local.png"))?, b"png bytes");

        // put overwrites
        fs::write(&local, b"v2")?;
        store.put("images/local.png", &local)?;
        assert_eq!(fs::read(store.root().join("images/local.png"))?, b"v2");
        Ok(())
    }

    #[test]
    fn filesystem_rejects_escaping_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FilesystemBlobStore::new(dir.path())?;
        assert!(store.object_path("../etc/passwd").is_err());
        assert!(store.object_path("/abs").is_err());
        assert!(store.object_path("").is_err());
        Ok(())
    }

    #[test]
    fn firebase_urls() -> Result<()> {
        let store = FirebaseBlobStore::new("demo.appspot.com", None, Duration::from_secs(5))?;
        assert_eq!(
            store.upload_url("images/1.png")?.as_str(),
            "https://firebasestorage.googleapis.com/v0/b/demo.appspot.com/o?uploadType=media&name=images%2F1.png"
        );
        let url = store.download_url(
            "images/1.png",
            ObjectMetadata {
                download_tokens: Some("tok-1,tok-2".to_string()),
            },
        )?;
        assert_eq!(
            url,
            "https://firebasestorage.googleapis.com/v0/b/demo.appspot.com/o/images%2F1.png?alt=media&token=tok-1"
        );
        assert!(store
            .download_url("images/1.png", ObjectMetadata { download_tokens: None })
            .is_err());
        Ok(())
    }
}
