//! Firebase Realtime Database style REST record store.
//!
//! - push:   `POST <db>/images.json` answers `{"name": "<push id>"}`
//! - patch:  `PATCH <db>/images/<id>.json`
//! - read:   `GET <db>/images/<id>.json`, `GET <db>/images.json`

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use super::{ensure_mutable, DetectionRecord, RecordId, RecordStore, COLLECTION};

pub struct FirebaseRecordStore {
    agent: ureq::Agent,
    base: Url,
    auth: Option<String>,
}

#[derive(Deserialize)]
struct PushReply {
    name: String,
}

impl FirebaseRecordStore {
    pub fn new(database_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = database_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .with_context(|| format!("invalid records url {}", database_url))?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            base,
            auth: None,
        })
    }

    /// Database secret or ID token passed as the `auth` query parameter.
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self
            .base
            .join(path)
            .with_context(|| format!("build records url for {}", path))?;
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    fn collection_url(&self) -> Result<Url> {
        self.endpoint(&format!("{}.json", COLLECTION))
    }

    fn record_url(&self, id: &RecordId) -> Result<Url> {
        if id.as_str().is_empty() || id.as_str().contains(['/', '.', '#', '$', '[', ']']) {
            return Err(anyhow!("invalid record id '{}'", id));
        }
        self.endpoint(&format!("{}/{}.json", COLLECTION, id))
    }
}

impl RecordStore for FirebaseRecordStore {
    fn push(&self, record: &DetectionRecord) -> Result<RecordId> {
        let url = self.collection_url()?;
        let reply: PushReply = self
            .agent
            .post(url.as_str())
            .send_json(record)
            .context("push record")?
            .into_json()
            .context("decode push reply")?;
        Ok(RecordId::new(reply.name))
    }

    fn set_field(&self, id: &RecordId, field: &str, value: &str) -> Result<()> {
        ensure_mutable(field)?;
        // PATCH would create a stub record for an unknown id.
        if self.get(id)?.is_none() {
            return Err(anyhow!("record {} not found", id));
        }
        let url = self.record_url(id)?;
        let mut body = serde_json::Map::new();
        body.insert(field.to_string(), serde_json::Value::from(value));
        self.agent
            .request("PATCH", url.as_str())
            .send_json(serde_json::Value::Object(body))
            .with_context(|| format!("update {} of record {}", field, id))?;
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<DetectionRecord>> {
        let url = self.record_url(id)?;
        self.agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("read record {}", id))?
            .into_json()
            .with_context(|| format!("decode record {}", id))
    }

    fn list(&self) -> Result<Vec<(RecordId, DetectionRecord)>> {
        let url = self.collection_url()?;
        let records: Option<BTreeMap<String, DetectionRecord>> = self
            .agent
            .get(url.as_str())
            .call()
            .context("list records")?
            .into_json()
            .context("decode record list")?;
        Ok(records
            .unwrap_or_default()
            .into_iter()
            .map(|(id, record)| (RecordId::new(id), record))
            .collect())
    }
}
