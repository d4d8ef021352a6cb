//! The payload put onto and taken off the job queue

use std::collections::BTreeMap;

use granary_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One job execution request: which job to run, against which batch.
///
/// Field order and the sorted batch map give a canonical encoding, so two
/// equal payloads always serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub batch: BTreeMap<String, Value>,
    pub job_id: String,
    /// Missing or null on the wire decodes to `None`
    #[serde(default)]
    pub uuid: Option<Uuid>,
}

impl Payload {
    /// Build a payload with a fresh uuid.
    pub fn new(job_id: impl Into<String>, batch: BTreeMap<String, Value>) -> Self {
        Self {
            batch,
            job_id: job_id.into(),
            uuid: Some(Uuid::new_v4()),
        }
    }

    pub fn with_uuid(
        job_id: impl Into<String>,
        batch: BTreeMap<String, Value>,
        uuid: Option<Uuid>,
    ) -> Self {
        Self {
            batch,
            job_id: job_id.into(),
            uuid,
        }
    }

    /// Encode for storage in a queue.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload popped off a queue.
    pub fn decode(encoded: &str) -> Result<Self> {
        Ok(serde_json::from_str(encoded)?)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let uuid = self
            .uuid
            .map(|u| u.to_string())
            .unwrap_or_default();
        write!(
            f,
            "Payload<uuid={}, job_id={}, batch={}>",
            uuid,
            self.job_id,
            serde_json::to_string(&self.batch).unwrap_or_else(|_| "{}".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("foo".to_string(), json!("abc")),
            ("bar".to_string(), json!("xyz")),
        ])
    }

    const ENCODED: &str = "{\"batch\":{\"bar\":\"xyz\",\"foo\":\"abc\"},\"job_id\":\"orgs_load\",\"uuid\":\"baab7aea-39dd-4fdf-b6cd-6ec33a3dad38\"}";

    #[test]
    fn test_new_creates_a_uuid() {
        let payload = Payload::new("orgs_load", batch());
        assert!(payload.uuid.is_some());
    }

    #[test]
    fn test_encode_is_canonical() {
        let uuid = "baab7aea-39dd-4fdf-b6cd-6ec33a3dad38".parse().unwrap();
        let payload = Payload::with_uuid("orgs_load", batch(), Some(uuid));
        assert_eq!(payload.encode().unwrap(), ENCODED);
    }

    #[test]
    fn test_decode_round_trips() {
        let payload = Payload::decode(ENCODED).unwrap();
        assert_eq!(payload.job_id, "orgs_load");
        assert_eq!(payload.batch, batch());
        assert_eq!(
            payload.uuid.unwrap().to_string(),
            "baab7aea-39dd-4fdf-b6cd-6ec33a3dad38"
        );
        assert_eq!(
            payload.to_string(),
            "Payload<uuid=baab7aea-39dd-4fdf-b6cd-6ec33a3dad38, job_id=orgs_load, batch={\"bar\":\"xyz\",\"foo\":\"abc\"}>"
        );
    }

    #[test]
    fn test_decode_with_null_uuid() {
        let encoded = "{\"batch\":{\"bar\":\"xyz\",\"foo\":\"abc\"},\"job_id\":\"orgs_load\",\"uuid\":null}";
        let payload = Payload::decode(encoded).unwrap();
        assert_eq!(payload.job_id, "orgs_load");
        assert!(payload.uuid.is_none());
        assert!(payload.to_string().starts_with("Payload<uuid=, job_id=orgs_load"));
    }

    #[test]
    fn test_decode_without_uuid() {
        let encoded = "{\"batch\":{\"bar\":\"xyz\",\"foo\":\"abc\"},\"job_id\":\"orgs_load\"}";
        let payload = Payload::decode(encoded).unwrap();
        assert_eq!(payload.batch, batch());
        assert!(payload.uuid.is_none());
    }

    #[test]
    fn test_encode_decode_identity() {
        let payload = Payload::new("nightly", batch());
        let decoded = Payload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }
}
