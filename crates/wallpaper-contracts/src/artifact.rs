use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A generated image that was saved to the gallery.
///
/// `image_data` is base64 text and is opaque here: nothing in this crate decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub image_data: String,
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Only the gallery store mints artifacts, so identity and timestamp are never
    /// caller-supplied.
    pub(crate) fn mint(
        prompt: String,
        negative_prompt: Option<String>,
        image_data: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            negative_prompt,
            image_data,
            created_at: truncate_to_persisted(created_at),
        }
    }

    /// First eight characters of the id, used for download file names.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => self.id.as_str(),
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Timestamps are persisted at microsecond resolution.
pub fn truncate_to_persisted(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::Artifact;

    #[test]
    fn absent_negative_prompt_is_not_serialized() -> anyhow::Result<()> {
        let artifact = Artifact::mint(
            "cat".to_string(),
            None,
            "Zm9v".to_string(),
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        );
        let value = serde_json::to_value(&artifact)?;
        assert!(value.get("negativePrompt").is_none());
        assert_eq!(value["imageData"], json!("Zm9v"));
        assert_eq!(value["createdAt"], json!("2025-03-01T12:00:00.000000+00:00"));
        Ok(())
    }

    #[test]
    fn empty_negative_prompt_survives_as_empty_string() -> anyhow::Result<()> {
        let artifact = Artifact::mint(
            "cat".to_string(),
            Some(String::new()),
            "Zm9v".to_string(),
            Utc::now(),
        );
        let raw = serde_json::to_string(&artifact)?;
        let back: Artifact = serde_json::from_str(&raw)?;
        assert_eq!(back.negative_prompt, Some(String::new()));
        Ok(())
    }

    #[test]
    fn created_at_parses_back_into_a_timestamp() -> anyhow::Result<()> {
        let raw = json!({
            "id": "0b0e2c4e-1111-4222-8333-944455556666",
            "prompt": "dunes",
            "imageData": "Zm9v",
            "createdAt": "2024-11-05T08:15:30.250Z",
        });
        let artifact: Artifact = serde_json::from_value(raw)?;
        assert_eq!(
            artifact.created_at,
            Utc.with_ymd_and_hms(2024, 11, 5, 8, 15, 30).unwrap()
                + chrono::Duration::milliseconds(250)
        );
        assert_eq!(artifact.short_id(), "0b0e2c4e");
        Ok(())
    }

    #[test]
    fn malformed_created_at_is_rejected() {
        let raw: Value = json!({
            "id": "x",
            "prompt": "dunes",
            "imageData": "Zm9v",
            "createdAt": "yesterday",
        });
        assert!(serde_json::from_value::<Artifact>(raw).is_err());
    }

    #[test]
    fn minted_timestamps_are_truncated_to_micros() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(1_234_567);
        let artifact = Artifact::mint("x".to_string(), None, "Zm9v".to_string(), ts);
        assert_eq!(artifact.created_at.timestamp_subsec_nanos(), 1_234_000);
    }
}
