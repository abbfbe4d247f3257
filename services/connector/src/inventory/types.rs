//! Attack Surface Inventory API Types

use serde::{Deserialize, Deserializer, Serialize};

use crate::connector::types::ResourceKind;

/// Response of `GET /auth/state`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthState {
    pub authenticated: bool,
}

/// A scan, the unit of scope that owns seeds
#[derive(Debug, Clone, Deserialize)]
pub struct Scan {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A seed registered against a scan
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Seed {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
}

impl Seed {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Body of `POST /scans/{id}/seeds`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSeedRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub tags: Vec<String>,
}

/// Graph node returned for a created seed
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Tags arrive either as plain names or as expanded tag objects
#[derive(Deserialize)]
#[serde(untagged)]
enum TagRepr {
    Name(String),
    Object { name: String },
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags: Option<Vec<TagRepr>> = Option::deserialize(deserializer)?;
    Ok(tags
        .unwrap_or_default()
        .into_iter()
        .map(|t| match t {
            TagRepr::Name(name) | TagRepr::Object { name } => name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_tags_plain_and_expanded() {
        let seeds: Vec<Seed> = serde_json::from_str(
            r#"[
                {"id": "1", "name": "a.com", "tags": ["cloud-connector"]},
                {"id": "2", "name": "b.com", "tags": [{"id": "t1", "name": "manual"}]},
                {"id": "3", "name": "c.com", "tags": null},
                {"id": "4", "name": "d.com"}
            ]"#,
        )
        .unwrap();

        assert!(seeds[0].has_tag("cloud-connector"));
        assert_eq!(seeds[1].tags, vec!["manual"]);
        assert!(seeds[2].tags.is_empty());
        assert!(seeds[3].tags.is_empty());
    }

    #[test]
    fn test_create_request_serialization() {
        let request = CreateSeedRequest {
            name: "10.0.0.1".to_string(),
            kind: ResourceKind::Ipv4,
            tags: vec!["cloud-connector".to_string()],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"IPv4\""));
        assert!(json.contains("\"name\":\"10.0.0.1\""));
        assert!(json.contains("\"tags\":[\"cloud-connector\"]"));
    }
}
