//! Entity type and cross-strategy normalization/dedup (§3 DATA MODEL, §4.4).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EntityType {
    Company,
    Person,
    Product,
    Article,
    Contact,
    Pricing,
    Custom,
}

impl EntityType {
    /// Unknown type strings normalize to `Custom` (§3 invariant).
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "company" => Self::Company,
            "person" => Self::Person,
            "product" => Self::Product,
            "article" => Self::Article,
            "contact" => Self::Contact,
            "pricing" => Self::Pricing,
            _ => Self::Custom,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub data: Value,
    pub confidence: f64,
    pub source: String,
}

impl Entity {
    #[must_use]
    pub fn new(entity_type: EntityType, data: Value, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            entity_type,
            data,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }

    /// `{type}:{canonical_json(data)}` — the cross-strategy dedup key (§4.4).
    pub fn dedup_key(&self) -> String {
        format!("{:?}:{}", self.entity_type, canonical_json(&self.data))
    }
}

/// Serializes `value` with object keys sorted, so two semantically equal
/// JSON payloads with differently-ordered keys dedup to the same string.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .iter()
                .map(|(k, v)| format!("{k:?}:{}", canonical_json(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

/// Remove entities whose `dedup_key()` has already been seen, preserving
/// the order of first occurrence, and cap the result at `max_entities`.
pub fn dedup_and_cap(entities: Vec<Entity>, max_entities: usize) -> Vec<Entity> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for entity in entities {
        let key = entity.dedup_key();
        if seen.insert(key) {
            out.push(entity);
            if out.len() >= max_entities {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_type_string_normalizes_to_custom() {
        assert_eq!(EntityType::parse("widget"), EntityType::Custom);
        assert_eq!(EntityType::parse("Company"), EntityType::Company);
    }

    #[test]
    fn dedup_key_ignores_object_key_order() {
        let a = Entity::new(EntityType::Contact, json!({"email": "a@b.com", "name": "A"}), 0.9, "llm");
        let b = Entity::new(EntityType::Contact, json!({"name": "A", "email": "a@b.com"}), 0.5, "rule");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_and_cap_respects_limit_and_first_occurrence() {
        let entities = vec![
            Entity::new(EntityType::Company, json!({"name": "Acme"}), 0.9, "llm"),
            Entity::new(EntityType::Company, json!({"name": "Acme"}), 0.5, "rule"),
            Entity::new(EntityType::Company, json!({"name": "Other"}), 0.8, "llm"),
        ];
        let result = dedup_and_cap(entities, 1);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].source, "llm");
    }
}
