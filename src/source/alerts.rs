use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity tags attached to a loaded item. Only the alert list matters here;
/// the remaining fields are carried through for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTags {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub alerts: Vec<Value>,
    #[serde(default)]
    pub tags: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ref: Option<Value>,
}

/// Entity tags of every list item that carries at least one alert.
///
/// Anything that does not serialize to a JSON array yields no alerts.
pub fn derive_alerts<T: Serialize>(data: &T) -> Vec<EntityTags> {
    let Ok(Value::Array(items)) = serde_json::to_value(data) else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|mut item| item.get_mut("entityTags").map(Value::take))
        .filter_map(|tags| serde_json::from_value::<EntityTags>(tags).ok())
        .filter(|tags| !tags.alerts.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_items_with_alerts() {
        let data = json!([
            { "name": "a", "entityTags": { "id": "t1", "alerts": [{ "message": "disk" }] } },
            { "name": "b", "entityTags": { "id": "t2", "alerts": [] } },
            { "name": "c" },
            { "name": "d", "entityTags": { "id": "t4", "alerts": [{ "message": "cpu" }, { "message": "mem" }] } },
        ]);

        let alerts = derive_alerts(&data);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].id.as_deref(), Some("t1"));
        assert_eq!(alerts[1].alerts.len(), 2);
    }

    #[test]
    fn test_non_list_data_has_no_alerts() {
        assert!(derive_alerts(&json!({ "entityTags": { "alerts": [1] } })).is_empty());
        assert!(derive_alerts(&Vec::<u32>::new()).is_empty());
        assert!(derive_alerts(&vec![1, 2, 3]).is_empty());
    }
}
