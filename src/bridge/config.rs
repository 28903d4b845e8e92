use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Declarative payload the kernel sends to materialize one element.
///
/// Consumed once at creation; the bridge does not retain it. Listener maps go
/// from event type to the listener keys for that type: inline source text for
/// `js_listeners`, kernel callback names for `py_listeners`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementConfig {
    pub guid: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub properties: JsonMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub js_listeners: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub py_listeners: BTreeMap<String, Vec<String>>,
}

impl ElementConfig {
    pub fn new(guid: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            tag: tag.into(),
            attributes: BTreeMap::new(),
            properties: JsonMap::new(),
            js_listeners: BTreeMap::new(),
            py_listeners: BTreeMap::new(),
        }
    }
}

/// One self-describing request against exactly one element. Messages are
/// independent: no ordering or sequencing guarantees exist across them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl Message {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            name: None,
            value: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn get_property(name: &str) -> Self {
        Self::new("getProperty").with_name(name)
    }

    pub fn set_property(name: &str, value: JsonValue) -> Self {
        Self::new("setProperty").with_name(name).with_value(value)
    }

    pub fn get_attribute(name: &str) -> Self {
        Self::new("getAttribute").with_name(name)
    }

    pub fn set_attribute(name: &str, value: &str) -> Self {
        Self::new("setAttribute")
            .with_name(name)
            .with_value(JsonValue::String(value.to_string()))
    }

    pub fn call(name: &str, args: Vec<JsonValue>) -> Self {
        Self::new("call")
            .with_name(name)
            .with_value(JsonValue::Array(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_omits_empty_sections() {
        let config = ElementConfig::new("guid-1", "div");
        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded, json!({"guid": "guid-1", "tag": "div"}));
    }

    #[test]
    fn message_decodes_with_optional_fields() {
        let message: Message = serde_json::from_value(json!({"method": "exists"})).unwrap();
        assert_eq!(message.method, "exists");
        assert!(message.name.is_none());
        assert!(message.value.is_none());

        let message: Message = serde_json::from_value(
            json!({"method": "setProperty", "name": "innerText", "value": "hi"}),
        )
        .unwrap();
        assert_eq!(message.name.as_deref(), Some("innerText"));
        assert_eq!(message.value, Some(json!("hi")));
    }
}
