use std::collections::HashMap;

use anyhow::{bail, Result};
use html5ever::{namespace_url, ns, LocalName, QualName};
use kuchiki::{Attribute, ExpandedName, NodeRef};
use rquickjs::{Function, Persistent};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::path::DottedPath;
use crate::error::BridgeError;

/// How a fired event reaches its callback.
#[derive(Clone)]
pub enum ListenerAction {
    /// Inline source text compiled into a unary function of the event.
    Inline(Persistent<Function<'static>>),
    /// Kernel-side callback invoked by name with an event snapshot.
    Kernel(String),
}

struct Subscription {
    id: usize,
    event_type: String,
    action: ListenerAction,
}

/// One bridged element: a real DOM node plus the expando property tree and
/// listener bookkeeping the message protocol operates on.
///
/// Root property names either bridge to the node (`innerText`, `className`,
/// `id`, `tagName`) or live in the property map. The map is seeded with
/// `style` and `dataset` objects so nested paths have somewhere to land,
/// matching the objects a browser element always carries.
pub struct ElementState {
    node: NodeRef,
    tag: String,
    properties: JsonMap<String, JsonValue>,
    subscriptions: Vec<Subscription>,
    tracked: HashMap<String, usize>,
    next_subscription: usize,
}

impl ElementState {
    pub fn new(tag: &str) -> Self {
        let name = QualName::new(None, ns!(html), LocalName::from(tag));
        let node = NodeRef::new_element(name, Vec::<(ExpandedName, Attribute)>::new());
        let mut properties = JsonMap::new();
        properties.insert("style".to_string(), JsonValue::Object(JsonMap::new()));
        properties.insert("dataset".to_string(), JsonValue::Object(JsonMap::new()));
        Self {
            node,
            tag: tag.to_string(),
            properties,
            subscriptions: Vec::new(),
            tracked: HashMap::new(),
            next_subscription: 0,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        let element = self.node.as_element().expect("element node");
        element
            .attributes
            .borrow_mut()
            .insert(name, value.to_string());
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        let element = self.node.as_element().expect("element node");
        let attributes = element.attributes.borrow();
        attributes.get(name).map(str::to_string)
    }

    pub fn remove_attribute(&self, name: &str) {
        let element = self.node.as_element().expect("element node");
        element.attributes.borrow_mut().remove(name);
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        let element = self.node.as_element().expect("element node");
        element.attributes.borrow().contains(name)
    }

    fn class_tokens(&self) -> Vec<String> {
        self.attribute("class")
            .map(|value| value.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn store_class_tokens(&self, tokens: &[String]) {
        if tokens.is_empty() {
            self.remove_attribute("class");
        } else {
            self.set_attribute("class", &tokens.join(" "));
        }
    }

    pub fn class_add(&self, token: &str) {
        let mut tokens = self.class_tokens();
        if !tokens.iter().any(|existing| existing == token) {
            tokens.push(token.to_string());
        }
        self.store_class_tokens(&tokens);
    }

    pub fn class_remove(&self, token: &str) {
        let mut tokens = self.class_tokens();
        tokens.retain(|existing| existing != token);
        self.store_class_tokens(&tokens);
    }

    pub fn class_toggle(&self, token: &str) -> bool {
        if self.class_contains(token) {
            self.class_remove(token);
            false
        } else {
            self.class_add(token);
            true
        }
    }

    pub fn class_contains(&self, token: &str) -> bool {
        self.class_tokens().iter().any(|existing| existing == token)
    }

    fn set_text(&self, value: &str) {
        while let Some(child) = self.node.first_child() {
            child.detach();
        }
        self.node.append(NodeRef::new_text(value));
    }

    fn text(&self) -> String {
        self.node.text_contents()
    }

    fn root_value(&self, name: &str) -> Option<JsonValue> {
        match name {
            "innerText" | "textContent" => Some(JsonValue::String(self.text())),
            "className" => Some(JsonValue::String(
                self.attribute("class").unwrap_or_default(),
            )),
            "id" => Some(JsonValue::String(self.attribute("id").unwrap_or_default())),
            "tagName" => Some(JsonValue::String(self.tag.to_uppercase())),
            _ => self.properties.get(name).cloned(),
        }
    }

    fn root_set(&mut self, name: &str, value: JsonValue) {
        match name {
            "innerText" | "textContent" => self.set_text(&attr_string(&value)),
            "className" => self.set_attribute("class", &attr_string(&value)),
            "id" => self.set_attribute("id", &attr_string(&value)),
            "style" => {
                self.properties.insert(name.to_string(), value);
                self.sync_style_attribute();
            }
            _ => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }

    /// Read a dotted path rooted at this element. A missing final segment
    /// reads as null; a missing intermediate segment is an error.
    pub fn get_path(&self, path: &DottedPath) -> Result<JsonValue> {
        if path.is_single() {
            return Ok(self.root_value(path.last()).unwrap_or(JsonValue::Null));
        }
        let segments = path.segments();
        let mut current = self
            .root_value(&segments[0])
            .filter(|value| !value.is_null())
            .ok_or_else(|| BridgeError::UndefinedSegment {
                path: path.full(),
                segment: segments[0].clone(),
            })?;
        for segment in &segments[1..segments.len() - 1] {
            current = current
                .get(segment.as_str())
                .filter(|value| !value.is_null())
                .cloned()
                .ok_or_else(|| BridgeError::UndefinedSegment {
                    path: path.full(),
                    segment: segment.clone(),
                })?;
        }
        Ok(current
            .get(path.last())
            .cloned()
            .unwrap_or(JsonValue::Null))
    }

    /// Assign a value at a dotted path. The penultimate segment must resolve
    /// to an object.
    pub fn set_path(&mut self, path: &DottedPath, value: JsonValue) -> Result<()> {
        if path.is_single() {
            self.root_set(path.last(), value);
            return Ok(());
        }
        let segments = path.segments();
        {
            let mut current = self.properties.get_mut(segments[0].as_str()).ok_or_else(|| {
                BridgeError::UndefinedSegment {
                    path: path.full(),
                    segment: segments[0].clone(),
                }
            })?;
            for segment in &segments[1..segments.len() - 1] {
                current = current.get_mut(segment.as_str()).ok_or_else(|| {
                    BridgeError::UndefinedSegment {
                        path: path.full(),
                        segment: segment.clone(),
                    }
                })?;
            }
            let Some(object) = current.as_object_mut() else {
                bail!("cannot assign '{}' on a non-object value", path.full());
            };
            object.insert(path.last().to_string(), value);
        }
        if segments[0] == "style" {
            self.sync_style_attribute();
        }
        Ok(())
    }

    /// Reflect the `style` property object into the serialized attribute,
    /// the way a browser keeps `el.style` and `style="..."` in step.
    fn sync_style_attribute(&self) {
        let Some(JsonValue::Object(style)) = self.properties.get("style") else {
            return;
        };
        if style.is_empty() {
            self.remove_attribute("style");
            return;
        }
        let css = style
            .iter()
            .map(|(name, value)| format!("{}: {}", camel_to_kebab(name), attr_string(value)))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attribute("style", &css);
    }

    /// Attach a subscription and track it under `key`. Re-using a key
    /// replaces the tracking entry but leaves the earlier subscription
    /// attached; only an explicit removal unsubscribes.
    pub fn add_listener(&mut self, event_type: &str, key: &str, action: ListenerAction) {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            event_type: event_type.to_string(),
            action,
        });
        self.tracked.insert(key.to_string(), id);
    }

    pub fn remove_listener(&mut self, key: &str) -> Result<()> {
        let id = self
            .tracked
            .remove(key)
            .ok_or(BridgeError::ListenerNotDefined)?;
        self.subscriptions.retain(|subscription| subscription.id != id);
        Ok(())
    }

    pub fn actions_for(&self, event_type: &str) -> Vec<ListenerAction> {
        self.subscriptions
            .iter()
            .filter(|subscription| subscription.event_type == event_type)
            .map(|subscription| subscription.action.clone())
            .collect()
    }
}

/// Coerce a JSON value to the string form the attribute API stores.
pub fn attr_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(flag) => flag.to_string(),
        JsonValue::Number(number) => number.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn camel_to_kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attributes_round_trip_as_strings() {
        let element = ElementState::new("div");
        element.set_attribute("data-role", "panel");
        assert_eq!(element.attribute("data-role").as_deref(), Some("panel"));
        assert!(element.has_attribute("data-role"));
        element.remove_attribute("data-role");
        assert_eq!(element.attribute("data-role"), None);
    }

    #[test]
    fn class_list_operations_edit_the_class_attribute() {
        let element = ElementState::new("div");
        element.class_add("active");
        element.class_add("primary");
        element.class_add("active");
        assert_eq!(element.attribute("class").as_deref(), Some("active primary"));
        assert!(element.class_contains("primary"));
        element.class_remove("active");
        assert_eq!(element.attribute("class").as_deref(), Some("primary"));
        assert!(!element.class_toggle("primary"));
        assert_eq!(element.attribute("class"), None);
    }

    #[test]
    fn inner_text_is_backed_by_the_node() {
        let mut element = ElementState::new("span");
        element
            .set_path(&DottedPath::parse("innerText"), json!("hello"))
            .unwrap();
        assert_eq!(
            element.get_path(&DottedPath::parse("innerText")).unwrap(),
            json!("hello")
        );
        assert_eq!(
            element.get_path(&DottedPath::parse("textContent")).unwrap(),
            json!("hello")
        );
    }

    #[test]
    fn style_assignments_serialize_into_the_attribute() {
        let mut element = ElementState::new("div");
        element
            .set_path(&DottedPath::parse("style.backgroundColor"), json!("red"))
            .unwrap();
        element
            .set_path(&DottedPath::parse("style.width"), json!("10px"))
            .unwrap();
        assert_eq!(
            element.attribute("style").as_deref(),
            Some("background-color: red; width: 10px")
        );
        assert_eq!(
            element
                .get_path(&DottedPath::parse("style.width"))
                .unwrap(),
            json!("10px")
        );
    }

    #[test]
    fn missing_intermediate_segment_is_an_error() {
        let element = ElementState::new("div");
        let err = element
            .get_path(&DottedPath::parse("shadowRoot.firstChild.id"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::UndefinedSegment { .. })
        ));
    }

    #[test]
    fn missing_final_segment_reads_as_null() {
        let element = ElementState::new("div");
        assert_eq!(
            element.get_path(&DottedPath::parse("style.color")).unwrap(),
            JsonValue::Null
        );
        assert_eq!(
            element.get_path(&DottedPath::parse("hidden")).unwrap(),
            JsonValue::Null
        );
    }

    #[test]
    fn listener_keys_track_the_last_subscription() {
        let mut element = ElementState::new("button");
        element.add_listener("click", "cb", ListenerAction::Kernel("cb".into()));
        element.add_listener("click", "cb", ListenerAction::Kernel("cb".into()));
        assert_eq!(element.actions_for("click").len(), 2);

        element.remove_listener("cb").unwrap();
        // The first subscription's unregister path is no longer reachable.
        assert_eq!(element.actions_for("click").len(), 1);
        let err = element.remove_listener("cb").unwrap_err();
        assert_eq!(err.to_string(), "Listener is not defined");
    }

    #[test]
    fn attr_string_matches_display_coercion() {
        assert_eq!(attr_string(&json!("x")), "x");
        assert_eq!(attr_string(&json!(3)), "3");
        assert_eq!(attr_string(&json!(true)), "true");
        assert_eq!(attr_string(&JsonValue::Null), "null");
    }
}
