//! Kernel-side element handles.
//!
//! A `HostElement` is authored before any output frame exists: attributes,
//! properties, children, and listeners accumulate locally until `display`
//! walks the tree and creates the bridged elements. After display, reads and
//! writes proxy through the message protocol so both sides stay in step.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use anyhow::{bail, Context, Result};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::cell::RefCell;
use tracing::debug;
use uuid::Uuid;

use crate::bridge::config::{ElementConfig, Message};
use crate::bridge::ElementBridge;
use crate::kernel::CallbackRegistry;

/// Where the element's implementation script comes from.
#[derive(Clone, Debug)]
pub enum ElementSource {
    Script(String),
    Module(String),
    Html(String),
}

/// A listener supplied by the kernel: inline frame-side source, or a native
/// callback invoked with the event snapshot.
#[derive(Clone)]
pub enum ElementCallback {
    Script(String),
    Callback(Rc<dyn Fn(Vec<JsonValue>)>),
}

struct KernelListener {
    callback: Rc<dyn Fn(Vec<JsonValue>)>,
    name: String,
}

pub enum HostChild {
    Element(HostElement),
    Html(String),
}

struct HostElementInner {
    tag: String,
    guid: String,
    attributes: BTreeMap<String, String>,
    properties: JsonMap<String, JsonValue>,
    children: Vec<HostChild>,
    js_listeners: BTreeMap<String, Vec<String>>,
    py_listeners: BTreeMap<String, Vec<KernelListener>>,
    parent: Weak<RefCell<HostElementInner>>,
    src: Option<ElementSource>,
    could_exist: bool,
}

#[derive(Clone)]
pub struct HostElement {
    inner: Rc<RefCell<HostElementInner>>,
    bridge: Rc<ElementBridge>,
    callbacks: Rc<CallbackRegistry>,
}

impl HostElement {
    pub fn new(bridge: Rc<ElementBridge>, callbacks: Rc<CallbackRegistry>, tag: &str) -> Self {
        let guid = Uuid::new_v4().simple().to_string();
        Self {
            inner: Rc::new(RefCell::new(HostElementInner {
                tag: tag.to_string(),
                guid,
                attributes: BTreeMap::new(),
                properties: JsonMap::new(),
                children: Vec::new(),
                js_listeners: BTreeMap::new(),
                py_listeners: BTreeMap::new(),
                parent: Weak::new(),
                src: None,
                could_exist: false,
            })),
            bridge,
            callbacks,
        }
    }

    pub fn guid(&self) -> String {
        self.inner.borrow().guid.clone()
    }

    pub fn tag(&self) -> String {
        self.inner.borrow().tag.clone()
    }

    pub fn set_src(&self, src: ElementSource) {
        self.inner.borrow_mut().src = Some(src);
    }

    /// True once the element has been displayed and the frame-side entry
    /// answers for its guid.
    pub fn displayed(&self) -> bool {
        self.inner.borrow().could_exist && self.bridge.exists(&self.guid())
    }

    /// Read an attribute: from the frame when displayed, else the local cache.
    pub async fn attribute(&self, name: &str) -> Result<Option<String>> {
        if self.displayed() {
            let handle = self
                .bridge
                .element(&self.guid())
                .context("element vanished from the bridge")?;
            let value = handle.call(Message::get_attribute(name)).await?;
            return Ok(match value {
                JsonValue::String(text) => Some(text),
                _ => None,
            });
        }
        Ok(self.inner.borrow().attributes.get(name).cloned())
    }

    /// Attribute values are strings only; richer data belongs in properties.
    pub async fn set_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .attributes
            .insert(name.to_string(), value.to_string());
        if self.displayed() {
            let handle = self
                .bridge
                .element(&self.guid())
                .context("element vanished from the bridge")?;
            handle.call(Message::set_attribute(name, value)).await?;
        }
        Ok(())
    }

    pub async fn property(&self, name: &str) -> Result<JsonValue> {
        if self.displayed() {
            let handle = self
                .bridge
                .element(&self.guid())
                .context("element vanished from the bridge")?;
            return handle.call(Message::get_property(name)).await;
        }
        Ok(self
            .inner
            .borrow()
            .properties
            .get(name)
            .cloned()
            .unwrap_or(JsonValue::Null))
    }

    pub async fn set_property(&self, name: &str, value: JsonValue) -> Result<()> {
        self.inner
            .borrow_mut()
            .properties
            .insert(name.to_string(), value.clone());
        if self.displayed() {
            let handle = self
                .bridge
                .element(&self.guid())
                .context("element vanished from the bridge")?;
            handle.call(Message::set_property(name, value)).await?;
        }
        Ok(())
    }

    /// Invoke a method on the displayed element. Unlike properties there is
    /// no local fallback to run against.
    pub async fn call(&self, method: &str, args: Vec<JsonValue>) -> Result<JsonValue> {
        if !self.displayed() {
            bail!("Cannot call method on undisplayed element.");
        }
        let handle = self
            .bridge
            .element(&self.guid())
            .context("element vanished from the bridge")?;
        handle.call(Message::call(method, args)).await
    }

    /// Attach a listener. Script listeners are keyed by their source text,
    /// callback listeners by a generated name registered with the kernel's
    /// callback table.
    pub async fn add_event_listener(
        &self,
        event_type: &str,
        callback: ElementCallback,
    ) -> Result<()> {
        let message = match callback {
            ElementCallback::Script(source) => {
                let mut inner = self.inner.borrow_mut();
                let sources = inner.js_listeners.entry(event_type.to_string()).or_default();
                if sources.iter().any(|existing| existing == &source) {
                    bail!("Callback is already added.");
                }
                sources.push(source.clone());
                Message::new("addJsEventListener")
                    .with_name(event_type)
                    .with_value(JsonValue::String(source))
            }
            ElementCallback::Callback(function) => {
                let mut inner = self.inner.borrow_mut();
                let listeners = inner.py_listeners.entry(event_type.to_string()).or_default();
                if listeners
                    .iter()
                    .any(|listener| Rc::ptr_eq(&listener.callback, &function))
                {
                    bail!("Callback is already added.");
                }
                let name = Uuid::new_v4().simple().to_string();
                let handler = Rc::clone(&function);
                self.callbacks
                    .register(&name, Box::new(move |args| handler(args)));
                listeners.push(KernelListener {
                    callback: function,
                    name: name.clone(),
                });
                Message::new("addPythonEventListener")
                    .with_name(event_type)
                    .with_value(JsonValue::String(name))
            }
        };
        if self.displayed() {
            let handle = self
                .bridge
                .element(&self.guid())
                .context("element vanished from the bridge")?;
            handle.call(message).await?;
        }
        Ok(())
    }

    pub async fn remove_event_listener(
        &self,
        event_type: &str,
        callback: ElementCallback,
    ) -> Result<()> {
        let (key, unregister) = {
            let mut inner = self.inner.borrow_mut();
            match callback {
                ElementCallback::Script(source) => {
                    let sources = inner
                        .js_listeners
                        .get_mut(event_type)
                        .context("listener does not exist")?;
                    let index = sources
                        .iter()
                        .position(|existing| existing == &source)
                        .context("listener does not exist")?;
                    sources.remove(index);
                    (source, None)
                }
                ElementCallback::Callback(function) => {
                    let listeners = inner
                        .py_listeners
                        .get_mut(event_type)
                        .context("listener does not exist")?;
                    let index = listeners
                        .iter()
                        .position(|listener| Rc::ptr_eq(&listener.callback, &function))
                        .context("listener does not exist")?;
                    let removed = listeners.remove(index);
                    (removed.name.clone(), Some(removed.name))
                }
            }
        };
        if let Some(name) = unregister {
            self.callbacks.unregister(&name);
        }
        if self.displayed() {
            let handle = self
                .bridge
                .element(&self.guid())
                .context("element vanished from the bridge")?;
            handle
                .call(
                    Message::new("removeEventListener")
                        .with_name(event_type)
                        .with_value(JsonValue::String(key)),
                )
                .await?;
        }
        Ok(())
    }

    /// Reparent `child` under this element, detaching it from any previous
    /// parent first.
    pub fn append_child(&self, child: &HostElement) {
        child.remove();
        child.inner.borrow_mut().parent = Rc::downgrade(&self.inner);
        self.inner
            .borrow_mut()
            .children
            .push(HostChild::Element(child.clone()));
    }

    pub fn append_html(&self, html: &str) {
        self.inner
            .borrow_mut()
            .children
            .push(HostChild::Html(html.to_string()));
    }

    pub fn remove_child(&self, child: &HostElement) -> Result<()> {
        let is_ours = child
            .inner
            .borrow()
            .parent
            .upgrade()
            .map(|parent| Rc::ptr_eq(&parent, &self.inner))
            .unwrap_or(false);
        if !is_ours {
            bail!("Child parent must match.");
        }
        child.inner.borrow_mut().parent = Weak::new();
        self.inner.borrow_mut().children.retain(|existing| match existing {
            HostChild::Element(element) => !Rc::ptr_eq(&element.inner, &child.inner),
            HostChild::Html(_) => true,
        });
        Ok(())
    }

    /// Detach from the current parent, if any.
    pub fn remove(&self) {
        let parent = self.inner.borrow().parent.upgrade();
        if let Some(parent) = parent {
            let parent = HostElement {
                inner: parent,
                bridge: Rc::clone(&self.bridge),
                callbacks: Rc::clone(&self.callbacks),
            };
            let _ = parent.remove_child(self);
        }
    }

    /// Create this element and all element descendants in the frame.
    /// Creation order is top-down so parents exist before their children.
    pub async fn display(&self) -> Result<()> {
        let mut configs = Vec::new();
        let mut queue = vec![self.clone()];
        while let Some(element) = queue.pop() {
            {
                let mut inner = element.inner.borrow_mut();
                inner.could_exist = true;
                configs.push(config_from(&inner));
            }
            let inner = element.inner.borrow();
            for child in &inner.children {
                if let HostChild::Element(child) = child {
                    queue.push(child.clone());
                }
            }
        }
        debug!(target: "bridge", guid = %self.guid(), count = configs.len(), "displaying element tree");
        for config in configs {
            self.bridge.create(config).await?;
        }
        Ok(())
    }

    pub fn config(&self) -> ElementConfig {
        config_from(&self.inner.borrow())
    }

    /// Render the notebook output markup: dependency tags, the element
    /// shell with its children, and the JSON config block the frame script
    /// hydrates from.
    pub fn to_html(&self) -> Result<String> {
        let inner = self.inner.borrow();
        let mut out = String::new();
        if let Some(src) = &inner.src {
            match src {
                ElementSource::Script(url) => {
                    out.push_str(&format!(
                        "<script src=\"{}\"></script>\n",
                        html_escape::encode_double_quoted_attribute(url)
                    ));
                }
                ElementSource::Module(url) => {
                    out.push_str(&format!(
                        "<script type=\"module\" src=\"{}\"></script>\n",
                        html_escape::encode_double_quoted_attribute(url)
                    ));
                }
                ElementSource::Html(markup) => {
                    out.push_str(markup);
                    out.push('\n');
                }
            }
        }
        out.push_str(&format!("<{} id=\"{}\">", inner.tag, inner.guid));
        for child in &inner.children {
            match child {
                HostChild::Element(element) => out.push_str(&element.to_html()?),
                HostChild::Html(markup) => out.push_str(markup),
            }
        }
        out.push_str(&format!("</{}>", inner.tag));
        let config = config_from(&inner);
        // Escaped so the JSON payload cannot close the surrounding script tag.
        let payload = serde_json::to_string(&config)?.replace('<', "\\u003c");
        out.push_str(&format!(
            "\n<script type=\"application/json\" data-element-config=\"{}\">{}</script>",
            inner.guid, payload
        ));
        Ok(out)
    }
}

fn config_from(inner: &HostElementInner) -> ElementConfig {
    let mut config = ElementConfig::new(&inner.guid, &inner.tag);
    config.attributes = inner.attributes.clone();
    config.properties = inner.properties.clone();
    config.js_listeners = inner.js_listeners.clone();
    config.py_listeners = inner
        .py_listeners
        .iter()
        .map(|(event_type, listeners)| {
            (
                event_type.clone(),
                listeners.iter().map(|listener| listener.name.clone()).collect(),
            )
        })
        .collect();
    config
}
