//! Output-frame side of the notebook element bridge.
//!
//! The kernel remotely creates elements from declarative configs, drives them
//! through a flat message protocol, and receives fired events back through
//! its callback channel. State is single-threaded by construction: the
//! QuickJS context and the element nodes are thread-bound, and the only
//! suspension point is waiting for a custom-element definition.

pub mod config;
pub mod element;
pub mod events;
pub mod path;
pub mod registry;
pub mod runtime;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Function, Persistent};
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use crate::error::BridgeError;
use crate::kernel::KernelSink;
use config::{ElementConfig, Message};
use element::{attr_string, ElementState, ListenerAction};
use events::{build_event_object, snapshot_event};
use path::DottedPath;
use registry::DefinitionRegistry;
use runtime::QuickJsEngine;

struct BridgeInner {
    // Field order is load-bearing: element state holds persistent functions
    // that must be freed while the engine's runtime is still alive.
    elements: RefCell<HashMap<String, Rc<RefCell<ElementState>>>>,
    kernel: Rc<dyn KernelSink>,
    definitions: DefinitionRegistry,
    engine: QuickJsEngine,
}

/// Owns the element registry and services the message protocol.
///
/// Registry entries are inserted on creation and never pruned; their
/// lifecycle is tied to the bridge itself.
pub struct ElementBridge {
    inner: Rc<BridgeInner>,
}

/// Addressable handle for one bridged element, keyed by guid.
pub struct ElementHandle {
    guid: String,
    tag: String,
    inner: Rc<BridgeInner>,
}

impl ElementBridge {
    pub fn new(kernel: Rc<dyn KernelSink>) -> Result<Self> {
        let engine = QuickJsEngine::new()?;
        Ok(Self {
            inner: Rc::new(BridgeInner {
                elements: RefCell::new(HashMap::new()),
                kernel,
                definitions: DefinitionRegistry::new(),
                engine,
            }),
        })
    }

    /// Register a custom-element definition, releasing any creation or
    /// message parked on it.
    pub fn define(&self, tag: &str) {
        debug!(target: "bridge", tag, "custom element defined");
        self.inner.definitions.define(tag);
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.inner.definitions.is_defined(tag)
    }

    /// Materialize an element from its config. The returned future is the
    /// pause token the host awaits: once it resolves, attributes, properties,
    /// and listeners are all attached and the guid answers messages.
    pub async fn create(&self, config: ElementConfig) -> Result<()> {
        if config.tag.contains('-') {
            self.inner.definitions.when_defined(&config.tag).await?;
        }
        debug!(target: "bridge", guid = %config.guid, tag = %config.tag, "creating element");
        let mut state = ElementState::new(&config.tag);
        for (name, value) in &config.attributes {
            state.set_attribute(name, value);
        }
        for (name, value) in &config.properties {
            state
                .set_path(&DottedPath::parse(name), value.clone())
                .with_context(|| format!("applying property '{name}'"))?;
        }
        for (event_type, sources) in &config.js_listeners {
            for source in sources {
                let compiled = compile_listener(&self.inner, source)?;
                state.add_listener(event_type, source, ListenerAction::Inline(compiled));
            }
        }
        for (event_type, names) in &config.py_listeners {
            for name in names {
                state.add_listener(event_type, name, ListenerAction::Kernel(name.clone()));
            }
        }
        self.inner
            .elements
            .borrow_mut()
            .insert(config.guid.clone(), Rc::new(RefCell::new(state)));
        Ok(())
    }

    /// Look up the handle for a previously created guid.
    pub fn element(&self, guid: &str) -> Option<ElementHandle> {
        let elements = self.inner.elements.borrow();
        elements.get(guid).map(|state| ElementHandle {
            guid: guid.to_string(),
            tag: state.borrow().tag().to_string(),
            inner: Rc::clone(&self.inner),
        })
    }

    pub fn exists(&self, guid: &str) -> bool {
        self.inner.elements.borrow().contains_key(guid)
    }

    /// Deliver a browser-style event to an element's listeners.
    pub async fn fire_event(&self, guid: &str, event_type: &str, detail: JsonValue) -> Result<()> {
        let handle = self
            .element(guid)
            .ok_or_else(|| BridgeError::UnknownElement(guid.to_string()))?;
        handle.fire_event(event_type, detail).await
    }

    /// Run frame-side script outside any listener, e.g. dependency setup.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.inner.engine.eval(source, filename)
    }

    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        self.inner.engine.eval_with(source, filename)
    }
}

impl ElementHandle {
    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    async fn ready(&self) -> Result<()> {
        if self.tag.contains('-') {
            self.inner.definitions.when_defined(&self.tag).await?;
        }
        Ok(())
    }

    fn state(&self) -> Result<Rc<RefCell<ElementState>>> {
        self.inner
            .elements
            .borrow()
            .get(&self.guid)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownElement(self.guid.clone()).into())
    }

    /// Service one protocol message. Re-awaits the custom-element definition
    /// first; the wait is idempotent once the tag is defined.
    pub async fn call(&self, message: Message) -> Result<JsonValue> {
        self.ready().await?;
        let state = self.state()?;
        debug!(target: "bridge", guid = %self.guid, method = %message.method, "dispatching message");
        match message.method.as_str() {
            "setProperty" => {
                let name = require_name(&message)?;
                let value = message.value.clone().unwrap_or(JsonValue::Null);
                state.borrow_mut().set_path(&DottedPath::parse(name), value)?;
                Ok(JsonValue::Bool(true))
            }
            "getProperty" => {
                let name = require_name(&message)?;
                state.borrow().get_path(&DottedPath::parse(name))
            }
            "call" => {
                let name = require_name(&message)?;
                let args = match message.value.clone() {
                    Some(JsonValue::Array(args)) => args,
                    Some(JsonValue::Null) | None => Vec::new(),
                    Some(single) => vec![single],
                };
                self.invoke(&state, &DottedPath::parse(name), args)
            }
            "setAttribute" => {
                let name = require_name(&message)?;
                let value = attr_string(message.value.as_ref().unwrap_or(&JsonValue::Null));
                state.borrow().set_attribute(name, &value);
                Ok(JsonValue::Bool(true))
            }
            "getAttribute" => {
                let name = require_name(&message)?;
                Ok(state
                    .borrow()
                    .attribute(name)
                    .map(JsonValue::String)
                    .unwrap_or(JsonValue::Null))
            }
            "addPythonEventListener" => {
                let event_type = require_name(&message)?.to_string();
                let key = require_string_value(&message)?;
                state
                    .borrow_mut()
                    .add_listener(&event_type, &key, ListenerAction::Kernel(key.clone()));
                Ok(JsonValue::Bool(true))
            }
            "addJsEventListener" => {
                let event_type = require_name(&message)?.to_string();
                let source = require_string_value(&message)?;
                let compiled = compile_listener(&self.inner, &source)?;
                state
                    .borrow_mut()
                    .add_listener(&event_type, &source, ListenerAction::Inline(compiled));
                Ok(JsonValue::Bool(true))
            }
            "removeEventListener" => {
                let key = require_string_value(&message)?;
                state.borrow_mut().remove_listener(&key)?;
                Ok(JsonValue::Bool(true))
            }
            "exists" => Ok(JsonValue::Bool(true)),
            _ => Err(BridgeError::InvalidMethod.into()),
        }
    }

    /// Deliver an event to this element's listeners: inline listeners run
    /// inside the engine with the live event object; kernel listeners get a
    /// plain-data snapshot forwarded fire-and-forget.
    pub async fn fire_event(&self, event_type: &str, detail: JsonValue) -> Result<()> {
        self.ready().await?;
        let state = self.state()?;
        self.fire_now(&state, event_type, &detail)
    }

    fn fire_now(
        &self,
        state: &Rc<RefCell<ElementState>>,
        event_type: &str,
        detail: &JsonValue,
    ) -> Result<()> {
        let actions = state.borrow().actions_for(event_type);
        if actions.is_empty() {
            return Ok(());
        }
        let mut forwards: Vec<(String, JsonValue)> = Vec::new();
        self.inner.engine.with_context(|ctx| {
            let event = build_event_object(&ctx, event_type, detail)?;
            for action in &actions {
                match action {
                    ListenerAction::Inline(compiled) => {
                        let function = compiled.clone().restore(&ctx)?;
                        if let Err(err) = function.call::<_, ()>((event.clone(),)) {
                            let message = if matches!(err, rquickjs::Error::Exception) {
                                runtime::capture_exception_message(&ctx)
                                    .unwrap_or_else(|| err.to_string())
                            } else {
                                err.to_string()
                            };
                            error!(
                                target: "quickjs",
                                event = event_type,
                                error = %message,
                                "event listener failed"
                            );
                        }
                    }
                    ListenerAction::Kernel(name) => {
                        forwards.push((name.clone(), snapshot_event(&ctx, &event)));
                    }
                }
            }
            Ok(())
        })?;
        self.inner.engine.drain_jobs()?;
        for (name, snapshot) in forwards {
            self.inner.kernel.invoke_function(&name, vec![snapshot]);
        }
        Ok(())
    }

    /// `call` resolves the dotted path to a named capability on the element.
    /// A path landing on a data property, or on nothing, is not callable.
    fn invoke(
        &self,
        state: &Rc<RefCell<ElementState>>,
        path: &DottedPath,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue> {
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["classList", operation] => {
                let token = args
                    .first()
                    .map(attr_string)
                    .context("classList operations take one token argument")?;
                let element = state.borrow();
                match *operation {
                    "add" => {
                        element.class_add(&token);
                        Ok(JsonValue::Null)
                    }
                    "remove" => {
                        element.class_remove(&token);
                        Ok(JsonValue::Null)
                    }
                    "toggle" => Ok(JsonValue::Bool(element.class_toggle(&token))),
                    "contains" => Ok(JsonValue::Bool(element.class_contains(&token))),
                    _ => Err(BridgeError::NotCallable(path.full()).into()),
                }
            }
            ["setAttribute"] => {
                let name = args
                    .first()
                    .map(attr_string)
                    .context("setAttribute takes a name argument")?;
                let value = args
                    .get(1)
                    .map(attr_string)
                    .context("setAttribute takes a value argument")?;
                state.borrow().set_attribute(&name, &value);
                Ok(JsonValue::Null)
            }
            ["getAttribute"] => {
                let name = args
                    .first()
                    .map(attr_string)
                    .context("getAttribute takes a name argument")?;
                Ok(state
                    .borrow()
                    .attribute(&name)
                    .map(JsonValue::String)
                    .unwrap_or(JsonValue::Null))
            }
            ["removeAttribute"] => {
                let name = args
                    .first()
                    .map(attr_string)
                    .context("removeAttribute takes a name argument")?;
                state.borrow().remove_attribute(&name);
                Ok(JsonValue::Null)
            }
            ["hasAttribute"] => {
                let name = args
                    .first()
                    .map(attr_string)
                    .context("hasAttribute takes a name argument")?;
                Ok(JsonValue::Bool(state.borrow().has_attribute(&name)))
            }
            ["click"] => {
                self.fire_now(state, "click", &JsonValue::Null)?;
                Ok(JsonValue::Null)
            }
            _ => Err(BridgeError::NotCallable(path.full()).into()),
        }
    }
}

/// Compile inline listener source text into a unary function of the event.
fn compile_listener(
    inner: &BridgeInner,
    source: &str,
) -> Result<Persistent<Function<'static>>> {
    let wrapped = format!("(function (event) {{\n{source}\n}})");
    inner
        .engine
        .compile_function(&wrapped)
        .context("compiling inline event listener")
}

fn require_name(message: &Message) -> Result<&str> {
    message
        .name
        .as_deref()
        .ok_or_else(|| BridgeError::MissingField("name").into())
}

fn require_string_value(message: &Message) -> Result<String> {
    match &message.value {
        Some(JsonValue::String(value)) => Ok(value.clone()),
        _ => Err(BridgeError::MissingField("value").into()),
    }
}
