use std::cell::RefCell;
use std::rc::Rc;

use gantry::{
    CallbackRegistry, DiscardSink, ElementBridge, ElementConfig, Message,
};
use serde_json::{json, Value as JsonValue};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn recording_registry() -> (Rc<CallbackRegistry>, Rc<RefCell<Vec<Vec<JsonValue>>>>) {
    let registry = Rc::new(CallbackRegistry::new());
    let recorded = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&recorded);
    registry.register("on_click", Box::new(move |args| sink.borrow_mut().push(args)));
    (registry, recorded)
}

#[test]
fn test_js_listener_runs_in_the_engine() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        bridge.eval("globalThis.clicks = 0;", "setup.js").unwrap();

        let mut config = ElementConfig::new("guid-js", "button");
        config
            .js_listeners
            .entry("click".to_string())
            .or_default()
            .push("globalThis.clicks += 1;".to_string());
        bridge.create(config).await.unwrap();

        bridge
            .fire_event("guid-js", "click", JsonValue::Null)
            .await
            .unwrap();
        bridge
            .fire_event("guid-js", "click", JsonValue::Null)
            .await
            .unwrap();

        let clicks: i32 = bridge.eval_with("globalThis.clicks", "check.js").unwrap();
        assert_eq!(clicks, 2);
    });
}

#[test]
fn test_js_listener_reads_event_fields() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        let mut config = ElementConfig::new("guid-detail", "input");
        config
            .js_listeners
            .entry("change".to_string())
            .or_default()
            .push("globalThis.seen = event.type + ':' + event.value;".to_string());
        bridge.create(config).await.unwrap();

        bridge
            .fire_event("guid-detail", "change", json!({ "value": "abc" }))
            .await
            .unwrap();

        let seen: String = bridge.eval_with("globalThis.seen", "check.js").unwrap();
        assert_eq!(seen, "change:abc");
    });
}

#[test]
fn test_kernel_listener_receives_a_snapshot() {
    let rt = runtime();
    rt.block_on(async {
        let (registry, recorded) = recording_registry();
        let bridge = ElementBridge::new(registry).unwrap();

        let mut config = ElementConfig::new("guid-py", "button");
        config
            .py_listeners
            .entry("click".to_string())
            .or_default()
            .push("on_click".to_string());
        bridge.create(config).await.unwrap();

        bridge
            .fire_event("guid-py", "click", json!({ "x": 4, "y": 7 }))
            .await
            .unwrap();

        let recorded = recorded.borrow();
        assert_eq!(recorded.len(), 1);
        let snapshot = &recorded[0][0];
        assert_eq!(snapshot["type"], json!("click"));
        assert_eq!(snapshot["x"], json!(4));
        assert_eq!(snapshot["y"], json!(7));
    });
}

#[test]
fn test_snapshot_drops_cyclic_properties_only() {
    let rt = runtime();
    rt.block_on(async {
        let (registry, recorded) = recording_registry();
        let bridge = ElementBridge::new(registry).unwrap();

        // The js listener runs first and decorates the shared event object,
        // including a self-reference the snapshot cannot serialize.
        let mut config = ElementConfig::new("guid-cycle", "div");
        config
            .js_listeners
            .entry("click".to_string())
            .or_default()
            .push("event.keep = 'ok'; event.self = event;".to_string());
        config
            .py_listeners
            .entry("click".to_string())
            .or_default()
            .push("on_click".to_string());
        bridge.create(config).await.unwrap();

        bridge
            .fire_event("guid-cycle", "click", JsonValue::Null)
            .await
            .unwrap();

        let recorded = recorded.borrow();
        assert_eq!(recorded.len(), 1);
        let snapshot = recorded[0][0].as_object().unwrap();
        assert_eq!(snapshot.get("keep"), Some(&json!("ok")));
        assert_eq!(snapshot.get("type"), Some(&json!("click")));
        assert!(!snapshot.contains_key("self"));
    });
}

#[test]
fn test_failing_js_listener_does_not_stop_delivery() {
    let rt = runtime();
    rt.block_on(async {
        let (registry, recorded) = recording_registry();
        let bridge = ElementBridge::new(registry).unwrap();

        let mut config = ElementConfig::new("guid-throw", "div");
        config
            .js_listeners
            .entry("click".to_string())
            .or_default()
            .push("throw new Error('listener boom');".to_string());
        config
            .py_listeners
            .entry("click".to_string())
            .or_default()
            .push("on_click".to_string());
        bridge.create(config).await.unwrap();

        bridge
            .fire_event("guid-throw", "click", JsonValue::Null)
            .await
            .unwrap();
        assert_eq!(recorded.borrow().len(), 1);
    });
}

#[test]
fn test_listeners_added_and_removed_by_message() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        bridge.eval("globalThis.hits = 0;", "setup.js").unwrap();
        bridge
            .create(ElementConfig::new("guid-sub", "button"))
            .await
            .unwrap();
        let element = bridge.element("guid-sub").unwrap();

        let source = "globalThis.hits += 1;";
        element
            .call(
                Message::new("addJsEventListener")
                    .with_name("click")
                    .with_value(json!(source)),
            )
            .await
            .unwrap();
        element.fire_event("click", JsonValue::Null).await.unwrap();

        element
            .call(Message::new("removeEventListener").with_value(json!(source)))
            .await
            .unwrap();
        element.fire_event("click", JsonValue::Null).await.unwrap();

        let hits: i32 = bridge.eval_with("globalThis.hits", "check.js").unwrap();
        assert_eq!(hits, 1);
    });
}

#[test]
fn test_bridge_with_compiled_listeners_drops_cleanly() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        let mut config = ElementConfig::new("guid-drop", "button");
        config
            .js_listeners
            .entry("click".to_string())
            .or_default()
            .push("void event;".to_string());
        bridge.create(config).await.unwrap();
        bridge
            .fire_event("guid-drop", "click", JsonValue::Null)
            .await
            .unwrap();
        // Compiled listener functions must be released before the engine
        // tears down its runtime.
        drop(bridge);
    });
}

#[test]
fn test_removing_an_unknown_listener_fails() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        bridge
            .create(ElementConfig::new("guid-none", "div"))
            .await
            .unwrap();
        let element = bridge.element("guid-none").unwrap();

        let err = element
            .call(Message::new("removeEventListener").with_value(json!("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Listener is not defined");
    });
}

#[test]
fn test_duplicate_listener_key_leaves_first_subscription_attached() {
    let rt = runtime();
    rt.block_on(async {
        let (registry, recorded) = recording_registry();
        let bridge = ElementBridge::new(registry).unwrap();
        bridge
            .create(ElementConfig::new("guid-dup", "button"))
            .await
            .unwrap();
        let element = bridge.element("guid-dup").unwrap();

        let add = || {
            Message::new("addPythonEventListener")
                .with_name("click")
                .with_value(json!("on_click"))
        };
        element.call(add()).await.unwrap();
        element.call(add()).await.unwrap();

        // The key tracks only the latest subscription, so one removal is all
        // the protocol allows and the first subscription keeps firing.
        element
            .call(Message::new("removeEventListener").with_value(json!("on_click")))
            .await
            .unwrap();
        let err = element
            .call(Message::new("removeEventListener").with_value(json!("on_click")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Listener is not defined");

        element.fire_event("click", JsonValue::Null).await.unwrap();
        assert_eq!(recorded.borrow().len(), 1);
    });
}
