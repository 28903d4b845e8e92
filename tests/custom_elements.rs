use std::rc::Rc;
use std::time::Duration;

use gantry::{DiscardSink, ElementBridge, ElementConfig, Message};
use serde_json::json;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_plain_tags_create_immediately() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        tokio::time::timeout(
            Duration::from_millis(100),
            bridge.create(ElementConfig::new("guid-div", "div")),
        )
        .await
        .expect("plain tag creation must not wait for a definition")
        .unwrap();
        assert!(bridge.exists("guid-div"));
    });
}

#[test]
fn test_hyphenated_creation_waits_for_define() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        let mut config = ElementConfig::new("guid-custom", "my-widget");
        config
            .attributes
            .insert("data-ready".to_string(), "yes".to_string());

        let create = bridge.create(config);
        tokio::pin!(create);

        tokio::select! {
            _ = &mut create => panic!("creation resolved before the tag was defined"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert!(!bridge.exists("guid-custom"));
        assert!(!bridge.is_defined("my-widget"));

        bridge.define("my-widget");
        tokio::time::timeout(Duration::from_millis(100), create)
            .await
            .expect("creation must resolve once the tag is defined")
            .unwrap();

        assert!(bridge.is_defined("my-widget"));
        let element = bridge.element("guid-custom").unwrap();
        assert_eq!(
            element
                .call(Message::get_attribute("data-ready"))
                .await
                .unwrap(),
            json!("yes")
        );
    });
}

#[test]
fn test_define_before_create_does_not_block() {
    let rt = runtime();
    rt.block_on(async {
        let bridge = ElementBridge::new(Rc::new(DiscardSink)).unwrap();
        bridge.define("my-widget");

        tokio::time::timeout(
            Duration::from_millis(100),
            bridge.create(ElementConfig::new("guid-early", "my-widget")),
        )
        .await
        .expect("creation after define must not wait")
        .unwrap();
        assert!(bridge.exists("guid-early"));
    });
}
