use rquickjs::{Ctx, Object, Value};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Build the QuickJS event object listeners receive: the detail payload with
/// the event type stamped on top. A non-object detail is wrapped under a
/// `detail` key so listeners always see an object.
pub fn build_event_object<'js>(
    ctx: &Ctx<'js>,
    event_type: &str,
    detail: &JsonValue,
) -> rquickjs::Result<Object<'js>> {
    let seed = if detail.is_object() {
        detail.clone()
    } else {
        let mut map = JsonMap::new();
        if !detail.is_null() {
            map.insert("detail".to_string(), detail.clone());
        }
        JsonValue::Object(map)
    };
    let text = serde_json::to_string(&seed).map_err(|_| rquickjs::Error::Unknown)?;
    let value = ctx.json_parse(text.as_bytes())?;
    let object = value.into_object().ok_or(rquickjs::Error::Unknown)?;
    object.set("type", event_type)?;
    Ok(object)
}

/// Plain-data snapshot of an event object: every non-function enumerable
/// property that survives a JSON round-trip. A property that fails to
/// serialize (a cycle, an exotic value) is dropped on its own; the rest of
/// the snapshot still goes through.
pub fn snapshot_event<'js>(ctx: &Ctx<'js>, event: &Object<'js>) -> JsonValue {
    let mut map = JsonMap::new();
    for key in event.keys::<String>() {
        let Ok(key) = key else { continue };
        let value = match event.get::<_, Value>(key.as_str()) {
            Ok(value) => value,
            Err(_) => {
                let _: Value = ctx.catch();
                continue;
            }
        };
        if value.is_function() {
            continue;
        }
        match ctx.json_stringify(value) {
            Ok(Some(text)) => {
                if let Ok(text) = text.to_string() {
                    if let Ok(parsed) = serde_json::from_str::<JsonValue>(&text) {
                        map.insert(key, parsed);
                    }
                }
            }
            // `undefined` has no JSON form; skip it like the other misfits.
            Ok(None) => {}
            Err(_) => {
                let _: Value = ctx.catch();
            }
        }
    }
    JsonValue::Object(map)
}
