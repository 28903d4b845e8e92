use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::{Context as AnyhowContext, Result};
use tokio::sync::watch;

/// Tracks which custom-element tags (hyphenated names) have a registered
/// definition.
///
/// Waiting here is the bridge's only suspension point: creation of a
/// hyphenated tag, and every message against one, parks until `define` runs
/// for that tag. A tag that is never defined parks forever; there is no
/// timeout.
#[derive(Default)]
pub struct DefinitionRegistry {
    channels: RefCell<HashMap<String, watch::Sender<bool>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, tag: &str) {
        let mut channels = self.channels.borrow_mut();
        let sender = channels
            .entry(tag.to_string())
            .or_insert_with(|| watch::channel(false).0);
        sender.send_replace(true);
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.channels
            .borrow()
            .get(tag)
            .map(|sender| *sender.borrow())
            .unwrap_or(false)
    }

    fn subscribe(&self, tag: &str) -> watch::Receiver<bool> {
        let mut channels = self.channels.borrow_mut();
        channels
            .entry(tag.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    pub async fn when_defined(&self, tag: &str) -> Result<()> {
        // The receiver is detached from the registry borrow before awaiting.
        let mut receiver = self.subscribe(tag);
        receiver
            .wait_for(|defined| *defined)
            .await
            .with_context(|| format!("definition channel for '{tag}' closed"))?;
        Ok(())
    }
}
