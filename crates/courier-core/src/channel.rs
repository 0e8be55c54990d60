//! Device channel state: the channel id assigned by the push provider and the
//! device-level tags edited by the built-in tag actions.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::Result;
use crate::store::KeyValueStore;

pub const CHANNEL_ID_KEY: &str = "channel.id";
pub const CHANNEL_TAGS_KEY: &str = "channel.tags";

#[derive(Clone)]
pub struct Channel {
    store: Arc<dyn KeyValueStore>,
    tags_lock: Arc<Mutex<()>>,
}

impl Channel {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            tags_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> Result<Option<String>> {
        self.store.get(CHANNEL_ID_KEY)
    }

    /// Record the channel id, or forget it when `id` is `None` or blank.
    pub fn set_id(&self, id: Option<&str>) -> Result<()> {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                info!(channel_id = %id, "channel id set");
                self.store.put(CHANNEL_ID_KEY, id)
            }
            None => {
                info!("channel id cleared");
                self.store.remove(CHANNEL_ID_KEY)
            }
        }
    }

    pub fn tags(&self) -> Result<BTreeSet<String>> {
        let _guard = self.tags_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_tags()
    }

    /// Add `tags` to the device tag set and return the updated set.
    pub fn add_tags<'t>(&self, tags: impl IntoIterator<Item = &'t str>) -> Result<BTreeSet<String>> {
        self.edit_tags(|set| {
            for tag in tags.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
                set.insert(tag.to_string());
            }
        })
    }

    /// Remove `tags` from the device tag set and return the updated set.
    pub fn remove_tags<'t>(
        &self,
        tags: impl IntoIterator<Item = &'t str>,
    ) -> Result<BTreeSet<String>> {
        self.edit_tags(|set| {
            for tag in tags.into_iter().map(str::trim) {
                set.remove(tag);
            }
        })
    }

    fn edit_tags(&self, edit: impl FnOnce(&mut BTreeSet<String>)) -> Result<BTreeSet<String>> {
        let _guard = self.tags_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut set = self.read_tags()?;
        edit(&mut set);
        if set.is_empty() {
            self.store.remove(CHANNEL_TAGS_KEY)?;
        } else {
            self.store
                .put(CHANNEL_TAGS_KEY, &serde_json::to_string(&set)?)?;
        }
        debug!(tags = set.len(), "channel tags updated");
        Ok(set)
    }

    fn read_tags(&self) -> Result<BTreeSet<String>> {
        match self.store.get(CHANNEL_TAGS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn id_round_trips_and_blank_clears() {
        let channel = Channel::new(Arc::new(MemoryStore::new()));
        assert_eq!(channel.id().unwrap(), None);

        channel.set_id(Some(" abc-123 ")).unwrap();
        assert_eq!(channel.id().unwrap().as_deref(), Some("abc-123"));

        channel.set_id(Some("   ")).unwrap();
        assert_eq!(channel.id().unwrap(), None);
    }

    #[test]
    fn tags_are_a_set() {
        let store = Arc::new(MemoryStore::new());
        let channel = Channel::new(store.clone());

        channel.add_tags(["vip", "beta", "vip", " "]).unwrap();
        let tags = channel.remove_tags(["beta", "missing"]).unwrap();
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), ["vip"]);

        channel.remove_tags(["vip"]).unwrap();
        assert!(channel.tags().unwrap().is_empty());
        assert_eq!(store.get(CHANNEL_TAGS_KEY).unwrap(), None);
    }
}
