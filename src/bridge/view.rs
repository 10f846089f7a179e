//! View attachment layer and persisted flags.
//!
//! The page is an external collaborator reached through the [`Page`] trait.
//! [`ViewAttachment`] adds the write contract the bridge relies on: writes to
//! a target that is not mounted yet wait for a readiness announcement or a
//! retry delay, up to a bounded number of attempts, and then give up quietly.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::ViewConfig;
use super::error::FlagStoreError;
use crate::util::fs::write_atomic;

/// Page surface the bridge writes to.
pub trait Page: Send + Sync {
    /// Whether an element with this id currently exists.
    fn has_target(&self, target: &str) -> bool;

    /// Set one attribute on an existing element.
    fn set_attribute(&self, target: &str, attribute: &str, value: &str);

    /// Append a new `tag` child under `parent` with the given attributes.
    fn append_child(&self, parent: &str, tag: &str, attributes: &[(String, String)]);

    /// Read an attribute back from an element.
    fn attribute(&self, target: &str, attribute: &str) -> Option<String>;
}

/// A single page write computed by a projection or action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOp {
    /// Set one attribute
    Set {
        /// Element id
        target: String,
        /// Attribute name
        attribute: String,
        /// New value
        value: String,
    },
    /// Set several attributes on the same element
    SetMany {
        /// Element id
        target: String,
        /// Attribute → value
        attributes: BTreeMap<String, String>,
    },
    /// Append a child element
    Append {
        /// Parent element id
        parent: String,
        /// Tag of the new element
        tag: String,
        /// Attributes of the new element
        attributes: Vec<(String, String)>,
    },
}

impl ViewOp {
    /// `innerHTML` assignment, the most common write.
    pub fn inner_html(target: &str, value: impl Into<String>) -> Self {
        ViewOp::Set {
            target: target.to_string(),
            attribute: "innerHTML".to_string(),
            value: value.into(),
        }
    }

    /// Append a child carrying `innerHTML`; empty text leaves the child bare.
    pub fn append_html(parent: &str, tag: &str, value: &str) -> Self {
        let attributes = if value.is_empty() {
            Vec::new()
        } else {
            vec![("innerHTML".to_string(), value.to_string())]
        };
        ViewOp::Append {
            parent: parent.to_string(),
            tag: tag.to_string(),
            attributes,
        }
    }
}

/// Retrying writer over a [`Page`].
#[derive(Clone)]
pub struct ViewAttachment {
    page: Arc<dyn Page>,
    attempts: u32,
    retry_delay: Duration,
    mounted: watch::Sender<u64>,
}

impl ViewAttachment {
    /// Wrap a page with the configured retry bounds.
    pub fn new(page: Arc<dyn Page>, config: &ViewConfig) -> Self {
        let (mounted, _) = watch::channel(0);
        Self {
            page,
            attempts: config.attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            mounted,
        }
    }

    /// Underlying page
    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    /// Signal that new targets were mounted; pending writes re-check at once.
    pub fn announce_mounted(&self) {
        self.mounted.send_modify(|generation| *generation += 1);
    }

    /// Write `attribute=value` on `target`. Returns false if the target never
    /// appeared.
    pub async fn set_display(&self, target: &str, attribute: &str, value: &str) -> bool {
        if !self.await_target(target).await {
            return false;
        }
        self.page.set_attribute(target, attribute, value);
        true
    }

    /// Write several attributes on `target` under one lookup.
    pub async fn set_multiple_display(
        &self,
        target: &str,
        attributes: &BTreeMap<String, String>,
    ) -> bool {
        if !self.await_target(target).await {
            return false;
        }
        for (attribute, value) in attributes {
            self.page.set_attribute(target, attribute, value);
        }
        true
    }

    /// Append a `tag` child under `parent`; the attribute is skipped when the
    /// value is empty.
    pub fn create_element(&self, parent: &str, tag: &str, attribute: &str, value: &str) {
        let attributes = if value.is_empty() {
            Vec::new()
        } else {
            vec![(attribute.to_string(), value.to_string())]
        };
        self.append_element(parent, tag, &attributes);
    }

    /// Append a `tag` child under `parent` with several attributes.
    pub fn append_element(&self, parent: &str, tag: &str, attributes: &[(String, String)]) {
        if !self.page.has_target(parent) {
            tracing::warn!(element = parent, tag, "parent element missing, child dropped");
            return;
        }
        self.page.append_child(parent, tag, attributes);
    }

    /// Read an attribute back from the page.
    pub fn get_value(&self, target: &str, attribute: &str) -> Option<String> {
        self.page.attribute(target, attribute)
    }

    /// Apply a batch of writes in order.
    pub async fn apply(&self, ops: &[ViewOp]) {
        for op in ops {
            match op {
                ViewOp::Set {
                    target,
                    attribute,
                    value,
                } => {
                    self.set_display(target, attribute, value).await;
                }
                ViewOp::SetMany { target, attributes } => {
                    self.set_multiple_display(target, attributes).await;
                }
                ViewOp::Append {
                    parent,
                    tag,
                    attributes,
                } => self.append_element(parent, tag, attributes),
            }
        }
    }

    async fn await_target(&self, target: &str) -> bool {
        let mut mounted = self.mounted.subscribe();
        for attempt in 1..=self.attempts {
            if self.page.has_target(target) {
                tracing::trace!(element = target, attempt, "view target found");
                return true;
            }
            if attempt == self.attempts {
                break;
            }
            tracing::debug!(element = target, attempt, "view target missing, waiting");
            tokio::select! {
                _ = mounted.changed() => {}
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
        tracing::warn!(element = target, attempts = self.attempts, "view target never appeared");
        false
    }
}

/// Element recorded by [`MemoryPage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Attribute values
    pub attributes: BTreeMap<String, String>,
    /// Appended children as `(tag, attributes)`
    pub children: Vec<(String, Vec<(String, String)>)>,
}

impl Element {
    /// Convenience accessor for an attribute value
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    /// `innerHTML` of each child, in append order
    pub fn child_texts(&self) -> Vec<&str> {
        self.children
            .iter()
            .map(|(_, attributes)| {
                attributes
                    .iter()
                    .find(|(name, _)| name == "innerHTML")
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("")
            })
            .collect()
    }
}

/// In-memory [`Page`].
///
/// With auto-mount every target exists; otherwise only targets passed to
/// [`MemoryPage::mount`] do. Setting `innerHTML` clears appended children, as
/// it does in a browser.
#[derive(Debug, Default)]
pub struct MemoryPage {
    auto_mount: bool,
    mounted: RwLock<HashSet<String>>,
    elements: RwLock<BTreeMap<String, Element>>,
}

impl MemoryPage {
    /// Page where every target exists.
    pub fn auto_mounted() -> Self {
        Self {
            auto_mount: true,
            ..Self::default()
        }
    }

    /// Page with no targets until they are mounted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Make targets available.
    pub fn mount<I, S>(&self, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mounted = self.mounted.write();
        mounted.extend(targets.into_iter().map(Into::into));
    }

    /// Copy of one element's state.
    pub fn element(&self, target: &str) -> Option<Element> {
        self.elements.read().get(target).cloned()
    }

    /// Attribute value on one element.
    pub fn value(&self, target: &str, attribute: &str) -> Option<String> {
        self.elements
            .read()
            .get(target)
            .and_then(|element| element.get(attribute).map(str::to_string))
    }

    /// Copy of the whole page.
    pub fn snapshot(&self) -> BTreeMap<String, Element> {
        self.elements.read().clone()
    }
}

impl Page for MemoryPage {
    fn has_target(&self, target: &str) -> bool {
        self.auto_mount || self.mounted.read().contains(target)
    }

    fn set_attribute(&self, target: &str, attribute: &str, value: &str) {
        let mut elements = self.elements.write();
        let element = elements.entry(target.to_string()).or_default();
        if attribute == "innerHTML" {
            element.children.clear();
        }
        element
            .attributes
            .insert(attribute.to_string(), value.to_string());
    }

    fn append_child(&self, parent: &str, tag: &str, attributes: &[(String, String)]) {
        let mut elements = self.elements.write();
        elements
            .entry(parent.to_string())
            .or_default()
            .children
            .push((tag.to_string(), attributes.to_vec()));
    }

    fn attribute(&self, target: &str, attribute: &str) -> Option<String> {
        self.value(target, attribute)
    }
}

/// Key under which the last seen daemon start is persisted.
pub const DAEMON_STARTED_AT: &str = "DaemonStartedAt";
/// Key under which the refresh state is persisted.
pub const REFRESH_STATE: &str = "RefreshState";

/// Persisted string flags, the dashboard's local storage.
pub trait FlagStore: Send + Sync {
    /// Read a flag.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a flag.
    fn set(&self, key: &str, value: &str);
}

/// [`FlagStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryFlagStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }
}

/// [`FlagStore`] kept in a JSON file.
///
/// Writes go to a temporary file that is then renamed over the original.
#[derive(Debug)]
pub struct FileFlagStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileFlagStore {
    /// Open a store, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FlagStoreError> {
        let path = path.into();
        let values = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), FlagStoreError> {
        let data = serde_json::to_vec_pretty(values)?;
        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&values) {
            tracing::error!(path = %self.path.display(), key, "failed to persist flag: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn view_over(page: Arc<MemoryPage>, attempts: u32) -> ViewAttachment {
        let config = ViewConfig {
            attempts,
            retry_delay_ms: 1000,
        };
        ViewAttachment::new(page, &config)
    }

    #[tokio::test]
    async fn writes_to_mounted_target() {
        let page = Arc::new(MemoryPage::auto_mounted());
        let view = view_over(page.clone(), 5);

        assert!(view.set_display("Version", "innerHTML", "1.0.0").await);
        assert_eq!(page.value("Version", "innerHTML").as_deref(), Some("1.0.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let page = Arc::new(MemoryPage::empty());
        let view = view_over(page.clone(), 3);

        let started = tokio::time::Instant::now();
        assert!(!view.set_display("Missing", "innerHTML", "x").await);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert!(page.element("Missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn mount_announcement_wakes_pending_write() {
        let page = Arc::new(MemoryPage::empty());
        let view = view_over(page.clone(), 5);

        let writer = {
            let view = view.clone();
            tokio::spawn(async move { view.set_display("PeerID", "innerHTML", "12D3").await })
        };
        tokio::task::yield_now().await;

        page.mount(["PeerID"]);
        view.announce_mounted();

        assert!(writer.await.unwrap());
        assert_eq!(page.value("PeerID", "innerHTML").as_deref(), Some("12D3"));
    }

    #[test]
    fn inner_html_clears_children() {
        let page = MemoryPage::auto_mounted();
        page.append_child("Peers", "div", &[("innerHTML".into(), "a".into())]);
        page.set_attribute("Peers", "innerHTML", "");
        assert!(page.element("Peers").unwrap().children.is_empty());
    }

    #[test]
    fn file_flag_store_persists_between_opens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("flags.json");

        let store = FileFlagStore::open(&path).unwrap();
        store.set(REFRESH_STATE, "Not Refreshed");
        drop(store);

        let reopened = FileFlagStore::open(&path).unwrap();
        assert_eq!(reopened.get(REFRESH_STATE).as_deref(), Some("Not Refreshed"));
        assert_eq!(reopened.get(DAEMON_STARTED_AT), None);
        assert!(!path.with_extension("tmp").exists());
    }
}
