use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::plans::Dimensions;

/// One image in the in-memory dataset.
#[derive(Clone, PartialEq)]
pub struct MediaItem {
    pub id: String,
    pub file_name: String,
    pub content: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub caption: Option<String>,
    pub tags: Vec<String>,
}

impl fmt::Debug for MediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaItem")
            .field("id", &self.id)
            .field("file_name", &self.file_name)
            .field("content_len", &self.content.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("caption", &self.caption)
            .field("tags", &self.tags)
            .finish()
    }
}

impl MediaItem {
    /// Builds an item whose id is derived from its file name and bytes, so two
    /// files with identical content stay distinct items.
    pub fn from_content(
        file_name: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
    ) -> Self {
        let content = content.into();
        let file_name = file_name.into();
        Self {
            id: item_id(&file_name, &content),
            file_name,
            content,
            width,
            height,
            caption: None,
            tags: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Replacement of an item's content together with its measured dimensions.
#[derive(Clone, PartialEq)]
pub struct MediaPatch {
    pub id: String,
    pub content: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for MediaPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPatch")
            .field("id", &self.id)
            .field("content_len", &self.content.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// The dataset layer as seen by the orchestrator: a readable item list, an
/// in-place patch by id, and an append for newly generated items.
pub trait MediaStore: Send + Sync {
    fn snapshot(&self) -> Vec<MediaItem>;
    fn get(&self, id: &str) -> Option<MediaItem>;
    /// Returns `false` when no item with the patch id exists.
    fn apply(&self, patch: MediaPatch) -> bool;
    fn append(&self, item: MediaItem);
}

#[derive(Debug, Default, Clone)]
pub struct MediaCollection {
    items: Arc<RwLock<IndexMap<String, MediaItem>>>,
}

impl MediaCollection {
    pub fn new(items: impl IntoIterator<Item = MediaItem>) -> Self {
        let collection = Self::default();
        for item in items {
            collection.append(item);
        }
        collection
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, MediaItem>> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, MediaItem>> {
        self.items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MediaStore for MediaCollection {
    fn snapshot(&self) -> Vec<MediaItem> {
        self.read().values().cloned().collect()
    }

    fn get(&self, id: &str) -> Option<MediaItem> {
        self.read().get(id).cloned()
    }

    fn apply(&self, patch: MediaPatch) -> bool {
        let mut items = self.write();
        let Some(item) = items.get_mut(&patch.id) else {
            return false;
        };
        item.content = patch.content;
        item.width = patch.width;
        item.height = patch.height;
        true
    }

    fn append(&self, item: MediaItem) {
        self.write().insert(item.id.clone(), item);
    }
}

pub fn item_id(file_name: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes);
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, bytes: &[u8]) -> MediaItem {
        MediaItem::from_content(name, bytes.to_vec(), 64, 48)
    }

    #[test]
    fn id_depends_on_name_and_content() {
        let a = item("a.png", b"same");
        let b = item("b.png", b"same");
        let c = item("a.png", b"other");
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id, item("a.png", b"same").id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn identical_files_are_kept_as_separate_items() {
        let collection = MediaCollection::new([item("a.png", b"same"), item("b.png", b"same")]);
        let names = collection
            .snapshot()
            .into_iter()
            .map(|item| item.file_name)
            .collect::<Vec<String>>();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn apply_replaces_content_and_dimensions_together() {
        let original = item("a.png", b"one");
        let collection = MediaCollection::new([original.clone()]);

        let applied = collection.apply(MediaPatch {
            id: original.id.clone(),
            content: Arc::from(b"two".to_vec()),
            width: 128,
            height: 96,
        });
        assert!(applied);

        let patched = collection.get(&original.id).unwrap_or(original);
        assert_eq!(&*patched.content, b"two");
        assert_eq!((patched.width, patched.height), (128, 96));
        assert_eq!(patched.file_name, "a.png");
    }

    #[test]
    fn apply_unknown_id_is_rejected() {
        let collection = MediaCollection::new([item("a.png", b"one")]);
        let applied = collection.apply(MediaPatch {
            id: "missing".to_string(),
            content: Arc::from(Vec::new()),
            width: 1,
            height: 1,
        });
        assert!(!applied);
    }

    #[test]
    fn append_preserves_insertion_order_and_clones_share_state() {
        let collection = MediaCollection::default();
        let view = collection.clone();
        collection.append(item("z.png", b"z"));
        collection.append(item("a.png", b"a"));
        let names = view
            .snapshot()
            .into_iter()
            .map(|item| item.file_name)
            .collect::<Vec<String>>();
        assert_eq!(names, vec!["z.png", "a.png"]);
    }
}
