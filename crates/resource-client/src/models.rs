//! List and watch results

/// A consistent snapshot returned by a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<K> {
    /// Resource version the snapshot was taken at; watches resume from here
    pub resource_version: String,
    /// Objects matching the filter
    pub items: Vec<K>,
}

/// A change notification from a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    /// An object started matching the filter
    Added(K),
    /// A matching object changed
    Modified(K),
    /// An object was deleted or stopped matching the filter
    Deleted(K),
    /// Progress marker carrying only a newer resource version
    Bookmark(String),
}

impl<K> WatchEvent<K> {
    /// Short name of the event kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
            Self::Bookmark(_) => "BOOKMARK",
        }
    }
}
