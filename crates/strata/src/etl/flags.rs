//! Process-wide named boolean flags.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::info;

/// Thread-safe map of named flags; an unknown flag reads as false.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::etl::NamedFlags;
///
/// let flags = NamedFlags::new();
/// assert!(!flags.get("keepRawData"));
/// flags.set("keepRawData", true);
/// assert!(flags.get("keepRawData"));
/// ```
#[derive(Debug, Default)]
pub struct NamedFlags {
    flags: RwLock<HashMap<String, bool>>,
}

impl NamedFlags {
    /// Creates an empty flag map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a flag.
    pub fn get(&self, name: &str) -> bool {
        let flags = self.flags.read().unwrap_or_else(|e| e.into_inner());
        flags.get(name).copied().unwrap_or(false)
    }

    /// Sets a flag and returns its previous value.
    pub fn set(&self, name: &str, value: bool) -> bool {
        let mut flags = self.flags.write().unwrap_or_else(|e| e.into_inner());
        let previous = flags.insert(name.to_string(), value).unwrap_or(false);
        if previous != value {
            info!("Named flag {} changed from {} to {}", name, previous, value);
        }
        previous
    }

    /// Returns every flag that has been set, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        let flags = self.flags.read().unwrap_or_else(|e| e.into_inner());
        flags.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unset_flags_are_false() {
        let flags = NamedFlags::new();
        assert!(!flags.get("anything"));
        assert!(!flags.set("anything", true));
        assert!(flags.get("anything"));
        assert!(flags.set("anything", false));
        assert_eq!(flags.snapshot().get("anything"), Some(&false));
    }

    #[test]
    fn test_concurrent_writers() {
        let flags = Arc::new(NamedFlags::new());
        std::thread::scope(|scope| {
            for i in 0..8 {
                let flags = Arc::clone(&flags);
                scope.spawn(move || flags.set(&format!("flag{}", i), true));
            }
        });
        assert_eq!(flags.snapshot().len(), 8);
        assert!(flags.get("flag7"));
    }
}
