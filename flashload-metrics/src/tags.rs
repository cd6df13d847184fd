use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Sorted, deduplicated `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSet {
    // Series usually carry at most `step` and `status`.
    tags: SmallVec<[(Arc<str>, Arc<str>); 4]>,
}

impl TagSet {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut tags: SmallVec<[(Arc<str>, Arc<str>); 4]> = pairs
            .iter()
            .map(|(k, v)| (Arc::<str>::from(*k), Arc::<str>::from(*v)))
            .collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        // Last write wins for duplicate keys.
        tags.reverse();
        tags.dedup_by(|a, b| a.0 == b.0);
        tags.reverse();
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let idx = self.tags.partition_point(|(k, _)| k.as_ref() < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (k.as_ref() == key).then_some(v.as_ref()))
    }

    /// True when every pair of `selector` is present with the same value.
    pub fn matches(&self, selector: &TagSet) -> bool {
        selector.iter().all(|(k, v)| self.get(k) == Some(v))
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}
