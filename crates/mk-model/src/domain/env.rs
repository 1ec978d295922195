use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Removes duplicate entries, keeping the first occurrence of each.
///
/// `dedup(dedup(xs)) == dedup(xs)` and the output is never longer than the input.
pub fn dedup<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// `KEY=VALUE` environment list handed to the container engine inside a unit.
///
/// Serialized as a transparent array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineEnv(Vec<String>);

impl EngineEnv {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Appends entries; duplicates are kept until [`EngineEnv::deduped`].
    pub fn extend<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(items.into_iter().map(Into::into));
    }

    /// Value of the first entry for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find_map(|e| {
            let (k, v) = e.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Copy with duplicate entries removed, first-seen order preserved.
    pub fn deduped(&self) -> EngineEnv {
        EngineEnv(dedup(self.0.iter().cloned()))
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for EngineEnv {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}
