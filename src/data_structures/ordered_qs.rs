//! Ordered query strings

use crate::utils::{Also, Apply};

use smallvec::SmallVec;

/// Immutable query string container
///
/// Holds url-decoded pairs in ascending order. The canonical query
/// string is derived from this by re-encoding each pair and re-sorting
/// on the encoded form.
#[derive(Debug, Default)]
pub struct OrderedQs {
    /// Ascending query strings
    qs: SmallVec<[(String, String); 16]>,
}

impl OrderedQs {
    /// Parses `OrderedQs` from an url-encoded query string
    pub fn from_query(query: &str) -> Result<Self, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)?
            .also(|v| v.sort())
            .apply(|qs| Ok(Self { qs: qs.into() }))
    }

    /// Gets query value by name. Time `O(logn)`
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        let qs = self.qs.as_ref();
        match qs.binary_search_by_key(&name, |&(ref n, _)| n.as_str()) {
            Ok(idx) => qs.get(idx).map(|&(_, ref v)| v.as_str()),
            Err(_) => None,
        }
    }
}

impl AsRef<[(String, String)]> for OrderedQs {
    fn as_ref(&self) -> &[(String, String)] {
        self.qs.as_ref()
    }
}
