//! Client-scoped default headers shared by every in-flight request.

use crate::config::DefaultHeaderPolicy;
use crate::error::HttpError;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;

/// Concurrency-safe, multi-valued header collection.
///
/// Every call takes the lock once, so a write is never observed half-applied.
/// Reads (including the per-request injection done by
/// [`DefaultHeadersLayer`](crate::DefaultHeadersLayer)) share the lock; writers
/// are exclusive. Names are case-insensitive and values keep insertion order.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::new()?;
/// client
///     .headers()
///     .set("accept", "application/json")?
///     .add("x-feature", "a")?
///     .add("x-feature", "b")?;
///
/// assert_eq!(client.headers().get("Accept").as_deref(), Some("application/json"));
/// ```
#[derive(Debug, Default)]
pub struct HeaderStore {
    data: RwLock<HeaderMap>,
}

impl HeaderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, or `None` if the header is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.data.read().get(name).map(value_to_string)
    }

    /// All values for `name` in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<String> {
        self.data
            .read()
            .get_all(name)
            .iter()
            .map(value_to_string)
            .collect()
    }

    /// Append a value, keeping the values already stored under `name`.
    ///
    /// # Errors
    /// Returns `InvalidHeaderName` / `InvalidHeaderValue` for malformed input;
    /// the store is left untouched.
    pub fn add(&self, name: &str, value: &str) -> Result<&Self, HttpError> {
        let (name, value) = parse_header(name, value)?;
        self.data.write().append(name, value);
        Ok(self)
    }

    /// Replace every value stored under `name` with `value`.
    ///
    /// # Errors
    /// Returns `InvalidHeaderName` / `InvalidHeaderValue` for malformed input.
    pub fn set(&self, name: &str, value: &str) -> Result<&Self, HttpError> {
        let (name, value) = parse_header(name, value)?;
        self.data.write().insert(name, value);
        Ok(self)
    }

    /// Replace every value stored under `name` with `values` in one atomic step.
    ///
    /// # Errors
    /// Fails without modifying the store if the name or any value is invalid.
    pub fn set_values<I, V>(&self, name: &str, values: I) -> Result<&Self, HttpError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let name = HeaderName::try_from(name)?;
        let values = values
            .into_iter()
            .map(|v| HeaderValue::try_from(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut data = self.data.write();
        data.remove(&name);
        for value in values {
            data.append(name.clone(), value);
        }
        Ok(self)
    }

    /// Remove `name` entirely. No-op if absent.
    pub fn del(&self, name: &str) -> &Self {
        self.data.write().remove(name);
        self
    }

    /// Remove every header.
    pub fn clear(&self) -> &Self {
        self.data.write().clear();
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.data.read().contains_key(name)
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().keys_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> HeaderMap {
        self.data.read().clone()
    }

    pub(crate) fn append_parsed(&self, name: HeaderName, value: HeaderValue) {
        self.data.write().append(name, value);
    }

    /// Copy the stored headers onto `target` under a read lock.
    ///
    /// The guard is dropped before returning, so callers never hold it across
    /// the network call.
    pub(crate) fn apply_to(&self, target: &mut HeaderMap, policy: DefaultHeaderPolicy) {
        let data = self.data.read();
        match policy {
            DefaultHeaderPolicy::Append => {
                for (name, value) in data.iter() {
                    target.append(name.clone(), value.clone());
                }
            }
            DefaultHeaderPolicy::PreferRequest => {
                for name in data.keys() {
                    if target.contains_key(name) {
                        continue;
                    }
                    for value in data.get_all(name) {
                        target.append(name.clone(), value.clone());
                    }
                }
            }
            DefaultHeaderPolicy::PreferDefault => {
                for name in data.keys() {
                    target.remove(name);
                    for value in data.get_all(name) {
                        target.append(name.clone(), value.clone());
                    }
                }
            }
        }
    }
}

/// Validate a name/value pair.
pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => Ok((name, value)),
        (Err(e), _) => Err(HttpError::InvalidHeaderName(e)),
        (_, Err(e)) => Err(HttpError::InvalidHeaderValue(e)),
    }
}

fn value_to_string(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
