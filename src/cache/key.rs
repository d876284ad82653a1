//! Cache key derivation.

use std::collections::BTreeMap;
use url::form_urlencoded;

/// Canonical cache key: `{service}:{path}` plus sorted parameters.
///
/// Parameters may come from the path's own query string and from the
/// explicit query map; both are merged, then sorted by key and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(service: &str, path: &str, query: &BTreeMap<String, String>) -> Self {
        let (bare_path, inline_query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let mut params: Vec<(String, String)> = inline_query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        params.extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
        params.sort();
        params.dedup();

        let mut key = Self::prefix(service, bare_path);
        if !params.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            key.push('?');
            key.push_str(&encoded);
        }
        Self(key)
    }

    /// Prefix covering every key for `service` under `path`.
    pub fn prefix(service: &str, path: &str) -> String {
        format!("{}:{}", service, path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parameter_order_is_irrelevant() {
        let a = CacheKey::derive("fx", "/rates?pair=eur-matic&side=buy", &BTreeMap::new());
        let b = CacheKey::derive("fx", "/rates?side=buy&pair=eur-matic", &BTreeMap::new());
        let c = CacheKey::derive("fx", "/rates", &query(&[("side", "buy"), ("pair", "eur-matic")]));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.as_str(), "fx:/rates?pair=eur-matic&side=buy");
    }

    #[test]
    fn test_inline_and_map_merge() {
        let key = CacheKey::derive("fx", "/rates?pair=eur-matic", &query(&[("amount", "10")]));
        assert_eq!(key.as_str(), "fx:/rates?amount=10&pair=eur-matic");
    }

    #[test]
    fn test_no_params() {
        let key = CacheKey::derive("geo", "/lookup", &BTreeMap::new());
        assert_eq!(key.as_str(), "geo:/lookup");
        assert!(key.as_str().starts_with(&CacheKey::prefix("geo", "/look")));
    }

    #[test]
    fn test_services_do_not_collide() {
        let a = CacheKey::derive("geo", "/x", &BTreeMap::new());
        let b = CacheKey::derive("fx", "/x", &BTreeMap::new());
        assert_ne!(a, b);
    }
}
