use indexmap::IndexMap;
use url::form_urlencoded;

/// Filter parameters taken from a request's query string.
///
/// Keys keep their first-seen order; a repeated key keeps its last value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterParams {
    pairs: IndexMap<String, String>,
}

impl FilterParams {
    /// Parse an `application/x-www-form-urlencoded` query string, skipping
    /// the keys in `excluded` (compared case-insensitively).
    ///
    /// Example: `Account=1000 OR 1001&limit=5` with `excluded = ["limit"]`.
    pub fn parse_query(query: &str, excluded: &[&str]) -> Self {
        let mut pairs = IndexMap::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if excluded.iter().any(|e| e.eq_ignore_ascii_case(&key)) {
                continue;
            }
            pairs.insert(key.into_owned(), value.into_owned());
        }
        Self { pairs }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_keeps_order() {
        let p = FilterParams::parse_query("Name=Acme%20ApS&Account=1000+OR+1001", &[]);
        let pairs: Vec<_> = p.iter().collect();
        assert_eq!(
            pairs,
            vec![("Name", "Acme ApS"), ("Account", "1000 OR 1001")]
        );
    }

    #[test]
    fn skips_excluded_keys() {
        let p = FilterParams::parse_query("Account=1&LIMIT=5", &["limit"]);
        assert_eq!(p.len(), 1);
        assert_eq!(p.get("Account"), Some("1"));
    }

    #[test]
    fn last_value_wins() {
        let p = FilterParams::parse_query("Account=1&Account=2", &[]);
        assert_eq!(p.get("Account"), Some("2"));
    }
}
