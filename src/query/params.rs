//! Raw query parameters: ordered, with `key[op]=v` and repeated keys grouped.

use regex::Regex;
use std::sync::OnceLock;

/// Reserved keys consumed by the pipeline; every other key is a filter.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Text(String),
    List(Vec<String>),
    /// `key[op]=value` pairs, in arrival order.
    Operators(Vec<(String, ParamValue)>),
}

impl ParamValue {
    /// Text form: lists are joined with `,`; operator objects have none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ParamValue::Text(s) => Some(s.clone()),
            ParamValue::List(v) => Some(v.join(",")),
            ParamValue::Operators(_) => None,
        }
    }

    fn push(self, value: String) -> ParamValue {
        match self {
            ParamValue::Text(first) => ParamValue::List(vec![first, value]),
            ParamValue::List(mut v) => {
                v.push(value);
                ParamValue::List(v)
            }
            ParamValue::Operators(_) => ParamValue::Text(value),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawParams {
    entries: Vec<(String, ParamValue)>,
}

fn bracket_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^\[\]]+)\[([^\[\]]*)\]$").expect("static regex"))
}

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group ordered `(key, value)` pairs as they arrive from the URL.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = RawParams::new();
        for (k, v) in pairs {
            params.push(k.into(), v.into());
        }
        params
    }

    pub fn push(&mut self, key: String, value: String) {
        let (base, op) = match bracket_key().captures(&key) {
            Some(c) => (c[1].to_string(), Some(c[2].to_string())),
            None => (key, None),
        };
        let pos = self.entries.iter().position(|(k, _)| *k == base);
        match (op, pos) {
            (None, None) => self.entries.push((base, ParamValue::Text(value))),
            (None, Some(i)) => {
                let existing = std::mem::replace(&mut self.entries[i].1, ParamValue::List(Vec::new()));
                self.entries[i].1 = existing.push(value);
            }
            (Some(op), None) if op.is_empty() => self.entries.push((base, ParamValue::List(vec![value]))),
            (Some(op), Some(i)) if op.is_empty() => {
                let existing = std::mem::replace(&mut self.entries[i].1, ParamValue::List(Vec::new()));
                self.entries[i].1 = match existing {
                    ParamValue::Operators(_) => ParamValue::List(vec![value]),
                    other => other.push(value),
                };
            }
            (Some(op), None) => self
                .entries
                .push((base, ParamValue::Operators(vec![(op, ParamValue::Text(value))]))),
            (Some(op), Some(i)) => match &mut self.entries[i].1 {
                ParamValue::Operators(ops) => match ops.iter_mut().find(|(o, _)| *o == op) {
                    Some((_, v)) => {
                        let existing = std::mem::replace(v, ParamValue::List(Vec::new()));
                        *v = existing.push(value);
                    }
                    None => ops.push((op, ParamValue::Text(value))),
                },
                slot => *slot = ParamValue::Operators(vec![(op, ParamValue::Text(value))]),
            },
        }
    }

    /// Replace (or add) a plain text value, keeping the key's position.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = ParamValue::Text(value.to_string()),
            None => self.entries.push((key.to_string(), ParamValue::Text(value.to_string()))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(ParamValue::as_text)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries that are not reserved keys, in order.
    pub fn filters(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.iter().filter(|(k, _)| !RESERVED_KEYS.contains(k))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_group_into_operators() {
        let p = RawParams::from_pairs([("price[gte]", "100"), ("price[lt]", "500"), ("difficulty", "easy")]);
        assert_eq!(
            p.get("price"),
            Some(&ParamValue::Operators(vec![
                ("gte".into(), ParamValue::Text("100".into())),
                ("lt".into(), ParamValue::Text("500".into())),
            ]))
        );
        assert_eq!(p.text("difficulty").as_deref(), Some("easy"));
    }

    #[test]
    fn repeated_keys_become_lists() {
        let p = RawParams::from_pairs([("difficulty", "easy"), ("difficulty", "medium"), ("tags[]", "a")]);
        assert_eq!(
            p.get("difficulty"),
            Some(&ParamValue::List(vec!["easy".into(), "medium".into()]))
        );
        assert_eq!(p.get("tags"), Some(&ParamValue::List(vec!["a".into()])));
        assert_eq!(p.text("difficulty").as_deref(), Some("easy,medium"));
    }

    #[test]
    fn later_form_wins_on_conflict() {
        let p = RawParams::from_pairs([("price", "5"), ("price[gte]", "3")]);
        assert!(matches!(p.get("price"), Some(ParamValue::Operators(_))));
        let p = RawParams::from_pairs([("price[gte]", "3"), ("price", "5")]);
        assert_eq!(p.get("price"), Some(&ParamValue::Text("5".into())));
    }

    #[test]
    fn filters_skip_reserved_keys_and_keep_order() {
        let p = RawParams::from_pairs([("sort", "price"), ("b", "1"), ("page", "2"), ("a", "2")]);
        let keys: Vec<&str> = p.filters().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn nested_brackets_stay_literal_keys() {
        let p = RawParams::from_pairs([("price[gte][x]", "1")]);
        assert!(p.contains("price[gte][x]"));
    }
}
