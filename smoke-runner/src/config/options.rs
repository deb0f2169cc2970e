// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::IndexMap;
use serde_json::Value;

/// An ordered map of options, as written in suite files and passed to processes.
///
/// Values follow the conventions in [`programs`](crate::programs): `true` or `""` is a bare
/// flag, `false` or `null` omits the option, arrays repeat it.
pub type OptionsMap = IndexMap<String, Value>;

/// Options merged from several sources. Later layers win.
///
/// The layers are, in order: built-in defaults, the suite file, and the command line. Merging
/// happens once, at construction time; the result is an ordinary [`OptionsMap`].
#[derive(Clone, Debug, Default)]
pub struct LayeredOptions {
    defaults: OptionsMap,
    suite: OptionsMap,
    command_line: OptionsMap,
}

impl LayeredOptions {
    /// Creates a new `LayeredOptions` with the given built-in defaults.
    pub fn new(defaults: OptionsMap) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Sets the options from the suite file.
    pub fn suite(mut self, suite: &OptionsMap) -> Self {
        self.suite = suite.clone();
        self
    }

    /// Sets a single command-line override. `None` leaves the lower layers alone.
    pub fn command_line(mut self, key: &str, value: Option<Value>) -> Self {
        if let Some(value) = value {
            self.command_line.insert(key.to_owned(), value);
        }
        self
    }

    /// Merges the layers into one map.
    ///
    /// Keys keep the position of their first appearance; values come from the last layer that
    /// sets them.
    pub fn merge(self) -> OptionsMap {
        let mut merged = self.defaults;
        for (key, value) in self.suite.into_iter().chain(self.command_line) {
            merged.insert(key, value);
        }
        merged
    }
}

/// Returns the value of `key` as a string, if it is one.
pub(crate) fn get_str<'a>(options: &'a OptionsMap, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str)
}

/// Returns the value of `key` as a port number, if it is one.
pub(crate) fn get_port(options: &OptionsMap, key: &str) -> Option<u16> {
    match options.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> OptionsMap {
        serde_json::from_value(value).expect("valid options map")
    }

    #[test]
    fn command_line_wins() {
        let merged = LayeredOptions::new(map(json!({"port": 1, "verbose": true})))
            .suite(&map(json!({"port": 2, "nojournal": ""})))
            .command_line("port", Some(json!(3)))
            .command_line("ignored", None)
            .merge();

        assert_eq!(
            merged,
            map(json!({"port": 3, "verbose": true, "nojournal": ""})),
        );
        assert_eq!(
            merged.keys().collect::<Vec<_>>(),
            vec!["port", "verbose", "nojournal"],
            "keys keep first-seen order"
        );
    }

    #[test]
    fn port_lookup() {
        let options = map(json!({"a": 20000, "b": "20001", "c": 70000, "d": true}));
        assert_eq!(get_port(&options, "a"), Some(20000));
        assert_eq!(get_port(&options, "b"), Some(20001));
        assert_eq!(get_port(&options, "c"), None);
        assert_eq!(get_port(&options, "d"), None);
        assert_eq!(get_port(&options, "missing"), None);
    }
}
