// baasctl - CLI for a backend-as-a-service REST API
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Request parameters and their flat, bracket-keyed encoding.
//!
//! Commands build a [`ParamValue`] tree; the transport either sends it as a
//! JSON body as-is or runs it through [`flatten`] to get `key[0]`-style
//! pairs for query strings and multipart forms.

use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("parameter `{key}` is a file and can only be sent as multipart form data")]
    FileNotAllowed { key: String },
}

/// A local file to upload as a multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: PathBuf,
    pub filename: Option<String>,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filename: None,
        }
    }

    pub fn file_name(&self) -> String {
        if let Some(name) = &self.filename {
            return name.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    File(FileRef),
    List(Vec<ParamValue>),
    Map(Vec<(String, ParamValue)>),
}

impl ParamValue {
    pub fn contains_file(&self) -> bool {
        match self {
            ParamValue::File(_) => true,
            ParamValue::List(items) => items.iter().any(ParamValue::contains_file),
            ParamValue::Map(entries) => entries.iter().any(|(_, v)| v.contains_file()),
            _ => false,
        }
    }

    /// Text form of a leaf for query strings and form fields.
    ///
    /// `None` for nulls (they are omitted) and files (they need a file part).
    /// Containers are sent as compact JSON.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ParamValue::Null | ParamValue::File(_) => None,
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::String(s) => Some(s.clone()),
            ParamValue::List(_) | ParamValue::Map(_) => self
                .to_json_value()
                .ok()
                .map(|json| json.to_string()),
        }
    }

    /// Unflattened JSON form, used for JSON request bodies.
    pub fn to_json_value(&self) -> Result<Value, ParamError> {
        Ok(match self {
            ParamValue::Null => Value::Null,
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Number(n) => Value::Number(n.clone()),
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::File(file) => {
                return Err(ParamError::FileNotAllowed {
                    key: file.file_name(),
                });
            }
            ParamValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(ParamValue::to_json_value)
                    .collect::<Result<_, _>>()?,
            ),
            ParamValue::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json_value()?);
                }
                Value::Object(map)
            }
        })
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value.into())
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Number(value.into())
    }
}

impl From<FileRef> for ParamValue {
    fn from(value: FileRef) -> Self {
        ParamValue::File(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(b),
            Value::Number(n) => ParamValue::Number(n),
            Value::String(s) => ParamValue::String(s),
            Value::Array(items) => ParamValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ParamValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Builder for the top-level parameter map of a request.
#[derive(Debug, Default, Clone)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    /// Sets `key` only when a value was supplied on the command line.
    pub fn set_opt<V: Into<ParamValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Like [`Params::set_opt`] for repeated flags; an empty list is left out.
    pub fn set_list<V: Into<ParamValue>>(self, key: &str, values: Vec<V>) -> Self {
        if values.is_empty() {
            self
        } else {
            self.set(key, values)
        }
    }

    pub fn into_value(self) -> ParamValue {
        ParamValue::Map(self.entries)
    }
}

/// Flat, insertion-ordered parameter set produced by [`flatten`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlatParams {
    entries: Vec<(String, ParamValue)>,
}

impl FlatParams {
    fn insert(&mut self, key: String, value: ParamValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_query_pairs(&self) -> Result<Vec<(String, String)>, ParamError> {
        let mut pairs = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            if let ParamValue::File(_) = value {
                return Err(ParamError::FileNotAllowed { key: key.clone() });
            }
            if let Some(text) = value.as_text() {
                pairs.push((key.clone(), text));
            }
        }
        Ok(pairs)
    }
}

/// Flattens `tree` into bracket-keyed pairs under `prefix`.
///
/// Only lists are descended into; a nested map is kept whole as a leaf and
/// ends up JSON-encoded by the transport.
pub fn flatten(tree: &ParamValue, prefix: &str) -> FlatParams {
    let mut output = FlatParams::default();
    flatten_into(tree, prefix, &mut output);
    output
}

fn flatten_into(tree: &ParamValue, prefix: &str, output: &mut FlatParams) {
    match tree {
        ParamValue::Map(entries) => {
            for (key, value) in entries {
                flatten_entry(prefix, key, value, output);
            }
        }
        ParamValue::List(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_entry(prefix, &index.to_string(), value, output);
            }
        }
        leaf => output.insert(prefix.to_string(), leaf.clone()),
    }
}

fn flatten_entry(prefix: &str, key: &str, value: &ParamValue, output: &mut FlatParams) {
    let final_key = if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}[{key}]")
    };
    match value {
        ParamValue::List(_) => flatten_into(value, &final_key, output),
        other => output.insert(final_key, other.clone()),
    }
}

/// Parses a `key=value` assignment from the command line.
///
/// A value starting with `@` names a file to upload.
pub fn parse_assignment(raw: &str) -> Option<(String, ParamValue)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = match value.strip_prefix('@') {
        Some(path) => ParamValue::File(FileRef::new(Path::new(path))),
        None => ParamValue::String(value.to_string()),
    };
    Some((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> ParamValue {
        value.into()
    }

    fn text_pairs(flat: &FlatParams) -> Vec<(String, String)> {
        flat.to_query_pairs().unwrap()
    }

    #[test]
    fn scalar_map_flattens_to_itself() {
        let flat = flatten(
            &tree(json!({"name": "docs", "enabled": true, "limit": 25})),
            "",
        );
        assert_eq!(flat.keys().collect::<Vec<_>>(), ["name", "enabled", "limit"]);
        assert_eq!(flat.get("name"), Some(&ParamValue::String("docs".into())));
        assert_eq!(flat.get("enabled"), Some(&ParamValue::Bool(true)));
        assert_eq!(flat.get("limit"), Some(&ParamValue::from(25i64)));
    }

    #[test]
    fn lists_use_index_keys() {
        let flat = flatten(&tree(json!({"filters": ["a", "b"]})), "");
        assert_eq!(
            text_pairs(&flat),
            vec![
                ("filters[0]".to_string(), "a".to_string()),
                ("filters[1]".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn nested_lists_recurse() {
        let flat = flatten(&tree(json!({"a": [["x", "y"], "z"]})), "");
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            ["a[0][0]", "a[0][1]", "a[1]"]
        );
    }

    #[test]
    fn nested_maps_stay_whole() {
        let flat = flatten(&tree(json!({"a": {"b": ["x", "y"]}})), "");
        assert_eq!(flat.keys().count(), 1);
        assert!(matches!(flat.get("a"), Some(ParamValue::Map(_))));
        assert_eq!(
            text_pairs(&flat),
            vec![("a".to_string(), r#"{"b":["x","y"]}"#.to_string())]
        );
    }

    #[test]
    fn maps_inside_lists_stay_whole() {
        let flat = flatten(&tree(json!({"rows": [{"id": 1}]})), "");
        assert_eq!(flat.keys().collect::<Vec<_>>(), ["rows[0]"]);
    }

    #[test]
    fn prefix_wraps_top_level_keys() {
        let flat = flatten(&tree(json!({"limit": 5, "tags": ["x"]})), "query");
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            ["query[limit]", "query[tags][0]"]
        );
    }

    #[test]
    fn empty_list_produces_no_keys() {
        let flat = flatten(&tree(json!({"queries": [], "search": "x"})), "");
        assert_eq!(flat.keys().collect::<Vec<_>>(), ["search"]);
    }

    #[test]
    fn query_pairs_skip_nulls_and_reject_files() {
        let params = Params::new()
            .set("search", "abc")
            .set("cursor", ParamValue::Null)
            .into_value();
        assert_eq!(
            text_pairs(&flatten(&params, "")),
            vec![("search".to_string(), "abc".to_string())]
        );

        let upload = Params::new()
            .set("file", FileRef::new("/tmp/report.pdf"))
            .into_value();
        let err = flatten(&upload, "").to_query_pairs().unwrap_err();
        assert_eq!(err, ParamError::FileNotAllowed { key: "file".into() });
    }

    #[test]
    fn big_numbers_keep_their_digits() {
        let value: Value = serde_json::from_str(r#"{"size": 9223372036854775807}"#).unwrap();
        let flat = flatten(&tree(value), "");
        assert_eq!(
            text_pairs(&flat),
            vec![("size".to_string(), "9223372036854775807".to_string())]
        );
    }

    #[test]
    fn builder_skips_missing_optionals_and_empty_lists() {
        let value = Params::new()
            .set("userId", "u1")
            .set_opt("name", None::<String>)
            .set_opt("email", Some("a@b.c"))
            .set_list("queries", Vec::<String>::new())
            .into_value();
        assert_eq!(
            value.to_json_value().unwrap(),
            json!({"userId": "u1", "email": "a@b.c"})
        );
    }

    #[test]
    fn json_body_rejects_files() {
        let value = Params::new()
            .set("file", FileRef::new("/tmp/a.png"))
            .into_value();
        assert!(value.contains_file());
        assert!(value.to_json_value().is_err());
    }

    #[test]
    fn parses_cli_assignments() {
        assert_eq!(
            parse_assignment("name=Docs"),
            Some(("name".to_string(), ParamValue::String("Docs".into())))
        );
        assert_eq!(
            parse_assignment("file=@./a.txt"),
            Some((
                "file".to_string(),
                ParamValue::File(FileRef::new("./a.txt"))
            ))
        );
        assert_eq!(parse_assignment("novalue"), None);
        assert_eq!(parse_assignment("=x"), None);
    }
}
