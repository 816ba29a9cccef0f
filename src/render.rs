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

//! Terminal rendering of API responses.
//!
//! Responses are decoded into [`RenderValue`] (big integers kept as exact
//! digits) and printed either as indented JSON or as `key : value` lines
//! with column-aligned tables for nested records and lists.

use owo_colors::OwoColorize;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::io::{self, IsTerminal, Write};
use thiserror::Error;

/// Printed for a list with nothing to tabulate.
pub const EMPTY_ARRAY: &str = "[]";
/// Printed for missing and null cells.
pub const PLACEHOLDER: &str = "-";

/// Largest integer a float64 holds exactly (2^53 - 1).
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("writing output: {0}")]
    Io(#[from] io::Error),
    #[error("serializing output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json { OutputMode::Json } else { OutputMode::Table }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub color: bool,
}

impl RenderOptions {
    /// Colour only when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        Self {
            color: io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Scalar::Null => "null".to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::String(s) => s.clone(),
        }
    }
}

/// Field-ordered response record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, RenderValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: RenderValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RenderValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RenderValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, RenderValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, RenderValue)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderValue {
    Scalar(Scalar),
    /// Integer outside the float64-safe range, kept as its exact digits.
    BigInteger(String),
    Record(Record),
    List(Vec<RenderValue>),
}

impl RenderValue {
    pub fn null() -> Self {
        RenderValue::Scalar(Scalar::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RenderValue::Scalar(Scalar::Null))
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            RenderValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Converts a decoded body. Requires `serde_json` with
    /// `arbitrary_precision` so numbers still carry their source text.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => RenderValue::null(),
            Value::Bool(b) => RenderValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => {
                let text = n.to_string();
                if is_big_integer(&text) {
                    RenderValue::BigInteger(text)
                } else {
                    RenderValue::Scalar(Scalar::Number(n))
                }
            }
            Value::String(s) => RenderValue::Scalar(Scalar::String(s)),
            Value::Array(items) => {
                RenderValue::List(items.into_iter().map(RenderValue::from_json).collect())
            }
            Value::Object(map) => RenderValue::Record(
                map.into_iter()
                    .map(|(k, v)| (k, RenderValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RenderValue::Scalar(Scalar::Null) => Value::Null,
            RenderValue::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            RenderValue::Scalar(Scalar::Number(n)) => Value::Number(n.clone()),
            RenderValue::Scalar(Scalar::String(s)) => Value::String(s.clone()),
            RenderValue::BigInteger(digits) => digits
                .parse::<Number>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(digits.clone())),
            RenderValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            RenderValue::Record(record) => {
                let mut map = Map::new();
                for (key, value) in record.iter() {
                    map.insert(key.to_string(), value.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

fn is_big_integer(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return false;
    }
    match significant.parse::<u64>() {
        Ok(magnitude) => magnitude > MAX_SAFE_INTEGER,
        Err(_) => true,
    }
}

/// Writes `value` to `out` in the requested mode.
pub fn render<W: Write>(
    value: &RenderValue,
    mode: OutputMode,
    opts: &RenderOptions,
    out: &mut W,
) -> Result<(), RenderError> {
    let mut renderer = Renderer { opts, out };
    match mode {
        OutputMode::Json => renderer.write_json(value),
        OutputMode::Table => renderer.write_value(value),
    }
}

struct Renderer<'a, W: Write> {
    opts: &'a RenderOptions,
    out: &'a mut W,
}

impl<W: Write> Renderer<'_, W> {
    fn write_value(&mut self, value: &RenderValue) -> Result<(), RenderError> {
        match value {
            RenderValue::Record(record) => self.write_record(record),
            RenderValue::List(items) => self.write_list(items),
            RenderValue::BigInteger(digits) => Ok(writeln!(self.out, "{digits}")?),
            RenderValue::Scalar(scalar) => Ok(writeln!(self.out, "{}", scalar.text())?),
        }
    }

    fn write_record(&mut self, record: &Record) -> Result<(), RenderError> {
        for (key, value) in record.iter() {
            match value {
                RenderValue::List(items) => {
                    self.write_section(key)?;
                    self.write_list(items)?;
                }
                RenderValue::Record(_) => {
                    self.write_section(key)?;
                    self.write_table(std::slice::from_ref(value))?;
                }
                RenderValue::BigInteger(digits) => self.write_pair(key, digits)?,
                RenderValue::Scalar(scalar) => self.write_pair(key, &scalar.text())?,
            }
        }
        Ok(())
    }

    fn write_list(&mut self, items: &[RenderValue]) -> Result<(), RenderError> {
        let tabular = items.is_empty()
            || items.iter().any(|item| item.as_record().is_some())
            || items.iter().all(RenderValue::is_null);
        if tabular {
            self.write_table(items)
        } else {
            self.write_json(&RenderValue::List(items.to_vec()))
        }
    }

    fn write_json(&mut self, value: &RenderValue) -> Result<(), RenderError> {
        serde_json::to_writer_pretty(&mut *self.out, &value.to_json())?;
        writeln!(self.out)?;
        Ok(())
    }

    fn write_section(&mut self, key: &str) -> Result<(), RenderError> {
        if self.opts.color {
            writeln!(self.out, "{}", key.yellow().bold().underline())?;
        } else {
            writeln!(self.out, "{key}")?;
        }
        Ok(())
    }

    fn write_pair(&mut self, key: &str, value: &str) -> Result<(), RenderError> {
        if self.opts.color {
            writeln!(self.out, "{} : {value}", key.yellow().bold())?;
        } else {
            writeln!(self.out, "{key} : {value}")?;
        }
        Ok(())
    }

    fn write_table(&mut self, rows: &[RenderValue]) -> Result<(), RenderError> {
        if rows.is_empty() {
            writeln!(self.out, "{EMPTY_ARRAY}")?;
            return Ok(());
        }

        let columns = union_columns(rows);
        if columns.is_empty() {
            writeln!(self.out, "{EMPTY_ARRAY}")?;
            return Ok(());
        }

        let table: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                let record = row.as_record();
                columns
                    .iter()
                    .map(|col| cell_text(record.and_then(|r| r.get(col))))
                    .collect()
            })
            .collect();

        let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
        for row in &table {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }

        let header: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let padded = pad(col, widths[idx], idx + 1 == columns.len());
                if self.opts.color {
                    padded.cyan().bold().italic().to_string()
                } else {
                    padded
                }
            })
            .collect();
        writeln!(self.out, "{}", header.join("  "))?;

        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(self.out, "{}", separator.join("  "))?;

        for row in &table {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(idx, cell)| pad(cell, widths[idx], idx + 1 == row.len()))
                .collect();
            writeln!(self.out, "{}", line.join("  "))?;
        }

        Ok(())
    }
}

/// Union of the keys of every record in `rows`, in first-seen order.
/// Non-record entries contribute nothing.
fn union_columns(rows: &[RenderValue]) -> Vec<String> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    for row in rows {
        let Some(record) = row.as_record() else {
            continue;
        };
        for key in record.keys() {
            if seen.insert(key) {
                columns.push(key.to_string());
            }
        }
    }
    columns
}

fn cell_text(value: Option<&RenderValue>) -> String {
    match value {
        None | Some(RenderValue::Scalar(Scalar::Null)) => PLACEHOLDER.to_string(),
        Some(RenderValue::Scalar(scalar)) => scalar.text(),
        Some(RenderValue::BigInteger(digits)) => digits.clone(),
        Some(nested @ (RenderValue::List(_) | RenderValue::Record(_))) => nested.to_json().to_string(),
    }
}

fn pad(text: &str, width: usize, last: bool) -> String {
    if last {
        return text.to_string();
    }
    let fill = width.saturating_sub(text.chars().count());
    format!("{text}{}", " ".repeat(fill))
}
