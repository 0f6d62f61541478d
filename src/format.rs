//! Intermediate text formats used to exchange pair batches with a refiner.
//!
//! - `json`: a JSON array of `{id, eng, chinese}` objects
//! - `xml-pair`: `<pair>` blocks with `ID=`, `eng=`, `chinese=` lines
//! - `pseudo-toml`: `[pair]` sections with `id = `, `eng = `, `chinese = ` lines
//!
//! All three carry ASS override tags such as `{\i1}` through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RefineError};
use crate::pairs::SubtitlePair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairFormat {
    #[default]
    Json,
    XmlPair,
    PseudoToml,
}

impl PairFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::XmlPair => "xml-pair",
            Self::PseudoToml => "pseudo-toml",
        }
    }

    /// Text that opens the first pair in this format
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Json => "[",
            Self::XmlPair => "<pair>",
            Self::PseudoToml => "[pair]",
        }
    }

    pub fn serialize(&self, pairs: &[SubtitlePair]) -> Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(pairs)?),
            Self::XmlPair => Ok(serialize_xml_pair(pairs)),
            Self::PseudoToml => Ok(serialize_pseudo_toml(pairs)),
        }
    }

    pub fn deserialize(&self, text: &str) -> Result<Vec<SubtitlePair>> {
        match self {
            Self::Json => deserialize_json(text),
            Self::XmlPair => deserialize_xml_pair(text),
            Self::PseudoToml => deserialize_pseudo_toml(text),
        }
    }
}

impl fmt::Display for PairFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PairFormat {
    type Err = RefineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml-pair" => Ok(Self::XmlPair),
            "pseudo-toml" => Ok(Self::PseudoToml),
            _ => Err(RefineError::UnsupportedFormat(format!(
                "'{}'. Supported formats: json, xml-pair, pseudo-toml",
                s
            ))),
        }
    }
}

fn serialization_error<S: Into<String>>(message: S) -> RefineError {
    RefineError::Serialization(message.into())
}

fn deserialize_json(text: &str) -> Result<Vec<SubtitlePair>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| serialization_error(format!("Failed to parse JSON: {}", e)))?;

    if !value.is_array() {
        return Err(serialization_error("JSON must be an array"));
    }

    serde_json::from_value(value)
        .map_err(|e| serialization_error(format!("Invalid JSON pair: {}", e)))
}

fn serialize_xml_pair(pairs: &[SubtitlePair]) -> String {
    pairs
        .iter()
        .map(|pair| {
            format!(
                "<pair>\nID={}\neng={}\nchinese={}\n</pair>",
                pair.id, pair.source_text, pair.target_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn deserialize_xml_pair(text: &str) -> Result<Vec<SubtitlePair>> {
    let lines: Vec<&str> = text.trim().lines().map(str::trim).collect();
    let mut pairs = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].is_empty() {
            i += 1;
            continue;
        }

        if lines[i] != "<pair>" {
            return Err(serialization_error(format!(
                "Expected '<pair>' at line {}, got: {}",
                i + 1,
                lines[i]
            )));
        }
        i += 1;

        let mut values = Vec::with_capacity(3);
        for field in ["ID", "eng", "chinese"] {
            let line: &str = lines.get(i).copied().ok_or_else(|| {
                serialization_error(format!("Unexpected end of input while reading {}", field))
            })?;
            let (key, value) = line.split_once('=').ok_or_else(|| {
                serialization_error(format!("Expected '{}=...' at line {}, got: {}", field, i + 1, line))
            })?;
            if key != field {
                return Err(serialization_error(format!(
                    "Expected field '{}' at line {}, got: {}",
                    field,
                    i + 1,
                    key
                )));
            }
            values.push(value);
            i += 1;
        }

        match lines.get(i).copied() {
            Some("</pair>") => i += 1,
            Some(line) => {
                return Err(serialization_error(format!(
                    "Expected '</pair>' at line {}, got: {}",
                    i + 1,
                    line
                )));
            }
            None => return Err(serialization_error("Expected '</pair>' tag")),
        }

        pairs.push(SubtitlePair::new(parse_id(values[0])?, values[1], values[2]));
    }

    Ok(pairs)
}

fn serialize_pseudo_toml(pairs: &[SubtitlePair]) -> String {
    pairs
        .iter()
        .map(|pair| {
            format!(
                "[pair]\nid = {}\neng = {}\nchinese = {}",
                pair.id, pair.source_text, pair.target_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn deserialize_pseudo_toml(text: &str) -> Result<Vec<SubtitlePair>> {
    let lines: Vec<&str> = text.trim().lines().map(str::trim).collect();
    let mut pairs = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].is_empty() {
            i += 1;
            continue;
        }

        if lines[i] != "[pair]" {
            return Err(serialization_error(format!(
                "Expected '[pair]' at line {}, got: {}",
                i + 1,
                lines[i]
            )));
        }
        i += 1;

        let mut values = Vec::with_capacity(3);
        for field in ["id", "eng", "chinese"] {
            // tolerate a stray blank line inside a section
            if lines.get(i).is_some_and(|line| line.is_empty()) {
                i += 1;
            }
            let line: &str = lines.get(i).copied().ok_or_else(|| {
                serialization_error(format!("Unexpected end of input while reading {}", field))
            })?;
            let (key, value) = line.split_once('=').ok_or_else(|| {
                serialization_error(format!("Expected '{} = ...' at line {}, got: {}", field, i + 1, line))
            })?;
            if key.trim() != field {
                return Err(serialization_error(format!(
                    "Expected field '{}' at line {}, got: {}",
                    field,
                    i + 1,
                    key.trim()
                )));
            }
            values.push(value.trim());
            i += 1;
        }

        pairs.push(SubtitlePair::new(parse_id(values[0])?, values[1], values[2]));
    }

    Ok(pairs)
}

fn parse_id(raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| serialization_error(format!("Invalid ID value: {}", raw)))
}
