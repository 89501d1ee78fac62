//! Record normalization applied before documents are loaded

use chrono::NaiveDate;
use serde_json::Value;

use crate::constants::fields;

const SOURCE_DATE_FORMAT: &str = "%Y-%m-%d";
const TARGET_DATE_FORMAT: &str = "%d/%m/%Y";

/// Rewrites author names, institutions, category and date of an article record
#[derive(Debug, Clone, Copy, Default)]
pub struct ArticleNormalizer;

impl ArticleNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, mut record: Value) -> Value {
        let Some(map) = record.as_object_mut() else {
            return record;
        };

        if let Some(Value::Array(authors)) = map.get_mut(fields::REL_AUTHORS) {
            for author in authors.iter_mut().filter_map(Value::as_object_mut) {
                if let Some(Value::String(name)) = author.get_mut(fields::AUTHOR_NAME) {
                    *name = surname_first(name);
                }
                if let Some(Value::String(inst)) = author.get(fields::AUTHOR_INST) {
                    if !inst.is_empty() {
                        let list = split_institutions(inst);
                        author.insert(fields::AUTHOR_INST.to_string(), Value::from(list));
                    }
                }
            }
        }

        if let Some(Value::String(category)) = map.get_mut(fields::CATEGORY) {
            *category = title_case(category);
        }

        if let Some(date) = map.get_mut(fields::REL_DATE) {
            *date = match date.as_str().and_then(reformat_date) {
                Some(formatted) => Value::String(formatted),
                None => Value::Null,
            };
        }

        record
    }
}

/// "First Middle Last" becomes "Last, First Middle"; one-token names are kept
pub fn surname_first(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, {}", last, rest.join(" ")),
        _ => name.to_string(),
    }
}

/// Split on ';' when present, otherwise on ','
pub fn split_institutions(inst: &str) -> Vec<String> {
    let separator = if inst.contains(';') {
        ';'
    } else if inst.contains(',') {
        ','
    } else {
        return vec![inst.trim().to_string()];
    };
    inst.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn title_case(value: &str) -> String {
    value
        .trim()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// yyyy-MM-dd to dd/MM/yyyy, `None` when the input does not parse
pub fn reformat_date(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value.trim(), SOURCE_DATE_FORMAT)
        .ok()
        .map(|d| d.format(TARGET_DATE_FORMAT).to_string())
}
