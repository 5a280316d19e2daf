use std::fmt;

use serde_json::Value;
use shared::domain::{QueryModel, DEFAULT_PAGE, DEFAULT_PAGE_SIZE};

const METADATA_KEY: &str = "meta";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn metadata() -> Self {
        Self::new(METADATA_KEY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flat query parameters; multi-valued fields repeat their name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireRequest {
    pairs: Vec<(String, String)>,
}

impl WireRequest {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(key, _)| key == name)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }

    fn push(&mut self, name: &str, value: impl Into<String>) {
        self.pairs.push((name.to_string(), value.into()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub request: WireRequest,
    pub cache_key: CacheKey,
}

enum WireValue {
    Text(String),
    Number(u64),
    Many(Vec<String>),
}

impl WireValue {
    fn text(value: Option<&str>) -> Option<Self> {
        value
            .filter(|v| !v.is_empty())
            .map(|v| WireValue::Text(v.to_string()))
    }

    fn many<'a>(values: Option<impl Iterator<Item = &'a str>>) -> Option<Self> {
        let values: Vec<String> = values?
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        (!values.is_empty()).then_some(WireValue::Many(values))
    }

    fn key_value(&self) -> Value {
        match self {
            WireValue::Text(text) => Value::String(text.clone()),
            WireValue::Number(number) => Value::from(*number),
            WireValue::Many(values) => {
                let mut sorted = values.clone();
                sorted.sort_unstable();
                sorted.dedup();
                Value::Array(sorted.into_iter().map(Value::String).collect())
            }
        }
    }
}

// Key sorts fields by name and set members by value.
pub fn normalize(model: &QueryModel) -> NormalizedRequest {
    let page = if model.page == 0 { DEFAULT_PAGE } else { model.page };
    let page_size = if model.page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        model.page_size
    };

    let fields: Vec<(&'static str, Option<WireValue>)> = vec![
        ("customer_name", WireValue::text(model.customer_name.as_deref())),
        ("phone", WireValue::text(model.phone.as_deref())),
        ("region", WireValue::many(model.region.as_ref().map(|s| s.iter()))),
        ("gender", WireValue::many(model.gender.as_ref().map(|s| s.iter()))),
        ("age_min", model.age_min.map(|v| WireValue::Number(v.into()))),
        ("age_max", model.age_max.map(|v| WireValue::Number(v.into()))),
        (
            "product_category",
            WireValue::many(model.product_category.as_ref().map(|s| s.iter())),
        ),
        ("tag", WireValue::many(model.tag.as_ref().map(|s| s.iter()))),
        (
            "payment_method",
            WireValue::many(model.payment_method.as_ref().map(|s| s.iter())),
        ),
        (
            "date_from",
            model.date_from.map(|d| WireValue::Text(d.format("%Y-%m-%d").to_string())),
        ),
        (
            "date_to",
            model.date_to.map(|d| WireValue::Text(d.format("%Y-%m-%d").to_string())),
        ),
        ("page", Some(WireValue::Number(page.into()))),
        ("sort_by", Some(WireValue::Text(model.sort_by.as_str().into()))),
        ("order", Some(WireValue::Text(model.sort_order.as_str().into()))),
        ("page_size", Some(WireValue::Number(page_size.into()))),
    ];
    let fields: Vec<(&'static str, WireValue)> = fields
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect();

    let mut request = WireRequest::default();
    for (name, value) in &fields {
        match value {
            WireValue::Text(text) => request.push(name, text.as_str()),
            WireValue::Number(number) => request.push(name, number.to_string()),
            WireValue::Many(values) => {
                for value in values {
                    request.push(name, value.as_str());
                }
            }
        }
    }

    let mut keyed: Vec<(&str, Value)> = fields
        .iter()
        .map(|(name, value)| (*name, value.key_value()))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
    let cache_key = Value::Array(
        keyed
            .into_iter()
            .map(|(name, value)| Value::Array(vec![Value::String(name.to_string()), value]))
            .collect(),
    );

    NormalizedRequest {
        request,
        cache_key: CacheKey::new(cache_key.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/normalize_tests.rs"]
mod tests;
