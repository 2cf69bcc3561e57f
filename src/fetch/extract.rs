//! Extraction: pull raw fields out of a page's HTML.
//!
//! Runs on the page source after the browser session has delivered it, so
//! nothing here touches the network.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::model::Extract;
use crate::normalize::clean_text;

use super::RawItem;

/// Longest fallback name taken from an item's own text.
const FALLBACK_NAME_CHARS: usize = 80;

/// Apply an extraction rule to a page.
///
/// Returns an error message when the rule itself can't be applied
/// (bad selector, unparseable embedded JSON). Missing elements are not
/// errors: they yield items with `None` values.
pub fn extract(rule: Option<&Extract>, html: &str) -> Result<Vec<RawItem>, String> {
    let document = Html::parse_document(html);

    match rule {
        None => {
            let body = selector("body")?;
            let value = document.select(&body).next().map(text_of);
            Ok(vec![RawItem::named("value", value)])
        }
        Some(Extract::Text { selector: sel, attr }) => {
            let sel = selector(sel)?;
            let value = document
                .select(&sel)
                .next()
                .and_then(|el| read(el, attr.as_deref()));
            Ok(vec![RawItem::named("value", value)])
        }
        Some(Extract::List {
            item,
            name,
            name_attr,
            value,
            value_attr,
        }) => {
            let item = selector(item)?;
            let name = selector(name)?;
            let value = selector(value)?;

            let items = document
                .select(&item)
                .map(|card| {
                    let title = card
                        .select(&name)
                        .next()
                        .and_then(|el| read(el, name_attr.as_deref()))
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| {
                            clean_text(&text_of(card))
                                .chars()
                                .take(FALLBACK_NAME_CHARS)
                                .collect()
                        });
                    let candidates: Vec<String> = card
                        .select(&value)
                        .filter_map(|el| read(el, value_attr.as_deref()))
                        .filter(|v| !v.trim().is_empty())
                        .collect();
                    RawItem {
                        name: Some(title),
                        value: pick_value(candidates),
                    }
                })
                .collect();
            Ok(items)
        }
        Some(Extract::EmbeddedJson {
            selector: sel,
            attr,
            items,
            name,
            value,
        }) => {
            let sel = selector(sel)?;
            let Some(raw) = document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr(attr))
            else {
                return Ok(Vec::new());
            };

            // Attribute values arrive entity-decoded from the parser.
            let data: Value = serde_json::from_str(raw)
                .map_err(|e| format!("embedded JSON in `{attr}` is invalid: {e}"))?;
            let array = data
                .pointer(items)
                .and_then(Value::as_array)
                .ok_or_else(|| format!("`{items}` does not point at an array"))?;

            Ok(array
                .iter()
                .map(|entry| RawItem {
                    name: entry.pointer(name).and_then(scalar),
                    value: entry.pointer(value).and_then(scalar),
                })
                .collect())
        }
    }
}

/// Parse a CSS selector, keeping the parser's message.
pub fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid selector `{css}`: {e}"))
}

/// The first candidate carrying a digit, else the first one at all.
///
/// Cards often put a label like "Ord. pris" next to the price under the
/// same selector.
fn pick_value(candidates: Vec<String>) -> Option<String> {
    let numeric = candidates
        .iter()
        .position(|v| v.chars().any(|c| c.is_ascii_digit()));
    candidates.into_iter().nth(numeric.unwrap_or(0))
}

fn read(el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    match attr {
        Some(attr) => el.value().attr(attr).map(String::from),
        None => Some(text_of(el)),
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// Render a JSON leaf as text. `null` is a missing value.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
