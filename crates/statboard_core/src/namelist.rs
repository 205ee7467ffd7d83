use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

pub type NamelistGroup = BTreeMap<String, Value>;
pub type Namelist = BTreeMap<String, NamelistGroup>;

/// Location of the atmosphere namelist inside a case directory.
pub fn case_namelist_path(case_dir: &Path) -> PathBuf {
    case_dir.join("CaseDocs").join("atm_in")
}

pub fn read_namelist_file(path: &Path) -> Result<Namelist> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_namelist(&String::from_utf8_lossy(&bytes)))
}

/// Parse Fortran namelist text into `group -> key -> value`.
///
/// Group and key names are lowercased and array subscripts are dropped from keys,
/// so `ncdata(1)` and `NCDATA` land on the same entry. Later assignments win.
pub fn parse_namelist(text: &str) -> Namelist {
    let text = strip_comments(text);
    let chars = text.chars().collect::<Vec<_>>();
    let mut namelist = Namelist::new();

    let mut index = 0;
    while index < chars.len() {
        if chars[index] != '&' {
            index += 1;
            continue;
        }
        let name_start = index + 1;
        let mut name_end = name_start;
        while name_end < chars.len() && is_name_char(chars[name_end]) {
            name_end += 1;
        }
        if name_end == name_start {
            index += 1;
            continue;
        }
        let name = chars[name_start..name_end]
            .iter()
            .collect::<String>()
            .to_lowercase();
        if name == "end" {
            index = name_end;
            continue;
        }

        let body_end = find_group_end(&chars, name_end);
        let body = chars[name_end..body_end].iter().collect::<String>();
        namelist
            .entry(name)
            .or_default()
            .extend(parse_group_body(&body));
        index = if chars.get(body_end) == Some(&'/') {
            body_end + 1
        } else {
            body_end
        };
    }
    namelist
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| {
            let mut quote = None;
            for (offset, c) in line.char_indices() {
                match (quote, c) {
                    (None, '\'' | '"') => quote = Some(c),
                    (Some(open), _) if c == open => quote = None,
                    (None, '!') => return &line[..offset],
                    _ => {}
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Index of the closing `/`, or of the next `&` for `&end`-terminated groups.
fn find_group_end(chars: &[char], start: usize) -> usize {
    let mut quote = None;
    let mut index = start;
    while index < chars.len() {
        let c = chars[index];
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '/' => return index,
            None if c == '&' => return index,
            None => {}
        }
        index += 1;
    }
    chars.len()
}

fn parse_group_body(body: &str) -> NamelistGroup {
    let chars = body.chars().collect::<Vec<_>>();
    let anchors = assignment_anchors(&chars);
    let mut group = NamelistGroup::new();

    for (position, anchor) in anchors.iter().enumerate() {
        let value_end = anchors
            .get(position + 1)
            .map(|next| next.key_start)
            .unwrap_or(chars.len());
        let raw = chars[anchor.value_start..value_end].iter().collect::<String>();
        group.insert(anchor.key.clone(), parse_value(&raw));
    }
    group
}

struct Anchor {
    key: String,
    key_start: usize,
    value_start: usize,
}

/// Every `key =` or `key(i) =` outside quotes.
fn assignment_anchors(chars: &[char]) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    let mut quote = None;
    for (index, &c) in chars.iter().enumerate() {
        match quote {
            Some(open) if c == open => {
                quote = None;
                continue;
            }
            Some(_) => continue,
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                continue;
            }
            None => {}
        }
        if c != '=' {
            continue;
        }

        let mut cursor = index;
        while cursor > 0 && chars[cursor - 1].is_whitespace() {
            cursor -= 1;
        }
        if cursor > 0 && chars[cursor - 1] == ')' {
            while cursor > 0 && chars[cursor - 1] != '(' {
                cursor -= 1;
            }
            cursor = cursor.saturating_sub(1);
        }
        let key_end = cursor;
        while cursor > 0 && is_name_char(chars[cursor - 1]) {
            cursor -= 1;
        }
        if cursor == key_end {
            continue;
        }
        anchors.push(Anchor {
            key: chars[cursor..key_end]
                .iter()
                .collect::<String>()
                .to_lowercase(),
            key_start: cursor,
            value_start: index + 1,
        });
    }
    anchors
}

fn parse_value(raw: &str) -> Value {
    let items = split_values(raw);
    match items.len() {
        0 => Value::Null,
        1 => parse_scalar(&items[0]),
        _ => Value::Array(items.iter().map(|item| parse_scalar(item)).collect()),
    }
}

/// Split on commas outside quotes; empty entries are dropped.
fn split_values(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    for c in raw.chars() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ',' => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            None => {}
        }
        current.push(c);
    }
    items.push(current);
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        ".true." | ".t." | "t" => return Value::Bool(true),
        ".false." | ".f." | "f" => return Value::Bool(false),
        _ => {}
    }
    if let Some(text) = unquote(raw) {
        return Value::String(text);
    }

    let numeric = raw.replace(['d', 'D'], "e");
    let looks_float = numeric.contains('.') || numeric.contains(['e', 'E']);
    if looks_float {
        if let Ok(value) = numeric.parse::<f64>()
            && value.is_finite()
        {
            return Value::from(value);
        }
    } else if let Ok(value) = numeric.parse::<i64>() {
        return Value::from(value);
    }
    Value::String(raw.to_string())
}

fn unquote(raw: &str) -> Option<String> {
    let quote = raw.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if raw.len() < 2 || !raw.ends_with(quote) {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    let doubled = format!("{quote}{quote}");
    Some(inner.replace(&doubled, &quote.to_string()))
}
