//! Tolerant value caster
//!
//! Coerces raw backend values into the JSON shape of their data type right
//! before a response is assembled. A value that cannot be coerced is
//! returned unchanged; only `NaN` numbers turn into null.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde_json::{Map, Value};
use strata_schema::dtype::{DataType, TypeKind};
use strata_schema::{Manifest, PropId};

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d.%m.%Y", "%Y%m%d"];

const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M", "%H%M%S"];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];

const GEOMETRY_TYPES: [&str; 7] = [
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// Cast a value of a property, descending into composite types
pub fn cast_value(manifest: &Manifest, prop: PropId, value: Value) -> Value {
    let property = manifest.prop(prop);
    match &property.dtype {
        DataType::Ref(r) | DataType::ExternalRef(r) => match value {
            Value::Object(object) => {
                let target = manifest.model_by_name(&r.model);
                let cast = object
                    .into_iter()
                    .map(|(key, item)| {
                        if let Some(sub) = r.sub_property(&key) {
                            return (key, cast_value(manifest, sub, item));
                        }
                        let refprop = r
                            .refprops
                            .iter()
                            .find(|id| manifest.prop(**id).name == key)
                            .copied();
                        match (refprop, target) {
                            (Some(refprop), Some(_)) if key != "_id" => {
                                let item = cast_value(manifest, refprop, item);
                                (key, item)
                            }
                            _ => (key, item),
                        }
                    })
                    .collect::<Map<String, Value>>();
                Value::Object(cast)
            }
            other => other,
        },
        DataType::Denorm(denorm) => match denorm.rel_prop {
            Some(rel) => cast_value(manifest, rel, value),
            None => value,
        },
        DataType::Inherit(inherit) => match inherit.base_prop {
            Some(base) => cast_value(manifest, base, value),
            None => value,
        },
        DataType::Object(object) => match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| {
                        match object.properties.iter().find(|(name, _)| *name == key) {
                            Some((_, sub)) => {
                                let item = cast_value(manifest, *sub, item);
                                (key, item)
                            }
                            None => (key, item),
                        }
                    })
                    .collect(),
            ),
            other => other,
        },
        DataType::Array(array) | DataType::PartialArray(array) => match (value, array.items) {
            (Value::Array(items), Some(item_prop)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| cast_value(manifest, item_prop, item))
                    .collect(),
            ),
            (other, _) => other,
        },
        _ => cast_scalar(property.kind(), value),
    }
}

/// Cast a scalar value; composite kinds pass through
pub fn cast_scalar(kind: TypeKind, value: Value) -> Value {
    match kind {
        TypeKind::Integer => cast_integer(value),
        TypeKind::Number => cast_number(value),
        TypeKind::Boolean => cast_boolean(value),
        TypeKind::Date => cast_text(value, cast_date),
        TypeKind::Time => cast_text(value, cast_time),
        TypeKind::DateTime => cast_text(value, cast_datetime),
        TypeKind::Binary => cast_binary(value),
        TypeKind::Geometry => cast_text(value, normalize_wkt),
        _ => value,
    }
}

fn cast_text(value: Value, cast: fn(&str) -> Option<String>) -> Value {
    match &value {
        Value::String(raw) => cast(raw).map(Value::String).unwrap_or(value),
        _ => value,
    }
}

fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '\'' | '\u{a0}' | '\u{202f}'))
        .collect()
}

fn cast_integer(value: Value) -> Value {
    match &value {
        Value::String(raw) => {
            let cleaned = strip_separators(raw);
            let digits = if !cleaned.contains(',') {
                cleaned
            } else if thousands_grouped(&cleaned) {
                cleaned.replace(',', "")
            } else {
                return value;
            };
            digits
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(value)
        }
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => value,
        },
        _ => value,
    }
}

/// Commas group digits by three after a leading group of one to three
fn thousands_grouped(cleaned: &str) -> bool {
    let mut groups = cleaned.trim_start_matches(['-', '+']).split(',');
    let lead = groups.next().unwrap_or_default();
    (1..=3).contains(&lead.len()) && groups.all(|group| group.len() == 3)
}

/// Decimal separator is whichever of `,`/`.` comes last; a single comma
/// alone is a decimal separator too
fn normalize_decimal(raw: &str) -> String {
    let cleaned = strip_separators(raw);
    let commas = cleaned.matches(',').count();
    let dot = cleaned.rfind('.');
    let comma = cleaned.rfind(',');
    match (dot, comma) {
        (Some(d), Some(c)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) if commas == 1 => cleaned.replace(',', "."),
        (None, Some(_)) => cleaned.replace(',', ""),
        _ => cleaned,
    }
}

fn cast_number(value: Value) -> Value {
    match &value {
        Value::String(raw) => {
            if raw.trim().eq_ignore_ascii_case("nan") {
                return Value::Null;
            }
            match normalize_decimal(raw).parse::<f64>() {
                Ok(f) if f.is_nan() => Value::Null,
                Ok(f) => serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(value),
                Err(_) => value,
            }
        }
        _ => value,
    }
}

fn cast_boolean(value: Value) -> Value {
    match &value {
        Value::String(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Value::Bool(true),
            "false" | "0" | "off" | "no" | "" => Value::Bool(false),
            _ => value,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Value::Bool(true),
            Some(0) => Value::Bool(false),
            _ => value,
        },
        _ => value,
    }
}

fn cast_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|date| date.to_string())
}

fn cast_time(raw: &str) -> Option<String> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
        .map(|time| time.to_string())
}

fn cast_datetime(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn cast_binary(value: Value) -> Value {
    match &value {
        // raw bytes from a driver
        Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            bytes
                .map(|bytes| Value::String(STANDARD.encode(bytes)))
                .unwrap_or(value)
        }
        Value::String(raw) => {
            // digits alone are more likely numbers than base64
            if raw.chars().all(|c| c.is_ascii_digit()) {
                return value;
            }
            match STANDARD.decode(raw.trim()) {
                Ok(bytes) => Value::String(STANDARD.encode(bytes)),
                Err(_) => value,
            }
        }
        _ => value,
    }
}

/// Normalise well-known text: upper case keywords, single spaces between
/// coordinates and `, ` between points. `None` when it is not WKT.
pub fn normalize_wkt(input: &str) -> Option<String> {
    let mut text = input.trim();
    let mut srid = String::new();
    if text.get(..5).is_some_and(|h| h.eq_ignore_ascii_case("SRID=")) {
        let (head, rest) = text.split_once(';')?;
        let code: u32 = head.get(5..)?.trim().parse().ok()?;
        srid = format!("SRID={};", code);
        text = rest.trim();
    }

    let (head, body) = match text.find('(') {
        Some(pos) => (text[..pos].trim(), &text[pos..]),
        None => (text, ""),
    };
    let mut words = head.split_whitespace().map(str::to_uppercase);
    let kind = words.next()?;
    if !GEOMETRY_TYPES.contains(&kind.as_str()) {
        return None;
    }
    let modifiers: Vec<String> = words.collect();
    let empty = modifiers.last().map(String::as_str) == Some("EMPTY");
    for modifier in &modifiers {
        if !matches!(modifier.as_str(), "Z" | "M" | "ZM" | "EMPTY") {
            return None;
        }
    }
    let mut head = std::iter::once(kind).chain(modifiers).collect::<Vec<_>>().join(" ");
    if empty {
        return body.is_empty().then(|| format!("{}{}", srid, head));
    }
    if body.is_empty() {
        return None;
    }

    fn flush(token: &mut String, out: &mut String) -> Option<()> {
        if token.is_empty() {
            return Some(());
        }
        token.parse::<f64>().ok()?;
        if !(out.is_empty() || out.ends_with('(') || out.ends_with(' ')) {
            out.push(' ');
        }
        out.push_str(token);
        token.clear();
        Some(())
    }

    let mut out = String::new();
    let mut token = String::new();
    let mut depth = 0i32;
    for c in body.chars() {
        match c {
            '(' => {
                flush(&mut token, &mut out)?;
                depth += 1;
                out.push('(');
            }
            ')' => {
                flush(&mut token, &mut out)?;
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                out.push(')');
            }
            ',' => {
                flush(&mut token, &mut out)?;
                out.push_str(", ");
            }
            c if c.is_whitespace() => flush(&mut token, &mut out)?,
            c => token.push(c),
        }
    }
    flush(&mut token, &mut out)?;
    if depth != 0 {
        return None;
    }
    head.push(' ');
    Some(format!("{}{}{}", srid, head, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer() {
        assert_eq!(cast_scalar(TypeKind::Integer, json!("1 234")), json!(1234));
        assert_eq!(cast_scalar(TypeKind::Integer, json!("1,234,567")), json!(1234567));
        assert_eq!(cast_scalar(TypeKind::Integer, json!(3.0)), json!(3));
        assert_eq!(cast_scalar(TypeKind::Integer, json!(3.5)), json!(3.5));
        assert_eq!(cast_scalar(TypeKind::Integer, json!("abc")), json!("abc"));
        assert_eq!(cast_scalar(TypeKind::Integer, json!("-12,000")), json!(-12000));
    }

    #[test]
    fn test_integer_keeps_decimal_comma() {
        assert_eq!(cast_scalar(TypeKind::Integer, json!("1,5")), json!("1,5"));
        assert_eq!(cast_scalar(TypeKind::Integer, json!("12,34")), json!("12,34"));
        assert_eq!(cast_scalar(TypeKind::Integer, json!("1234,567")), json!("1234,567"));
    }

    #[test]
    fn test_number() {
        assert_eq!(cast_scalar(TypeKind::Number, json!("1,5")), json!(1.5));
        assert_eq!(cast_scalar(TypeKind::Number, json!("1 234,5")), json!(1234.5));
        assert_eq!(cast_scalar(TypeKind::Number, json!("1,234.5")), json!(1234.5));
        assert_eq!(cast_scalar(TypeKind::Number, json!("1.234,5")), json!(1234.5));
        assert_eq!(cast_scalar(TypeKind::Number, json!("NaN")), Value::Null);
        assert_eq!(cast_scalar(TypeKind::Number, json!("x")), json!("x"));
    }

    #[test]
    fn test_boolean() {
        for raw in ["true", "YES", "on", "1"] {
            assert_eq!(cast_scalar(TypeKind::Boolean, json!(raw)), json!(true));
        }
        for raw in ["false", "No", "off", "0", ""] {
            assert_eq!(cast_scalar(TypeKind::Boolean, json!(raw)), json!(false));
        }
        assert_eq!(cast_scalar(TypeKind::Boolean, json!("maybe")), json!("maybe"));
        assert_eq!(cast_scalar(TypeKind::Boolean, json!(1)), json!(true));
    }

    #[test]
    fn test_temporal() {
        assert_eq!(cast_scalar(TypeKind::Date, json!("2020/01/31")), json!("2020-01-31"));
        assert_eq!(cast_scalar(TypeKind::Time, json!("10:30")), json!("10:30:00"));
        assert_eq!(
            cast_scalar(TypeKind::DateTime, json!("2020-01-31 10:30:00")),
            json!("2020-01-31T10:30:00")
        );
        assert_eq!(
            cast_scalar(TypeKind::DateTime, json!("2020-01-31T10:30:00+02:00")),
            json!("2020-01-31T10:30:00+02:00")
        );
        // a date in a time column is left alone
        assert_eq!(cast_scalar(TypeKind::Time, json!("2020-01-31")), json!("2020-01-31"));
    }

    #[test]
    fn test_binary() {
        assert_eq!(cast_scalar(TypeKind::Binary, json!([104, 105])), json!("aGk="));
        assert_eq!(cast_scalar(TypeKind::Binary, json!("aGk=")), json!("aGk="));
        assert_eq!(cast_scalar(TypeKind::Binary, json!("1234")), json!("1234"));
        assert_eq!(cast_scalar(TypeKind::Binary, json!("not base64!")), json!("not base64!"));
    }

    #[test]
    fn test_wkt() {
        assert_eq!(normalize_wkt("point(1   2)").as_deref(), Some("POINT (1 2)"));
        assert_eq!(
            normalize_wkt("LINESTRING(0 0,1 1)").as_deref(),
            Some("LINESTRING (0 0, 1 1)")
        );
        assert_eq!(
            normalize_wkt("SRID=3346;polygon((0 0, 1 0, 1 1, 0 0))").as_deref(),
            Some("SRID=3346;POLYGON ((0 0, 1 0, 1 1, 0 0))")
        );
        assert_eq!(normalize_wkt("point empty").as_deref(), Some("POINT EMPTY"));
        assert_eq!(normalize_wkt("POINT (1 2"), None);
        assert_eq!(normalize_wkt("CIRCLE (1 2)"), None);
        assert_eq!(cast_scalar(TypeKind::Geometry, json!("nope")), json!("nope"));
    }

    #[test]
    fn test_wkt_multibyte_input_is_kept() {
        assert_eq!(normalize_wkt("abcdé point"), None);
        assert_eq!(normalize_wkt("SRIDé;POINT (1 2)"), None);
        assert_eq!(
            cast_scalar(TypeKind::Geometry, json!("abcdé point")),
            json!("abcdé point")
        );
    }
}
