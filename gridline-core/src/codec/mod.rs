//! Cell codec: wire value ⇄ [`Cell`].
//!
//! `decode` is total. Input that does not fit the column's kind degrades to
//! the kind's empty value, with the raw input kept as `display_data` and the
//! cell flagged `invalid`, so the grid always has something to show.
//!
//! Wire encoding per kind:
//!
//! | Kind                                   | Wire form            |
//! |----------------------------------------|----------------------|
//! | text-like, single choice, date, enrich | string / null        |
//! | numeric                                | number / null        |
//! | multi choice, drop down, list          | array of strings     |
//! | phone, address, currency, zip          | object / null        |
//! | ranking, file upload, time             | JSON-encoded string  |
//! | yes/no                                 | `"Yes"` / `"No"`     |
//! | formula                                | passthrough          |

pub mod date;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cell::{Blank, Cell, CellValue, ComputedMeta, FieldOptions, TimeOfDay};
use crate::{CellKind, Column};

/// Marker for a wire value that does not fit the target kind.
#[derive(Debug)]
struct Malformed;

/// Intermediate decode result before the envelope is built.
struct Decoded {
    value: CellValue,
    display: String,
    invalid: bool,
}

impl Decoded {
    fn ok(value: CellValue, display: String) -> Self {
        Self {
            value,
            display,
            invalid: false,
        }
    }
}

/// Decode a wire value for `column`. Never fails.
pub fn decode(raw: &Value, column: &Column) -> Cell {
    decode_kind(raw, column.kind, column.options.clone())
}

/// Decode a wire value for a bare kind/options pair.
pub fn decode_kind(raw: &Value, kind: CellKind, options: Arc<FieldOptions>) -> Cell {
    let decoded = match decode_value(raw, kind, &options) {
        Ok(decoded) => decoded,
        Err(Malformed) => {
            log::debug!("Malformed {kind:?} value {raw}, keeping raw display");
            Decoded {
                value: CellValue::empty(kind),
                display: raw_display(raw),
                invalid: true,
            }
        }
    };
    Cell {
        value: decoded.value,
        display_data: decoded.display,
        read_only: kind.is_read_only(),
        invalid: decoded.invalid,
        computed: computed_meta(kind, &options),
        options,
    }
}

/// Empty cell for a column that has no value yet.
pub fn empty_cell(kind: CellKind, options: Arc<FieldOptions>) -> Cell {
    Cell {
        value: CellValue::empty(kind),
        display_data: String::new(),
        read_only: kind.is_read_only(),
        invalid: false,
        computed: computed_meta(kind, &options),
        options,
    }
}

/// Build a cell from a value the user entered, recomputing its display.
pub fn cell_from_value(value: CellValue, options: Arc<FieldOptions>) -> Cell {
    let kind = value.kind();
    decode_kind(&encode_value(&value), kind, options)
}

/// Wire form of a cell.
pub fn encode_for_wire(cell: &Cell) -> Value {
    encode_value(&cell.value)
}

/// Decode an existing cell again for a changed column.
///
/// An invalid cell has an empty value, so it is re-read from the raw input
/// kept in `display_data`.
pub fn redecode(cell: &Cell, column: &Column) -> Cell {
    if cell.invalid && !cell.display_data.is_empty() {
        let raw = serde_json::from_str(&cell.display_data)
            .unwrap_or_else(|_| Value::String(cell.display_data.clone()));
        return decode(&raw, column);
    }
    decode(&encode_for_wire(cell), column)
}

fn computed_meta(kind: CellKind, options: &FieldOptions) -> Option<ComputedMeta> {
    match kind {
        CellKind::Formula => Some(ComputedMeta {
            expression: options.expression.clone(),
            ..ComputedMeta::default()
        }),
        CellKind::Enrichment => Some(ComputedMeta::default()),
        _ => None,
    }
}

fn decode_value(raw: &Value, kind: CellKind, options: &FieldOptions) -> Result<Decoded, Malformed> {
    let decoded = match kind {
        CellKind::Text => text(raw, CellValue::Text)?,
        CellKind::LongText => text(raw, CellValue::LongText)?,
        CellKind::Email => text(raw, CellValue::Email)?,
        CellKind::Url => text(raw, CellValue::Url)?,
        CellKind::SingleChoice => text(raw, CellValue::SingleChoice)?,
        CellKind::Enrichment => text(raw, CellValue::Enrichment)?,

        CellKind::Number => numeric(raw, options, CellValue::Number)?,
        CellKind::Slider => numeric(raw, options, CellValue::Slider)?,
        CellKind::OpinionScale => numeric(raw, options, CellValue::OpinionScale)?,
        CellKind::Rating => {
            let n = as_number(raw)?;
            if let Some(v) = n {
                if v < 0.0 || v > options.max_rating() {
                    return Err(Malformed);
                }
            }
            Decoded::ok(CellValue::Rating(n), n.map(|v| format_number(v, None)).unwrap_or_default())
        }

        CellKind::MultiChoice => string_list(raw, CellValue::MultiChoice)?,
        CellKind::DropDown => string_list(raw, CellValue::DropDown)?,
        CellKind::List => string_list(raw, CellValue::List)?,
        CellKind::Ranking => {
            let mut items = as_json_list::<crate::cell::RankingItem>(raw)?;
            items.sort_by_key(|item| item.rank);
            let display = items.iter().map(|i| i.label.as_str()).collect::<Vec<_>>().join(", ");
            Decoded::ok(CellValue::Ranking(items), display)
        }
        CellKind::FileUpload => {
            let files = as_json_list::<crate::cell::FileEntry>(raw)?;
            let display = files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ");
            Decoded::ok(CellValue::FileUpload(files), display)
        }

        CellKind::PhoneNumber => {
            let phone = as_structured::<crate::cell::PhoneNumber>(raw)?;
            let display = phone
                .as_ref()
                .map(|p| {
                    let cn = p.country_number.trim().trim_start_matches('+');
                    if cn.is_empty() {
                        p.phone_number.clone()
                    } else {
                        format!("+{cn} {}", p.phone_number)
                    }
                })
                .unwrap_or_default();
            Decoded::ok(CellValue::PhoneNumber(phone), display)
        }
        CellKind::Address => {
            let address = as_structured::<crate::cell::Address>(raw)?;
            let display = address
                .as_ref()
                .map(|a| {
                    [
                        &a.address_line_one,
                        &a.address_line_two,
                        &a.city,
                        &a.state,
                        &a.zip_code,
                        &a.country,
                    ]
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ")
                })
                .unwrap_or_default();
            Decoded::ok(CellValue::Address(address), display)
        }
        CellKind::Currency => {
            let currency = as_structured::<crate::cell::Currency>(raw)?;
            let display = currency
                .as_ref()
                .map(|c| {
                    let unit = if c.currency_symbol.is_empty() {
                        c.currency_code.as_str()
                    } else {
                        c.currency_symbol.as_str()
                    };
                    if unit.is_empty() {
                        c.currency_value.clone()
                    } else {
                        format!("{unit} {}", c.currency_value)
                    }
                })
                .unwrap_or_default();
            Decoded::ok(CellValue::Currency(currency), display)
        }
        CellKind::ZipCode => {
            let zip = as_structured::<crate::cell::ZipCode>(raw)?;
            let display = zip.as_ref().map(|z| z.zip_code.clone()).unwrap_or_default();
            Decoded::ok(CellValue::ZipCode(zip), display)
        }

        CellKind::YesNo => {
            let flag = match raw {
                Value::Null => None,
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "" => None,
                    "yes" | "true" => Some(true),
                    "no" | "false" => Some(false),
                    _ => return Err(Malformed),
                },
                _ => return Err(Malformed),
            };
            let display = match flag {
                Some(true) => "Yes",
                Some(false) => "No",
                None => "",
            };
            Decoded::ok(CellValue::YesNo(flag), display.to_string())
        }

        CellKind::Date | CellKind::CreatedTime => {
            let s = match raw {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s.clone()),
                _ => return Err(Malformed),
            };
            let format = options.date_format.clone().unwrap_or_default();
            let force_time = kind == CellKind::CreatedTime;
            let display = s
                .as_deref()
                .map(|s| date::format_wire_date(s, &format, force_time))
                .unwrap_or_default();
            let invalid = s.is_some() && display.is_empty();
            let value = if kind == CellKind::Date {
                CellValue::Date(s)
            } else {
                CellValue::CreatedTime(s)
            };
            Decoded {
                value,
                display,
                invalid,
            }
        }
        CellKind::Time => {
            let time = as_time_of_day(raw)?;
            let display = time
                .as_ref()
                .map(|t| format!("{} {}", t.time, t.meridiem).trim().to_string())
                .unwrap_or_default();
            Decoded::ok(CellValue::Time(time), display)
        }

        CellKind::Formula => {
            let display = formula_display(raw, options);
            Decoded::ok(CellValue::Formula(raw.clone()), display)
        }
    };
    Ok(decoded)
}

fn encode_value(value: &CellValue) -> Value {
    match value {
        CellValue::Text(s)
        | CellValue::LongText(s)
        | CellValue::Email(s)
        | CellValue::Url(s)
        | CellValue::SingleChoice(s)
        | CellValue::Date(s)
        | CellValue::CreatedTime(s)
        | CellValue::Enrichment(s) => s.clone().map(Value::String).unwrap_or(Value::Null),

        CellValue::Number(n)
        | CellValue::Rating(n)
        | CellValue::Slider(n)
        | CellValue::OpinionScale(n) => n
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),

        CellValue::MultiChoice(items) | CellValue::DropDown(items) | CellValue::List(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }

        CellValue::Ranking(items) => json_string(items),
        CellValue::FileUpload(files) => json_string(files),
        CellValue::Time(time) => time.as_ref().map(json_string).unwrap_or(Value::Null),

        CellValue::PhoneNumber(v) => object(v),
        CellValue::Address(v) => object(v),
        CellValue::Currency(v) => object(v),
        CellValue::ZipCode(v) => object(v),

        CellValue::YesNo(flag) => match flag {
            Some(true) => Value::String("Yes".into()),
            Some(false) => Value::String("No".into()),
            None => Value::Null,
        },
        CellValue::Formula(v) => v.clone(),
    }
}

fn json_string<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_string(value)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

fn object<T: Serialize>(value: &Option<T>) -> Value {
    value
        .as_ref()
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}

// ───────────────────────────────────────────────────────────────────
// Coercions
// ───────────────────────────────────────────────────────────────────

fn raw_display(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text(raw: &Value, wrap: fn(Option<String>) -> CellValue) -> Result<Decoded, Malformed> {
    let s = match raw {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => return Err(Malformed),
    };
    let display = s.clone().unwrap_or_default();
    Ok(Decoded::ok(wrap(s), display))
}

fn numeric(
    raw: &Value,
    options: &FieldOptions,
    wrap: fn(Option<f64>) -> CellValue,
) -> Result<Decoded, Malformed> {
    let n = as_number(raw)?;
    let display = n.map(|v| format_number(v, options.precision)).unwrap_or_default();
    Ok(Decoded::ok(wrap(n), display))
}

fn as_number(raw: &Value) -> Result<Option<f64>, Malformed> {
    let n = match raw {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(Malformed),
    }
}

fn format_number(n: f64, precision: Option<u32>) -> String {
    match precision {
        Some(p) => format!("{n:.prec$}", prec = p as usize),
        None if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", n as i64),
        None => n.to_string(),
    }
}

fn string_list(raw: &Value, wrap: fn(Vec<String>) -> CellValue) -> Result<Decoded, Malformed> {
    let items = as_string_list(raw)?;
    let display = items.join(", ");
    Ok(Decoded::ok(wrap(items), display))
}

fn as_string_list(raw: &Value) -> Result<Vec<String>, Malformed> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(b.to_string()),
                _ => Err(Malformed),
            })
            .collect(),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Array(_)) => as_string_list(&parsed),
            _ => Err(Malformed),
        },
        _ => Err(Malformed),
    }
}

fn as_json_list<T: DeserializeOwned>(raw: &Value) -> Result<Vec<T>, Malformed> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(raw.clone()).map_err(|_| Malformed),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => serde_json::from_str(s).map_err(|_| Malformed),
        _ => Err(Malformed),
    }
}

fn as_structured<T: DeserializeOwned + Blank>(raw: &Value) -> Result<Option<T>, Malformed> {
    let parsed: T = match raw {
        Value::Null => return Ok(None),
        Value::Object(_) => serde_json::from_value(raw.clone()).map_err(|_| Malformed)?,
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => serde_json::from_str(s).map_err(|_| Malformed)?,
        _ => return Err(Malformed),
    };
    Ok(if parsed.is_blank() { None } else { Some(parsed) })
}

fn as_time_of_day(raw: &Value) -> Result<Option<TimeOfDay>, Malformed> {
    let parsed = match raw {
        Value::Null => return Ok(None),
        Value::Object(_) => serde_json::from_value::<TimeOfDay>(raw.clone()).map_err(|_| Malformed)?,
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) if s.trim_start().starts_with('{') => {
            serde_json::from_str::<TimeOfDay>(s).map_err(|_| Malformed)?
        }
        Value::String(s) => {
            let s = s.trim();
            let (clock, meridiem) = match s.rsplit_once(' ') {
                Some((clock, m)) if m.eq_ignore_ascii_case("AM") || m.eq_ignore_ascii_case("PM") => {
                    (clock.trim(), m.to_ascii_uppercase())
                }
                _ => (s, String::new()),
            };
            if date::parse_time_of_day(clock).is_none() {
                return Err(Malformed);
            }
            TimeOfDay {
                time: clock.to_string(),
                meridiem,
            }
        }
        _ => return Err(Malformed),
    };
    Ok(if parsed.is_blank() { None } else { Some(parsed) })
}

fn formula_display(raw: &Value, options: &FieldOptions) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n
            .as_f64()
            .map(|v| format_number(v, options.precision))
            .unwrap_or_else(|| n.to_string()),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items.iter().map(raw_display).collect::<Vec<_>>().join(", "),
        Value::Object(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{DateFormat, DatePattern};
    use serde_json::json;

    fn opts() -> Arc<FieldOptions> {
        Arc::new(FieldOptions::default())
    }

    fn dec(raw: Value, kind: CellKind) -> Cell {
        decode_kind(&raw, kind, opts())
    }

    #[test]
    fn test_number_from_string() {
        let cell = dec(json!("42"), CellKind::Number);
        assert_eq!(cell.value, CellValue::Number(Some(42.0)));
        assert_eq!(cell.display_data, "42");
        assert!(!cell.invalid);

        let cell = dec(json!(3.25), CellKind::Number);
        assert_eq!(cell.display_data, "3.25");
    }

    #[test]
    fn test_number_precision() {
        let options = Arc::new(FieldOptions {
            precision: Some(2),
            ..FieldOptions::default()
        });
        let cell = decode_kind(&json!(7), CellKind::Number, options);
        assert_eq!(cell.display_data, "7.00");
    }

    #[test]
    fn test_number_garbage_keeps_raw_display() {
        let cell = dec(json!("abc"), CellKind::Number);
        assert_eq!(cell.value, CellValue::Number(None));
        assert_eq!(cell.display_data, "abc");
        assert!(cell.invalid);
    }

    #[test]
    fn test_rating_out_of_range_is_rejected() {
        let cell = dec(json!(9), CellKind::Rating);
        assert_eq!(cell.value, CellValue::Rating(None));
        assert!(cell.invalid);

        let options = Arc::new(FieldOptions {
            max_rating: Some(10.0),
            ..FieldOptions::default()
        });
        let cell = decode_kind(&json!(9), CellKind::Rating, options);
        assert_eq!(cell.value, CellValue::Rating(Some(9.0)));

        let cell = dec(json!(-1), CellKind::Rating);
        assert_eq!(cell.value, CellValue::Rating(None));
    }

    #[test]
    fn test_multi_choice_from_json_string() {
        let cell = dec(json!("[\"a\",\"b\"]"), CellKind::MultiChoice);
        assert_eq!(cell.value, CellValue::MultiChoice(vec!["a".into(), "b".into()]));
        assert_eq!(cell.display_data, "a, b");

        let cell = dec(json!("not json"), CellKind::MultiChoice);
        assert_eq!(cell.value, CellValue::MultiChoice(Vec::new()));
        assert!(cell.invalid);

        let cell = dec(Value::Null, CellKind::List);
        assert_eq!(cell.value, CellValue::List(Vec::new()));
        assert!(!cell.invalid);
    }

    #[test]
    fn test_single_choice_unset_is_none() {
        let cell = dec(Value::Null, CellKind::SingleChoice);
        assert_eq!(cell.value, CellValue::SingleChoice(None));
    }

    #[test]
    fn test_structured_from_object_and_string() {
        let obj = dec(
            json!({"countryCode": "US", "countryNumber": "1", "phoneNumber": "5550100"}),
            CellKind::PhoneNumber,
        );
        let s = dec(
            json!("{\"countryCode\":\"US\",\"countryNumber\":\"1\",\"phoneNumber\":\"5550100\"}"),
            CellKind::PhoneNumber,
        );
        assert_eq!(obj, s);
        assert_eq!(obj.display_data, "+1 5550100");

        let cur = dec(
            json!({"currencyCode": "USD", "currencySymbol": "$", "currencyValue": "12.50"}),
            CellKind::Currency,
        );
        assert_eq!(cur.display_data, "$ 12.50");

        let addr = dec(json!({"city": "Oslo", "country": "Norway"}), CellKind::Address);
        assert_eq!(addr.display_data, "Oslo, Norway");

        let bad = dec(json!("Main street"), CellKind::Address);
        assert_eq!(bad.value, CellValue::Address(None));
        assert!(bad.invalid);
        assert_eq!(bad.display_data, "Main street");
    }

    #[test]
    fn test_date_keeps_wire_string() {
        let options = Arc::new(FieldOptions {
            date_format: Some(DateFormat {
                format: DatePattern::YearMonthDay,
                separator: "-".into(),
                include_time: false,
                is_twenty_four_hour: true,
            }),
            ..FieldOptions::default()
        });
        let cell = decode_kind(&json!("2026-10-18T10:00:00Z"), CellKind::Date, options.clone());
        assert_eq!(cell.value, CellValue::Date(Some("2026-10-18T10:00:00Z".into())));
        assert_eq!(cell.display_data, "2026-10-18");

        let cell = decode_kind(&json!("someday"), CellKind::Date, options);
        assert_eq!(cell.value, CellValue::Date(Some("someday".into())));
        assert_eq!(cell.display_data, "");
    }

    #[test]
    fn test_created_time_always_shows_time() {
        let cell = dec(json!("2026-10-18T14:05:00Z"), CellKind::CreatedTime);
        assert_eq!(cell.display_data, "18/10/2026 02:05 PM");
        assert!(cell.read_only);
    }

    #[test]
    fn test_time_variants() {
        let cell = dec(json!("{\"time\":\"10:30\",\"meridiem\":\"AM\"}"), CellKind::Time);
        assert_eq!(cell.display_data, "10:30 AM");
        let plain = dec(json!("10:30 am"), CellKind::Time);
        assert_eq!(plain.value, cell.value);
        let h24 = dec(json!("21:15"), CellKind::Time);
        assert_eq!(h24.display_data, "21:15");
        assert!(dec(json!("quarter past"), CellKind::Time).invalid);
    }

    #[test]
    fn test_yes_no() {
        assert_eq!(dec(json!("Yes"), CellKind::YesNo).value, CellValue::YesNo(Some(true)));
        assert_eq!(dec(json!(false), CellKind::YesNo).display_data, "No");
        assert!(dec(json!("maybe"), CellKind::YesNo).invalid);
    }

    #[test]
    fn test_formula_is_read_only_with_meta() {
        let options = Arc::new(FieldOptions {
            expression: Some("{n} * 2".into()),
            ..FieldOptions::default()
        });
        let cell = decode_kind(&json!(84), CellKind::Formula, options);
        assert!(cell.read_only);
        assert_eq!(cell.display_data, "84");
        let meta = cell.computed.unwrap();
        assert_eq!(meta.expression.as_deref(), Some("{n} * 2"));
        assert!(!meta.loading);
        assert!(meta.error.is_none());
    }

    #[test]
    fn test_wire_encoding_shapes() {
        let files = dec(json!([{"url": "u", "mimeType": "image/png", "name": "a.png"}]), CellKind::FileUpload);
        assert!(encode_for_wire(&files).is_string());

        let ranking = dec(json!([{"id": "x", "rank": 1, "label": "X"}]), CellKind::Ranking);
        assert!(encode_for_wire(&ranking).is_string());

        let time = dec(json!("10:30 AM"), CellKind::Time);
        assert!(encode_for_wire(&time).is_string());

        let multi = dec(json!(["a"]), CellKind::MultiChoice);
        assert!(encode_for_wire(&multi).is_array());

        let phone = dec(json!({"phoneNumber": "1"}), CellKind::PhoneNumber);
        assert!(encode_for_wire(&phone).is_object());

        let number = dec(json!(5), CellKind::Number);
        assert!(encode_for_wire(&number).is_number());
    }

    fn well_formed(kind: CellKind) -> Value {
        match kind {
            CellKind::Text | CellKind::LongText | CellKind::Enrichment => json!("hello"),
            CellKind::Email => json!("a@b.c"),
            CellKind::Url => json!("https://example.com"),
            CellKind::Number | CellKind::Slider | CellKind::OpinionScale => json!(12.5),
            CellKind::Rating => json!(4),
            CellKind::SingleChoice => json!("red"),
            CellKind::MultiChoice | CellKind::DropDown | CellKind::List => json!(["red", "blue"]),
            CellKind::Ranking => json!([{"id": "b", "rank": 2, "label": "B"}, {"id": "a", "rank": 1, "label": "A"}]),
            CellKind::FileUpload => json!([{"url": "https://f", "mimeType": "text/plain", "name": "f.txt"}]),
            CellKind::PhoneNumber => json!({"countryCode": "NO", "countryNumber": "47", "phoneNumber": "123"}),
            CellKind::Address => json!({"addressLineOne": "1 Road", "city": "Oslo"}),
            CellKind::Currency => json!({"currencyCode": "EUR", "currencySymbol": "€", "currencyValue": "3"}),
            CellKind::ZipCode => json!({"countryCode": "NO", "zipCode": "0150"}),
            CellKind::YesNo => json!("No"),
            CellKind::Date | CellKind::CreatedTime => json!("2026-01-02T03:04:05Z"),
            CellKind::Time => json!({"time": "09:00", "meridiem": "PM"}),
            CellKind::Formula => json!(["x", 1]),
        }
    }

    #[test]
    fn test_decode_encode_decode_is_stable() {
        for kind in CellKind::ALL {
            let first = dec(well_formed(kind), kind);
            assert!(!first.invalid, "{kind:?} sample should be well formed");
            let second = decode_kind(&encode_for_wire(&first), kind, opts());
            assert_eq!(first, second, "{kind:?} did not survive a round trip");
        }
    }

    #[test]
    fn test_decode_is_total() {
        let garbage = [
            json!({"unexpected": [1, 2, {"deep": null}]}),
            json!([[[]]]),
            json!("\u{0}\u{7f}{["),
            json!(f64::MAX),
            json!(true),
        ];
        for kind in CellKind::ALL {
            for raw in &garbage {
                let cell = dec(raw.clone(), kind);
                assert_eq!(cell.kind(), kind);
            }
        }
    }

    #[test]
    fn test_cell_from_value_recomputes_display() {
        let cell = cell_from_value(CellValue::MultiChoice(vec!["x".into(), "y".into()]), opts());
        assert_eq!(cell.display_data, "x, y");
        let empty = empty_cell(CellKind::Formula, opts());
        assert!(empty.is_empty());
        assert!(empty.computed.is_some());
    }

    fn column(field_type: crate::FieldType, kind: CellKind) -> Column {
        Column {
            id: "c".into(),
            raw_id: 1,
            name: "C".into(),
            field_type,
            kind,
            options: opts(),
            order: 1.0,
            width: 120.0,
            text_wrap: false,
            hidden: false,
        }
    }

    #[test]
    fn test_redecode_keeps_raw_input_of_invalid_cells() {
        let text = column(crate::FieldType::ShortText, CellKind::Text);
        let number = column(crate::FieldType::Number, CellKind::Number);

        let original = decode(&json!("abc"), &text);
        let as_number = redecode(&original, &number);
        assert!(as_number.invalid);
        assert_eq!(as_number.display_data, "abc");

        let back = redecode(&as_number, &text);
        assert!(!back.invalid);
        assert_eq!(back.value, CellValue::Text(Some("abc".into())));

        let valid = decode(&json!("12"), &text);
        assert_eq!(redecode(&valid, &number).value, CellValue::Number(Some(12.0)));
    }
}
