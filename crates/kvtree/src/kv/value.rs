//! # Virtual Values
//!
//! A virtual value is a single `i64` derived from `(type, format, raw value)`.
//! It exists so that heterogeneous string representations can be compared
//! and range-filtered: `"23.07.20"` and `"2020-07-23"` are different strings
//! but the same date, and `"45,00"` under `dd,cc` equals `"45.00"` under `dd.cc`.
//!
//! | Type | Virtual value |
//! |------|---------------|
//! | `date` | `year * 10000 + month * 100 + day` |
//! | `money` | `integer * 100 + cents` |
//! | `numeric` | the digits of the value as an integer |
//! | `boolean` | `1` for true, `0` for false |
//! | `text` | always `0` (text is compared as strings, not here) |
//!
//! An empty or absent raw value is the canonical "unset" state and yields `0`
//! for every type, so unset values sort first.
//!
//! ## Two digit years
//!
//! `yy` tokens are expanded with a pivot: `yy <= pivot` means `20yy`, anything
//! above means `19yy`. The pivot defaults to 68 (the POSIX `%y` rule) and is
//! passed in through [`ValueOptions`]; nothing here reads the clock, the locale
//! or the environment.

use super::format::{BoolStyle, DateLayout, DatePart, FormatSpec, MoneyLayout, NumericLayout};
use super::KvType;
use crate::error::{KvError, Result};
use chrono::NaiveDate;

const TRUTHY: [&str; 5] = ["true", "yes", "y", "1", "on"];
const FALSY: [&str; 5] = ["false", "no", "n", "0", "off"];

/// Knobs of the value engine that are not part of a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueOptions {
    /// Largest two digit year that still belongs to the 2000s
    pub year_pivot: u8,
}

impl Default for ValueOptions {
    fn default() -> Self {
        Self { year_pivot: 68 }
    }
}

impl ValueOptions {
    pub fn expand_year(&self, short: u32) -> u32 {
        if short <= u32::from(self.year_pivot) {
            2000 + short
        } else {
            1900 + short
        }
    }
}

/// Computes the virtual value with default [`ValueOptions`].
pub fn compute_virtual_value(kv_type: KvType, kv_format: &str, raw: Option<&str>) -> Result<i64> {
    compute_virtual_value_with(&ValueOptions::default(), kv_type, kv_format, raw)
}

pub fn compute_virtual_value_with(
    options: &ValueOptions,
    kv_type: KvType,
    kv_format: &str,
    raw: Option<&str>,
) -> Result<i64> {
    let Some(value) = non_empty(raw) else {
        return Ok(0);
    };
    let spec = FormatSpec::parse(kv_type, kv_format)?;
    virtual_value_of(&spec, value, options)
        .map_err(|reason| KvError::parse(kv_type, kv_format, value, reason))
}

/// Renders a raw value in the canonical layout of its format.
///
/// Dates are zero padded in token order, money always carries two cents
/// digits behind the format's separator, numerics are padded to the format's
/// digit width. Empty input renders as an empty string.
pub fn display_value(
    options: &ValueOptions,
    kv_type: KvType,
    kv_format: &str,
    raw: Option<&str>,
) -> Result<String> {
    let Some(value) = non_empty(raw) else {
        return Ok(String::new());
    };
    let spec = FormatSpec::parse(kv_type, kv_format)?;
    let parse_err = |reason: String| KvError::parse(kv_type, kv_format, value, reason);

    let rendered = match &spec {
        FormatSpec::Text => value.to_string(),
        FormatSpec::Date(layout) => {
            let date = parse_date(layout, value, options).map_err(parse_err)?;
            render_date(layout, date)
        }
        FormatSpec::Money(layout) => {
            let cents = parse_money(layout, value).map_err(parse_err)?;
            render_money(layout, cents)
        }
        FormatSpec::Numeric(layout) => {
            let number = parse_numeric(value).map_err(parse_err)?;
            render_numeric(layout, number)
        }
        FormatSpec::Boolean(style) => {
            let flag = parse_bool(value).map_err(parse_err)?;
            render_bool(*style, flag).to_string()
        }
    };
    Ok(rendered)
}

/// Rewrites `raw`, written under `from_format`, in the layout of `to_format`.
///
/// Both formats belong to `kv_type`. The value is parsed with the old layout
/// and rendered with the new one, so `23.07.20` under `dd.mm.yy` becomes
/// `2020-07-23` under `yyyy-mm-dd`. Fails when the value does not parse under
/// `from_format`, or when the new layout cannot hold it without changing its
/// virtual value (a year outside the two digit window). Text is kept as is.
pub fn reformat_value(
    options: &ValueOptions,
    kv_type: KvType,
    from_format: &str,
    to_format: &str,
    raw: Option<&str>,
) -> Result<Option<String>> {
    let Some(value) = non_empty(raw) else {
        return Ok(None);
    };
    let from = FormatSpec::parse(kv_type, from_format)?;
    let to = FormatSpec::parse(kv_type, to_format)?;
    let from_err = |reason: String| KvError::parse(kv_type, from_format, value, reason);

    let rendered = match (&from, &to) {
        (FormatSpec::Text, _) => value.to_string(),
        (FormatSpec::Date(old), FormatSpec::Date(new)) => {
            render_date(new, parse_date(old, value, options).map_err(from_err)?)
        }
        (FormatSpec::Money(old), FormatSpec::Money(new)) => {
            render_money(new, parse_money(old, value).map_err(from_err)?)
        }
        (FormatSpec::Numeric(_), FormatSpec::Numeric(new)) => {
            render_numeric(new, parse_numeric(value).map_err(from_err)?)
        }
        (FormatSpec::Boolean(_), FormatSpec::Boolean(new)) => {
            render_bool(*new, parse_bool(value).map_err(from_err)?).to_string()
        }
        _ => {
            return Err(KvError::parse(
                kv_type,
                to_format,
                value,
                "formats belong to different types",
            ))
        }
    };

    let before = virtual_value_of(&from, value, options).map_err(from_err)?;
    let after = virtual_value_of(&to, &rendered, options);
    if after != Ok(before) {
        return Err(KvError::parse(
            kv_type,
            to_format,
            value,
            format!("'{rendered}' does not keep the value"),
        ));
    }
    Ok(Some(rendered))
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

fn virtual_value_of(
    spec: &FormatSpec,
    value: &str,
    options: &ValueOptions,
) -> std::result::Result<i64, String> {
    match spec {
        FormatSpec::Text => Ok(0),
        FormatSpec::Date(layout) => {
            let (year, month, day) = parse_date(layout, value, options)?;
            Ok(i64::from(year) * 10_000 + i64::from(month) * 100 + i64::from(day))
        }
        FormatSpec::Money(layout) => parse_money(layout, value),
        FormatSpec::Numeric(_) => parse_numeric(value),
        FormatSpec::Boolean(_) => parse_bool(value).map(i64::from),
    }
}

fn parse_date(
    layout: &DateLayout,
    value: &str,
    options: &ValueOptions,
) -> std::result::Result<(u32, u32, u32), String> {
    let pieces: Vec<&str> = value.split(layout.separator).collect();
    if pieces.len() != layout.parts.len() {
        return Err(format!(
            "expected {} groups separated by '{}'",
            layout.parts.len(),
            layout.separator
        ));
    }

    let (mut year, mut month, mut day) = (0, 0, 0);
    for (part, piece) in layout.parts.iter().zip(pieces) {
        let piece = piece.trim();
        if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{piece}' is not a number"));
        }
        let width_ok = match part {
            DatePart::Day | DatePart::Month => piece.len() <= 2,
            DatePart::ShortYear => piece.len() == 2,
            DatePart::Year => piece.len() == 4,
        };
        if !width_ok {
            return Err(format!("'{piece}' has the wrong number of digits"));
        }
        let number: u32 = piece
            .parse()
            .map_err(|_| format!("'{piece}' is not a number"))?;
        match part {
            DatePart::Day => day = number,
            DatePart::Month => month = number,
            DatePart::ShortYear => year = options.expand_year(number),
            DatePart::Year => year = number,
        }
    }

    let year_signed = i32::try_from(year).map_err(|_| "year out of range".to_string())?;
    if NaiveDate::from_ymd_opt(year_signed, month, day).is_none() {
        return Err(format!("{year:04}-{month:02}-{day:02} is not a calendar date"));
    }
    Ok((year, month, day))
}

fn render_date(layout: &DateLayout, (year, month, day): (u32, u32, u32)) -> String {
    let rendered: Vec<String> = layout
        .parts
        .iter()
        .map(|part| match part {
            DatePart::Day => format!("{day:02}"),
            DatePart::Month => format!("{month:02}"),
            DatePart::ShortYear => format!("{:02}", year % 100),
            DatePart::Year => format!("{year:04}"),
        })
        .collect();
    rendered.join(&layout.separator.to_string())
}

/// Parses an amount into cents.
///
/// The format's separator is the decimal mark. A value written with the
/// other mark (`45.00` under `dd,cc`) is still read as decimal when that mark
/// is followed by one or two trailing digits; otherwise it is grouping.
fn parse_money(layout: &MoneyLayout, value: &str) -> std::result::Result<i64, String> {
    let (negative, body) = match value.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, value),
    };

    let other = if layout.separator == '.' { ',' } else { '.' };
    let split_at = body.rfind(layout.separator).or_else(|| {
        body.rfind(other).filter(|pos| {
            let tail = &body[pos + 1..];
            (1..=2).contains(&tail.len()) && tail.bytes().all(|b| b.is_ascii_digit())
        })
    });

    let (integer, cents) = match split_at {
        Some(pos) => (&body[..pos], &body[pos + 1..]),
        None => (body, ""),
    };

    let cents = cents.trim();
    if !cents.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{cents}' is not a cents group"));
    }
    let digits: String = integer.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() && cents.is_empty() {
        return Err("no digits".to_string());
    }

    let whole: i64 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| "amount out of range".to_string())?
    };
    let mut cents: String = cents.chars().take(2).collect();
    while cents.len() < 2 {
        cents.push('0');
    }
    let cents: i64 = cents.parse().map_err(|_| "bad cents".to_string())?;

    let total = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(cents))
        .ok_or_else(|| "amount out of range".to_string())?;
    Ok(if negative { -total } else { total })
}

fn render_money(layout: &MoneyLayout, cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}{}{:02}", abs / 100, layout.separator, abs % 100)
}

fn parse_numeric(value: &str) -> std::result::Result<i64, String> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err("no digits".to_string());
    }
    digits
        .parse()
        .map_err(|_| "number out of range".to_string())
}

fn render_numeric(layout: &NumericLayout, number: i64) -> String {
    let padded = format!("{:0width$}", number, width = layout.width);
    let Some(group) = layout.group else {
        return padded;
    };
    let len = padded.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in padded.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(group);
        }
        out.push(c);
    }
    out
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    let lowered = value.to_ascii_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Ok(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Ok(false)
    } else {
        Err("expected yes/no or true/false".to_string())
    }
}

fn render_bool(style: BoolStyle, flag: bool) -> &'static str {
    match (style, flag) {
        (BoolStyle::YesNo, true) => "yes",
        (BoolStyle::YesNo, false) => "no",
        (BoolStyle::TrueFalse, true) => "true",
        (BoolStyle::TrueFalse, false) => "false",
    }
}
