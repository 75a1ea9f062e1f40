//! Format strings and their token grammars.
//!
//! A format string is stored verbatim next to a metadata key. Before a value
//! can be parsed it is compiled into a [`FormatSpec`], which checks it against
//! the grammar of the key's type:
//!
//! | Type | Grammar | Examples |
//! |------|---------|----------|
//! | `date` | three of `dd`, `mm`, `yy`/`yyyy` joined by one of `.` `-` `/` | `dd.mm.yy`, `yyyy-mm-dd` |
//! | `money` | `d+` then `.` or `,` then `cc` | `dd.cc`, `dd,cc` |
//! | `numeric` | a run of `d`, optionally grouped by `,` `.` `'` or space | `dddd`, `d,ddd` |
//! | `boolean` | `yes/no` or `true/false` | |
//! | `text` | anything | |

use super::KvType;
use crate::error::{KvError, Result};

const DATE_SEPARATORS: [char; 3] = ['.', '-', '/'];
const MONEY_SEPARATORS: [char; 2] = ['.', ','];
const NUMERIC_GROUPS: [char; 4] = [',', '.', '\'', ' '];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Day,
    Month,
    /// Two digit year, expanded with the configured century pivot
    ShortYear,
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateLayout {
    pub parts: [DatePart; 3],
    pub separator: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoneyLayout {
    /// Decimal mark between the integer and the cents group
    pub separator: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericLayout {
    /// Number of `d` tokens; used for zero padding on display only
    pub width: usize,
    pub group: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolStyle {
    YesNo,
    TrueFalse,
}

/// A format string compiled against the grammar of its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSpec {
    Text,
    Date(DateLayout),
    Money(MoneyLayout),
    Numeric(NumericLayout),
    Boolean(BoolStyle),
}

impl FormatSpec {
    pub fn parse(kv_type: KvType, format: &str) -> Result<Self> {
        let invalid = || KvError::InvalidFormat {
            kv_type,
            format: format.to_string(),
        };
        let format = format.trim();
        match kv_type {
            KvType::Text => Ok(FormatSpec::Text),
            KvType::Date => parse_date(format).map(FormatSpec::Date).ok_or_else(invalid),
            KvType::Money => parse_money(format).map(FormatSpec::Money).ok_or_else(invalid),
            KvType::Numeric => parse_numeric(format)
                .map(FormatSpec::Numeric)
                .ok_or_else(invalid),
            KvType::Boolean => match format.to_ascii_lowercase().as_str() {
                "yes/no" => Ok(FormatSpec::Boolean(BoolStyle::YesNo)),
                "true/false" => Ok(FormatSpec::Boolean(BoolStyle::TrueFalse)),
                _ => Err(invalid()),
            },
        }
    }

    pub fn kv_type(&self) -> KvType {
        match self {
            FormatSpec::Text => KvType::Text,
            FormatSpec::Date(_) => KvType::Date,
            FormatSpec::Money(_) => KvType::Money,
            FormatSpec::Numeric(_) => KvType::Numeric,
            FormatSpec::Boolean(_) => KvType::Boolean,
        }
    }
}

/// Checks `format` against the grammar of `kv_type` without keeping the result.
pub fn validate_format(kv_type: KvType, format: &str) -> Result<()> {
    FormatSpec::parse(kv_type, format).map(|_| ())
}

/// Returns the format to store for a declaration: the given one, or the
/// type's default when it is blank.
pub fn effective_format(kv_type: KvType, format: &str) -> String {
    let trimmed = format.trim();
    if trimmed.is_empty() {
        kv_type.spec().default_format.to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_date(format: &str) -> Option<DateLayout> {
    let separator = format.chars().find(|c| !matches!(c, 'd' | 'm' | 'y'))?;
    if !DATE_SEPARATORS.contains(&separator) {
        return None;
    }

    let tokens: Vec<&str> = format.split(separator).collect();
    if tokens.len() != 3 {
        return None;
    }

    let mut parts = [DatePart::Day; 3];
    for (slot, token) in parts.iter_mut().zip(&tokens) {
        *slot = match *token {
            "dd" => DatePart::Day,
            "mm" => DatePart::Month,
            "yy" => DatePart::ShortYear,
            "yyyy" => DatePart::Year,
            _ => return None,
        };
    }

    let count = |want: fn(DatePart) -> bool| parts.iter().filter(|p| want(**p)).count();
    let days = count(|p| p == DatePart::Day);
    let months = count(|p| p == DatePart::Month);
    let years = count(|p| matches!(p, DatePart::ShortYear | DatePart::Year));
    if days != 1 || months != 1 || years != 1 {
        return None;
    }

    Some(DateLayout { parts, separator })
}

fn parse_money(format: &str) -> Option<MoneyLayout> {
    let separator = format.chars().find(|c| *c != 'd')?;
    if !MONEY_SEPARATORS.contains(&separator) {
        return None;
    }
    let (integer, cents) = format.split_once(separator)?;
    if integer.is_empty() || cents != "cc" {
        return None;
    }
    Some(MoneyLayout { separator })
}

fn parse_numeric(format: &str) -> Option<NumericLayout> {
    if !format.starts_with('d') || !format.ends_with('d') {
        return None;
    }

    let mut group = None;
    let mut width = 0;
    for c in format.chars() {
        if c == 'd' {
            width += 1;
        } else if NUMERIC_GROUPS.contains(&c) {
            match group {
                None => group = Some(c),
                Some(g) if g == c => {}
                Some(_) => return None,
            }
        } else {
            return None;
        }
    }

    Some(NumericLayout { width, group })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KV_TYPES;

    #[test]
    fn every_registered_format_compiles() {
        for spec in KV_TYPES {
            for format in spec.formats {
                assert!(
                    FormatSpec::parse(spec.kind, format).is_ok(),
                    "{} rejected its own format {}",
                    spec.name,
                    format
                );
            }
        }
    }

    #[test]
    fn date_layout_keeps_token_order() {
        let spec = FormatSpec::parse(KvType::Date, "mm/dd/yyyy").unwrap();
        assert_eq!(
            spec,
            FormatSpec::Date(DateLayout {
                parts: [DatePart::Month, DatePart::Day, DatePart::Year],
                separator: '/',
            })
        );
    }

    #[test]
    fn date_rejects_repeated_or_missing_tokens() {
        assert!(FormatSpec::parse(KvType::Date, "dd.dd.yy").is_err());
        assert!(FormatSpec::parse(KvType::Date, "dd.mm").is_err());
        assert!(FormatSpec::parse(KvType::Date, "dd.mm-yy").is_err());
        assert!(FormatSpec::parse(KvType::Date, "dd:mm:yy").is_err());
        assert!(FormatSpec::parse(KvType::Date, "ddmmyy").is_err());
        assert!(FormatSpec::parse(KvType::Date, "d.mm.yy").is_err());
    }

    #[test]
    fn money_separator_is_recorded() {
        assert_eq!(
            FormatSpec::parse(KvType::Money, "dd,cc").unwrap(),
            FormatSpec::Money(MoneyLayout { separator: ',' })
        );
        assert_eq!(
            FormatSpec::parse(KvType::Money, "dddd.cc").unwrap(),
            FormatSpec::Money(MoneyLayout { separator: '.' })
        );
    }

    #[test]
    fn money_rejects_other_shapes() {
        assert!(FormatSpec::parse(KvType::Money, "dd").is_err());
        assert!(FormatSpec::parse(KvType::Money, ".cc").is_err());
        assert!(FormatSpec::parse(KvType::Money, "dd;cc").is_err());
        assert!(FormatSpec::parse(KvType::Money, "dd.ccc").is_err());
    }

    #[test]
    fn numeric_width_and_group() {
        assert_eq!(
            FormatSpec::parse(KvType::Numeric, "dddd").unwrap(),
            FormatSpec::Numeric(NumericLayout {
                width: 4,
                group: None
            })
        );
        assert_eq!(
            FormatSpec::parse(KvType::Numeric, "d,ddd").unwrap(),
            FormatSpec::Numeric(NumericLayout {
                width: 4,
                group: Some(',')
            })
        );
        assert!(FormatSpec::parse(KvType::Numeric, "d,ddd.ddd").is_err());
        assert!(FormatSpec::parse(KvType::Numeric, ",ddd").is_err());
        assert!(FormatSpec::parse(KvType::Numeric, "").is_err());
    }

    #[test]
    fn text_accepts_anything() {
        assert_eq!(FormatSpec::parse(KvType::Text, "").unwrap(), FormatSpec::Text);
        assert_eq!(
            FormatSpec::parse(KvType::Text, "whatever").unwrap(),
            FormatSpec::Text
        );
    }

    #[test]
    fn effective_format_falls_back_to_default() {
        assert_eq!(effective_format(KvType::Money, ""), "dd.cc");
        assert_eq!(effective_format(KvType::Money, " dd,cc "), "dd,cc");
        assert_eq!(effective_format(KvType::Text, ""), "");
    }

    #[test]
    fn invalid_format_error_names_type() {
        let err = validate_format(KvType::Numeric, "xx").unwrap_err();
        assert!(matches!(
            err,
            KvError::InvalidFormat {
                kv_type: KvType::Numeric,
                ..
            }
        ));
    }
}
