//! Metadata types and their registry.
//!
//! Every metadata key has exactly one [`KvType`]. The type decides which format
//! tokens are legal and how a raw value is reduced to a virtual value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a metadata key.
///
/// This is a closed set: adding a type means adding a variant here and an
/// entry in [`KV_TYPES`], and the compiler then points at every `match` that
/// needs a new arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvType {
    /// Free text (e.g., an invoice subject). Not orderable by virtual value.
    Text,

    /// Calendar date laid out by `dd`, `mm`, `yy`/`yyyy` tokens.
    Date,

    /// Amount with an integer group and a two digit cents group.
    Money,

    /// Plain integer; the format only fixes the display width.
    Numeric,

    /// Yes/no flag.
    Boolean,
}

impl KvType {
    pub fn name(self) -> &'static str {
        match self {
            KvType::Text => "text",
            KvType::Date => "date",
            KvType::Money => "money",
            KvType::Numeric => "numeric",
            KvType::Boolean => "boolean",
        }
    }

    /// Look up a type by its registry name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        get_type_spec(&name.to_ascii_lowercase()).map(|spec| spec.kind)
    }

    pub fn spec(self) -> &'static KvTypeSpec {
        // Every variant has an entry; the registry test guards this.
        KV_TYPES
            .iter()
            .find(|spec| spec.kind == self)
            .unwrap_or(&KV_TYPES[0])
    }

    /// Whether virtual values of this type carry ordering information.
    pub fn is_orderable(self) -> bool {
        self.spec().orderable
    }
}

impl fmt::Display for KvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry entry describing a metadata type.
#[derive(Debug, Clone)]
pub struct KvTypeSpec {
    /// Name used in persisted data and by API callers
    pub name: &'static str,

    pub kind: KvType,

    /// Whether the virtual value of this type is meaningful for sorting
    pub orderable: bool,

    /// Format applied when a key is declared without one
    pub default_format: &'static str,

    /// Formats offered to users. Any format obeying the type's token
    /// grammar is accepted; this list is only the common set.
    pub formats: &'static [&'static str],
}

impl KvTypeSpec {
    const fn new(name: &'static str, kind: KvType) -> Self {
        Self {
            name,
            kind,
            orderable: false,
            default_format: "",
            formats: &[],
        }
    }

    const fn orderable(mut self) -> Self {
        self.orderable = true;
        self
    }

    const fn formats(mut self, formats: &'static [&'static str]) -> Self {
        self.default_format = formats[0];
        self.formats = formats;
        self
    }
}

/// Registry of all metadata types.
pub const KV_TYPES: &[KvTypeSpec] = &[
    KvTypeSpec::new("text", KvType::Text),
    KvTypeSpec::new("date", KvType::Date)
        .orderable()
        .formats(&[
            "dd.mm.yy",
            "dd.mm.yyyy",
            "dd/mm/yy",
            "dd/mm/yyyy",
            "mm/dd/yy",
            "mm/dd/yyyy",
            "yyyy-mm-dd",
            "dd-mm-yyyy",
        ]),
    KvTypeSpec::new("money", KvType::Money)
        .orderable()
        .formats(&["dd.cc", "dd,cc"]),
    KvTypeSpec::new("numeric", KvType::Numeric)
        .orderable()
        .formats(&["dddd", "d,ddd", "d.ddd"]),
    KvTypeSpec::new("boolean", KvType::Boolean)
        .orderable()
        .formats(&["yes/no", "true/false"]),
];

/// Look up a type spec by name.
pub fn get_type_spec(name: &str) -> Option<&'static KvTypeSpec> {
    KV_TYPES.iter().find(|spec| spec.name == name)
}

/// Names of all types whose virtual values can be sorted on.
pub fn orderable_types() -> impl Iterator<Item = &'static str> {
    KV_TYPES
        .iter()
        .filter(|spec| spec.orderable)
        .map(|spec| spec.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [KvType; 5] = [
        KvType::Text,
        KvType::Date,
        KvType::Money,
        KvType::Numeric,
        KvType::Boolean,
    ];

    #[test]
    fn every_variant_has_a_registry_entry() {
        for kind in ALL {
            let spec = KV_TYPES.iter().find(|spec| spec.kind == kind);
            assert!(spec.is_some(), "{kind:?} missing from KV_TYPES");
            assert_eq!(spec.unwrap().name, kind.name());
        }
    }

    #[test]
    fn from_name_is_case_insensitive() {
        assert_eq!(KvType::from_name("money"), Some(KvType::Money));
        assert_eq!(KvType::from_name("DATE"), Some(KvType::Date));
        assert_eq!(KvType::from_name("currency"), None);
    }

    #[test]
    fn text_is_not_orderable() {
        assert!(!KvType::Text.is_orderable());
        let orderable: Vec<_> = orderable_types().collect();
        assert_eq!(orderable, vec!["date", "money", "numeric", "boolean"]);
    }

    #[test]
    fn default_format_is_first_listed() {
        assert_eq!(KvType::Date.spec().default_format, "dd.mm.yy");
        assert_eq!(KvType::Money.spec().default_format, "dd.cc");
        assert_eq!(KvType::Text.spec().default_format, "");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&KvType::Numeric).unwrap();
        assert_eq!(json, "\"numeric\"");
        let back: KvType = serde_json::from_str("\"boolean\"").unwrap();
        assert_eq!(back, KvType::Boolean);
    }
}
