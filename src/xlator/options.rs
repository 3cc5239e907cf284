//! Translator option schema validation (C5).

use crate::dict::Dict;
use crate::error::GlusterError;

use super::translator::Graph;

/// The option value shapes the C source's `volume_option_type_t` enumerates.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionType {
    Path,
    Integer { min: Option<i64>, max: Option<i64> },
    SizeBytes,
    SizeBytesOrPercent,
    Boolean,
    /// `fnmatch` patterns a value must match one of.
    StringEnum(Vec<String>),
    Time,
    Double,
    Percent,
    XlatorName,
    InternetAddress,
    InternetAddressList,
    ClientAuthAddress,
    PriorityList,
    SizeList,
    Any,
}

/// One recognized option: its canonical key, any recognized spellings
/// (current aliases plus deprecated ones that should be rewritten on
/// match), and the value shape.
#[derive(Debug, Clone)]
pub struct OptionDescriptor {
    pub key: String,
    pub aliases: Vec<String>,
    pub deprecated_aliases: Vec<String>,
    pub option_type: OptionType,
}

impl OptionDescriptor {
    pub fn new(key: impl Into<String>, option_type: OptionType) -> Self {
        OptionDescriptor {
            key: key.into(),
            aliases: Vec::new(),
            deprecated_aliases: Vec::new(),
            option_type,
        }
    }

    pub fn alias(mut self, pattern: impl Into<String>) -> Self {
        self.aliases.push(pattern.into());
        self
    }

    pub fn deprecated_alias(mut self, pattern: impl Into<String>) -> Self {
        self.deprecated_aliases.push(pattern.into());
        self
    }

    fn matches(&self, key: &str) -> bool {
        fnmatch(&self.key, key) || self.aliases.iter().any(|p| fnmatch(p, key)) || self.deprecated_aliases.iter().any(|p| fnmatch(p, key))
    }

    fn is_deprecated_match(&self, key: &str) -> bool {
        self.deprecated_aliases.iter().any(|p| fnmatch(p, key))
    }
}

/// One translator's full set of recognized options.
#[derive(Debug, Clone, Default)]
pub struct OptionSchema {
    pub descriptors: Vec<OptionDescriptor>,
}

impl OptionSchema {
    pub fn new() -> Self {
        OptionSchema::default()
    }

    pub fn with(mut self, descriptor: OptionDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate `options` against this schema: rewrite deprecated keys to
    /// their canonical form, type-check every value, and reject unknown
    /// keys with a closest-match suggestion. Returns the normalized dict a
    /// translator's `init` should actually read.
    pub fn validate(&self, options: &Dict) -> Result<Dict, GlusterError> {
        let mut normalized = Dict::new();
        for (key, value) in options.iter() {
            let raw = value
                .as_str()
                .ok_or_else(|| GlusterError::invalid_argument(format!("option '{key}' must be a string value")))?;
            let descriptor = self
                .descriptors
                .iter()
                .find(|d| d.matches(key))
                .ok_or_else(|| self.unknown_key_error(key))?;
            validate_value(&descriptor.option_type, raw)?;
            let canonical = if descriptor.is_deprecated_match(key) { &descriptor.key } else { key };
            normalized.set(canonical.clone(), raw);
        }
        Ok(normalized)
    }

    fn unknown_key_error(&self, key: &str) -> GlusterError {
        let suggestion = self
            .descriptors
            .iter()
            .map(|d| (d.key.as_str(), edit_distance(key, &d.key)))
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 3)
            .map(|(k, _)| k);
        match suggestion {
            Some(s) => GlusterError::invalid_argument(format!("option '{key}' is not valid; did you mean '{s}'?")),
            None => GlusterError::invalid_argument(format!("option '{key}' is not valid")),
        }
    }
}

fn validate_value(ty: &OptionType, raw: &str) -> Result<(), GlusterError> {
    match ty {
        OptionType::Path => {
            if !raw.starts_with('/') {
                return Err(GlusterError::invalid_argument(format!("'{raw}' is not an absolute path")));
            }
        }
        OptionType::Integer { min, max } => {
            let v: i64 = raw
                .parse()
                .map_err(|_| GlusterError::invalid_argument(format!("'{raw}' is not an integer")))?;
            if let Some(min) = min {
                if v < *min {
                    return Err(GlusterError::invalid_argument(format!("{v} is below minimum {min}")));
                }
            }
            if let Some(max) = max {
                if v > *max {
                    return Err(GlusterError::invalid_argument(format!("{v} exceeds maximum {max}")));
                }
            }
        }
        OptionType::SizeBytes => {
            parse_size_bytes(raw)?;
        }
        OptionType::SizeBytesOrPercent => {
            if !raw.ends_with('%') {
                parse_size_bytes(raw)?;
            } else {
                raw.trim_end_matches('%')
                    .parse::<f64>()
                    .map_err(|_| GlusterError::invalid_argument(format!("'{raw}' is not a valid percentage")))?;
            }
        }
        OptionType::Boolean => {
            parse_bool(raw)?;
        }
        OptionType::StringEnum(patterns) => {
            if !patterns.iter().any(|p| fnmatch(p, raw)) {
                return Err(GlusterError::invalid_argument(format!("'{raw}' does not match any of {patterns:?}")));
            }
        }
        OptionType::Time => {
            parse_time(raw)?;
        }
        OptionType::Double => {
            raw.parse::<f64>()
                .map_err(|_| GlusterError::invalid_argument(format!("'{raw}' is not a number")))?;
        }
        OptionType::Percent => {
            let v: f64 = raw
                .trim_end_matches('%')
                .parse()
                .map_err(|_| GlusterError::invalid_argument(format!("'{raw}' is not a percentage")))?;
            if !(0.0..=100.0).contains(&v) {
                return Err(GlusterError::invalid_argument(format!("{v} is not within 0-100")));
            }
        }
        OptionType::XlatorName | OptionType::InternetAddress | OptionType::InternetAddressList | OptionType::ClientAuthAddress | OptionType::PriorityList | OptionType::SizeList | OptionType::Any => {
            // No further structural check beyond being a non-empty string.
            if raw.is_empty() {
                return Err(GlusterError::invalid_argument("value must not be empty"));
            }
        }
    }
    Ok(())
}

pub(crate) fn parse_bool(raw: &str) -> Result<bool, GlusterError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "on" | "yes" | "true" | "enable" => Ok(true),
        "0" | "off" | "no" | "false" | "disable" => Ok(false),
        _ => Err(GlusterError::invalid_argument(format!("'{raw}' is not a boolean"))),
    }
}

pub(crate) fn parse_size_bytes(raw: &str) -> Result<u64, GlusterError> {
    let lower = raw.to_ascii_lowercase();
    let (digits, mult) = if let Some(d) = lower.strip_suffix("kb").or_else(|| lower.strip_suffix('k')) {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("mb").or_else(|| lower.strip_suffix('m')) {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("gb").or_else(|| lower.strip_suffix('g')) {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("tb").or_else(|| lower.strip_suffix('t')) {
        (d, 1024u64 * 1024 * 1024 * 1024)
    } else {
        (lower.as_str(), 1)
    };
    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|_| GlusterError::invalid_argument(format!("'{raw}' is not a byte size")))?;
    Ok(base * mult)
}

fn parse_time(raw: &str) -> Result<u64, GlusterError> {
    let lower = raw.to_ascii_lowercase();
    let (digits, mult) = if let Some(d) = lower.strip_suffix('d') {
        (d, 86400)
    } else if let Some(d) = lower.strip_suffix('h') {
        (d, 3600)
    } else if let Some(d) = lower.strip_suffix("min").or_else(|| lower.strip_suffix('m')) {
        (d, 60)
    } else if let Some(d) = lower.strip_suffix('s') {
        (d, 1)
    } else {
        (lower.as_str(), 1)
    };
    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|_| GlusterError::invalid_argument(format!("'{raw}' is not a duration")))?;
    Ok(base * mult)
}

/// A minimal `fnmatch`: `*` matches any run of characters, `?` matches
/// exactly one, everything else is literal. Sufficient for the alias
/// patterns translators declare (`"cache-size*"`, `"*-timeout"`).
fn fnmatch(pattern: &str, text: &str) -> bool {
    fn go(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => go(&p[1..], t) || (!t.is_empty() && go(p, &t[1..])),
            Some(b'?') => !t.is_empty() && go(&p[1..], &t[1..]),
            Some(&c) => t.first() == Some(&c) && go(&p[1..], &t[1..]),
        }
    }
    go(pattern.as_bytes(), text.as_bytes())
}

/// Levenshtein distance, used for "did you mean" suggestions on an
/// unrecognized option key.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

/// Validate every node's options against its schema, children before
/// parent, per spec §4.1(d). Returns the normalized dict for every node
/// (deprecated keys rewritten), in the same order as `graph.nodes`.
pub fn validate_graph(graph: &Graph) -> Result<Vec<(String, Dict)>, GlusterError> {
    let mut out = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let schema = node.imp().option_schema();
        let normalized = schema.validate(&node.options)?;
        out.push((node.name.clone(), normalized));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnmatch_star_matches_any_suffix() {
        assert!(fnmatch("cache-*", "cache-size"));
        assert!(!fnmatch("cache-*", "other"));
    }

    #[test]
    fn boolean_accepts_all_documented_spellings() {
        for v in ["1", "on", "yes", "true", "enable"] {
            assert_eq!(parse_bool(v).unwrap(), true);
        }
        for v in ["0", "off", "no", "false", "disable"] {
            assert_eq!(parse_bool(v).unwrap(), false);
        }
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn size_bytes_parses_unit_suffixes() {
        assert_eq!(parse_size_bytes("128KB").unwrap(), 128 * 1024);
        assert_eq!(parse_size_bytes("1MB").unwrap(), 1024 * 1024);
        assert_eq!(parse_size_bytes("42").unwrap(), 42);
    }

    #[test]
    fn unknown_key_suggests_closest_match() {
        let schema = OptionSchema::new().with(OptionDescriptor::new("cache-size", OptionType::SizeBytes));
        let mut opts = Dict::new();
        opts.set("cache-siz", "1MB");
        let err = schema.validate(&opts).unwrap_err();
        assert!(err.message.contains("did you mean 'cache-size'"));
    }

    #[test]
    fn deprecated_alias_is_rewritten_to_canonical_key() {
        let schema = OptionSchema::new().with(
            OptionDescriptor::new("rda-cache-limit", OptionType::SizeBytes).deprecated_alias("cache-size"),
        );
        let mut opts = Dict::new();
        opts.set("cache-size", "10MB");
        let normalized = schema.validate(&opts).unwrap();
        assert_eq!(normalized.get_str("rda-cache-limit"), Some("10MB"));
        assert!(normalized.get_str("cache-size").is_none());
    }

    #[test]
    fn integer_bounds_are_enforced() {
        let schema = OptionSchema::new().with(OptionDescriptor::new(
            "rda-request-size",
            OptionType::Integer { min: Some(4096), max: Some(131072) },
        ));
        let mut opts = Dict::new();
        opts.set("rda-request-size", "1024");
        assert!(schema.validate(&opts).is_err());
        opts.set("rda-request-size", "65536");
        assert!(schema.validate(&opts).is_ok());
    }
}
