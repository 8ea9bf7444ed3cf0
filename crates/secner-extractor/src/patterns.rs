//! Pattern recognizer set
//!
//! Compiles an ordered [`RuleSpec`] table once and applies it to text.
//! Every pattern span is deterministic (confidence 1.0). A malformed rule is a
//! fatal configuration error at construction; nothing is skipped silently
//! at extraction time.

use std::collections::HashSet;
use std::path::Path;

use regex::{Regex, RegexBuilder};

use secner_core::{ConfigError, Result, SecnerError};

use crate::rules::{default_rules, sector_matches, Exclusion, RuleSpec, RuleTable};
use crate::Span;

// ============================================================================
// Compiled rules
// ============================================================================

#[derive(Debug)]
enum CompiledExclusion {
    OverlapsLabel(Vec<String>),
    WithinLabel(Vec<String>),
    MatchesText(Regex),
}

impl CompiledExclusion {
    fn compile(rule: &str, exclusion: &Exclusion) -> Result<Self> {
        match exclusion {
            Exclusion::OverlapsLabel { labels } => Ok(Self::OverlapsLabel(labels.clone())),
            Exclusion::WithinLabel { labels } => Ok(Self::WithinLabel(labels.clone())),
            Exclusion::MatchesText { pattern } => {
                let anchored = format!("^(?:{})$", pattern);
                Regex::new(&anchored)
                    .map(Self::MatchesText)
                    .map_err(|e| SecnerError::configuration(rule, e.to_string()))
            }
        }
    }

    /// `earlier` holds the spans produced by rules that ran before this one
    fn excludes(&self, candidate: &Span, matched: &str, earlier: &[Span]) -> bool {
        match self {
            Self::OverlapsLabel(labels) => earlier
                .iter()
                .any(|s| labels.contains(&s.label) && s.overlaps(candidate)),
            Self::WithinLabel(labels) => earlier
                .iter()
                .any(|s| labels.contains(&s.label) && s.contains(candidate)),
            Self::MatchesText(regex) => regex.is_match(matched),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    label: String,
    regexes: Vec<Regex>,
    group: Option<usize>,
    sectors: Vec<String>,
    exclusions: Vec<CompiledExclusion>,
}

impl CompiledRule {
    fn compile(spec: &RuleSpec) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(SecnerError::configuration("<unnamed>", "rule name is empty"));
        }
        if spec.label.trim().is_empty() {
            return Err(SecnerError::configuration(&spec.name, "label is empty"));
        }
        if spec.patterns.is_empty() {
            return Err(SecnerError::configuration(&spec.name, "no patterns"));
        }

        let mut regexes = Vec::with_capacity(spec.patterns.len());
        for pattern in &spec.patterns {
            if pattern.is_empty() {
                return Err(SecnerError::configuration(&spec.name, "empty pattern"));
            }
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(spec.case_insensitive)
                .build()
                .map_err(|e| SecnerError::configuration(&spec.name, e.to_string()))?;

            if let Some(group) = spec.group {
                // captures_len counts the implicit whole-match group 0
                if group >= regex.captures_len() {
                    return Err(SecnerError::configuration(
                        &spec.name,
                        format!(
                            "capture group {} does not exist in pattern '{}'",
                            group, pattern
                        ),
                    ));
                }
            }
            regexes.push(regex);
        }

        let exclusions = spec
            .exclude
            .iter()
            .map(|e| CompiledExclusion::compile(&spec.name, e))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: spec.name.clone(),
            label: spec.label.clone(),
            regexes,
            group: spec.group,
            sectors: spec.sectors.clone(),
            exclusions,
        })
    }

    fn applies_to(&self, sector: Option<&str>) -> bool {
        sector_matches(&self.sectors, sector)
    }

    /// Raw (start, end) ranges of every pattern, in pattern order
    fn ranges(&self, text: &str) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        for regex in &self.regexes {
            match self.group {
                Some(group) => {
                    for caps in regex.captures_iter(text) {
                        if let Some(m) = caps.get(group) {
                            ranges.push((m.start(), m.end()));
                        }
                    }
                }
                None => {
                    for m in regex.find_iter(text) {
                        ranges.push((m.start(), m.end()));
                    }
                }
            }
        }
        ranges
    }

    fn apply(&self, text: &str, earlier: &[Span]) -> Vec<Span> {
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut spans = Vec::new();

        for (start, end) in self.ranges(text) {
            // Zero-width matches never become entities
            if start >= end {
                continue;
            }
            // Alternatives inside one rule may hit the same range
            if !seen.insert((start, end)) {
                continue;
            }

            let candidate = Span::pattern(start, end, self.label.as_str());
            let matched = &text[start..end];
            if self
                .exclusions
                .iter()
                .any(|e| e.excludes(&candidate, matched, earlier))
            {
                tracing::trace!(
                    "Rule '{}' match {}..{} suppressed by exclusion",
                    self.name,
                    start,
                    end
                );
                continue;
            }
            spans.push(candidate);
        }

        spans
    }
}

// ============================================================================
// Pattern Recognizer Set
// ============================================================================

/// Ordered, immutable set of compiled pattern rules.
///
/// Read-only after construction; share it across workers behind an `Arc`.
#[derive(Debug)]
pub struct PatternRecognizerSet {
    rules: Vec<CompiledRule>,
}

impl PatternRecognizerSet {
    /// Compile a rule table. Fails on the first malformed rule.
    pub fn new(rules: Vec<RuleSpec>) -> Result<Self> {
        let mut names: HashSet<&str> = HashSet::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(SecnerError::configuration(&rule.name, "duplicate rule name"));
            }
        }

        let compiled = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Compiled {} pattern rules", compiled.len());
        Ok(Self { rules: compiled })
    }

    /// The built-in security rule table
    pub fn with_defaults() -> Result<Self> {
        Self::new(default_rules())
    }

    /// Parse a `[[rules]]` TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: RuleTable = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        Self::new(table.rules)
    }

    /// Load a `[[rules]]` TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let table: RuleTable = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::new(table.rules)
    }

    /// Run every rule
    pub fn extract(&self, text: &str) -> Vec<Span> {
        self.extract_for_sector(text, None)
    }

    /// Run the rules selected by an optional sector hint.
    ///
    /// Output is sorted by `(start, end, label)` with exact duplicates removed.
    pub fn extract_for_sector(&self, text: &str, sector: Option<&str>) -> Vec<Span> {
        let mut spans: Vec<Span> = Vec::new();

        for rule in self.rules.iter().filter(|r| r.applies_to(sector)) {
            let produced = rule.apply(text, &spans);
            spans.extend(produced);
        }

        spans.sort_by(|a, b| a.key().cmp(&b.key()));
        spans.dedup_by(|a, b| a.key() == b.key());

        tracing::debug!(
            "Pattern rules produced {} candidates (sector: {:?})",
            spans.len(),
            sector
        );
        spans
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Distinct labels this set can emit, sorted
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.rules.iter().map(|r| r.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;

    fn defaults() -> PatternRecognizerSet {
        PatternRecognizerSet::with_defaults().unwrap()
    }

    fn found<'a>(spans: &'a [Span], text: &'a str) -> Vec<(&'a str, &'a str)> {
        spans
            .iter()
            .map(|s| (s.label.as_str(), &text[s.start..s.end]))
            .collect()
    }

    #[test]
    fn test_cve_and_cwe() {
        let set = defaults();
        let text = "CVE-2024-1234 affects CWE-79.";
        let spans = set.extract(text);

        assert_eq!(
            spans,
            vec![
                Span::pattern(0, 13, labels::VULNERABILITY),
                Span::pattern(22, 28, labels::WEAKNESS),
            ]
        );
    }

    #[test]
    fn test_case_insensitive_identifiers() {
        let set = defaults();
        let text = "see cve-2021-44228 and capec-66";
        let spans = set.extract(text);
        let found = found(&spans, text);

        assert!(found.contains(&(labels::VULNERABILITY, "cve-2021-44228")));
        assert!(found.contains(&(labels::ATTACK_PATTERN, "capec-66")));
    }

    #[test]
    fn test_vendor_nested_in_equipment() {
        let set = defaults();
        let text = "Siemens SIMATIC S7-1500 CPU exposes S7comm";
        let spans = set.extract(text);

        assert!(spans.contains(&Span::pattern(0, 7, labels::VENDOR)));
        assert!(spans.contains(&Span::pattern(0, 27, labels::EQUIPMENT)));
        assert!(found(&spans, text).contains(&(labels::PROTOCOL, "S7comm")));
    }

    #[test]
    fn test_generic_protocol_suppressed_by_specific_rule() {
        let set = defaults();
        let text = "Devices speaking Modbus/TCP and plain UDP";
        let spans = set.extract(text);
        let found = found(&spans, text);

        assert!(found.contains(&(labels::PROTOCOL, "Modbus/TCP")));
        assert!(found.contains(&(labels::PROTOCOL, "UDP")));
        assert!(!found.contains(&(labels::PROTOCOL, "TCP")));
    }

    #[test]
    fn test_protocol_token_suppressed_inside_product() {
        let set = defaults();
        let text = "Apache HTTP Server 2.4.49 allows path traversal over HTTP";
        let spans = set.extract(text);
        let found = found(&spans, text);

        assert!(found.contains(&(labels::PRODUCT, "Apache HTTP Server")));
        assert!(found.contains(&(labels::VENDOR, "Apache")));
        assert!(found.contains(&(labels::VERSION, "2.4.49")));
        let http_count = found
            .iter()
            .filter(|(l, t)| *l == labels::PROTOCOL && *t == "HTTP")
            .count();
        assert_eq!(http_count, 1, "only the standalone HTTP is a protocol");
    }

    #[test]
    fn test_version_excludes_ip_addresses() {
        let set = defaults();
        let text = "OpenSSL 1.1.1k on host 192.168.0.10";
        let spans = set.extract(text);
        let found = found(&spans, text);

        assert!(found.contains(&(labels::VERSION, "1.1.1k")));
        assert!(!found.iter().any(|(_, t)| t.starts_with("192.")));
    }

    #[test]
    fn test_version_keyword_group() {
        let set = defaults();
        let text = "fixed in version 10 and later";
        let spans = set.extract(text);

        assert_eq!(spans, vec![Span::pattern(17, 19, labels::VERSION)]);
    }

    #[test]
    fn test_keyword_and_generic_version_collapse() {
        let set = defaults();
        let text = "version 2.4.50";
        let spans = set.extract(text);

        assert_eq!(spans, vec![Span::pattern(8, 14, labels::VERSION)]);
    }

    #[test]
    fn test_sector_filtering() {
        let set = defaults();
        let text = "ICSA-24-123-01 covers Modicon M340";

        let ics_spans = set.extract_for_sector(text, Some("ics"));
        let ics = found(&ics_spans, text);
        assert!(ics.contains(&(labels::ADVISORY, "ICSA-24-123-01")));
        assert!(ics.contains(&(labels::EQUIPMENT, "Modicon M340")));

        let it_spans = set.extract_for_sector(text, Some("it"));
        let it = found(&it_spans, text);
        assert!(!it.iter().any(|(l, _)| *l == labels::ADVISORY));
        assert!(!it.iter().any(|(l, _)| *l == labels::EQUIPMENT));
    }

    #[test]
    fn test_compiled_rules_follow_rule_sectors() {
        let specs = default_rules();
        let set = PatternRecognizerSet::new(specs.clone()).unwrap();

        for (spec, rule) in specs.iter().zip(&set.rules) {
            for hint in [None, Some("ics"), Some("ICS"), Some("it"), Some("medical")] {
                assert_eq!(
                    spec.applies_to(hint),
                    rule.applies_to(hint),
                    "{} {:?}",
                    spec.name,
                    hint
                );
            }
        }
        assert!(!set.rules.iter().all(|r| r.applies_to(Some("medical")) == r.applies_to(None)));
    }

    #[test]
    fn test_zero_width_matches_rejected() {
        let set = PatternRecognizerSet::new(vec![RuleSpec::new("maybe", "X", r"a*")]).unwrap();
        let spans = set.extract("bab");

        assert_eq!(spans, vec![Span::pattern(1, 2, "X")]);
    }

    #[test]
    fn test_alternation_duplicates_collapsed() {
        let rule = RuleSpec::new("dup", labels::PROTOCOL, r"\bDNP3\b").pattern(r"DNP\d");
        let set = PatternRecognizerSet::new(vec![rule]).unwrap();

        assert_eq!(
            set.extract("DNP3 outstation"),
            vec![Span::pattern(0, 4, labels::PROTOCOL)]
        );
    }

    #[test]
    fn test_malformed_pattern_is_configuration_error() {
        let err = PatternRecognizerSet::new(vec![RuleSpec::new("broken", "X", r"(unclosed")])
            .unwrap_err();

        assert!(matches!(err, SecnerError::Configuration { ref rule, .. } if rule == "broken"));
    }

    #[test]
    fn test_missing_capture_group_is_configuration_error() {
        let rule = RuleSpec::new("grp", "X", r"v(\d+)").group(2);
        assert!(PatternRecognizerSet::new(vec![rule]).unwrap_err().is_configuration());
    }

    #[test]
    fn test_duplicate_rule_name_rejected() {
        let rules = vec![
            RuleSpec::new("same", "X", "a"),
            RuleSpec::new("same", "Y", "b"),
        ];
        assert!(PatternRecognizerSet::new(rules).is_err());
    }

    #[test]
    fn test_bad_exclusion_pattern_rejected() {
        let rule = RuleSpec::new("x", "X", "a").exclude(Exclusion::matches_text("[z"));
        assert!(PatternRecognizerSet::new(vec![rule]).is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let set = PatternRecognizerSet::from_toml_str(
            r#"
            [[rules]]
            name = "modbus"
            label = "PROTOCOL"
            patterns = ['Modbus/TCP']

            [[rules]]
            name = "tcp"
            label = "PROTOCOL"
            patterns = ['\bTCP\b']
            exclude = [{ kind = "overlaps_label", labels = ["PROTOCOL"] }]
            "#,
        )
        .unwrap();

        assert_eq!(set.rule_names(), vec!["modbus", "tcp"]);
        assert_eq!(set.labels(), vec!["PROTOCOL"]);
        assert_eq!(
            set.extract("Modbus/TCP over TCP"),
            vec![
                Span::pattern(0, 10, "PROTOCOL"),
                Span::pattern(16, 19, "PROTOCOL"),
            ]
        );
    }

    #[test]
    fn test_from_toml_str_invalid_document() {
        let err = PatternRecognizerSet::from_toml_str("[[rules]]\nname = 1").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_defaults_compile() {
        let set = defaults();
        assert_eq!(set.rule_count(), default_rules().len());
        assert!(set.labels().contains(&labels::VULNERABILITY));
    }
}
