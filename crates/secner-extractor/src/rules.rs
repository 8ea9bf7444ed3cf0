//! Pattern rule table
//!
//! Rules are plain data: an ordered list of [`RuleSpec`] records that can be
//! built in code or loaded from TOML. Order matters; rules run
//! most-specific-first so that exclusions on later, generic rules can see
//! what earlier rules already claimed.
//!
//! ```toml
//! [[rules]]
//! name = "protocol_token"
//! label = "PROTOCOL"
//! patterns = ['\b(?:TCP|UDP)\b']
//! exclude = [{ kind = "overlaps_label", labels = ["PROTOCOL"] }]
//! ```

use serde::{Deserialize, Serialize};

use crate::labels;

// ============================================================================
// Rule Types
// ============================================================================

/// Predicate that suppresses a match from a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exclusion {
    /// Match overlaps a span from an earlier rule with one of these labels
    OverlapsLabel { labels: Vec<String> },
    /// Match lies entirely inside a span from an earlier rule with one of these labels
    WithinLabel { labels: Vec<String> },
    /// Matched text fully matches this regex (stop-list)
    MatchesText { pattern: String },
}

impl Exclusion {
    pub fn overlaps_label(labels: &[&str]) -> Self {
        Self::OverlapsLabel {
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn within_label(labels: &[&str]) -> Self {
        Self::WithinLabel {
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches_text(pattern: &str) -> Self {
        Self::MatchesText {
            pattern: pattern.to_string(),
        }
    }
}

/// One named lexical rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub label: String,
    /// Regex alternatives; every one is applied
    pub patterns: Vec<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Tag only this capture group instead of the whole match
    #[serde(default)]
    pub group: Option<usize>,
    /// Sector tags; empty means the rule always runs
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<Exclusion>,
}

impl RuleSpec {
    pub fn new(name: &str, label: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            patterns: vec![pattern.to_string()],
            case_insensitive: false,
            group: None,
            sectors: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Add another alternative pattern
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.patterns.push(pattern.to_string());
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn group(mut self, group: usize) -> Self {
        self.group = Some(group);
        self
    }

    pub fn sectors(mut self, sectors: &[&str]) -> Self {
        self.sectors = sectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn exclude(mut self, exclusion: Exclusion) -> Self {
        self.exclude.push(exclusion);
        self
    }

    /// Whether the rule runs for a sector hint
    pub fn applies_to(&self, sector: Option<&str>) -> bool {
        sector_matches(&self.sectors, sector)
    }
}

/// No hint, or an untagged rule, always matches; tags compare case-insensitively
pub(crate) fn sector_matches(sectors: &[String], sector: Option<&str>) -> bool {
    match sector {
        None => true,
        Some(_) if sectors.is_empty() => true,
        Some(sector) => sectors.iter().any(|s| s.eq_ignore_ascii_case(sector)),
    }
}

/// TOML document shape for rule files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleTable {
    pub rules: Vec<RuleSpec>,
}

// ============================================================================
// Built-in rules
// ============================================================================

/// Built-in security rule table, most specific first
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        // Identifiers
        RuleSpec::new("cve", labels::VULNERABILITY, r"\bCVE-\d{4}-\d{4,7}\b").case_insensitive(),
        RuleSpec::new("cwe", labels::WEAKNESS, r"\bCWE-\d{1,5}\b").case_insensitive(),
        RuleSpec::new("capec", labels::ATTACK_PATTERN, r"\bCAPEC-\d{1,5}\b").case_insensitive(),
        RuleSpec::new("ics_advisory", labels::ADVISORY, r"\bICSA-\d{2}-\d{3}-\d{2}[A-Z]?\b")
            .sectors(&["ics"]),
        // Equipment (vendor prefix optional, so the vendor rule nests inside)
        RuleSpec::new(
            "siemens_equipment",
            labels::EQUIPMENT,
            r"\b(?:Siemens\s+)?SIMATIC\s+S7-\d{3,4}(?:\s+CPU)?\b",
        )
        .pattern(r"\b(?:Siemens\s+)?SCALANCE\s+[A-Z]\d{3}\w*\b")
        .sectors(&["ics"]),
        RuleSpec::new(
            "schneider_equipment",
            labels::EQUIPMENT,
            r"\b(?:Schneider\s+Electric\s+)?Modicon\s+M\d{3}\b",
        )
        .sectors(&["ics"]),
        RuleSpec::new(
            "rockwell_equipment",
            labels::EQUIPMENT,
            r"\b(?:Rockwell\s+Automation\s+)?(?:Allen-Bradley\s+)?(?:ControlLogix|CompactLogix|MicroLogix|GuardLogix)\s+\d{4}\b",
        )
        .sectors(&["ics"]),
        RuleSpec::new(
            "network_equipment",
            labels::EQUIPMENT,
            r"\b(?:Cisco\s+)?(?:Catalyst|Nexus|ASA)\s+\d{4}\w*\b",
        )
        .pattern(r"\b(?:Fortinet\s+)?FortiGate\s+\d{2,4}[A-Z]?\b")
        .sectors(&["it"]),
        // Products
        RuleSpec::new(
            "apache_product",
            labels::PRODUCT,
            r"\bApache\s+(?:HTTP\s+Server|Struts\s*2?|Tomcat|Log4j\s*2?|ActiveMQ|Commons\s+Text)\b",
        ),
        RuleSpec::new(
            "microsoft_product",
            labels::PRODUCT,
            r"\bMicrosoft\s+(?:Exchange\s+Server|SharePoint(?:\s+Server)?|Windows(?:\s+Server)?|Office|Outlook)\b",
        ),
        RuleSpec::new(
            "ics_product",
            labels::PRODUCT,
            r"\b(?:Siemens\s+)?SIMATIC\s+WinCC(?:\s+OA)?\b",
        )
        .pattern(r"\b(?:Schneider\s+Electric\s+)?EcoStruxure\s+\w+(?:\s+Expert)?\b")
        .pattern(r"\b(?:Rockwell\s+Automation\s+)?FactoryTalk\s+\w+\b")
        .sectors(&["ics"]),
        RuleSpec::new(
            "standalone_product",
            labels::PRODUCT,
            r"\b(?:OpenSSL|OpenSSH|WordPress|Drupal|Jenkins|GitLab|Confluence|Jira|nginx|FortiOS|PAN-OS)\b",
        )
        .pattern(r"\bCisco\s+IOS(?:\s+XE)?\b")
        .case_insensitive(),
        // Vendors
        RuleSpec::new(
            "vendor",
            labels::VENDOR,
            r"\b(?:Siemens|Schneider\s+Electric|Rockwell\s+Automation|Allen-Bradley|Honeywell|Emerson|Yokogawa|Mitsubishi\s+Electric|ABB|Microsoft|Cisco|Apache|Oracle|Fortinet|Palo\s+Alto\s+Networks|VMware|Adobe|Citrix|Ivanti|Juniper(?:\s+Networks)?|IBM|Red\s+Hat)\b",
        ),
        // Protocols: full names before generic tokens
        RuleSpec::new(
            "protocol_full",
            labels::PROTOCOL,
            r"\b(?:Modbus(?:/TCP|\s+TCP|\s+RTU)?|DNP3|IEC\s+61850|IEC\s+60870-5-104|OPC\s+UA|EtherNet/IP|PROFINET|PROFIBUS|BACnet(?:/IP)?|S7comm(?:-plus)?|HART-IP|MQTT|CoAP)\b",
        ),
        RuleSpec::new(
            "protocol_token",
            labels::PROTOCOL,
            r"\b(?:TCP|UDP|HTTPS?|TLS|SSL|SSH|SMB(?:v[1-3])?|RDP|S?FTP|SNMP(?:v[1-3])?|DNS|LDAP|SMTP|Telnet|ICMP)\b",
        )
        .exclude(Exclusion::overlaps_label(&[labels::PROTOCOL, labels::PRODUCT])),
        // Versions
        RuleSpec::new(
            "version_keyword",
            labels::VERSION,
            r"\b(?:versions?|ver\.)\s+(\d+(?:\.\d+){0,3}[a-z]?)\b",
        )
        .case_insensitive()
        .group(1),
        RuleSpec::new(
            "version",
            labels::VERSION,
            r"\b[vV]?\d+\.\d+(?:\.\d+){0,2}[a-z]?\b",
        )
        .exclude(Exclusion::matches_text(r"\d{1,3}(?:\.\d{1,3}){3}"))
        .exclude(Exclusion::within_label(&[
            labels::VULNERABILITY,
            labels::WEAKNESS,
            labels::ATTACK_PATTERN,
            labels::ADVISORY,
            labels::EQUIPMENT,
        ])),
    ]
}
