//! Structured logging with JSON/pretty/compact formats and secret redaction.
//!
//! - JSON format for production
//! - Pretty or compact format for terminals
//! - Per-module log levels
//! - Redaction of secrets (relay tokens, passwords, DSN credentials) in values

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::ObservabilityConfig;

/// Global redactor instance for sensitive data.
static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Log span close events, which carry the span's busy time
    #[serde(default)]
    pub span_close_events: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: default_module_levels(),
            include_location: false,
            span_close_events: false,
            redaction: RedactionConfig::default(),
        }
    }
}

impl LoggingConfig {
    pub fn from_observability(config: &ObservabilityConfig) -> Self {
        Self {
            level: config.log_level.clone(),
            format: if config.json_logging {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            ..Self::default()
        }
    }

    /// The filter directive string: `RUST_LOG` wins over the configured level.
    pub fn directives(&self) -> String {
        let base = std::env::var("RUST_LOG").unwrap_or_else(|_| self.level.clone());
        let mut directives = vec![base];
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();
        for (module, level) in modules {
            directives.push(format!("{}={}", module, level));
        }
        directives.join(",")
    }

    pub(crate) fn span_events(&self) -> FmtSpan {
        if self.span_close_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Configuration for sensitive data redaction.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data to redact.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    /// Field names to match (case-insensitive substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex matched against values; `keep` and `tail` capture groups survive
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Redactor for sensitive fields in log output.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    patterns: Vec<CompiledRedactionPattern>,
    replacement: String,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct CompiledRedactionPattern {
    field_names: Vec<String>,
    value_regex: Option<regex::Regex>,
}

impl SensitiveFieldRedactor {
    pub fn new(config: &RedactionConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|p| CompiledRedactionPattern {
                field_names: p.field_names.iter().map(|s| s.to_lowercase()).collect(),
                value_regex: p
                    .value_pattern
                    .as_ref()
                    .and_then(|pat| regex::Regex::new(pat).ok()),
            })
            .collect();

        Self {
            patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let lower = field_name.to_lowercase();
        self.patterns
            .iter()
            .any(|p| p.field_names.iter().any(|f| lower.contains(f)))
    }

    /// Redact every value-pattern match in `value`.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }

        let mut result = value.to_string();
        for regex in self.patterns.iter().filter_map(|p| p.value_regex.as_ref()) {
            let replacement = &self.replacement;
            result = regex
                .replace_all(&result, |caps: &regex::Captures<'_>| match caps.name("keep") {
                    Some(keep) => format!(
                        "{}{}{}",
                        keep.as_str(),
                        replacement,
                        caps.name("tail").map_or("", |m| m.as_str())
                    ),
                    None => replacement.clone(),
                })
                .into_owned();
        }
        result
    }

    /// Redact a field value, checking both field name and value patterns.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    /// The redactor installed by [`init_logging`], or the default one.
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

/// Mask credentials in a connection string before it is logged.
pub fn redact_url(url: &str) -> String {
    SensitiveFieldRedactor::global().redact_value(url)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_module_levels() -> HashMap<String, String> {
    HashMap::from([
        ("sqlx".to_string(), "warn".to_string()),
        ("hyper".to_string(), "warn".to_string()),
    ])
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "dsn_credentials".to_string(),
            field_names: vec![],
            value_pattern: Some(r"(?P<keep>[a-z][a-z0-9+.-]*://)[^/@\s]+(?P<tail>@)".to_string()),
        },
        RedactionPattern {
            name: "passwords".to_string(),
            field_names: vec![
                "password".to_string(),
                "passwd".to_string(),
                "secret".to_string(),
                "credential".to_string(),
            ],
            value_pattern: None,
        },
        RedactionPattern {
            name: "tokens".to_string(),
            field_names: vec![
                "token".to_string(),
                "bearer".to_string(),
                "authorization".to_string(),
            ],
            value_pattern: Some(r"(?P<keep>(?i)bearer\s+)[A-Za-z0-9._~+/=-]+".to_string()),
        },
    ]
}

/// Install the global redactor. Returns false if one was already set.
pub(crate) fn install_redactor(config: &RedactionConfig) -> bool {
    REDACTOR.set(SensitiveFieldRedactor::new(config)).is_ok()
}

/// Initialize logging alone, without OTLP export.
///
/// # Errors
///
/// Fails on an invalid filter directive or when a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    super::install_subscriber(config, None)
}
