//! Rule persistence
//!
//! The engine itself never touches storage. The host loads rules from a
//! [`RuleStore`] on startup and saves them back whenever a rule is edited or
//! toggled. The on-disk form is a single JSON array:
//!
//! ```json
//! [
//!   {"name": "web", "localPort": 8080, "targetAddress": "10.0.0.2",
//!    "targetPort": 80, "isUDP": false, "isActive": true}
//! ]
//! ```

use std::path::{Path, PathBuf};

use crate::errors::StoreError;
use crate::rule::{ForwardRule, Protocol};

/// Load/save access to the ordered rule list
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ForwardRule>, StoreError>;

    async fn save(&self, rules: &[ForwardRule]) -> Result<(), StoreError>;
}

/// Persisted record shape of a [`ForwardRule`]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRule {
    #[serde(alias = "ruleName")]
    name: String,
    local_port: u16,
    target_address: String,
    target_port: u16,
    #[serde(rename = "isUDP", default)]
    is_udp: bool,
    #[serde(default)]
    is_active: bool,
}

impl From<StoredRule> for ForwardRule {
    fn from(stored: StoredRule) -> Self {
        Self {
            name: stored.name,
            local_port: stored.local_port,
            target_address: stored.target_address,
            target_port: stored.target_port,
            protocol: if stored.is_udp {
                Protocol::Udp
            } else {
                Protocol::Tcp
            },
            active: stored.is_active,
        }
    }
}

impl From<&ForwardRule> for StoredRule {
    fn from(rule: &ForwardRule) -> Self {
        Self {
            name: rule.name.clone(),
            local_port: rule.local_port,
            target_address: rule.target_address.clone(),
            target_port: rule.target_port,
            is_udp: rule.protocol == Protocol::Udp,
            is_active: rule.active,
        }
    }
}

/// Decode the persisted JSON array
pub fn rules_from_json(json: &str) -> Result<Vec<ForwardRule>, serde_json::Error> {
    let stored: Vec<StoredRule> = serde_json::from_str(json)?;
    Ok(stored.into_iter().map(ForwardRule::from).collect())
}

/// Encode rules into the persisted JSON array
pub fn rules_to_json(rules: &[ForwardRule]) -> Result<String, serde_json::Error> {
    let stored: Vec<StoredRule> = rules.iter().map(StoredRule::from).collect();
    serde_json::to_string_pretty(&stored)
}

/// Rule list kept as one JSON file
#[derive(Debug, Clone)]
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait::async_trait]
impl RuleStore for JsonRuleStore {
    async fn load(&self) -> Result<Vec<ForwardRule>, StoreError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if json.trim().is_empty() {
            return Ok(Vec::new());
        }

        rules_from_json(&json).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, rules: &[ForwardRule]) -> Result<(), StoreError> {
        let json = rules_to_json(rules).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        // Readers never observe a half-written file
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), rules = rules.len(), "Saved rules");
        Ok(())
    }
}

/// In-process rule store
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: std::sync::Mutex<Vec<ForwardRule>>,
}

impl MemoryRuleStore {
    pub fn new(rules: Vec<ForwardRule>) -> Self {
        Self {
            rules: std::sync::Mutex::new(rules),
        }
    }
}

#[async_trait::async_trait]
impl RuleStore for MemoryRuleStore {
    async fn load(&self) -> Result<Vec<ForwardRule>, StoreError> {
        Ok(self
            .rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, rules: &[ForwardRule]) -> Result<(), StoreError> {
        *self
            .rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = rules.to_vec();
        Ok(())
    }
}

/// Replace the rule with the same name in place, or append it
///
/// Returns true when an existing rule was replaced.
pub fn upsert_rule(rules: &mut Vec<ForwardRule>, rule: ForwardRule) -> bool {
    match rules.iter_mut().find(|r| r.name == rule.name) {
        Some(existing) => {
            *existing = rule;
            true
        }
        None => {
            rules.push(rule);
            false
        }
    }
}

pub fn remove_rule(rules: &mut Vec<ForwardRule>, name: &str) -> Result<ForwardRule, StoreError> {
    let index = rules
        .iter()
        .position(|r| r.name == name)
        .ok_or_else(|| StoreError::UnknownRule {
            name: name.to_string(),
        })?;
    Ok(rules.remove(index))
}

pub fn set_rule_active(
    rules: &mut [ForwardRule],
    name: &str,
    active: bool,
) -> Result<ForwardRule, StoreError> {
    let rule = rules
        .iter_mut()
        .find(|r| r.name == name)
        .ok_or_else(|| StoreError::UnknownRule {
            name: name.to_string(),
        })?;
    rule.active = active;
    Ok(rule.clone())
}

pub fn find_rule<'a>(rules: &'a [ForwardRule], name: &str) -> Result<&'a ForwardRule, StoreError> {
    rules
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| StoreError::UnknownRule {
            name: name.to_string(),
        })
}
