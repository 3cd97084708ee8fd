// Queue Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const QUEUE_NAME_MIN_LEN: usize = 3;
pub const QUEUE_NAME_MAX_LEN: usize = 50;
pub const QUEUE_CONCURRENCY_MIN: u32 = 1;
pub const QUEUE_CONCURRENCY_MAX: u32 = 100;
pub const QUEUE_DESCRIPTION_MAX_LEN: usize = 255;

/// Queue identifier (UUID v4, never reused)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        uuid::Uuid::parse_str(&s).map_err(|_| DomainError::InvalidId(s.clone()))?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized queue slug
///
/// Lower-cased, 3-50 chars, `[a-z0-9][a-z0-9_-]*[a-z0-9]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let name = raw.as_ref().to_lowercase();
        let len = name.chars().count();

        if name.is_empty() {
            return Err(DomainError::InvalidQueueName("name cannot be empty".into()));
        }
        if len < QUEUE_NAME_MIN_LEN {
            return Err(DomainError::InvalidQueueName(format!(
                "'{}' is too short (min {} chars)",
                name, QUEUE_NAME_MIN_LEN
            )));
        }
        if len > QUEUE_NAME_MAX_LEN {
            return Err(DomainError::InvalidQueueName(format!(
                "name is too long ({} chars, max {})",
                len, QUEUE_NAME_MAX_LEN
            )));
        }

        let is_edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        let is_inner = |c: char| is_edge(c) || c == '_' || c == '-';

        if !name.chars().all(is_inner) {
            return Err(DomainError::InvalidQueueName(format!(
                "'{}' must contain only alphanumeric characters, '_' or '-'",
                name
            )));
        }
        // both ends checked: len >= 3 here
        let first = name.chars().next().unwrap_or('_');
        let last = name.chars().last().unwrap_or('_');
        if !is_edge(first) || !is_edge(last) {
            return Err(DomainError::InvalidQueueName(format!(
                "'{}' must start and end with an alphanumeric character",
                name
            )));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QueueName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Max simultaneously active jobs for one queue, in [1, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct QueueConcurrency(u32);

impl QueueConcurrency {
    pub fn new(value: i64) -> Result<Self> {
        if value < QUEUE_CONCURRENCY_MIN as i64 || value > QUEUE_CONCURRENCY_MAX as i64 {
            return Err(DomainError::InvalidConcurrency(format!(
                "{} is out of range [{}, {}]",
                value, QUEUE_CONCURRENCY_MIN, QUEUE_CONCURRENCY_MAX
            )));
        }
        Ok(Self(value as u32))
    }

    /// Accepts integral floats only (e.g. values decoded from loosely typed config)
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(DomainError::InvalidConcurrency(format!(
                "{} is not an integer",
                value
            )));
        }
        Self::new(value as i64)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for QueueConcurrency {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QueueConcurrency> for i64 {
    fn from(c: QueueConcurrency) -> Self {
        c.0 as i64
    }
}

/// Optional free text, trimmed; blank input normalizes to none
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueDescription(Option<String>);

impl QueueDescription {
    pub fn new(raw: Option<&str>) -> Result<Self> {
        let trimmed = match raw.map(str::trim) {
            None | Some("") => return Ok(Self(None)),
            Some(t) => t,
        };
        let len = trimmed.chars().count();
        if len > QUEUE_DESCRIPTION_MAX_LEN {
            return Err(DomainError::InvalidDescription(format!(
                "description is too long ({} chars, max {})",
                len, QUEUE_DESCRIPTION_MAX_LEN
            )));
        }
        Ok(Self(Some(trimmed.to_string())))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

/// Input for [`Queue::create`]
#[derive(Debug, Clone)]
pub struct QueueProps {
    pub id: QueueId,
    pub name: QueueName,
    pub concurrency: QueueConcurrency,
    pub description: Option<QueueDescription>,
    pub now_millis: i64,
}

/// Queue entity
///
/// Value semantics: transitions return a new `Queue`. Equality is by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    id: QueueId,
    name: QueueName,
    concurrency: QueueConcurrency,
    description: QueueDescription,
    created_at: i64,
    updated_at: i64,
}

impl Queue {
    pub fn create(props: QueueProps) -> Self {
        Self {
            id: props.id,
            name: props.name,
            concurrency: props.concurrency,
            description: props.description.unwrap_or_default(),
            created_at: props.now_millis,
            updated_at: props.now_millis,
        }
    }

    /// Rebuild from persisted columns (no timestamp defaults applied)
    pub fn restore(
        id: QueueId,
        name: QueueName,
        concurrency: QueueConcurrency,
        description: QueueDescription,
        created_at: i64,
        updated_at: i64,
    ) -> Self {
        Self {
            id,
            name,
            concurrency,
            description,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> &QueueId {
        &self.id
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn concurrency(&self) -> QueueConcurrency {
        self.concurrency
    }

    pub fn description(&self) -> &QueueDescription {
        &self.description
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Rename and/or re-describe. Returns an unchanged copy if nothing differs.
    pub fn update_details(
        &self,
        name: Option<QueueName>,
        description: Option<QueueDescription>,
        now_millis: i64,
    ) -> Self {
        let name_changed = name.as_ref().is_some_and(|n| n != &self.name);
        let description_changed = description.as_ref().is_some_and(|d| d != &self.description);

        if !name_changed && !description_changed {
            return self.clone();
        }

        Self {
            name: name.unwrap_or_else(|| self.name.clone()),
            description: description.unwrap_or_else(|| self.description.clone()),
            updated_at: now_millis,
            ..self.clone()
        }
    }

    pub fn set_concurrency(&self, concurrency: QueueConcurrency, now_millis: i64) -> Self {
        if concurrency == self.concurrency {
            return self.clone();
        }
        Self {
            concurrency,
            updated_at: now_millis,
            ..self.clone()
        }
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Queue {}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_id() -> QueueId {
        QueueId::parse(uuid::Uuid::new_v4().to_string()).unwrap()
    }

    fn sample_queue() -> Queue {
        Queue::create(QueueProps {
            id: queue_id(),
            name: QueueName::new("llm-jobs").unwrap(),
            concurrency: QueueConcurrency::new(4).unwrap(),
            description: None,
            now_millis: 1_000,
        })
    }

    #[test]
    fn test_queue_name_normalizes_case() {
        let name = QueueName::new("My_Queue-123").unwrap();
        assert_eq!(name.as_str(), "my_queue-123");
    }

    #[test]
    fn test_queue_name_rejections() {
        let too_long = "a".repeat(51);
        let rejected = [
            "",
            "ab",
            too_long.as_str(),
            "queue name",
            "-queue",
            "queue-",
            "_queue",
            "queue.v1",
        ];
        for bad in rejected {
            assert!(QueueName::new(bad).is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_queue_name_boundaries() {
        assert!(QueueName::new("abc").is_ok());
        assert!(QueueName::new("a".repeat(50)).is_ok());
        assert!(QueueName::new("a-_b").is_ok());
    }

    #[test]
    fn test_concurrency_range() {
        assert_eq!(QueueConcurrency::new(1).unwrap().value(), 1);
        assert_eq!(QueueConcurrency::new(100).unwrap().value(), 100);
        assert!(QueueConcurrency::new(0).is_err());
        assert!(QueueConcurrency::new(-1).is_err());
        assert!(QueueConcurrency::new(101).is_err());
        assert!(QueueConcurrency::from_f64(5.5).is_err());
        assert_eq!(QueueConcurrency::from_f64(5.0).unwrap().value(), 5);
    }

    #[test]
    fn test_description_normalization() {
        assert!(QueueDescription::new(None).unwrap().is_none());
        assert!(QueueDescription::new(Some("   ")).unwrap().is_none());
        assert_eq!(
            QueueDescription::new(Some("  agent work  ")).unwrap().as_deref(),
            Some("agent work")
        );
        assert!(QueueDescription::new(Some("x".repeat(256).as_str())).is_err());
    }

    #[test]
    fn test_create_defaults_description() {
        let queue = sample_queue();
        assert!(queue.description().is_none());
        assert_eq!(queue.created_at(), queue.updated_at());
    }

    #[test]
    fn test_update_details_noop_keeps_timestamp() {
        let queue = sample_queue();
        let same = queue.update_details(Some(queue.name().clone()), None, 5_000);
        assert_eq!(same.updated_at(), 1_000);

        let renamed = queue.update_details(Some(QueueName::new("renamed").unwrap()), None, 5_000);
        assert_eq!(renamed.name().as_str(), "renamed");
        assert_eq!(renamed.updated_at(), 5_000);
        // original untouched
        assert_eq!(queue.name().as_str(), "llm-jobs");
        assert_eq!(renamed, queue);
    }

    #[test]
    fn test_set_concurrency() {
        let queue = sample_queue();
        let same = queue.set_concurrency(QueueConcurrency::new(4).unwrap(), 9_000);
        assert_eq!(same.updated_at(), 1_000);

        let bumped = queue.set_concurrency(QueueConcurrency::new(8).unwrap(), 9_000);
        assert_eq!(bumped.concurrency().value(), 8);
        assert_eq!(bumped.updated_at(), 9_000);
    }

    #[test]
    fn test_equality_by_id_only() {
        let a = sample_queue();
        let b = a.set_concurrency(QueueConcurrency::new(10).unwrap(), 2_000);
        assert_eq!(a, b);
        assert_ne!(a, sample_queue());
    }
}
