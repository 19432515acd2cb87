use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How serious a confirmed violation of this class is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::Validation(format!("unknown severity '{}'", other))),
        }
    }
}

/// One entry of the externally supplied class table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViolationClass {
    pub id: i64,
    pub name: String,
    pub severity: Severity,
}

/// Fixed `class_id -> class_name` mapping for one deployment.
///
/// The mapping is configuration, not data: `class_name` is always derived from
/// `class_id` through this registry and never stored independently of it.
pub struct ClassRegistry {
    by_id: HashMap<i64, ViolationClass>,
}

impl ClassRegistry {
    pub fn new(classes: Vec<ViolationClass>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(classes.len());
        for class in classes {
            if class.name.trim().is_empty() {
                return Err(Error::Config(format!("class {} has an empty name", class.id)));
            }
            if by_id.insert(class.id, class.clone()).is_some() {
                return Err(Error::Config(format!("duplicate class id {}", class.id)));
            }
        }
        Ok(Self { by_id })
    }

    /// Class table for deployments that do not supply their own.
    pub fn default_classes() -> Vec<ViolationClass> {
        vec![
            ViolationClass {
                id: 0,
                name: "illegal_structure".to_string(),
                severity: Severity::High,
            },
            ViolationClass {
                id: 1,
                name: "illegal_parking".to_string(),
                severity: Severity::Low,
            },
            ViolationClass {
                id: 2,
                name: "littering".to_string(),
                severity: Severity::Medium,
            },
            ViolationClass {
                id: 3,
                name: "traffic_violation".to_string(),
                severity: Severity::Medium,
            },
        ]
    }

    /// Resolve a class id coming out of the model.
    ///
    /// An unknown id means the filtered set is inconsistent with the deployed
    /// class table; that is reported, never coerced to a default class.
    pub fn resolve(&self, class_id: i64) -> Result<&ViolationClass> {
        self.by_id
            .get(&class_id)
            .ok_or_else(|| Error::Validation(format!("unknown class id {}", class_id)))
    }

    pub fn contains(&self, class_id: i64) -> bool {
        self.by_id.contains_key(&class_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new(Self::default_classes()).expect("default class table is well formed")
    }
}
