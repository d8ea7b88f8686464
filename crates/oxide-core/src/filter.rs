//! Capability filters shared by stages and runners.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requirement (on a stage) or capability (on a runner) descriptor.
///
/// An empty field is a wildcard. Non-empty fields compare exactly and
/// case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Filter {
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub kernel: String,
}

/// What a runner reports about itself. Same shape as a stage's filter.
pub type CapabilityProfile = Filter;

impl Filter {
    /// A filter with every field empty.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = kernel.into();
        self
    }

    /// The five fields in wire order.
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("kind", self.kind.as_str()),
            ("type", self.job_type.as_str()),
            ("os", self.os.as_str()),
            ("arch", self.arch.as_str()),
            ("kernel", self.kernel.as_str()),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_empty())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "*");
        }
        let mut first = true;
        for (name, value) in self.fields() {
            if value.is_empty() {
                continue;
            }
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}
