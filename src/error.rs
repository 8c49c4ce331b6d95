use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("Cyclic dependency: {}", describe_cycles(.cycles, .unresolved))]
    CyclicDependency {
        cycles: Vec<Vec<String>>,
        unresolved: Vec<String>,
    },

    #[error("Failed to construct executor for {namespace}: {reason}")]
    ExecutorConstruction { namespace: String, reason: String },

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Build a cycle error from concrete cycle paths.
    pub fn cycles(cycles: Vec<Vec<String>>) -> Self {
        Self::CyclicDependency {
            cycles,
            unresolved: Vec::new(),
        }
    }

    /// Build a cycle error from nodes that could not be placed in any level.
    pub fn unresolved(nodes: Vec<String>) -> Self {
        Self::CyclicDependency {
            cycles: Vec::new(),
            unresolved: nodes,
        }
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, Error::CyclicDependency { .. })
    }
}

fn describe_cycles(cycles: &[Vec<String>], unresolved: &[String]) -> String {
    if !cycles.is_empty() {
        let paths: Vec<String> = cycles.iter().map(|c| c.join(" -> ")).collect();
        return paths.join("; ");
    }
    if unresolved.is_empty() {
        "no nodes have zero dependencies".to_string()
    } else {
        format!("unresolved nodes [{}]", unresolved.join(", "))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
