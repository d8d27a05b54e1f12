//! Stack component kinds.

use serde::{Deserialize, Serialize};

/// Capability slot of a stack. Exactly one component is active per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Alerter,
    DataValidator,
    ModelDeployer,
    Store,
    ArtifactStore,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::Store,
        ComponentKind::ArtifactStore,
        ComponentKind::ModelDeployer,
        ComponentKind::DataValidator,
        ComponentKind::Alerter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Alerter => "alerter",
            ComponentKind::DataValidator => "data-validator",
            ComponentKind::ModelDeployer => "model-deployer",
            ComponentKind::Store => "store",
            ComponentKind::ArtifactStore => "artifact-store",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::Error::Validation(format!("unknown component kind `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_their_names() {
        for kind in ComponentKind::ALL {
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        }
        assert!("orchestrator".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&ComponentKind::ModelDeployer).unwrap();
        assert_eq!(json, "\"model-deployer\"");
    }
}
