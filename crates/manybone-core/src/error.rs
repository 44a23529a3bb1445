use thiserror::Error;

/// Errors raised while building an IK task from a skeleton.
///
/// Only build-time problems are reported here. Numerical degeneracies during
/// a solve are resolved with fallbacks and never surface as errors.
#[derive(Debug, Error)]
pub enum IkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown bone: {0}")]
    UnknownBone(String),

    #[error("Duplicate bone name: {0}")]
    DuplicateBone(String),

    #[error("Invalid bone id: {0}")]
    InvalidBoneId(usize),

    #[error("Bone {root} is not an ancestor of bone {tip}")]
    NotAncestor { root: usize, tip: usize },

    #[error("Chain has no reachable target")]
    NoTargets,

    #[error("Constraint count mismatch: {constraints} constraints for {bones} bones")]
    ConstraintMismatch { constraints: usize, bones: usize },

    #[error("Invalid constraint on {bone}: {message}")]
    InvalidConstraint { bone: String, message: String },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ik_error_from_config_error() {
        let err = ConfigError::invalid("iterations", "must be >= 1");
        let ik_err: IkError = err.into();
        assert!(matches!(ik_err, IkError::Config(_)));
        assert!(ik_err.to_string().contains("iterations"));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn config_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let config_err: ConfigError = toml_err.into();
        assert!(matches!(config_err, ConfigError::Toml(_)));
    }

    #[test]
    fn ik_error_display_messages() {
        assert_eq!(
            IkError::UnknownBone("forearm".into()).to_string(),
            "Unknown bone: forearm"
        );
        assert_eq!(
            IkError::DuplicateBone("hand".into()).to_string(),
            "Duplicate bone name: hand"
        );
        assert_eq!(IkError::InvalidBoneId(7).to_string(), "Invalid bone id: 7");
        assert_eq!(
            IkError::NotAncestor { root: 3, tip: 1 }.to_string(),
            "Bone 3 is not an ancestor of bone 1"
        );
        assert_eq!(
            IkError::NoTargets.to_string(),
            "Chain has no reachable target"
        );
        assert_eq!(
            IkError::ConstraintMismatch {
                constraints: 5,
                bones: 3
            }
            .to_string(),
            "Constraint count mismatch: 5 constraints for 3 bones"
        );
        assert_eq!(
            IkError::InvalidConstraint {
                bone: "hand".into(),
                message: "cone radius out of range".into()
            }
            .to_string(),
            "Invalid constraint on hand: cone radius out of range"
        );
    }

    #[test]
    fn config_error_display_messages() {
        assert_eq!(
            ConfigError::invalid("softness", "must be in [0, 1]").to_string(),
            "Invalid value for softness: must be in [0, 1]"
        );
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn errors_are_send_sync() {
        assert_send_sync::<IkError>();
        assert_send_sync::<ConfigError>();
    }
}
