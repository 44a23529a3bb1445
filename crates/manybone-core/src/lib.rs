// manybone-core: errors, configuration and skeleton boundary for the manybone IK solver.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{ConeConfig, ConstraintSet, JointConstraintConfig, SolverConfig, TwistConfig};
pub use error::{ConfigError, IkError};
pub use traits::{PoseSink, SkeletonSource};
pub use types::{Bone, BoneId, Skeleton};

pub mod prelude {
    pub use crate::config::{ConeConfig, ConstraintSet, JointConstraintConfig, SolverConfig, TwistConfig};
    pub use crate::error::{ConfigError, IkError};
    pub use crate::traits::{PoseSink, SkeletonSource};
    pub use crate::types::{BoneId, Skeleton};
}
