//! Joint orientation constraints.
//!
//! A joint is either unconstrained or carries a [`Kusudama`]: an ordered path
//! of [`DirectionalConstraint`] cones plus a [`TwistConstraint`].

pub mod cone;
pub mod kusudama;
pub mod twist;

pub use cone::DirectionalConstraint;
pub use kusudama::Kusudama;
pub use twist::TwistConstraint;
