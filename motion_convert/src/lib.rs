//! Joint remapping and container conversion for humanoid motion clips.
//!
//! Motions move between three containers: simulator trajectory archives
//! (`.npz`), pickled frame dictionaries (`.pkl`) and flat CSV files. Each
//! container stores joints in its own order, and the quaternion layout
//! differs between them.

pub mod container;
pub mod convert;
pub mod error;
pub mod inspect;
pub mod kinematics;
pub mod mapping;
pub mod quaternion;
pub mod registry;
pub mod resample;

pub use container::{ArrayData, MotionArchive};
pub use error::{MotionError, MotionResult};
pub use mapping::{IndexMapping, MappingOutcome, MappingWarning, reorder};
pub use registry::{Representation, RobotVariant, joint_names};
