//! Joint orderings for each supported robot.
//!
//! Every robot has three orderings of the same joints: the order the
//! simulator's articulation reports (breadth-first over the kinematic
//! tree), the MuJoCo model order and the column order of flat CSV files.
//! Only the flat-file names carry the `_joint` suffix.

use std::fmt;

pub type JointOrdering = &'static [&'static str];

/// Suffix used by the flat-file ordering only.
pub const JOINT_SUFFIX: &str = "_joint";

/// Root position (3) and root quaternion (4) columns preceding the joints
/// in a flat file.
pub const ROOT_COLUMNS: usize = 3 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum RobotVariant {
    /// 29-DOF humanoid.
    G1,
    /// 23-DOF humanoid with parallel ankles.
    M3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Representation {
    Simulator,
    Mujoco,
    FlatFile,
}

impl RobotVariant {
    pub const ALL: [RobotVariant; 2] = [RobotVariant::G1, RobotVariant::M3];

    pub fn joint_names(self, representation: Representation) -> JointOrdering {
        joint_names(self, representation)
    }

    pub fn joint_count(self) -> usize {
        self.joint_names(Representation::Simulator).len()
    }

    /// Expected column count of a flat file for this robot.
    pub fn flat_column_count(self) -> usize {
        ROOT_COLUMNS + self.joint_count()
    }
}

impl fmt::Display for RobotVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobotVariant::G1 => f.write_str("g1"),
            RobotVariant::M3 => f.write_str("m3"),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Simulator => f.write_str("simulator"),
            Representation::Mujoco => f.write_str("mujoco"),
            Representation::FlatFile => f.write_str("flat-file"),
        }
    }
}

pub fn joint_names(variant: RobotVariant, representation: Representation) -> JointOrdering {
    match (variant, representation) {
        (RobotVariant::G1, Representation::Simulator) => G1_SIMULATOR,
        (RobotVariant::G1, Representation::Mujoco) => G1_MUJOCO,
        (RobotVariant::G1, Representation::FlatFile) => G1_FLAT_FILE,
        (RobotVariant::M3, Representation::Simulator) => M3_SIMULATOR,
        (RobotVariant::M3, Representation::Mujoco) => M3_MUJOCO,
        (RobotVariant::M3, Representation::FlatFile) => M3_FLAT_FILE,
    }
}

const G1_SIMULATOR: JointOrdering = &[
    "left_hip_pitch",
    "right_hip_pitch",
    "waist_yaw",
    "left_hip_roll",
    "right_hip_roll",
    "waist_roll",
    "left_hip_yaw",
    "right_hip_yaw",
    "waist_pitch",
    "left_knee",
    "right_knee",
    "left_shoulder_pitch",
    "right_shoulder_pitch",
    "left_ankle_pitch",
    "right_ankle_pitch",
    "left_shoulder_roll",
    "right_shoulder_roll",
    "left_ankle_roll",
    "right_ankle_roll",
    "left_shoulder_yaw",
    "right_shoulder_yaw",
    "left_elbow",
    "right_elbow",
    "left_wrist_roll",
    "right_wrist_roll",
    "left_wrist_pitch",
    "right_wrist_pitch",
    "left_wrist_yaw",
    "right_wrist_yaw",
];

const G1_MUJOCO: JointOrdering = &[
    "left_hip_pitch",
    "left_hip_roll",
    "left_hip_yaw",
    "left_knee",
    "left_ankle_pitch",
    "left_ankle_roll",
    "right_hip_pitch",
    "right_hip_roll",
    "right_hip_yaw",
    "right_knee",
    "right_ankle_pitch",
    "right_ankle_roll",
    "waist_yaw",
    "waist_pitch",
    "waist_roll",
    "left_shoulder_pitch",
    "left_shoulder_roll",
    "left_shoulder_yaw",
    "left_elbow",
    "left_wrist_roll",
    "left_wrist_pitch",
    "left_wrist_yaw",
    "right_shoulder_pitch",
    "right_shoulder_roll",
    "right_shoulder_yaw",
    "right_elbow",
    "right_wrist_roll",
    "right_wrist_pitch",
    "right_wrist_yaw",
];

const G1_FLAT_FILE: JointOrdering = &[
    "left_hip_pitch_joint",
    "left_hip_roll_joint",
    "left_hip_yaw_joint",
    "left_knee_joint",
    "left_ankle_pitch_joint",
    "left_ankle_roll_joint",
    "right_hip_pitch_joint",
    "right_hip_roll_joint",
    "right_hip_yaw_joint",
    "right_knee_joint",
    "right_ankle_pitch_joint",
    "right_ankle_roll_joint",
    "waist_yaw_joint",
    "waist_roll_joint",
    "waist_pitch_joint",
    "left_shoulder_pitch_joint",
    "left_shoulder_roll_joint",
    "left_shoulder_yaw_joint",
    "left_elbow_joint",
    "left_wrist_roll_joint",
    "left_wrist_pitch_joint",
    "left_wrist_yaw_joint",
    "right_shoulder_pitch_joint",
    "right_shoulder_roll_joint",
    "right_shoulder_yaw_joint",
    "right_elbow_joint",
    "right_wrist_roll_joint",
    "right_wrist_pitch_joint",
    "right_wrist_yaw_joint",
];

const M3_SIMULATOR: JointOrdering = &[
    "left_hip_pitch",
    "right_hip_pitch",
    "waist_yaw",
    "left_hip_roll",
    "right_hip_roll",
    "left_shoulder_pitch",
    "right_shoulder_pitch",
    "left_hip_yaw",
    "right_hip_yaw",
    "left_shoulder_roll",
    "right_shoulder_roll",
    "left_knee",
    "right_knee",
    "left_shoulder_yaw",
    "right_shoulder_yaw",
    "left_ankle_roll",
    "right_ankle_roll",
    "left_elbow_pitch",
    "right_elbow_pitch",
    "left_ankle_pitch",
    "right_ankle_pitch",
    "left_elbow_yaw",
    "right_elbow_yaw",
];

// The ankle roll joint is the parent of ankle pitch in this model.
const M3_MUJOCO: JointOrdering = &[
    "left_hip_pitch",
    "left_hip_roll",
    "left_hip_yaw",
    "left_knee",
    "left_ankle_roll",
    "left_ankle_pitch",
    "right_hip_pitch",
    "right_hip_roll",
    "right_hip_yaw",
    "right_knee",
    "right_ankle_roll",
    "right_ankle_pitch",
    "waist_yaw",
    "left_shoulder_pitch",
    "left_shoulder_roll",
    "left_shoulder_yaw",
    "left_elbow_pitch",
    "left_elbow_yaw",
    "right_shoulder_pitch",
    "right_shoulder_roll",
    "right_shoulder_yaw",
    "right_elbow_pitch",
    "right_elbow_yaw",
];

const M3_FLAT_FILE: JointOrdering = &[
    "left_hip_pitch_joint",
    "left_hip_roll_joint",
    "left_hip_yaw_joint",
    "left_knee_joint",
    "left_ankle_pitch_joint",
    "left_ankle_roll_joint",
    "right_hip_pitch_joint",
    "right_hip_roll_joint",
    "right_hip_yaw_joint",
    "right_knee_joint",
    "right_ankle_pitch_joint",
    "right_ankle_roll_joint",
    "waist_yaw_joint",
    "left_shoulder_pitch_joint",
    "left_shoulder_roll_joint",
    "left_shoulder_yaw_joint",
    "left_elbow_pitch_joint",
    "left_elbow_yaw_joint",
    "right_shoulder_pitch_joint",
    "right_shoulder_roll_joint",
    "right_shoulder_yaw_joint",
    "right_elbow_pitch_joint",
    "right_elbow_yaw_joint",
];
