//! End-to-end conversions between the container forms.

use bevy_math::{Quat, Vec3};
use ndarray::{Array2, Array3, ArrayD, Axis, Ix2, concatenate, s};

use crate::container::flat::{FlatMotion, QUAT_COLUMNS, fit_columns};
use crate::container::frames::MotionFrames;
use crate::container::{ArrayData, MotionArchive};
use crate::error::{MotionError, MotionResult};
use crate::kinematics::velocity;
use crate::mapping::{IndexMapping, MappingOutcome, reorder};
use crate::quaternion::{QuatOrder, normalize_quaternions, wxyz_to_xyzw};
use crate::registry::{Representation, RobotVariant};
use crate::resample::{frames_for_rate, resample};

/// A converted value and the warnings raised while producing it. Every
/// warning has already been logged.
#[derive(Clone, Debug)]
pub struct Conversion<T> {
    pub output: T,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Diagnostics(Vec<String>);

impl Diagnostics {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.0.push(message);
    }

    fn extend_mapping(&mut self, outcome: &MappingOutcome) {
        for warning in &outcome.diagnostics {
            self.warn(warning.to_string());
        }
    }

    fn finish<T>(self, output: T) -> Conversion<T> {
        Conversion {
            output,
            warnings: self.0,
        }
    }
}

/// Root pose used when an archive carries joint data but no body poses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RootPose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for RootPose {
    fn default() -> Self {
        RootPose {
            position: Vec3::new(0.0, 0.0, 0.85),
            rotation: Quat::IDENTITY,
        }
    }
}

impl RootPose {
    fn rows(&self, frames: usize) -> (Array2<f64>, Array2<f64>) {
        let position = self.position.to_array().map(f64::from);
        let rotation = self.rotation.normalize().to_array().map(f64::from);
        let positions = Array2::from_shape_fn((frames, 3), |(_, c)| position[c]);
        let rotations = Array2::from_shape_fn((frames, 4), |(_, c)| rotation[c]);
        (positions, rotations)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FlatOptions {
    pub variant: RobotVariant,
    pub input_fps: f64,
    pub output_fps: f64,
    pub root_pose: RootPose,
}

impl FlatOptions {
    pub fn new(variant: RobotVariant) -> Self {
        FlatOptions {
            variant,
            input_fps: 50.0,
            output_fps: 50.0,
            root_pose: RootPose::default(),
        }
    }
}

const MOTION_FIELDS: [&str; 3] = ["motion_base_poss", "motion_base_rots", "motion_dof_poss"];

/// Builds the flat `[x y z qx qy qz qw joints...]` matrix from an archive.
///
/// Joint positions come from `joint_pos` (simulator order) with the root taken
/// from the first body of `body_pos_w`/`body_quat_w`, or else from the
/// `motion_*` fields.
pub fn archive_to_flat(
    archive: &MotionArchive,
    options: &FlatOptions,
) -> MotionResult<Conversion<FlatMotion>> {
    let mut diagnostics = Diagnostics::default();
    let variant = options.variant;

    let in_file = |field: &str| archive.contains(field) || archive.was_skipped(field);
    let (root_pos, root_xyzw, joints) = if in_file("joint_pos") {
        let joints = matrix("joint_pos", archive.require("joint_pos")?)?;
        let frames = joints.nrows();
        let body_pos = optional_field(archive, "body_pos_w")?;
        let body_quat = optional_field(archive, "body_quat_w")?;
        let (root_pos, root_xyzw) = match (body_pos, body_quat) {
            (Some(positions), Some(rotations)) => (
                root_body("body_pos_w", positions, 3)?,
                wxyz_to_xyzw(root_body("body_quat_w", rotations, 4)?.view()),
            ),
            _ => {
                diagnostics.warn(format!(
                    "no body_pos_w/body_quat_w in archive; using constant root position {:?} and rotation {:?}",
                    options.root_pose.position.to_array(),
                    options.root_pose.rotation.to_array()
                ));
                options.root_pose.rows(frames)
            }
        };
        (root_pos, root_xyzw, joints)
    } else if MOTION_FIELDS.iter().all(|&field| in_file(field)) {
        let root_pos = root_body("motion_base_poss", archive.require("motion_base_poss")?, 3)?;
        let root_wxyz = root_body("motion_base_rots", archive.require("motion_base_rots")?, 4)?;
        let joints = matrix("motion_dof_poss", archive.require("motion_dof_poss")?)?;
        (root_pos, wxyz_to_xyzw(root_wxyz.view()), joints)
    } else {
        let missing = std::iter::once("joint_pos")
            .chain(MOTION_FIELDS)
            .filter(|field| !archive.contains(field))
            .map(str::to_string)
            .collect();
        return Err(MotionError::MissingFields {
            missing,
            available: archive.names(),
        });
    };

    let frames = joints.nrows();
    for (name, rows) in [("root position", root_pos.nrows()), ("root rotation", root_xyzw.nrows())] {
        if rows != frames {
            return Err(MotionError::shape(
                name,
                format!("{rows} frames, but the joint data has {frames}"),
            ));
        }
    }
    if joints.ncols() != variant.joint_count() {
        diagnostics.warn(format!(
            "joint data has {} columns, {variant} expects {}",
            joints.ncols(),
            variant.joint_count()
        ));
    }

    let outcome = IndexMapping::build(
        variant.joint_names(Representation::Simulator),
        variant.joint_names(Representation::FlatFile),
    );
    diagnostics.extend_mapping(&outcome);
    let flat_joints = reorder(joints.view(), &outcome.mapping);
    tracing::debug!(from = ?joints.dim(), to = ?flat_joints.dim(), "reordered joints to flat-file order");

    let assembled = concatenate(
        Axis(1),
        &[root_pos.view(), root_xyzw.view(), flat_joints.view()],
    )
    .map_err(|e| MotionError::shape("flat", e.to_string()))?;
    let (mut data, warning) = fit_columns(assembled.view(), variant.flat_column_count());
    if let Some(warning) = warning {
        diagnostics.warn(warning.to_string());
    }

    if options.input_fps != options.output_fps {
        let target = frames_for_rate(frames, options.input_fps, options.output_fps);
        tracing::info!(
            input_fps = options.input_fps,
            output_fps = options.output_fps,
            frames,
            target,
            "resampling flat motion"
        );
        data = resample(data.view(), target);
        let normalized = normalize_quaternions(data.slice(s![.., QUAT_COLUMNS]));
        data.slice_mut(s![.., QUAT_COLUMNS]).assign(&normalized);
    }

    Ok(diagnostics.finish(FlatMotion { data, variant }))
}

#[derive(Clone, Copy, Debug)]
pub struct ArchiveOptions {
    /// Resample every per-frame field to this many frames.
    pub target_frames: Option<usize>,
    /// Number of bodies in `body_*` fields; only the first carries the root.
    pub num_bodies: usize,
    /// Layout of `root_rot` in the frame dictionary.
    pub quat_order: QuatOrder,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            target_frames: None,
            num_bodies: 30,
            quat_order: QuatOrder::Xyzw,
        }
    }
}

/// Builds a simulator trajectory archive from a frame dictionary.
///
/// Velocities are estimated by finite differences at the rounded frame rate.
/// Bodies other than the root get a zero position and identity rotation.
pub fn frames_to_archive(
    frames: &MotionFrames,
    options: &ArchiveOptions,
) -> MotionResult<Conversion<MotionArchive>> {
    frames.validate()?;
    let mut diagnostics = Diagnostics::default();

    let fps = frames.fps.round() as i64;
    if fps <= 0 {
        diagnostics.warn(format!("frame rate {} rounds to {fps}; velocities will be zero or negative", frames.fps));
    }
    let num_bodies = if options.num_bodies == 0 {
        diagnostics.warn("num_bodies must be at least 1; using 1");
        1
    } else {
        options.num_bodies
    };

    let source_frames = frames.frame_count();
    let (dof_pos, root_pos, root_wxyz) = match options.target_frames {
        Some(target) if target != source_frames => {
            tracing::info!(from = source_frames, to = target, "resampling frames");
            let root_rot = normalize_quaternions(resample(frames.root_rot.view(), target).view());
            (
                resample(frames.dof_pos.view(), target),
                resample(frames.root_pos.view(), target),
                options.quat_order.to_wxyz(root_rot.view()),
            )
        }
        _ => (
            frames.dof_pos.clone(),
            frames.root_pos.clone(),
            options.quat_order.to_wxyz(frames.root_rot.view()),
        ),
    };
    let frame_count = dof_pos.nrows();

    // Stored as float32; velocities are taken from the stored values.
    let joint_pos = dof_pos.mapv(|v| v as f32);
    let joint_vel = velocity(joint_pos.mapv(f64::from).view(), fps as f64);

    let mut body_pos = Array3::<f32>::zeros((frame_count, num_bodies, 3));
    body_pos
        .index_axis_mut(Axis(1), 0)
        .assign(&root_pos.mapv(|v| v as f32));

    let mut body_quat = Array3::<f32>::zeros((frame_count, num_bodies, 4));
    body_quat.slice_mut(s![.., .., 0]).fill(1.0);
    body_quat
        .index_axis_mut(Axis(1), 0)
        .assign(&root_wxyz.mapv(|v| v as f32));

    let body_lin_vel = velocity(body_pos.mapv(f64::from).view(), fps as f64);
    let body_ang_vel = Array3::<f32>::zeros((frame_count, num_bodies, 3));

    let mut archive = MotionArchive::new();
    archive.insert("fps", ndarray::arr1(&[fps]).into_dyn());
    archive.insert("joint_pos", joint_pos.into_dyn());
    archive.insert("joint_vel", joint_vel.mapv(|v| v as f32).into_dyn());
    archive.insert("body_pos_w", body_pos.into_dyn());
    archive.insert("body_quat_w", body_quat.into_dyn());
    archive.insert("body_lin_vel_w", body_lin_vel.mapv(|v| v as f32).into_dyn());
    archive.insert("body_ang_vel_w", body_ang_vel.into_dyn());
    Ok(diagnostics.finish(archive))
}

/// An archive whose joint fields were reordered, with the mapping used.
#[derive(Clone, Debug)]
pub struct Remapped {
    pub archive: MotionArchive,
    pub mapping: IndexMapping,
}

const JOINT_FIELDS: [&str; 2] = ["joint_pos", "joint_vel"];

/// Reorders `joint_pos` and `joint_vel` from MuJoCo to simulator order. Every
/// other field is copied unchanged; element types are preserved.
pub fn mujoco_to_simulator(
    archive: &MotionArchive,
    variant: RobotVariant,
) -> MotionResult<Conversion<Remapped>> {
    if let Some(field) = JOINT_FIELDS.iter().find(|field| archive.was_skipped(field)) {
        archive.require(field)?;
    }
    if !JOINT_FIELDS.iter().any(|field| archive.contains(field)) {
        return Err(MotionError::MissingFields {
            missing: JOINT_FIELDS.iter().map(|f| f.to_string()).collect(),
            available: archive.names(),
        });
    }
    let mut diagnostics = Diagnostics::default();
    for name in &archive.skipped {
        diagnostics.warn(format!("{name} could not be loaded and is not copied to the output"));
    }
    let mujoco = variant.joint_names(Representation::Mujoco);
    let outcome = IndexMapping::build(mujoco, variant.joint_names(Representation::Simulator));
    diagnostics.extend_mapping(&outcome);

    let mut remapped = MotionArchive::new();
    for (name, data) in archive.iter() {
        if !JOINT_FIELDS.contains(&name) {
            remapped.insert(name, data.clone());
            continue;
        }
        let columns = data.shape().get(1).copied().unwrap_or(0);
        if columns != mujoco.len() {
            diagnostics.warn(format!(
                "{name} has {columns} columns, {variant} MuJoCo order has {}",
                mujoco.len()
            ));
        }
        let reordered = data
            .reorder_columns(&outcome.mapping)
            .map_err(|_| MotionError::shape(name, format!("expected a 2-D array, got {:?}", data.shape())))?;
        tracing::debug!(field = name, from = ?data.shape(), to = ?reordered.shape(), "reordered");
        remapped.insert(name, reordered);
    }

    Ok(diagnostics.finish(Remapped {
        archive: remapped,
        mapping: outcome.mapping,
    }))
}

/// A field that may be absent, but must be loadable if the file has it.
fn optional_field<'a>(archive: &'a MotionArchive, name: &str) -> MotionResult<Option<&'a ArrayData>> {
    if archive.was_skipped(name) {
        return archive.require(name).map(Some);
    }
    Ok(archive.get(name))
}

fn matrix(name: &str, data: &ArrayData) -> MotionResult<Array2<f64>> {
    data.to_f64()
        .into_dimensionality::<Ix2>()
        .map_err(|_| MotionError::shape(name, format!("expected 2 dimensions, got {:?}", data.shape())))
}

/// The root (first body) of a `(T, bodies, C)` array, or a `(T, C)` array as is.
fn root_body(name: &str, data: &ArrayData, channels: usize) -> MotionResult<Array2<f64>> {
    let values: ArrayD<f64> = data.to_f64();
    let root = match values.ndim() {
        3 if values.shape()[1] > 0 => values.index_axis(Axis(1), 0).to_owned(),
        2 => values,
        _ => {
            return Err(MotionError::shape(
                name,
                format!("expected (frames, bodies, {channels}) or (frames, {channels}), got {:?}", data.shape()),
            ));
        }
    };
    let root = root
        .into_dimensionality::<Ix2>()
        .map_err(|e| MotionError::shape(name, e.to_string()))?;
    if root.ncols() != channels {
        return Err(MotionError::shape(
            name,
            format!("expected {channels} channels, got {}", root.ncols()),
        ));
    }
    Ok(root)
}
