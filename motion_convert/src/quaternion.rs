//! Scalar-first (WXYZ) and scalar-last (XYZW) quaternion layouts.
//!
//! The simulator archives store WXYZ; flat files and `bevy_math::Quat` use
//! XYZW. All functions act on the trailing axis, which must have length 4.

use ndarray::{Array, ArrayView, Axis, Dimension, RemoveAxis};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum QuatOrder {
    Wxyz,
    #[default]
    Xyzw,
}

impl QuatOrder {
    pub fn to_wxyz<D: RemoveAxis>(self, q: ArrayView<'_, f64, D>) -> Array<f64, D> {
        match self {
            QuatOrder::Wxyz => q.to_owned(),
            QuatOrder::Xyzw => xyzw_to_wxyz(q),
        }
    }
}

/// Moves W from the first to the last channel.
pub fn wxyz_to_xyzw<A: Clone, D: RemoveAxis>(q: ArrayView<'_, A, D>) -> Array<A, D> {
    permute_channels(q, [1, 2, 3, 0])
}

/// Moves W from the last to the first channel.
pub fn xyzw_to_wxyz<A: Clone, D: RemoveAxis>(q: ArrayView<'_, A, D>) -> Array<A, D> {
    permute_channels(q, [3, 0, 1, 2])
}

fn permute_channels<A: Clone, D: RemoveAxis>(q: ArrayView<'_, A, D>, order: [usize; 4]) -> Array<A, D> {
    let last = Axis(q.ndim() - 1);
    assert_eq!(q.len_of(last), 4, "quaternion axis must have four channels");
    let mut out = q.to_owned();
    for (target, source) in order.into_iter().enumerate() {
        out.index_axis_mut(last, target)
            .assign(&q.index_axis(last, source));
    }
    out
}

/// Divides each quaternion by its L2 norm. Zero-norm quaternions are left as they are.
pub fn normalize_quaternions<D: Dimension>(q: ArrayView<'_, f64, D>) -> Array<f64, D> {
    let last = Axis(q.ndim() - 1);
    let mut out = q.to_owned();
    for mut lane in out.lanes_mut(last) {
        let norm = lane.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm > 0.0 {
            lane.mapv_inplace(|c| c / norm);
        }
    }
    out
}
