use ndarray::{Array, ArrayView, Axis, Dimension, Slice, Zip};

/// Per-second rate of change along the frame axis (axis 0).
///
/// Interior frames use the central difference, the first and last frame the
/// forward and backward difference. The result is scaled by `frame_rate`.
/// A single frame has no neighbour to difference against and yields zeros.
pub fn velocity<D: Dimension>(positions: ArrayView<'_, f64, D>, frame_rate: f64) -> Array<f64, D> {
    let mut velocity = Array::zeros(positions.raw_dim());
    if positions.ndim() == 0 {
        return velocity;
    }
    let frames = positions.len_of(Axis(0));
    if frames < 2 {
        return velocity;
    }

    let frame = |range: std::ops::Range<usize>| positions.slice_axis(Axis(0), Slice::from(range));
    let mut difference = |target: std::ops::Range<usize>,
                          ahead: std::ops::Range<usize>,
                          behind: std::ops::Range<usize>,
                          scale: f64| {
        Zip::from(velocity.slice_axis_mut(Axis(0), Slice::from(target)))
            .and(frame(ahead))
            .and(frame(behind))
            .for_each(|v, &next, &prev| *v = (next - prev) * scale);
    };

    if frames > 2 {
        difference(1..frames - 1, 2..frames, 0..frames - 2, 0.5);
    }
    difference(0..1, 1..2, 0..1, 1.0);
    difference(frames - 1..frames, frames - 1..frames, frames - 2..frames - 1, 1.0);

    velocity *= frame_rate;
    velocity
}
