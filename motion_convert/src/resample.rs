use ndarray::{Array, ArrayView, Axis, RemoveAxis, Zip};

/// Linearly resamples `series` along axis 0 to `target_frames` frames.
///
/// Source and target frames are spread uniformly over the same `[0, 1]`
/// interval. Sample positions are computed in integers, so target frames that
/// land exactly on a source frame are copied unchanged. A single source frame is
/// held constant; an empty series resamples to zeros.
pub fn resample<D: RemoveAxis>(series: ArrayView<'_, f64, D>, target_frames: usize) -> Array<f64, D> {
    let source_frames = series.len_of(Axis(0));
    if source_frames == target_frames {
        return series.to_owned();
    }

    let mut shape = series.raw_dim();
    shape[0] = target_frames;
    let mut resampled = Array::zeros(shape);
    if source_frames == 0 {
        return resampled;
    }
    if source_frames == 1 {
        for mut frame in resampled.axis_iter_mut(Axis(0)) {
            frame.assign(&series.index_axis(Axis(0), 0));
        }
        return resampled;
    }

    // Target frame j sits at source position j * (n - 1) / (m - 1).
    let span = target_frames.saturating_sub(1).max(1);
    for (j, mut frame) in resampled.axis_iter_mut(Axis(0)).enumerate() {
        let scaled = j * (source_frames - 1);
        let lower = scaled / span;
        let remainder = scaled % span;
        if remainder == 0 {
            frame.assign(&series.index_axis(Axis(0), lower));
            continue;
        }
        let t = remainder as f64 / span as f64;
        Zip::from(&mut frame)
            .and(series.index_axis(Axis(0), lower))
            .and(series.index_axis(Axis(0), lower + 1))
            .for_each(|out, &a, &b| *out = a + (b - a) * t);
    }
    resampled
}

/// Frame count after changing the frame rate, truncated like the flat-file
/// export does.
pub fn frames_for_rate(frames: usize, input_fps: f64, output_fps: f64) -> usize {
    if input_fps <= 0.0 {
        return frames;
    }
    (frames as f64 * output_fps / input_fps).floor() as usize
}
