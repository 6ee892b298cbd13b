//! Column permutations between joint orderings.

use std::collections::HashMap;
use std::fmt;

use ndarray::{Array2, ArrayView2, Axis};

use crate::registry::JOINT_SUFFIX;

/// Strips the flat-file `_joint` suffix so names from every ordering compare equal.
pub fn normalize_joint_name(name: &str) -> &str {
    name.strip_suffix(JOINT_SUFFIX).unwrap_or(name)
}

/// For every destination column, the source column it is copied from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMapping {
    indices: Vec<Option<usize>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MappingWarning {
    /// A destination joint with no source column; it will be zero-filled.
    UnmatchedDestination { name: String, position: usize },
    /// A source joint that no destination column reads.
    UnmatchedSource { name: String, index: usize },
    /// Two names of one ordering normalize to the same joint.
    DuplicateName {
        name: String,
        first: usize,
        duplicate: usize,
    },
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingWarning::UnmatchedDestination { name, position } => write!(
                f,
                "destination joint '{name}' (column {position}) has no source column and will be zero-filled"
            ),
            MappingWarning::UnmatchedSource { name, index } => write!(
                f,
                "source joint '{name}' (column {index}) is not present in the destination ordering"
            ),
            MappingWarning::DuplicateName {
                name,
                first,
                duplicate,
            } => write!(
                f,
                "joint '{name}' appears at columns {first} and {duplicate}; using column {first}"
            ),
        }
    }
}

/// A mapping together with the diagnostics raised while building it.
#[derive(Clone, Debug)]
pub struct MappingOutcome {
    pub mapping: IndexMapping,
    pub diagnostics: Vec<MappingWarning>,
}

impl MappingOutcome {
    pub fn is_complete(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl IndexMapping {
    /// Matches every destination name against the source ordering after suffix
    /// normalization. Lookup misses are reported, never fatal.
    pub fn build<S: AsRef<str>, D: AsRef<str>>(source: &[S], destination: &[D]) -> MappingOutcome {
        let mut diagnostics = Vec::new();
        let source_index = index_by_name(source, &mut diagnostics);
        let destination_index = index_by_name(destination, &mut diagnostics);

        let indices = destination
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let found = source_index
                    .get(normalize_joint_name(name.as_ref()))
                    .copied();
                if found.is_none() {
                    diagnostics.push(MappingWarning::UnmatchedDestination {
                        name: name.as_ref().to_string(),
                        position,
                    });
                }
                found
            })
            .collect();

        for (index, name) in source.iter().enumerate() {
            if !destination_index.contains_key(normalize_joint_name(name.as_ref())) {
                diagnostics.push(MappingWarning::UnmatchedSource {
                    name: name.as_ref().to_string(),
                    index,
                });
            }
        }

        MappingOutcome {
            mapping: IndexMapping { indices },
            diagnostics,
        }
    }

    pub fn identity(len: usize) -> Self {
        IndexMapping {
            indices: (0..len).map(Some).collect(),
        }
    }

    pub fn from_indices(indices: Vec<Option<usize>>) -> Self {
        IndexMapping { indices }
    }

    /// Number of destination columns.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<usize> {
        self.indices.get(position).copied().flatten()
    }

    pub fn mapped_count(&self) -> usize {
        self.indices.iter().filter(|index| index.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.indices.iter().copied()
    }
}

fn index_by_name<'a, N: AsRef<str>>(
    names: &'a [N],
    diagnostics: &mut Vec<MappingWarning>,
) -> HashMap<&'a str, usize> {
    let mut index = HashMap::with_capacity(names.len());
    for (position, name) in names.iter().enumerate() {
        let key = normalize_joint_name(name.as_ref());
        if let Some(&first) = index.get(key) {
            diagnostics.push(MappingWarning::DuplicateName {
                name: name.as_ref().to_string(),
                first,
                duplicate: position,
            });
        } else {
            index.insert(key, position);
        }
    }
    index
}

/// Gathers the columns of `array` into the destination ordering. Unmapped or
/// out-of-range destination columns stay at `A::default()`, which is zero for
/// every numeric element type.
pub fn reorder<A: Clone + Default>(array: ArrayView2<'_, A>, mapping: &IndexMapping) -> Array2<A> {
    let (frames, columns) = array.dim();
    let mut reordered = Array2::from_elem((frames, mapping.len()), A::default());
    for (position, source) in mapping.iter().enumerate() {
        if let Some(column) = source.filter(|&column| column < columns) {
            reordered
                .column_mut(position)
                .assign(&array.index_axis(Axis(1), column));
        }
    }
    reordered
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::registry::{Representation, RobotVariant, joint_names};

    #[test]
    fn flat_and_simulator_mappings_invert_each_other() {
        for variant in RobotVariant::ALL {
            let flat = joint_names(variant, Representation::FlatFile);
            let simulator = joint_names(variant, Representation::Simulator);
            let to_simulator = IndexMapping::build(flat, simulator);
            let to_flat = IndexMapping::build(simulator, flat);
            assert!(to_simulator.is_complete());
            assert!(to_flat.is_complete());

            for position in 0..simulator.len() {
                let flat_column = to_simulator.mapping.get(position).unwrap();
                assert_eq!(to_flat.mapping.get(flat_column), Some(position));
            }
        }
    }

    #[test]
    fn mujoco_to_simulator_is_a_full_permutation() {
        let outcome = IndexMapping::build(
            joint_names(RobotVariant::M3, Representation::Mujoco),
            joint_names(RobotVariant::M3, Representation::Simulator),
        );
        assert!(outcome.is_complete());
        assert_eq!(outcome.mapping.mapped_count(), 23);
        // Simulator column 15 is left_ankle_roll, MuJoCo column 4.
        assert_eq!(outcome.mapping.get(15), Some(4));
    }

    #[test]
    fn unmatched_names_are_reported_on_both_sides() {
        let outcome = IndexMapping::build(&["a", "b", "extra"], &["b_joint", "a_joint", "missing_joint"]);
        assert_eq!(
            outcome.mapping,
            IndexMapping::from_indices(vec![Some(1), Some(0), None])
        );
        assert_eq!(
            outcome.diagnostics,
            vec![
                MappingWarning::UnmatchedDestination {
                    name: "missing_joint".into(),
                    position: 2
                },
                MappingWarning::UnmatchedSource {
                    name: "extra".into(),
                    index: 2
                },
            ]
        );
    }

    #[test]
    fn duplicate_names_keep_the_first_occurrence() {
        let outcome = IndexMapping::build(&["knee", "knee_joint"], &["knee"]);
        assert_eq!(outcome.mapping.get(0), Some(0));
        assert!(outcome.diagnostics.contains(&MappingWarning::DuplicateName {
            name: "knee_joint".into(),
            first: 0,
            duplicate: 1,
        }));
    }

    #[test]
    fn identity_reorder_is_unchanged() {
        let data = array![[0.1, -2.5, 3.0], [4.25, 5.0, f64::MIN_POSITIVE]];
        let reordered = reorder(data.view(), &IndexMapping::identity(3));
        assert_eq!(reordered, data);
    }

    #[test]
    fn unmapped_columns_are_zero_filled() {
        let data = Array2::from_shape_fn((4, 3), |(r, c)| (r * 10 + c) as f64 + 1.0);
        let mapping = IndexMapping::from_indices(vec![Some(2), None, Some(0), Some(7)]);
        let reordered = reorder(data.view(), &mapping);
        assert_eq!(reordered.dim(), (4, 4));
        assert!(reordered.column(1).iter().all(|&v| v == 0.0));
        // Out-of-range source index degrades to zero-fill.
        assert!(reordered.column(3).iter().all(|&v| v == 0.0));
        assert_eq!(reordered.column(0), data.column(2));
        assert_eq!(reordered.column(2), data.column(0));
    }

    #[test]
    fn reorder_keeps_integer_element_type() {
        let data = array![[1_i64, 2], [3, 4]];
        let reordered = reorder(data.view(), &IndexMapping::from_indices(vec![Some(1), Some(0)]));
        assert_eq!(reordered, array![[2_i64, 1], [4, 3]]);
    }
}
