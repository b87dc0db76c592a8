//! Eager voxel/streamline incidence.

use serde::{Deserialize, Serialize};

use crate::domain::{Streamline, Voxel};
use crate::error::FitError;
use crate::index::{unique_voxels, validate_streamlines, voxel_of};

/// All nodes of one streamline that fall inside one voxel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamlineVisit {
    pub streamline: usize,
    /// Node indices in ascending order.
    pub nodes: Vec<usize>,
}

/// For every voxel of the fit domain, which streamlines pass through it and
/// through which nodes.
///
/// `voxels` is sorted and deduplicated; `visits[v]` lists the visits to
/// `voxels[v]` ordered by streamline index. A streamline entering the same
/// voxel several times has a single visit holding all of those nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incidence {
    voxels: Vec<Voxel>,
    visits: Vec<Vec<StreamlineVisit>>,
}

impl Incidence {
    /// Index a whole bundle: the voxel set is exactly the set of voxels that
    /// contain at least one node.
    pub fn build(streamlines: &[Streamline]) -> Result<Self, FitError> {
        validate_streamlines(streamlines)?;
        Ok(Self::for_voxels(streamlines, unique_voxels(streamlines)))
    }

    /// Restrict the join to `voxels` (sorted, deduplicated); nodes elsewhere
    /// are ignored. Streamlines must already be validated.
    pub fn for_voxels(streamlines: &[Streamline], voxels: Vec<Voxel>) -> Self {
        let mut visits: Vec<Vec<StreamlineVisit>> = vec![Vec::new(); voxels.len()];
        for (s_idx, s) in streamlines.iter().enumerate() {
            for (n_idx, p) in s.points().iter().enumerate() {
                let Ok(v_idx) = voxels.binary_search(&voxel_of(p)) else {
                    continue;
                };
                let slot = &mut visits[v_idx];
                match slot.last_mut() {
                    Some(last) if last.streamline == s_idx => last.nodes.push(n_idx),
                    _ => slot.push(StreamlineVisit {
                        streamline: s_idx,
                        nodes: vec![n_idx],
                    }),
                }
            }
        }
        Self { voxels, visits }
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn into_voxels(self) -> Vec<Voxel> {
        self.voxels
    }

    pub fn n_voxels(&self) -> usize {
        self.voxels.len()
    }

    pub fn visits(&self, voxel_idx: usize) -> &[StreamlineVisit] {
        &self.visits[voxel_idx]
    }

    /// Position of `voxel` in the sorted voxel list.
    pub fn voxel_index(&self, voxel: &Voxel) -> Option<usize> {
        self.voxels.binary_search(voxel).ok()
    }

    /// Streamlines passing through voxel `voxel_idx`.
    pub fn streamlines_in(&self, voxel_idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.visits[voxel_idx].iter().map(|v| v.streamline)
    }

    /// Total number of (voxel, streamline) pairs.
    pub fn n_pairs(&self) -> usize {
        self.visits.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Affine;

    fn two_streamlines() -> Vec<Streamline> {
        vec![
            Streamline::from_coords(&[[1.1, 2.4, 2.9], [4.0, 5.0, 3.0], [5.0, 6.0, 3.0], [6.0, 7.0, 3.0]]),
            Streamline::from_coords(&[[1.0, 2.0, 3.0], [4.0, 5.0, 3.0], [5.0, 6.0, 3.0]]),
        ]
    }

    fn nodes_of(inc: &Incidence, v: usize, s: usize) -> Option<Vec<usize>> {
        inc.visits(v).iter().find(|x| x.streamline == s).map(|x| x.nodes.clone())
    }

    #[test]
    fn shared_voxels_and_node_lists() {
        let inc = Incidence::build(&two_streamlines()).unwrap();
        assert_eq!(inc.voxels(), &[[1, 2, 3], [4, 5, 3], [5, 6, 3], [6, 7, 3]]);

        for v in 0..3 {
            assert_eq!(inc.streamlines_in(v).collect::<Vec<_>>(), vec![0, 1]);
            assert_eq!(nodes_of(&inc, v, 0), Some(vec![v]));
            assert_eq!(nodes_of(&inc, v, 1), Some(vec![v]));
        }
        assert_eq!(inc.streamlines_in(3).collect::<Vec<_>>(), vec![0]);
        assert_eq!(nodes_of(&inc, 3, 0), Some(vec![3]));
        assert_eq!(inc.n_pairs(), 7);
    }

    #[test]
    fn integer_bundle_shares_voxels() {
        let streamlines = vec![
            Streamline::from_coords(&[[1.0, 2.0, 3.0], [4.0, 5.0, 3.0], [5.0, 6.0, 3.0], [6.0, 7.0, 3.0]]),
            Streamline::from_coords(&[[1.0, 2.0, 3.0], [4.0, 5.0, 3.0], [5.0, 6.0, 3.0]]),
        ];
        let inc = Incidence::build(&streamlines).unwrap();
        assert_eq!(inc.voxels(), &[[1, 2, 3], [4, 5, 3], [5, 6, 3], [6, 7, 3]]);

        for v in 0..3 {
            assert_eq!(inc.streamlines_in(v).collect::<Vec<_>>(), vec![0, 1]);
            assert_eq!(nodes_of(&inc, v, 0), Some(vec![v]));
            assert_eq!(nodes_of(&inc, v, 1), Some(vec![v]));
        }
        assert_eq!(inc.streamlines_in(3).collect::<Vec<_>>(), vec![0]);
        assert_eq!(nodes_of(&inc, 3, 0), Some(vec![3]));
        assert_eq!(nodes_of(&inc, 3, 1), None);
        assert_eq!(inc.n_pairs(), 7);
    }

    #[test]
    fn repeated_passes_are_one_visit() {
        let s = Streamline::from_coords(&[[0.0, 0.0, 0.0], [0.3, 0.0, 0.0], [1.0, 0.0, 0.0], [0.2, 0.1, 0.0]]);
        let inc = Incidence::build(&[s]).unwrap();
        assert_eq!(inc.voxels(), &[[0, 0, 0], [1, 0, 0]]);
        assert_eq!(inc.visits(0), &[StreamlineVisit { streamline: 0, nodes: vec![0, 1, 3] }]);
    }

    #[test]
    fn voxel_set_survives_affine_round_trip() {
        let world = Affine::from_rows([
            [0.9, 0.0, 0.0, 10.0],
            [0.0, 0.9, 0.0, -100.0],
            [0.0, 0.0, 0.9, 2.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let in_world = world.transform_streamlines(&two_streamlines());
        let back = world.try_inverse().unwrap().transform_streamlines(&in_world);
        let direct = Incidence::build(&two_streamlines()).unwrap();
        let round_trip = Incidence::build(&back).unwrap();
        assert_eq!(direct, round_trip);
    }

    #[test]
    fn restricted_join_ignores_other_voxels() {
        let inc = Incidence::for_voxels(&two_streamlines(), vec![[5, 6, 3], [6, 7, 3]]);
        assert_eq!(inc.n_voxels(), 2);
        assert_eq!(inc.streamlines_in(0).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(nodes_of(&inc, 0, 1), Some(vec![2]));
        assert_eq!(inc.voxel_index(&[6, 7, 3]), Some(1));
        assert_eq!(inc.voxel_index(&[1, 2, 3]), None);
    }
}
