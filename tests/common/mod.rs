//! Common test utilities for labelprob-core integration tests

#![allow(dead_code)]

use labelprob_core::{ChannelImage, Grid, LabelCatalogue, LabelStack, Slot, UncertaintyReduction};

/// Tolerance for probability range checks
pub const PROBA_EPS: f64 = 1e-9;

/// Cubic grid of side `n`
pub fn cube(n: usize) -> Grid {
    Grid::new(n, n, n).expect("valid grid")
}

/// Single channel of constant intensity
pub fn uniform_image(grid: &Grid, value: f64) -> ChannelImage {
    ChannelImage::single(vec![value; grid.len()]).expect("valid image")
}

/// Single channel with intensity 1 for x < `edge_x` and 10 otherwise
pub fn step_image(grid: &Grid, edge_x: usize) -> ChannelImage {
    let data = (0..grid.len())
        .map(|i| if grid.coords(i).0 < edge_x { 1.0 } else { 10.0 })
        .collect();
    ChannelImage::single(data).expect("valid image")
}

/// Two-label stack: 0.5/0.5 everywhere, `(0.9, 0.1)` for label 0 at `seed`
pub fn seeded_two_label(grid: &Grid, seed: (usize, usize, usize)) -> LabelStack {
    let mut stack = LabelStack::new(grid.len(), 2).expect("valid stack");
    for xyz in 0..grid.len() {
        stack.voxel_mut(xyz).copy_from_slice(&[Slot::new(0.5, 0), Slot::new(0.5, 1)]);
    }
    let s = grid.index(seed.0, seed.1, seed.2);
    stack.voxel_mut(s).copy_from_slice(&[Slot::new(0.9, 0), Slot::new(0.1, 1)]);
    stack
}

pub fn two_labels() -> LabelCatalogue {
    LabelCatalogue::new(vec![1, 2]).expect("valid catalogue")
}

/// Engine over a uniform cube with a single seed at its centre
pub fn seeded_engine(n: usize) -> UncertaintyReduction {
    let grid = cube(n);
    let image = uniform_image(&grid, 1.0);
    let mut engine = UncertaintyReduction::new(grid, image, 2).expect("valid engine");
    engine
        .set_best_probabilities(seeded_two_label(&grid, (n / 2, n / 2, n / 2)), two_labels())
        .expect("valid stack");
    engine
}

/// Probability of `label` at `xyz`, or None when absent from the stack
pub fn proba_of(stack: &LabelStack, xyz: usize, label: u16) -> Option<f64> {
    stack.depth_of(xyz, label).map(|d| stack.voxel(xyz)[d].proba)
}

/// Assert every voxel is ranked and every probability lies in [0, 1]
pub fn assert_stack_invariants(stack: &LabelStack) {
    for xyz in 0..stack.n_voxels() {
        assert!(stack.is_sorted(xyz), "voxel {} not sorted: {:?}", xyz, stack.voxel(xyz));
        for slot in stack.voxel(xyz) {
            assert!(
                slot.proba >= -PROBA_EPS && slot.proba <= 1.0 + PROBA_EPS,
                "voxel {} probability {} out of range", xyz, slot.proba
            );
        }
    }
}

/// Largest absolute probability difference between two stacks
pub fn max_abs_change(a: &LabelStack, b: &LabelStack) -> f64 {
    a.slots()
        .iter()
        .zip(b.slots())
        .map(|(x, y)| (x.proba - y.proba).abs())
        .fold(0.0, f64::max)
}
