//! Integration tests for the uncertainty reduction engine

mod common;

use common::*;
use labelprob_core::{
    ChannelImage, DiffusionParams, LabelCatalogue, LabelStack, Slot, Termination,
    UncertaintyReduction, CONVERGENCE_TOLERANCE,
};

/// Deterministic pseudo-random two-label stack
fn scrambled_stack(n_voxels: usize) -> LabelStack {
    let mut state = 0x2545_f491_u64;
    let mut stack = LabelStack::new(n_voxels, 3).unwrap();
    for xyz in 0..n_voxels {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let a = ((state >> 33) % 1000) as f64 / 1000.0;
        let b = (1.0 - a) * 0.7;
        let c = 1.0 - a - b;
        let first = ((state >> 20) % 3) as u16;
        stack.voxel_mut(xyz).copy_from_slice(&[
            Slot::new(a, first),
            Slot::new(b, (first + 1) % 3),
            Slot::new(c, (first + 2) % 3),
        ]);
        stack.sort_voxel(xyz);
    }
    stack
}

#[test]
fn test_seed_scenario_5x5x5() {
    let mut engine = seeded_engine(5);
    let grid = *engine.grid();
    let params = DiffusionParams {
        iterations: 10,
        scale: 1.0,
        factor: 1.0,
        ngb_size: 6,
        min_certainty: 0.6,
        ..Default::default()
    };
    engine.diffuse_certainty(&params).unwrap();

    let stack = engine.label_stack().unwrap();
    let neighbours = [(3, 2, 2), (1, 2, 2), (2, 3, 2), (2, 1, 2), (2, 2, 3), (2, 2, 1)];
    for &(x, y, z) in neighbours.iter() {
        let p = proba_of(stack, grid.index(x, y, z), 0).unwrap();
        assert!(p > 0.5, "label A at ({}, {}, {}) is {}", x, y, z, p);
    }
}

#[test]
fn test_invariants_hold_after_every_round() {
    let grid = cube(7);
    let image = step_image(&grid, 3);
    let mut engine = UncertaintyReduction::new(grid, image, 3).unwrap();
    let cat = LabelCatalogue::new(vec![10, 20, 30]).unwrap();
    engine.set_best_probabilities(scrambled_stack(grid.len()), cat).unwrap();

    let params = DiffusionParams {
        iterations: 1,
        ngb_size: 8,
        min_certainty: 0.8,
        factor: 2.0,
        tolerance: 0.0,
        ..Default::default()
    };
    for _ in 0..8 {
        engine.diffuse_certainty(&params).unwrap();
        assert_stack_invariants(engine.label_stack().unwrap());
    }
}

#[test]
fn test_uniform_volume_converges() {
    let mut engine = seeded_engine(9);
    let params = DiffusionParams {
        iterations: 50,
        ngb_size: 6,
        min_certainty: 0.6,
        ..Default::default()
    };
    let report = engine.diffuse_certainty(&params).unwrap();

    assert_eq!(report.termination, Termination::Converged);
    assert!(report.iterations() < 50);
    assert!(report.last().unwrap().mean_diff < CONVERGENCE_TOLERANCE);

    // certainty has been raised everywhere inside the mask
    let certainty = engine.compute_max_certainty(1.0).unwrap();
    for (xyz, &inside) in engine.mask().iter().enumerate() {
        if inside {
            assert!(certainty[xyz] > 0.6, "voxel {} certainty {}", xyz, certainty[xyz]);
        }
    }
}

#[test]
fn test_idempotent_after_convergence() {
    let mut engine = seeded_engine(7);
    let params = DiffusionParams {
        iterations: 50,
        ngb_size: 6,
        min_certainty: 0.6,
        ..Default::default()
    };
    assert!(engine.diffuse_certainty(&params).unwrap().converged());

    let before = engine.snapshot().unwrap();
    engine.diffuse_certainty(&DiffusionParams { iterations: 1, ..params }).unwrap();
    let after = engine.label_stack().unwrap();
    assert!(max_abs_change(&before, after) <= CONVERGENCE_TOLERANCE);
}

#[test]
fn test_border_and_roi_never_written() {
    let grid = cube(7);
    let image = step_image(&grid, 4);
    // ROI excludes the z < 3 half
    let roi: Vec<u8> = (0..grid.len())
        .map(|i| if grid.coords(i).2 >= 3 { 1 } else { 0 })
        .collect();
    let mut engine = UncertaintyReduction::new(grid, image, 3).unwrap().with_mask(&roi).unwrap();
    let cat = LabelCatalogue::new(vec![1, 2, 3]).unwrap();
    engine.set_best_probabilities(scrambled_stack(grid.len()), cat).unwrap();
    let before = engine.snapshot().unwrap();

    let params = DiffusionParams { iterations: 6, min_certainty: 0.9, tolerance: 0.0, ..Default::default() };
    let report = engine.diffuse_certainty(&params).unwrap();
    assert!(report.rounds[0].updated > 0);

    let after = engine.label_stack().unwrap();
    for xyz in 0..grid.len() {
        if grid.is_border(xyz) || roi[xyz] == 0 {
            assert_eq!(after.voxel(xyz), before.voxel(xyz), "voxel {} was modified", xyz);
        }
    }
}

#[test]
fn test_intensity_edge_limits_diffusion() {
    // B leads everywhere with a small margin; a confident A seed sits just
    // right of an intensity edge at x = 2
    let grid = cube(5);
    let mut stack = LabelStack::new(grid.len(), 2).unwrap();
    for xyz in 0..grid.len() {
        stack.voxel_mut(xyz).copy_from_slice(&[Slot::new(0.55, 1), Slot::new(0.45, 0)]);
    }
    stack.voxel_mut(grid.index(2, 2, 2)).copy_from_slice(&[Slot::new(0.9, 0), Slot::new(0.1, 1)]);
    let probe = grid.index(1, 2, 2);
    let params = DiffusionParams {
        iterations: 1,
        ngb_size: 6,
        min_certainty: 0.6,
        ..Default::default()
    };

    let mut uniform = UncertaintyReduction::new(grid, uniform_image(&grid, 1.0), 2).unwrap();
    uniform.set_best_probabilities(stack.clone(), two_labels()).unwrap();
    uniform.diffuse_certainty(&params).unwrap();
    let a_uniform = proba_of(uniform.label_stack().unwrap(), probe, 0).unwrap();

    let mut edged = UncertaintyReduction::new(grid, step_image(&grid, 2), 2).unwrap();
    edged.set_best_probabilities(stack, two_labels()).unwrap();
    edged.diffuse_certainty(&params).unwrap();
    let a_edged = proba_of(edged.label_stack().unwrap(), probe, 0).unwrap();

    assert!(a_uniform > a_edged + 0.01, "uniform {} vs edge {}", a_uniform, a_edged);
    assert!((a_edged - 0.45).abs() < 1e-9);
}

#[test]
fn test_results_are_reproducible() {
    let run = || {
        let grid = cube(8);
        let image = step_image(&grid, 4);
        let mut engine = UncertaintyReduction::new(grid, image, 3).unwrap();
        let cat = LabelCatalogue::new(vec![1, 2, 3]).unwrap();
        engine.set_best_probabilities(scrambled_stack(grid.len()), cat).unwrap();
        let params = DiffusionParams { iterations: 5, ngb_size: 10, min_certainty: 0.7, ..Default::default() };
        engine.diffuse_certainty(&params).unwrap();
        engine.into_label_stack().unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_intensity_model_corrects_mislabelled_voxel() {
    let grid = cube(9);
    let data: Vec<f64> = (0..grid.len())
        .map(|i| {
            let (x, y, z) = grid.coords(i);
            let base = if x < 4 { 1.0 } else { 10.0 };
            base + 0.1 * ((x + y + z) % 3) as f64
        })
        .collect();
    let image = ChannelImage::single(data).unwrap();

    let mut stack = LabelStack::new(grid.len(), 2).unwrap();
    for xyz in 0..grid.len() {
        let pair = if grid.coords(xyz).0 < 4 {
            [Slot::new(0.7, 0), Slot::new(0.3, 1)]
        } else {
            [Slot::new(0.7, 1), Slot::new(0.3, 0)]
        };
        stack.voxel_mut(xyz).copy_from_slice(&pair);
    }
    let wrong = grid.index(6, 4, 4);
    stack.voxel_mut(wrong).copy_from_slice(&[Slot::new(0.55, 0), Slot::new(0.45, 1)]);

    let mut engine = UncertaintyReduction::new(grid, image, 2).unwrap();
    engine.set_best_probabilities(stack, two_labels()).unwrap();
    let params = DiffusionParams {
        iterations: 5,
        ngb_size: 6,
        min_certainty: 0.6,
        compute_distribution: true,
        ..Default::default()
    };
    engine.diffuse_certainty(&params).unwrap();

    let result = engine.label_stack().unwrap();
    assert_eq!(result.top(wrong).label, Some(1));
    assert_stack_invariants(result);
}

#[test]
fn test_variance_normalized_image() {
    let grid = cube(6);
    let data: Vec<f64> = (0..grid.len()).map(|i| 1.0 + (i % 5) as f64).collect();
    let variance = vec![vec![2.0; grid.len()]];
    let image = ChannelImage::with_variance(vec![data], vec![true], variance).unwrap();
    let mut engine = UncertaintyReduction::new(grid, image, 2).unwrap();
    engine.set_best_probabilities(seeded_two_label(&grid, (3, 3, 3)), two_labels()).unwrap();
    let report = engine
        .diffuse_certainty(&DiffusionParams { iterations: 20, min_certainty: 0.6, ..Default::default() })
        .unwrap();
    assert!(report.iterations() >= 1);
    assert_stack_invariants(engine.label_stack().unwrap());
}

#[test]
fn test_hard_segmentation_is_stable() {
    let grid = cube(6);
    let seg: Vec<i32> = (0..grid.len())
        .map(|i| if grid.coords(i).1 < 3 { 4 } else { 7 })
        .collect();
    let mut engine = UncertaintyReduction::new(grid, uniform_image(&grid, 1.0), 2).unwrap();
    engine.init_from_segmentation(&seg).unwrap();
    assert_eq!(engine.catalogue().len(), 2);

    let report = engine.diffuse_certainty(&DiffusionParams::default()).unwrap();
    assert_eq!(report.iterations(), 1);
    assert_eq!(report.rounds[0].updated, 0);
    assert!(report.converged());

    let out = engine.label_stack().unwrap().segmentation(engine.catalogue(), 0);
    for xyz in 0..grid.len() {
        if engine.mask()[xyz] {
            assert_eq!(out[xyz], seg[xyz]);
        } else {
            assert_eq!(out[xyz], 0);
        }
    }
}

#[test]
fn test_iteration_limit_reached() {
    let mut engine = seeded_engine(9);
    let params = DiffusionParams { iterations: 1, ngb_size: 6, min_certainty: 0.6, ..Default::default() };
    let report = engine.diffuse_certainty(&params).unwrap();
    assert_eq!(report.termination, Termination::IterationLimitReached);
    assert_eq!(report.iterations(), 1);
    assert!(report.rounds[0].updated > 0);
}
