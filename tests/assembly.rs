//! Load-cycle contract: registration, accumulation, phase order and stamps.

mod common;

use approx::assert_relative_eq;
use common::{accumulate_pass, full_pass, Miscounted, Sloppy};
use dae_core::device::{
    Capacitor, Diode, DiodeParams, Inductor, Neuron, NeuronParams, RcLine, Resistor, VoltageSource, Waveform,
};
use dae_core::error::VariableClass;
use dae_core::{DaeError, DaeSystem, DeviceManager, DeviceOptions, EvalContext, LoadPhase};

/// Every reference device in one circuit, bound and primed.
fn mixed_circuit() -> (DeviceManager, DaeSystem) {
    let mut mgr = DeviceManager::new();
    let stamps = mgr.stamps_mut();
    let devices: Vec<Box<dyn dae_core::DeviceInstance>> = vec![
        Box::new(VoltageSource::new("V1", ["in", "0"], Waveform::Dc(1.0), stamps).unwrap()),
        Box::new(Resistor::new("R1", ["in", "out"], 1e3, stamps).unwrap()),
        Box::new(Capacitor::new("C1", ["out", "0"], 1e-9, None, stamps).unwrap()),
        Box::new(Inductor::new("L1", ["out", "mid"], 1e-3, None, stamps).unwrap()),
        Box::new(Diode::new("D1", ["mid", "0"], DiodeParams::default().with_rs(5.0), stamps).unwrap()),
        Box::new(RcLine::new("T1", ["in", "far", "0"], 2e3, 1e-9, 4).unwrap()),
        Box::new(Neuron::new("N1", ["far", "0"], NeuronParams::default(), stamps).unwrap()),
    ];
    for dev in devices {
        mgr.add_instance(dev).unwrap();
    }
    let topo = mgr.topology();
    let mut sys = mgr.bind(&topo).unwrap();
    for (i, x) in sys.vectors.solution.next.iter_mut().enumerate().skip(1) {
        *x = 0.05 * i as f64;
    }
    sys.vectors.solution.curr.clone_from(&sys.vectors.solution.next);
    (mgr, sys)
}

#[test]
fn test_second_pass_without_zeroing_doubles_every_load() {
    let (mut mgr, mut sys) = mixed_circuit();
    let ctx = EvalContext::transient(1e-6, 1e-7, 2);

    full_pass(&mut mgr, &mut sys, &ctx).unwrap();
    let once = sys.clone();
    accumulate_pass(&mut mgr, &mut sys, &ctx).unwrap();

    // equal up to the rounding of the longer accumulation chain
    let vectors = sys.vectors.f.iter().zip(&once.vectors.f).chain(sys.vectors.q.iter().zip(&once.vectors.q));
    for (twice, once) in vectors {
        assert_relative_eq!(*twice, 2.0 * once, epsilon = 1e-15, max_relative = 1e-12);
    }
    let pairs = sys
        .matrices
        .df_dx
        .triplets()
        .zip(once.matrices.df_dx.triplets())
        .chain(sys.matrices.dq_dx.triplets().zip(once.matrices.dq_dx.triplets()));
    for ((r, c, twice), (_, _, once)) in pairs {
        assert!(
            approx::relative_eq!(twice, 2.0 * once, epsilon = 1e-15, max_relative = 1e-12),
            "element ({r}, {c}): {twice} vs {once}"
        );
    }
    // state and store are written, not accumulated
    assert_eq!(sys.vectors.state, once.vectors.state);
    assert_eq!(sys.vectors.store, once.vectors.store);
}

#[test]
fn test_kirchhoff_rows_sum_to_zero() {
    let (mut mgr, mut sys) = mixed_circuit();
    full_pass(&mut mgr, &mut sys, &EvalContext::dc_op()).unwrap();

    // every element injects equal and opposite currents; the branch rows of
    // V1 and L1 hold voltage equations instead
    let v1 = sys.names.index_of("V1_branch").unwrap();
    let l1 = sys.names.index_of("L1_branch").unwrap();
    let total: f64 = (0..sys.names.len())
        .filter(|&i| i != v1 && i != l1)
        .map(|i| sys.vectors.f[i])
        .sum();
    assert_relative_eq!(total, 0.0, epsilon = 1e-12);
}

#[test]
fn test_phases_must_run_in_order() {
    let (mut mgr, mut sys) = mixed_circuit();
    let ctx = EvalContext::dc_op();

    mgr.update_state(&ctx, &mut sys.vectors).unwrap();
    mgr.load_dae_matrices(&ctx, &mut sys.vectors, &mut sys.matrices)
        .unwrap();
    let err = mgr.load_dae_vectors(&ctx, &mut sys.vectors).unwrap_err();
    assert!(matches!(
        err,
        DaeError::PhaseOrder {
            current: LoadPhase::LoadDFdx,
            requested: LoadPhase::UpdateSecondaryState,
        }
    ));

    // a new pass may always begin
    full_pass(&mut mgr, &mut sys, &ctx).unwrap();
    assert!(mgr
        .collections()
        .all(|c| c.phase() == Some(LoadPhase::LoadDFdx)));
}

#[test]
fn test_index_count_mismatch_aborts_bind() {
    let mut mgr = DeviceManager::new();
    mgr.add_instance(Box::new(Miscounted::new("X1", ["a", "b"])))
        .unwrap();
    let topo = mgr.topology();
    match mgr.bind(&topo) {
        Err(DaeError::IndexCountMismatch {
            instance,
            class,
            expected,
            actual,
        }) => {
            assert_eq!(instance, "X1");
            assert_eq!(class, VariableClass::External);
            assert_eq!(expected, 3);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_audit_flags_writes_outside_the_stamp() {
    let mut mgr = DeviceManager::new();
    let r = Resistor::new("R1", ["a", "b"], 1e3, mgr.stamps_mut()).unwrap();
    mgr.add_instance(Box::new(r)).unwrap();
    mgr.add_instance(Box::new(Sloppy::new("X1", ["a", "b"], 1e-3)))
        .unwrap();
    let topo = mgr.topology();
    let mut sys = mgr.bind(&topo).unwrap();
    sys.vectors.solution.next[1] = 1.0;
    let ctx = EvalContext::dc_op();

    // the resistor makes the off-diagonal part of the pattern, so loading works
    full_pass(&mut mgr, &mut sys, &ctx).unwrap();
    assert_relative_eq!(sys.matrices.df_dx.get(1, 2), -2e-3);

    let before = sys.clone();
    match mgr.audit_stamps(&ctx, &sys.vectors, &sys.matrices) {
        Err(DaeError::StampViolation {
            instance,
            matrix,
            row_name,
            col_name,
        }) => {
            assert_eq!(instance, "X1");
            assert_eq!(matrix, "dFdx");
            assert_eq!(row_name, "a");
            assert_eq!(col_name, "b");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    // the audit works on copies
    assert_eq!(sys.vectors, before.vectors);
    assert_eq!(sys.matrices, before.matrices);
}

#[test]
fn test_audit_accepts_reference_devices() {
    let (mut mgr, mut sys) = mixed_circuit();
    let ctx = EvalContext::transient(0.0, 1e-7, 1);
    full_pass(&mut mgr, &mut sys, &ctx).unwrap();
    mgr.audit_stamps(&ctx, &sys.vectors, &sys.matrices).unwrap();
}

#[test]
fn test_write_outside_pattern_is_an_error() {
    let mut mgr = DeviceManager::new();
    mgr.add_instance(Box::new(Sloppy::new("X1", ["a", "b"], 1e-3)))
        .unwrap();
    let topo = mgr.topology();
    let mut sys = mgr.bind(&topo).unwrap();
    let err = full_pass(&mut mgr, &mut sys, &EvalContext::dc_op()).unwrap_err();
    assert!(matches!(err, DaeError::OutsidePattern { row: 1, col: 2 }));
}

#[test]
fn test_reference_devices_pass_jacobian_test() {
    let (mut mgr, mut sys) = mixed_circuit();
    mgr.set_options(DeviceOptions::new().with_test_jacobian(true).with_merge_check(true));
    for ctx in [EvalContext::dc_op(), EvalContext::transient(0.0, 1e-7, 1)] {
        full_pass(&mut mgr, &mut sys, &ctx).unwrap();
        assert_eq!(mgr.jacobian_reports().len(), mgr.len());
        for report in mgr.jacobian_reports() {
            assert!(report.passed(), "{report}");
            assert!(!report.merge_mismatch);
        }
    }
}

#[test]
fn test_stamps_are_shared_per_kind() {
    let mut mgr = DeviceManager::new();
    for name in ["R1", "R2", "R3"] {
        let r = Resistor::new(name, ["a", "b"], 1e3, mgr.stamps_mut()).unwrap();
        mgr.add_instance(Box::new(r)).unwrap();
    }
    let d = Diode::new("D1", ["a", "0"], DiodeParams::default(), mgr.stamps_mut()).unwrap();
    let d_rs = Diode::new("D2", ["a", "0"], DiodeParams::default().with_rs(1.0), mgr.stamps_mut()).unwrap();
    mgr.add_instance(Box::new(d)).unwrap();
    mgr.add_instance(Box::new(d_rs)).unwrap();
    // resistor, diode without rs, diode with rs
    assert_eq!(mgr.stamps().len(), 3);
    assert_eq!(mgr.len(), 5);
    assert!(mgr.instance("d2").is_some());
}
