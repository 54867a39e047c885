//! daecheck - numerical Jacobian check of the reference devices
//!
//! Builds one of the demo circuits, solves the DC operating point and a
//! number of backward-Euler steps, and compares every instance's analytic
//! Jacobian against finite differences at each Newton iteration.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info daecheck clipper --steps 20 --step 1e-5 --rel-tol 1e-3
//! ```

mod newton;

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use dae_core::device::{
    Capacitor, CurrentSource, Diode, DiodeParams, Inductor, Neuron, NeuronParams, RcLine, Resistor,
    VoltageSource, Waveform,
};
use dae_core::{DeviceManager, DeviceOptions, EvalContext, JacobianReport, Result, TestStatus};

use newton::{DriverError, Newton};

/// Built-in demo circuits
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Demo {
    /// Sine source driving an RC low-pass
    Rc,
    /// Series RLC with initial conditions on L and C
    Rlc,
    /// Diode clipper with and without series resistance
    Clipper,
    /// Current-driven integrate-and-fire neuron
    Neuron,
    /// Segmented RC line with a resistive load
    Line,
}

/// Numerical Jacobian checker for DAE device models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Demo circuit to check
    #[arg(value_enum, default_value_t = Demo::Clipper)]
    demo: Demo,

    /// Number of transient steps after the operating point
    #[arg(short, long, default_value_t = 10)]
    steps: usize,

    /// Time step in seconds
    #[arg(long, default_value_t = 1e-5)]
    step: f64,

    /// Relative tolerance of the Jacobian comparison
    #[arg(long, default_value_t = dae_core::options::DEFAULT_REL_TOL)]
    rel_tol: f64,

    /// Absolute tolerance of the Jacobian comparison
    #[arg(long, default_value_t = dae_core::options::DEFAULT_ABS_TOL)]
    abs_tol: f64,

    /// Perturbation scale
    #[arg(long, default_value_t = dae_core::options::DEFAULT_SQRT_ETA)]
    sqrt_eta: f64,

    /// First step tested
    #[arg(long, default_value_t = 0)]
    start_step: usize,

    /// Last step tested
    #[arg(long)]
    stop_step: Option<usize>,

    /// Report failures as warnings and keep going
    #[arg(short, long)]
    warn: bool,

    /// Only test the named instance
    #[arg(short, long)]
    device: Option<String>,

    /// Compare rows and columns of merged variables
    #[arg(long)]
    merge_check: bool,

    /// Print every report, not only failures
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> DeviceOptions {
        let mut opts = DeviceOptions::new()
            .with_test_jacobian(true)
            .with_step_range(self.start_step, self.stop_step.unwrap_or(usize::MAX))
            .with_warn_on_failure(self.warn)
            .with_tolerances(self.rel_tol, self.abs_tol)
            .with_sqrt_eta(self.sqrt_eta)
            .with_merge_check(self.merge_check);
        if let Some(name) = &self.device {
            opts = opts.with_device_name(name.clone());
        }
        opts
    }
}

fn build(demo: Demo, mgr: &mut DeviceManager) -> Result<()> {
    let sine = Waveform::Sine {
        offset: 0.0,
        amplitude: 2.0,
        freq: 1e3,
        delay: 0.0,
    };
    match demo {
        Demo::Rc => {
            let v = VoltageSource::new("V1", ["in", "0"], sine, mgr.stamps_mut())?;
            let r = Resistor::new("R1", ["in", "out"], 1e3, mgr.stamps_mut())?;
            let c = Capacitor::new("C1", ["out", "0"], 1e-7, None, mgr.stamps_mut())?;
            mgr.add_instance(Box::new(v))?;
            mgr.add_instance(Box::new(r))?;
            mgr.add_instance(Box::new(c))?;
        }
        Demo::Rlc => {
            let v = VoltageSource::new("V1", ["in", "0"], Waveform::Dc(1.0), mgr.stamps_mut())?;
            let r = Resistor::new("R1", ["in", "a"], 10.0, mgr.stamps_mut())?;
            let l = Inductor::new("L1", ["a", "out"], 1e-3, Some(0.0), mgr.stamps_mut())?;
            let c = Capacitor::new("C1", ["out", "0"], 1e-6, Some(0.5), mgr.stamps_mut())?;
            mgr.add_instance(Box::new(v))?;
            mgr.add_instance(Box::new(r))?;
            mgr.add_instance(Box::new(l))?;
            mgr.add_instance(Box::new(c))?;
        }
        Demo::Clipper => {
            let v = VoltageSource::new("V1", ["in", "0"], sine, mgr.stamps_mut())?;
            let r = Resistor::new("R1", ["in", "out"], 1e3, mgr.stamps_mut())?;
            let si = DiodeParams::default().with_rs(10.0).with_charge(5e-9, 2e-12);
            let d1 = Diode::new("D1", ["out", "0"], si, mgr.stamps_mut())?;
            let d2 = Diode::new("D2", ["0", "out"], DiodeParams::germanium(), mgr.stamps_mut())?;
            mgr.add_instance(Box::new(v))?;
            mgr.add_instance(Box::new(r))?;
            mgr.add_instance(Box::new(d1))?;
            mgr.add_instance(Box::new(d2))?;
        }
        Demo::Neuron => {
            let i = CurrentSource::new("I1", ["0", "mem"], Waveform::Dc(2e-9), mgr.stamps_mut())?;
            let n = Neuron::new("N1", ["mem", "0"], NeuronParams::default(), mgr.stamps_mut())?;
            mgr.add_instance(Box::new(i))?;
            mgr.add_instance(Box::new(n))?;
        }
        Demo::Line => {
            let v = VoltageSource::new("V1", ["in", "0"], sine, mgr.stamps_mut())?;
            let t = RcLine::new("T1", ["in", "out", "0"], 1e3, 1e-9, 8)?;
            let r = Resistor::new("RL", ["out", "0"], 1e4, mgr.stamps_mut())?;
            mgr.add_instance(Box::new(v))?;
            mgr.add_instance(Box::new(t))?;
            mgr.add_instance(Box::new(r))?;
        }
    }
    Ok(())
}

/// Elements compared and failing elements over the whole run.
#[derive(Debug, Default)]
struct Tally {
    checked: usize,
    failed: usize,
}

fn run(args: &Args, mgr: &mut DeviceManager) -> std::result::Result<Tally, DriverError> {
    build(args.demo, mgr)?;
    let topology = mgr.topology();
    let mut sys = mgr.bind(&topology)?;
    mgr.set_initial_conditions(&mut sys.vectors)?;

    let mut newton = Newton::new();
    let mut tally = Tally::default();

    let ctx = EvalContext::dc_op();
    let iters = newton.solve(mgr, &mut sys, &ctx, |reports| report(args, reports, &mut tally))?;
    log::info!("operating point converged in {iters} iterations");
    newton.accept(&mut sys);

    for step_number in 1..=args.steps {
        let ctx = EvalContext::transient((step_number - 1) as f64 * args.step, args.step, step_number);
        let iters = newton.solve(mgr, &mut sys, &ctx, |reports| report(args, reports, &mut tally))?;
        log::info!("step {step_number} (t = {:e}) converged in {iters} iterations", ctx.time);
        newton.accept(&mut sys);
    }

    for (i, value) in sys.vectors.solution.curr.iter().enumerate() {
        println!("{:>12} = {value:+.6e}", sys.names.name(i));
    }
    Ok(tally)
}

/// Print and count the reports of one Newton iteration.
fn report(args: &Args, reports: &[JacobianReport], tally: &mut Tally) {
    for rep in reports {
        if args.verbose || !rep.passed() {
            println!("{rep}");
        }
        tally.checked += rep.count(TestStatus::Pass) + rep.count(TestStatus::Fail);
        tally.failed += rep.failures();
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let opts = args.options();
    if let Err(e) = opts.validate() {
        eprintln!("error: {e}");
        return ExitCode::from(2);
    }
    let mut mgr = DeviceManager::with_options(opts);

    match run(&args, &mut mgr) {
        Ok(tally) => {
            println!(
                "checked {} jacobian elements across {} instances, {} failed",
                tally.checked,
                mgr.len(),
                tally.failed
            );
            if tally.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(DriverError::Dae(e)) if !e.is_configuration_error() => {
            for rep in mgr.jacobian_reports().iter().filter(|r| !r.passed()) {
                println!("{rep}");
            }
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
