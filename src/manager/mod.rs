//! Device collection manager.
//!
//! The [`DeviceManager`] owns every instance, grouped by kind, together with
//! the shared stamp cache, the device options and the Jacobian verifier.
//! It binds the instances to a topology, producing the global system the
//! driver owns, and then runs the load cycle over all collections:
//!
//! ```text
//! update_state      : UpdateIntermediateVars, UpdatePrimaryState
//! (driver computes state derivatives)
//! load_dae_vectors  : UpdateSecondaryState, LoadQVector, LoadFVector
//! load_dae_matrices : LoadDQdx, LoadDFdx, then the optional Jacobian test
//! ```

mod collection;
mod topology;

pub use collection::DeviceCollection;
pub use topology::{is_ground_name, NodeId, Topology, GROUND_NAME};

use std::collections::{BTreeMap, HashMap};

use crate::assembly::{DaeMatrices, DaeSystem, DaeVectors, EvalContext, VariableNames};
use crate::device::{DeviceInstance, DeviceKind, StampRegistry};
use crate::error::{DaeError, Result};
use crate::linalg::SparsityPattern;
use crate::options::DeviceOptions;
use crate::verify::{audit_instance, JacobianReport, JacobianVerifier};

/// Owner of all device instances.
#[derive(Debug, Default)]
pub struct DeviceManager {
    collections: BTreeMap<DeviceKind, DeviceCollection>,
    /// upper-cased instance name -> (kind, index in collection)
    by_name: HashMap<String, (DeviceKind, usize)>,
    stamps: StampRegistry,
    options: DeviceOptions,
    names: VariableNames,
    verifier: JacobianVerifier,
    reports: Vec<JacobianReport>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with the given device options.
    pub fn with_options(options: DeviceOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: DeviceOptions) {
        self.options = options;
    }

    /// Stamp cache handed to device constructors.
    pub fn stamps_mut(&mut self) -> &mut StampRegistry {
        &mut self.stamps
    }

    pub fn stamps(&self) -> &StampRegistry {
        &self.stamps
    }

    /// Take ownership of an instance. Names are unique, case-insensitively.
    pub fn add_instance(&mut self, dev: Box<dyn DeviceInstance>) -> Result<()> {
        let key = dev.name().to_ascii_uppercase();
        if self.by_name.contains_key(&key) {
            return Err(DaeError::DuplicateInstance {
                name: dev.name().to_string(),
            });
        }
        let kind = dev.kind();
        let index = self
            .collections
            .entry(kind)
            .or_insert_with(|| DeviceCollection::new(kind))
            .push(dev);
        self.by_name.insert(key, (kind, index));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Look up an instance by name.
    pub fn instance(&self, name: &str) -> Option<&dyn DeviceInstance> {
        let (kind, index) = self.by_name.get(&name.to_ascii_uppercase())?;
        self.collections.get(kind)?.get(*index)
    }

    pub fn instance_mut(&mut self, name: &str) -> Option<&mut (dyn DeviceInstance + 'static)> {
        let (kind, index) = self.by_name.get(&name.to_ascii_uppercase())?;
        self.collections.get_mut(kind)?.get_mut(*index)
    }

    /// All instances, grouped by kind.
    pub fn instances(&self) -> impl Iterator<Item = &dyn DeviceInstance> {
        self.collections.values().flat_map(|c| c.iter())
    }

    pub fn collections(&self) -> impl Iterator<Item = &DeviceCollection> {
        self.collections.values()
    }

    /// Names of the global variables, available after [`bind`](Self::bind).
    pub fn variable_names(&self) -> &VariableNames {
        &self.names
    }

    /// Reports of the last Jacobian test.
    pub fn jacobian_reports(&self) -> &[JacobianReport] {
        &self.reports
    }

    /// Topology of every terminal named by the instances, in insertion order
    /// within each kind.
    pub fn topology(&self) -> Topology {
        let mut topo = Topology::new();
        for dev in self.instances() {
            for terminal in dev.core().terminals() {
                topo.add_node(terminal);
            }
        }
        topo
    }

    /// Allocate global ids, register every instance and freeze the matrices.
    pub fn bind(&mut self, topology: &Topology) -> Result<DaeSystem> {
        let mut names: Vec<String> = topology.names().to_vec();
        let mut num_states = 0;
        let mut num_stores = 0;
        let mut all_vars = Vec::with_capacity(self.len());

        for coll in self.collections.values_mut() {
            for dev in coll.iter_mut() {
                let ext = dev
                    .core()
                    .terminals()
                    .iter()
                    .map(|t| {
                        topology.node(t).map(|n| n.0).ok_or_else(|| DaeError::UnknownNode {
                            instance: dev.name().to_string(),
                            node: t.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let layout = dev.layout();
                let mut internal_names = dev.internal_names();
                internal_names.resize_with(layout.int, || format!("{}_int", dev.name()));
                let int: Vec<usize> = (names.len()..names.len() + layout.int).collect();
                names.extend(internal_names.into_iter().take(layout.int));

                let states: Vec<usize> = (num_states..num_states + layout.state).collect();
                let stores: Vec<usize> = (num_stores..num_stores + layout.store).collect();
                num_states += layout.state;
                num_stores += layout.store;

                dev.register_indices(&ext, &int)?;
                dev.register_state_indices(&states)?;
                dev.register_store_indices(&stores)?;
                all_vars.push(ext.into_iter().chain(int).collect::<Vec<_>>());
            }
        }

        let size = names.len();
        let mut pattern = SparsityPattern::new(size);
        let devices = self.collections.values().flat_map(|c| c.iter());
        for (dev, vars) in devices.zip(&all_vars) {
            for (r, c) in dev.jacobian_stamp().pairs() {
                pattern.insert(vars[r], vars[c])?;
            }
        }
        let matrix = pattern.build();

        let devices = self.collections.values_mut().flat_map(|c| c.iter_mut());
        for (dev, vars) in devices.zip(&all_vars) {
            let offsets = dev
                .jacobian_stamp()
                .rows()
                .iter()
                .enumerate()
                .map(|(r, cols)| {
                    cols.iter()
                        .map(|&c| {
                            matrix
                                .col_offset(vars[r], vars[c])
                                .ok_or(DaeError::OutsidePattern {
                                    row: vars[r],
                                    col: vars[c],
                                })
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            dev.register_jacobian_indices(offsets)?;
        }

        log::info!(
            "bound {} instances: {} variables, {} states, {} stores, {} matrix entries",
            self.len(),
            size,
            num_states,
            num_stores,
            matrix.nnz()
        );
        self.names = VariableNames::new(names, Some(0));
        Ok(DaeSystem {
            vectors: DaeVectors::new(size, num_states, num_stores),
            matrices: DaeMatrices {
                df_dx: matrix.clone(),
                dq_dx: matrix,
            },
            names: self.names.clone(),
        })
    }

    /// Seed solution and state from instance initial conditions.
    pub fn set_initial_conditions(&mut self, vectors: &mut DaeVectors) -> Result<()> {
        for coll in self.collections.values_mut() {
            for dev in coll.iter_mut() {
                dev.set_initial_conditions(&mut vectors.solution, &mut vectors.state)?;
            }
        }
        Ok(())
    }

    /// Start a pass: intermediate variables and primary state.
    pub fn update_state(&mut self, ctx: &EvalContext, vectors: &mut DaeVectors) -> Result<()> {
        for coll in self.collections.values_mut() {
            coll.update_intermediate_vars(ctx, &vectors.solution)?;
            coll.update_primary_state(ctx, &mut vectors.state.next)?;
        }
        Ok(())
    }

    /// Secondary state, then accumulate Q and F.
    pub fn load_dae_vectors(&mut self, ctx: &EvalContext, vectors: &mut DaeVectors) -> Result<()> {
        for coll in self.collections.values_mut() {
            coll.update_secondary_state(ctx, &vectors.state_deriv, &mut vectors.store.next)?;
            coll.load_q_vector(&mut vectors.q)?;
            coll.load_f_vector(&mut vectors.f)?;
        }
        Ok(())
    }

    /// Accumulate dQ/dx and dF/dx, then run the Jacobian test if enabled.
    pub fn load_dae_matrices(
        &mut self,
        ctx: &EvalContext,
        vectors: &mut DaeVectors,
        matrices: &mut DaeMatrices,
    ) -> Result<()> {
        for coll in self.collections.values_mut() {
            coll.load_dq_dx(&mut matrices.dq_dx)?;
            coll.load_df_dx(&mut matrices.df_dx)?;
        }

        self.reports.clear();
        let opts = &self.options;
        if !opts.test_jacobian || !opts.in_step_window(ctx.step_number) {
            return Ok(());
        }

        let mut first_failure: Option<(String, usize)> = None;
        for coll in self.collections.values_mut() {
            for dev in coll.iter_mut() {
                if !opts.selects(dev.name()) {
                    continue;
                }
                let report = self.verifier.test_instance(
                    dev.as_mut(),
                    ctx,
                    opts,
                    vectors,
                    matrices,
                    &self.names,
                )?;
                if report.passed() {
                    log::info!(
                        "{}: jacobian test passed ({} elements)",
                        report.instance,
                        report.entries.len()
                    );
                    log::debug!("\n{report}");
                } else if opts.warn_on_failure {
                    log::warn!("\n{report}");
                } else {
                    log::error!("\n{report}");
                    if first_failure.is_none() {
                        first_failure = Some((report.instance.clone(), report.failures()));
                    }
                }
                self.reports.push(report);
            }
        }

        match first_failure {
            Some((instance, failures)) => Err(DaeError::JacobianTestFailure { instance, failures }),
            None => Ok(()),
        }
    }

    /// Check every instance for writes outside its stamp.
    ///
    /// All violations are logged; the first becomes the error.
    pub fn audit_stamps(&mut self, ctx: &EvalContext, vectors: &DaeVectors, matrices: &DaeMatrices) -> Result<()> {
        let mut violations = Vec::new();
        for coll in self.collections.values_mut() {
            for dev in coll.iter_mut() {
                violations.extend(audit_instance(dev.as_mut(), ctx, vectors, matrices)?);
            }
        }
        match violations.into_iter().next() {
            Some(v) => Err(v.into_error(&self.names)),
            None => Ok(()),
        }
    }
}
