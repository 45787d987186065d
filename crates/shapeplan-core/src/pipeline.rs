// ── Compilation pipeline ──
//
// prepare: parse both documents, drop virtual nodes, point circuits at
//          physical parents.
// compile: shard, cap, flatten, bind CPUs, assign classes, emit.
// reload:  decide between full/incremental/no-op against persisted state,
//          hand the result to a bus, persist only once the bus succeeded.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::ExecutionBus;
use crate::circuits::{IssueKind, LoadOptions, ValidationReport, load_circuit_table};
use crate::classify::{ResolvedPlan, build_tree, emit_batch, resolve};
use crate::config::ShaperSettings;
use crate::error::CoreError;
use crate::model::{Circuit, ParentNode, QueueBatch, TopologyDocument};
use crate::model::topology::parse_topology;
use crate::reload::{
    DocumentSet, DocumentSource, FullReason, ReloadDecision, ReloadInputs, ReloadState,
    build_patch, decide,
};
use crate::shard::{
    MAX_QUEUES, MIN_QUEUES, PlannerState, ShardRequest, assign_top_level_cpus, assign_unparented,
    generated_nodes, inject_generated_nodes, refresh_state,
};
use crate::store::StateDir;
use crate::topology::{
    MAX_NODE_DEPTH, build_logical_to_physical_map, build_physical_network, ensure_unique_names,
    flatten, inherit_ceilings,
};

// ── Prepare ─────────────────────────────────────────────────────────

/// Both documents parsed and resolved onto the physical network.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Topology with virtual nodes removed.
    pub network: TopologyDocument,
    /// Circuits whose parents name physical nodes (or are unassigned).
    pub circuits: Vec<Circuit>,
    pub report: ValidationReport,
}

/// Parse and validate a document set.
///
/// A circuit parented at a virtual node moves to the nearest physical
/// ancestor. A parent that names no node at all is reported and the
/// circuit is left for the shard planner.
pub fn prepare(documents: &DocumentSet, settings: &ShaperSettings) -> Result<Prepared, CoreError> {
    let logical = parse_topology(&documents.network)?;
    let physical_of = build_logical_to_physical_map(&logical);
    let network = build_physical_network(&logical)?;

    let loaded = load_circuit_table(
        &documents.circuits,
        LoadOptions {
            monitor_only: settings.monitor_only,
        },
    )?;
    let mut report = loaded.report;
    let mut circuits = loaded.circuits;

    for circuit in &mut circuits {
        let ParentNode::Named(name) = &circuit.parent_node else {
            continue;
        };
        match physical_of.get(name) {
            Some(Some(physical)) if physical == name => {}
            Some(Some(physical)) => {
                debug!(circuit_id = %circuit.circuit_id, from = %name, to = %physical, "parent is virtual");
                circuit.parent_node = ParentNode::Named(physical.clone());
            }
            Some(None) => {
                debug!(circuit_id = %circuit.circuit_id, parent = %name, "parent is a top-level virtual node");
                circuit.parent_node = ParentNode::Unassigned;
            }
            None => {
                warn!(circuit_id = %circuit.circuit_id, parent = %name, "unknown parent node");
                report.push(
                    None,
                    &circuit.circuit_id,
                    IssueKind::UnknownParent {
                        parent: name.clone(),
                    },
                );
                circuit.parent_node = ParentNode::Unassigned;
            }
        }
    }

    Ok(Prepared {
        network,
        circuits,
        report,
    })
}

// ── Compile ─────────────────────────────────────────────────────────

/// Output of a full build.
#[derive(Debug, Clone)]
pub struct Compiled {
    /// Final tree: generated nodes injected, ceilings capped, depth flattened.
    pub network: TopologyDocument,
    /// Circuits with every parent assigned.
    pub circuits: Vec<Circuit>,
    /// Top-level node → CPU queue.
    pub cpus: IndexMap<String, u32>,
    pub plan: ResolvedPlan,
    pub batch: QueueBatch,
    pub planner_state: PlannerState,
    pub report: ValidationReport,
    /// Circuits placed by the shard planner.
    pub sharded: usize,
}

/// Run the full build on prepared documents.
///
/// `planner_state` is the last persisted rendezvous state, refreshed here
/// against `now`; the updated state is returned for the caller to persist.
pub fn compile(
    prepared: Prepared,
    settings: &ShaperSettings,
    planner_state: Option<PlannerState>,
    now: i64,
) -> Result<Compiled, CoreError> {
    let queues = settings.queues;
    if queues < MIN_QUEUES {
        return Err(CoreError::InsufficientQueues { available: queues });
    }
    if queues > MAX_QUEUES {
        return Err(CoreError::TooManyQueues { queues });
    }

    let Prepared {
        mut network,
        mut circuits,
        report,
    } = prepared;
    let mut planner_state = refresh_state(planner_state, settings.planner.state_ttl_secs, now);

    let mut sharded = 0;
    if circuits.iter().any(|c| c.parent_node.is_unassigned()) {
        inject_generated_nodes(
            &mut network,
            generated_nodes(
                queues,
                settings.generated_download_mbps,
                settings.generated_upload_mbps,
            ),
        )?;
        let request = ShardRequest {
            strategy: settings.shard_strategy,
            queues,
            shard_capacity_mbps: settings.generated_download_mbps,
            params: &settings.planner,
            now,
        };
        sharded = assign_unparented(&mut circuits, &request, &mut planner_state);
    }

    ensure_unique_names(&network)?;
    let network = inherit_ceilings(
        network,
        settings.upstream_download_mbps,
        settings.upstream_upload_mbps,
    );
    let network = flatten(network, MAX_NODE_DEPTH)?;
    let cpus = assign_top_level_cpus(&network, &circuits, queues, settings.top_level_strategy);

    let tree = build_tree(&network, &circuits);
    let plan = resolve(&tree, &circuits, &cpus, &settings.layout())?;
    let batch = emit_batch(&plan, settings);

    info!(
        nodes = plan.nodes().count(),
        circuits = plan.circuits().count(),
        sharded,
        queues,
        "compiled"
    );
    Ok(Compiled {
        network,
        circuits,
        cpus,
        plan,
        batch,
        planner_state,
        report,
        sharded,
    })
}

// ── Reload ──────────────────────────────────────────────────────────

/// One reload invocation.
#[derive(Debug)]
pub struct ReloadRequest<'a> {
    pub documents: &'a DocumentSet,
    pub settings: &'a ShaperSettings,
    pub boot_id: &'a str,
    pub now: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    /// What was actually applied. An incremental run that needed a parent
    /// missing from the applied plan reports the full rebuild it became.
    pub decision: ReloadDecision,
    /// Findings for the current documents, even when a backup was applied.
    pub report: ValidationReport,
    pub operations: usize,
    pub ip_mappings: usize,
}

/// Decide, build, apply, persist. Holds the state lock throughout.
///
/// Nothing is persisted unless the bus accepted the output, so a failed
/// apply is retried as the same decision on the next run.
pub fn reload<B: ExecutionBus>(
    store: &StateDir,
    bus: &mut B,
    request: &ReloadRequest<'_>,
) -> Result<ReloadOutcome, CoreError> {
    let _lock = store.lock()?;
    let previous = store.load_reload_state()?;
    let settings = request.settings;
    let current = prepare(request.documents, settings)?;
    for issue in current.report.warnings() {
        warn!(%issue, "validation");
    }

    let previous_circuits = previous
        .as_ref()
        .and_then(|state| applied_circuits(state, settings));
    let fingerprint = settings.fingerprint();
    let decision = decide(&ReloadInputs {
        previous: previous.as_ref(),
        current: request.documents,
        boot_id: request.boot_id,
        config_fingerprint: &fingerprint,
        validation_passed: current.report.passed(),
        validation_issues: current.report.warnings().count(),
        previous_circuits: previous_circuits.as_deref(),
        current_circuits: &current.circuits,
    })?;

    match decision {
        ReloadDecision::NoOp => {
            info!("documents unchanged since last apply");
            Ok(ReloadOutcome {
                decision: ReloadDecision::NoOp,
                report: current.report,
                operations: 0,
                ip_mappings: 0,
            })
        }
        ReloadDecision::Incremental { delta } => {
            let patched = match previous.as_ref().and_then(|s| s.last_plan.as_ref()) {
                Some(plan) => build_patch(plan, &delta, &current.circuits, settings)?,
                None => None,
            };
            let Some((patch, plan)) = patched else {
                info!("changed circuits need nodes the applied plan lacks; rebuilding");
                return full_run(
                    store,
                    bus,
                    request,
                    previous.as_ref(),
                    FullReason::UnknownParent,
                    DocumentSource::Current,
                    current,
                );
            };
            bus.apply_patch(&patch)?;
            let state = next_state(request, previous.as_ref(), request.documents.clone(), true, plan);
            store.save_reload_state(&state)?;
            info!(operations = patch.operations.len(), "patch applied");
            Ok(ReloadOutcome {
                decision: ReloadDecision::Incremental { delta },
                report: current.report,
                operations: patch.operations.len(),
                ip_mappings: patch.removed_mappings.len() + patch.added_mappings.len(),
            })
        }
        ReloadDecision::Full { reason, source } => {
            full_run(store, bus, request, previous.as_ref(), reason, source, current)
        }
    }
}

fn full_run<B: ExecutionBus>(
    store: &StateDir,
    bus: &mut B,
    request: &ReloadRequest<'_>,
    previous: Option<&ReloadState>,
    reason: FullReason,
    source: DocumentSource,
    current: Prepared,
) -> Result<ReloadOutcome, CoreError> {
    let settings = request.settings;
    let report = current.report.clone();
    let backup = previous.and_then(|s| s.last_good_backup.as_ref());
    let (documents, prepared) = match (source, backup) {
        (DocumentSource::LastKnownGood, Some(backup)) => {
            info!("applying last-known-good documents");
            (backup.clone(), prepare(backup, settings)?)
        }
        _ => (request.documents.clone(), current),
    };
    let validated = prepared.report.passed();

    let compiled = compile(prepared, settings, store.load_planner_state()?, request.now)?;
    bus.apply_full(&compiled.batch)?;
    store.save_planner_state(&compiled.planner_state)?;
    let state = next_state(request, previous, documents, validated, compiled.plan);
    store.save_reload_state(&state)?;

    info!(%reason, %source, operations = compiled.batch.operations.len(), "full reload applied");
    Ok(ReloadOutcome {
        decision: ReloadDecision::Full { reason, source },
        report,
        operations: compiled.batch.operations.len(),
        ip_mappings: compiled.batch.ip_mappings.len(),
    })
}

/// Circuits of the last applied table, resolved the same way as the
/// current ones so the two compare cleanly.
fn applied_circuits(state: &ReloadState, settings: &ShaperSettings) -> Option<Vec<Circuit>> {
    match prepare(&state.last_applied, settings) {
        Ok(prepared) => Some(prepared.circuits),
        Err(e) => {
            warn!(error = %e, "last applied documents no longer load");
            None
        }
    }
}

fn next_state(
    request: &ReloadRequest<'_>,
    previous: Option<&ReloadState>,
    applied: DocumentSet,
    validated: bool,
    plan: ResolvedPlan,
) -> ReloadState {
    let last_good_backup = if validated {
        Some(applied.clone())
    } else {
        previous.and_then(|s| s.last_good_backup.clone())
    };
    ReloadState {
        boot_id: request.boot_id.to_owned(),
        config_fingerprint: request.settings.fingerprint(),
        last_applied: applied,
        last_good_backup,
        last_plan: Some(plan),
        updated_at: request.now,
    }
}
