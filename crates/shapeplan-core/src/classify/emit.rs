// ── Queue program emission ──

use tracing::info;

use crate::classify::layout::{DEFAULT_MINOR, InterfaceLayout, MQ_MAJOR, ROOT_MINOR};
use crate::classify::plan::{PlanEntry, ResolvedCircuit, ResolvedNode, ResolvedPlan};
use crate::config::ShaperSettings;
use crate::model::{ClassId, Direction, IpMapping, QueueAction, QueueBatch, QueueOperation};

/// Share of a CPU's capacity guaranteed to unclassified traffic.
const DEFAULT_CLASS_SHARE: f64 = 0.25;

/// Full queue program for a plan: per direction the root scaffolding, then
/// every plan entry in traversal order.
pub fn emit_batch(plan: &ResolvedPlan, settings: &ShaperSettings) -> QueueBatch {
    let layout = settings.layout();
    let mut operations = Vec::new();
    for direction in Direction::BOTH {
        operations.extend(scaffolding(&layout, settings, direction));
        for entry in &plan.entries {
            match entry {
                PlanEntry::Node(node) => operations.push(node_op(&layout, node, direction)),
                PlanEntry::Circuit(circuit) => {
                    operations.extend(add_circuit_ops(&layout, &settings.sqm, circuit, direction));
                }
            }
        }
    }
    let ip_mappings: Vec<IpMapping> = plan
        .circuits()
        .flat_map(|circuit| circuit_mappings(&layout, circuit))
        .collect();

    info!(
        operations = operations.len(),
        ip_mappings = ip_mappings.len(),
        on_a_stick = layout.on_a_stick,
        "queue program emitted"
    );
    QueueBatch {
        operations,
        ip_mappings,
    }
}

fn scaffolding(layout: &InterfaceLayout, settings: &ShaperSettings, direction: Direction) -> Vec<QueueOperation> {
    let interface = layout.interface(direction);
    let capacity = direction.pick((settings.upstream_download_mbps, settings.upstream_upload_mbps));
    let mut ops = Vec::new();
    // a stick shares one mq root between both directions
    if direction == Direction::Download || !layout.on_a_stick {
        ops.push(QueueOperation::qdisc(
            QueueAction::AddQdisc,
            interface,
            "root",
            Some(format!("{MQ_MAJOR:x}:")),
            Some("mq"),
        ));
    }
    for cpu in 0..layout.queues {
        let major = layout.major(direction, cpu);
        let root = ClassId::new(major, ROOT_MINOR);
        let default = ClassId::new(major, DEFAULT_MINOR);
        ops.push(QueueOperation::qdisc(
            QueueAction::AddQdisc,
            interface,
            format!("{MQ_MAJOR:x}:{major:x}"),
            Some(root.qdisc_handle()),
            Some("htb"),
        ));
        ops.push(QueueOperation::class(
            QueueAction::AddClass,
            interface,
            root.qdisc_handle(),
            root,
            capacity,
            capacity,
        ));
        ops.push(
            QueueOperation::class(
                QueueAction::AddClass,
                interface,
                root,
                default,
                capacity * DEFAULT_CLASS_SHARE,
                capacity,
            )
            .with_comment("default"),
        );
        ops.push(QueueOperation::qdisc(
            QueueAction::AddQdisc,
            interface,
            default,
            None,
            Some(settings.sqm.as_str()),
        ));
    }
    ops
}

fn node_op(layout: &InterfaceLayout, node: &ResolvedNode, direction: Direction) -> QueueOperation {
    QueueOperation::class(
        QueueAction::AddClass,
        layout.interface(direction),
        layout.class_id(direction, node.cpu, node.parent_minor),
        layout.class_id(direction, node.cpu, node.minor),
        node.rate.get(direction),
        node.ceil.get(direction),
    )
    .with_comment(&node.name)
}

/// Leaf class plus its qdisc.
pub(crate) fn add_circuit_ops(
    layout: &InterfaceLayout,
    sqm: &str,
    circuit: &ResolvedCircuit,
    direction: Direction,
) -> [QueueOperation; 2] {
    let interface = layout.interface(direction);
    let id = layout.class_id(direction, circuit.cpu, circuit.minor);
    [
        QueueOperation::class(
            QueueAction::AddClass,
            interface,
            layout.class_id(direction, circuit.cpu, circuit.parent_minor),
            id,
            circuit.rate.get(direction),
            circuit.ceil.get(direction),
        )
        .with_comment(&circuit.label),
        QueueOperation::qdisc(QueueAction::AddQdisc, interface, id, None, Some(sqm)),
    ]
}

/// New rate/ceiling on an existing leaf class.
pub(crate) fn change_circuit_op(
    layout: &InterfaceLayout,
    circuit: &ResolvedCircuit,
    direction: Direction,
) -> QueueOperation {
    QueueOperation::class(
        QueueAction::ChangeClass,
        layout.interface(direction),
        layout.class_id(direction, circuit.cpu, circuit.parent_minor),
        layout.class_id(direction, circuit.cpu, circuit.minor),
        circuit.rate.get(direction),
        circuit.ceil.get(direction),
    )
    .with_comment(&circuit.label)
}

/// Tear down a leaf: qdisc first, then the class.
pub(crate) fn delete_circuit_ops(
    layout: &InterfaceLayout,
    circuit: &ResolvedCircuit,
    direction: Direction,
) -> [QueueOperation; 2] {
    let interface = layout.interface(direction);
    let id = layout.class_id(direction, circuit.cpu, circuit.minor);
    let mut class = QueueOperation::class(
        QueueAction::DeleteClass,
        interface,
        layout.class_id(direction, circuit.cpu, circuit.parent_minor),
        id,
        0.0,
        0.0,
    )
    .with_comment(&circuit.label);
    class.rate_mbps = None;
    class.ceil_mbps = None;
    [
        QueueOperation::qdisc(QueueAction::DeleteQdisc, interface, id, None, None),
        class,
    ]
}

/// Classification entries for every address of a circuit.
pub(crate) fn circuit_mappings(layout: &InterfaceLayout, circuit: &ResolvedCircuit) -> Vec<IpMapping> {
    address_mappings(layout, circuit, &circuit.addresses)
}

pub(crate) fn address_mappings(
    layout: &InterfaceLayout,
    circuit: &ResolvedCircuit,
    addresses: &[String],
) -> Vec<IpMapping> {
    addresses
        .iter()
        .flat_map(|ip| {
            layout.mapped_directions().iter().map(move |&direction| IpMapping {
                ip: ip.clone(),
                class_id: layout.class_id(direction, circuit.cpu, circuit.minor),
                cpu: layout.steering_cpu(direction, circuit.cpu),
                upload: direction == Direction::Upload,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::classify::plan::PerDirection;

    fn plan() -> ResolvedPlan {
        ResolvedPlan {
            entries: vec![
                PlanEntry::Node(ResolvedNode {
                    name: "AP_A".into(),
                    cpu: 1,
                    minor: 3,
                    parent_minor: 1,
                    rate: PerDirection::new(47.5, 47.5),
                    ceil: PerDirection::new(50.0, 50.0),
                }),
                PlanEntry::Circuit(ResolvedCircuit {
                    circuit_id: "c1".into(),
                    label: "Alice".into(),
                    parent_node: "AP_A".into(),
                    cpu: 1,
                    minor: 4,
                    parent_minor: 3,
                    rate: PerDirection::new(5.0, 2.0),
                    ceil: PerDirection::new(10.0, 4.0),
                    addresses: vec!["100.64.0.1".into(), "2001:db8::/64".into()],
                }),
            ],
        }
    }

    fn settings(on_a_stick: bool) -> ShaperSettings {
        ShaperSettings {
            on_a_stick,
            queues: 2,
            ..ShaperSettings::default()
        }
    }

    #[test]
    fn scaffolding_precedes_plan_entries() {
        let batch = emit_batch(&plan(), &settings(false));
        let first = &batch.operations[0];
        assert_eq!(first.qdisc_kind.as_deref(), Some("mq"));
        assert_eq!(first.id.as_deref(), Some("7fff:"));

        // mq + 4 ops per cpu, then node + circuit class + circuit qdisc
        let per_direction = 1 + 4 * 2 + 3;
        assert_eq!(batch.operations.len(), per_direction * 2);

        let node = &batch.operations[9];
        assert_eq!(node.parent, "2:1");
        assert_eq!(node.id.as_deref(), Some("2:3"));
        assert_eq!(node.interface, "eth1");
        let upload_leaf = &batch.operations[per_direction + 10];
        assert_eq!(upload_leaf.interface, "eth2");
        assert_eq!(upload_leaf.id.as_deref(), Some("2:4"));
        assert_eq!(upload_leaf.ceil_mbps, Some(4.0));
    }

    #[test]
    fn default_class_gets_a_quarter() {
        let batch = emit_batch(&ResolvedPlan::default(), &settings(false));
        let default = batch
            .operations
            .iter()
            .find(|op| op.id.as_deref() == Some("1:2"))
            .unwrap();
        assert_eq!(default.rate_mbps, Some(250.0));
        assert_eq!(default.ceil_mbps, Some(1000.0));
        assert_eq!(default.parent, "1:1");
    }

    #[test]
    fn off_stick_maps_each_ip_once() {
        let batch = emit_batch(&plan(), &settings(false));
        assert_eq!(batch.ip_mappings.len(), 2);
        assert!(batch.ip_mappings.iter().all(|m| !m.upload && m.cpu == 1));
        assert_eq!(batch.ip_mappings[0].class_id, ClassId::new(2, 4));
    }

    #[test]
    fn stick_offsets_upload_and_shares_mq() {
        let batch = emit_batch(&plan(), &settings(true));
        let mq_roots = batch
            .operations
            .iter()
            .filter(|op| op.qdisc_kind.as_deref() == Some("mq"))
            .count();
        assert_eq!(mq_roots, 1);
        assert!(batch.operations.iter().all(|op| op.interface == "eth1"));

        let upload: Vec<_> = batch.ip_mappings.iter().filter(|m| m.upload).collect();
        assert_eq!(upload.len(), 2);
        assert_eq!(upload[0].class_id, ClassId::new(4, 4));
        assert_eq!(upload[0].cpu, 3);

        let ids: Vec<_> = batch.operations.iter().filter_map(|op| op.id.clone()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn deletes_remove_qdisc_before_class() {
        let layout = settings(false).layout();
        let PlanEntry::Circuit(circuit) = &plan().entries[1] else {
            panic!("expected circuit entry");
        };
        let [qdisc, class] = delete_circuit_ops(&layout, circuit, Direction::Download);
        assert_eq!(qdisc.action, QueueAction::DeleteQdisc);
        assert_eq!(qdisc.parent, "2:4");
        assert_eq!(class.action, QueueAction::DeleteClass);
        assert!(class.rate_mbps.is_none());
    }
}
