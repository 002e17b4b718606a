//! Benchmarks for device selection and membership planning
//!
//! Target: selector evaluation over 1K devices well under a millisecond

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::collections::BTreeMap;
use volume_group_operator::controller::sync::plan_membership;
use volume_group_operator::crd::{
    DeviceRemovalPolicy, LsblkRequirement, MoveTarget, PvSelector, PvSelectorTerm,
    SelectorOperator,
};
use volume_group_operator::domain::ports::{AttributeValue, BlockDevice};
use volume_group_operator::inventory::LsblkInventory;
use volume_group_operator::inventory::selector::select;

fn device(path: String, size: i128, rotational: bool, children: Vec<BlockDevice>) -> BlockDevice {
    let mut attributes = BTreeMap::new();
    attributes.insert("PATH".to_string(), AttributeValue::Text(path));
    attributes.insert("SIZE".to_string(), AttributeValue::Number(size));
    attributes.insert(
        "ROTA".to_string(),
        AttributeValue::Text(if rotational { "1" } else { "0" }.to_string()),
    );
    attributes.insert("TYPE".to_string(), AttributeValue::Text("disk".to_string()));
    BlockDevice {
        attributes,
        children,
    }
}

/// 250 disks with three partitions each
fn inventory() -> Vec<BlockDevice> {
    (0..250)
        .map(|i| {
            let children = (1..=3)
                .map(|p| device(format!("/dev/sd{}{}", i, p), 1 << 30, i % 2 == 0, vec![]))
                .collect();
            device(format!("/dev/sd{}", i), (i as i128 + 1) << 32, i % 2 == 0, children)
        })
        .collect()
}

fn requirement(key: &str, operator: SelectorOperator, values: &[&str]) -> LsblkRequirement {
    LsblkRequirement {
        key: key.to_string(),
        operator,
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector");
    let devices = inventory();
    group.throughput(Throughput::Elements(1000));

    let selector = PvSelector {
        pv_selector_terms: vec![
            PvSelectorTerm {
                match_lsblk: vec![
                    requirement("ROTA", SelectorOperator::In, &["0"]),
                    requirement("SIZE", SelectorOperator::Gt, &["100Gi"]),
                ],
            },
            PvSelectorTerm {
                match_lsblk: vec![requirement("TYPE", SelectorOperator::Exists, &[])],
            },
        ],
    };

    group.bench_function("select_1k_devices", |b| {
        b.iter(|| select(black_box(&selector), black_box(&devices)))
    });

    group.finish();
}

fn bench_parse_lsblk(c: &mut Criterion) {
    let mut group = c.benchmark_group("lsblk");
    group.throughput(Throughput::Elements(250));

    let disks: Vec<String> = (0..250)
        .map(|i| {
            format!(
                r#"{{"path":"/dev/sd{}","size":{},"rota":false,"type":"disk","children":[{{"path":"/dev/sd{}1","size":1073741824,"rota":false,"type":"part"}}]}}"#,
                i,
                (i as u64 + 1) << 32,
                i
            )
        })
        .collect();
    let output = format!(r#"{{"blockdevices":[{}]}}"#, disks.join(","));

    group.bench_function("parse_250_disks", |b| {
        b.iter(|| LsblkInventory::parse(black_box(output.as_bytes())))
    });

    group.finish();
}

fn bench_plan_membership(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");

    let desired: Vec<String> = (0..512).map(|i| format!("/dev/d{}", i)).collect();
    let observed: Vec<String> = (256..768).map(|i| format!("/dev/d{}", i)).collect();

    group.bench_function("plan_membership_512", |b| {
        b.iter(|| {
            plan_membership(
                black_box(&desired),
                black_box(&observed),
                DeviceRemovalPolicy::MoveAndReduce,
                MoveTarget::Desired,
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_select, bench_parse_lsblk, bench_plan_membership);
criterion_main!(benches);
