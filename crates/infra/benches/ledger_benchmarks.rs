use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::Value as JsonValue;

use equiptrack_auth::Actor;
use equiptrack_core::{ActorId, ClientId, EquipmentTypeId, WarehouseId};
use equiptrack_events::{EventEnvelope, InMemoryEventBus};
use equiptrack_infra::{
    BulkImport, InMemoryInventoryStore, InMemoryReferenceData, InstanceRegistry, InventoryConfig,
    MovementFilter, MovementLedger, Pagination,
};
use equiptrack_inventory::{EquipmentCatalogEntry, MovementRequest, MovementType};

type Ledger = MovementLedger<
    Arc<InMemoryInventoryStore>,
    Arc<InMemoryReferenceData>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

struct Fixture {
    ledger: Ledger,
    manager: Actor,
    equipment_type_id: EquipmentTypeId,
    w1: WarehouseId,
    w2: WarehouseId,
    client: ClientId,
}

fn fixture() -> Fixture {
    let reference = Arc::new(InMemoryReferenceData::new());
    let equipment_type_id = EquipmentTypeId::new();
    let (w1, w2, client) = (WarehouseId::new(), WarehouseId::new(), ClientId::new());
    reference.add_catalog_entry(EquipmentCatalogEntry {
        id: equipment_type_id,
        name: "Bench Router".to_string(),
        category: "network".to_string(),
        subcategory: None,
        price: 10_000,
        minimum_stock: 5,
        critical_stock: 2,
    });
    reference.add_warehouse(w1);
    reference.add_warehouse(w2);
    reference.add_client(client);

    let registry = InstanceRegistry::new(
        Arc::new(InMemoryInventoryStore::new()),
        reference,
        InventoryConfig::default(),
    );
    Fixture {
        ledger: MovementLedger::new(registry, Arc::new(InMemoryEventBus::new())),
        manager: Actor::manager(ActorId::new()),
        equipment_type_id,
        w1,
        w2,
        client,
    }
}

fn import(f: &Fixture, prefix: &str, count: usize) -> Vec<equiptrack_core::InstanceId> {
    let serials: Vec<String> = (0..count).map(|i| format!("{prefix}-{i}")).collect();
    let report = f
        .ledger
        .import_serials(
            &f.manager,
            BulkImport::new(f.equipment_type_id, f.w1, serials.join("\n")),
        )
        .unwrap();
    report.instances.iter().map(|i| i.id()).collect()
}

/// Warehouse ping-pong on one instance: the lock + decide + commit hot path.
fn bench_record_movement(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_movement");
    group.throughput(Throughput::Elements(1));

    group.bench_function("warehouse_transfer", |b| {
        let f = fixture();
        let id = import(&f, "XFER", 1)[0];
        let mut at_first = true;
        b.iter(|| {
            let (from, to) = if at_first { (f.w1, f.w2) } else { (f.w2, f.w1) };
            let request = MovementRequest::new(id, MovementType::WarehouseTransfer, "rebalance")
                .from_warehouse(from)
                .to_warehouse(to);
            black_box(f.ledger.record_movement(&f.manager, request).unwrap());
            at_first = !at_first;
        });
    });

    group.bench_function("rejected_installation", |b| {
        let f = fixture();
        let id = import(&f, "REJ", 1)[0];
        f.ledger
            .record_movement(
                &f.manager,
                MovementRequest::new(id, MovementType::ClientInstallation, "install").client(f.client),
            )
            .unwrap();
        b.iter(|| {
            let request =
                MovementRequest::new(id, MovementType::ClientInstallation, "install").client(f.client);
            black_box(f.ledger.record_movement(&f.manager, request).unwrap_err());
        });
    });

    group.finish();
}

fn bench_list_movements(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_movements");

    for size in [100usize, 1_000, 10_000] {
        let f = fixture();
        import(&f, "LIST", size);

        group.throughput(Throughput::Elements(50));
        group.bench_with_input(BenchmarkId::new("first_page", size), &size, |b, _| {
            b.iter(|| {
                black_box(
                    f.ledger
                        .list_movements(&MovementFilter::default(), Pagination::default())
                        .unwrap(),
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("stats_by_warehouse", size), &size, |b, _| {
            let filter = MovementFilter {
                warehouse_id: Some(f.w1),
                ..Default::default()
            };
            b.iter(|| black_box(f.ledger.movement_stats(&filter).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_movement, bench_list_movements);
criterion_main!(benches);
