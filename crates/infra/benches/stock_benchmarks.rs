use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::NaiveDate;
use std::sync::Arc;

use stockbook_core::ItemId;
use stockbook_infra::book::StockBook;
use stockbook_infra::catalog::InMemoryItemCatalog;
use stockbook_infra::config::StockBookConfig;
use stockbook_infra::movement::StockMovement;
use stockbook_infra::store::InMemoryStockStore;
use stockbook_infra::transfer::InMemoryTransferStore;
use stockbook_inventory::{Item, LedgerFilter, NewTransfer, NewWarehouse, StockKey, TransactionType, TransferLine};

type Book = StockBook<InMemoryStockStore, InMemoryItemCatalog, InMemoryTransferStore>;

struct Fixture {
    book: Book,
    items: Vec<Item>,
    a: stockbook_core::WarehouseId,
    b: stockbook_core::WarehouseId,
}

fn fixture(item_count: usize, opening: i64) -> Fixture {
    let items: Vec<Item> = (0..item_count)
        .map(|i| Item::new(ItemId::new(), format!("Item {i}"), "PCS", "CTN", 12))
        .collect();
    let catalog = Arc::new(InMemoryItemCatalog::with_items(items.clone()));
    let book = StockBook::in_memory(catalog, StockBookConfig::default());
    let a = book
        .warehouses()
        .create_warehouse(NewWarehouse::new("A", "Alpha"))
        .unwrap()
        .id;
    let b = book
        .warehouses()
        .create_warehouse(NewWarehouse::new("B", "Beta"))
        .unwrap()
        .id;
    for item in &items {
        book.apply_stock_movement(StockMovement::new(item.id, Some(a), opening, TransactionType::Opening))
            .unwrap();
    }
    Fixture { book, items, a, b }
}

fn bench_movements(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement");
    group.throughput(Throughput::Elements(1));

    let f = fixture(1, 0);
    let item_id = f.items[0].id;
    group.bench_function("purchase", |b| {
        b.iter(|| {
            f.book
                .apply_stock_movement(black_box(StockMovement::new(
                    item_id,
                    Some(f.a),
                    1,
                    TransactionType::Purchase,
                )))
                .unwrap()
        })
    });
    group.finish();
}

fn bench_transfers(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_commit");

    for lines in [1usize, 10, 50] {
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |bench, &lines| {
            let f = fixture(lines, i64::MAX / 4);
            let request = NewTransfer {
                source_warehouse_id: f.a,
                destination_warehouse_id: f.b,
                transfer_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                lines: f.items.iter().map(|i| TransferLine::new(i.id, 1)).collect(),
                notes: None,
            };
            bench.iter(|| f.book.transfers().transfer(black_box(request.clone())).unwrap());
        });
    }
    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");

    for entries in [100usize, 1_000] {
        let f = fixture(1, 1);
        let item_id = f.items[0].id;
        for _ in 1..entries {
            f.book
                .apply_stock_movement(StockMovement::new(item_id, Some(f.a), 1, TransactionType::In))
                .unwrap();
        }
        let key = StockKey::new(item_id, f.a);

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::new("reconcile", entries), &key, |b, key| {
            b.iter(|| f.book.ledger().reconcile(black_box(key)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("history", entries), &key, |b, key| {
            b.iter(|| {
                f.book
                    .ledger()
                    .history(black_box(key), LedgerFilter::all().of_type(TransactionType::In))
                    .unwrap()
                    .count()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_movements, bench_transfers, bench_reconcile);
criterion_main!(benches);
