use alloy_primitives::{Address, Bytes, B256, U256};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tally_core::{ConfirmationReceipt, Entity, LedgerSimulator, OperationPlan, PlannedEffect};
use tally_runner::{GasPolicy, LedgerWriter};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SENDER: Address = Address::repeat_byte(0x11);

fn recipient(i: usize) -> Address {
    Address::from_word(B256::from(U256::from(i as u64 + 1)))
}

fn ledger(recipients: usize) -> LedgerSimulator {
    let reads = std::iter::once((Entity::Balance(SENDER), U256::from(10u64).pow(U256::from(24))))
        .chain((0..recipients).map(|i| (Entity::Balance(recipient(i)), U256::ZERO)));
    LedgerSimulator::from_reads(reads).unwrap()
}

fn plan(i: usize) -> OperationPlan {
    OperationPlan {
        index: i + 1,
        from: SENDER,
        to: recipient(i),
        sequence_number: i as u64,
        value: U256::from(100_000_000_000_000u64),
        gas_price: 100,
        gas_limit: 21_000,
        payload: Bytes::new(),
        effect: PlannedEffect::Transfer,
    }
}

fn receipt() -> ConfirmationReceipt {
    ConfirmationReceipt {
        tx_hash: B256::ZERO,
        block_number: Some(1),
        block_hash: None,
        gas_used: 20_000,
        effective_gas_price: 100,
        success: true,
    }
}

// ---------------------------------------------------------------------------
// Benchmark: transfer + keyed correction on the bare simulator
// ---------------------------------------------------------------------------

fn bench_apply_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_transfer");
    for count in [20, 200, 2_000] {
        let plans: Vec<OperationPlan> = (0..count).map(plan).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &plans, |b, plans| {
            b.iter(|| {
                let mut ledger = ledger(plans.len());
                for p in plans {
                    let correction = ledger
                        .apply_transfer(p.index, p.from, p.to, p.value, p.flat_gas_cost())
                        .unwrap();
                    ledger
                        .apply_gas_correction(correction, U256::from(20_000u64 * 100))
                        .unwrap();
                }
                black_box(ledger.snapshot())
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: confirmations funneled through the single-writer task
// ---------------------------------------------------------------------------

fn bench_ledger_writer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("ledger_writer");
    for count in [20, 200] {
        let plans: Vec<OperationPlan> = (0..count).map(plan).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &plans, |b, plans| {
            b.to_async(&rt).iter(|| async {
                let writer = LedgerWriter::spawn(ledger(plans.len()));
                let handle = writer.handle();
                let receipt = receipt();
                let mut tasks = tokio::task::JoinSet::new();
                for p in plans.iter().cloned() {
                    let handle = handle.clone();
                    let receipt = receipt.clone();
                    tasks.spawn(async move { handle.apply_confirmed(&p, &receipt, GasPolicy::FlatRate).await });
                }
                while let Some(res) = tasks.join_next().await {
                    black_box(res.unwrap().unwrap());
                }
                black_box(writer.finish().await.unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_apply_transfer, bench_ledger_writer);
criterion_main!(benches);
