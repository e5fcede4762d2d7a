use criterion::{black_box, criterion_group, criterion_main, Criterion};
use managed_ptr::{make_from, Heap, HeapConfig, MoveMode, Slot, Value};

fn dereference_benchmark(c: &mut Criterion) {
    let heap = Heap::new(HeapConfig::default()).unwrap();
    let slot = Slot::new_in(&heap, "hello world").unwrap();
    let ptr = make_from(&slot).unwrap();

    c.bench_function("dereference string", |b| {
        b.iter(|| black_box(&ptr).dereference().unwrap())
    });
}

fn move_benchmark(c: &mut Criterion) {
    let heap = Heap::new(HeapConfig::default()).unwrap();
    let slot = Slot::new_in(&heap, Value::Int(0)).unwrap();
    let ptr = make_from(&slot).unwrap();
    let value = Value::Int(42);

    c.bench_function("checked move int", |b| {
        b.iter(|| {
            ptr.move_value(black_box(&value), MoveMode::Checked)
                .unwrap()
        })
    });
}

criterion_group!(benches, dereference_benchmark, move_benchmark);
criterion_main!(benches);
