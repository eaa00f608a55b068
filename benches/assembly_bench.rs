use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rayon::prelude::*;

use dist_csr::algs::communicator::NoComm;
use dist_csr::sparse::{DistributedCsrMatrix, DistributedSparseGraph};

/// Q1 quads on an `n x n` node grid.
fn grid_elements(n: usize) -> Vec<[usize; 4]> {
    let mut els = Vec::with_capacity((n - 1) * (n - 1));
    for y in 0..n - 1 {
        for x in 0..n - 1 {
            let a = y * n + x;
            els.push([a, a + 1, a + n, a + n + 1]);
        }
    }
    els
}

fn build(n: usize, els: &[[usize; 4]]) -> DistributedCsrMatrix<NoComm> {
    let mut g = DistributedSparseGraph::uniform(n * n, NoComm).expect("graph");
    els.par_iter()
        .for_each(|e| g.add_entries(e).expect("pattern entry"));
    g.finalize().expect("finalize");
    DistributedCsrMatrix::new(&g).expect("matrix")
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    let k = [
        [4.0, -1.0, -1.0, -2.0],
        [-1.0, 4.0, -2.0, -1.0],
        [-1.0, -2.0, 4.0, -1.0],
        [-2.0, -1.0, -1.0, 4.0],
    ];

    for &n in &[64usize, 256] {
        let els = grid_elements(n);
        let mut a = build(n, &els);

        group.bench_with_input(BenchmarkId::new("serial", n), &n, |b, _| {
            b.iter(|| {
                a.set_value(0.0);
                a.begin_assemble().expect("begin");
                for e in &els {
                    a.assemble(&k, e);
                }
                a.finalize_assemble().expect("finalize");
            })
        });

        group.bench_with_input(BenchmarkId::new("parallel", n), &n, |b, _| {
            b.iter(|| {
                a.set_value(0.0);
                a.begin_assemble().expect("begin");
                els.par_iter().for_each(|e| a.assemble(&k, e));
                a.finalize_assemble().expect("finalize");
            })
        });

        let x = vec![1.0; n * n];
        let mut y = vec![0.0; n * n];
        group.bench_with_input(BenchmarkId::new("mult_and_add", n), &n, |b, _| {
            b.iter(|| {
                a.mult_and_add(black_box(&mut y), black_box(&x), &[])
                    .expect("product");
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assembly);
criterion_main!(benches);
