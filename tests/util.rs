#![allow(dead_code)]
use dist_csr::{
    algs::communicator::{Communicator, RayonComm},
    matrix_error::MatrixError,
    sparse::{DistributedCsrMatrix, DistributedSparseGraph},
};

/// Run `f` once per rank of a fresh `n`-rank thread world; results by rank.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let world = RayonComm::world(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Graph + matrix over `n` rows split uniformly, with the pattern of every
/// element this rank will assemble.
pub fn build_matrix<C>(
    comm: C,
    n: usize,
    my_elements: &[Vec<usize>],
) -> Result<DistributedCsrMatrix<C>, MatrixError>
where
    C: Communicator + Clone,
{
    let mut graph = DistributedSparseGraph::uniform(n, comm)?;
    for ids in my_elements {
        graph.add_entries(ids)?;
    }
    graph.finalize()?;
    DistributedCsrMatrix::new(&graph)
}

/// Local and ghost slices of a replicated global vector, as `mult_and_add`
/// expects them.
pub fn split_input<C: Communicator>(a: &DistributedCsrMatrix<C>, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let [begin, end] = a.local_bounds();
    let remote = a.off_diag_global_ids().iter().map(|&g| x[g]).collect();
    (x[begin..end].to_vec(), remote)
}

/// `A * x` restricted to this rank's rows.
pub fn local_product<C: Communicator>(a: &DistributedCsrMatrix<C>, x: &[f64]) -> Vec<f64> {
    let (local, remote) = split_input(a, x);
    let mut y = vec![0.0; a.local_row_count()];
    a.mult_and_add(&mut y, &local, &remote).unwrap();
    y
}
