//! Dense element contributions handed to `assemble`.

/// A small dense matrix addressed by local `(i, j)`.
pub trait ElementMatrix {
    fn size1(&self) -> usize;
    fn size2(&self) -> usize;
    fn at(&self, i: usize, j: usize) -> f64;
}

/// Row-major dense element matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseElement {
    n: usize,
    data: Vec<f64>,
}

impl DenseElement {
    /// `n × n` zero matrix.
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    /// Wrap row-major `data` of a square matrix of side `n`.
    ///
    /// Returns `None` if `data.len() != n * n`.
    pub fn from_row_major(n: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == n * n).then_some(Self { n, data })
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.data[i * self.n + j] = v;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl ElementMatrix for DenseElement {
    fn size1(&self) -> usize {
        self.n
    }

    fn size2(&self) -> usize {
        self.n
    }

    #[inline]
    fn at(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }
}

impl<const N: usize> ElementMatrix for [[f64; N]; N] {
    fn size1(&self) -> usize {
        N
    }

    fn size2(&self) -> usize {
        N
    }

    #[inline]
    fn at(&self, i: usize, j: usize) -> f64 {
        self[i][j]
    }
}
