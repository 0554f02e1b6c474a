use crate::errors::BoostError;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One sparse cell. In a row slice `index` is a feature id, in a
/// column slice it is a row id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u32,
    pub value: f64,
}

impl Entry {
    pub fn new(index: u32, value: f64) -> Self {
        Entry { index, value }
    }
}

/// First and second order loss statistics for one instance. A negative
/// hessian is the sentinel for "exclude this instance this round".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GradPair {
    pub grad: f32,
    pub hess: f32,
}

impl GradPair {
    pub fn new(grad: f32, hess: f32) -> Self {
        GradPair { grad, hess }
    }
}

/// Side information about the instances being trained on. `root_index`
/// may be empty, in which case every instance starts at root 0.
#[derive(Debug, Clone, Default)]
pub struct BoosterInfo {
    pub num_row: usize,
    pub num_col: usize,
    pub root_index: Vec<u32>,
}

impl BoosterInfo {
    pub fn new(num_row: usize, num_col: usize) -> Self {
        BoosterInfo {
            num_row,
            num_col,
            root_index: Vec::new(),
        }
    }

    pub fn root(&self, ridx: usize) -> u32 {
        if self.root_index.is_empty() {
            0
        } else {
            self.root_index[ridx]
        }
    }
}

/// Sparse feature storage. Rows are append-only CSR; the column view is
/// CSC, built on demand from a sampled row set and sorted ascending by
/// feature value within each column.
#[derive(Debug, Default)]
pub struct FeatureStore {
    row_ptr: Vec<usize>,
    row_data: Vec<Entry>,
    num_col: usize,
    // column access, populated by build_col_access
    buffered_rowset: Vec<u32>,
    col_ptr: Vec<usize>,
    col_data: Vec<Entry>,
    // number of rows present when the column view was built
    built_rows: Option<usize>,
}

impl FeatureStore {
    pub fn new() -> Self {
        FeatureStore {
            row_ptr: vec![0],
            ..Default::default()
        }
    }

    pub fn num_row(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn num_col(&self) -> usize {
        self.num_col
    }

    /// Append one row of (feature, value) pairs, returning its row id.
    pub fn push_row(&mut self, feats: &[Entry]) -> usize {
        for e in feats {
            self.row_data.push(*e);
            self.num_col = self.num_col.max(e.index as usize + 1);
        }
        self.row_ptr.push(self.row_data.len());
        self.row_ptr.len() - 2
    }

    pub fn row(&self, ridx: usize) -> &[Entry] {
        &self.row_data[self.row_ptr[ridx]..self.row_ptr[ridx + 1]]
    }

    pub fn has_col_access(&self) -> bool {
        self.built_rows.is_some()
    }

    /// The row ids indexed by the current column view.
    pub fn buffered_rowset(&self) -> &[u32] {
        &self.buffered_rowset
    }

    /// Build (or rebuild) the column view over a sampled subset of the
    /// rows. Two passes: the first counts entries per column into a
    /// budget, the second fills them at the prefix-summed offsets.
    /// `keep_prob` of 1.0 keeps every row.
    pub fn build_col_access(&mut self, keep_prob: f64, rng: &mut StdRng) {
        self.buffered_rowset.clear();
        let mut counts = vec![0usize; self.num_col];
        for ridx in 0..self.num_row() {
            if keep_prob < 1.0 && rng.gen::<f64>() >= keep_prob {
                continue;
            }
            self.buffered_rowset.push(ridx as u32);
            for e in self.row(ridx) {
                counts[e.index as usize] += 1;
            }
        }
        // Prefix sum the budget into column offsets.
        self.col_ptr = vec![0; self.num_col + 1];
        for fid in 0..self.num_col {
            self.col_ptr[fid + 1] = self.col_ptr[fid] + counts[fid];
        }
        let total = self.col_ptr[self.num_col];
        let mut fill = self.col_ptr.clone();
        self.col_data = vec![Entry::new(0, 0.0); total];
        for ri in 0..self.buffered_rowset.len() {
            let ridx = self.buffered_rowset[ri];
            for i in self.row_ptr[ridx as usize]..self.row_ptr[ridx as usize + 1] {
                let e = self.row_data[i];
                let fid = e.index as usize;
                self.col_data[fill[fid]] = Entry::new(ridx, e.value);
                fill[fid] += 1;
            }
        }
        for fid in 0..self.num_col {
            self.col_data[self.col_ptr[fid]..self.col_ptr[fid + 1]]
                .sort_by(|a, b| a.value.total_cmp(&b.value));
        }
        self.built_rows = Some(self.num_row());
    }

    fn check_col_access(&self) -> Result<(), BoostError> {
        match self.built_rows {
            None => Err(BoostError::ColumnsNotBuilt),
            Some(built) if built != self.num_row() => Err(BoostError::StaleColumns {
                appended: self.num_row() - built,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Fraction of buffered rows that carry an entry for `fid`. The
    /// column view must have been built.
    pub fn col_density(&self, fid: usize) -> f64 {
        assert!(
            self.has_col_access(),
            "col_density called before the column view was built"
        );
        let len = self.col_ptr[fid + 1] - self.col_ptr[fid];
        if self.buffered_rowset.is_empty() {
            0.0
        } else {
            len as f64 / self.buffered_rowset.len() as f64
        }
    }

    pub fn col(&self, fid: usize) -> Result<&[Entry], BoostError> {
        self.check_col_access()?;
        Ok(&self.col_data[self.col_ptr[fid]..self.col_ptr[fid + 1]])
    }

    /// Read-only views of an arbitrary feature subset, each in its
    /// per-column sorted order.
    pub fn columns(&self, features: &[usize]) -> Result<Vec<(usize, &[Entry])>, BoostError> {
        self.check_col_access()?;
        Ok(features
            .iter()
            .map(|&fid| (fid, &self.col_data[self.col_ptr[fid]..self.col_ptr[fid + 1]]))
            .collect())
    }

    pub(crate) fn raw_parts(&self) -> (&[usize], &[Entry]) {
        (&self.row_ptr, &self.row_data)
    }

    pub(crate) fn col_parts(&self) -> (&[u32], &[usize], &[Entry]) {
        (&self.buffered_rowset, &self.col_ptr, &self.col_data)
    }

    pub(crate) fn from_raw_parts(row_ptr: Vec<usize>, row_data: Vec<Entry>) -> Self {
        let num_col = row_data
            .iter()
            .map(|e| e.index as usize + 1)
            .max()
            .unwrap_or(0);
        FeatureStore {
            row_ptr,
            row_data,
            num_col,
            ..Default::default()
        }
    }

    pub(crate) fn set_col_parts(
        &mut self,
        buffered_rowset: Vec<u32>,
        col_ptr: Vec<usize>,
        col_data: Vec<Entry>,
    ) {
        // A persisted column view may cover more columns than the rows
        // imply when the trailing features were all missing.
        self.num_col = self.num_col.max(col_ptr.len().saturating_sub(1));
        self.buffered_rowset = buffered_rowset;
        self.col_ptr = col_ptr;
        self.col_data = col_data;
        self.built_rows = Some(self.num_row());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sample_store() -> FeatureStore {
        let mut store = FeatureStore::new();
        store.push_row(&[Entry::new(0, 3.0), Entry::new(2, 1.0)]);
        store.push_row(&[Entry::new(0, 1.0)]);
        store.push_row(&[Entry::new(1, 5.0), Entry::new(2, -2.0)]);
        store.push_row(&[Entry::new(0, 2.0), Entry::new(1, 4.0)]);
        store
    }

    #[test]
    fn test_push_and_row() {
        let store = sample_store();
        assert_eq!(store.num_row(), 4);
        assert_eq!(store.num_col(), 3);
        assert_eq!(store.row(2), &[Entry::new(1, 5.0), Entry::new(2, -2.0)]);
        assert_eq!(store.row(1), &[Entry::new(0, 1.0)]);
    }

    #[test]
    fn test_col_access_unbuilt() {
        let store = sample_store();
        assert!(matches!(store.col(0), Err(BoostError::ColumnsNotBuilt)));
    }

    #[test]
    fn test_col_access_sorted() {
        let mut store = sample_store();
        let mut rng = StdRng::seed_from_u64(0);
        store.build_col_access(1.0, &mut rng);
        assert_eq!(store.buffered_rowset(), &[0, 1, 2, 3]);
        let col0 = store.col(0).unwrap();
        let values: Vec<f64> = col0.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        let rows: Vec<u32> = col0.iter().map(|e| e.index).collect();
        assert_eq!(rows, vec![1, 3, 0]);
    }

    #[test]
    fn test_col_density() {
        let mut store = sample_store();
        let mut rng = StdRng::seed_from_u64(0);
        store.build_col_access(1.0, &mut rng);
        assert_eq!(store.col_density(0), 0.75);
        assert_eq!(store.col_density(1), 0.5);
        assert_eq!(store.col_density(2), 0.5);
    }

    #[test]
    #[should_panic(expected = "col_density called before the column view was built")]
    fn test_col_density_unbuilt_panics() {
        let store = sample_store();
        store.col_density(0);
    }

    #[test]
    fn test_stale_view_after_append() {
        let mut store = sample_store();
        let mut rng = StdRng::seed_from_u64(0);
        store.build_col_access(1.0, &mut rng);
        store.push_row(&[Entry::new(0, 9.0)]);
        assert!(matches!(
            store.col(0),
            Err(BoostError::StaleColumns { appended: 1 })
        ));
        store.build_col_access(1.0, &mut rng);
        assert_eq!(store.col(0).unwrap().len(), 4);
    }

    #[test]
    fn test_build_deterministic() {
        let mut a = sample_store();
        let mut b = sample_store();
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        a.build_col_access(0.5, &mut rng_a);
        b.build_col_access(0.5, &mut rng_b);
        assert_eq!(a.buffered_rowset(), b.buffered_rowset());
        for fid in 0..a.num_col() {
            assert_eq!(a.col(fid).unwrap(), b.col(fid).unwrap());
        }
    }

    #[test]
    fn test_columns_subset() {
        let mut store = sample_store();
        let mut rng = StdRng::seed_from_u64(0);
        store.build_col_access(1.0, &mut rng);
        let cols = store.columns(&[2, 0]).unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].0, 2);
        let values: Vec<f64> = cols[0].1.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![-2.0, 1.0]);
    }
}
