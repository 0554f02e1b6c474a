use crate::data::{BoosterInfo, Entry, FeatureStore};
use crate::errors::BoostError;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Leading tag of the binary feature store format. A stream that does
/// not open with it is rejected before anything is allocated.
const STORE_MAGIC: u32 = 0xffab_4c02;

/// A loaded training set: the sparse rows plus labels and shape info.
#[derive(Debug, Default)]
pub struct Dataset {
    pub store: FeatureStore,
    pub labels: Vec<f64>,
    pub info: BoosterInfo,
}

impl Dataset {
    fn new(store: FeatureStore, labels: Vec<f64>) -> Self {
        let info = BoosterInfo::new(store.num_row(), store.num_col());
        Dataset {
            store,
            labels,
            info,
        }
    }

    pub fn save_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), BoostError> {
        let mut w = BufWriter::new(File::create(path)?);
        save_store(&self.store, &mut w)?;
        write_u64(&mut w, self.labels.len() as u64)?;
        for v in &self.labels {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self, BoostError> {
        let mut r = BufReader::new(File::open(path)?);
        let store = load_store(&mut r)?;
        let n = read_u64(&mut r)? as usize;
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            labels.push(read_f64(&mut r)?);
        }
        if labels.len() != store.num_row() {
            return Err(BoostError::BinaryFormat(format!(
                "label count {} does not match {} rows",
                labels.len(),
                store.num_row()
            )));
        }
        Ok(Dataset::new(store, labels))
    }
}

/// Read a LibSVM text file: one instance per line, a label followed by
/// `index:value` pairs. Any malformed token fails the whole load.
pub fn read_libsvm<P: AsRef<Path>>(path: P) -> Result<Dataset, BoostError> {
    read_libsvm_from(BufReader::new(File::open(path)?))
}

pub fn read_libsvm_from<R: BufRead>(reader: R) -> Result<Dataset, BoostError> {
    let mut store = FeatureStore::new();
    let mut labels = Vec::new();
    let mut row = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        let Some(label) = tokens.next() else {
            continue;
        };
        let label: f64 = label.parse().map_err(|_| {
            BoostError::Parse(format!("line {}: bad label {:?}", lineno + 1, label))
        })?;
        row.clear();
        for tok in tokens {
            let (index, value) = tok.split_once(':').ok_or_else(|| {
                BoostError::Parse(format!("line {}: bad feature {:?}", lineno + 1, tok))
            })?;
            let index: u32 = index.parse().map_err(|_| {
                BoostError::Parse(format!("line {}: bad feature index {:?}", lineno + 1, index))
            })?;
            let value: f64 = value.parse().map_err(|_| {
                BoostError::Parse(format!("line {}: bad feature value {:?}", lineno + 1, value))
            })?;
            row.push(Entry::new(index, value));
        }
        store.push_row(&row);
        labels.push(label);
    }
    Ok(Dataset::new(store, labels))
}

/// Persist a feature store: magic tag, length prefixed row pointers and
/// entries, then the buffered row set followed by the column view. An
/// empty row set means no column block follows. Everything is little
/// endian.
pub fn save_store<W: Write>(store: &FeatureStore, w: &mut W) -> Result<(), BoostError> {
    w.write_all(&STORE_MAGIC.to_le_bytes())?;
    let (row_ptr, row_data) = store.raw_parts();
    write_u64(w, row_ptr.len() as u64)?;
    for p in row_ptr {
        write_u64(w, *p as u64)?;
    }
    write_u64(w, row_data.len() as u64)?;
    for e in row_data {
        write_entry(w, e)?;
    }
    let (rowset, col_ptr, col_data) = store.col_parts();
    write_u64(w, rowset.len() as u64)?;
    if !rowset.is_empty() {
        for r in rowset {
            w.write_all(&r.to_le_bytes())?;
        }
        write_u64(w, col_ptr.len() as u64)?;
        for p in col_ptr {
            write_u64(w, *p as u64)?;
        }
        write_u64(w, col_data.len() as u64)?;
        for e in col_data {
            write_entry(w, e)?;
        }
    }
    Ok(())
}

pub fn load_store<R: Read>(r: &mut R) -> Result<FeatureStore, BoostError> {
    let magic = read_u32(r)?;
    if magic != STORE_MAGIC {
        return Err(BoostError::BinaryFormat(format!(
            "bad magic {:#010x}",
            magic
        )));
    }
    let n = read_u64(r)? as usize;
    if n == 0 {
        return Err(BoostError::BinaryFormat("empty row pointer".to_string()));
    }
    let mut row_ptr = Vec::with_capacity(n);
    for _ in 0..n {
        row_ptr.push(read_u64(r)? as usize);
    }
    let n = read_u64(r)? as usize;
    let mut row_data = Vec::with_capacity(n);
    for _ in 0..n {
        row_data.push(read_entry(r)?);
    }
    check_pointer_block(&row_ptr, row_data.len(), "row")?;
    let mut store = FeatureStore::from_raw_parts(row_ptr, row_data);
    let nrowset = read_u64(r)? as usize;
    if nrowset != 0 {
        let mut rowset = Vec::with_capacity(nrowset);
        for _ in 0..nrowset {
            rowset.push(read_u32(r)?);
        }
        if rowset.iter().any(|&ridx| ridx as usize >= store.num_row()) {
            return Err(BoostError::BinaryFormat(
                "buffered row set references a row beyond the store".to_string(),
            ));
        }
        let n = read_u64(r)? as usize;
        let mut col_ptr = Vec::with_capacity(n);
        for _ in 0..n {
            col_ptr.push(read_u64(r)? as usize);
        }
        let n = read_u64(r)? as usize;
        let mut col_data = Vec::with_capacity(n);
        for _ in 0..n {
            col_data.push(read_entry(r)?);
        }
        check_pointer_block(&col_ptr, col_data.len(), "column")?;
        store.set_col_parts(rowset, col_ptr, col_data);
    }
    Ok(store)
}

/// A pointer array must open at 0, close at the entry count, and never
/// step backwards; anything else would index outside the entry block.
fn check_pointer_block(ptr: &[usize], len: usize, what: &str) -> Result<(), BoostError> {
    let covers = ptr.first() == Some(&0) && ptr.last() == Some(&len);
    if !covers || ptr.windows(2).any(|w| w[0] > w[1]) {
        return Err(BoostError::BinaryFormat(format!(
            "{what} pointers do not cover the entry block"
        )));
    }
    Ok(())
}

fn write_entry<W: Write>(w: &mut W, e: &Entry) -> Result<(), BoostError> {
    w.write_all(&e.index.to_le_bytes())?;
    w.write_all(&e.value.to_le_bytes())?;
    Ok(())
}

fn read_entry<R: Read>(r: &mut R) -> Result<Entry, BoostError> {
    let index = read_u32(r)?;
    let value = read_f64(r)?;
    Ok(Entry::new(index, value))
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), BoostError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

// Short reads are a format error, not an io error.
fn read_bytes<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), BoostError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            BoostError::BinaryFormat("unexpected end of stream".to_string())
        } else {
            BoostError::Io(e)
        }
    })
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, BoostError> {
    let mut buf = [0u8; 4];
    read_bytes(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, BoostError> {
    let mut buf = [0u8; 8];
    read_bytes(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, BoostError> {
    let mut buf = [0u8; 8];
    read_bytes(r, &mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    const SAMPLE: &str = "1 0:1.5 3:-2.0\n0 1:0.5\n1\n";

    #[test]
    fn test_read_libsvm() {
        let ds = read_libsvm_from(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(ds.labels, vec![1.0, 0.0, 1.0]);
        assert_eq!(ds.store.num_row(), 3);
        assert_eq!(ds.store.num_col(), 4);
        assert_eq!(ds.store.row(0).len(), 2);
        assert_eq!(ds.store.row(0)[1], Entry::new(3, -2.0));
        assert!(ds.store.row(2).is_empty());
        assert_eq!(ds.info.num_row, 3);
    }

    #[test]
    fn test_read_libsvm_malformed_token_fails_load() {
        for bad in ["1 0:1.5 oops\n", "x 0:1.5\n", "1 a:2\n", "1 0:b\n"] {
            assert!(matches!(
                read_libsvm_from(Cursor::new(bad)),
                Err(BoostError::Parse(_))
            ));
        }
    }

    #[test]
    fn test_store_binary_round_trip() {
        let mut ds = read_libsvm_from(Cursor::new(SAMPLE)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        ds.store.build_col_access(1.0, &mut rng);
        let mut buf = Vec::new();
        save_store(&ds.store, &mut buf).unwrap();
        let back = load_store(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.num_row(), 3);
        assert_eq!(back.num_col(), 4);
        assert_eq!(back.row(0), ds.store.row(0));
        assert!(back.has_col_access());
        assert_eq!(back.col(0).unwrap(), ds.store.col(0).unwrap());
        assert_eq!(back.buffered_rowset(), ds.store.buffered_rowset());
    }

    #[test]
    fn test_store_round_trip_without_columns() {
        let ds = read_libsvm_from(Cursor::new(SAMPLE)).unwrap();
        let mut buf = Vec::new();
        save_store(&ds.store, &mut buf).unwrap();
        let back = load_store(&mut Cursor::new(&buf)).unwrap();
        assert!(!back.has_col_access());
        assert_eq!(back.row(1), ds.store.row(1));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        let ds = read_libsvm_from(Cursor::new(SAMPLE)).unwrap();
        let mut buf = Vec::new();
        save_store(&ds.store, &mut buf).unwrap();

        let mut corrupt = buf.clone();
        corrupt[0] ^= 0xff;
        assert!(matches!(
            load_store(&mut Cursor::new(&corrupt)),
            Err(BoostError::BinaryFormat(_))
        ));

        let truncated = &buf[..buf.len() - 3];
        assert!(matches!(
            load_store(&mut Cursor::new(truncated)),
            Err(BoostError::BinaryFormat(_))
        ));
    }

    #[test]
    fn test_nonmonotonic_row_pointers_rejected() {
        let ds = read_libsvm_from(Cursor::new(SAMPLE)).unwrap();
        let mut buf = Vec::new();
        save_store(&ds.store, &mut buf).unwrap();
        // row_ptr is [0, 2, 3, 3] starting 12 bytes in; rewrite the
        // interior to [0, 3, 1, 3] so it still covers the entry block
        // but steps backwards.
        buf[20..28].copy_from_slice(&3u64.to_le_bytes());
        buf[28..36].copy_from_slice(&1u64.to_le_bytes());
        assert!(matches!(
            load_store(&mut Cursor::new(&buf)),
            Err(BoostError::BinaryFormat(_))
        ));
    }

    #[test]
    fn test_rowset_beyond_store_rejected() {
        // One-row store whose buffered row set names row 5.
        let mut buf = Vec::new();
        buf.extend_from_slice(&STORE_MAGIC.to_le_bytes());
        write_u64(&mut buf, 2).unwrap();
        write_u64(&mut buf, 0).unwrap();
        write_u64(&mut buf, 1).unwrap();
        write_u64(&mut buf, 1).unwrap();
        write_entry(&mut buf, &Entry::new(0, 1.0)).unwrap();
        write_u64(&mut buf, 1).unwrap();
        buf.extend_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            load_store(&mut Cursor::new(&buf)),
            Err(BoostError::BinaryFormat(_))
        ));
    }

    #[test]
    fn test_dataset_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.bin");
        let ds = read_libsvm_from(Cursor::new(SAMPLE)).unwrap();
        ds.save_binary(&path).unwrap();
        let back = Dataset::load_binary(&path).unwrap();
        assert_eq!(back.labels, ds.labels);
        assert_eq!(back.store.num_row(), ds.store.num_row());
        assert_eq!(back.store.row(0), ds.store.row(0));
    }
}
