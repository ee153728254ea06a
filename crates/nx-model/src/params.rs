//! Parameter container: a flat, memory-mapped file of named tensors.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "NXPR" | u32 version | u64 count
//! count x { u64 name_len | name | u32 rank | rank x u64 dim | u32 dtype | u64 offset }
//! padding to PARAMS_ALIGNMENT
//! data section (each tensor at its offset, PARAMS_ALIGNMENT-aligned)
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use memmap2::Mmap;

use nx_tensor::{DType, Shape, Tensor};

use crate::error::{LoadError, Result};

/// The four-byte magic number identifying a parameter container: ASCII "NXPR".
pub const PARAMS_MAGIC: [u8; 4] = *b"NXPR";

/// Current container version.
pub const PARAMS_VERSION: u32 = 1;

/// Alignment (in bytes) of the data section and of every tensor in it.
pub const PARAMS_ALIGNMENT: usize = 32;

/// One entry of the container's tensor table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub name: String,
    pub dims: Vec<usize>,
    pub dtype: DType,
    /// Offset relative to the start of the data section.
    pub offset: u64,
}

impl ParamEntry {
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn data_size(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// `data_size` computed without overflow; `None` if the dims can't be
    /// addressed. Entries returned by [`ParamsFile::open`] always fit.
    pub fn checked_data_size(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))?
            .checked_mul(self.dtype.size_in_bytes())
    }
}

/// A parsed parameter container backed by a memory-mapped region.
pub struct ParamsFile {
    pub version: u32,
    pub entries: Vec<ParamEntry>,
    mmap: Mmap,
    data_offset: usize,
}

impl ParamsFile {
    /// Open and parse a container from disk.
    ///
    /// The header and tensor table are read with buffered I/O; the file is
    /// then memory-mapped so tensor data can be sliced without further reads.
    pub fn open(path: &Path) -> Result<ParamsFile> {
        if !path.is_file() {
            return Err(LoadError::MissingFile(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(&file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != PARAMS_MAGIC {
            return Err(LoadError::InvalidMagic(magic));
        }
        let version = read_u32(&mut reader)?;
        if version != PARAMS_VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }
        let count = read_u64(&mut reader)?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let name = read_string(&mut reader, file_len)?;
            let rank = read_u32(&mut reader)?;
            if u64::from(rank) * 8 > file_len {
                return Err(LoadError::Corrupt(format!(
                    "tensor '{}' claims rank {} in a {}-byte file",
                    name, rank, file_len
                )));
            }
            let mut dims = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                dims.push(read_u64(&mut reader)? as usize);
            }
            let type_id = read_u32(&mut reader)?;
            let dtype = DType::from_type_id(type_id).ok_or(LoadError::UnsupportedDType(type_id))?;
            let offset = read_u64(&mut reader)?;
            entries.push(ParamEntry {
                name,
                dims,
                dtype,
                offset,
            });
        }

        let table_end = reader.stream_position()? as usize;
        let data_offset = align_up(table_end);

        let mmap = unsafe { Mmap::map(&file)? };

        for entry in &entries {
            let end = entry
                .checked_data_size()
                .zip(usize::try_from(entry.offset).ok())
                .and_then(|(size, offset)| data_offset.checked_add(offset)?.checked_add(size))
                .ok_or_else(|| {
                    LoadError::Corrupt(format!(
                        "tensor '{}' with dims {:?} at offset {} is not addressable",
                        entry.name, entry.dims, entry.offset
                    ))
                })?;
            if end > mmap.len() {
                return Err(LoadError::Corrupt(format!(
                    "tensor '{}' ends at byte {} but {} has {} bytes",
                    entry.name,
                    end,
                    path.display(),
                    mmap.len()
                )));
            }
        }

        tracing::debug!(path = %path.display(), tensors = entries.len(), "opened parameter container");
        Ok(ParamsFile {
            version,
            entries,
            mmap,
            data_offset,
        })
    }

    /// Tensor names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<&ParamEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Raw bytes of a tensor within the mapped file.
    pub fn tensor_data(&self, entry: &ParamEntry) -> &[u8] {
        let start = self.data_offset + entry.offset as usize;
        &self.mmap[start..start + entry.data_size()]
    }

    /// Load a tensor by name, widening half-precision data to f32.
    pub fn get_f32(&self, name: &str) -> Result<Tensor> {
        let entry = self
            .entry(name)
            .ok_or_else(|| LoadError::TensorNotFound(name.to_string()))?;
        self.decode(entry)
    }

    /// Decodes one entry's bytes into an f32 tensor.
    fn decode(&self, entry: &ParamEntry) -> Result<Tensor> {
        let raw = self.tensor_data(entry);
        let data = match entry.dtype {
            DType::F32 => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            DType::F16 => raw
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
        };
        Ok(Tensor::from_vec(data, Shape::from_slice(&entry.dims))?)
    }
}

/// Writes parameter containers.
///
/// Tensors are stored as `dtype`; f16 output rounds to the nearest half.
#[derive(Debug, Clone, Copy)]
pub struct ParamsWriter {
    pub dtype: DType,
}

impl Default for ParamsWriter {
    fn default() -> Self {
        ParamsWriter { dtype: DType::F32 }
    }
}

impl ParamsWriter {
    pub fn new(dtype: DType) -> Self {
        ParamsWriter { dtype }
    }

    /// Writes every tensor into one container at `path`.
    pub fn write_combined<'a, I>(&self, path: &Path, tensors: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Tensor)>,
    {
        let tensors: Vec<_> = tensors.into_iter().collect();
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out, &tensors)?;
        out.flush()?;
        tracing::debug!(path = %path.display(), tensors = tensors.len(), "wrote combined parameters");
        Ok(())
    }

    /// Writes one single-tensor container per tensor, at `dir/<name>`.
    pub fn write_separate<'a, I>(&self, dir: &Path, tensors: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Tensor)>,
    {
        for (name, tensor) in tensors {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = BufWriter::new(File::create(&path)?);
            self.write_to(&mut out, &[(name, tensor)])?;
            out.flush()?;
        }
        Ok(())
    }

    /// Serializes `tensors` into `out`.
    pub fn write_to(&self, out: &mut impl Write, tensors: &[(&str, &Tensor)]) -> Result<()> {
        let elem = self.dtype.size_in_bytes();

        let mut header = Vec::new();
        header.extend_from_slice(&PARAMS_MAGIC);
        header.extend_from_slice(&PARAMS_VERSION.to_le_bytes());
        header.extend_from_slice(&(tensors.len() as u64).to_le_bytes());

        let mut offset = 0usize;
        for (name, tensor) in tensors {
            header.extend_from_slice(&(name.len() as u64).to_le_bytes());
            header.extend_from_slice(name.as_bytes());
            let dims = tensor.shape().dims();
            header.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for &d in dims {
                header.extend_from_slice(&(d as u64).to_le_bytes());
            }
            header.extend_from_slice(&self.dtype.type_id().to_le_bytes());
            header.extend_from_slice(&(offset as u64).to_le_bytes());
            offset = align_up(offset + tensor.numel() * elem);
        }
        header.resize(align_up(header.len()), 0);
        out.write_all(&header)?;

        for (_, tensor) in tensors {
            let mut bytes = Vec::with_capacity(tensor.numel() * elem);
            match self.dtype {
                DType::F32 => {
                    for v in tensor.data() {
                        bytes.extend_from_slice(&v.to_le_bytes());
                    }
                }
                DType::F16 => {
                    for v in tensor.data() {
                        bytes.extend_from_slice(&half::f16::from_f32(*v).to_le_bytes());
                    }
                }
            }
            bytes.resize(align_up(bytes.len()), 0);
            out.write_all(&bytes)?;
        }
        Ok(())
    }
}

fn align_up(pos: usize) -> usize {
    (pos + PARAMS_ALIGNMENT - 1) & !(PARAMS_ALIGNMENT - 1)
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads a length-prefixed string; lengths beyond `limit` bytes are corrupt.
fn read_string(reader: &mut impl Read, limit: u64) -> Result<String> {
    let len = read_u64(reader)?;
    if len > limit {
        return Err(LoadError::Corrupt(format!(
            "tensor name of {} bytes in a {}-byte file",
            len, limit
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| LoadError::Corrupt(format!("invalid UTF-8 in tensor name: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn sample() -> Vec<(String, Tensor)> {
        vec![
            ("conv1_weights".to_string(), Tensor::from_vec(vec![0.5, -1.25, 2.0, 3.5], [1, 1, 2, 2]).unwrap()),
            ("fc_0.b_0".to_string(), Tensor::from_vec(vec![1.0, 2.0, 3.0], [3]).unwrap()),
        ]
    }

    #[test]
    fn test_combined_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        let tensors = sample();
        ParamsWriter::default()
            .write_combined(&path, tensors.iter().map(|(n, t)| (n.as_str(), t)))
            .unwrap();

        let file = ParamsFile::open(&path).unwrap();
        assert_eq!(file.len(), 2);
        assert_eq!(file.names().collect::<Vec<_>>(), vec!["conv1_weights", "fc_0.b_0"]);
        assert_eq!(file.get_f32("fc_0.b_0").unwrap(), tensors[1].1);
        assert_eq!(file.entries[1].offset as usize % PARAMS_ALIGNMENT, 0);
        assert!(matches!(file.get_f32("missing"), Err(LoadError::TensorNotFound(_))));
    }

    #[test]
    fn test_separate_containers() {
        let dir = tempdir().unwrap();
        let tensors = sample();
        ParamsWriter::default()
            .write_separate(dir.path(), tensors.iter().map(|(n, t)| (n.as_str(), t)))
            .unwrap();
        for (name, tensor) in &tensors {
            let file = ParamsFile::open(&dir.path().join(name)).unwrap();
            assert_eq!(file.len(), 1);
            assert_eq!(&file.get_f32(name).unwrap(), tensor);
        }
    }

    #[test]
    fn test_f16_storage_widens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        let t = Tensor::from_vec(vec![0.1, -3.0, 1024.5], [3]).unwrap();
        ParamsWriter::new(DType::F16).write_combined(&path, [("w", &t)]).unwrap();
        let file = ParamsFile::open(&path).unwrap();
        assert_eq!(file.entries[0].dtype, DType::F16);
        let back = file.get_f32("w").unwrap();
        for (a, b) in back.data().iter().zip(t.data()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-3 * b.abs().max(1.0));
        }
    }

    #[test]
    fn test_bad_magic_and_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        std::fs::write(&path, b"GGUF\x01\0\0\0").unwrap();
        assert!(matches!(ParamsFile::open(&path), Err(LoadError::InvalidMagic(_))));
        assert!(matches!(
            ParamsFile::open(&dir.path().join("nope")),
            Err(LoadError::MissingFile(_))
        ));
    }

    #[test]
    fn test_truncated_data_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        let t = Tensor::zeros([64]);
        ParamsWriter::default().write_combined(&path, [("w", &t)]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 16]).unwrap();
        assert!(matches!(ParamsFile::open(&path), Err(LoadError::Corrupt(_))));
    }

    /// A one-entry table with the given name length, rank and dims.
    fn raw_table(name_len: u64, rank: u32, dims: &[u64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PARAMS_MAGIC);
        bytes.extend_from_slice(&PARAMS_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&name_len.to_le_bytes());
        bytes.push(b'w');
        bytes.extend_from_slice(&rank.to_le_bytes());
        for d in dims {
            bytes.extend_from_slice(&d.to_le_bytes());
        }
        bytes.extend_from_slice(&DType::F32.type_id().to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.resize(align_up(bytes.len()) + 64, 0);
        bytes
    }

    #[test]
    fn test_overflowing_dims_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        std::fs::write(&path, raw_table(1, 2, &[u64::MAX / 2, 4])).unwrap();
        assert!(matches!(ParamsFile::open(&path), Err(LoadError::Corrupt(_))));

        std::fs::write(&path, raw_table(1, 1, &[u64::MAX / 4])).unwrap();
        assert!(matches!(ParamsFile::open(&path), Err(LoadError::Corrupt(_))));
    }

    #[test]
    fn test_oversized_lengths_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        std::fs::write(&path, raw_table(u64::MAX, 1, &[4])).unwrap();
        assert!(matches!(ParamsFile::open(&path), Err(LoadError::Corrupt(_))));

        std::fs::write(&path, raw_table(1, u32::MAX, &[4])).unwrap();
        assert!(matches!(ParamsFile::open(&path), Err(LoadError::Corrupt(_))));
    }

    #[test]
    fn test_raw_table_helper_is_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        std::fs::write(&path, raw_table(1, 2, &[4, 4])).unwrap();
        let file = ParamsFile::open(&path).unwrap();
        assert_eq!(file.get_f32("w").unwrap(), Tensor::zeros([4, 4]));
    }
}
