use std::path::Path;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nx_model::ParamsFile;
use nx_tensor::{Shape, Tensor};

/// The seed to use: `seed` if given, otherwise a fresh random one.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(rand::random)
}

/// A tensor of `shape` filled with values drawn uniformly from `[0, 1)`.
pub fn random_input(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tensor = Tensor::zeros(Shape::from_slice(shape));
    for v in tensor.data_mut() {
        *v = rng.gen::<f32>();
    }
    tensor
}

/// Reads tensor `name` from a parameter container, falling back to the
/// container's only tensor.
pub fn read_tensor(path: &Path, name: &str) -> anyhow::Result<Tensor> {
    let file = ParamsFile::open(path).with_context(|| format!("cannot open '{}'", path.display()))?;
    if file.entry(name).is_none() && file.len() == 1 {
        let only = file.entries[0].name.clone();
        tracing::warn!(wanted = name, found = %only, "using the only tensor in the file");
        return Ok(file.get_f32(&only)?);
    }
    file.get_f32(name)
        .with_context(|| format!("'{}' holds no tensor named '{}'", path.display(), name))
}
