use std::fmt;

use crate::layout::Layout;

/// Which kind of device a session executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// The host CPU, single-threaded reference kernels in host layout.
    Host,
    /// A data-parallel device with its own memory layout and capacity.
    Accelerator,
}

/// Immutable description of the execution target.
///
/// Chosen once when a session starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Host or accelerator.
    pub kind: TargetKind,
    /// Architecture name, informational.
    pub arch: String,
    /// Native vector register width in bits.
    pub vector_bits: usize,
    /// Maximum number of worker threads the device may use.
    pub max_threads: usize,
    /// Device memory capacity in bytes; `None` means unbounded.
    pub device_memory: Option<usize>,
}

/// Elements per parallel block on the accelerator, as a multiple of threads.
const BLOCKS_PER_THREAD: usize = 256;

impl Target {
    /// The default host target: the current CPU architecture, one thread.
    pub fn default_host() -> Self {
        Target {
            kind: TargetKind::Host,
            arch: std::env::consts::ARCH.to_string(),
            vector_bits: 256,
            max_threads: 1,
            device_memory: None,
        }
    }

    /// The default accelerator target: every available core, 4 GiB of
    /// device memory.
    pub fn default_accelerator() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Target {
            kind: TargetKind::Accelerator,
            arch: "nx-accel".to_string(),
            vector_bits: 32,
            max_threads: threads,
            device_memory: Some(4 << 30),
        }
    }

    /// Selects the accelerator when `enable` is set, the host otherwise.
    pub fn select(enable_accelerator: bool) -> Self {
        if enable_accelerator {
            Self::default_accelerator()
        } else {
            Self::default_host()
        }
    }

    /// Overrides the device memory capacity.
    pub fn with_device_memory(mut self, bytes: Option<usize>) -> Self {
        self.device_memory = bytes;
        self
    }

    /// Overrides the worker thread count (at least one).
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads.max(1);
        self
    }

    pub fn is_accelerator(&self) -> bool {
        self.kind == TargetKind::Accelerator
    }

    /// Device layout for rank-4 tensors resident on this target.
    pub fn layout(&self) -> Layout {
        match self.kind {
            TargetKind::Host => Layout::Nchw,
            TargetKind::Accelerator => Layout::Nhwc,
        }
    }

    /// Number of f32 lanes in one native vector.
    pub fn vector_lanes(&self) -> usize {
        (self.vector_bits / 32).max(1)
    }

    /// Elements each parallel task handles for an injective (element-wise)
    /// operation over `numel` elements.
    ///
    /// Small tensors run as one vector-sized block; larger ones are split
    /// into at most `max_threads * 256` blocks.
    pub fn injective_chunk(&self, numel: usize) -> usize {
        let lanes = self.vector_lanes();
        if numel <= lanes {
            return numel.max(1);
        }
        let blocks = self.max_threads * BLOCKS_PER_THREAD;
        numel.div_ceil(blocks).max(lanes)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TargetKind::Host => "host",
            TargetKind::Accelerator => "accelerator",
        };
        write!(f, "{}({}, {} threads)", kind, self.arch, self.max_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select() {
        assert_eq!(Target::select(false).kind, TargetKind::Host);
        assert!(Target::select(true).is_accelerator());
    }

    #[test]
    fn test_layouts() {
        assert_eq!(Target::default_host().layout(), Layout::Nchw);
        assert_eq!(Target::default_accelerator().layout(), Layout::Nhwc);
    }

    #[test]
    fn test_injective_chunk() {
        let t = Target::default_accelerator().with_max_threads(4);
        // Tiny tensors stay in one block.
        assert_eq!(t.injective_chunk(1), 1);
        // 4 threads * 256 blocks = 1024 blocks.
        assert_eq!(t.injective_chunk(1024 * 10), 10);
        let host = Target::default_host();
        assert_eq!(host.vector_lanes(), 8);
        assert_eq!(host.injective_chunk(4), 4);
        assert!(host.injective_chunk(1_000_000) >= 8);
    }

    #[test]
    fn test_equality_distinguishes_capacity() {
        let a = Target::default_accelerator();
        let b = a.clone().with_device_memory(Some(1024));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
