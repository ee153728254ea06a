use std::fmt;

/// Element types a tensor may be stored as.
///
/// All computation happens in `F32`; `F16` only appears in parameter files
/// and is widened when the parameters are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half precision).
    F16,
}

impl DType {
    /// Size in bytes of one element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }

    /// Converts a parameter-file type id to a `DType`.
    ///
    /// - 0 => F32
    /// - 1 => F16
    pub fn from_type_id(id: u32) -> Option<DType> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            _ => None,
        }
    }

    /// Returns the parameter-file type id for this `DType`.
    pub fn type_id(&self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
    }

    #[test]
    fn test_type_ids() {
        assert_eq!(DType::from_type_id(DType::F16.type_id()), Some(DType::F16));
        assert_eq!(DType::from_type_id(0), Some(DType::F32));
        assert!(DType::from_type_id(7).is_none());
    }
}
