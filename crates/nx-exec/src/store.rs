//! The tensor store: device buffers, uploaded parameters and named slots.

use std::collections::BTreeMap;

use nx_tensor::{Layout, Shape, Tensor};

use crate::error::{Result, RuntimeError};

/// Where a value lives on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    Buffer(usize),
    Param(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// A graph input the caller fills with `load_data`.
    Input,
    /// A value the caller reads back after `run`.
    Output,
}

/// A named, shaped view onto device storage.
#[derive(Debug, Clone)]
pub struct Slot {
    pub kind: SlotKind,
    pub shape: Shape,
    pub loc: Loc,
    pub initialized: bool,
}

/// Owns every device allocation of a loaded model.
#[derive(Debug)]
pub struct TensorStore {
    layout: Layout,
    buffers: Vec<Vec<f32>>,
    params: Vec<Vec<f32>>,
    slots: BTreeMap<String, Slot>,
}

impl TensorStore {
    /// Allocates zeroed buffers of `buffer_sizes` elements and takes
    /// ownership of the already device-ordered parameters.
    pub fn new(layout: Layout, buffer_sizes: &[usize], params: Vec<Vec<f32>>) -> Self {
        TensorStore {
            layout,
            buffers: buffer_sizes.iter().map(|&n| vec![0.0f32; n]).collect(),
            params,
            slots: BTreeMap::new(),
        }
    }

    pub fn add_slot(&mut self, name: &str, kind: SlotKind, shape: Shape, loc: Loc) {
        let initialized = matches!(loc, Loc::Param(_));
        self.slots.insert(
            name.to_string(),
            Slot {
                kind,
                shape,
                loc,
                initialized,
            },
        );
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    /// First input slot that has not received data.
    pub fn uninitialized_input(&self) -> Option<&str> {
        self.slots
            .iter()
            .find(|(_, s)| s.kind == SlotKind::Input && !s.initialized)
            .map(|(n, _)| n.as_str())
    }

    /// Copies host-order `data` into the input slot `name`, converting to the
    /// device layout.
    pub fn write_host(&mut self, name: &str, data: &[f32]) -> Result<()> {
        let slot = self
            .slots
            .get_mut(name)
            .filter(|s| s.kind == SlotKind::Input)
            .ok_or_else(|| RuntimeError::UnknownTensor(name.to_string()))?;
        let expected = slot.shape.numel();
        if data.len() != expected {
            return Err(RuntimeError::SizeMismatch {
                name: name.to_string(),
                expected,
                got: data.len(),
            });
        }
        let Loc::Buffer(id) = slot.loc else {
            return Err(RuntimeError::Device(format!("input '{}' is not backed by a buffer", name)));
        };
        let device = self.layout.host_to_device(data, slot.shape.dims());
        self.buffers[id][..expected].copy_from_slice(&device);
        slot.initialized = true;
        Ok(())
    }

    /// Reads slot `name` back into a host-order tensor.
    pub fn read_host(&self, name: &str) -> Result<Tensor> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownTensor(name.to_string()))?;
        if !slot.initialized {
            return Err(RuntimeError::UninitializedSlot(name.to_string()));
        }
        let data = self.data(slot.loc, slot.shape.numel());
        let host = self.layout.device_to_host(data, slot.shape.dims());
        Tensor::from_vec(host, slot.shape.clone()).map_err(|e| RuntimeError::Device(e.to_string()))
    }

    /// Marks every output slot as holding a result.
    pub fn mark_outputs_written(&mut self) {
        for slot in self.slots.values_mut() {
            if slot.kind == SlotKind::Output {
                slot.initialized = true;
            }
        }
    }

    /// The first `numel` elements at `loc`.
    pub fn data(&self, loc: Loc, numel: usize) -> &[f32] {
        match loc {
            Loc::Buffer(id) => &self.buffers[id][..numel],
            Loc::Param(id) => &self.params[id][..numel],
        }
    }

    /// Moves buffer `id` out so it can be written while others are read.
    pub fn take_buffer(&mut self, id: usize) -> Vec<f32> {
        std::mem::take(&mut self.buffers[id])
    }

    pub fn restore_buffer(&mut self, id: usize, buffer: Vec<f32>) {
        self.buffers[id] = buffer;
    }

    /// Device bytes held by buffers and parameters.
    pub fn bytes(&self) -> usize {
        let elems: usize = self.buffers.iter().chain(&self.params).map(Vec::len).sum();
        elems * std::mem::size_of::<f32>()
    }
}
