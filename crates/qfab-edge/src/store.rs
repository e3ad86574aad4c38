//! Weight/parameter store with a single registered read port.
//!
//! A block issues at most one `(tensor_id, offset)` request per tick; the byte
//! and the tensor's scale appear on [`WeightStore::data`] after the next
//! clock edge. Unknown ids read as `(0, 0.0)` and offsets past the end of a
//! valid tensor read as `(0, scale)`.

use qfab_core::{ModelConfig, Port, QfabError, Result};

use crate::format::Container;
use crate::tensor_map::{Layout, TensorMap};

/// The registered output of the read port.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadData {
    pub byte: i8,
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub struct WeightStore {
    map: TensorMap,
    /// Private memories, indexed by id. Empty for shared-norm tensors.
    dedicated: Vec<Vec<i8>>,
    shared: Vec<i8>,
    scales: Vec<f32>,
    request: Option<(u8, usize)>,
    contended: bool,
    out: ReadData,
    reads: u64,
}

impl WeightStore {
    /// All tensors zero, all scales zero.
    pub fn zeroed(cfg: &ModelConfig) -> Self {
        let map = TensorMap::new(cfg);
        let dedicated = map
            .iter()
            .map(|t| match t.layout {
                Layout::Dedicated => vec![0i8; t.numel()],
                Layout::SharedNorm { .. } => Vec::new(),
            })
            .collect();
        let shared = vec![0i8; map.shared_len()];
        let scales = vec![0.0; map.len()];
        Self {
            map,
            dedicated,
            shared,
            scales,
            request: None,
            contended: false,
            out: ReadData::default(),
            reads: 0,
        }
    }

    /// Populate from a container whose tensors follow the canonical id order.
    pub fn from_container(cfg: &ModelConfig, container: &Container) -> Result<Self> {
        let mut store = Self::zeroed(cfg);
        if container.tensors.len() != store.map.len() {
            return Err(QfabError::InvalidHeader(format!(
                "container has {} tensors, model expects {}",
                container.tensors.len(),
                store.map.len()
            )));
        }
        for (id, raw) in container.tensors.iter().enumerate() {
            let expected = store.map.get(id as u8).map(|t| t.name.as_str()).unwrap_or_default();
            if raw.name != expected {
                return Err(QfabError::InvalidHeader(format!(
                    "tensor {} is '{}', expected '{}'",
                    id, raw.name, expected
                )));
            }
            store.load_tensor(id as u8, &raw.data, raw.scale)?;
        }
        tracing::info!("weight store populated: {} tensors", store.map.len());
        Ok(store)
    }

    /// Initialize one tensor's contents and scale.
    pub fn load_tensor(&mut self, id: u8, data: &[i8], scale: f32) -> Result<()> {
        let info = self
            .map
            .get(id)
            .ok_or_else(|| QfabError::InvalidHeader(format!("no tensor with id {}", id)))?;
        if data.len() != info.numel() {
            return Err(QfabError::TensorSize {
                id: id as usize,
                name: info.name.clone(),
                expected: info.numel(),
                got: data.len(),
            });
        }
        match info.layout {
            Layout::Dedicated => self.dedicated[id as usize].copy_from_slice(data),
            Layout::SharedNorm { offset } => self.shared[offset..offset + data.len()].copy_from_slice(data),
        }
        self.scales[id as usize] = scale;
        Ok(())
    }

    pub fn map(&self) -> &TensorMap {
        &self.map
    }

    /// Combinational read, bypassing the port.
    pub fn peek(&self, id: u8, offset: usize) -> ReadData {
        let Some(info) = self.map.get(id) else {
            return ReadData::default();
        };
        let scale = self.scales[id as usize];
        let byte = match info.layout {
            Layout::Dedicated => self.dedicated[id as usize].get(offset).copied(),
            Layout::SharedNorm { offset: base } => {
                (offset < info.numel()).then(|| self.shared[base + offset])
            }
        };
        ReadData { byte: byte.unwrap_or(0), scale }
    }

    pub fn scale(&self, id: u8) -> f32 {
        self.scales.get(id as usize).copied().unwrap_or(0.0)
    }

    /// Present a request on the read port for this tick.
    ///
    /// The port does not arbitrate: a second request in the same tick
    /// replaces the first.
    pub fn issue(&mut self, id: u8, offset: usize) {
        if self.request.is_some() {
            self.contended = true;
        }
        self.request = Some((id, offset));
    }

    /// Registered output from the request issued before the last clock.
    pub fn data(&self) -> ReadData {
        self.out
    }

    /// Requests served since construction.
    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl Port for WeightStore {
    fn clock(&mut self) {
        if self.contended {
            tracing::warn!("weight store read port driven twice in one tick; last request wins");
            self.contended = false;
        }
        if let Some((id, offset)) = self.request.take() {
            self.out = self.peek(id, offset);
            self.reads += 1;
        }
    }

    fn flush(&mut self) {
        self.request = None;
        self.contended = false;
        self.out = ReadData::default();
    }
}
