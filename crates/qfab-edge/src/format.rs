//! `TFPGA001` weight container.
//!
//! Layout (all integers little-endian):
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Magic: "TFPGA001" (8 bytes)          │
//! │ Tensor count: u32                    │
//! ├──────────────────────────────────────┤
//! │ per tensor:                          │
//! │   name_len: u32, name (ASCII)        │
//! │   ndim: u32, shape: ndim × u32       │
//! │   scale: f32                         │
//! │   data: prod(shape) × int8           │
//! └──────────────────────────────────────┘
//! ```

use std::path::Path;

use serde::Serialize;

use qfab_core::{QfabError, Result};

/// Magic bytes identifying a weight container.
pub const MAGIC: &[u8; 8] = b"TFPGA001";

/// One quantized tensor as stored in the container.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub name: String,
    pub shape: Vec<u32>,
    pub scale: f32,
    pub data: Vec<i8>,
}

impl RawTensor {
    pub fn numel(&self) -> usize {
        self.shape.iter().map(|&d| d as usize).product()
    }
}

/// A row of the human-readable manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub name: String,
    pub stem: String,
    pub shape: Vec<u32>,
    pub size: usize,
    pub scale: f32,
}

/// A parsed container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    pub tensors: Vec<RawTensor>,
}

/// Bounds-checked little-endian reader.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.data.len() - self.pos;
        if n > available {
            return Err(QfabError::Truncated { offset: self.pos, needed: n, available });
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }
}

impl Container {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor { data, pos: 0 };

        let magic = cur.take(MAGIC.len())?;
        if magic != MAGIC {
            return Err(QfabError::BadMagic {
                expected: String::from_utf8_lossy(MAGIC).into_owned(),
                found: String::from_utf8_lossy(magic).into_owned(),
            });
        }

        let count = cur.u32()? as usize;
        let mut tensors = Vec::with_capacity(count.min(1024));
        for i in 0..count {
            let name_len = cur.u32()? as usize;
            let name = std::str::from_utf8(cur.take(name_len)?)
                .map_err(|_| QfabError::InvalidHeader(format!("tensor {} name is not valid UTF-8", i)))?
                .to_string();

            let ndim = cur.u32()? as usize;
            let shape = (0..ndim).map(|_| cur.u32()).collect::<Result<Vec<u32>>>()?;
            let scale = cur.f32()?;

            let size = shape
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
                .ok_or_else(|| QfabError::InvalidHeader(format!("tensor '{}' shape {:?} overflows", name, shape)))?;
            let data = cur.take(size)?.iter().map(|&b| b as i8).collect();

            tensors.push(RawTensor { name, shape, scale, data });
        }

        if cur.pos != data.len() {
            tracing::warn!("{} trailing bytes after {} tensors", data.len() - cur.pos, count);
        }

        Ok(Self { tensors })
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let container = Self::from_bytes(&bytes)?;
        tracing::info!(
            "loaded {} tensors ({} bytes) from {}",
            container.tensors.len(),
            bytes.len(),
            path.display()
        );
        Ok(container)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(self.tensors.len() as u32).to_le_bytes());
        for t in &self.tensors {
            buf.extend_from_slice(&(t.name.len() as u32).to_le_bytes());
            buf.extend_from_slice(t.name.as_bytes());
            buf.extend_from_slice(&(t.shape.len() as u32).to_le_bytes());
            for d in &t.shape {
                buf.extend_from_slice(&d.to_le_bytes());
            }
            buf.extend_from_slice(&t.scale.to_le_bytes());
            buf.extend(t.data.iter().map(|&b| b as u8));
        }
        buf
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&RawTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.tensors
            .iter()
            .enumerate()
            .map(|(index, t)| ManifestEntry {
                index,
                name: t.name.clone(),
                stem: sanitize_name(&t.name),
                shape: t.shape.clone(),
                size: t.numel(),
                scale: t.scale,
            })
            .collect()
    }

    /// Fixed-width text table, one tensor per line.
    pub fn manifest_text(&self) -> String {
        let mut out = format!(
            "{:>3}  {:40}  {:20}  {:>8}  {:>12}  {}\n",
            "#", "Name", "Shape", "Size", "Scale", "Stem"
        );
        out.push_str(&"-".repeat(110));
        out.push('\n');
        for e in self.manifest() {
            let shape = e.shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("x");
            out.push_str(&format!(
                "{:>3}  {:40}  {:20}  {:>8}  {:>12.6}  {}\n",
                e.index, e.name, shape, e.size, e.scale, e.stem
            ));
        }
        out
    }

    pub fn manifest_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.manifest())?)
    }
}

/// File-system friendly stem for a tensor name.
///
/// `blocks.0.ff.net.0.weight` → `block0_ff_up_weight`.
pub fn sanitize_name(name: &str) -> String {
    name.replace("ff.net.0.", "ff_up_")
        .replace("ff.net.2.", "ff_down_")
        .replace("blocks.", "block")
        .replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        Container {
            tensors: vec![
                RawTensor { name: "tok_emb.weight".into(), shape: vec![2, 3], scale: 0.5, data: vec![1, -2, 3, -4, 5, -128] },
                RawTensor { name: "ln_f.bias".into(), shape: vec![2], scale: 0.25, data: vec![127, 0] },
            ],
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("blocks.0.attn.qkv.weight"), "block0_attn_qkv_weight");
        assert_eq!(sanitize_name("blocks.0.ff.net.0.weight"), "block0_ff_up_weight");
        assert_eq!(sanitize_name("blocks.3.ff.net.2.weight"), "block3_ff_down_weight");
        assert_eq!(sanitize_name("tok_emb.weight"), "tok_emb_weight");
        assert_eq!(sanitize_name("ln_f.weight"), "ln_f_weight");
    }

    #[test]
    fn test_roundtrip() {
        let c = sample();
        let bytes = c.to_bytes();
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(Container::from_bytes(&bytes).unwrap(), c);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(Container::from_bytes(&bytes), Err(QfabError::BadMagic { .. })));
    }

    #[test]
    fn test_truncated_data() {
        let bytes = sample().to_bytes();
        let err = Container::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, QfabError::Truncated { needed: 2, available: 1, .. }));
        assert!(matches!(Container::from_bytes(b"TFPG"), Err(QfabError::Truncated { .. })));
    }

    #[test]
    fn test_manifest() {
        let c = sample();
        let m = c.manifest();
        assert_eq!(m[0].stem, "tok_emb_weight");
        assert_eq!(m[0].size, 6);
        let text = c.manifest_text();
        assert!(text.contains("2x3"));
        assert!(text.contains("ln_f_bias"));
        assert!(c.manifest_json().unwrap().contains("\"stem\": \"ln_f_bias\""));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights_int8.bin");
        sample().write_file(&path).unwrap();
        let back = Container::read_file(&path).unwrap();
        assert_eq!(back.find("ln_f.bias").unwrap().data, vec![127, 0]);
    }
}
