//! Table and weight loading.
//!
//! Lookup tables are read from a directory of `$readmemh` files when present:
//!
//! ```text
//! inv_sqrt_lut.hex   512 × 16-bit
//! exp_lut0.hex       256 × 16-bit unsigned
//! exp_lut1.hex       256 × 16-bit two's complement
//! gelu_lut.hex       1024 × 8-bit two's complement
//! ```
//!
//! Missing files fall back to the built-in generators. A file that exists but
//! is malformed is an error.

use std::path::Path;
use std::sync::Arc;

use qfab_core::{ModelConfig, Result};
use qfab_kernels::{ExpLut, GeluLut, InvSqrtLut};

use crate::format::Container;
use crate::store::WeightStore;

pub const INV_SQRT_FILE: &str = "inv_sqrt_lut.hex";
pub const EXP_LUT0_FILE: &str = "exp_lut0.hex";
pub const EXP_LUT1_FILE: &str = "exp_lut1.hex";
pub const GELU_FILE: &str = "gelu_lut.hex";

/// Every table the fabric consults.
#[derive(Debug, Clone)]
pub struct LutSet {
    pub inv_sqrt: Arc<InvSqrtLut>,
    pub exp: Arc<ExpLut>,
    pub gelu: Arc<GeluLut>,
}

impl LutSet {
    /// Tables from the closed-form generators and the configured GELU scales.
    pub fn generated(cfg: &ModelConfig) -> Result<Self> {
        Ok(Self {
            inv_sqrt: Arc::new(InvSqrtLut::generate()),
            exp: Arc::new(ExpLut::analytical()),
            gelu: Arc::new(GeluLut::from_scales(&cfg.numeric.gelu_act_scales)?),
        })
    }

    /// Load whatever tables `dir` provides, generating the rest.
    pub fn from_dir(dir: &Path, cfg: &ModelConfig) -> Result<Self> {
        let inv_sqrt_path = dir.join(INV_SQRT_FILE);
        let inv_sqrt = if inv_sqrt_path.is_file() {
            InvSqrtLut::from_hex_file(&inv_sqrt_path)?
        } else {
            tracing::warn!("{} not found, generating inverse-sqrt table", inv_sqrt_path.display());
            InvSqrtLut::generate()
        };

        let (lut0, lut1) = (dir.join(EXP_LUT0_FILE), dir.join(EXP_LUT1_FILE));
        let exp = if lut0.is_file() && lut1.is_file() {
            ExpLut::from_hex_files(&lut0, &lut1)?
        } else {
            tracing::warn!("exp tables not found in {}, using analytical bipartite tables", dir.display());
            ExpLut::analytical()
        };

        let gelu_path = dir.join(GELU_FILE);
        let gelu = if gelu_path.is_file() {
            GeluLut::from_hex_file(&gelu_path)?
        } else {
            tracing::warn!("{} not found, calibrating from configured activation scales", gelu_path.display());
            GeluLut::from_scales(&cfg.numeric.gelu_act_scales)?
        };

        tracing::info!("lookup tables ready from {}", dir.display());
        Ok(Self {
            inv_sqrt: Arc::new(inv_sqrt),
            exp: Arc::new(exp),
            gelu: Arc::new(gelu),
        })
    }

    /// Write every table as `$readmemh` text into `dir`.
    pub fn write_dir(&self, dir: &Path, cfg: &ModelConfig) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(INV_SQRT_FILE), self.inv_sqrt.to_hex())?;
        std::fs::write(dir.join(EXP_LUT0_FILE), self.exp.lut0_hex())?;
        std::fs::write(dir.join(EXP_LUT1_FILE), self.exp.lut1_hex())?;
        std::fs::write(dir.join(GELU_FILE), self.gelu.to_hex(&cfg.numeric.gelu_act_scales))?;
        Ok(())
    }
}

/// Read a `TFPGA001` container and populate a weight store from it.
pub fn load_weights(path: &Path, cfg: &ModelConfig) -> Result<WeightStore> {
    let container = Container::read_file(path)?;
    WeightStore::from_container(cfg, &container)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dir_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig::default();
        let luts = LutSet::from_dir(dir.path(), &cfg).unwrap();
        assert_eq!(*luts.inv_sqrt, InvSqrtLut::generate());
        assert_eq!(*luts.exp, ExpLut::analytical());
    }

    #[test]
    fn test_dir_roundtrip_prefers_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig::default();
        let generated = LutSet::generated(&cfg).unwrap();
        generated.write_dir(dir.path(), &cfg).unwrap();

        // A distinct GELU table on disk must win over the configured scales.
        let other = GeluLut::from_scales(&[0.2; 4]).unwrap();
        std::fs::write(dir.path().join(GELU_FILE), other.to_hex(&[0.2; 4])).unwrap();

        let loaded = LutSet::from_dir(dir.path(), &cfg).unwrap();
        assert_eq!(*loaded.exp, *generated.exp);
        assert_eq!(*loaded.inv_sqrt, *generated.inv_sqrt);
        assert_eq!(*loaded.gelu, other);
    }

    #[test]
    fn test_malformed_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INV_SQRT_FILE), "8000\nxyz\n").unwrap();
        assert!(LutSet::from_dir(dir.path(), &ModelConfig::default()).is_err());
    }
}
