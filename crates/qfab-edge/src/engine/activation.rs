//! GELU activation table with a registered output.

use std::sync::Arc;

use qfab_core::{Port, Token};
use qfab_kernels::GeluLut;

pub const LATENCY: u64 = 1;

#[derive(Debug, Clone)]
pub struct ActivationTable {
    lut: Arc<GeluLut>,
    request: Option<(u8, i8)>,
    out: Token<i8>,
}

impl ActivationTable {
    pub fn new(lut: Arc<GeluLut>) -> Self {
        Self { lut, request: None, out: Token::bubble() }
    }

    /// Present `{layer_sel, x}` for this tick.
    pub fn issue(&mut self, layer: u8, x: i8) {
        self.request = Some((layer, x));
    }

    /// Output registered at the last clock; `None` if nothing was issued.
    pub fn data(&self) -> Option<i8> {
        self.out.get().copied()
    }

    pub fn lut(&self) -> &GeluLut {
        &self.lut
    }
}

impl Port for ActivationTable {
    fn clock(&mut self) {
        self.out = match self.request.take() {
            Some((layer, x)) => Token::new(self.lut.lookup(layer, x), true),
            None => Token::bubble(),
        };
    }

    fn flush(&mut self) {
        self.request = None;
        self.out = Token::bubble();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_tick_and_layer_select() {
        let lut = Arc::new(GeluLut::from_scales(&[0.01, 0.05, 0.1, 0.2]).unwrap());
        let mut act = ActivationTable::new(lut.clone());
        act.issue(2, -20);
        assert_eq!(act.data(), None);
        act.clock();
        assert_eq!(act.data(), Some(lut.lookup(2, -20)));
        act.clock();
        assert_eq!(act.data(), None);
    }

    #[test]
    fn test_flush_drops_request_and_output() {
        let lut = Arc::new(GeluLut::from_scales(&[0.05; 4]).unwrap());
        let mut act = ActivationTable::new(lut);
        act.issue(1, 40);
        act.clock();
        assert!(act.data().is_some());
        act.issue(1, 41);
        act.flush();
        assert_eq!(act.data(), None);
        act.clock();
        assert_eq!(act.data(), None);
    }

    #[test]
    fn test_pipelined_stream() {
        let lut = Arc::new(GeluLut::from_scales(&[1.0 / 32.0; 4]).unwrap());
        let mut act = ActivationTable::new(lut.clone());
        let xs: Vec<i8> = (-128..=127).collect();
        let mut out = Vec::new();
        for &x in &xs {
            act.issue(0, x);
            act.clock();
            out.push(act.data().unwrap());
        }
        let want: Vec<i8> = xs.iter().map(|&x| lut.lookup(0, x)).collect();
        assert_eq!(out, want);
    }
}
