// src/table.rs
//
// Fully materialized sounds, shared read-only.

use std::sync::Arc;

use crate::config::{
    Sample, SCALE_FACTOR_TO_24BIT, SCALE_FACTOR_TO_BYTE, SCALE_FACTOR_TO_LONG,
    SCALE_FACTOR_TO_SHORT,
};

/// Integer export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Byte,
    Short,
    Bits24,
    Long,
}

impl SampleFormat {
    pub fn scale_factor(self) -> f64 {
        match self {
            SampleFormat::Byte => SCALE_FACTOR_TO_BYTE,
            SampleFormat::Short => SCALE_FACTOR_TO_SHORT,
            SampleFormat::Bits24 => SCALE_FACTOR_TO_24BIT,
            SampleFormat::Long => SCALE_FACTOR_TO_LONG,
        }
    }

    /// Convert one sample, clipping to [-1, 1].
    #[inline]
    pub fn quantize(self, sample: Sample) -> i32 {
        let s = (sample as f64).clamp(-1.0, 1.0);
        (s * self.scale_factor()).round() as i32
    }
}

/// A finite array of samples with a (possibly fractional) length.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    length: f64,
    samples: Vec<Sample>,
}

impl Table {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            length: samples.len() as f64,
            samples,
        }
    }

    /// Table whose logical length is shorter than its storage, e.g. a loop
    /// point that falls between samples. Clamped to the storage length.
    pub fn with_length(samples: Vec<Sample>, length: f64) -> Self {
        let length = length.clamp(0.0, samples.len() as f64);
        Self { length, samples }
    }
}

/// Shared handle to a table.
#[derive(Debug, Clone)]
pub struct TableRef(Arc<Table>);

impl TableRef {
    pub fn new(table: Table) -> Self {
        Self(Arc::new(table))
    }

    #[inline]
    pub fn acquire(&self) -> Self {
        self.clone()
    }

    #[inline]
    pub fn release(self) {
        drop(self)
    }

    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same_table(&self, other: &TableRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn length(&self) -> f64 {
        self.0.length
    }

    pub fn samples(&self) -> &[Sample] {
        &self.0.samples
    }

    /// Linear interpolation at fractional index `pos`, wrapping at the
    /// logical length so the table can be used as one period of a loop.
    pub fn interpolate(&self, pos: f64) -> f64 {
        let samples = &self.0.samples;
        if samples.is_empty() || self.0.length <= 0.0 {
            return 0.0;
        }
        let pos = pos.rem_euclid(self.0.length);
        let i = (pos.floor() as usize).min(samples.len() - 1);
        let frac = pos - i as f64;
        let x1 = samples[i] as f64;
        let j = if ((i + 1) as f64) < self.0.length { i + 1 } else { 0 };
        let x2 = samples.get(j).copied().unwrap_or(samples[0]) as f64;
        x1 + frac * (x2 - x1)
    }

    pub fn to_pcm(&self, format: SampleFormat) -> Vec<i32> {
        self.0.samples.iter().map(|s| format.quantize(*s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn fractional_length_is_clamped() {
        let t = Table::with_length(vec![0.0; 4], 10.5);
        assert_eq!(TableRef::new(t).length(), 4.0);
        let t = TableRef::new(Table::with_length(vec![0.0; 4], 2.5));
        assert_eq!(t.length(), 2.5);
    }

    #[test]
    fn interpolation_wraps() {
        let t = TableRef::new(Table::new(vec![0.0, 1.0, 0.0, -1.0]));
        assert!(approx_eq!(f64, t.interpolate(0.5), 0.5));
        assert!(approx_eq!(f64, t.interpolate(3.5), -0.5));
        assert!(approx_eq!(f64, t.interpolate(5.0), 1.0));
    }

    #[test]
    fn pcm_export_clips_and_scales() {
        let t = TableRef::new(Table::new(vec![1.0, -1.0, 0.5, 2.0]));
        assert_eq!(t.to_pcm(SampleFormat::Short), vec![32767, -32767, 16384, 32767]);
        assert_eq!(t.to_pcm(SampleFormat::Byte)[0], 127);
        assert_eq!(t.to_pcm(SampleFormat::Bits24)[0], 0x7F_FFFF);
        assert_eq!(t.to_pcm(SampleFormat::Long)[1], -2_147_483_647);
    }

    #[test]
    fn acquire_release_balance() {
        let t = TableRef::new(Table::new(vec![0.0]));
        let u = t.acquire();
        assert_eq!(t.refcount(), 2);
        u.release();
        assert_eq!(t.refcount(), 1);
    }
}
