//! Perceptual (average) hashing of images.
//!
//! An image is decoded, shrunk to a small square grid, converted to luma and
//! compared cell by cell against the grid's mean brightness. The resulting
//! bit string survives re-encoding, mild resizing and recompression, so two
//! fingerprints at a small Hamming distance usually depict the same picture.

use std::fmt;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::PerceptualError;

/// Default grid edge length (16×16 cells, 256 bits).
pub const DEFAULT_GRID_SIZE: u32 = 16;

/// Packed perceptual fingerprint, hex-encoded (MSB-first within each byte).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex fingerprint.
    ///
    /// Returns `None` for empty, odd-length or non-hex input.
    #[must_use]
    pub fn from_hex(value: &str) -> Option<Self> {
        if value.is_empty()
            || value.len() % 2 != 0
            || !value.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return None;
        }
        Some(Self(value.to_ascii_lowercase()))
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Return the hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of bits carried by this fingerprint.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.0.len() * 4
    }

    /// Hamming distance to `other`.
    ///
    /// Returns `None` when the fingerprints are incomparable: different
    /// lengths (different grid sizes) or a value that does not decode.
    #[must_use]
    pub fn distance(&self, other: &Self) -> Option<u32> {
        if self.0.len() != other.0.len() {
            return None;
        }
        let left = hex::decode(&self.0).ok()?;
        let right = hex::decode(&other.0).ok()?;
        Some(
            left.iter()
                .zip(right.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }

    /// `true` when both fingerprints are comparable and at most `threshold`
    /// bits apart.
    #[must_use]
    pub fn is_similar(&self, other: &Self, threshold: u32) -> bool {
        self.distance(other).is_some_and(|d| d <= threshold)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes [`Fingerprint`]s from encoded image bytes.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualHasher {
    grid: u32,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self {
            grid: DEFAULT_GRID_SIZE,
        }
    }
}

impl PerceptualHasher {
    /// Create a hasher with the default 16×16 grid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a hasher with a custom grid edge length.
    ///
    /// # Errors
    ///
    /// Returns [`PerceptualError::InvalidGrid`] for grids smaller than 2×2.
    pub fn with_grid(grid: u32) -> Result<Self, PerceptualError> {
        if grid < 2 {
            return Err(PerceptualError::InvalidGrid(grid));
        }
        Ok(Self { grid })
    }

    /// Grid edge length.
    #[must_use]
    pub fn grid(&self) -> u32 {
        self.grid
    }

    /// Fingerprint an encoded image (PNG, JPEG, GIF or WebP).
    ///
    /// # Errors
    ///
    /// Returns [`PerceptualError::UnsupportedFormat`] when the bytes cannot
    /// be decoded as an image.
    pub fn hash(&self, bytes: &[u8]) -> Result<Fingerprint, PerceptualError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PerceptualError::UnsupportedFormat(e.to_string()))?;
        let luma = decoded
            .resize_exact(self.grid, self.grid, FilterType::Triangle)
            .to_luma8();
        Ok(Self::pack(luma.as_raw()))
    }

    fn pack(cells: &[u8]) -> Fingerprint {
        let total: u64 = cells.iter().map(|&c| u64::from(c)).sum();
        let count = cells.len().max(1) as u64;

        let mut packed = vec![0u8; cells.len().div_ceil(8)];
        for (i, &cell) in cells.iter().enumerate() {
            // cell >= mean, compared without the fractional part of the mean.
            if u64::from(cell) * count >= total {
                packed[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Fingerprint::from_bytes(&packed)
    }
}
