// Copyright 2020 @TwoCookingMice

use super::constants::{Float, ELEMENT_BYTES};

use std::collections::TryReserveError;
use std::ops;
use std::vec::Vec;

/// Packed host-side pixel storage.
///
/// Storage is kept as 4-byte words so a float view never needs realignment;
/// byte-sized sample formats simply use a prefix of the same words. The
/// allocation only ever grows: rebinding to a smaller frame keeps the old
/// capacity and updates the logical size.
#[derive(Debug, Default, Clone)]
pub struct Bitmap {
    words: Vec<u32>,
    len: usize,
    width: usize,
    height: usize,
    entry_size: usize,
}

impl ops::Index<(usize, usize)> for Bitmap {
    type Output = [u8];

    fn index(&self, index: (usize, usize)) -> &[u8] {
        let offset = self.pixel_offset(index.0, index.1);
        &self.as_bytes()[offset..offset + self.entry_size]
    }
}

impl ops::IndexMut<(usize, usize)> for Bitmap {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut [u8] {
        let offset = self.pixel_offset(index.0, index.1);
        let entry_size = self.entry_size;
        &mut self.as_bytes_mut()[offset..offset + entry_size]
    }
}

fn words_for(bytes: usize) -> usize {
    (bytes + ELEMENT_BYTES - 1) / ELEMENT_BYTES
}

impl Bitmap {
    pub fn new(width: usize, height: usize, entry_size: usize) -> Self {
        let len = width * height * entry_size;
        Self { words: vec![0u32; words_for(len)],
               len,
               width,
               height,
               entry_size }
    }

    /// Resize the logical image, reallocating only when the current capacity
    /// is too small. Returns `true` when a new allocation was made.
    pub fn ensure(&mut self,
                  width: usize,
                  height: usize,
                  entry_size: usize) -> Result<bool, TryReserveError> {
        let len = width * height * entry_size;
        let required_words = words_for(len);
        let mut grown = false;
        if required_words > self.words.len() {
            let mut words = Vec::new();
            words.try_reserve_exact(required_words)?;
            words.resize(required_words, 0u32);
            self.words = words;
            grown = true;
        }

        self.len = len;
        self.width = width;
        self.height = height;
        self.entry_size = entry_size;
        Ok(grown)
    }

    /// Drop the storage entirely. Safe on an already released bitmap.
    pub fn release(&mut self) {
        self.words = Vec::new();
        self.len = 0;
        self.width = 0;
        self.height = 0;
        self.entry_size = 0;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn row_bytes(&self) -> usize {
        self.width * self.entry_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity_bytes(&self) -> usize {
        self.words.len() * ELEMENT_BYTES
    }

    pub fn as_bytes(&self) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.words);
        &bytes[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        &mut bytes[..len]
    }

    /// Logical content as 4-byte words, `None` unless the size is word aligned.
    pub fn words(&self) -> Option<&[u32]> {
        if self.len % ELEMENT_BYTES != 0 {
            return None;
        }
        Some(&self.words[..self.len / ELEMENT_BYTES])
    }

    pub fn words_mut(&mut self) -> Option<&mut [u32]> {
        if self.len % ELEMENT_BYTES != 0 {
            return None;
        }
        let count = self.len / ELEMENT_BYTES;
        Some(&mut self.words[..count])
    }

    pub fn as_floats(&self) -> Option<&[Float]> {
        self.words().map(|words| bytemuck::cast_slice(words))
    }

    pub fn as_floats_mut(&mut self) -> Option<&mut [Float]> {
        self.words_mut().map(|words| bytemuck::cast_slice_mut(words))
    }

    fn pixel_offset(&self, x: usize, y: usize) -> usize {
        assert!(x < self.width && y < self.height,
                "pixel ({}, {}) outside {}x{} bitmap", x, y, self.width, self.height);
        (x + self.width * y) * self.entry_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_basic_functions() {
        let mut bitmap = Bitmap::new(256usize, 256usize, 12);
        assert_eq!(bitmap.width(), 256);
        assert_eq!(bitmap.height(), 256);
        assert_eq!(bitmap.len(), 256 * 256 * 12);

        bitmap[(5, 6)].copy_from_slice(&[1u8; 12]);
        assert_eq!(&bitmap[(5, 6)], &[1u8; 12]);
        assert_eq!(&bitmap[(2, 6)], &[0u8; 12]);
    }

    #[test]
    fn test_bitmap_ensure_only_grows() {
        let mut bitmap = Bitmap::new(4, 4, 16);
        let capacity = bitmap.capacity_bytes();

        assert!(!bitmap.ensure(2, 2, 16).unwrap());
        assert_eq!(bitmap.capacity_bytes(), capacity);
        assert_eq!(bitmap.len(), 2 * 2 * 16);

        assert!(bitmap.ensure(8, 8, 16).unwrap());
        assert!(bitmap.capacity_bytes() >= 8 * 8 * 16);
    }

    #[test]
    fn test_bitmap_float_view_requires_word_alignment() {
        let bitmap = Bitmap::new(3, 1, 1);
        assert!(bitmap.as_floats().is_none());

        let mut bitmap = Bitmap::new(2, 1, 12);
        bitmap.as_floats_mut().unwrap()[4] = 0.5;
        assert_eq!(bitmap.as_floats().unwrap().len(), 6);
        assert_eq!(bitmap.as_floats().unwrap()[4], 0.5);
    }

    #[test]
    fn test_bitmap_release_is_idempotent() {
        let mut bitmap = Bitmap::new(2, 2, 4);
        bitmap.release();
        bitmap.release();
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.capacity_bytes(), 0);
    }
}
