//! Simulated host DDR memory reached through the engine's burst ports.
//!
//! The host stages the input image, coefficients and bias here before
//! triggering a run, and reads the output feature map back after the done
//! flag is observed. Samples are stored as little-endian Q4.12 halfwords.
//!
//! # Usage
//!
//! ```
//! use conv3_emu::device::HostMemory;
//! use conv3_emu::Fixed16;
//!
//! let mut mem = HostMemory::new();
//! mem.allocate_region("input", 0x1000_0000, 4096).unwrap();
//!
//! let pixels = [Fixed16::ONE, Fixed16::from_f64(0.5)];
//! mem.write_fixed(0x1000_0000, &pixels);
//! assert_eq!(mem.read_fixed(0x1000_0000, 2), pixels.to_vec());
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::device::params::ELEMENT_BYTES;
use crate::fixed::Fixed16;

/// Direction of data flow for a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// Host to engine (image, coefficients, bias)
    Input,
    /// Engine to host (feature map)
    Output,
    /// Either direction
    Bidirectional,
}

/// A named memory region for debugging and tracking.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    /// Human-readable name (e.g., "input", "output", "coefficients")
    pub name: String,
    /// Base address in host address space
    pub base_address: u64,
    /// Size in bytes
    pub size: usize,
    /// Direction of data flow
    pub direction: DataDirection,
    /// Number of burst reads that touched this region
    pub dma_reads: u64,
    /// Number of burst writes that touched this region
    pub dma_writes: u64,
}

impl MemoryRegion {
    /// Create a new memory region.
    pub fn new(name: impl Into<String>, base_address: u64, size: usize, direction: DataDirection) -> Self {
        Self {
            name: name.into(),
            base_address,
            size,
            direction,
            dma_reads: 0,
            dma_writes: 0,
        }
    }

    /// Check if an address falls within this region.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_address && addr < self.end()
    }

    /// Check if `len` bytes at `addr` lie entirely inside this region.
    #[inline]
    pub fn covers(&self, addr: u64, len: usize) -> bool {
        addr >= self.base_address && addr.saturating_add(len as u64) <= self.end()
    }

    /// First address past the region.
    #[inline]
    pub fn end(&self) -> u64 {
        self.base_address.saturating_add(self.size as u64)
    }

    /// Whether the engine may read (`write == false`) or write this region.
    pub fn permits(&self, write: bool) -> bool {
        match self.direction {
            DataDirection::Input => !write,
            DataDirection::Output => write,
            DataDirection::Bidirectional => true,
        }
    }

    /// Check if an address range overlaps this region.
    #[inline]
    pub fn overlaps(&self, addr: u64, len: usize) -> bool {
        let end = addr.saturating_add(len as u64);
        let region_end = self.base_address.saturating_add(self.size as u64);
        addr < region_end && end > self.base_address
    }
}

/// Error type for host memory operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostMemoryError {
    /// Region overlap on allocation
    #[error("region at 0x{new_base:016x} overlaps with '{existing_name}'")]
    RegionOverlap {
        /// Base of the rejected region
        new_base: u64,
        /// Region already covering the range
        existing_name: String,
    },
    /// Access is not aligned to a sample
    #[error("address 0x{address:016x} not aligned to {required} bytes")]
    AlignmentError {
        /// Offending address
        address: u64,
        /// Required alignment
        required: usize,
    },
    /// Burst access outside every registered region
    #[error("{len}-byte access at 0x{address:016x} is outside every region")]
    OutOfRegion {
        /// Start of the access
        address: u64,
        /// Length in bytes
        len: usize,
    },
    /// Burst access against the region's direction
    #[error("engine {access} at 0x{address:016x} not permitted in region '{region}'")]
    DirectionViolation {
        /// Start of the access
        address: u64,
        /// Region the access falls in
        region: String,
        /// "read" or "write"
        access: &'static str,
    },
    /// Address arithmetic wrapped past the end of the address space
    #[error("0x{base:016x} + {elements} samples overflows the address space")]
    AddressOverflow {
        /// Buffer base
        base: u64,
        /// Offset in samples
        elements: usize,
    },
}

/// Address of sample `elements` of the buffer at `base`.
pub fn address_at(base: u64, elements: usize) -> Result<u64, HostMemoryError> {
    elements
        .checked_mul(ELEMENT_BYTES)
        .and_then(|bytes| base.checked_add(bytes as u64))
        .ok_or(HostMemoryError::AddressOverflow { base, elements })
}

/// Simulated host memory.
///
/// Sparse storage (BTreeMap of 4KB pages) so buffers can sit anywhere in
/// the 64-bit address space. Unwritten memory reads as zero.
pub struct HostMemory {
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,
    regions: Vec<MemoryRegion>,
    total_bytes_written: u64,
    total_bytes_read: u64,
}

impl HostMemory {
    /// Page size for sparse storage.
    pub const PAGE_SIZE: usize = 4096;

    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    /// Create a new empty host memory.
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            regions: Vec::new(),
            total_bytes_written: 0,
            total_bytes_read: 0,
        }
    }

    /// Register a named region (bidirectional).
    ///
    /// Pages are still allocated on demand; the region is for tracking.
    pub fn allocate_region(
        &mut self,
        name: impl Into<String>,
        base_address: u64,
        size: usize,
    ) -> Result<(), HostMemoryError> {
        self.allocate_region_with_direction(name, base_address, size, DataDirection::Bidirectional)
    }

    /// Register a named region with a direction.
    pub fn allocate_region_with_direction(
        &mut self,
        name: impl Into<String>,
        base_address: u64,
        size: usize,
        direction: DataDirection,
    ) -> Result<(), HostMemoryError> {
        if let Some(existing) = self.regions.iter().find(|r| r.overlaps(base_address, size)) {
            return Err(HostMemoryError::RegionOverlap {
                new_base: base_address,
                existing_name: existing.name.clone(),
            });
        }

        self.regions.push(MemoryRegion::new(name, base_address, size, direction));
        Ok(())
    }

    /// Get a region by name.
    pub fn region(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Get all regions.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn get_or_create_page(&mut self, addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages
            .entry(page_addr)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }

    fn get_page(&self, addr: u64) -> Option<&[u8; Self::PAGE_SIZE]> {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages.get(&page_addr).map(|b| b.as_ref())
    }

    /// Write a byte slice to memory.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let mut current_addr = addr;
        let mut remaining = data;

        while !remaining.is_empty() {
            let page = self.get_or_create_page(current_addr);
            let offset = (current_addr & (Self::PAGE_SIZE as u64 - 1)) as usize;
            let to_write = remaining.len().min(Self::PAGE_SIZE - offset);

            page[offset..offset + to_write].copy_from_slice(&remaining[..to_write]);

            current_addr += to_write as u64;
            remaining = &remaining[to_write..];
        }

        self.total_bytes_written += data.len() as u64;
    }

    /// Read bytes from memory into a buffer.
    pub fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        let mut current_addr = addr;
        let mut offset_in_buf = 0;

        while offset_in_buf < buf.len() {
            let page_offset = (current_addr & (Self::PAGE_SIZE as u64 - 1)) as usize;
            let to_read = (buf.len() - offset_in_buf).min(Self::PAGE_SIZE - page_offset);
            let dst = &mut buf[offset_in_buf..offset_in_buf + to_read];

            match self.get_page(current_addr) {
                Some(page) => dst.copy_from_slice(&page[page_offset..page_offset + to_read]),
                None => dst.fill(0),
            }

            current_addr += to_read as u64;
            offset_in_buf += to_read;
        }

        self.total_bytes_read += buf.len() as u64;
    }

    /// Write fixed-point samples as little-endian halfwords.
    pub fn write_fixed(&mut self, addr: u64, samples: &[Fixed16]) {
        let raw: Vec<i16> = samples.iter().map(|s| s.raw()).collect();
        let mut bytes = vec![0u8; raw.len() * 2];
        LittleEndian::write_i16_into(&raw, &mut bytes);
        self.write_bytes(addr, &bytes);
    }

    /// Read `count` fixed-point samples.
    pub fn read_fixed(&mut self, addr: u64, count: usize) -> Vec<Fixed16> {
        let mut bytes = vec![0u8; count * 2];
        self.read_bytes(addr, &mut bytes);
        let mut raw = vec![0i16; count];
        LittleEndian::read_i16_into(&bytes, &mut raw);
        raw.into_iter().map(Fixed16::from_raw).collect()
    }

    /// Check an engine read of `len` bytes at `addr`.
    ///
    /// With no regions registered every access is allowed. Otherwise the
    /// access must sit inside one region that the engine may read.
    pub fn check_burst_read(&self, addr: u64, len: usize) -> Result<(), HostMemoryError> {
        self.check_access(addr, len, false)
    }

    /// Check an engine write of `len` bytes at `addr`.
    pub fn check_burst_write(&self, addr: u64, len: usize) -> Result<(), HostMemoryError> {
        self.check_access(addr, len, true)
    }

    fn check_access(&self, addr: u64, len: usize, write: bool) -> Result<(), HostMemoryError> {
        if self.regions.is_empty() {
            return Ok(());
        }
        let region = self
            .regions
            .iter()
            .find(|r| r.covers(addr, len))
            .ok_or(HostMemoryError::OutOfRegion { address: addr, len })?;
        if !region.permits(write) {
            return Err(HostMemoryError::DirectionViolation {
                address: addr,
                region: region.name.clone(),
                access: if write { "write" } else { "read" },
            });
        }
        Ok(())
    }

    /// Record a burst read (called by the memory ports).
    pub fn record_dma_read(&mut self, addr: u64, len: usize) {
        if let Some(region) = self.regions.iter_mut().find(|r| r.overlaps(addr, len)) {
            region.dma_reads += 1;
        }
    }

    /// Record a burst write (called by the memory ports).
    pub fn record_dma_write(&mut self, addr: u64, len: usize) {
        if let Some(region) = self.regions.iter_mut().find(|r| r.overlaps(addr, len)) {
            region.dma_writes += 1;
        }
    }

    /// Get total bytes written.
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Get total bytes read.
    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    /// Get number of allocated pages.
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory")
            .field("allocated_pages", &self.pages.len())
            .field("regions", &self.regions.len())
            .field("total_bytes_written", &self.total_bytes_written)
            .field("total_bytes_read", &self.total_bytes_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unallocated_reads_zero() {
        let mut mem = HostMemory::new();
        assert_eq!(mem.read_fixed(0x9999_0000, 3), vec![Fixed16::ZERO; 3]);
        assert_eq!(mem.allocated_pages(), 0);
    }

    #[test]
    fn test_fixed_little_endian_layout() {
        let mut mem = HostMemory::new();
        mem.write_fixed(0x100, &[Fixed16::from_raw(0x1234), Fixed16::from_raw(-2)]);

        let mut bytes = [0u8; 4];
        mem.read_bytes(0x100, &mut bytes);
        assert_eq!(bytes, [0x34, 0x12, 0xFE, 0xFF]);
    }

    #[test]
    fn test_cross_page_fixed() {
        let mut mem = HostMemory::new();

        // Two samples straddle the first page boundary
        let addr = HostMemory::PAGE_SIZE as u64 - 2;
        let data = [Fixed16::ONE, Fixed16::MIN, Fixed16::MAX];
        mem.write_fixed(addr, &data);

        assert_eq!(mem.read_fixed(addr, 3), data.to_vec());
        assert_eq!(mem.allocated_pages(), 2);
    }

    #[test]
    fn test_region_overlap_detection() {
        let mut mem = HostMemory::new();

        mem.allocate_region("input", 0x1000_0000, 4096).unwrap();

        let result = mem.allocate_region("output", 0x1000_0800, 4096);
        assert!(matches!(result, Err(HostMemoryError::RegionOverlap { .. })));

        mem.allocate_region("output", 0x1000_1000, 4096).unwrap();
        assert_eq!(mem.regions().len(), 2);
    }

    #[test]
    fn test_region_overlaps() {
        let region = MemoryRegion::new("test", 0x1000, 256, DataDirection::Input);

        assert!(region.overlaps(0x1050, 16));
        assert!(region.overlaps(0x0F80, 256));
        // Adjacent but not overlapping
        assert!(!region.overlaps(0x0F00, 256));
        assert!(!region.overlaps(0x1100, 16));
    }

    #[test]
    fn test_dma_accounting() {
        let mut mem = HostMemory::new();
        mem.allocate_region_with_direction("bias", 0x2000, 64, DataDirection::Input).unwrap();

        mem.record_dma_read(0x2000, 8);
        mem.record_dma_read(0x2010, 8);
        mem.record_dma_write(0x9000, 8);

        let bias = mem.region("bias").unwrap();
        assert_eq!(bias.dma_reads, 2);
        assert_eq!(bias.dma_writes, 0);
    }

    #[test]
    fn test_access_checks_follow_direction() {
        let mut mem = HostMemory::new();
        // no regions: nothing to enforce
        assert!(mem.check_burst_write(0x2000, 8).is_ok());

        mem.allocate_region_with_direction("input", 0x2000, 64, DataDirection::Input).unwrap();
        mem.allocate_region_with_direction("output", 0x3000, 64, DataDirection::Output).unwrap();
        mem.allocate_region("scratch", 0x4000, 64).unwrap();

        assert!(mem.check_burst_read(0x2000, 64).is_ok());
        assert!(mem.check_burst_write(0x3010, 2).is_ok());
        assert!(mem.check_burst_read(0x4000, 8).is_ok());
        assert!(mem.check_burst_write(0x4000, 8).is_ok());

        assert_eq!(
            mem.check_burst_write(0x2008, 2),
            Err(HostMemoryError::DirectionViolation {
                address: 0x2008,
                region: "input".into(),
                access: "write",
            })
        );
        assert!(matches!(
            mem.check_burst_read(0x3000, 2),
            Err(HostMemoryError::DirectionViolation { access: "read", .. })
        ));
    }

    #[test]
    fn test_access_outside_regions_rejected() {
        let mut mem = HostMemory::new();
        mem.allocate_region_with_direction("input", 0x2000, 64, DataDirection::Input).unwrap();

        assert_eq!(
            mem.check_burst_read(0x5000, 4),
            Err(HostMemoryError::OutOfRegion { address: 0x5000, len: 4 })
        );
        // runs past the end of the region
        assert!(matches!(
            mem.check_burst_read(0x2030, 32),
            Err(HostMemoryError::OutOfRegion { .. })
        ));
    }

    #[test]
    fn test_address_at() {
        assert_eq!(address_at(0x1000, 3), Ok(0x1006));
        assert_eq!(
            address_at(u64::MAX - 3, 2),
            Err(HostMemoryError::AddressOverflow { base: u64::MAX - 3, elements: 2 })
        );
    }

    #[test]
    fn test_statistics() {
        let mut mem = HostMemory::new();
        mem.write_fixed(0x0, &[Fixed16::ONE; 4]);
        assert_eq!(mem.total_bytes_written(), 8);
        let _ = mem.read_fixed(0x0, 2);
        assert_eq!(mem.total_bytes_read(), 4);
    }
}
