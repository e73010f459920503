use crate::error::{FtlError, Result};

pub type BaseType = usize;

pub type Lpn = BaseType;
pub type LineId = BaseType;
pub type StreamId = BaseType;
pub type Counter = BaseType;

/// Simulated time in nanoseconds.
pub type SimTime = u64;

pub const SECTOR_SIZE: BaseType = 512;

pub const CHANNELS: BaseType = 8;
pub const LUNS_PER_CHANNEL: BaseType = 4;
pub const PLANES_PER_LUN: BaseType = 1;
pub const BLOCKS_PER_PLANE: BaseType = 128;
pub const PAGES_PER_BLOCK: BaseType = 128;
pub const PAGES_PER_ONESHOT: BaseType = 4;

pub const PAGE_SIZE: BaseType = 4096;

pub const STREAMS: BaseType = 4;
pub const PARTITIONS: BaseType = 2;
pub const OVER_PROVISIONING: f64 = 7.0;

// share of lines that may be in use before GC kicks in
pub const GC_THRES_PCENT: f64 = 0.75;
pub const GC_THRES_PCENT_HIGH: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub channels: BaseType,
    pub luns_per_channel: BaseType,
    pub planes_per_lun: BaseType,
    pub blocks_per_plane: BaseType,
    pub pages_per_block: BaseType,
    /// Pages programmed together as one timed NAND operation.
    pub pages_per_oneshot: BaseType,
    pub page_size: BaseType,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            channels: CHANNELS,
            luns_per_channel: LUNS_PER_CHANNEL,
            planes_per_lun: PLANES_PER_LUN,
            blocks_per_plane: BLOCKS_PER_PLANE,
            pages_per_block: PAGES_PER_BLOCK,
            pages_per_oneshot: PAGES_PER_ONESHOT,
            page_size: PAGE_SIZE,
        }
    }
}

impl Geometry {
    pub fn total_luns(&self) -> BaseType {
        self.channels * self.luns_per_channel
    }

    pub fn total_blocks(&self) -> BaseType {
        self.total_luns() * self.planes_per_lun * self.blocks_per_plane
    }

    pub fn total_pages(&self) -> BaseType {
        self.total_blocks() * self.pages_per_block
    }

    /// A line is the same block index across every channel x lun.
    pub fn total_lines(&self) -> BaseType {
        self.blocks_per_plane
    }

    pub fn pages_per_line(&self) -> BaseType {
        self.pages_per_block * self.total_luns()
    }

    pub fn sectors_per_page(&self) -> BaseType {
        self.page_size / SECTOR_SIZE
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub geometry: Geometry,
    pub op_percent: f64,
    pub streams: BaseType,
    pub partitions: BaseType,
    /// Forced GC runs when free lines drop to this count.
    pub gc_thres_lines_high: BaseType,
    /// Opportunistic GC runs when free lines drop to this count.
    pub gc_thres_lines_low: BaseType,
    pub gc_delay_enabled: bool,
    pub write_early_completion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::with_geometry(Geometry::default())
    }
}

impl Config {
    /// Default policy knobs on top of `geometry`, with watermarks scaled to its line count.
    pub fn with_geometry(geometry: Geometry) -> Self {
        let lines = geometry.total_lines() as f64;
        let low = (lines * (1.0 - GC_THRES_PCENT)).trunc() as BaseType;
        let high = ((lines * (1.0 - GC_THRES_PCENT_HIGH)).trunc() as BaseType).max(1);

        Config {
            geometry,
            op_percent: OVER_PROVISIONING,
            streams: STREAMS,
            partitions: PARTITIONS,
            gc_thres_lines_high: high.min(low.max(1)),
            gc_thres_lines_low: low.max(1),
            gc_delay_enabled: true,
            write_early_completion: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let geo = &self.geometry;
        let dims = [
            geo.channels,
            geo.luns_per_channel,
            geo.planes_per_lun,
            geo.blocks_per_plane,
            geo.pages_per_block,
            geo.pages_per_oneshot,
        ];
        if dims.contains(&0) {
            return Err(invalid("every geometry dimension must be non-zero"));
        }
        if geo.planes_per_lun != 1 {
            return Err(invalid("lines span channel x lun, planes_per_lun must be 1"));
        }
        if geo.pages_per_block % geo.pages_per_oneshot != 0 {
            return Err(invalid("pages_per_block must be a multiple of pages_per_oneshot"));
        }
        if geo.page_size < SECTOR_SIZE || geo.page_size % SECTOR_SIZE != 0 {
            return Err(invalid("page_size must be a multiple of the sector size"));
        }
        if !(0.0..100.0).contains(&self.op_percent) {
            return Err(invalid("op_percent must be within [0, 100)"));
        }
        if self.streams == 0 || self.partitions == 0 {
            return Err(invalid("streams and partitions must be non-zero"));
        }
        if self.gc_thres_lines_high > self.gc_thres_lines_low {
            return Err(invalid("gc high watermark must not exceed the low watermark"));
        }
        // one line per host stream, one for GC, one to rotate into
        if geo.total_lines() < self.streams + 2 {
            return Err(FtlError::InvalidConfig(format!(
                "{} lines cannot serve {} streams plus GC",
                geo.total_lines(),
                self.streams
            )));
        }
        Ok(())
    }

    pub fn op_pages(&self) -> BaseType {
        (self.geometry.total_pages() as f64 * (self.op_percent / 100.)).trunc() as BaseType
    }

    pub fn logical_pages_per_partition(&self) -> BaseType {
        self.geometry.total_pages() - self.op_pages()
    }

    /// Usable bytes across all partitions.
    pub fn usable_capacity(&self) -> BaseType {
        self.logical_pages_per_partition() * self.partitions * self.geometry.page_size
    }

    pub fn physical_capacity(&self) -> BaseType {
        self.geometry.total_pages() * self.partitions * self.geometry.page_size
    }
}

fn invalid(msg: &str) -> FtlError {
    FtlError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert!(cfg.gc_thres_lines_high <= cfg.gc_thres_lines_low);
        assert_eq!(cfg.geometry.pages_per_line(), PAGES_PER_BLOCK * CHANNELS * LUNS_PER_CHANNEL);
    }

    #[test]
    fn op_reduces_logical_pages() {
        let cfg = Config::default();
        let total = cfg.geometry.total_pages();
        assert_eq!(cfg.op_pages(), (total as f64 * 0.07).trunc() as usize);
        assert_eq!(cfg.logical_pages_per_partition() + cfg.op_pages(), total);
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut cfg = Config::default();
        cfg.geometry.pages_per_oneshot = 3;
        assert!(matches!(cfg.validate(), Err(FtlError::InvalidConfig(_))));

        let mut cfg = Config::default();
        cfg.geometry.planes_per_lun = 2;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.streams = cfg.geometry.total_lines();
        assert!(cfg.validate().is_err());
    }
}
