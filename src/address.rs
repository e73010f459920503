use std::fmt;

use num_integer::div_rem;

use crate::config::{BaseType, Geometry, LineId};
use crate::error::{FtlError, Result};

/// Physical page address: one NAND page in the (channel, lun, plane, block, page) hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ppa {
    pub ch: BaseType,
    pub lun: BaseType,
    pub pl: BaseType,
    pub blk: BaseType,
    pub pg: BaseType,
}

impl Ppa {
    pub fn new(ch: BaseType, lun: BaseType, pl: BaseType, blk: BaseType, pg: BaseType) -> Self {
        Ppa { ch, lun, pl, blk, pg }
    }

    pub fn with_page(self, pg: BaseType) -> Self {
        Ppa { pg, ..self }
    }

    /// Line this page belongs to.
    pub fn line(&self) -> LineId {
        self.blk
    }
}

impl fmt::Display for Ppa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{}/lun{}/pl{}/blk{}/pg{}",
            self.ch, self.lun, self.pl, self.blk, self.pg
        )
    }
}

/// Flat-index conversion and bounds checks over one partition's geometry.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    geo: Geometry,
    ch_stride: BaseType,
    lun_stride: BaseType,
    pl_stride: BaseType,
    blk_stride: BaseType,
}

impl AddressSpace {
    pub fn new(geo: &Geometry) -> Self {
        let blk_stride = geo.pages_per_block;
        let pl_stride = blk_stride * geo.blocks_per_plane;
        let lun_stride = pl_stride * geo.planes_per_lun;
        let ch_stride = lun_stride * geo.luns_per_channel;

        AddressSpace {
            geo: *geo,
            ch_stride,
            lun_stride,
            pl_stride,
            blk_stride,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn total_pages(&self) -> BaseType {
        self.geo.total_pages()
    }

    pub fn total_blocks(&self) -> BaseType {
        self.geo.total_blocks()
    }

    pub fn valid(&self, ppa: &Ppa) -> bool {
        ppa.ch < self.geo.channels
            && ppa.lun < self.geo.luns_per_channel
            && ppa.pl < self.geo.planes_per_lun
            && ppa.blk < self.geo.blocks_per_plane
            && ppa.pg < self.geo.pages_per_block
    }

    pub fn page_index(&self, ppa: &Ppa) -> Result<BaseType> {
        if !self.valid(ppa) {
            return Err(FtlError::InvalidPpa(*ppa));
        }
        Ok(ppa.ch * self.ch_stride
            + ppa.lun * self.lun_stride
            + ppa.pl * self.pl_stride
            + ppa.blk * self.blk_stride
            + ppa.pg)
    }

    pub fn block_index(&self, ppa: &Ppa) -> Result<BaseType> {
        Ok(self.page_index(ppa)? / self.blk_stride)
    }

    /// Inverse of [`AddressSpace::page_index`].
    pub fn ppa_at(&self, index: BaseType) -> Result<Ppa> {
        if index >= self.total_pages() {
            return Err(FtlError::PageIndexOutOfRange {
                index,
                total: self.total_pages(),
            });
        }
        let (ch, rest) = div_rem(index, self.ch_stride);
        let (lun, rest) = div_rem(rest, self.lun_stride);
        let (pl, rest) = div_rem(rest, self.pl_stride);
        let (blk, pg) = div_rem(rest, self.blk_stride);
        Ok(Ppa::new(ch, lun, pl, blk, pg))
    }

    pub fn group_origin(&self, ppa: &Ppa) -> Ppa {
        ppa.with_page(ppa.pg - ppa.pg % self.geo.pages_per_oneshot)
    }

    /// True when `ppa` is the last page of its one-shot program group.
    pub fn completes_group(&self, ppa: &Ppa) -> bool {
        (ppa.pg + 1) % self.geo.pages_per_oneshot == 0
    }

    pub fn same_group(&self, a: &Ppa, b: &Ppa) -> bool {
        a.ch == b.ch
            && a.lun == b.lun
            && a.pl == b.pl
            && a.blk == b.blk
            && a.pg / self.geo.pages_per_oneshot == b.pg / self.geo.pages_per_oneshot
    }

    /// First page of every block making up `line`.
    pub fn line_blocks(&self, line: LineId) -> impl Iterator<Item = Ppa> + '_ {
        (0..self.geo.channels).flat_map(move |ch| {
            (0..self.geo.luns_per_channel).map(move |lun| Ppa::new(ch, lun, 0, line, 0))
        })
    }
}
