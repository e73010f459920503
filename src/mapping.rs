use crate::address::{AddressSpace, Ppa};
use crate::config::Lpn;
use crate::error::{FtlError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)] // for Vec resize
pub enum L2PValue {
    Unmapped,
    Mapped(Ppa),
}

impl L2PValue {
    pub fn mapped(&self) -> bool {
        matches!(self, L2PValue::Mapped(_))
    }

    pub fn ppa(&self) -> Option<Ppa> {
        match self {
            L2PValue::Mapped(ppa) => Some(*ppa),
            L2PValue::Unmapped => None,
        }
    }
}

/// Forward (LPN -> PPA) and reverse (PPA -> LPN) maps of one partition.
pub struct AddressTranslator {
    l2p: Vec<L2PValue>,
    p2l: Vec<Option<Lpn>>,
    space: AddressSpace,
}

impl AddressTranslator {
    pub fn new(space: AddressSpace) -> Self {
        let total = space.total_pages();
        AddressTranslator {
            l2p: vec![L2PValue::Unmapped; total],
            p2l: vec![None; total],
            space,
        }
    }

    pub fn get(&self, lpn: Lpn) -> Result<L2PValue> {
        self.l2p
            .get(lpn)
            .copied()
            .ok_or(FtlError::LpnOutOfRange {
                lpn,
                total: self.l2p.len(),
            })
    }

    pub fn set(&mut self, lpn: Lpn, value: L2PValue) -> Result<()> {
        let total = self.l2p.len();
        let slot = self
            .l2p
            .get_mut(lpn)
            .ok_or(FtlError::LpnOutOfRange { lpn, total })?;
        *slot = value;
        Ok(())
    }

    pub fn get_reverse(&self, ppa: &Ppa) -> Result<Option<Lpn>> {
        let idx = self.space.page_index(ppa)?;
        Ok(self.p2l[idx])
    }

    pub fn set_reverse(&mut self, ppa: &Ppa, lpn: Option<Lpn>) -> Result<()> {
        let idx = self.space.page_index(ppa)?;
        self.p2l[idx] = lpn;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.l2p.len()
    }

    pub fn mapped_count(&self) -> usize {
        self.l2p.iter().filter(|v| v.mapped()).count()
    }

    /// Every mapped (lpn, ppa) pair, in LPN order.
    pub fn iter_mapped(&self) -> impl Iterator<Item = (Lpn, Ppa)> + '_ {
        self.l2p
            .iter()
            .enumerate()
            .filter_map(|(lpn, v)| v.ppa().map(|ppa| (lpn, ppa)))
    }
}
