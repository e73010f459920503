use log::trace;

use crate::address::Ppa;
use crate::config::{BaseType, Geometry, LineId, StreamId};
use crate::error::{FtlError, Result};
use crate::line::LineManager;

/// Which cursor a write goes through. GC relocation never shares a host stream's pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerKind {
    Host(StreamId),
    Gc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WritePointer {
    pub ch: BaseType,
    pub lun: BaseType,
    pub pl: BaseType,
    pub pg: BaseType,
    pub line: LineId,
}

impl WritePointer {
    fn at_line(line: LineId) -> Self {
        WritePointer {
            ch: 0,
            lun: 0,
            pl: 0,
            pg: 0,
            line,
        }
    }

    /// Next page this pointer will program.
    pub fn ppa(&self) -> Ppa {
        Ppa::new(self.ch, self.lun, self.pl, self.line, self.pg)
    }
}

pub struct WritePointerSet {
    geo: Geometry,
    host: Vec<WritePointer>,
    gc: WritePointer,
}

impl WritePointerSet {
    /// Binds one pointer per stream, then the GC pointer, each to a fresh line.
    pub fn new(geo: &Geometry, streams: BaseType, lines: &mut LineManager) -> Result<Self> {
        let host = (0..streams)
            .map(|_| lines.acquire_free_line().map(WritePointer::at_line))
            .collect::<Result<Vec<_>>>()?;
        let gc = WritePointer::at_line(lines.acquire_free_line()?);

        Ok(WritePointerSet {
            geo: *geo,
            host,
            gc,
        })
    }

    pub fn streams(&self) -> BaseType {
        self.host.len()
    }

    pub fn pointer(&self, kind: PointerKind) -> Result<&WritePointer> {
        match kind {
            PointerKind::Host(stream) => self.host.get(stream).ok_or(FtlError::InvalidStream(stream)),
            PointerKind::Gc => Ok(&self.gc),
        }
    }

    fn pointer_mut(&mut self, kind: PointerKind) -> Result<&mut WritePointer> {
        match kind {
            PointerKind::Host(stream) => self
                .host
                .get_mut(stream)
                .ok_or(FtlError::InvalidStream(stream)),
            PointerKind::Gc => Ok(&mut self.gc),
        }
    }

    pub fn current(&self, kind: PointerKind) -> Result<Ppa> {
        self.pointer(kind).map(WritePointer::ppa)
    }

    /// Steps the cursor past the page just programmed.
    ///
    /// Pages fill a one-shot group on one (channel, lun), then the group
    /// stripes across channels and luns before moving to the next group.
    /// Returns the line that was retired, if this step exhausted it.
    pub fn advance(&mut self, kind: PointerKind, lines: &mut LineManager) -> Result<Option<LineId>> {
        let geo = self.geo;
        let wp = self.pointer_mut(kind)?;

        wp.pg += 1;
        if wp.pg % geo.pages_per_oneshot != 0 {
            return Ok(None);
        }
        wp.pg -= geo.pages_per_oneshot;

        wp.ch += 1;
        if wp.ch < geo.channels {
            return Ok(None);
        }
        wp.ch = 0;

        wp.lun += 1;
        if wp.lun < geo.luns_per_channel {
            return Ok(None);
        }
        wp.lun = 0;

        wp.pg += geo.pages_per_oneshot;
        if wp.pg < geo.pages_per_block {
            return Ok(None);
        }

        let exhausted = wp.line;
        let state = lines.close_line(exhausted)?;
        let next = lines.acquire_free_line()?;
        *wp = WritePointer::at_line(next);
        trace!("{:?} pointer retired line {} as {:?}, now on line {}", kind, exhausted, state, next);

        Ok(Some(exhausted))
    }
}
