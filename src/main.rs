#[macro_use]
extern crate log;
extern crate simplelog;

use rand::prelude::*;
use simplelog::*;
use stream_ftl::{Config, DramWriteBuffer, LatencyModel, Namespace, Request, Status, WriteBuffer};
use time::macros::format_description;

// pages per host request
const CHUNK_PAGES: u64 = 8;
const WRITE_BUFFER_BYTES: usize = 64 << 20;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();

    SimpleLogger::init(LevelFilter::Info, log_cfg)?;

    let cfg = Config::default();
    let secs = cfg.geometry.sectors_per_page() as u64;
    let streams = cfg.streams;
    let mut ns = Namespace::new(cfg)?;
    let mut nand = LatencyModel::default();
    let mut wb = DramWriteBuffer::new(WRITE_BUFFER_BYTES, 8_000);

    let chunk = CHUNK_PAGES * secs;
    let chunks = ns.capacity_lbas() / chunk;
    let mut now = 0;

    for c in 0..chunks {
        now = submit(&mut ns, &mut nand, &mut wb, Request::write(c * chunk, chunk, 0, now))?;
    }
    info!("Drive preconditioned, WAF {:.3}", ns.stats().write_amplification());

    let mut rng: SmallRng = SmallRng::seed_from_u64(7);

    for c in 0..4 {
        for _ in 0..chunks {
            let slba = rng.gen_range(0..chunks) * chunk;
            let stream = rng.gen_range(0..streams);
            now = submit(&mut ns, &mut nand, &mut wb, Request::write(slba, chunk, stream, now))?;
        }
        let stats = ns.stats();
        info!(
            "Capacity {} randomly written: WAF {:.3}, {} gc passes, {} lines erased, t = {} ms",
            c,
            stats.write_amplification(),
            stats.gc_runs,
            stats.erased_lines,
            now / 1_000_000
        );
    }

    let flushed = ns.handle(&Request::flush(now), &mut nand, &mut wb)?;
    ns.check_invariants()?;
    info!(
        "Flushed at {} ms, background io {:?}",
        flushed.expire_time / 1_000_000,
        nand.background()
    );
    Ok(())
}

/// Issues one request, releasing its buffer space once it completes.
fn submit(
    ns: &mut Namespace,
    nand: &mut LatencyModel,
    wb: &mut DramWriteBuffer,
    req: Request,
) -> stream_ftl::Result<u64> {
    let done = ns.handle(&req, nand, wb)?;
    if done.status != Status::Success {
        warn!("request at lba {} rejected: {:?}", req.slba, done.status);
        return Ok(req.stime);
    }
    wb.release(done.buffered_bytes);
    Ok(done.expire_time)
}
