//! Flash translation layer for an SSD emulator: page-level address
//! translation, line lifecycle, greedy garbage collection under write-credit
//! flow control, and multi-stream placement, striped across independent
//! partitions of a namespace.

pub mod address;
pub mod config;
pub mod error;
pub mod flow_control;
pub mod ftl;
pub mod gc;
pub mod line;
pub mod mapping;
pub mod namespace;
pub mod timing;
pub mod write_pointer;

pub use address::{AddressSpace, Ppa};
pub use config::{Config, Geometry};
pub use error::{FtlError, Result};
pub use ftl::{FtlPartition, FtlStats};
pub use gc::GcOutcome;
pub use namespace::{Completion, LbaRange, Namespace, Opcode, Request, Status};
pub use timing::{DramWriteBuffer, LatencyModel, NandTiming, WriteBuffer};
