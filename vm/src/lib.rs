//! Demand-paged virtual memory for KidneyOS user processes.
//!
//! Pages start out pending and are materialized on first fault: anonymous
//! pages from zero or from swap, file-backed pages from their file. A single
//! pool of user frames is shared by every address space and refilled by
//! evicting pages with a second-chance clock.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod address_space;
pub mod block;
pub mod config;
#[cfg(any(test, feature = "emulation"))]
pub mod emulation;
pub mod error;
pub mod fault;
pub mod file;
pub mod fork;
pub mod mem;
pub mod mmap;
pub mod page;
pub mod paging;
pub mod spt;
pub mod sync;
pub mod system;
pub mod user;
pub mod virtual_memory;

#[cfg(test)]
mod scenario_test;

pub use address_space::AddressSpaceId;
pub use config::VmConfig;
pub use error::{ErrorKind, MmapError, Result, VmError};
pub use fault::PageFault;
pub use page::{PageInfo, PageLoader, PageTarget, PageType, SegmentLoader};
pub use virtual_memory::{VirtualMemory, VmStats};
