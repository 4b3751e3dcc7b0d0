//! Device memory handling for the vcodec service
//!
//! Register blobs submitted by clients carry buffer references encoded as
//! a 10-bit handle plus a 22-bit offset. This crate resolves them into
//! device-visible addresses through an external buffer service, keeps the
//! referenced buffers pinned for the lifetime of a task, and models the
//! optional second-stage translation unit in front of each engine.

pub mod buffer;
pub mod extra;
pub mod mmu;
pub mod region;
pub mod sim;
pub mod translate;

pub use buffer::{BufferHandle, BufferService, DeviceMapping, MappingContext, PinnedBuffer};
pub use extra::{ExtraInfo, ExtraInfoElem, EXTRA_INFO_MAGIC, EXTRA_INFO_MAX_ELEMS};
pub use mmu::{DomainId, Iommu, MmuContext, MmuState, IOMMU_PAGE_SIZE};
pub use region::MemoryRegion;
pub use translate::{AddressTranslator, PpsLayout, PpsSpec, TranslateSpec, Translation};
