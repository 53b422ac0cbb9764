use crate::block::BlockError;
use crate::file::FileError;
use crate::mem::swapping::SwapSlot;
use crate::paging::MapError;
use core::fmt;

/// Why an `mmap` request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// The address is null or not page-aligned
    BadAddress,
    /// The file offset is not page-aligned
    BadOffset,
    /// Zero length, or a range that would run into kernel space
    BadLength,
    /// The file is empty
    EmptyFile,
    /// `munmap` was given an address that does not start a mapping
    NotAMapping,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAddress => write!(f, "mapping address is null or unaligned"),
            Self::BadOffset => write!(f, "file offset is not page-aligned"),
            Self::BadLength => write!(f, "mapping length is invalid"),
            Self::EmptyFile => write!(f, "cannot map an empty file"),
            Self::NotAMapping => write!(f, "address does not start a mapping"),
        }
    }
}

/// How the surrounding kernel should react to a [`VmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The process touched memory it may not. Kill it.
    InvalidAccess,
    /// Frames or swap ran out. Cannot be fixed at this layer.
    ResourceExhaustion,
    /// An internal invariant was broken. There is a bug elsewhere.
    CorruptState,
    /// An mmap request conflicted with existing pages. Report to the caller.
    MappingConflict,
    /// A device or file operation failed.
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    NullAddress,
    KernelAddress(usize),
    /// Fault on a page that is present, i.e. a write to a read-only mapping
    ProtectionViolation(usize),
    WriteToReadOnly(usize),
    NotMapped(usize),

    OutOfFrames,
    OutOfSwap,

    SwapSlotNotInUse(SwapSlot),
    SwapSlotDoubleFree(SwapSlot),
    /// A non-resident anonymous page without a swap slot
    MissingSwapSlot(usize),
    /// A frame and its owning page disagree about each other
    FrameOwnerMismatch,
    UnknownAddressSpace,

    AlreadyMapped(usize),
    AlreadyResident(usize),
    InvalidMapping(MmapError),

    Block(BlockError),
    File(FileError),
    Map(MapError),
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NullAddress
            | Self::KernelAddress(_)
            | Self::ProtectionViolation(_)
            | Self::WriteToReadOnly(_)
            | Self::NotMapped(_) => ErrorKind::InvalidAccess,
            Self::OutOfFrames | Self::OutOfSwap => ErrorKind::ResourceExhaustion,
            Self::SwapSlotNotInUse(_)
            | Self::SwapSlotDoubleFree(_)
            | Self::MissingSwapSlot(_)
            | Self::FrameOwnerMismatch
            | Self::UnknownAddressSpace => ErrorKind::CorruptState,
            Self::AlreadyMapped(_) | Self::AlreadyResident(_) | Self::InvalidMapping(_) => {
                ErrorKind::MappingConflict
            }
            Self::Block(_) | Self::File(_) | Self::Map(_) => ErrorKind::Io,
        }
    }

    /// Whether the faulting process must be terminated.
    pub fn is_process_fatal(&self) -> bool {
        self.kind() == ErrorKind::InvalidAccess
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullAddress => write!(f, "null address"),
            Self::KernelAddress(va) => write!(f, "{va:#X} is a kernel address"),
            Self::ProtectionViolation(va) => write!(f, "protection violation at {va:#X}"),
            Self::WriteToReadOnly(va) => write!(f, "write to read-only page {va:#X}"),
            Self::NotMapped(va) => write!(f, "{va:#X} is not mapped"),
            Self::OutOfFrames => write!(f, "no frame could be allocated or evicted"),
            Self::OutOfSwap => write!(f, "swap space exhausted"),
            Self::SwapSlotNotInUse(slot) => write!(f, "swap slot {slot} is not in use"),
            Self::SwapSlotDoubleFree(slot) => write!(f, "swap slot {slot} freed twice"),
            Self::MissingSwapSlot(va) => {
                write!(f, "anonymous page {va:#X} is neither resident nor swapped")
            }
            Self::FrameOwnerMismatch => write!(f, "frame and page reference disagree"),
            Self::UnknownAddressSpace => write!(f, "no such address space"),
            Self::AlreadyMapped(va) => write!(f, "{va:#X} is already mapped"),
            Self::AlreadyResident(va) => write!(f, "{va:#X} is already resident"),
            Self::InvalidMapping(e) => write!(f, "invalid mapping: {e}"),
            Self::Block(e) => write!(f, "swap device: {e}"),
            Self::File(e) => write!(f, "backing file: {e}"),
            Self::Map(e) => write!(f, "page table: {e}"),
        }
    }
}

impl core::error::Error for VmError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Block(e) => Some(e),
            Self::File(e) => Some(e),
            Self::Map(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BlockError> for VmError {
    fn from(e: BlockError) -> Self {
        Self::Block(e)
    }
}

impl From<FileError> for VmError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<MapError> for VmError {
    fn from(e: MapError) -> Self {
        Self::Map(e)
    }
}

impl From<MmapError> for VmError {
    fn from(e: MmapError) -> Self {
        Self::InvalidMapping(e)
    }
}

pub type Result<T> = core::result::Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(VmError::NullAddress.is_process_fatal());
        assert!(VmError::WriteToReadOnly(0x1000).is_process_fatal());
        assert!(!VmError::OutOfSwap.is_process_fatal());
        assert_eq!(VmError::OutOfFrames.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(
            VmError::from(MmapError::BadOffset).kind(),
            ErrorKind::MappingConflict
        );
        assert_eq!(VmError::from(BlockError::ReadError).kind(), ErrorKind::Io);
        assert_eq!(
            VmError::SwapSlotDoubleFree(SwapSlot::new(3)).kind(),
            ErrorKind::CorruptState
        );
    }
}
