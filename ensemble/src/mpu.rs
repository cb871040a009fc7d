//! Armv8-M Memory Protection Unit configuration.
//!
//! The MPU is programmed once, at boot, from an ordered table of
//! [`MemoryRegion`]s. Every region names one of up to eight memory attributes
//! stored in MAIR0/MAIR1. Attributes must be defined before any region using
//! them is loaded, and the unit is only enabled once the whole table has been
//! written.
//!
//! When regions overlap, the region with the lowest number (i.e. the one
//! declared first in the table) decides the policy. Addresses not covered by
//! any region fall back to the background policy selected through
//! [`Control`]. That policy is not modeled here and must not be assumed to
//! be safe.
//!
//! For more information, please see [Armv8-M Architecture Reference Manual],
//! section B3.5 "Protected Memory System Architecture".
//!
//! [Armv8-M Architecture Reference Manual]: https://developer.arm.com/documentation/ddi0553/latest

use core::fmt;

use bitflags::bitflags;

use crate::cpu::{dmb, dsb, isb};
use crate::mmio::{Mmio, SCS_BASE};

/// MPU Type Register.
pub(crate) const MPU_TYPE: usize = SCS_BASE + 0xd90;

/// MPU Control Register.
pub(crate) const MPU_CTRL: usize = SCS_BASE + 0xd94;

/// MPU Region Number Register.
pub(crate) const MPU_RNR: usize = SCS_BASE + 0xd98;

/// MPU Region Base Address Register.
pub(crate) const MPU_RBAR: usize = SCS_BASE + 0xd9c;

/// MPU Region Limit Address Register.
pub(crate) const MPU_RLAR: usize = SCS_BASE + 0xda0;

/// MPU Memory Attribute Indirection Register 0 (attributes 0 to 3).
pub(crate) const MPU_MAIR0: usize = SCS_BASE + 0xdc0;

/// MPU Memory Attribute Indirection Register 1 (attributes 4 to 7).
pub(crate) const MPU_MAIR1: usize = SCS_BASE + 0xdc4;

/// Number of memory attributes.
pub const NATTRS: usize = 8;

/// Maximum number of regions handled by this driver.
pub const MAX_REGIONS: usize = 16;

/// Region addresses have a 32-byte granule.
const GRANULE_MASK: u32 = 0x1f;

/// RBAR/RLAR address field.
const ADDR_MASK: u32 = !GRANULE_MASK;

/// RLAR.EN.
const RLAR_EN: u32 = 1 << 0;

/// MPU error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The attribute index does not fit in MAIR0/MAIR1.
    InvalidAttrIndex(u8),

    /// The limit address of the region is lower than its base address.
    LimitBelowBase {
        /// Position of the region in the table.
        index: usize,
    },

    /// The base address is not aligned to 32 bytes.
    MisalignedBase {
        /// Position of the region in the table.
        index: usize,

        /// Offending base address.
        base: u32,
    },

    /// The limit address does not end a 32-byte granule.
    MisalignedLimit {
        /// Position of the region in the table.
        index: usize,

        /// Offending limit address.
        limit: u32,
    },

    /// The region references an attribute that has not been defined.
    UndefinedAttr {
        /// Position of the region in the table.
        index: usize,

        /// Referenced attribute index.
        attr: u8,
    },

    /// The table has more regions than the MPU implements.
    TooManyRegions {
        /// Number of regions in the table.
        requested: usize,

        /// Number of regions implemented by the MPU.
        available: usize,
    },

    /// The table is well-formed, but the region did not read back as
    /// written.
    Rejected {
        /// Region number.
        index: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidAttrIndex(idx) => {
                write!(f, "invalid attribute index: {idx}")
            }
            Error::LimitBelowBase { index } => {
                write!(f, "region {index}: limit is below base")
            }
            Error::MisalignedBase { index, base } => {
                write!(f, "region {index}: misaligned base {base:#010x}")
            }
            Error::MisalignedLimit { index, limit } => {
                write!(f, "region {index}: misaligned limit {limit:#010x}")
            }
            Error::UndefinedAttr { index, attr } => {
                write!(f, "region {index}: attribute {attr} is not defined")
            }
            Error::TooManyRegions {
                requested,
                available,
            } => {
                write!(f, "{requested} regions requested, {available} available")
            }
            Error::Rejected { index } => {
                write!(f, "region {index} rejected by the MPU")
            }
        }
    }
}

/// Device memory ordering.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Non-gathering, non-reordering, no early write acknowledgement.
    NGnRnE,

    /// Non-gathering, non-reordering, early write acknowledgement.
    NGnRE,

    /// Non-gathering, reordering, early write acknowledgement.
    NGRE,

    /// Gathering, reordering, early write acknowledgement.
    GRE,
}

impl DeviceKind {
    const fn encode(self) -> u8 {
        match self {
            DeviceKind::NGnRnE => 0b00,
            DeviceKind::NGnRE => 0b01,
            DeviceKind::NGRE => 0b10,
            DeviceKind::GRE => 0b11,
        }
    }

    fn decode(bits: u8) -> DeviceKind {
        match bits & 0b11 {
            0b00 => DeviceKind::NGnRnE,
            0b01 => DeviceKind::NGnRE,
            0b10 => DeviceKind::NGRE,
            _ => DeviceKind::GRE,
        }
    }
}

/// Cacheability of normal memory for one cache level (inner or outer).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    /// Non-cacheable.
    NonCacheable,

    /// Write-through.
    WriteThrough {
        /// Transient hint.
        transient: bool,

        /// Read-allocate.
        read_allocate: bool,

        /// Write-allocate.
        write_allocate: bool,
    },

    /// Write-back.
    WriteBack {
        /// Transient hint.
        transient: bool,

        /// Read-allocate.
        read_allocate: bool,

        /// Write-allocate.
        write_allocate: bool,
    },
}

impl CachePolicy {
    /// Returns the 4-bit MAIR encoding: `NT:WB:RA:WA`, with `0b0100` meaning
    /// non-cacheable.
    pub const fn encode(self) -> u8 {
        let (nt, wb, ra, wa) = match self {
            CachePolicy::NonCacheable => return 0b0100,
            CachePolicy::WriteThrough {
                transient,
                read_allocate,
                write_allocate,
            } => (!transient, false, read_allocate, write_allocate),
            CachePolicy::WriteBack {
                transient,
                read_allocate,
                write_allocate,
            } => (!transient, true, read_allocate, write_allocate),
        };
        ((nt as u8) << 3) | ((wb as u8) << 2) | ((ra as u8) << 1) | wa as u8
    }

    /// Decodes a 4-bit MAIR encoding. Returns `None` for the device marker
    /// (`0b0000`). Transient encodings without an allocation hint other than
    /// `0b0100` are reserved and never produced by [`CachePolicy::encode`].
    pub fn decode(nibble: u8) -> Option<CachePolicy> {
        let nibble = nibble & 0xf;
        if nibble == 0b0100 {
            return Some(CachePolicy::NonCacheable);
        }
        if nibble == 0 {
            return None;
        }

        let transient = nibble & 0b1000 == 0;
        let read_allocate = nibble & 0b0010 != 0;
        let write_allocate = nibble & 0b0001 != 0;
        let policy = if nibble & 0b0100 != 0 {
            CachePolicy::WriteBack {
                transient,
                read_allocate,
                write_allocate,
            }
        } else {
            CachePolicy::WriteThrough {
                transient,
                read_allocate,
                write_allocate,
            }
        };
        Some(policy)
    }
}

/// A memory attribute: the value stored in one MAIR byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryAttribute {
    /// Device memory.
    Device(DeviceKind),

    /// Normal memory with independent inner and outer cache policies.
    Normal {
        /// Inner cache policy.
        inner: CachePolicy,

        /// Outer cache policy.
        outer: CachePolicy,
    },
}

impl MemoryAttribute {
    /// Normal memory, write-through, read-allocate, transient.
    pub const NORMAL_WT_RA_TRANSIENT: MemoryAttribute =
        MemoryAttribute::normal(CachePolicy::WriteThrough {
            transient: true,
            read_allocate: true,
            write_allocate: false,
        });

    /// Device memory, nGnRE.
    pub const DEVICE_NGNRE: MemoryAttribute =
        MemoryAttribute::Device(DeviceKind::NGnRE);

    /// Normal memory, write-back, read/write-allocate.
    pub const NORMAL_WB_RA_WA: MemoryAttribute =
        MemoryAttribute::normal(CachePolicy::WriteBack {
            transient: false,
            read_allocate: true,
            write_allocate: true,
        });

    /// Normal memory, write-through, read-allocate.
    pub const NORMAL_WT_RA: MemoryAttribute =
        MemoryAttribute::normal(CachePolicy::WriteThrough {
            transient: false,
            read_allocate: true,
            write_allocate: false,
        });

    /// Normal memory, non-cacheable.
    pub const NORMAL_NON_CACHEABLE: MemoryAttribute =
        MemoryAttribute::normal(CachePolicy::NonCacheable);

    /// Normal memory using the same policy for inner and outer caches.
    pub const fn normal(policy: CachePolicy) -> MemoryAttribute {
        MemoryAttribute::Normal {
            inner: policy,
            outer: policy,
        }
    }

    /// Returns the MAIR byte.
    pub const fn encode(self) -> u8 {
        match self {
            MemoryAttribute::Device(kind) => kind.encode() << 2,
            MemoryAttribute::Normal { inner, outer } => {
                (outer.encode() << 4) | inner.encode()
            }
        }
    }

    /// Decodes a MAIR byte. Returns `None` for UNPREDICTABLE encodings.
    pub fn decode(byte: u8) -> Option<MemoryAttribute> {
        let outer = byte >> 4;
        let inner = byte & 0xf;
        if outer == 0 {
            if inner & 0b11 != 0 {
                return None;
            }
            return Some(MemoryAttribute::Device(DeviceKind::decode(inner >> 2)));
        }
        Some(MemoryAttribute::Normal {
            inner: CachePolicy::decode(inner)?,
            outer: CachePolicy::decode(outer)?,
        })
    }
}

/// Index of a memory attribute in MAIR0/MAIR1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AttrIndex(u8);

impl AttrIndex {
    /// Normal memory, write-through, read-allocate, transient.
    pub const NORMAL_WT_RA_TRANSIENT: AttrIndex = AttrIndex(0);

    /// Device memory, nGnRE.
    pub const DEVICE_NGNRE: AttrIndex = AttrIndex(1);

    /// Normal memory, write-back, read/write-allocate.
    pub const NORMAL_WB_RA_WA: AttrIndex = AttrIndex(2);

    /// Normal memory, write-through, read-allocate.
    pub const NORMAL_WT_RA: AttrIndex = AttrIndex(3);

    /// Normal memory, non-cacheable.
    pub const NORMAL_NON_CACHEABLE: AttrIndex = AttrIndex(4);

    /// Returns an attribute index. It is checked when the attribute is
    /// defined or a region using it is loaded.
    pub const fn new(idx: u8) -> AttrIndex {
        AttrIndex(idx)
    }

    /// Returns the raw index.
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Attributes defined on every boot, shared by all profiles.
pub const STANDARD_ATTRIBUTES: [(AttrIndex, MemoryAttribute); 5] = [
    (
        AttrIndex::NORMAL_WT_RA_TRANSIENT,
        MemoryAttribute::NORMAL_WT_RA_TRANSIENT,
    ),
    (AttrIndex::DEVICE_NGNRE, MemoryAttribute::DEVICE_NGNRE),
    (AttrIndex::NORMAL_WB_RA_WA, MemoryAttribute::NORMAL_WB_RA_WA),
    (AttrIndex::NORMAL_WT_RA, MemoryAttribute::NORMAL_WT_RA),
    (
        AttrIndex::NORMAL_NON_CACHEABLE,
        MemoryAttribute::NORMAL_NON_CACHEABLE,
    ),
];

/// Shareability domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Shareability {
    /// Non-shareable.
    Non,

    /// Outer shareable.
    Outer,

    /// Inner shareable.
    Inner,
}

impl Shareability {
    const fn encode(self) -> u32 {
        match self {
            Shareability::Non => 0b00,
            Shareability::Outer => 0b10,
            Shareability::Inner => 0b11,
        }
    }

    fn decode(bits: u32) -> Shareability {
        match bits & 0b11 {
            0b10 => Shareability::Outer,
            0b11 => Shareability::Inner,
            _ => Shareability::Non,
        }
    }
}

bitflags! {
    /// Access permissions of a region.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Access: u8 {
        /// Writes are not permitted.
        const READ_ONLY = 1 << 0;

        /// Unprivileged code may access the region.
        const NON_PRIVILEGED = 1 << 1;

        /// Instruction fetches are not permitted.
        const EXECUTE_NEVER = 1 << 2;
    }
}

bitflags! {
    /// MPU_CTRL bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Control: u32 {
        /// Enables the MPU.
        const ENABLE = 1 << 0;

        /// Keeps the MPU enabled in HardFault and NMI handlers.
        const HFNMIENA = 1 << 1;

        /// Privileged accesses outside every region use the default memory
        /// map as background region.
        const PRIVDEFENA = 1 << 2;
    }
}

/// One entry of a region table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Human readable name.
    pub name: &'static str,

    /// First address of the region.
    pub base: u32,

    /// Last address of the region (inclusive).
    pub limit: u32,

    /// Memory attribute.
    pub attr: AttrIndex,

    /// Shareability domain.
    pub shareability: Shareability,

    /// Access permissions.
    pub access: Access,
}

impl MemoryRegion {
    /// Creates a region covering `base..=limit`.
    pub const fn new(
        name: &'static str,
        base: u32,
        limit: u32,
        attr: AttrIndex,
        shareability: Shareability,
        access: Access,
    ) -> MemoryRegion {
        MemoryRegion {
            name,
            base,
            limit,
            attr,
            shareability,
            access,
        }
    }

    /// Returns true if `addr` belongs to the region.
    pub fn contains(&self, addr: u32) -> bool {
        (self.base..=self.limit).contains(&addr)
    }

    /// Returns the RBAR value: `BASE | SH << 3 | AP << 1 | XN`, where
    /// `AP = RO << 1 | NP`.
    pub fn rbar(&self) -> u32 {
        let ro = self.access.contains(Access::READ_ONLY) as u32;
        let np = self.access.contains(Access::NON_PRIVILEGED) as u32;
        let xn = self.access.contains(Access::EXECUTE_NEVER) as u32;
        let ap = (ro << 1) | np;
        (self.base & ADDR_MASK)
            | (self.shareability.encode() << 3)
            | (ap << 1)
            | xn
    }

    /// Returns the RLAR value: `LIMIT | ATTR << 1 | EN`.
    pub fn rlar(&self) -> u32 {
        (self.limit & ADDR_MASK) | ((self.attr.0 as u32 & 0x7) << 1) | RLAR_EN
    }

    /// Checks the region in position `index` of a table against the set of
    /// defined attributes.
    fn validate(&self, index: usize, defined: AttrSet) -> Result<(), Error> {
        if self.limit < self.base {
            return Err(Error::LimitBelowBase { index });
        }
        if self.base & GRANULE_MASK != 0 {
            return Err(Error::MisalignedBase {
                index,
                base: self.base,
            });
        }
        if self.limit & GRANULE_MASK != GRANULE_MASK {
            return Err(Error::MisalignedLimit {
                index,
                limit: self.limit,
            });
        }
        if self.attr.0 as usize >= NATTRS {
            return Err(Error::InvalidAttrIndex(self.attr.0));
        }
        if !defined.contains(self.attr) {
            return Err(Error::UndefinedAttr {
                index,
                attr: self.attr.0,
            });
        }
        Ok(())
    }
}

/// Set of defined attribute indexes.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AttrSet(u8);

impl AttrSet {
    /// Returns a set with every index in `attrs`.
    pub fn of(attrs: &[(AttrIndex, MemoryAttribute)]) -> AttrSet {
        let mut set = AttrSet::default();
        for &(idx, _) in attrs {
            set.insert(idx);
        }
        set
    }

    /// Adds an index to the set. Out of range indexes are ignored.
    pub fn insert(&mut self, idx: AttrIndex) {
        if (idx.0 as usize) < NATTRS {
            self.0 |= 1 << idx.0;
        }
    }

    /// Returns true if the index belongs to the set.
    pub fn contains(&self, idx: AttrIndex) -> bool {
        (idx.0 as usize) < NATTRS && self.0 & (1 << idx.0) != 0
    }
}

/// Ordered region table. Earlier entries take precedence on overlap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegionTable<'a>(pub &'a [MemoryRegion]);

impl<'a> RegionTable<'a> {
    /// Returns the regions of the table.
    pub fn regions(&self) -> &'a [MemoryRegion] {
        self.0
    }

    /// Validates the table without touching the hardware.
    pub fn validate(&self, defined: AttrSet, available: usize) -> Result<(), Error> {
        if self.0.len() > available {
            return Err(Error::TooManyRegions {
                requested: self.0.len(),
                available,
            });
        }
        for (index, region) in self.0.iter().enumerate() {
            region.validate(index, defined)?;
        }
        Ok(())
    }

    /// Returns the position and entry of the region deciding the policy of
    /// `addr`, which is the first one in the table containing it.
    pub fn resolve(&self, addr: u32) -> Option<(usize, &'a MemoryRegion)> {
        self.0.iter().enumerate().find(|(_, region)| region.contains(addr))
    }
}

/// Region as read back from the MPU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProgrammedRegion {
    /// First address of the region.
    pub base: u32,

    /// Last address of the region (inclusive).
    pub limit: u32,

    /// Memory attribute index.
    pub attr: AttrIndex,

    /// Shareability domain.
    pub shareability: Shareability,

    /// Access permissions.
    pub access: Access,
}

impl ProgrammedRegion {
    /// Decodes a pair of RBAR/RLAR values. Returns `None` if the region is
    /// disabled.
    pub fn decode(rbar: u32, rlar: u32) -> Option<ProgrammedRegion> {
        if rlar & RLAR_EN == 0 {
            return None;
        }

        let ap = (rbar >> 1) & 0b11;
        let mut access = Access::empty();
        access.set(Access::READ_ONLY, ap & 0b10 != 0);
        access.set(Access::NON_PRIVILEGED, ap & 0b01 != 0);
        access.set(Access::EXECUTE_NEVER, rbar & 1 != 0);

        Some(ProgrammedRegion {
            base: rbar & ADDR_MASK,
            limit: (rlar & ADDR_MASK) | GRANULE_MASK,
            attr: AttrIndex(((rlar >> 1) & 0x7) as u8),
            shareability: Shareability::decode(rbar >> 3),
            access,
        })
    }

    /// Returns true if `addr` belongs to the region.
    pub fn contains(&self, addr: u32) -> bool {
        (self.base..=self.limit).contains(&addr)
    }
}

/// Policy applied to an address by the programmed MPU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Region number deciding the policy.
    pub region: usize,

    /// Attribute index of the region.
    pub attr: AttrIndex,

    /// Decoded attribute, `None` if MAIR holds an UNPREDICTABLE encoding.
    pub attribute: Option<MemoryAttribute>,

    /// Shareability domain.
    pub shareability: Shareability,

    /// Access permissions.
    pub access: Access,
}

/// Raw MPU state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// MPU_CTRL.
    pub ctrl: u32,

    /// MPU_MAIR0 and MPU_MAIR1.
    pub mair: [u32; 2],

    /// RBAR/RLAR pairs of the implemented regions. Regions past the
    /// implemented count are zero.
    pub regions: [(u32, u32); MAX_REGIONS],
}

/// Handle to the Memory Protection Unit.
///
/// The MPU is a single writer resource: it must be configured before any
/// other execution context exists, and never from an interrupt handler.
#[derive(Debug)]
pub struct Mpu<B: Mmio> {
    bus: B,
    defined: AttrSet,
}

impl<B: Mmio> Mpu<B> {
    /// Returns a new [`Mpu`] accessed through `bus`. No attribute is
    /// considered defined yet.
    pub const fn new(bus: B) -> Mpu<B> {
        Mpu {
            bus,
            defined: AttrSet(0),
        }
    }

    /// Returns the number of regions implemented by the MPU.
    pub fn regions(&self) -> usize {
        let dregion = unsafe { (self.bus.read32(MPU_TYPE) >> 8) & 0xff };
        (dregion as usize).min(MAX_REGIONS)
    }

    /// Stores a memory attribute in MAIR0/MAIR1.
    pub fn define_attribute(
        &mut self,
        idx: AttrIndex,
        attr: MemoryAttribute,
    ) -> Result<(), Error> {
        let n = idx.0 as usize;
        if n >= NATTRS {
            return Err(Error::InvalidAttrIndex(idx.0));
        }

        let addr = if n < 4 { MPU_MAIR0 } else { MPU_MAIR1 };
        let shift = (n % 4) * 8;
        let mask = 0xff << shift;
        let val = (attr.encode() as u32) << shift;
        unsafe { self.bus.modify32(addr, |mair| (mair & !mask) | val) };

        self.defined.insert(idx);
        Ok(())
    }

    /// Defines every attribute of [`STANDARD_ATTRIBUTES`].
    pub fn define_standard_attributes(&mut self) -> Result<(), Error> {
        for (idx, attr) in STANDARD_ATTRIBUTES {
            self.define_attribute(idx, attr)?;
        }
        Ok(())
    }

    /// Returns the attribute stored at `idx`.
    pub fn attribute(&self, idx: AttrIndex) -> Option<MemoryAttribute> {
        let n = idx.0 as usize;
        if n >= NATTRS {
            return None;
        }
        let addr = if n < 4 { MPU_MAIR0 } else { MPU_MAIR1 };
        let mair = unsafe { self.bus.read32(addr) };
        MemoryAttribute::decode((mair >> ((n % 4) * 8)) as u8)
    }

    /// Returns the set of attributes defined through this handle.
    pub fn defined(&self) -> AttrSet {
        self.defined
    }

    /// Disables the MPU.
    pub fn disable(&self) {
        dmb();
        unsafe { self.bus.write32(MPU_CTRL, 0) };
    }

    /// Enables the MPU with the provided control options.
    pub fn enable(&self, ctrl: Control) {
        unsafe { self.bus.write32(MPU_CTRL, (ctrl | Control::ENABLE).bits()) };
        dsb();
        isb();
    }

    /// Returns true if the MPU is enabled.
    pub fn is_enabled(&self) -> bool {
        unsafe { self.bus.read32(MPU_CTRL) & Control::ENABLE.bits() != 0 }
    }

    /// Programs the MPU with `table` and enables it.
    ///
    /// The whole table is validated first. On a validation error the MPU is
    /// left untouched. The MPU is disabled while the regions are written, and
    /// if a region does not read back as written it stays disabled. Unused
    /// implemented regions are cleared, so loading the same table twice
    /// leaves the MPU in the same state.
    pub fn load_regions(
        &mut self,
        table: RegionTable,
        ctrl: Control,
    ) -> Result<(), Error> {
        let available = self.regions();
        table.validate(self.defined, available)?;
        let table = table.regions();

        self.disable();

        for (index, region) in table.iter().enumerate() {
            let (rbar, rlar) = (region.rbar(), region.rlar());
            unsafe {
                self.bus.write32(MPU_RNR, index as u32);
                self.bus.write32(MPU_RBAR, rbar);
                self.bus.write32(MPU_RLAR, rlar);

                if self.bus.read32(MPU_RBAR) != rbar
                    || self.bus.read32(MPU_RLAR) != rlar
                {
                    return Err(Error::Rejected { index });
                }
            }
        }

        for index in table.len()..available {
            unsafe {
                self.bus.write32(MPU_RNR, index as u32);
                self.bus.write32(MPU_RBAR, 0);
                self.bus.write32(MPU_RLAR, 0);
            }
        }

        self.enable(ctrl);
        Ok(())
    }

    /// Returns the region programmed at `rnr`, if enabled.
    pub fn region(&self, rnr: usize) -> Option<ProgrammedRegion> {
        if rnr >= self.regions() {
            return None;
        }
        let (rbar, rlar) = self.raw_region(rnr);
        ProgrammedRegion::decode(rbar, rlar)
    }

    fn raw_region(&self, rnr: usize) -> (u32, u32) {
        unsafe {
            self.bus.write32(MPU_RNR, rnr as u32);
            (self.bus.read32(MPU_RBAR), self.bus.read32(MPU_RLAR))
        }
    }

    /// Resolves the policy the MPU applies to `addr`.
    ///
    /// Returns `None` if the MPU is disabled or no region contains the
    /// address, in which case the background policy applies.
    pub fn lookup(&self, addr: u32) -> Option<Policy> {
        if !self.is_enabled() {
            return None;
        }

        (0..self.regions()).find_map(|rnr| {
            let region = self.region(rnr)?;
            region.contains(addr).then(|| Policy {
                region: rnr,
                attr: region.attr,
                attribute: self.attribute(region.attr),
                shareability: region.shareability,
                access: region.access,
            })
        })
    }

    /// Returns the raw MPU state.
    pub fn snapshot(&self) -> Snapshot {
        let mut regions = [(0, 0); MAX_REGIONS];
        for (rnr, region) in regions.iter_mut().enumerate().take(self.regions()) {
            *region = self.raw_region(rnr);
        }

        unsafe {
            Snapshot {
                ctrl: self.bus.read32(MPU_CTRL),
                mair: [self.bus.read32(MPU_MAIR0), self.bus.read32(MPU_MAIR1)],
                regions,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    use proptest::prelude::*;

    const SRAM0: MemoryRegion = MemoryRegion::new(
        "SRAM0",
        0x0200_0000,
        0x023f_ffff,
        AttrIndex::NORMAL_WT_RA_TRANSIENT,
        Shareability::Non,
        Access::NON_PRIVILEGED,
    );

    const MRAM: MemoryRegion = MemoryRegion::new(
        "MRAM",
        0x8000_0000,
        0x8057_ffff,
        AttrIndex::NORMAL_WT_RA,
        Shareability::Non,
        Access::READ_ONLY.union(Access::NON_PRIVILEGED),
    );

    fn mpu() -> (FakeBus, Mpu<FakeBus>) {
        let bus = FakeBus::new();
        let mut mpu = Mpu::new(bus.clone());
        mpu.define_standard_attributes().unwrap();
        (bus, mpu)
    }

    #[test]
    fn attribute_encodings() {
        assert_eq!(MemoryAttribute::NORMAL_WT_RA_TRANSIENT.encode(), 0x22);
        assert_eq!(MemoryAttribute::DEVICE_NGNRE.encode(), 0x04);
        assert_eq!(MemoryAttribute::NORMAL_WB_RA_WA.encode(), 0xff);
        assert_eq!(MemoryAttribute::NORMAL_WT_RA.encode(), 0xaa);
        assert_eq!(MemoryAttribute::NORMAL_NON_CACHEABLE.encode(), 0x44);
    }

    #[test]
    fn standard_attributes_land_in_mair() {
        let (bus, mpu) = mpu();
        assert_eq!(bus.get(MPU_MAIR0), 0xaaff_0422);
        assert_eq!(bus.get(MPU_MAIR1), 0x0000_0044);
        assert_eq!(
            mpu.attribute(AttrIndex::DEVICE_NGNRE),
            Some(MemoryAttribute::DEVICE_NGNRE)
        );
    }

    #[test]
    fn region_encoding() {
        // ARM_MPU_RBAR(0x80000000, ARM_MPU_SH_NON, 1, 1, 0)
        assert_eq!(MRAM.rbar(), 0x8000_0006);
        // ARM_MPU_RLAR(0x8057FFFF, 3)
        assert_eq!(MRAM.rlar(), 0x8057_ffe7);
    }

    #[test]
    fn invalid_attr_index() {
        let mut mpu = Mpu::new(FakeBus::new());
        assert_eq!(
            mpu.define_attribute(AttrIndex::new(8), MemoryAttribute::DEVICE_NGNRE),
            Err(Error::InvalidAttrIndex(8))
        );
    }

    #[test]
    fn region_with_out_of_range_attr_index() {
        let bus = FakeBus::new();
        let mut mpu = Mpu::new(bus.clone());
        mpu.define_standard_attributes().unwrap();
        let nwrites = bus.writes().len();

        let region = MemoryRegion {
            attr: AttrIndex::new(9),
            ..SRAM0
        };
        assert_eq!(
            mpu.load_regions(RegionTable(&[MRAM, region]), Control::PRIVDEFENA),
            Err(Error::InvalidAttrIndex(9))
        );
        assert_eq!(bus.writes().len(), nwrites);
    }

    #[test]
    fn undefined_attribute_is_rejected_before_any_write() {
        let bus = FakeBus::new();
        let mut mpu = Mpu::new(bus.clone());
        mpu.define_attribute(
            AttrIndex::NORMAL_WT_RA_TRANSIENT,
            MemoryAttribute::NORMAL_WT_RA_TRANSIENT,
        )
        .unwrap();
        let nwrites = bus.writes().len();

        let err = mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA);

        assert_eq!(err, Err(Error::UndefinedAttr { index: 1, attr: 3 }));
        assert_eq!(bus.writes().len(), nwrites);
    }

    #[test]
    fn malformed_regions() {
        let defined = AttrSet::of(&STANDARD_ATTRIBUTES);

        let inverted = MemoryRegion {
            limit: SRAM0.base - 1,
            ..SRAM0
        };
        assert_eq!(
            RegionTable(&[inverted]).validate(defined, 16),
            Err(Error::LimitBelowBase { index: 0 })
        );

        let base = MemoryRegion {
            base: SRAM0.base + 4,
            ..SRAM0
        };
        assert_eq!(
            RegionTable(&[SRAM0, base]).validate(defined, 16),
            Err(Error::MisalignedBase {
                index: 1,
                base: 0x0200_0004
            })
        );

        let limit = MemoryRegion {
            limit: 0x023f_fff0,
            ..SRAM0
        };
        assert_eq!(
            RegionTable(&[limit]).validate(defined, 16),
            Err(Error::MisalignedLimit {
                index: 0,
                limit: 0x023f_fff0
            })
        );

        assert_eq!(
            RegionTable(&[SRAM0; 3]).validate(defined, 2),
            Err(Error::TooManyRegions {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn sram_and_mram_policies() {
        let (_, mut mpu) = mpu();
        mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA).unwrap();

        let sram = mpu.lookup(0x0210_0000).unwrap();
        assert_eq!(sram.region, 0);
        assert_eq!(
            sram.attribute,
            Some(MemoryAttribute::NORMAL_WT_RA_TRANSIENT)
        );
        assert_eq!(sram.access, Access::NON_PRIVILEGED);

        let mram = mpu.lookup(0x8010_0000).unwrap();
        assert_eq!(mram.region, 1);
        assert_eq!(mram.attribute, Some(MemoryAttribute::NORMAL_WT_RA));
        assert!(mram.access.contains(Access::READ_ONLY));

        assert_eq!(mpu.lookup(0x4000_0000), None);
    }

    #[test]
    fn first_declared_region_wins_on_overlap() {
        let (_, mut mpu) = mpu();
        let window = MemoryRegion::new(
            "window",
            0x0210_0000,
            0x021f_ffff,
            AttrIndex::NORMAL_NON_CACHEABLE,
            Shareability::Non,
            Access::NON_PRIVILEGED,
        );

        mpu.load_regions(RegionTable(&[window, SRAM0]), Control::PRIVDEFENA).unwrap();
        let policy = mpu.lookup(0x0210_0000).unwrap();
        assert_eq!(policy.attr, AttrIndex::NORMAL_NON_CACHEABLE);

        mpu.load_regions(RegionTable(&[SRAM0, window]), Control::PRIVDEFENA).unwrap();
        let policy = mpu.lookup(0x0210_0000).unwrap();
        assert_eq!(policy.attr, AttrIndex::NORMAL_WT_RA_TRANSIENT);
    }

    #[test]
    fn loading_twice_is_idempotent() {
        let (_, mut mpu) = mpu();

        mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA).unwrap();
        let first = mpu.snapshot();
        mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA).unwrap();

        assert_eq!(mpu.snapshot(), first);
    }

    #[test]
    fn shorter_table_clears_stale_regions() {
        let (_, mut mpu) = mpu();

        mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA).unwrap();
        mpu.load_regions(RegionTable(&[SRAM0]), Control::PRIVDEFENA).unwrap();

        assert_eq!(mpu.region(1), None);
        assert_eq!(mpu.lookup(0x8010_0000), None);
    }

    #[test]
    fn enabled_only_after_the_whole_table() {
        let (bus, mut mpu) = mpu();
        mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA).unwrap();

        let writes = bus.writes();
        let enable = writes
            .iter()
            .rposition(|&(addr, val)| addr == MPU_CTRL && val & 1 != 0)
            .unwrap();
        assert!(bus.last_write(MPU_RLAR).unwrap() < enable);
        assert_eq!(
            bus.get(MPU_CTRL),
            (Control::ENABLE | Control::PRIVDEFENA).bits()
        );
    }

    #[test]
    fn rejected_region_keeps_mpu_disabled() {
        let (bus, mut mpu) = mpu();
        bus.stick_region(1);

        let err = mpu.load_regions(RegionTable(&[SRAM0, MRAM]), Control::PRIVDEFENA);

        assert_eq!(err, Err(Error::Rejected { index: 1 }));
        assert!(!mpu.is_enabled());
    }

    fn region_strategy() -> impl Strategy<Value = MemoryRegion> {
        (0u32..0x8000, 1u32..0x100, 0u8..5).prop_map(|(start, len, attr)| {
            let base = start << 12;
            MemoryRegion::new(
                "generated",
                base,
                base + (len << 12) - 1,
                AttrIndex::new(attr),
                Shareability::Non,
                Access::NON_PRIVILEGED,
            )
        })
    }

    proptest! {
        #[test]
        fn lookup_matches_first_containing_region(
            table in prop::collection::vec(region_strategy(), 1..=MAX_REGIONS),
            addr in 0u32..0x0800_0000,
        ) {
            let (_, mut mpu) = mpu();
            mpu.load_regions(RegionTable(&table), Control::PRIVDEFENA).unwrap();

            let expected = RegionTable(&table).resolve(addr).map(|(i, r)| (i, r.attr));
            let actual = mpu.lookup(addr).map(|p| (p.region, p.attr));
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn attributes_decode_to_themselves(
            transient: bool,
            write_back: bool,
            read_allocate: bool,
            write_allocate: bool,
        ) {
            prop_assume!(read_allocate || write_allocate);
            let policy = if write_back {
                CachePolicy::WriteBack { transient, read_allocate, write_allocate }
            } else {
                CachePolicy::WriteThrough { transient, read_allocate, write_allocate }
            };
            let attr = MemoryAttribute::normal(policy);
            prop_assert_eq!(MemoryAttribute::decode(attr.encode()), Some(attr));
        }
    }
}
