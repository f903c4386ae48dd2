//! Page table entry flags for software emulation.

/// Page table entry flags for software emulation.
///
/// Bit positions match the x86 two-level format so that entries built under emulation are
/// bit-for-bit what the hardware would see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u32);

impl PageFlags {
    const PRESENT: u32 = 1 << 0;
    const WRITABLE: u32 = 1 << 1;
    const USER: u32 = 1 << 2;
    const ACCESSED: u32 = 1 << 5;
    const DIRTY: u32 = 1 << 6;

    /// Mask of every bit this type understands.
    pub const MASK: u32 =
        Self::PRESENT | Self::WRITABLE | Self::USER | Self::ACCESSED | Self::DIRTY;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Present, writable and user-accessible: the flags of a freshly mapped user page.
    pub const fn user_page() -> Self {
        Self(Self::PRESENT | Self::WRITABLE | Self::USER)
    }

    /// Creates page flags from raw entry bits, ignoring bits outside [`Self::MASK`].
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & Self::MASK)
    }

    /// Returns the raw bits of these flags.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    fn set_bit(&mut self, bit: u32, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn is_present(self) -> bool {
        (self.0 & Self::PRESENT) != 0
    }

    pub fn set_present(&mut self, present: bool) {
        self.set_bit(Self::PRESENT, present);
    }

    pub fn is_writable(self) -> bool {
        (self.0 & Self::WRITABLE) != 0
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.set_bit(Self::WRITABLE, writable);
    }

    pub fn is_user(self) -> bool {
        (self.0 & Self::USER) != 0
    }

    pub fn set_user(&mut self, user: bool) {
        self.set_bit(Self::USER, user);
    }

    pub fn is_accessed(self) -> bool {
        (self.0 & Self::ACCESSED) != 0
    }

    pub fn set_accessed(&mut self, accessed: bool) {
        self.set_bit(Self::ACCESSED, accessed);
    }

    /// Returns whether the page has been written since it was mapped.
    pub fn is_dirty(self) -> bool {
        (self.0 & Self::DIRTY) != 0
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.set_bit(Self::DIRTY, dirty);
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
