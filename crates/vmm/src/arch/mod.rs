//! Architecture-specific implementations for memory management.
//!
//! This module conditionally imports either the x86_64 hardware implementation or the
//! software emulation based on the target architecture and features.

// NOTE: We DO include the x86_64 module even during tests so that rust-analyzer can see it.
#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub use self::x86_64::*;

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;

/// Page size in bytes. Both architectures use 4 KiB pages.
pub const PAGE_SIZE: usize = 4096;

/// Number of bits in the in-page offset.
pub const PAGE_SHIFT: usize = 12;
