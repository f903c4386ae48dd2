//! Backing images and the classification of faulting addresses.

use core::fmt;

use crate::{
    VirtualAddress,
    config::{BLOCK_SIZE, IMAGE_HEADER_BLOCKS, LIBRARY_OFFSET},
};

/// A block device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u16);

/// A physical block number on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockNumber(pub u32);

/// Identity of an executable or library file: the device it lives on and its inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageHandle {
    pub device: DeviceId,
    pub inode: u32,
}

impl ImageHandle {
    pub const fn new(device: DeviceId, inode: u32) -> Self {
        Self { device, inode }
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}:{}", self.device.0, self.inode)
    }
}

/// The role an image plays in an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Executable,
    Library,
}

/// The image layout of one address space, supplied by the process layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessLayout {
    pub end_code: usize,
    /// End of the initialised data; bytes of the executable past this point read as zero.
    pub end_data: usize,
    pub brk: usize,
    pub start_stack: usize,
    pub executable: Option<ImageHandle>,
    pub library: Option<ImageHandle>,
}

impl ProcessLayout {
    /// Returns the image attached in `role`.
    pub fn image(&self, role: ImageRole) -> Option<ImageHandle> {
        match role {
            ImageRole::Executable => self.executable,
            ImageRole::Library => self.library,
        }
    }

    /// Returns whether this layout references `image` in either role.
    pub fn uses(&self, image: ImageHandle) -> bool {
        self.executable == Some(image) || self.library == Some(image)
    }

    /// Works out where the contents of the page at `address` come from.
    pub fn classify(&self, address: VirtualAddress) -> Backing {
        let offset = address.align_down(crate::arch::PAGE_SIZE).as_usize();
        if offset >= LIBRARY_OFFSET {
            if let Some(image) = self.library {
                return Backing::Image {
                    image,
                    role: ImageRole::Library,
                    first_block: (IMAGE_HEADER_BLOCKS + (offset - LIBRARY_OFFSET) / BLOCK_SIZE)
                        as u32,
                };
            }
        } else if offset < self.end_data {
            if let Some(image) = self.executable {
                return Backing::Image {
                    image,
                    role: ImageRole::Executable,
                    first_block: (IMAGE_HEADER_BLOCKS + offset / BLOCK_SIZE) as u32,
                };
            }
        }
        Backing::Anonymous
    }
}

/// Source of a page's initial contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// A zero-filled page.
    Anonymous,
    /// Blocks of a file, starting at logical block `first_block`.
    Image {
        image: ImageHandle,
        role: ImageRole,
        first_block: u32,
    },
}
