//! Single-part vs multipart transfer planning

use crate::config::{StorageConfig, MIN_PART_SIZE_MIB};
use crate::encryption::EncryptionSpec;
use crate::error::{Error, Result};

pub const MIB: u64 = 1024 * 1024;

/// Smallest part the store accepts, except for the last one
pub const MIN_PART_SIZE: u64 = MIN_PART_SIZE_MIB * MIB;

/// Largest object a multipart upload can produce (5 TiB)
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * MIB;

/// Largest object a single `PutObject` may carry (5 GiB)
pub const MAX_SINGLE_PART_SIZE: u64 = 5 * 1024 * MIB;

/// Most parts a multipart upload may have
pub const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub enable_multipart: bool,
    pub chunk_size_mib: u64,
}

impl TransferSettings {
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self {
            enable_multipart: storage.enable_multipart_upload,
            chunk_size_mib: storage.file_chunk_size,
        }
    }
}

/// How one object will be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub use_multipart: bool,
    pub part_size_bytes: u64,
    /// 1 for single-part transfers
    pub part_count: u64,
    pub encryption: EncryptionSpec,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferPlanner {
    settings: TransferSettings,
}

impl TransferPlanner {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> TransferSettings {
        self.settings
    }

    /// Plan the transfer of a `file_size` byte object.
    ///
    /// Multipart is only used when enabled and the object fills at least one
    /// part; disabling it forces a single request, which the store caps at
    /// [`MAX_SINGLE_PART_SIZE`].
    pub fn plan(&self, file_size: u64, encryption: EncryptionSpec) -> Result<TransferPlan> {
        if file_size > MAX_OBJECT_SIZE {
            return Err(Error::Validation(format!(
                "object of {} bytes exceeds the maximum object size of {} bytes",
                file_size, MAX_OBJECT_SIZE
            )));
        }

        let part_size = self.settings.chunk_size_mib.saturating_mul(MIB);

        if !self.settings.enable_multipart {
            return single_part(file_size, part_size, encryption);
        }

        if part_size < MIN_PART_SIZE {
            return Err(Error::Config(format!(
                "chunk size of {} MiB is below the {} MiB minimum part size",
                self.settings.chunk_size_mib, MIN_PART_SIZE_MIB
            )));
        }

        if file_size < part_size {
            return single_part(file_size, part_size, encryption);
        }

        let part_size = fit_part_size(file_size, part_size);

        Ok(TransferPlan {
            use_multipart: true,
            part_size_bytes: part_size,
            part_count: file_size.div_ceil(part_size),
            encryption,
        })
    }
}

fn single_part(file_size: u64, part_size: u64, encryption: EncryptionSpec) -> Result<TransferPlan> {
    if file_size > MAX_SINGLE_PART_SIZE {
        return Err(Error::Validation(format!(
            "object of {} bytes exceeds the single-request limit of {} bytes; enable multipart uploads",
            file_size, MAX_SINGLE_PART_SIZE
        )));
    }
    Ok(TransferPlan {
        use_multipart: false,
        part_size_bytes: part_size,
        part_count: 1,
        encryption,
    })
}

/// Grow `part_size` to whole MiB until the object fits in `MAX_PARTS` parts.
fn fit_part_size(file_size: u64, part_size: u64) -> u64 {
    if file_size.div_ceil(part_size) <= MAX_PARTS {
        return part_size;
    }
    let needed = file_size.div_ceil(MAX_PARTS);
    needed.div_ceil(MIB) * MIB
}
