use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use skelly_types::{
    CameraConfig, CameraConfigs, CameraId, FrameMetadata, FramePayload, MultiFramePayload,
    FRAME_METADATA_SIZE_BYTES,
};

use crate::{clock, Error, Result, SharedMemoryElement};

/// OS-level names of one camera's two regions; everything a foreign process
/// needs (together with the camera config) to map the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedMemoryNames {
    pub image_shm_name: String,
    pub metadata_shm_name: String,
}

/// Single-slot frame buffer for one camera: image bytes plus a fixed-width
/// metadata record. Writes happen only from the owning capture worker during
/// the barrier's write phase; reads only from the router during the read
/// phase.
pub struct CameraSharedMemory {
    config: CameraConfig,
    image_shm: SharedMemoryElement,
    metadata_shm: SharedMemoryElement,
}

impl CameraSharedMemory {
    pub fn create(config: &CameraConfig) -> Result<Self> {
        let image_shm = SharedMemoryElement::create(
            &format!("cam{}_image", config.camera_id),
            config.image_size_bytes(),
        )?;
        let metadata_shm = SharedMemoryElement::create(
            &format!("cam{}_metadata", config.camera_id),
            FRAME_METADATA_SIZE_BYTES,
        )?;
        Ok(Self {
            config: config.clone(),
            image_shm,
            metadata_shm,
        })
    }

    pub fn recreate(
        config: &CameraConfig,
        names: &SharedMemoryNames,
        read_only: bool,
    ) -> Result<Self> {
        let open = if read_only {
            SharedMemoryElement::open_read_only
        } else {
            SharedMemoryElement::open
        };
        let image_shm = open(&names.image_shm_name, config.image_size_bytes())?;
        let metadata_shm = open(&names.metadata_shm_name, FRAME_METADATA_SIZE_BYTES)?;
        Ok(Self {
            config: config.clone(),
            image_shm,
            metadata_shm,
        })
    }

    pub fn shared_memory_names(&self) -> SharedMemoryNames {
        SharedMemoryNames {
            image_shm_name: self.image_shm.name().to_string(),
            metadata_shm_name: self.metadata_shm.name().to_string(),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Publish one frame into the slot. Stamps `copy_into_buffer_ns` on the
    /// way in; the caller's metadata record is updated to match what was
    /// written.
    pub fn put_new_frame(&mut self, image: &[u8], metadata: &mut FrameMetadata) -> Result<()> {
        if image.len() != self.config.image_size_bytes() {
            return Err(Error::ConfigMismatch {
                expected: self.config.image_size_bytes(),
                actual: image.len(),
            });
        }
        metadata.copy_into_buffer_ns = clock::monotonic_ns();
        self.image_shm.copy_into(image)?;
        self.metadata_shm.copy_into(&metadata.to_bytes())?;
        trace!(
            "camera {} wrote frame {} to shared memory",
            metadata.camera_id,
            metadata.frame_number
        );
        Ok(())
    }

    /// Borrowed view of the image bytes; valid only while the holder is
    /// inside the flag-enforced read phase.
    pub fn image_view(&self) -> &[u8] {
        self.image_shm.as_slice()
    }

    pub fn read_metadata(&self) -> FrameMetadata {
        FrameMetadata::from_bytes(self.metadata_shm.as_slice())
    }

    /// Owned copy of the slot contents.
    pub fn read_frame(&self) -> FramePayload {
        FramePayload {
            metadata: self.read_metadata(),
            image: self.image_shm.read_to_vec(),
        }
    }

    pub fn unlink(&self) -> Result<()> {
        self.image_shm.unlink()?;
        self.metadata_shm.unlink()
    }
}

/// Region names for every camera in a group, shippable to another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraGroupSharedMemoryDTO {
    pub shm_names: BTreeMap<CameraId, SharedMemoryNames>,
}

/// All per-camera slots of one camera group.
pub struct CameraGroupSharedMemory {
    cameras: BTreeMap<CameraId, CameraSharedMemory>,
}

impl CameraGroupSharedMemory {
    /// Create fresh slots for every enabled camera in `configs`.
    pub fn create(configs: &CameraConfigs) -> Result<Self> {
        let mut cameras = BTreeMap::new();
        for (camera_id, config) in configs.iter().filter(|(_, c)| c.use_this_camera) {
            cameras.insert(*camera_id, CameraSharedMemory::create(config)?);
        }
        debug!("created shared memory for {} camera(s)", cameras.len());
        Ok(Self { cameras })
    }

    /// Map existing slots from another process's DTO.
    pub fn recreate(
        configs: &CameraConfigs,
        dto: &CameraGroupSharedMemoryDTO,
        read_only: bool,
    ) -> Result<Self> {
        let mut cameras = BTreeMap::new();
        for (camera_id, names) in &dto.shm_names {
            let config = configs.get(camera_id).ok_or(Error::UnknownCamera(*camera_id))?;
            cameras.insert(
                *camera_id,
                CameraSharedMemory::recreate(config, names, read_only)?,
            );
        }
        Ok(Self { cameras })
    }

    pub fn to_dto(&self) -> CameraGroupSharedMemoryDTO {
        CameraGroupSharedMemoryDTO {
            shm_names: self
                .cameras
                .iter()
                .map(|(camera_id, shm)| (*camera_id, shm.shared_memory_names()))
                .collect(),
        }
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.cameras.keys().copied().collect()
    }

    pub fn camera(&self, camera_id: CameraId) -> Result<&CameraSharedMemory> {
        self.cameras
            .get(&camera_id)
            .ok_or(Error::UnknownCamera(camera_id))
    }

    pub fn camera_mut(&mut self, camera_id: CameraId) -> Result<&mut CameraSharedMemory> {
        self.cameras
            .get_mut(&camera_id)
            .ok_or(Error::UnknownCamera(camera_id))
    }

    /// Take ownership of one camera's slot (capture workers hold their slot
    /// directly).
    pub fn take_camera(&mut self, camera_id: CameraId) -> Result<CameraSharedMemory> {
        self.cameras
            .remove(&camera_id)
            .ok_or(Error::UnknownCamera(camera_id))
    }

    /// Snapshot every slot into one multi-frame payload.
    pub fn read_multi_frame(&self, multi_frame_number: u64) -> MultiFramePayload {
        let mut payload = MultiFramePayload::new(multi_frame_number);
        for (camera_id, shm) in &self.cameras {
            payload.frames.insert(*camera_id, shm.read_frame());
        }
        payload
    }

    /// Detach and remove every region. Creator only.
    pub fn close_and_unlink(&self) -> Result<()> {
        for shm in self.cameras.values() {
            shm.unlink()?;
        }
        Ok(())
    }
}
