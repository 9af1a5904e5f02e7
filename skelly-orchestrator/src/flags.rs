use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use skelly_shmem::SharedMemoryElement;
use skelly_types::CameraId;

use crate::wait::{WAIT_FAST, WAIT_SLOW, WAIT_VERY_SLOW};
use crate::{Error, Result};

// Region layout. Group header, then one 8-byte flag block per camera in
// `camera_ids` order. The counter sits at offset 8 so it is 8-byte aligned
// (the mapping itself is page-aligned).
const KILL_OFFSET: usize = 0;
const RECORD_OFFSET: usize = 1;
const COUNTER_OFFSET: usize = 8;
const CAMERA_BLOCKS_OFFSET: usize = 16;
const CAMERA_BLOCK_SIZE: usize = 8;

const CAMERA_READY: usize = 0;
const INITIAL_TRIGGER: usize = 1;
const SHOULD_GRAB: usize = 2;
const FRAME_GRABBED: usize = 3;
const SHOULD_RETRIEVE: usize = 4;
const NEW_FRAME_AVAILABLE: usize = 5;

const CAMERA_FLAG_NAMES: [(&str, usize); 6] = [
    ("camera_ready", CAMERA_READY),
    ("initial_trigger", INITIAL_TRIGGER),
    ("should_grab", SHOULD_GRAB),
    ("frame_grabbed", FRAME_GRABBED),
    ("should_retrieve", SHOULD_RETRIEVE),
    ("new_frame_available", NEW_FRAME_AVAILABLE),
];

/// Everything a foreign process needs to attach to the flag region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorDTO {
    pub flags_shm_name: String,
    pub camera_ids: Vec<CameraId>,
}

/// The shared flag set. One instance per attached process; all instances
/// view the same bytes.
pub struct CameraGroupOrchestrator {
    shm: SharedMemoryElement,
    camera_ids: Vec<CameraId>,
}

impl CameraGroupOrchestrator {
    pub fn create(camera_ids: Vec<CameraId>) -> Result<Self> {
        let len = CAMERA_BLOCKS_OFFSET + camera_ids.len() * CAMERA_BLOCK_SIZE;
        // A fresh region is zero-filled, which is exactly the all-clear state.
        let shm = SharedMemoryElement::create("orchestrator_flags", len)?;
        debug!("created orchestrator flags for {} camera(s)", camera_ids.len());
        Ok(Self { shm, camera_ids })
    }

    pub fn recreate(dto: &OrchestratorDTO) -> Result<Self> {
        let len = CAMERA_BLOCKS_OFFSET + dto.camera_ids.len() * CAMERA_BLOCK_SIZE;
        // Always a writable mapping: consumers clear `new_frame_available`
        // and any role may raise the kill flag.
        let shm = SharedMemoryElement::open(&dto.flags_shm_name, len)?;
        Ok(Self {
            shm,
            camera_ids: dto.camera_ids.clone(),
        })
    }

    pub fn to_dto(&self) -> OrchestratorDTO {
        OrchestratorDTO {
            flags_shm_name: self.shm.name().to_string(),
            camera_ids: self.camera_ids.clone(),
        }
    }

    pub fn camera_ids(&self) -> &[CameraId] {
        &self.camera_ids
    }

    /// Remove the OS-level region name. Creator only.
    pub fn unlink(&self) -> Result<()> {
        Ok(self.shm.unlink()?)
    }

    // ------------------------------------------------------------------
    // raw flag access

    fn flag(&self, offset: usize) -> &AtomicU8 {
        debug_assert!(offset < CAMERA_BLOCKS_OFFSET + self.camera_ids.len() * CAMERA_BLOCK_SIZE);
        // SAFETY: offset is within the mapping, which lives as long as
        // `self`; AtomicU8 is 1-aligned and shared-memory access to it is
        // the whole point of this region.
        unsafe { &*(self.shm.base_ptr().add(offset) as *const AtomicU8) }
    }

    fn counter(&self) -> &AtomicU64 {
        // SAFETY: offset 8 of a page-aligned mapping, in bounds.
        unsafe { &*(self.shm.base_ptr().add(COUNTER_OFFSET) as *const AtomicU64) }
    }

    fn camera_flag(&self, camera_id: CameraId, which: usize) -> Result<&AtomicU8> {
        let index = self
            .camera_ids
            .iter()
            .position(|id| *id == camera_id)
            .ok_or(Error::UnknownCamera(camera_id))?;
        Ok(self.flag(CAMERA_BLOCKS_OFFSET + index * CAMERA_BLOCK_SIZE + which))
    }

    fn load(&self, camera_id: CameraId, which: usize) -> Result<bool> {
        Ok(self.camera_flag(camera_id, which)?.load(Ordering::Acquire) != 0)
    }

    fn store(&self, camera_id: CameraId, which: usize, value: bool) -> Result<()> {
        self.camera_flag(camera_id, which)?
            .store(value as u8, Ordering::Release);
        Ok(())
    }

    fn await_camera_flag(
        &self,
        camera_id: CameraId,
        which: usize,
        target: bool,
        pause: Duration,
    ) -> Result<()> {
        // The satisfied condition wins over a concurrent kill so that a
        // payload published right before the kill is still delivered.
        loop {
            if self.load(camera_id, which)? == target {
                return Ok(());
            }
            if self.is_killed() {
                return Err(Error::Killed);
            }
            std::thread::sleep(pause);
        }
    }

    fn await_all(&self, which: usize, target: bool, pause: Duration) -> Result<()> {
        loop {
            let done = self
                .camera_ids
                .iter()
                .all(|id| self.load(*id, which).unwrap_or(false) == target);
            if done {
                return Ok(());
            }
            if self.is_killed() {
                return Err(Error::Killed);
            }
            std::thread::sleep(pause);
        }
    }

    // ------------------------------------------------------------------
    // group-level flags

    pub fn set_kill(&self) {
        self.flag(KILL_OFFSET).store(1, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.flag(KILL_OFFSET).load(Ordering::Acquire) != 0
    }

    pub fn set_record(&self, value: bool) {
        self.flag(RECORD_OFFSET).store(value as u8, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.flag(RECORD_OFFSET).load(Ordering::Acquire) != 0
    }

    pub fn multi_frame_number(&self) -> u64 {
        self.counter().load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // capture-worker side

    pub fn set_camera_ready(&self, camera_id: CameraId) -> Result<()> {
        self.store(camera_id, CAMERA_READY, true)
    }

    /// Block until the driver fires this camera's one-shot initial trigger,
    /// then clear it. This proves the worker reached its loop head before
    /// any real frame is demanded.
    pub fn await_and_clear_initial_trigger(&self, camera_id: CameraId) -> Result<()> {
        self.await_camera_flag(camera_id, INITIAL_TRIGGER, true, WAIT_SLOW)?;
        self.store(camera_id, INITIAL_TRIGGER, false)
    }

    pub fn await_should_grab(&self, camera_id: CameraId) -> Result<()> {
        self.await_camera_flag(camera_id, SHOULD_GRAB, true, WAIT_FAST)
    }

    /// Grab finished: raise `frame_grabbed`, lower `should_grab`.
    pub fn set_frame_grabbed(&self, camera_id: CameraId) -> Result<()> {
        self.store(camera_id, FRAME_GRABBED, true)?;
        self.store(camera_id, SHOULD_GRAB, false)
    }

    pub fn await_should_retrieve(&self, camera_id: CameraId) -> Result<()> {
        self.await_camera_flag(camera_id, SHOULD_RETRIEVE, true, WAIT_FAST)
    }

    /// Retrieve finished and the slot is published: lower the phase flags,
    /// raise `new_frame_available`. Call only after the shared-memory copy.
    pub fn set_new_frame_available(&self, camera_id: CameraId) -> Result<()> {
        self.store(camera_id, SHOULD_RETRIEVE, false)?;
        self.store(camera_id, FRAME_GRABBED, false)?;
        self.store(camera_id, NEW_FRAME_AVAILABLE, true)
    }

    // ------------------------------------------------------------------
    // driver side

    /// Non-blocking check of the ready barrier.
    pub fn cameras_ready(&self) -> bool {
        self.camera_ids
            .iter()
            .all(|id| self.load(*id, CAMERA_READY).unwrap_or(false))
    }

    /// Wait for every camera to report ready. Fired once per group lifetime,
    /// after device open and warm-up.
    pub fn await_cameras_ready(&self) -> Result<()> {
        let mut waited = Duration::ZERO;
        loop {
            if self.is_killed() {
                return Err(Error::Killed);
            }
            if self.cameras_ready() {
                debug!("all cameras ready");
                return Ok(());
            }
            std::thread::sleep(WAIT_SLOW);
            waited += WAIT_SLOW;
            if waited >= WAIT_VERY_SLOW {
                trace!("waiting for cameras to become ready...");
                waited = Duration::ZERO;
            }
        }
    }

    /// Fire the one-shot initial triggers and wait for every worker to clear
    /// its own, proving all workers sit at the loop head.
    pub fn fire_initial_triggers(&self) -> Result<()> {
        self.ensure_cameras_ready()?;
        for camera_id in &self.camera_ids {
            self.store(*camera_id, INITIAL_TRIGGER, true)?;
        }
        self.await_all(INITIAL_TRIGGER, false, WAIT_SLOW)?;
        debug!("initial triggers acknowledged by all cameras");
        Ok(())
    }

    /// One full barrier cycle; returns the published multi-frame number.
    pub fn trigger_multi_frame_read(&self) -> Result<u64> {
        self.ensure_cameras_ready()?;
        // Single-slot: the previous payload must be consumed before any
        // worker may overwrite it. A backed-up recording path stalls here.
        self.await_all(NEW_FRAME_AVAILABLE, false, WAIT_FAST)?;

        for camera_id in &self.camera_ids {
            self.store(*camera_id, SHOULD_GRAB, true)?;
        }
        self.await_all(FRAME_GRABBED, true, WAIT_FAST)?;

        for camera_id in &self.camera_ids {
            self.store(*camera_id, SHOULD_RETRIEVE, true)?;
        }
        self.await_all(NEW_FRAME_AVAILABLE, true, WAIT_FAST)?;

        self.verify_clean_after_read()?;
        let multi_frame_number = self.counter().fetch_add(1, Ordering::AcqRel) + 1;
        trace!("published multi-frame {multi_frame_number}");
        Ok(multi_frame_number)
    }

    fn ensure_cameras_ready(&self) -> Result<()> {
        for camera_id in &self.camera_ids {
            if !self.load(*camera_id, CAMERA_READY)? {
                return Err(Error::BarrierViolation {
                    state_dump: format!("camera {camera_id} not ready; {}", self.state_dump()),
                });
            }
        }
        Ok(())
    }

    /// Post-read audit: every phase flag a worker should have cleared must be
    /// clear. A set flag here is a protocol bug, not an operational fault.
    fn verify_clean_after_read(&self) -> Result<()> {
        for camera_id in &self.camera_ids {
            let dirty = self.load(*camera_id, SHOULD_GRAB)?
                || self.load(*camera_id, SHOULD_RETRIEVE)?
                || self.load(*camera_id, FRAME_GRABBED)?
                || !self.load(*camera_id, CAMERA_READY)?;
            if dirty {
                let state_dump = self.state_dump();
                warn!("barrier violation after read: {state_dump}");
                return Err(Error::BarrierViolation { state_dump });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // consumer side

    /// Block until a multi-frame newer than `last_seen` is published.
    pub fn await_new_multi_frame(&self, last_seen: u64) -> Result<u64> {
        loop {
            let current = self.multi_frame_number();
            if current > last_seen {
                return Ok(current);
            }
            if self.is_killed() {
                return Err(Error::Killed);
            }
            std::thread::sleep(WAIT_FAST);
        }
    }

    /// Read phase complete: release every slot for the next write.
    pub fn clear_new_frames_available(&self) -> Result<()> {
        for camera_id in &self.camera_ids {
            self.store(*camera_id, NEW_FRAME_AVAILABLE, false)?;
        }
        Ok(())
    }

    fn state_dump(&self) -> String {
        let mut out = format!(
            "kill={} record={} multi_frame_number={}",
            self.is_killed(),
            self.is_recording(),
            self.multi_frame_number()
        );
        for camera_id in &self.camera_ids {
            let _ = write!(out, " cam{camera_id}[");
            for (name, which) in CAMERA_FLAG_NAMES {
                let _ = write!(
                    out,
                    "{name}={}",
                    self.load(*camera_id, which).unwrap_or(false) as u8
                );
                if which != NEW_FRAME_AVAILABLE {
                    out.push(' ');
                }
            }
            out.push(']');
        }
        out
    }
}
