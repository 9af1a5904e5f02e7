use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{Mmap, MmapMut};
use tracing::{debug, trace};

use crate::{shared_memory_dir, Error, Result};

static NEXT_NONCE: AtomicU64 = AtomicU64::new(0);

/// One named, fixed-size, file-backed shared-memory region.
///
/// `create` makes a fresh region with a unique name; `open` /
/// `open_read_only` map an existing region by name from any process. Dropping
/// the element detaches the mapping; `unlink` removes the OS-level name and
/// is the creator's job.
#[derive(Debug)]
pub struct SharedMemoryElement {
    name: String,
    path: PathBuf,
    map: MapInner,
}

#[derive(Debug)]
enum MapInner {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl SharedMemoryElement {
    pub fn create(label: &str, len: usize) -> Result<Self> {
        // The clock component keeps names unique across a pid reuse after a
        // crash; the counter disambiguates same-instant creates.
        let nonce = NEXT_NONCE.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "skellycam_{}_{:x}_{}_{}",
            std::process::id(),
            crate::clock::monotonic_ns(),
            nonce,
            label
        );
        let path = shared_memory_dir().join(&name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(len as u64)?;
        // SAFETY: the file was just created with this exact length and is
        // only resized here.
        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!("created shared memory region '{name}' ({len} bytes)");
        Ok(Self {
            name,
            path,
            map: MapInner::Writable(map),
        })
    }

    pub fn open(name: &str, expected_len: usize) -> Result<Self> {
        let path = shared_memory_dir().join(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Self::check_len(name, expected_len, file.metadata()?.len() as usize)?;
        // SAFETY: mapped read-write over a file sized by the creator; all
        // concurrent access goes through the barrier protocol.
        let map = unsafe { MmapMut::map_mut(&file)? };
        trace!("attached shared memory region '{name}'");
        Ok(Self {
            name: name.to_string(),
            path,
            map: MapInner::Writable(map),
        })
    }

    pub fn open_read_only(name: &str, expected_len: usize) -> Result<Self> {
        let path = shared_memory_dir().join(name);
        let file = OpenOptions::new().read(true).open(&path)?;
        Self::check_len(name, expected_len, file.metadata()?.len() as usize)?;
        // SAFETY: read-only mapping of a creator-sized file.
        let map = unsafe { Mmap::map(&file)? };
        trace!("attached read-only shared memory region '{name}'");
        Ok(Self {
            name: name.to_string(),
            path,
            map: MapInner::ReadOnly(map),
        })
    }

    fn check_len(name: &str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(Error::SizeMismatch {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            MapInner::Writable(m) => m,
            MapInner::ReadOnly(m) => m,
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match &mut self.map {
            MapInner::Writable(m) => Ok(m),
            MapInner::ReadOnly(_) => Err(Error::ReadOnly),
        }
    }

    /// Base address of the mapping, for atomic-flag views. The pointer stays
    /// valid for the lifetime of this element.
    pub fn base_ptr(&self) -> *mut u8 {
        self.as_slice().as_ptr() as *mut u8
    }

    /// Copy `src` into the region. `src` must cover the region exactly.
    pub fn copy_into(&mut self, src: &[u8]) -> Result<()> {
        let dst = self.as_mut_slice()?;
        if src.len() != dst.len() {
            return Err(Error::ConfigMismatch {
                expected: dst.len(),
                actual: src.len(),
            });
        }
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Owned copy of the region contents.
    pub fn read_to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Remove the OS-level name. Only the creator should call this; a second
    /// call (or a call racing a concurrent unlink) is a no-op.
    pub fn unlink(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("unlinked shared memory region '{}'", self.name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read_round_trip() {
        let mut element = SharedMemoryElement::create("test_rw", 16).unwrap();
        let payload: Vec<u8> = (0u8..16).collect();
        element.copy_into(&payload).unwrap();
        assert_eq!(element.read_to_vec(), payload);
        element.unlink().unwrap();
    }

    #[test]
    fn reattach_by_name_sees_creator_bytes() {
        let mut creator = SharedMemoryElement::create("test_attach", 8).unwrap();
        creator.copy_into(&[7u8; 8]).unwrap();
        let reader = SharedMemoryElement::open_read_only(creator.name(), 8).unwrap();
        assert_eq!(reader.read_to_vec(), vec![7u8; 8]);
        creator.unlink().unwrap();
    }

    #[test]
    fn open_with_wrong_size_fails() {
        let element = SharedMemoryElement::create("test_size", 8).unwrap();
        let err = SharedMemoryElement::open(element.name(), 16).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
        element.unlink().unwrap();
    }

    #[test]
    fn wrong_length_write_is_rejected() {
        let mut element = SharedMemoryElement::create("test_len", 8).unwrap();
        let err = element.copy_into(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::ConfigMismatch { .. }));
        element.unlink().unwrap();
    }

    #[test]
    fn unlink_is_idempotent() {
        let element = SharedMemoryElement::create("test_unlink", 8).unwrap();
        element.unlink().unwrap();
        element.unlink().unwrap();
        assert!(SharedMemoryElement::open(element.name(), 8).is_err());
    }

    #[test]
    fn read_only_view_rejects_writes() {
        let element = SharedMemoryElement::create("test_ro", 8).unwrap();
        let mut reader = SharedMemoryElement::open_read_only(element.name(), 8).unwrap();
        assert!(matches!(reader.as_mut_slice(), Err(Error::ReadOnly)));
        element.unlink().unwrap();
    }
}
