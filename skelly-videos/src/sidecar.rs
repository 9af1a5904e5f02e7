use std::fs::File;
use std::path::Path;

use skelly_types::{CameraId, FrameMetadata, FRAME_METADATA_FIELDS};

use crate::{Error, Result};

/// The per-camera timestamp CSV accompanying a video file.
///
/// The header is exactly the metadata field names in declared order, and the
/// N-th row carries the metadata of the N-th frame in the video, so a row
/// index joins the sidecar to the stream.
pub struct TimestampSidecar {
    camera_id: CameraId,
    writer: csv::Writer<File>,
    rows: u64,
    first_frame_number: Option<u64>,
}

impl TimestampSidecar {
    pub fn create(path: &Path, camera_id: CameraId) -> Result<Self> {
        // The header goes out immediately so a zero-frame recording still
        // leaves a valid, header-only file.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(FRAME_METADATA_FIELDS)?;
        writer.flush()?;
        Ok(Self {
            camera_id,
            writer,
            rows: 0,
            first_frame_number: None,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one row. The capture worker's frame numbers may start past
    /// zero (warm-up offset), but within a recording they must be gapless.
    pub fn add_row(&mut self, metadata: &FrameMetadata) -> Result<()> {
        if metadata.camera_id() != self.camera_id {
            return Err(Error::UnknownCamera(metadata.camera_id()));
        }
        let first = *self.first_frame_number.get_or_insert(metadata.frame_number);
        let expected = first + self.rows;
        if metadata.frame_number != expected {
            return Err(Error::FrameNumberGap {
                camera_id: self.camera_id,
                expected,
                actual: metadata.frame_number,
            });
        }
        self.writer.serialize(metadata)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(camera_id: u8, frame_number: u64) -> FrameMetadata {
        let mut metadata = FrameMetadata::new(CameraId(camera_id), frame_number);
        metadata.pre_grab_ns = frame_number * 10;
        metadata.post_grab_ns = frame_number * 10 + 1;
        metadata
    }

    #[test]
    fn header_matches_field_names_and_rows_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam0_timestamps.csv");
        let mut sidecar = TimestampSidecar::create(&path, CameraId(0)).unwrap();
        for frame_number in 3..6 {
            sidecar.add_row(&metadata(0, frame_number)).unwrap();
        }
        sidecar.flush().unwrap();
        assert_eq!(sidecar.rows(), 3);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(String::from)
            .collect();
        assert_eq!(header, FRAME_METADATA_FIELDS);
        let rows: Vec<FrameMetadata> = reader
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], metadata(0, 3));
        assert_eq!(rows[2].frame_number, 5);
    }

    #[test]
    fn empty_sidecar_is_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty_timestamps.csv");
        let mut sidecar = TimestampSidecar::create(&path, CameraId(1)).unwrap();
        sidecar.flush().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("camera_id,frame_number"));
    }

    #[test]
    fn frame_number_gaps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap_timestamps.csv");
        let mut sidecar = TimestampSidecar::create(&path, CameraId(0)).unwrap();
        sidecar.add_row(&metadata(0, 7)).unwrap();
        sidecar.add_row(&metadata(0, 8)).unwrap();
        assert!(matches!(
            sidecar.add_row(&metadata(0, 10)),
            Err(Error::FrameNumberGap {
                expected: 9,
                actual: 10,
                ..
            })
        ));
    }

    #[test]
    fn wrong_camera_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrong_cam_timestamps.csv");
        let mut sidecar = TimestampSidecar::create(&path, CameraId(0)).unwrap();
        assert!(matches!(
            sidecar.add_row(&metadata(3, 0)),
            Err(Error::UnknownCamera(CameraId(3)))
        ));
    }
}
