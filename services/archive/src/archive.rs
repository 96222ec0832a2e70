//! Search and ingestion flows over the recording store and media storage.

use crate::error::ArchiveError;
use crate::filter_compiler::{compile, SearchFilters};
use crate::metadata_store::{Page, RecordingStore};
use crate::recording::{NewRecording, NewStorageRow, Recording};
use crate::s3_uploader::{generate_audio_filename, AudioUpload, MediaUploader};
use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Recording archive backed by explicit store and media handles
#[derive(Clone)]
pub struct RecordingArchive {
    store: Arc<dyn RecordingStore>,
    uploader: Arc<dyn MediaUploader>,
}

impl RecordingArchive {
    pub fn new(store: Arc<dyn RecordingStore>, uploader: Arc<dyn MediaUploader>) -> Self {
        Self { store, uploader }
    }

    /// Recordings matching every non-empty filter, most recent first.
    /// Filter values are trimmed; whitespace-only values are ignored.
    #[instrument(skip(self, filters))]
    pub async fn search(
        &self,
        filters: &SearchFilters,
        page: Option<Page>,
    ) -> Result<Vec<Recording>, ArchiveError> {
        let compiled = compile(&filters.clone().normalized());
        debug!(
            conditions = compiled.conditions().len(),
            predicate = %compiled.predicate(),
            "Compiled search filters"
        );

        let rows = self.store.search(&compiled, page).await.map_err(|e| {
            error!(error = %e, "Recording search failed");
            ArchiveError::Store(e)
        })?;

        metrics::counter!("archive.searches").increment(1);

        Ok(rows.into_iter().map(Recording::from).collect())
    }

    /// Recording by store identity
    pub async fn get(&self, id: i64) -> Result<Option<Recording>, ArchiveError> {
        let row = self.store.get(id).await.map_err(|e| {
            error!(error = %e, id, "Recording lookup failed");
            ArchiveError::Store(e)
        })?;

        Ok(row.map(Recording::from))
    }

    /// Playable URL for a recording, `None` when the recording is unknown
    /// or has no media
    pub async fn playback_url(&self, id: i64) -> Result<Option<String>, ArchiveError> {
        let file_path = match self.get(id).await?.and_then(|r| r.file_path) {
            Some(path) => path,
            None => return Ok(None),
        };

        let url = self
            .uploader
            .playback_url(&file_path)
            .await
            .map_err(ArchiveError::Upload)?;

        Ok(Some(url))
    }

    /// Store a new recording.
    ///
    /// With audio, the audio is uploaded first and its URL becomes the media
    /// location. Without audio, the recording must already carry one. A
    /// failed upload inserts nothing; a failed insert leaves the uploaded
    /// object in place.
    #[instrument(skip(self, recording, audio), fields(recording_id = ?recording.recording_id))]
    pub async fn add_recording(
        &self,
        mut recording: NewRecording,
        audio: Option<AudioUpload>,
    ) -> Result<(), ArchiveError> {
        if audio.is_none() && !recording.has_media_location() {
            return Err(ArchiveError::MissingMediaLocation);
        }

        let mut uploaded = None;
        if let Some(audio) = audio {
            let prefix = recording.recording_id.as_deref().unwrap_or_default();
            let filename = generate_audio_filename(prefix, &audio.format);

            let url = self
                .uploader
                .upload(&filename, &audio)
                .await
                .map_err(|e| {
                    error!(error = %e, filename = %filename, "Audio upload failed");
                    metrics::counter!("archive.uploads.failed").increment(1);
                    ArchiveError::Upload(e)
                })?;

            recording.file_path = Some(url.clone());
            recording.file_size = Some(audio.size_bytes());
            uploaded = Some(url);
        }

        let row = match NewStorageRow::try_from(&recording) {
            Ok(row) => row,
            Err(e) => {
                return Err(match uploaded {
                    Some(url) => {
                        record_orphan(&url, &e);
                        ArchiveError::Upload(anyhow!("uploader returned an unusable media URL {url:?}"))
                    }
                    None => e,
                });
            }
        };

        if let Err(e) = self.store.insert(&row).await {
            match uploaded {
                Some(url) => record_orphan(&url, &e),
                None => error!(error = %e, "Recording insert failed"),
            }
            return Err(ArchiveError::Store(e));
        }

        info!(file_path = %row.file_path, "Recording added");
        metrics::counter!("archive.recordings.created").increment(1);

        Ok(())
    }

    /// Store connectivity check
    pub async fn ping(&self) -> Result<(), ArchiveError> {
        self.store.ping().await.map_err(ArchiveError::Store)
    }
}

/// Uploaded media that no stored row points at
fn record_orphan(url: &str, error: &dyn std::fmt::Display) {
    error!(error = %error, url = %url, "Recording not stored after upload; media left orphaned");
    metrics::counter!("archive.inserts.orphaned").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryRecordingStore;
    use crate::metadata_store::MockRecordingStore;
    use crate::recording::Direction;
    use crate::s3_uploader::MockMediaUploader;
    use chrono::{TimeZone, Utc};

    fn archive_with(store: impl RecordingStore + 'static, uploader: impl MediaUploader + 'static) -> RecordingArchive {
        RecordingArchive::new(Arc::new(store), Arc::new(uploader))
    }

    fn memory_archive() -> (Arc<MemoryRecordingStore>, RecordingArchive) {
        let store = Arc::new(MemoryRecordingStore::new());
        let archive = RecordingArchive::new(store.clone(), Arc::new(MockMediaUploader::new()));
        (store, archive)
    }

    fn linked(recording_id: &str) -> NewRecording {
        NewRecording {
            recording_id: Some(recording_id.to_string()),
            file_path: Some(format!("https://media.example.com/{recording_id}.mp3")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_media_rejected_before_any_call() {
        let mut store = MockRecordingStore::new();
        store.expect_insert().times(0);
        let mut uploader = MockMediaUploader::new();
        uploader.expect_upload().times(0);

        let archive = archive_with(store, uploader);
        let result = archive
            .add_recording(NewRecording { dnis: Some("18005551234".into()), ..Default::default() }, None)
            .await;

        assert!(matches!(result, Err(ArchiveError::MissingMediaLocation)));
    }

    #[tokio::test]
    async fn test_upload_then_insert_with_uploaded_url() {
        let mut uploader = MockMediaUploader::new();
        uploader
            .expect_upload()
            .withf(|filename, audio| filename.starts_with("REC-9_") && filename.ends_with(".wav") && audio.data.len() == 3)
            .times(1)
            .returning(|filename, _| Ok(format!("https://bucket.s3.us-east-1.amazonaws.com/recordings/{filename}")));

        let mut store = MockRecordingStore::new();
        store
            .expect_insert()
            .withf(|row| {
                row.file_path.starts_with("https://bucket.s3.us-east-1.amazonaws.com/recordings/REC-9_")
                    && row.file_size == Some(3)
                    && row.recording_id.as_deref() == Some("REC-9")
            })
            .times(1)
            .returning(|_| Ok(()));

        let archive = archive_with(store, uploader);
        let recording = NewRecording {
            recording_id: Some("REC-9".into()),
            ..Default::default()
        };

        archive
            .add_recording(recording, Some(AudioUpload::new(vec![1, 2, 3], "wav")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_failure_skips_insert() {
        let mut uploader = MockMediaUploader::new();
        uploader
            .expect_upload()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("access denied")));
        let mut store = MockRecordingStore::new();
        store.expect_insert().times(0);

        let archive = archive_with(store, uploader);
        let result = archive
            .add_recording(NewRecording::default(), Some(AudioUpload::new(vec![0; 16], "mp3")))
            .await;

        assert!(matches!(result, Err(ArchiveError::Upload(_))));
    }

    #[tokio::test]
    async fn test_insert_failure_after_upload_is_returned() {
        let mut uploader = MockMediaUploader::new();
        uploader
            .expect_upload()
            .times(1)
            .returning(|_, _| Ok("https://media.example.com/a.mp3".to_string()));
        let mut store = MockRecordingStore::new();
        store
            .expect_insert()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let archive = archive_with(store, uploader);
        let result = archive
            .add_recording(NewRecording::default(), Some(AudioUpload::new(vec![0; 16], "mp3")))
            .await;

        assert!(matches!(result, Err(ArchiveError::Store(_))));
    }

    #[tokio::test]
    async fn test_blank_upload_url_is_not_inserted() {
        let mut uploader = MockMediaUploader::new();
        uploader
            .expect_upload()
            .times(1)
            .returning(|_, _| Ok("   ".to_string()));
        let mut store = MockRecordingStore::new();
        store.expect_insert().times(0);

        let archive = archive_with(store, uploader);
        let result = archive
            .add_recording(NewRecording::default(), Some(AudioUpload::new(vec![0; 16], "mp3")))
            .await;

        assert!(matches!(result, Err(ArchiveError::Upload(_))));
    }

    #[tokio::test]
    async fn test_search_trims_filter_values() {
        let (_, archive) = memory_archive();

        let mut toll_free = linked("TF");
        toll_free.dnis = Some("18005551234".into());
        let mut local = linked("LOCAL");
        local.dnis = Some("2125550000".into());
        archive.add_recording(toll_free, None).await.unwrap();
        archive.add_recording(local, None).await.unwrap();

        let padded = SearchFilters {
            dnis: Some("  1800 ".into()),
            ..Default::default()
        };
        let found = archive.search(&padded, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].recording_id.as_deref(), Some("TF"));

        let blank = SearchFilters {
            dnis: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(archive.search(&blank, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_media_location_inserted_without_upload() {
        let mut uploader = MockMediaUploader::new();
        uploader.expect_upload().times(0);
        let mut store = MockRecordingStore::new();
        store
            .expect_insert()
            .withf(|row| row.file_path == "https://media.example.com/REC-1.mp3")
            .times(1)
            .returning(|_| Ok(()));

        let archive = archive_with(store, uploader);
        archive.add_recording(linked("REC-1"), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_search_errors_propagate() {
        let mut store = MockRecordingStore::new();
        store
            .expect_search()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("store unavailable")));

        let archive = archive_with(store, MockMediaUploader::new());
        let result = archive.search(&SearchFilters::default(), None).await;

        assert!(matches!(result, Err(ArchiveError::Store(_))));
    }

    #[tokio::test]
    async fn test_search_direction_and_duration_scenario() {
        let (_, archive) = memory_archive();

        let mut inbound = linked("IN-90");
        inbound.direction = Some(Direction::Inbound);
        inbound.duration = Some(90);
        let mut outbound = linked("OUT-200");
        outbound.direction = Some(Direction::Outbound);
        outbound.duration = Some(200);
        archive.add_recording(inbound, None).await.unwrap();
        archive.add_recording(outbound, None).await.unwrap();

        let filters = SearchFilters {
            direction: Some("Inbound".into()),
            min_duration: Some("60".into()),
            ..Default::default()
        };
        let found = archive.search(&filters, None).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].recording_id.as_deref(), Some("IN-90"));
        assert_eq!(found[0].direction, Some(Direction::Inbound));
    }

    #[tokio::test]
    async fn test_search_orders_newest_first_and_undated_last() {
        let (_, archive) = memory_archive();

        for (name, day) in [("T2", Some(2)), ("UNDATED", None), ("T1", Some(1)), ("T3", Some(3))] {
            let mut recording = linked(name);
            recording.recording_date = day.map(|d| Utc.with_ymd_and_hms(2024, 6, d, 9, 0, 0).unwrap());
            archive.add_recording(recording, None).await.unwrap();
        }

        let found = archive.search(&SearchFilters::default(), None).await.unwrap();
        let order: Vec<_> = found.iter().filter_map(|r| r.recording_id.as_deref()).collect();
        assert_eq!(order, vec!["T3", "T2", "T1", "UNDATED"]);
    }

    #[tokio::test]
    async fn test_single_field_result_is_independent_of_other_records() {
        let (_, archive) = memory_archive();

        let mut sales = linked("S");
        sales.workgroup = Some("Sales".into());
        let mut sales_outbound = linked("SO");
        sales_outbound.workgroup = Some("Sales_Outbound".into());
        let unassigned = linked("U");
        for recording in [sales, sales_outbound, unassigned] {
            archive.add_recording(recording, None).await.unwrap();
        }

        let filters = SearchFilters {
            workgroup: Some("Sales".into()),
            ..Default::default()
        };
        let found = archive.search(&filters, None).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].workgroup.as_deref(), Some("Sales"));
    }

    #[tokio::test]
    async fn test_get_and_playback_url() {
        let (store, _) = memory_archive();
        let mut uploader = MockMediaUploader::new();
        uploader
            .expect_playback_url()
            .returning(|path| Ok(format!("{path}?signed=1")));
        let archive = RecordingArchive::new(store, Arc::new(uploader));

        archive.add_recording(linked("REC-5"), None).await.unwrap();

        let recording = archive.get(1).await.unwrap().unwrap();
        assert_eq!(recording.recording_id.as_deref(), Some("REC-5"));

        let url = archive.playback_url(1).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://media.example.com/REC-5.mp3?signed=1"));
        assert_eq!(archive.playback_url(99).await.unwrap(), None);
    }
}
