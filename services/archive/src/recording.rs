//! Recording read/write models and the mapping to and from the flat
//! `archiveindex` row shape.
//!
//! The storage table uses flat lowercase column names; [`Column`] is the
//! single table of those names. Reads go `StorageRow -> Recording`, writes
//! go `NewRecording -> NewStorageRow`.

use crate::error::ArchiveError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use std::fmt;
use tracing::warn;

/// Name of the recordings table
pub const RECORDINGS_TABLE: &str = "archiveindex";

/// Columns of the `archiveindex` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    RecordingId,
    RecordingDate,
    Attributes,
    Direction,
    FilePath,
    FirstParticipant,
    OtherParticipants,
    Dnis,
    Ani,
    ToConnection,
    FromConnection,
    Workgroup,
    Duration,
    MediaType,
    RecordingType,
    FileSize,
    Tags,
}

/// Every column, in select order
pub const ALL_COLUMNS: [Column; 18] = [
    Column::Id,
    Column::RecordingId,
    Column::RecordingDate,
    Column::Attributes,
    Column::Direction,
    Column::FilePath,
    Column::FirstParticipant,
    Column::OtherParticipants,
    Column::Dnis,
    Column::Ani,
    Column::ToConnection,
    Column::FromConnection,
    Column::Workgroup,
    Column::Duration,
    Column::MediaType,
    Column::RecordingType,
    Column::FileSize,
    Column::Tags,
];

/// Columns written on insert, in placeholder order. The store assigns `id`.
pub const INSERT_COLUMNS: [Column; 17] = [
    Column::RecordingId,
    Column::MediaType,
    Column::RecordingType,
    Column::FilePath,
    Column::RecordingDate,
    Column::FileSize,
    Column::Direction,
    Column::FirstParticipant,
    Column::OtherParticipants,
    Column::ToConnection,
    Column::FromConnection,
    Column::Tags,
    Column::Attributes,
    Column::Dnis,
    Column::Duration,
    Column::Workgroup,
    Column::Ani,
];

impl Column {
    /// Storage column name
    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::RecordingId => "recordingid",
            Column::RecordingDate => "recordingdate",
            Column::Attributes => "attributes",
            Column::Direction => "direction",
            Column::FilePath => "filepath",
            Column::FirstParticipant => "firstparticipant",
            Column::OtherParticipants => "otherparticipants",
            Column::Dnis => "dnis",
            Column::Ani => "ani",
            Column::ToConnection => "toconnection",
            Column::FromConnection => "fromconnection",
            Column::Workgroup => "workgroup",
            Column::Duration => "duration",
            Column::MediaType => "mediatype",
            Column::RecordingType => "recordingtype",
            Column::FileSize => "filesize",
            Column::Tags => "tags",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single nullable column value
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Text(Option<String>),
    Integer(Option<i64>),
    Timestamp(Option<DateTime<Utc>>),
}

/// Call flow classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(alias = "inbound")]
    Inbound,
    #[serde(alias = "outbound")]
    Outbound,
    #[serde(alias = "intercom")]
    Intercom,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
            Direction::Intercom => "Intercom",
        }
    }

    /// Parse stored direction text, ignoring case
    pub fn from_text(text: &str) -> Option<Self> {
        [Direction::Inbound, Direction::Outbound, Direction::Intercom]
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(text.trim()))
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row as read from `archiveindex`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StorageRow {
    pub id: i64,
    #[sqlx(rename = "recordingid")]
    pub recording_id: Option<String>,
    #[sqlx(rename = "recordingdate")]
    pub recording_date: Option<DateTime<Utc>>,
    pub attributes: Option<String>,
    pub direction: Option<String>,
    #[sqlx(rename = "filepath")]
    pub file_path: Option<String>,
    #[sqlx(rename = "firstparticipant")]
    pub first_participant: Option<String>,
    #[sqlx(rename = "otherparticipants")]
    pub other_participants: Option<String>,
    pub dnis: Option<String>,
    pub ani: Option<String>,
    #[sqlx(rename = "toconnection")]
    pub to_connection: Option<String>,
    #[sqlx(rename = "fromconnection")]
    pub from_connection: Option<String>,
    pub workgroup: Option<String>,
    pub duration: Option<i64>,
    #[sqlx(rename = "mediatype")]
    pub media_type: Option<String>,
    #[sqlx(rename = "recordingtype")]
    pub recording_type: Option<String>,
    #[sqlx(rename = "filesize")]
    pub file_size: Option<i64>,
    pub tags: Option<String>,
}

impl StorageRow {
    /// Value of a column in this row
    pub fn value(&self, column: Column) -> RowValue {
        match column {
            Column::Id => RowValue::Integer(Some(self.id)),
            Column::RecordingDate => RowValue::Timestamp(self.recording_date),
            Column::Duration => RowValue::Integer(self.duration),
            Column::FileSize => RowValue::Integer(self.file_size),
            other => RowValue::Text(self.text(other).map(str::to_owned)),
        }
    }

    /// Text column accessor; `None` for non-text columns
    pub fn text(&self, column: Column) -> Option<&str> {
        let value = match column {
            Column::RecordingId => &self.recording_id,
            Column::Attributes => &self.attributes,
            Column::Direction => &self.direction,
            Column::FilePath => &self.file_path,
            Column::FirstParticipant => &self.first_participant,
            Column::OtherParticipants => &self.other_participants,
            Column::Dnis => &self.dnis,
            Column::Ani => &self.ani,
            Column::ToConnection => &self.to_connection,
            Column::FromConnection => &self.from_connection,
            Column::Workgroup => &self.workgroup,
            Column::MediaType => &self.media_type,
            Column::RecordingType => &self.recording_type,
            Column::Tags => &self.tags,
            Column::Id | Column::RecordingDate | Column::Duration | Column::FileSize => {
                return None;
            }
        };
        value.as_deref()
    }
}

/// Row written to `archiveindex`. Absent fields are explicit nulls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewStorageRow {
    pub recording_id: Option<String>,
    pub media_type: Option<String>,
    pub recording_type: Option<String>,
    pub file_path: String,
    pub recording_date: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub direction: Option<String>,
    pub first_participant: Option<String>,
    pub other_participants: Option<String>,
    pub to_connection: Option<String>,
    pub from_connection: Option<String>,
    pub tags: Option<String>,
    pub attributes: Option<String>,
    pub dnis: Option<String>,
    pub duration: Option<i64>,
    pub workgroup: Option<String>,
    pub ani: Option<String>,
}

impl NewStorageRow {
    /// Value bound for a column; `id` is never written
    pub fn value(&self, column: Column) -> RowValue {
        match column {
            Column::Id => RowValue::Integer(None),
            Column::RecordingId => RowValue::Text(self.recording_id.clone()),
            Column::RecordingDate => RowValue::Timestamp(self.recording_date),
            Column::Attributes => RowValue::Text(self.attributes.clone()),
            Column::Direction => RowValue::Text(self.direction.clone()),
            Column::FilePath => RowValue::Text(Some(self.file_path.clone())),
            Column::FirstParticipant => RowValue::Text(self.first_participant.clone()),
            Column::OtherParticipants => RowValue::Text(self.other_participants.clone()),
            Column::Dnis => RowValue::Text(self.dnis.clone()),
            Column::Ani => RowValue::Text(self.ani.clone()),
            Column::ToConnection => RowValue::Text(self.to_connection.clone()),
            Column::FromConnection => RowValue::Text(self.from_connection.clone()),
            Column::Workgroup => RowValue::Text(self.workgroup.clone()),
            Column::Duration => RowValue::Integer(self.duration),
            Column::MediaType => RowValue::Text(self.media_type.clone()),
            Column::RecordingType => RowValue::Text(self.recording_type.clone()),
            Column::FileSize => RowValue::Integer(self.file_size),
            Column::Tags => RowValue::Text(self.tags.clone()),
        }
    }

    /// Materialize the row as the store would after assigning `id`
    pub fn into_row(self, id: i64) -> StorageRow {
        StorageRow {
            id,
            recording_id: self.recording_id,
            recording_date: self.recording_date,
            attributes: self.attributes,
            direction: self.direction,
            file_path: Some(self.file_path),
            first_participant: self.first_participant,
            other_participants: self.other_participants,
            dnis: self.dnis,
            ani: self.ani,
            to_connection: self.to_connection,
            from_connection: self.from_connection,
            workgroup: self.workgroup,
            duration: self.duration,
            media_type: self.media_type,
            recording_type: self.recording_type,
            file_size: self.file_size,
            tags: self.tags,
        }
    }
}

/// A recorded interaction as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub id: i64,
    pub recording_id: Option<String>,
    #[serde(serialize_with = "serialize_canonical")]
    pub recording_date: DateTime<Utc>,
    pub attributes: Option<String>,
    pub direction: Option<Direction>,
    pub file_path: Option<String>,
    pub first_participant: Option<String>,
    pub other_participants: Option<String>,
    pub dnis: Option<String>,
    pub ani: Option<String>,
    pub to_connection: Option<String>,
    pub from_connection: Option<String>,
    pub workgroup: Option<String>,
    pub duration: Option<i64>,
    pub media_type: Option<String>,
    pub recording_type: Option<String>,
    pub file_size: Option<i64>,
    pub tags: Option<String>,
}

impl Recording {
    /// Map a storage row, substituting `now` for a missing timestamp
    pub fn from_row_at(row: StorageRow, now: DateTime<Utc>) -> Self {
        let direction = row.direction.as_deref().and_then(|text| {
            let parsed = Direction::from_text(text);
            if parsed.is_none() && !text.trim().is_empty() {
                warn!(id = row.id, direction = %text, "Unknown recording direction");
            }
            parsed
        });

        Self {
            id: row.id,
            recording_id: row.recording_id,
            recording_date: row.recording_date.unwrap_or(now).trunc_subsecs(3),
            attributes: row.attributes,
            direction,
            file_path: row.file_path,
            first_participant: row.first_participant,
            other_participants: row.other_participants,
            dnis: row.dnis,
            ani: row.ani,
            to_connection: row.to_connection,
            from_connection: row.from_connection,
            workgroup: row.workgroup,
            duration: row.duration,
            media_type: row.media_type,
            recording_type: row.recording_type,
            file_size: row.file_size,
            tags: row.tags,
        }
    }

    /// Timestamp in canonical text form
    pub fn recording_date_text(&self) -> String {
        canonical_timestamp(&self.recording_date)
    }
}

impl From<StorageRow> for Recording {
    fn from(row: StorageRow) -> Self {
        Self::from_row_at(row, Utc::now())
    }
}

/// Data for a new recording. Only the media location is required, and it
/// may be filled in by the upload step.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewRecording {
    pub recording_id: Option<String>,
    pub media_type: Option<String>,
    pub recording_type: Option<String>,
    pub file_path: Option<String>,
    pub recording_date: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub direction: Option<Direction>,
    pub first_participant: Option<String>,
    pub other_participants: Option<String>,
    pub to_connection: Option<String>,
    pub from_connection: Option<String>,
    pub tags: Option<String>,
    pub attributes: Option<String>,
    pub dnis: Option<String>,
    pub duration: Option<i64>,
    pub workgroup: Option<String>,
    pub ani: Option<String>,
}

impl NewRecording {
    /// Whether a usable media location is present
    pub fn has_media_location(&self) -> bool {
        non_blank(&self.file_path).is_some()
    }
}

impl TryFrom<&NewRecording> for NewStorageRow {
    type Error = ArchiveError;

    fn try_from(recording: &NewRecording) -> Result<Self, Self::Error> {
        let file_path = non_blank(&recording.file_path).ok_or(ArchiveError::MissingMediaLocation)?;

        Ok(Self {
            recording_id: non_blank(&recording.recording_id),
            media_type: non_blank(&recording.media_type),
            recording_type: non_blank(&recording.recording_type),
            file_path,
            recording_date: recording.recording_date,
            file_size: recording.file_size,
            direction: recording.direction.map(|d| d.as_str().to_string()),
            first_participant: non_blank(&recording.first_participant),
            other_participants: non_blank(&recording.other_participants),
            to_connection: non_blank(&recording.to_connection),
            from_connection: non_blank(&recording.from_connection),
            tags: non_blank(&recording.tags),
            attributes: non_blank(&recording.attributes),
            dnis: non_blank(&recording.dnis),
            duration: recording.duration,
            workgroup: non_blank(&recording.workgroup),
            ani: non_blank(&recording.ani),
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_canonical<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&canonical_timestamp(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn sample_new_recording() -> NewRecording {
        NewRecording {
            recording_id: Some("REC-001".to_string()),
            media_type: Some("audio".to_string()),
            recording_type: Some("call".to_string()),
            file_path: Some("https://bucket.s3.us-east-1.amazonaws.com/recordings/a.mp3".to_string()),
            recording_date: Some(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()),
            file_size: Some(48_000),
            direction: Some(Direction::Inbound),
            first_participant: Some("Sarah Conner (+12025550100)".to_string()),
            other_participants: Some("Kyle Reese (2041)".to_string()),
            to_connection: Some("2041".to_string()),
            from_connection: Some("+12025550100".to_string()),
            tags: Some("important,follow-up".to_string()),
            attributes: Some(r#"{"interaction_id":"INT-42"}"#.to_string()),
            dnis: Some("18005551234".to_string()),
            duration: Some(90),
            workgroup: Some("Support_Tier1".to_string()),
            ani: Some("+12025550100".to_string()),
        }
    }

    #[test]
    fn test_column_names_are_unique_and_lowercase() {
        let names: HashSet<_> = ALL_COLUMNS.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), ALL_COLUMNS.len());
        assert!(names.iter().all(|n| n.chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn test_insert_columns_exclude_id() {
        assert!(!INSERT_COLUMNS.contains(&Column::Id));
        let all: HashSet<_> = ALL_COLUMNS.iter().filter(|c| **c != Column::Id).collect();
        let insert: HashSet<_> = INSERT_COLUMNS.iter().collect();
        assert_eq!(all, insert);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let new = sample_new_recording();
        let row = NewStorageRow::try_from(&new).unwrap().into_row(7);
        let recording = Recording::from_row_at(row, Utc::now());

        assert_eq!(recording.id, 7);
        assert_eq!(recording.recording_id, new.recording_id);
        assert_eq!(Some(recording.recording_date), new.recording_date);
        assert_eq!(recording.attributes, new.attributes);
        assert_eq!(recording.direction, new.direction);
        assert_eq!(recording.file_path, new.file_path);
        assert_eq!(recording.first_participant, new.first_participant);
        assert_eq!(recording.other_participants, new.other_participants);
        assert_eq!(recording.dnis, new.dnis);
        assert_eq!(recording.ani, new.ani);
        assert_eq!(recording.to_connection, new.to_connection);
        assert_eq!(recording.from_connection, new.from_connection);
        assert_eq!(recording.workgroup, new.workgroup);
        assert_eq!(recording.duration, new.duration);
        assert_eq!(recording.media_type, new.media_type);
        assert_eq!(recording.recording_type, new.recording_type);
        assert_eq!(recording.file_size, new.file_size);
        assert_eq!(recording.tags, new.tags);
    }

    #[test]
    fn test_null_timestamp_defaults_to_now() {
        let new = NewRecording {
            file_path: Some("/media/a.wav".to_string()),
            ..Default::default()
        };
        let row = NewStorageRow::try_from(&new).unwrap().into_row(1);
        assert_eq!(row.recording_date, None);

        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let recording = Recording::from_row_at(row, now);
        assert_eq!(recording.recording_date, now);
    }

    #[test]
    fn test_missing_media_location_rejected() {
        let mut new = sample_new_recording();
        new.file_path = None;
        assert!(matches!(
            NewStorageRow::try_from(&new),
            Err(ArchiveError::MissingMediaLocation)
        ));

        new.file_path = Some("   ".to_string());
        assert!(matches!(
            NewStorageRow::try_from(&new),
            Err(ArchiveError::MissingMediaLocation)
        ));
    }

    #[test]
    fn test_absent_fields_written_as_null() {
        let new = NewRecording {
            file_path: Some("/media/a.wav".to_string()),
            tags: Some(String::new()),
            duration: Some(0),
            ..Default::default()
        };
        let row = NewStorageRow::try_from(&new).unwrap();

        // every insert column is bound, absent ones as null
        for column in INSERT_COLUMNS {
            let value = row.value(column);
            match column {
                Column::FilePath => {
                    assert_eq!(value, RowValue::Text(Some("/media/a.wav".to_string())))
                }
                Column::Duration => assert_eq!(value, RowValue::Integer(Some(0))),
                _ => assert!(matches!(
                    value,
                    RowValue::Text(None) | RowValue::Integer(None) | RowValue::Timestamp(None)
                )),
            }
        }
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!(Direction::from_text("Inbound"), Some(Direction::Inbound));
        assert_eq!(Direction::from_text("outbound"), Some(Direction::Outbound));
        assert_eq!(Direction::from_text("INTERCOM"), Some(Direction::Intercom));
        assert_eq!(Direction::from_text("sideways"), None);

        let mut row = NewStorageRow::try_from(&sample_new_recording()).unwrap().into_row(3);
        row.direction = Some("sideways".to_string());
        assert_eq!(Recording::from_row_at(row, Utc::now()).direction, None);
    }

    #[test]
    fn test_recording_serializes_canonical_timestamp() {
        let row = NewStorageRow::try_from(&sample_new_recording()).unwrap().into_row(9);
        let recording = Recording::from_row_at(row, Utc::now());
        let json = serde_json::to_value(&recording).unwrap();

        assert_eq!(json["recording_date"], "2024-03-09T14:05:00.000Z");
        assert_eq!(json["direction"], "Inbound");
        assert_eq!(recording.recording_date_text(), "2024-03-09T14:05:00.000Z");
    }

    #[test]
    fn test_storage_row_text_accessor() {
        let row = NewStorageRow::try_from(&sample_new_recording()).unwrap().into_row(4);
        assert_eq!(row.text(Column::Dnis), Some("18005551234"));
        assert_eq!(row.text(Column::Duration), None);
        assert_eq!(row.value(Column::Id), RowValue::Integer(Some(4)));
    }
}
