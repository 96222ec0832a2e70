//! Call Recording Archive Service
//!
//! Stores call recordings for later retrieval. Each recording is a metadata
//! row in PostgreSQL pointing at an audio file, usually uploaded to S3 by this
//! service. Operators search the archive through an HTTP API using any
//! combination of filters, and receive playable links to the audio.
//!
//! ## Features
//!
//! - **Filter Compilation**: Search filters become one parameterised
//!   predicate; user text never reaches the SQL string
//! - **Typed Records**: A single column table maps storage rows to records
//!   and back, with canonical timestamps and nulls for blank text
//! - **Audio Upload**: Audio is uploaded before the metadata row is written,
//!   with multipart uploads for large files
//! - **Playback Links**: Stored links, or presigned URLs for private buckets
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API                 Recording Archive              PostgreSQL
//! ┌──────────────┐  search  ┌──────────────┐  predicate  ┌──────────────┐
//! │ /api/v1/     │─────────▶│ Filter       │────────────▶│ archiveindex │
//! │  recordings  │          │ Compiler     │             └──────────────┘
//! └──────────────┘          └──────────────┘                    ▲
//!        │ add                                                  │ row
//!        ▼                                                      │
//! ┌──────────────┐  upload  ┌──────────────┐   map       ┌──────────────┐
//! │ Recording    │─────────▶│ S3           │────────────▶│ Record       │
//! │ Archive      │          │ Uploader     │             │ Mapper       │
//! └──────────────┘          └──────────────┘             └──────────────┘
//! ```

pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod filter_compiler;
pub mod memory_store;
pub mod metadata_store;
pub mod recording;
pub mod s3_uploader;

pub use api::{create_router, start_api_server, AppState};
pub use archive::RecordingArchive;
pub use config::Config;
pub use error::ArchiveError;
pub use filter_compiler::{compile, CompiledFilter, SearchFilters};
pub use memory_store::MemoryRecordingStore;
pub use metadata_store::{Page, PgRecordingStore, RecordingStore};
pub use recording::{Direction, NewRecording, Recording, StorageRow};
pub use s3_uploader::{AudioUpload, MediaUploader, S3Uploader};
