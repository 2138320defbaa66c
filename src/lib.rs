//! Read/write NTFS volume engine.
//!
//! Layered bottom-up: [`fixup`] and [`data_runs`] frame the raw wire
//! formats; [`bitmap`], [`cluster_stream`] and [`compression`] turn run
//! lists into cluster I/O; [`attribute_record`], [`attribute`] and
//! [`file_record`] make up a single FileRecord; [`mft`] bootstraps and
//! grows the table those records live in; [`mft_updater`] keeps a record
//! (and its extensions) within budget as attributes grow; [`index`] is the
//! generic B-tree-ish index view that [`directory`] and [`aux_index`]
//! specialize; [`security`] is the `$Secure` dedup store; [`file`] ties
//! attribute, directory and MFT mutation together into file-level
//! operations; [`formatter`], [`checker`] and [`detector`] work at the
//! whole-volume level.

pub mod attribute;
pub mod attribute_list;
pub mod attribute_record;
pub mod aux_index;
pub mod bitmap;
pub mod boot_sector;
pub mod checker;
pub mod cluster_stream;
pub mod compression;
pub mod data_runs;
pub mod detector;
pub mod directory;
pub mod error;
pub mod file;
pub mod file_record;
pub mod fixup;
pub mod formatter;
pub mod index;
pub mod logfile;
pub mod mft;
pub mod mft_updater;
pub mod security;
pub mod structures;
pub mod timestamps;
pub mod upcase;
pub mod volume;

pub use attribute::{NonResidentAttribute, RawBuffer};
pub use attribute_list::{AttributeList, AttributeListEntry};
pub use attribute_record::{AttributeBody, AttributeRecord};
pub use aux_index::{ObjectIdIndex, QuotaEntry, QuotaIndex, ReparsePointIndex};
pub use bitmap::ClusterBitmap;
pub use boot_sector::{BootSector, ClusterSize};
pub use checker::{CheckReport, Checker};
pub use cluster_stream::RawClusterStream;
pub use compression::{CompressedClusterStream, UnitKind};
pub use data_runs::{CookedDataRuns, CookedRun, ExtentKey, RawRun};
pub use detector::detect;
pub use directory::{Directory, FileNameRecord};
pub use error::{NtfsError, Result};
pub use file::{File, FileStream};
pub use file_record::FileRecord;
pub use fixup::FixupRecord;
pub use formatter::{format_volume, FormatOptions};
pub use index::{Collator, Index, RawEntry};
pub use logfile::size_log_file;
pub use mft::MasterFileTable;
pub use mft_updater::{update_record_in_mft, RecordSet};
pub use security::SecurityStore;
pub use structures::{FileRecordReference, Namespace, StandardInformation};
pub use timestamps::FileTimes;
pub use upcase::UpCaseTable;
pub use volume::{BlockCache, BlockCompressor, RandomSource, RawVolume};
