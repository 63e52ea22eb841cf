//! Entries produced by [`WebDavDrive`].

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::any::Any;
use std::io;
use std::sync::{Arc, Weak};
use tokio_util::io::StreamReader;

use vdrive_kernel::drive::{
    Content, ContentReader, ContentUrl, Drive, DriveError, DriveResult, Entry, EntryMeta,
    EntryRecord, EntryType, UNKNOWN_SIZE,
};
use vdrive_kernel::i18n::t;

use crate::drive::WebDavDrive;

/// A file or collection on a WebDAV share.
#[derive(Debug, Clone)]
pub struct WebDavEntry {
    pub(crate) path: String,
    pub(crate) entry_type: EntryType,
    pub(crate) size: i64,
    pub(crate) mod_time: i64,
    pub(crate) drive: Weak<WebDavDrive>,
}

impl WebDavEntry {
    /// Rebuild an entry from a cache record.
    pub(crate) fn from_record(record: EntryRecord, drive: Weak<WebDavDrive>) -> Self {
        let size = if record.entry_type.is_dir() {
            UNKNOWN_SIZE
        } else {
            record.size
        };
        Self {
            path: record.path,
            entry_type: record.entry_type,
            size,
            mod_time: record.mod_time,
            drive,
        }
    }

    fn live_drive(&self) -> DriveResult<Arc<WebDavDrive>> {
        self.drive
            .upgrade()
            .ok_or_else(|| DriveError::other(t("drive.released", &[])))
    }

    /// Whether this entry was produced by `drive`.
    pub(crate) fn belongs_to(&self, drive: &Weak<WebDavDrive>) -> bool {
        Weak::ptr_eq(&self.drive, drive)
    }
}

impl Entry for WebDavEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn mod_time(&self) -> i64 {
        self.mod_time
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta::read_write()
    }

    fn drive(&self) -> DriveResult<Arc<dyn Drive>> {
        let drive: Arc<dyn Drive> = self.live_drive()?;
        Ok(drive)
    }

    fn content(&self) -> Option<&dyn Content> {
        if self.entry_type.is_file() {
            Some(self)
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Content for WebDavEntry {
    /// The resource URL. The share usually needs credentials, so the URL is
    /// always marked for proxying and never handed out.
    async fn get_url(&self) -> DriveResult<ContentUrl> {
        if self.entry_type.is_dir() {
            return Err(DriveError::not_allowed_paths(
                t("drive.not_a_file", &[self.path.as_str()]),
                [&self.path],
            ));
        }
        let drive = self.live_drive()?;
        let client = drive.client();
        let mut url = ContentUrl::proxied(client.build_url(&self.path).to_string());
        if let Some(auth) = client.basic_auth_header() {
            url = url.with_header("Authorization", auth);
        }
        Ok(url)
    }

    async fn get_reader(&self) -> DriveResult<ContentReader> {
        let drive = self.live_drive()?;
        let response = drive.client().send("GET", &self.path, &[], None).await?;
        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(ContentReader::Stream(Box::new(StreamReader::new(stream))))
    }
}
