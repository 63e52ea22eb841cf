//! # vdrive-webdav
//!
//! WebDAV backend for vdrive.
//!
//! [`WebDavDrive`] maps the drive operations onto plain WebDAV verbs:
//! `PROPFIND` for lookups and listings, `PUT`/`MKCOL`/`DELETE` for
//! mutations, `COPY`/`MOVE` for server-side transfers within one share.
//! File content is always served through the proxy since the share usually
//! requires credentials.
//!
//! ```ignore
//! let config = WebDavConfig::new("https://dav.example.com/files/")?
//!     .with_auth("alice", "secret")
//!     .with_cache_ttl(Duration::from_secs(30));
//! let drive = WebDavDrive::new(config).await?;
//! for entry in drive.list("/").await? {
//!     println!("{}", entry.path());
//! }
//! ```

mod client;
mod config;
mod drive;
mod entry;
mod multistatus;

pub use config::WebDavConfig;
pub use drive::WebDavDrive;
pub use entry::WebDavEntry;
