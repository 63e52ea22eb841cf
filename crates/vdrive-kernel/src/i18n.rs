//! User-facing message lookup.
//!
//! Message text is resolved through a process-wide [`Translator`]. The
//! default is a built-in English catalog; embedders install their own with
//! [`set_translator`] before any drive is constructed.

use std::sync::{Arc, OnceLock};

/// Resolves a message key plus positional arguments to display text.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str, args: &[&str]) -> String;
}

/// Built-in English catalog. Unknown keys render as the key itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishCatalog;

impl EnglishCatalog {
    fn template(key: &str) -> Option<&'static str> {
        Some(match key {
            "drive.file_exists" => "file already exists",
            "drive.file_not_readable" => "file '{}' is not readable",
            "drive.copy_type_mismatch1" => "cannot copy directory '{}' onto file '{}'",
            "drive.copy_type_mismatch2" => "cannot copy file '{}' onto directory '{}'",
            "drive.not_a_file" => "'{}' is not a file",
            "drive.not_a_dir" => "'{}' is not a directory",
            "drive.read_only" => "drive is read-only",
            "drive.root_protected" => "the drive root cannot be removed",
            "drive.released" => "drive is no longer available",
            "drive.parent_not_found" => "parent directory of '{}' does not exist",
            "drive.webdav.wrong_user_or_password" => "wrong username or password",
            "drive.webdav.remote_error" => "remote server responded with status {}",
            "drive.webdav.bad_response" => "malformed multi-status response: {}",
            "util.request_failed" => "request failed with status {}",
            _ => return None,
        })
    }
}

impl Translator for EnglishCatalog {
    fn translate(&self, key: &str, args: &[&str]) -> String {
        match Self::template(key) {
            Some(template) => fill(template, args),
            None => key.to_string(),
        }
    }
}

/// Substitute `{}` placeholders in order. Surplus arguments are ignored and
/// missing ones leave the placeholder empty.
fn fill(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut pieces = template.split("{}").peekable();
    while let Some(piece) = pieces.next() {
        out.push_str(piece);
        if pieces.peek().is_some() {
            if let Some(arg) = args.next() {
                out.push_str(arg);
            }
        }
    }
    out
}

static TRANSLATOR: OnceLock<Arc<dyn Translator>> = OnceLock::new();

/// Install the process-wide translator.
///
/// Returns `false` if one was already installed (including the default,
/// which is installed lazily on first lookup).
pub fn set_translator(translator: Arc<dyn Translator>) -> bool {
    TRANSLATOR.set(translator).is_ok()
}

/// Translate a message key with positional arguments.
pub fn t(key: &str, args: &[&str]) -> String {
    TRANSLATOR
        .get_or_init(|| Arc::new(EnglishCatalog))
        .translate(key, args)
}
