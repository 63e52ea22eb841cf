//! `207 Multi-Status` parsing.
//!
//! Only the handful of properties the drive needs are extracted. Element
//! names are matched on their local part, so any namespace prefix works.

use quick_xml::Reader;
use quick_xml::events::Event;
use vdrive_kernel::drive::{DriveError, DriveResult};
use vdrive_kernel::i18n::t;

/// One `<response>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PropfindResponse {
    pub href: String,
    pub last_modified: Option<String>,
    pub size: i64,
    pub etag: Option<String>,
    pub is_collection: bool,
}

fn bad_response(detail: impl std::fmt::Display) -> DriveError {
    let detail = detail.to_string();
    DriveError::other(t("drive.webdav.bad_response", &[detail.as_str()]))
}

pub(crate) fn parse_multistatus(xml: &str) -> DriveResult<Vec<PropfindResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut current: Option<PropfindResponse> = None;
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(bad_response)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "response" {
                    current = Some(PropfindResponse::default());
                }
                if name == "collection" && stack.last().is_some_and(|p| p == "resourcetype") {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = e.local_name();
                if name.as_ref() == b"collection"
                    && stack.last().is_some_and(|p| p == "resourcetype")
                {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
            }
            Event::Text(text) => {
                let (Some(res), Some(element)) = (current.as_mut(), stack.last()) else {
                    continue;
                };
                let value = text.unescape().map_err(bad_response)?.into_owned();
                match element.as_str() {
                    "href" if stack.len() >= 2 && stack[stack.len() - 2] == "response" => {
                        res.href = value;
                    }
                    "getlastmodified" => res.last_modified = Some(value),
                    "getcontentlength" => res.size = value.trim().parse().unwrap_or(0),
                    "getetag" => res.etag = Some(value),
                    _ => {}
                }
            }
            Event::End(_) => {
                if stack.pop().as_deref() == Some("response") {
                    if let Some(res) = current.take() {
                        responses.push(res);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(responses)
}
