//! `multipart/form-data` body parser.
//!
//! The parser walks the body strictly, in this order for every part:
//!
//! ```text
//! --boundary CRLF
//! Content-Disposition: form-data; name="field"[; filename="a.txt"] CRLF
//! [Content-Type: text/plain CRLF]
//! CRLF
//! content... CRLF
//! --boundary-- (closing) | --boundary CRLF (next part)
//! ```
//!
//! Any deviation is reported immediately; nothing is skipped or recovered.

use crate::query::QueryDict;
use memchr::memmem;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("invalid Content-Type for a multipart body: {0:?}")]
    InvalidContentType(String),
    #[error("multipart boundary is empty")]
    EmptyBoundary,
    #[error("part delimiter does not match the boundary")]
    InvalidBoundary,
    #[error("unexpected characters after the part delimiter")]
    InvalidBoundaryEnding,
    #[error("part header is missing the ': ' separator")]
    InvalidHeader,
    #[error("part has no Content-Disposition header")]
    MissingContentDisposition,
    #[error("malformed Content-Disposition: {0}")]
    InvalidContentDisposition(&'static str),
    #[error("value of field `{0}` is not valid UTF-8")]
    InvalidEncoding(String),
    #[error("body ended before the closing boundary")]
    Unterminated,
}

/// A file received in a multipart body.
///
/// The content is held in memory; [`UploadedFile::save`] writes it to
/// [`UploadedFile::path`] when the application decides to keep it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    path: PathBuf,
    size: usize,
    data: Vec<u8>,
    content_type: String,
    boundary: String,
    content_disposition: String,
    file_name: String,
}

impl UploadedFile {
    /// Destination hint: the configured media root joined with the file name.
    ///
    /// Only the last component of the client supplied name is used.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Part `Content-Type`, empty if the client sent none.
    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[inline]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Raw `Content-Disposition` value of the part.
    #[inline]
    pub fn content_disposition(&self) -> &str {
        &self.content_disposition
    }

    /// File name as sent by the client.
    #[inline]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Writes the content to [`UploadedFile::path`].
    pub fn save(&self) -> io::Result<()> {
        fs::write(&self.path, &self.data)
    }
}

/// Fields and files of a parsed multipart body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: QueryDict,
    pub files: Vec<(String, UploadedFile)>,
}

impl MultipartForm {
    /// First file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Every file uploaded under `name`, in order.
    pub fn files(&self, name: &str) -> Vec<&UploadedFile> {
        self.files
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, f)| f)
            .collect()
    }
}

/// Extracts the `boundary` parameter of a `multipart/*` content type,
/// without quotes and leading dashes.
pub(crate) fn get_boundary(content_type: &str) -> Result<String, MultipartError> {
    let invalid = || MultipartError::InvalidContentType(content_type.to_string());

    let (media_type, params) = content_type.split_once(';').unwrap_or((content_type, ""));
    if !media_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        return Err(invalid());
    }

    let boundary = params
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .ok_or_else(invalid)?;

    match boundary.trim_start_matches('-') {
        "" => Err(MultipartError::EmptyBoundary),
        boundary => Ok(boundary.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Delimiter,
    PartHeaders,
    Content,
}

/// Part currently being read.
#[derive(Default)]
struct Part {
    name: Option<String>,
    file_name: Option<String>,
    content_type: String,
    disposition: String,
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    boundary: &'a str,
    /// Delimiter line as it appeared on the wire, dashes included.
    delimiter: &'a [u8],
}

/// Parses a complete multipart body.
///
/// # Examples
/// ```
/// use trellis_web::parse_multipart;
///
/// let body = b"--XyZ\r\n\
///     Content-Disposition: form-data; name=\"title\"\r\n\r\n\
///     Holiday\r\n\
///     --XyZ\r\n\
///     Content-Disposition: form-data; name=\"photo\"; filename=\"beach.jpg\"\r\n\
///     Content-Type: image/jpeg\r\n\r\n\
///     JPEGDATA\r\n\
///     --XyZ--\r\n";
///
/// let form = parse_multipart("multipart/form-data; boundary=XyZ", body, "/srv/media").unwrap();
/// assert_eq!(form.fields.get("title"), Some("Holiday"));
///
/// let photo = form.file("photo").unwrap();
/// assert_eq!(photo.data(), b"JPEGDATA");
/// assert_eq!(photo.path(), std::path::Path::new("/srv/media/beach.jpg"));
/// ```
pub fn parse_multipart(
    content_type: &str,
    body: &[u8],
    media_root: &str,
) -> Result<MultipartForm, MultipartError> {
    let boundary = get_boundary(content_type)?;
    let mut parser = Parser {
        data: body,
        pos: 0,
        boundary: &boundary,
        delimiter: &[],
    };

    let mut form = MultipartForm::default();
    let mut part = Part::default();
    let mut state = State::Delimiter;

    loop {
        state = match state {
            State::Delimiter => match parser.delimiter()? {
                true => return Ok(form),
                false => State::PartHeaders,
            },
            State::PartHeaders => match parser.header_line(&mut part)? {
                true => State::Content,
                false => State::PartHeaders,
            },
            State::Content => {
                let content = parser.content()?;
                let part = std::mem::take(&mut part);
                let name = part
                    .name
                    .ok_or(MultipartError::InvalidContentDisposition("missing name"))?;

                match part.file_name {
                    None => {
                        let value = simdutf8::basic::from_utf8(content)
                            .map_err(|_| MultipartError::InvalidEncoding(name.clone()))?;
                        form.fields.push(name, value.to_string());
                    }
                    Some(file_name) => {
                        let file = UploadedFile {
                            path: upload_path(media_root, &file_name),
                            size: content.len(),
                            data: content.to_vec(),
                            content_type: part.content_type,
                            boundary: boundary.clone(),
                            content_disposition: part.disposition,
                            file_name,
                        };
                        form.files.push((name, file));
                    }
                }
                State::Delimiter
            }
        };
    }
}

fn upload_path(media_root: &str, file_name: &str) -> PathBuf {
    let base = Path::new(file_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("upload"));
    Path::new(media_root).join(base)
}

impl<'a> Parser<'a> {
    /// Bytes up to the next CRLF, which is consumed. `None` at end of input
    /// without a CRLF.
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = memmem::find(rest, b"\r\n")?;
        self.pos += end + 2;
        Some(&rest[..end])
    }

    /// Reads a delimiter line; `true` when it is the closing one.
    fn delimiter(&mut self) -> Result<bool, MultipartError> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return Err(MultipartError::Unterminated);
        }

        let (line, terminated) = match memmem::find(rest, b"\r\n") {
            Some(end) => (&rest[..end], true),
            None => (rest, false),
        };
        if !line.starts_with(b"--") {
            return Err(MultipartError::InvalidBoundary);
        }

        let expected = self.boundary.trim_matches('-').as_bytes();
        let trimmed = |bytes: &'a [u8]| -> &'a [u8] {
            let start = bytes.iter().position(|&b| b != b'-').unwrap_or(bytes.len());
            let end = bytes.iter().rposition(|&b| b != b'-').map_or(start, |i| i + 1);
            &bytes[start..end.max(start)]
        };

        if let Some(core) = line.strip_suffix(b"--") {
            if trimmed(core) == expected && (self.delimiter.is_empty() || core == self.delimiter) {
                self.pos = self.data.len();
                return Ok(true);
            }
        }
        let core = trimmed(line);
        if core != expected {
            return Err(match core.starts_with(expected) {
                true => MultipartError::InvalidBoundaryEnding,
                false => MultipartError::InvalidBoundary,
            });
        }
        if !terminated {
            return Err(MultipartError::Unterminated);
        }

        self.delimiter = line;
        self.pos += line.len() + 2;
        Ok(false)
    }

    /// Reads one part header line; `true` on the blank line ending them.
    fn header_line(&mut self, part: &mut Part) -> Result<bool, MultipartError> {
        let line = self.line().ok_or(MultipartError::Unterminated)?;
        if line.is_empty() {
            return match part.name {
                Some(_) => Ok(true),
                None => Err(MultipartError::MissingContentDisposition),
            };
        }

        let line = String::from_utf8_lossy(line);
        let (name, value) = line
            .split_once(": ")
            .ok_or(MultipartError::InvalidHeader)?;

        if name.eq_ignore_ascii_case("content-disposition") {
            let (field, file_name) = parse_disposition(value)?;
            part.name = Some(field);
            part.file_name = file_name;
            part.disposition = value.to_string();
        } else if name.eq_ignore_ascii_case("content-type") {
            part.content_type = value.trim().to_string();
        }
        Ok(false)
    }

    /// Content up to the next `CRLF` + delimiter; the CRLF is consumed.
    fn content(&mut self) -> Result<&'a [u8], MultipartError> {
        let mut marker = Vec::with_capacity(self.delimiter.len() + 2);
        marker.extend_from_slice(b"\r\n");
        marker.extend_from_slice(self.delimiter);

        let rest = &self.data[self.pos..];
        let end = memmem::find(rest, &marker).ok_or(MultipartError::Unterminated)?;
        self.pos += end + 2;
        Ok(&rest[..end])
    }
}

/// Splits `form-data; name="a"; filename="b"` into the name and file name.
fn parse_disposition(value: &str) -> Result<(String, Option<String>), MultipartError> {
    let invalid = MultipartError::InvalidContentDisposition;

    let (kind, mut rest) = value.split_once(';').ok_or(invalid("missing name"))?;
    if !kind.trim().eq_ignore_ascii_case("form-data") {
        return Err(invalid("disposition type is not form-data"));
    }

    let (mut name, mut file_name) = (None, None);
    while !rest.is_empty() {
        rest = rest
            .strip_prefix(' ')
            .ok_or(invalid("missing space after ';'"))?;

        let (key, after) = rest.split_once('=').ok_or(invalid("parameter without '='"))?;
        let after = after
            .strip_prefix('"')
            .ok_or(invalid("missing opening quote"))?;
        let (param, after) = after
            .split_once('"')
            .ok_or(invalid("missing closing quote"))?;

        match key {
            k if k.eq_ignore_ascii_case("name") => name = Some(param.to_string()),
            k if k.eq_ignore_ascii_case("filename") => file_name = Some(param.to_string()),
            _ => {}
        }

        rest = match after {
            "" => after,
            _ => after
                .strip_prefix(';')
                .ok_or(invalid("unexpected data after quoted value"))?,
        };
    }

    match name {
        Some(name) => Ok((name, file_name)),
        None => Err(invalid("missing name")),
    }
}
