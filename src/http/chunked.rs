//! Decoder for `Transfer-Encoding: chunked` request bodies.

use crate::{errors::ErrorKind, http::parser::ParseStatus, http::types::hex_to_usize};

/// More hex digits than this cannot describe a size that fits any body limit.
const MAX_SIZE_DIGITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Ext,
    SizeLf,
    Data(usize),
    DataCr,
    DataLf,
    TrailerStart,
    Trailer,
    TrailerLf,
    EndLf,
    Done,
}

/// Incremental chunked decoder.
///
/// Every call to [`ChunkedDecoder::feed`] takes the next slice of raw bytes
/// from the wire and appends the decoded payload to `out`. Chunk extensions
/// and trailer fields are skipped.
#[derive(Debug, Clone)]
pub(crate) struct ChunkedDecoder {
    state: State,
    digits: Vec<u8>,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            state: State::Size,
            digits: Vec::with_capacity(MAX_SIZE_DIGITS),
        }
    }

    /// Decodes `input`, appending payload bytes to `out`.
    ///
    /// Returns `Complete(n)` once the terminating chunk and trailers have been
    /// read, `n` being the bytes of `input` that belonged to the body.
    /// `BodyTooLarge` is raised as soon as a chunk header announces more data
    /// than `max` allows in total.
    pub(crate) fn feed(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
        max: usize,
    ) -> Result<ParseStatus, ErrorKind> {
        let mut pos = 0;

        while pos < input.len() {
            let byte = input[pos];

            self.state = match self.state {
                State::Size => match byte {
                    b'\r' => State::SizeLf,
                    b';' | b' ' | b'\t' => State::Ext,
                    b if b.is_ascii_hexdigit() && self.digits.len() < MAX_SIZE_DIGITS => {
                        self.digits.push(b);
                        State::Size
                    }
                    _ => return Err(ErrorKind::InvalidChunk),
                },
                State::Ext => match byte {
                    b'\r' => State::SizeLf,
                    b'\n' => return Err(ErrorKind::InvalidChunk),
                    _ => State::Ext,
                },
                State::SizeLf => match byte {
                    b'\n' => {
                        let size = hex_to_usize(&self.digits).ok_or(ErrorKind::InvalidChunk)?;
                        self.digits.clear();

                        match size {
                            0 => State::TrailerStart,
                            _ if size > max.saturating_sub(out.len()) => {
                                return Err(ErrorKind::BodyTooLarge)
                            }
                            _ => State::Data(size),
                        }
                    }
                    _ => return Err(ErrorKind::InvalidChunk),
                },
                State::Data(remaining) => {
                    let take = remaining.min(input.len() - pos);
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;

                    self.state = match remaining - take {
                        0 => State::DataCr,
                        left => State::Data(left),
                    };
                    continue;
                }
                State::DataCr => match byte {
                    b'\r' => State::DataLf,
                    _ => return Err(ErrorKind::InvalidChunk),
                },
                State::DataLf => match byte {
                    b'\n' => State::Size,
                    _ => return Err(ErrorKind::InvalidChunk),
                },
                State::TrailerStart => match byte {
                    b'\r' => State::EndLf,
                    b'\n' => return Err(ErrorKind::InvalidChunk),
                    _ => State::Trailer,
                },
                State::Trailer => match byte {
                    b'\r' => State::TrailerLf,
                    b'\n' => return Err(ErrorKind::InvalidChunk),
                    _ => State::Trailer,
                },
                State::TrailerLf => match byte {
                    b'\n' => State::TrailerStart,
                    _ => return Err(ErrorKind::InvalidChunk),
                },
                State::EndLf => match byte {
                    b'\n' => State::Done,
                    _ => return Err(ErrorKind::InvalidChunk),
                },
                State::Done => break,
            };
            pos += 1;

            if self.state == State::Done {
                break;
            }
        }

        Ok(match self.state {
            State::Done => ParseStatus::Complete(pos),
            _ => ParseStatus::Partial,
        })
    }
}
