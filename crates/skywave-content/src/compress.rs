//! Payload compression with a self-describing blob header.
//!
//! Every compressed blob starts with `[method: u8][raw_len: u32 LE]` so
//! the receiver needs no side channel to decompress. HTML goes through a
//! token dictionary of common tags and attributes before DEFLATE; other
//! content takes DEFLATE alone. [`compress`] returns whichever encoding
//! comes out smallest, including the stored fallback for incompressible
//! input.

use std::io::Write;

use flate2::{Compression, write::DeflateDecoder, write::DeflateEncoder};

use crate::error::ContentError;

/// Blob header length.
pub const BLOB_HEADER_LEN: usize = 5;

/// Decompression output cap: well above any legal logical message, low
/// enough to stop decompression bombs.
const MAX_RAW_LEN: usize = 1 << 20;

const METHOD_STORED: u8 = 0;
const METHOD_DEFLATE: u8 = 1;
const METHOD_HTML_DEFLATE: u8 = 2;

/// Escape byte introducing a dictionary token in tokenized HTML.
const TOKEN_ESCAPE: u8 = 0x01;

/// Kind of content being compressed, selecting the dictionary pre-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// HTML: token dictionary plus DEFLATE.
    Html,
    /// JSON or other text/bytes: DEFLATE alone.
    Generic,
}

/// Common markup fragments replaced by single-token escapes before
/// DEFLATE. Order matters: longest match wins, and a token's index is
/// part of the wire format.
const HTML_DICTIONARY: &[&str] = &[
    "<!DOCTYPE html>",
    "<html",
    "</html>",
    "<head",
    "</head>",
    "<body",
    "</body>",
    "<title>",
    "</title>",
    "<div",
    "</div>",
    "<span",
    "</span>",
    "<table",
    "</table>",
    "<script",
    "</script>",
    "<style",
    "</style>",
    "<input ",
    "<button",
    "</button>",
    "<form",
    "</form>",
    "<img ",
    "<ul",
    "</ul>",
    "<li",
    "</li>",
    "<tr",
    "</tr>",
    "<td",
    "</td>",
    "<th",
    "</th>",
    "<h1",
    "</h1>",
    "<h2",
    "</h2>",
    "<p>",
    "</p>",
    "<a ",
    "</a>",
    "<br/>",
    " class=\"",
    " id=\"",
    " href=\"",
    " src=\"",
    " style=\"",
    " type=\"",
    " value=\"",
    " name=\"",
    "=\"",
    "\">",
    "/>",
];

/// Compress, choosing the smallest of the applicable encodings.
#[must_use]
pub fn compress(data: &[u8], kind: ContentKind) -> Vec<u8> {
    let mut best = with_header(METHOD_STORED, data.len(), data.to_vec());

    if let Ok(deflated) = deflate(data) {
        let candidate = with_header(METHOD_DEFLATE, data.len(), deflated);
        if candidate.len() < best.len() {
            best = candidate;
        }
    }

    if kind == ContentKind::Html {
        let tokenized = tokenize_html(data);
        if let Ok(deflated) = deflate(&tokenized) {
            let candidate = with_header(METHOD_HTML_DEFLATE, data.len(), deflated);
            if candidate.len() < best.len() {
                best = candidate;
            }
        }
    }

    best
}

/// Whether the compressed form actually saves bytes over the raw input.
#[must_use]
pub fn is_beneficial(blob: &[u8], raw_len: usize) -> bool {
    blob.len() < raw_len
}

/// Decompress a blob produced by [`compress`].
pub fn decompress(blob: &[u8]) -> Result<Vec<u8>, ContentError> {
    if blob.len() < BLOB_HEADER_LEN {
        return Err(ContentError::MalformedBlob(format!("{} bytes", blob.len())));
    }
    let method = blob[0];
    let raw_len =
        u32::from_le_bytes([blob[1], blob[2], blob[3], blob[4]]) as usize;
    if raw_len > MAX_RAW_LEN {
        return Err(ContentError::MalformedBlob(format!("declared length {raw_len}")));
    }
    let body = &blob[BLOB_HEADER_LEN..];

    let out = match method {
        METHOD_STORED => body.to_vec(),
        METHOD_DEFLATE => inflate(body, raw_len)?,
        METHOD_HTML_DEFLATE => {
            // Tokenized form can be shorter or longer than the raw text;
            // bound by the raw cap plus escape overhead.
            let tokenized = inflate(body, MAX_RAW_LEN)?;
            detokenize_html(&tokenized)?
        },
        other => return Err(ContentError::UnknownMethod(other)),
    };

    if out.len() != raw_len {
        return Err(ContentError::LengthMismatch { declared: raw_len, actual: out.len() });
    }
    Ok(out)
}

fn with_header(method: u8, raw_len: usize, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOB_HEADER_LEN + body.len());
    out.push(method);
    out.extend_from_slice(&(raw_len as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ContentError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| ContentError::Deflate(e.to_string()))?;
    encoder.finish().map_err(|e| ContentError::Deflate(e.to_string()))
}

fn inflate(data: &[u8], cap: usize) -> Result<Vec<u8>, ContentError> {
    let mut decoder = DeflateDecoder::new(Vec::new());
    decoder.write_all(data).map_err(|e| ContentError::Deflate(e.to_string()))?;
    let out = decoder.finish().map_err(|e| ContentError::Deflate(e.to_string()))?;
    if out.len() > cap {
        return Err(ContentError::MalformedBlob(format!("inflated to {} bytes", out.len())));
    }
    Ok(out)
}

/// Replace dictionary fragments with `[ESC, index+1]`; a literal escape
/// byte becomes `[ESC, 0]`.
fn tokenize_html(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    'outer: while i < data.len() {
        for (index, token) in HTML_DICTIONARY.iter().enumerate() {
            let token = token.as_bytes();
            if data[i..].starts_with(token) {
                out.push(TOKEN_ESCAPE);
                out.push(index as u8 + 1);
                i += token.len();
                continue 'outer;
            }
        }
        if data[i] == TOKEN_ESCAPE {
            out.push(TOKEN_ESCAPE);
            out.push(0);
        } else {
            out.push(data[i]);
        }
        i += 1;
    }
    out
}

fn detokenize_html(data: &[u8]) -> Result<Vec<u8>, ContentError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == TOKEN_ESCAPE {
            let Some(&code) = data.get(i + 1) else {
                return Err(ContentError::MalformedBlob("dangling token escape".to_string()));
            };
            if code == 0 {
                out.push(TOKEN_ESCAPE);
            } else {
                let index = usize::from(code - 1);
                let Some(token) = HTML_DICTIONARY.get(index) else {
                    return Err(ContentError::MalformedBlob(format!("token {code}")));
                };
                out.extend_from_slice(token.as_bytes());
            }
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html><html><head><title>Field Day</title></head><body><div class="log"><table><tr><td>KA1ABC</td><td>59</td></tr><tr><td>W2DEF</td><td>57</td></tr></table></div></body></html>"#;

    #[test]
    fn html_round_trip() {
        let blob = compress(PAGE.as_bytes(), ContentKind::Html);
        assert!(blob.len() < PAGE.len(), "{} vs {}", blob.len(), PAGE.len());
        assert_eq!(decompress(&blob).unwrap(), PAGE.as_bytes());
    }

    #[test]
    fn json_round_trip() {
        let json = r#"{"callsign":"KA1ABC","grid":"FN42","reports":[59,57,55,59,58]}"#;
        let blob = compress(json.as_bytes(), ContentKind::Generic);
        assert_eq!(decompress(&blob).unwrap(), json.as_bytes());
    }

    #[test]
    fn incompressible_input_is_stored() {
        // High-entropy bytes: the stored encoding must win and the blob
        // only grows by the header.
        let data: Vec<u8> = (0..64u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let blob = compress(&data, ContentKind::Generic);
        assert_eq!(blob[0], METHOD_STORED);
        assert_eq!(blob.len(), data.len() + BLOB_HEADER_LEN);
        assert_eq!(decompress(&blob).unwrap(), data);
    }

    #[test]
    fn literal_escape_byte_survives() {
        let data = [0x00, TOKEN_ESCAPE, 0x02, TOKEN_ESCAPE, TOKEN_ESCAPE, b'<'];
        let tokenized = tokenize_html(&data);
        assert_eq!(detokenize_html(&tokenized).unwrap(), data);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decompress(&[]).is_err());
        assert!(decompress(&[9, 0, 0, 0, 0]).is_err());
        // Declared length disagreeing with content.
        let mut blob = compress(b"hello", ContentKind::Generic);
        blob[1] = 99;
        assert!(decompress(&blob).is_err());
    }

    proptest! {
        #[test]
        fn any_bytes_round_trip_generic(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            let blob = compress(&data, ContentKind::Generic);
            prop_assert_eq!(decompress(&blob).unwrap(), data);
        }

        #[test]
        fn any_bytes_round_trip_html(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            let blob = compress(&data, ContentKind::Html);
            prop_assert_eq!(decompress(&blob).unwrap(), data);
        }

        #[test]
        fn tokenizer_round_trip(data in prop::collection::vec(any::<u8>(), 0..2048)) {
            let tokenized = tokenize_html(&data);
            prop_assert_eq!(detokenize_html(&tokenized).unwrap(), data);
        }
    }
}
