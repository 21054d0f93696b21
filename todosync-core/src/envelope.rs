//! Item payload embedded in a task's free-text contents.
//!
//! Layout: `[[[modified;created;N;size;base64;]]]`. Anything outside the
//! brackets is ignored, so the board may wrap it in whatever it likes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

const OPEN: &str = "[[[";
const CLOSE: &str = "]]]";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope field `{0}` is missing")]
    MissingField(&'static str),
    #[error("envelope field `{field}` is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("envelope content is not valid base64: {0}")]
    InvalidContent(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub modified_at: i64,
    pub created_at: i64,
    pub size: u64,
    pub content: Option<Vec<u8>>,
}

impl Envelope {
    pub fn encode(&self) -> String {
        let content = self
            .content
            .as_deref()
            .map(|bytes| STANDARD.encode(bytes))
            .unwrap_or_default();
        format!(
            "{OPEN}{};{};N;{};{};{CLOSE}",
            self.modified_at, self.created_at, self.size, content
        )
    }

    /// Returns `Ok(None)` when `text` carries no envelope at all.
    pub fn extract(text: &str) -> Result<Option<Self>, EnvelopeError> {
        let Some(start) = text.find(OPEN) else {
            return Ok(None);
        };
        let body = &text[start + OPEN.len()..];
        let Some(end) = body.find(CLOSE) else {
            return Ok(None);
        };
        let mut fields = body[..end].split(';');

        let modified_at = parse_number(fields.next(), "modified")?;
        let created_at = parse_number(fields.next(), "created")?;
        fields.next().ok_or(EnvelopeError::MissingField("status"))?;
        let size = parse_number(fields.next(), "size")?;
        let content = match fields.next() {
            Some("") | None => None,
            Some(encoded) => Some(STANDARD.decode(encoded.trim())?),
        };

        Ok(Some(Self {
            modified_at,
            created_at,
            size,
            content,
        }))
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<&str>,
    field: &'static str,
) -> Result<T, EnvelopeError> {
    let value = value.ok_or(EnvelopeError::MissingField(field))?;
    value
        .trim()
        .parse()
        .map_err(|_| EnvelopeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}
