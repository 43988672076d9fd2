//! Dual-section plugin state blob.
//!
//! Binary layout, integers little-endian and unpadded:
//!
//! ```text
//! i64 component_len | component bytes | i64 controller_len | controller bytes
//! ```
//!
//! On the wire the binary form is text-encoded and prefixed with
//! [`STATE_FORMAT_TAG`]. A state with both sections empty travels as
//! [`EMPTY_STATE`] instead.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

pub const STATE_FORMAT_TAG: &str = "VST3_DUAL:";
pub const EMPTY_STATE: &str = "EMPTY";
pub const NO_PLUGIN: &str = "NoPlugin";

const LEN_PREFIX: usize = std::mem::size_of::<i64>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateDecodeError {
    #[error("missing VST3_DUAL: format tag")]
    MissingTag,

    #[error("payload is not valid encoded text")]
    Undecodable,

    #[error("negative {section} length")]
    NegativeLength { section: &'static str },

    #[error("{section} section truncated: expected {expected} bytes, {available} available")]
    Truncated {
        section: &'static str,
        expected: usize,
        available: usize,
    },
}

/// Binary-to-text encoding used for the blob on the wire.
pub trait TextCodec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, text: &str) -> Option<Vec<u8>>;
}

/// Standard alphabet, padded, no line breaks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl TextCodec for Base64Codec {
    fn encode(&self, bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64.decode(compact).ok()
    }
}

/// Component and controller state of one plugin instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DualState {
    pub component: Vec<u8>,
    pub controller: Vec<u8>,
}

impl DualState {
    pub fn new(component: Vec<u8>, controller: Vec<u8>) -> Self {
        Self {
            component,
            controller,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.component.is_empty() && self.controller.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(2 * LEN_PREFIX + self.component.len() + self.controller.len());
        for section in [&self.component, &self.controller] {
            out.extend_from_slice(&(section.len() as i64).to_le_bytes());
            out.extend_from_slice(section);
        }
        out
    }

    /// Bytes after the controller section are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateDecodeError> {
        let mut rest = bytes;
        let component = read_section(&mut rest, "component")?;
        let controller = read_section(&mut rest, "controller")?;
        Ok(Self {
            component,
            controller,
        })
    }
}

fn read_section(rest: &mut &[u8], section: &'static str) -> Result<Vec<u8>, StateDecodeError> {
    if rest.len() < LEN_PREFIX {
        return Err(StateDecodeError::Truncated {
            section,
            expected: LEN_PREFIX,
            available: rest.len(),
        });
    }
    let (prefix, tail) = rest.split_at(LEN_PREFIX);
    let mut raw = [0u8; LEN_PREFIX];
    raw.copy_from_slice(prefix);
    let len = i64::from_le_bytes(raw);
    if len < 0 {
        return Err(StateDecodeError::NegativeLength { section });
    }
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    if tail.len() < len {
        return Err(StateDecodeError::Truncated {
            section,
            expected: len,
            available: tail.len(),
        });
    }
    let (data, tail) = tail.split_at(len);
    *rest = tail;
    Ok(data.to_vec())
}

/// Converts [`DualState`] to and from its tagged text form.
#[derive(Debug, Clone, Default)]
pub struct StateCodec<C = Base64Codec> {
    codec: C,
}

impl StateCodec<Base64Codec> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: TextCodec> StateCodec<C> {
    pub fn with_codec(codec: C) -> Self {
        Self { codec }
    }

    /// `EMPTY` when both sections are empty, otherwise `VST3_DUAL:<text>`.
    pub fn encode(&self, state: &DualState) -> String {
        if state.is_empty() {
            return EMPTY_STATE.to_string();
        }
        format!("{}{}", STATE_FORMAT_TAG, self.codec.encode(&state.to_bytes()))
    }

    /// Accepts the `EMPTY` sentinel as an empty state.
    pub fn decode(&self, text: &str) -> Result<DualState, StateDecodeError> {
        let text = text.trim();
        if text == EMPTY_STATE {
            return Ok(DualState::default());
        }
        let payload = text
            .strip_prefix(STATE_FORMAT_TAG)
            .ok_or(StateDecodeError::MissingTag)?;
        let bytes = self
            .codec
            .decode(payload)
            .ok_or(StateDecodeError::Undecodable)?;
        DualState::from_bytes(&bytes)
    }
}
