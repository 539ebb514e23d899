//! Transport rails and rail selection.
//!
//! Two record shapes carry an encoded envelope:
//!
//! - **narrow**: a text record, `"styx1:" + base64url(envelope)`;
//! - **wide**: a binary record with its own small prefix:
//!
//! ```text
//! TAG (1) = 0x01 | VERSION (1) = 1 | HAS_RECIPIENT (1) | [RECIPIENT (32)] | PAYLOAD_LEN (2, LE) | PAYLOAD
//! ```
//!
//! The narrow rail is always available; the wide rail depends on a facility
//! the caller probes through [`WideRailProbe`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

pub const NARROW_PREFIX: &str = "styx1:";
pub const WIDE_TAG: u8 = 0x01;
pub const WIDE_VERSION: u8 = 1;
pub const DEFAULT_NARROW_PROGRAM: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    Narrow,
    Wide,
}

impl Rail {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Narrow => "narrow",
            Self::Wide => "wide",
        }
    }
}

/// Caller's rail preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailPreference {
    /// Narrow while the text form fits the ceiling, wide beyond it.
    #[default]
    Auto,
    Narrow,
    /// With `strict`, an unavailable wide rail is an error instead of a
    /// fallback to narrow.
    Wide { strict: bool },
}

impl std::str::FromStr for RailPreference {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "narrow" => Ok(Self::Narrow),
            "wide" => Ok(Self::Wide { strict: false }),
            "wide-strict" => Ok(Self::Wide { strict: true }),
            other => Err(ProtoError::MalformedRecord(format!("unknown rail preference {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RailConfig {
    /// Largest narrow record, in characters, that auto selection keeps narrow.
    pub narrow_char_ceiling: usize,
    /// Largest wide payload accepted when building a record.
    pub max_wide_payload: usize,
    /// Routing target identifying narrow records in the transport log.
    pub narrow_program: String,
    /// Routing target of the wide facility, if one is deployed.
    pub wide_program: Option<String>,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            narrow_char_ceiling: 900,
            max_wide_payload: 1024,
            narrow_program: DEFAULT_NARROW_PROGRAM.to_string(),
            wide_program: None,
        }
    }
}

/// Availability check for the wide rail.
///
/// Implementations may hit the network; [`select_rail`] calls it at most once
/// per selection and never caches the answer.
pub trait WideRailProbe {
    fn wide_available(&self) -> bool;
}

impl<F> WideRailProbe for F
where
    F: Fn() -> bool,
{
    fn wide_available(&self) -> bool {
        self()
    }
}

// ── Narrow ────────────────────────────────────────────────────────────────────

pub fn encode_narrow(envelope: &[u8]) -> String {
    format!("{NARROW_PREFIX}{}", URL_SAFE_NO_PAD.encode(envelope))
}

pub fn decode_narrow(text: &str) -> Result<Vec<u8>, ProtoError> {
    let body = text
        .strip_prefix(NARROW_PREFIX)
        .ok_or_else(|| ProtoError::MalformedRecord("missing narrow prefix".into()))?;
    URL_SAFE_NO_PAD
        .decode(body.trim_end())
        .map_err(|e| ProtoError::MalformedRecord(format!("narrow body: {e}")))
}

/// Length of the narrow text form without building it.
pub fn narrow_len(envelope_len: usize) -> usize {
    let full = envelope_len / 3 * 4;
    let tail = match envelope_len % 3 {
        0 => 0,
        1 => 2,
        _ => 3,
    };
    NARROW_PREFIX.len() + full + tail
}

// ── Wide ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideRecord {
    pub recipient: Option<[u8; 32]>,
    pub payload: Vec<u8>,
}

impl WideRecord {
    pub fn new(recipient: Option<[u8; 32]>, payload: Vec<u8>) -> Self {
        Self { recipient, payload }
    }

    /// Serialise, enforcing `max_payload` (at most 65,535 by format).
    pub fn encode(&self, max_payload: usize) -> Result<Vec<u8>, ProtoError> {
        let max = max_payload.min(u16::MAX as usize);
        if self.payload.len() > max {
            return Err(ProtoError::PayloadTooLarge { size: self.payload.len(), max });
        }
        let mut out = Vec::with_capacity(3 + 32 + 2 + self.payload.len());
        out.push(WIDE_TAG);
        out.push(WIDE_VERSION);
        match &self.recipient {
            Some(r) => {
                out.push(1);
                out.extend_from_slice(r);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        let malformed = |what: &str| ProtoError::MalformedRecord(format!("wide record: {what}"));

        let [tag, version, has_recipient, rest @ ..] = buf else {
            return Err(malformed("truncated prefix"));
        };
        if *tag != WIDE_TAG {
            return Err(malformed("bad tag"));
        }
        if *version != WIDE_VERSION {
            return Err(malformed("unsupported version"));
        }
        let (recipient, rest) = match has_recipient {
            0 => (None, rest),
            1 => {
                if rest.len() < 32 {
                    return Err(malformed("truncated recipient"));
                }
                let (r, rest) = rest.split_at(32);
                let mut key = [0u8; 32];
                key.copy_from_slice(r);
                (Some(key), rest)
            }
            _ => return Err(malformed("bad recipient flag")),
        };
        let [lo, hi, payload @ ..] = rest else {
            return Err(malformed("truncated length"));
        };
        let len = u16::from_le_bytes([*lo, *hi]) as usize;
        if payload.len() < len {
            return Err(malformed("truncated payload"));
        }
        if payload.len() > len {
            return Err(malformed("trailing bytes"));
        }
        Ok(Self { recipient, payload: payload.to_vec() })
    }
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Largest envelope a wide record can carry under `config`.
pub fn wide_capacity(config: &RailConfig) -> usize {
    config.max_wide_payload.min(u16::MAX as usize)
}

/// Pick the rail for an encoded envelope.
///
/// The wide rail only counts as usable when the envelope fits
/// [`wide_capacity`]; the probe is not consulted otherwise.
pub fn select_rail(
    envelope: &[u8],
    preference: RailPreference,
    probe: &dyn WideRailProbe,
    config: &RailConfig,
) -> Result<Rail, ProtoError> {
    let fits_wide = envelope.len() <= wide_capacity(config);
    let rail = match preference {
        RailPreference::Narrow => Rail::Narrow,
        RailPreference::Wide { strict } => {
            if fits_wide && probe.wide_available() {
                Rail::Wide
            } else if strict && !fits_wide {
                return Err(ProtoError::PayloadTooLarge {
                    size: envelope.len(),
                    max: wide_capacity(config),
                });
            } else if strict {
                return Err(ProtoError::RailUnavailable);
            } else {
                tracing::debug!(target: "styx_proto", event = "wide_fallback", fits_wide);
                Rail::Narrow
            }
        }
        RailPreference::Auto => {
            if narrow_len(envelope.len()) <= config.narrow_char_ceiling {
                Rail::Narrow
            } else if fits_wide && probe.wide_available() {
                Rail::Wide
            } else {
                tracing::debug!(
                    target: "styx_proto",
                    event = "oversized_narrow",
                    len = envelope.len(),
                    ceiling = config.narrow_char_ceiling,
                    fits_wide
                );
                Rail::Narrow
            }
        }
    };
    Ok(rail)
}
