use crate::model::{self, Lang, ReportData};
use base64::{engine::general_purpose, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Query parameter that carries a report token.
pub const QUERY_PARAM: &str = "g";

/// Upper bound on the inflated payload. Real reports are a few kilobytes.
pub const MAX_INFLATED_BYTES: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("report cannot be serialized: {0}")]
    Unrepresentable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("deflate stream error: {0}")]
    Deflate(#[from] std::io::Error),

    #[error("percent-decoding failed: {0}")]
    PercentDecode(String),

    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("inflated payload exceeds {MAX_INFLATED_BYTES} bytes")]
    TooLarge,

    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("{0} unread byte(s) after the deflate stream")]
    TrailingData(u64),

    #[error("payload does not have the report shape")]
    Shape,

    #[error("empty token")]
    Empty,
}

/// Turns a report into a token that can sit verbatim in a URL query.
pub fn compress(report: &ReportData) -> Result<String, CodecError> {
    encode_report(report).inspect_err(|e| tracing::error!(error = %e, "report compression failed"))
}

/// Recovers a report from a token. Every failure (bad escapes, bad base64,
/// corrupt deflate stream, bad JSON, wrong shape) comes back as None.
pub fn decompress(token: &str) -> Option<ReportData> {
    match decode_report(token) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::debug!(error = %e, token_len = token.len(), "report token rejected");
            None
        }
    }
}

/// The report a certificate page shows: the decoded `g` value when it is
/// usable, otherwise the injected default.
pub fn resolve_report(g: Option<&str>, default: &ReportData) -> ReportData {
    g.and_then(decompress).unwrap_or_else(|| default.clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub base_path: String,
    pub period_slug: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            period_slug: "2024-2025-S1".to_string(),
        }
    }
}

/// `{base}/{lang}/{period}?g={token}` with exactly one slash after the base.
pub fn report_link(cfg: &LinkConfig, lang: Lang, token: &str) -> String {
    let path = format!(
        "{}/{}?{}={}",
        lang.as_str(),
        cfg.period_slug.trim_matches('/'),
        QUERY_PARAM,
        token
    );
    format!("{}/{}", cfg.base_path.trim_end_matches('/'), path)
}

fn encode_report(report: &ReportData) -> Result<String, CodecError> {
    model::check_report(report).map_err(|e| CodecError::Unrepresentable(e.to_string()))?;
    let json = serde_json::to_vec(report)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let url_safe = general_purpose::URL_SAFE_NO_PAD.encode(compressed);
    Ok(urlencoding::encode(&url_safe).into_owned())
}

fn decode_report(token: &str) -> Result<ReportData, CodecError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CodecError::Empty);
    }

    let unescaped =
        urlencoding::decode(token).map_err(|e| CodecError::PercentDecode(e.to_string()))?;
    let compressed = general_purpose::STANDARD.decode(from_url_safe(&unescaped))?;

    let mut inflated = Vec::new();
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    (&mut decoder)
        .take(MAX_INFLATED_BYTES + 1)
        .read_to_end(&mut inflated)?;
    if inflated.len() as u64 > MAX_INFLATED_BYTES {
        return Err(CodecError::TooLarge);
    }
    let unread = (compressed.len() as u64).saturating_sub(decoder.total_in());
    if unread > 0 {
        return Err(CodecError::TrailingData(unread));
    }

    let text = String::from_utf8(inflated)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    model::validate_report_value(&value).ok_or(CodecError::Shape)
}

/// Maps either alphabet onto standard padded base64, so tokens whose
/// characters were percent-escaped from `+`/`/` still decode.
fn from_url_safe(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}
