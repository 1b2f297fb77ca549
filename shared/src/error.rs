use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a failure came from. Retry policy does not look at this; it only
/// shapes logging and the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// No response obtained (connection refused, DNS, timeout).
    Transport,
    /// Non-2xx response from the remote service.
    Rejected,
    /// Local store unavailable.
    Persistence,
    /// A response arrived but could not be decoded into the domain shape.
    Malformed,
}

impl ErrorCategory {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Transport => "NETWORK_ERROR",
            Self::Rejected => "REMOTE_REJECTED",
            Self::Persistence => "STORAGE_ERROR",
            Self::Malformed => "MALFORMED_RESPONSE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "en")]
    En,
}

impl Locale {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "pt-br" | "pt_br" | "pt" => Some(Self::PtBr),
            "en" | "en-us" | "en_us" | "en-gb" => Some(Self::En),
            _ => None,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PtBr => f.write_str("pt-BR"),
            Self::En => f.write_str("en"),
        }
    }
}

/// Turns a raw backend message into text fit for the user.
///
/// The backend formats errors as `"KIND: detail"` with the detail already
/// localized, so only the detail is kept.
#[must_use]
pub fn translate_error(message: Option<&str>, status: Option<u16>, locale: Locale) -> String {
    let message = message.map(str::trim).unwrap_or_default();
    if message.is_empty() {
        return match status {
            Some(500) => internal_error_text(locale).to_string(),
            _ => unknown_error_text(locale).to_string(),
        };
    }

    if let Some((_, detail)) = message.split_once(':') {
        let detail = detail.trim();
        if !detail.is_empty() {
            return detail.to_string();
        }
    }

    if status == Some(500) {
        return internal_error_text(locale).to_string();
    }

    message.to_string()
}

/// Fallback text used only when the response carries no message of its own.
#[must_use]
pub fn translate_http_status(status: u16, locale: Locale) -> String {
    if status == 500 {
        return internal_error_text(locale).to_string();
    }
    match locale {
        Locale::PtBr => format!("Erro {status}, entre em contato com o suporte."),
        Locale::En => format!("Error {status}, please contact support."),
    }
}

fn unknown_error_text(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => "erro desconhecido, entre em contato com o suporte.",
        Locale::En => "unknown error, please contact support.",
    }
}

fn internal_error_text(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => "erro interno do servidor, entre em contato com o suporte.",
        Locale::En => "internal server error, please contact support.",
    }
}
