//! Character encoding detection for archive entry names
//!
//! Legacy ZIP archives store entry names in whatever code page the creating
//! machine used. Names that are not valid UTF-8 are decoded after detection.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Location property carrying the entry-name encoding hint into archives
pub const ENCODING_PROPERTY: &str = "encoding";

/// Hint for encoding detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingHint {
    /// Derive the hint from the system locale
    #[default]
    Auto,
    /// Prefer Japanese encodings (Shift_JIS)
    Japanese,
    /// Prefer Chinese Simplified (GBK/GB18030)
    ChineseSimplified,
    /// Prefer Chinese Traditional (Big5)
    ChineseTraditional,
    /// Prefer Korean (EUC-KR)
    Korean,
    /// No preference
    None,
}

impl EncodingHint {
    /// Replace `Auto` with the hint for the current locale
    pub fn resolve(self) -> Self {
        match self {
            EncodingHint::Auto => system_encoding_hint(),
            other => other,
        }
    }

    fn language_and_fallback(self) -> Option<(&'static [u8], &'static Encoding)> {
        match self.resolve() {
            EncodingHint::Japanese => Some((b"ja", encoding_rs::SHIFT_JIS)),
            EncodingHint::ChineseSimplified => Some((b"zh-cn", encoding_rs::GBK)),
            EncodingHint::ChineseTraditional => Some((b"zh-tw", encoding_rs::BIG5)),
            EncodingHint::Korean => Some((b"ko", encoding_rs::EUC_KR)),
            EncodingHint::None | EncodingHint::Auto => None,
        }
    }

    /// Name used in configuration files and location properties
    pub fn as_str(self) -> &'static str {
        match self {
            EncodingHint::Auto => "auto",
            EncodingHint::Japanese => "japanese",
            EncodingHint::ChineseSimplified => "chinese-simplified",
            EncodingHint::ChineseTraditional => "chinese-traditional",
            EncodingHint::Korean => "korean",
            EncodingHint::None => "none",
        }
    }
}

impl FromStr for EncodingHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            EncodingHint::Auto,
            EncodingHint::Japanese,
            EncodingHint::ChineseSimplified,
            EncodingHint::ChineseTraditional,
            EncodingHint::Korean,
            EncodingHint::None,
        ]
        .into_iter()
        .find(|hint| hint.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("Unknown encoding hint: {}", s))
    }
}

/// Detect the most likely encoding of a byte sequence
pub fn detect_encoding(bytes: &[u8], hint: EncodingHint) -> &'static Encoding {
    if std::str::from_utf8(bytes).is_ok() {
        return encoding_rs::UTF_8;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);

    match hint.language_and_fallback() {
        Some((language, fallback)) => {
            // chardetng answers windows-1252 when it has nothing better
            let detected = detector.guess(Some(language), true);
            if detected == encoding_rs::WINDOWS_1252 {
                fallback
            } else {
                detected
            }
        }
        None => detector.guess(None, true),
    }
}

/// Decode bytes to UTF-8
///
/// Returns the decoded string and a flag indicating if there were errors
pub fn decode_bytes(bytes: &[u8], hint: EncodingHint) -> (String, bool) {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return (s.to_string(), false);
    }

    let encoding = detect_encoding(bytes, hint);
    let (result, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::warn!(
            "Lossy decoding of entry name with {} ({} bytes)",
            encoding.name(),
            bytes.len()
        );
    }
    (result.into_owned(), had_errors)
}

/// Get the system default encoding hint based on locale
#[cfg(windows)]
pub fn system_encoding_hint() -> EncodingHint {
    use windows::Win32::Globalization::GetUserDefaultLCID;

    let lcid = unsafe { GetUserDefaultLCID() };

    // Primary language ID
    match lcid & 0x3FF {
        0x11 => EncodingHint::Japanese,
        0x04 => EncodingHint::ChineseSimplified,
        0x12 => EncodingHint::Korean,
        _ => EncodingHint::None,
    }
}

#[cfg(not(windows))]
pub fn system_encoding_hint() -> EncodingHint {
    std::env::var("LANG")
        .map(|lang| {
            let lang = lang.to_lowercase();
            if lang.starts_with("ja") {
                EncodingHint::Japanese
            } else if lang.contains("zh_cn") || lang.contains("zh-cn") {
                EncodingHint::ChineseSimplified
            } else if lang.contains("zh_tw") || lang.contains("zh-tw") {
                EncodingHint::ChineseTraditional
            } else if lang.starts_with("ko") {
                EncodingHint::Korean
            } else {
                EncodingHint::None
            }
        })
        .unwrap_or(EncodingHint::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        let bytes = "dir/ファイル.txt".as_bytes();
        let (decoded, had_errors) = decode_bytes(bytes, EncodingHint::None);
        assert_eq!(decoded, "dir/ファイル.txt");
        assert!(!had_errors);
    }

    #[test]
    fn test_shift_jis_name() {
        // "テスト" in Shift_JIS
        let bytes = [0x83, 0x65, 0x83, 0x58, 0x83, 0x67];
        let (decoded, _) = decode_bytes(&bytes, EncodingHint::Japanese);
        assert_eq!(decoded, "テスト");
    }

    #[test]
    fn test_hint_deserializes_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            hint: EncodingHint,
        }
        let parsed: Wrapper = toml::from_str("hint = \"chinese-simplified\"").unwrap();
        assert_eq!(parsed.hint, EncodingHint::ChineseSimplified);
    }

    #[test]
    fn test_hint_from_property_value() {
        assert_eq!("japanese".parse::<EncodingHint>(), Ok(EncodingHint::Japanese));
        assert_eq!("Korean".parse::<EncodingHint>(), Ok(EncodingHint::Korean));
        assert!("klingon".parse::<EncodingHint>().is_err());
        assert_eq!(
            EncodingHint::ChineseTraditional.as_str().parse::<EncodingHint>(),
            Ok(EncodingHint::ChineseTraditional)
        );
    }
}
