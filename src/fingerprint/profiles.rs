//! Named ClientHello profiles.

use std::fmt;
use std::str::FromStr;

use super::tls::TlsFingerprint;
use crate::error::Error;

/// ClientHello shape selected at transport construction.
///
/// Profiles are opaque parameter sets. `None` disables fingerprinting and
/// uses BoringSSL defaults with the same ALPN offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FingerprintProfile {
    /// Chrome 83 (GREASE, fixed extension order).
    #[default]
    Chrome83,
    /// Latest supported Chrome, currently Chrome 83.
    ChromeAuto,
    /// Chrome 131 (GREASE, permuted extensions).
    Chrome131,
    /// Firefox 63.
    Firefox63,
    /// Latest supported Firefox.
    FirefoxAuto,
    /// Safari on iOS.
    IosAuto,
    /// No fingerprinting, host defaults.
    None,
}

impl FingerprintProfile {
    /// Parameter set for this profile. `None` yields the default (empty) set.
    pub fn tls_fingerprint(&self) -> TlsFingerprint {
        match self {
            Self::Chrome83 | Self::ChromeAuto => TlsFingerprint::chrome_83(),
            Self::Chrome131 => TlsFingerprint::chrome_131(),
            Self::Firefox63 | Self::FirefoxAuto => TlsFingerprint::firefox(),
            Self::IosAuto => TlsFingerprint::ios(),
            Self::None => TlsFingerprint::default(),
        }
    }

    /// Whether handshakes use a shaped ClientHello.
    pub fn is_fingerprinted(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome83 => "Chrome-83",
            Self::ChromeAuto => "Chrome-Auto",
            Self::Chrome131 => "Chrome-131",
            Self::Firefox63 => "Firefox-63",
            Self::FirefoxAuto => "Firefox-Auto",
            Self::IosAuto => "iOS-Auto",
            Self::None => "none",
        }
    }
}

impl fmt::Display for FingerprintProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FingerprintProfile {
    type Err = Error;

    /// Accepts "Chrome-83", "firefox_auto", "HelloFirefox_Auto", "none" and similar.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' ' | '.'))
            .collect::<String>()
            .to_ascii_lowercase();
        let key = key.strip_prefix("hello").unwrap_or(&key);

        Ok(match key {
            "chrome83" => Self::Chrome83,
            "chromeauto" | "chrome" => Self::ChromeAuto,
            "chrome131" => Self::Chrome131,
            "firefox63" => Self::Firefox63,
            "firefoxauto" | "firefox" => Self::FirefoxAuto,
            "iosauto" | "ios" => Self::IosAuto,
            "none" | "golang" | "default" => Self::None,
            _ => return Err(Error::tls(format!("unknown fingerprint profile {s:?}"))),
        })
    }
}
