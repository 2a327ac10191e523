//! ClientHello parameter sets.
//!
//! A [`TlsFingerprint`] is the raw material BoringSSL needs to shape a
//! ClientHello: cipher order, groups, signature algorithms, GREASE,
//! extension permutation and certificate compression. TLS 1.3 suites are
//! fixed by BoringSSL and only listed here for reference.

/// Certificate compression algorithm advertised in `compress_certificate` (27).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertCompression {
    None,
    Brotli,
    Zlib,
}

/// ALPN offer sent by every browser profile, most preferred first.
pub const BROWSER_ALPN: &[&str] = &["h2", "http/1.1"];

const CHROME_CIPHER_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_RSA_WITH_AES_128_CBC_SHA",
    "TLS_RSA_WITH_AES_256_CBC_SHA",
];

const CHROME_SIGNATURE_ALGORITHMS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "rsa_pss_rsae_sha256",
    "rsa_pkcs1_sha256",
    "ecdsa_secp384r1_sha384",
    "rsa_pss_rsae_sha384",
    "rsa_pkcs1_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha512",
];

const CHROME_CURVES: &[&str] = &["X25519", "P-256", "P-384"];

const CHROME_83_EXTENSION_IDS: &[u16] = &[
    0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 21,
];

const CHROME_131_EXTENSION_IDS: &[u16] = &[
    0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 21,
];

// Firefox puts CHACHA20 ahead of AES-256 and keeps the ECDSA CBC suites.
const FIREFOX_CIPHER_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_RSA_WITH_AES_128_CBC_SHA",
    "TLS_RSA_WITH_AES_256_CBC_SHA",
];

const FIREFOX_SIGNATURE_ALGORITHMS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "ecdsa_secp384r1_sha384",
    "ecdsa_secp521r1_sha512",
    "rsa_pss_rsae_sha256",
    "rsa_pss_rsae_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha256",
    "rsa_pkcs1_sha384",
    "rsa_pkcs1_sha512",
];

const FIREFOX_CURVES: &[&str] = &["X25519", "P-256", "P-384", "P-521"];

const FIREFOX_EXTENSION_IDS: &[u16] = &[0, 23, 65281, 10, 11, 35, 16, 5, 51, 43, 13, 45, 28, 21];

const IOS_CIPHER_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
    "TLS_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_RSA_WITH_AES_256_CBC_SHA",
    "TLS_RSA_WITH_AES_128_CBC_SHA",
];

const IOS_EXTENSION_IDS: &[u16] = &[0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 21];

/// TLS fingerprint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFingerprint {
    /// Cipher suites in order. TLS 1.3 entries are informational.
    pub cipher_list: Vec<&'static str>,
    /// Signature algorithms.
    pub sigalgs: Vec<&'static str>,
    /// Supported groups.
    pub curves: Vec<&'static str>,
    /// Extension order sent on the wire when permutation is off.
    pub extension_order: Vec<u16>,
    /// Insert GREASE values into ciphers, extensions and groups.
    pub grease: bool,
    /// Shuffle extension order on every handshake.
    pub permute_extensions: bool,
    /// Certificate compression advertised to the server.
    pub cert_compression: CertCompression,
    /// ALPN protocols, most preferred first.
    pub alpn: Vec<&'static str>,
}

impl Default for TlsFingerprint {
    fn default() -> Self {
        Self {
            cipher_list: vec![],
            sigalgs: vec![],
            curves: vec![],
            extension_order: vec![],
            grease: false,
            permute_extensions: false,
            cert_compression: CertCompression::None,
            alpn: BROWSER_ALPN.to_vec(),
        }
    }
}

impl TlsFingerprint {
    /// Chrome 83: GREASE, brotli certificate compression, fixed extension order.
    pub fn chrome_83() -> Self {
        Self {
            cipher_list: CHROME_CIPHER_SUITES.to_vec(),
            sigalgs: CHROME_SIGNATURE_ALGORITHMS.to_vec(),
            curves: CHROME_CURVES.to_vec(),
            extension_order: CHROME_83_EXTENSION_IDS.to_vec(),
            grease: true,
            permute_extensions: false,
            cert_compression: CertCompression::Brotli,
            alpn: BROWSER_ALPN.to_vec(),
        }
    }

    /// Chrome 131: as Chrome 83 with per-connection extension permutation.
    pub fn chrome_131() -> Self {
        Self {
            extension_order: CHROME_131_EXTENSION_IDS.to_vec(),
            permute_extensions: true,
            ..Self::chrome_83()
        }
    }

    /// Firefox: no GREASE, no certificate compression, P-521 offered.
    pub fn firefox() -> Self {
        Self {
            cipher_list: FIREFOX_CIPHER_SUITES.to_vec(),
            sigalgs: FIREFOX_SIGNATURE_ALGORITHMS.to_vec(),
            curves: FIREFOX_CURVES.to_vec(),
            extension_order: FIREFOX_EXTENSION_IDS.to_vec(),
            grease: false,
            permute_extensions: false,
            cert_compression: CertCompression::None,
            alpn: BROWSER_ALPN.to_vec(),
        }
    }

    /// Safari on iOS: GREASE, ECDSA-first ordering, zlib certificate compression.
    pub fn ios() -> Self {
        Self {
            cipher_list: IOS_CIPHER_SUITES.to_vec(),
            sigalgs: CHROME_SIGNATURE_ALGORITHMS.to_vec(),
            curves: FIREFOX_CURVES.to_vec(),
            extension_order: IOS_EXTENSION_IDS.to_vec(),
            grease: true,
            permute_extensions: false,
            cert_compression: CertCompression::Zlib,
            alpn: BROWSER_ALPN.to_vec(),
        }
    }

    /// TLS 1.2 suites only; BoringSSL does not take TLS 1.3 suites in its cipher string.
    pub fn tls12_cipher_string(&self) -> String {
        self.cipher_list
            .iter()
            .filter(|c| c.contains("_WITH_"))
            .copied()
            .collect::<Vec<_>>()
            .join(":")
    }

    /// ALPN protocols in wire format (length-prefixed).
    pub fn alpn_wire(&self) -> Vec<u8> {
        let mut wire = Vec::new();
        for proto in &self.alpn {
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_wire_format() {
        assert_eq!(TlsFingerprint::firefox().alpn_wire(), b"\x02h2\x08http/1.1");
    }

    #[test]
    fn test_tls12_cipher_string_skips_tls13() {
        let s = TlsFingerprint::chrome_83().tls12_cipher_string();
        assert!(!s.contains("TLS_AES_128_GCM_SHA256:"));
        assert!(s.starts_with("TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"));
    }

    #[test]
    fn test_chrome_and_firefox_differ() {
        let chrome = TlsFingerprint::chrome_83();
        let firefox = TlsFingerprint::firefox();
        assert_ne!(chrome.cipher_list, firefox.cipher_list);
        assert!(chrome.grease && !firefox.grease);
        assert_eq!(chrome.cert_compression, CertCompression::Brotli);
    }
}
