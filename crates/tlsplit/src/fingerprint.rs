//! TLS ClientHello fingerprinting

/// Number of bytes the default fingerprinter peeks from the victim.
pub const HANDSHAKE_PEEK_LEN: usize = 3;

/// Report whether `prefix` looks like the start of a TLS 1.x ClientHello.
///
/// Matches a handshake record (0x16) carrying a 3.x protocol version. SSL
/// 2/3 handshakes do not match and relay as plaintext.
pub fn is_client_hello(prefix: &[u8]) -> bool {
  prefix.len() >= 2 && prefix[0] == 0x16 && prefix[1] == 0x03
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_tls_record_versions() {
    // record-layer versions used by TLS 1.0 through 1.3
    assert!(is_client_hello(&[0x16, 0x03, 0x01]));
    assert!(is_client_hello(&[0x16, 0x03, 0x03]));
    assert!(is_client_hello(&[0x16, 0x03, 0x04]));
  }

  #[test]
  fn rejects_plaintext() {
    assert!(!is_client_hello(b"GET"));
    assert!(!is_client_hello(b"EHLO mail.example.com"));
  }

  #[test]
  fn rejects_sslv2_and_short_prefixes() {
    // SSLv2 ClientHello starts with a length byte with the high bit set
    assert!(!is_client_hello(&[0x80, 0x2e, 0x01]));
    assert!(!is_client_hello(&[0x16]));
    assert!(!is_client_hello(&[]));
  }
}
