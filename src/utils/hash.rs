//! Transaction hashing matching the node's convention.

use sha2::{Digest, Sha256};

/// SHA-256 of raw transaction bytes as uppercase hex, the same form the
/// node reports in /tx lookups.
pub fn sha256hex(tx_bytes: &[u8]) -> String {
    let digest = Sha256::digest(tx_bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_sha256_vector() {
        // sha256("abc") from FIPS 180-2
        assert_eq!(
            sha256hex(b"abc"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn empty_input_hashes() {
        assert_eq!(
            sha256hex(b""),
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        );
    }
}
