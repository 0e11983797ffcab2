pub fn u8s_from_str(input: &str) -> [u8; 32] {
    blake3::hash(input.as_bytes()).into()
}

/// Derives a per-run seed from a scan-wide seed and a label index.
pub fn run_seed(scan_seed: &[u8; 32], label: usize) -> [u8; 32] {
    u8s_from_str(&format!("{}_{}", hex::encode(scan_seed), label))
}
