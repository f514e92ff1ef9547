/// Tunable policy for a device's key lifecycle.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// Number of one-time prekeys generated per batch.
    pub one_time_prekey_batch: usize,
    /// When the directory reports fewer remaining one-time prekeys than
    /// this, a new batch is generated and published.
    pub one_time_prekey_threshold: usize,
    /// How often the signed prekey is rotated.
    pub signed_prekey_rotation_interval: std::time::Duration,
    /// How many retired signed prekeys are retained so envelopes produced
    /// against an older bundle keep decrypting.
    pub max_signed_prekeys: usize,
    /// HKDF info string separating this deployment's key derivation from
    /// any other user of the same primitives.
    pub protocol_info: Vec<u8>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            one_time_prekey_batch: 100,
            one_time_prekey_threshold: 25,
            signed_prekey_rotation_interval: std::time::Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            max_signed_prekeys: 4,
            protocol_info: b"Cachet-E2E-v1".to_vec(),
        }
    }
}
