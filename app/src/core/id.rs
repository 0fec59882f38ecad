use anyhow::{Context, bail};

/// Parses the numeric part of a cluster identifier such as `CLU0042`.
///
/// The first three characters are the cluster prefix. The remainder is a
/// decimal number, or a hexadecimal one when it starts with `_` (`CLU_002A`).
pub fn parse_cluster_id(id: &str) -> anyhow::Result<u32> {
    let Some(raw) = id.get(3..) else {
        bail!("cluster id [{}] is too short", id);
    };

    let (digits, radix) = match raw.strip_prefix('_') {
        Some(hex) => (hex, 16),
        None => (raw, 10),
    };

    u32::from_str_radix(digits, radix).with_context(|| format!("converting cluster id [{}] to uint failed", id))
}

/// Stable 64-bit identity of an accessory: cluster id in the upper half,
/// accessory id in the lower.
pub fn long_id(cluster_id: u32, accessory_id: u32) -> u64 {
    ((cluster_id as u64) << 32) | accessory_id as u64
}

/// Wire identifier of an accessory: device prefix plus zero-padded number,
/// e.g. `DOU0003`.
pub fn mixed_id(prefix: &str, number: u32) -> String {
    format!("{}{:04}", prefix, number)
}
