/// License key generation and format checks
///
/// Keys carry a prefix made of the first three characters of the module name,
/// uppercased. Paid keys are free-form beyond the prefix but must be at least
/// twenty characters long; trial keys are always `<PREFIX>-TRIAL-<16 hex>`.
use rand::RngCore;

/// Minimum accepted length of an installable license key
pub const MIN_LICENSE_KEY_LEN: usize = 20;

const TRIAL_MARKER: &str = "TRIAL";
const TRIAL_RANDOM_BYTES: usize = 8;
const PAID_RANDOM_BYTES: usize = 12;
const PAID_GROUP_LEN: usize = 4;

/// Key prefix for a module name (`"analytics-pro"` -> `"ANA"`)
pub fn key_prefix(module_name: &str) -> String {
    module_name
        .chars()
        .take(3)
        .collect::<String>()
        .to_uppercase()
}

/// Check that a key is acceptable for the given module
pub fn is_valid_license_key(license_key: &str, module_name: &str) -> bool {
    license_key.starts_with(&key_prefix(module_name))
        && license_key.chars().count() >= MIN_LICENSE_KEY_LEN
}

/// Generate a trial key such as `ANA-TRIAL-9F04C2D17AB3E650`
pub fn generate_trial_license_key(module_name: &str) -> String {
    format!(
        "{}-{}-{}",
        key_prefix(module_name),
        TRIAL_MARKER,
        random_hex(TRIAL_RANDOM_BYTES)
    )
}

/// Generate a paid key such as `ANA-1A2B-3C4D-5E6F-7A8B-9C0D-1E2F`
pub fn generate_license_key(module_name: &str) -> String {
    let hex: Vec<char> = random_hex(PAID_RANDOM_BYTES).chars().collect();
    let groups: Vec<String> = hex
        .chunks(PAID_GROUP_LEN)
        .map(|group| group.iter().collect())
        .collect();

    format!("{}-{}", key_prefix(module_name), groups.join("-"))
}

/// Whether a key has the shape of a generated trial key
pub fn is_trial_license_key(license_key: &str) -> bool {
    let mut parts = license_key.splitn(3, '-');
    let (Some(_prefix), Some(marker), Some(random)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    marker == TRIAL_MARKER
        && random.len() == TRIAL_RANDOM_BYTES * 2
        && random
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
}

fn random_hex(byte_count: usize) -> String {
    let mut bytes = vec![0u8; byte_count];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
