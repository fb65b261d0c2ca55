use url::Url;

use crate::flags::flag_models::Namespace;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Weight lists summing outside this interval are replaced by equal weights.
const VALID_WEIGHT_SUM: std::ops::RangeInclusive<f64> = 0.99..=1.01;

/// Half-open `[start, end)` slice of the unit interval assigned to one variation.
pub type BucketRange = (f64, f64);

/// 32-bit FNV-1a over the UTF-8 bytes of `data`.
pub fn fnv1a_32(data: &str) -> u32 {
    data.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Calculates a deterministic bucket position in `[0, 1)` for an identifier and seed.
///
/// ## Arguments
/// * `seed` - Per-experiment salt, usually the experiment or feature key
/// * `value` - The identifier being bucketed (e.g., user ID)
/// * `version` - Hashing scheme
///
/// Version 1 hashes `value + seed` and keeps three decimal places. Version 2 hashes the
/// decimal string of a first hash over `seed + value`, which decorrelates experiments that
/// share seeds, and keeps four decimal places.
///
/// ## Returns
/// * `Option<f64>` - `None` for an unsupported version; callers must exclude the user
pub fn calculate_hash(seed: &str, value: &str, version: u32) -> Option<f64> {
    match version {
        1 => {
            let n = fnv1a_32(&format!("{value}{seed}"));
            Some(f64::from(n % 1000) / 1000.0)
        }
        2 => {
            let first = fnv1a_32(&format!("{seed}{value}"));
            let n = fnv1a_32(&first.to_string());
            Some(f64::from(n % 10000) / 10000.0)
        }
        _ => {
            tracing::debug!("Unsupported hash version {}", version);
            None
        }
    }
}

pub fn in_range(n: f64, range: &BucketRange) -> bool {
    n >= range.0 && n < range.1
}

/// Legacy mutual-exclusion check: hashes the identifier under `"__" + namespace id`.
pub fn in_namespace(hash_value: &str, namespace: &Namespace) -> bool {
    calculate_hash(&format!("__{}", namespace.id()), hash_value, 1)
        .is_some_and(|n| n >= namespace.start() && n < namespace.end())
}

pub fn get_equal_weights(num_variations: usize) -> Vec<f64> {
    if num_variations == 0 {
        return Vec::new();
    }
    vec![1.0 / num_variations as f64; num_variations]
}

/// Builds one range per variation.
///
/// The running position advances by the unscaled weight while each range is only
/// `coverage * weight` wide, so excluded traffic sits in a gap after every variation.
pub fn get_bucket_ranges(
    num_variations: usize,
    coverage: Option<f64>,
    weights: Option<&[f64]>,
) -> Vec<BucketRange> {
    let coverage = coverage.unwrap_or(1.0).clamp(0.0, 1.0);

    let weights = match weights {
        Some(weights)
            if weights.len() == num_variations
                && VALID_WEIGHT_SUM.contains(&weights.iter().sum::<f64>()) =>
        {
            weights.to_vec()
        }
        _ => get_equal_weights(num_variations),
    };

    let mut cumulative = 0.0;
    weights
        .iter()
        .map(|weight| {
            let start = cumulative;
            cumulative += weight;
            (start, start + coverage * weight)
        })
        .collect()
}

/// Index of the first range containing `n`, or `None` when the user falls in a gap.
pub fn choose_variation(n: f64, ranges: &[BucketRange]) -> Option<usize> {
    ranges.iter().position(|range| in_range(n, range))
}

/// Reads a `?<experiment_key>=<index>` override from an absolute URL.
pub fn get_query_string_override(id: &str, url: &str, num_variations: usize) -> Option<usize> {
    let url = Url::parse(url).ok()?;
    let (_, value) = url.query_pairs().find(|(key, _)| key == id)?;
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = value.parse::<usize>().ok()?;
    (index < num_variations).then_some(index)
}
