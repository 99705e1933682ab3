#![forbid(unsafe_code)]

use std::cmp::Ordering;

use tether_kernel_contracts::release::normalize_release_tag;

/// Dotted numeric version with a total order.
///
/// Parsing never fails: a leading `v` is dropped, anything from the first `-` or `+`
/// (pre-release / build metadata) is ignored, and each dot-separated component
/// contributes its leading digits, or 0 when it has none. Missing trailing
/// components compare as 0, so `1.2 == 1.2.0`.
#[derive(Debug, Clone)]
pub struct ProductVersion {
    components: Vec<u64>,
}

impl ProductVersion {
    pub fn parse(raw: &str) -> Self {
        let core = normalize_release_tag(raw);
        let core = core
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();
        let components = core.split('.').map(leading_number).collect();
        Self { components }
    }

    fn component(&self, idx: usize) -> u64 {
        self.components.get(idx).copied().unwrap_or(0)
    }
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProductVersion {}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for idx in 0..len {
            match self.component(idx).cmp(&other.component(idx)) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    ProductVersion::parse(a).cmp(&ProductVersion::parse(b))
}

/// True only when `candidate` orders strictly after `current`.
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

fn leading_number(component: &str) -> u64 {
    let digits: &str = {
        let trimmed = component.trim();
        let end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    };
    if digits.is_empty() {
        return 0;
    }
    digits.parse::<u64>().unwrap_or(u64::MAX)
}
